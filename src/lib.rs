//! Investment funding and payment orchestration engine.

pub mod api;
pub mod clock;
pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod workers;

pub use engine::Engine;
