pub mod error;
pub mod factory;
pub mod poller;
pub mod provider;
pub mod providers;
pub mod retry;
pub mod types;
pub mod utils;
pub mod validation;

pub use error::{PaymentError, PaymentResult};
pub use factory::GatewayRegistry;
pub use provider::{ParseCallback, PaymentGateway};
