pub mod scheduler;

pub use scheduler::LifecycleScheduler;
