pub mod config;
pub mod installer;
pub mod notify;
pub mod orchestrator;
pub mod probe;
pub mod publish;
pub mod wiring;
