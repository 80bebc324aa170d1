pub mod guard;
pub mod notify;
pub mod orchestrator;
pub mod scheduler;
pub mod state;
