pub mod types;
pub mod error;
pub mod config;
pub mod events;
pub mod graph;
pub mod lifecycle;
pub mod services;
pub mod components;
pub mod coordination;
pub mod orchestrator;

pub use config::Config;
pub use coordination::CoordinationEngine;
pub use error::{BackendError, Result};
pub use events::{BackendEvent, EventBus};
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use services::{Service, ServiceHandler, ServiceManager};
pub use types::*;
