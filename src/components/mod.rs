pub mod builtin;
pub mod initializer;

pub use builtin::{ConfigComponent, EventBusComponent, LoggingComponent};
pub use initializer::{ComponentInitializer, ComponentState, ComponentStatus, InitializationReport};

use async_trait::async_trait;

use crate::types::ComponentHealth;

pub const LOGGING: &str = "logging";
pub const CONFIG: &str = "config";
pub const EVENT_BUS: &str = "event_bus";

/// One-shot unit brought up once at process start by the
/// [`ComponentInitializer`]. Not health-monitored or auto-restarted.
#[async_trait]
pub trait Component: Send + Sync {
    fn name(&self) -> &str;

    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    fn required(&self) -> bool {
        true
    }

    async fn initialize(&self) -> anyhow::Result<()>;

    async fn shutdown(&self) -> anyhow::Result<()>;

    async fn health_status(&self) -> ComponentHealth {
        ComponentHealth::healthy()
    }
}
