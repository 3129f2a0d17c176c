pub mod manager;

pub use manager::{ServiceManager, StartReport, StopReport};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ServiceError;
use crate::types::{ServiceMetrics, ServiceState};

/// Static metadata of a managed service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub version: String,
    pub dependencies: Vec<String>,
    /// A required service that fails to start aborts the whole startup.
    pub required: bool,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            dependencies: Vec::new(),
            required: true,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(dependencies.into_iter().map(Into::into));
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// The part of a service its author writes. Timeouts, state tracking, hooks,
/// metrics and health monitoring are layered on top by
/// [`ManagedService`](crate::lifecycle::ManagedService).
#[async_trait]
pub trait ServiceHandler: Send + Sync + 'static {
    async fn start(&self) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;

    async fn health_check(&self) -> anyhow::Result<bool> {
        Ok(true)
    }

    async fn before_start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn after_start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn before_stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn after_stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Custom gauges merged into [`ServiceMetrics::custom`].
    fn metrics(&self) -> HashMap<String, f64> {
        HashMap::new()
    }
}

/// Contract the [`ServiceManager`] drives.
#[async_trait]
pub trait Service: Send + Sync {
    fn descriptor(&self) -> &ServiceDescriptor;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    fn dependencies(&self) -> &[String] {
        &self.descriptor().dependencies
    }

    fn required(&self) -> bool {
        self.descriptor().required
    }

    async fn start(&self) -> Result<(), ServiceError>;

    async fn stop(&self) -> Result<(), ServiceError>;

    async fn restart(&self) -> Result<(), ServiceError>;

    fn state(&self) -> ServiceState;

    fn metrics(&self) -> ServiceMetrics;

    async fn health_check(&self) -> anyhow::Result<bool>;

    async fn enter_maintenance(&self) -> Result<(), ServiceError>;

    async fn exit_maintenance(&self) -> Result<(), ServiceError>;
}
