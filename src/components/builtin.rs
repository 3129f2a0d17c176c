use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{Component, CONFIG, EVENT_BUS, LOGGING};
use crate::config::Config;
use crate::events::EventBus;
use crate::types::ComponentHealth;

/// Installs the process-wide `env_logger` backend. `RUST_LOG` takes
/// precedence over the configured level.
pub struct LoggingComponent {
    level: String,
    installed: AtomicBool,
}

impl LoggingComponent {
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            installed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Component for LoggingComponent {
    fn name(&self) -> &str {
        LOGGING
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        let env = env_logger::Env::default().default_filter_or(self.level.as_str());
        if env_logger::Builder::from_env(env).try_init().is_err() {
            log::debug!("Logger already installed, keeping it");
        }
        self.installed.store(true, Ordering::SeqCst);
        log::info!("Logging initialized at level {}", self.level);
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        log::logger().flush();
        self.installed.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn health_status(&self) -> ComponentHealth {
        if self.installed.load(Ordering::SeqCst) {
            ComponentHealth::healthy()
        } else {
            ComponentHealth::unhealthy("logger not installed")
        }
    }
}

/// Validates the loaded configuration; every other unit reads from it.
pub struct ConfigComponent {
    config: Arc<Config>,
}

impl ConfigComponent {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }
}

#[async_trait]
impl Component for ConfigComponent {
    fn name(&self) -> &str {
        CONFIG
    }

    fn dependencies(&self) -> Vec<String> {
        vec![LOGGING.to_string()]
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        self.config.validate()?;
        log::debug!("Configuration validated");
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn health_status(&self) -> ComponentHealth {
        match self.config.validate() {
            Ok(()) => ComponentHealth::healthy(),
            Err(e) => ComponentHealth::unhealthy(e.to_string()),
        }
    }
}

pub struct EventBusComponent {
    events: EventBus,
}

impl EventBusComponent {
    pub fn new(events: EventBus) -> Self {
        Self { events }
    }
}

#[async_trait]
impl Component for EventBusComponent {
    fn name(&self) -> &str {
        EVENT_BUS
    }

    fn dependencies(&self) -> Vec<String> {
        vec![LOGGING.to_string(), CONFIG.to_string()]
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        log::debug!(
            "Event bus ready with {} subscriber(s)",
            self.events.subscriber_count()
        );
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn health_status(&self) -> ComponentHealth {
        ComponentHealth::healthy()
            .with_metric("subscribers", self.events.subscriber_count() as f64)
    }
}
