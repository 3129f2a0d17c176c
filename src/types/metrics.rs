use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceMetrics {
    #[serde(with = "humantime_serde")]
    pub uptime: Duration,
    pub started_at: Option<DateTime<Utc>>,
    pub last_restart: Option<DateTime<Utc>>,
    pub restart_count: u32,
    pub error_count: u32,
    pub last_error: Option<String>,
    /// Gauges contributed by the service implementation itself.
    pub custom: HashMap<String, f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub healthy: bool,
    pub error: Option<String>,
    pub metrics: HashMap<String, f64>,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            error: None,
            metrics: HashMap::new(),
        }
    }

    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            error: Some(error.into()),
            metrics: HashMap::new(),
        }
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }
}
