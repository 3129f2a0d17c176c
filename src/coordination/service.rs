use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::CoordinationEngine;
use crate::config::ServiceConfig;
use crate::events::{BackendEvent, EventBus};
use crate::lifecycle::ManagedService;
use crate::services::{ServiceDescriptor, ServiceHandler};

pub const COORDINATION_SERVICE: &str = "coordination";

/// Runs the coordination engine as a managed service: periodic maintenance
/// while running and one final sweep on stop.
pub struct CoordinationService {
    engine: Arc<CoordinationEngine>,
    maintenance: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl CoordinationService {
    pub fn new(engine: Arc<CoordinationEngine>) -> Self {
        Self {
            engine,
            maintenance: Mutex::new(None),
        }
    }

    pub fn descriptor() -> ServiceDescriptor {
        ServiceDescriptor::new(COORDINATION_SERVICE)
    }

    /// Wraps a new handler for `engine` in the standard lifecycle.
    pub fn managed(
        engine: Arc<CoordinationEngine>,
        config: ServiceConfig,
        events: EventBus,
    ) -> ManagedService {
        ManagedService::new(
            Self::descriptor(),
            Arc::new(Self::new(engine)),
            config,
            events,
        )
    }

    pub fn engine(&self) -> &Arc<CoordinationEngine> {
        &self.engine
    }

    async fn maintenance_loop(
        engine: Arc<CoordinationEngine>,
        interval: Duration,
        token: CancellationToken,
    ) {
        log::debug!("Coordination maintenance every {:?}", interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    engine.perform_maintenance();
                }
            }
        }
        log::debug!("Coordination maintenance loop stopped");
    }
}

#[async_trait]
impl ServiceHandler for CoordinationService {
    async fn start(&self) -> anyhow::Result<()> {
        self.engine.config().validate()?;

        let token = CancellationToken::new();
        let handle = tokio::spawn(Self::maintenance_loop(
            Arc::clone(&self.engine),
            self.engine.config().maintenance_interval,
            token.clone(),
        ));
        let previous = self.maintenance.lock().replace((token, handle));
        if let Some((token, _)) = previous {
            token.cancel();
        }

        self.engine.events().publish(BackendEvent::ServiceReady {
            name: COORDINATION_SERVICE.to_string(),
        });
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let running = self.maintenance.lock().take();
        if let Some((token, handle)) = running {
            token.cancel();
            if let Err(e) = handle.await {
                log::warn!("Coordination maintenance task ended abnormally: {}", e);
            }
        }

        self.engine.perform_maintenance();
        Ok(())
    }

    async fn health_check(&self) -> anyhow::Result<bool> {
        let live = self
            .maintenance
            .lock()
            .as_ref()
            .map(|(token, handle)| !token.is_cancelled() && !handle.is_finished())
            .unwrap_or(false);
        Ok(live)
    }

    fn metrics(&self) -> HashMap<String, f64> {
        let stats = self.engine.stats();
        HashMap::from([
            ("agents".to_string(), stats.agents as f64),
            ("live_tasks".to_string(), stats.live_tasks as f64),
            ("held_resources".to_string(), stats.held_resources as f64),
            ("waiting_agents".to_string(), stats.waiting_agents as f64),
            ("conflicts".to_string(), stats.conflicts as f64),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordinationConfig;
    use crate::services::Service;
    use crate::types::{ServiceState, Task, TaskStatus};

    fn engine(events: &EventBus) -> Arc<CoordinationEngine> {
        let config = CoordinationConfig {
            maintenance_interval: Duration::from_secs(10),
            ..Default::default()
        };
        Arc::new(CoordinationEngine::new(config, events.clone()).unwrap())
    }

    #[tokio::test]
    async fn test_start_emits_ready() {
        let events = EventBus::new(16);
        let mut rx = events.subscribe();
        let handler = CoordinationService::new(engine(&events));

        handler.start().await.unwrap();
        assert!(handler.health_check().await.unwrap());

        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic(), "coordination:ready");

        handler.stop().await.unwrap();
        assert!(!handler.health_check().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_maintenance_sweeps_orphans() {
        let events = EventBus::new(64);
        let engine = engine(&events);
        let service = CoordinationService::managed(
            Arc::clone(&engine),
            ServiceConfig {
                health_check_interval: Duration::ZERO,
                ..Default::default()
            },
            events,
        );
        service.start().await.unwrap();
        assert_eq!(service.state(), ServiceState::Running);

        engine.register_agent("worker").unwrap();
        engine.assign_task(Task::new("t", "x"), "worker").unwrap();
        engine.unregister_agent("worker").unwrap();

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(engine.get_task("t").unwrap().status, TaskStatus::Cancelled);

        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_metrics_expose_engine_gauges() {
        let events = EventBus::new(16);
        let engine = engine(&events);
        engine.register_agent("a").unwrap();
        let handler = CoordinationService::new(engine);

        let metrics = handler.metrics();
        assert_eq!(metrics.get("agents"), Some(&1.0));
        assert_eq!(metrics.get("held_resources"), Some(&0.0));
    }
}
