use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::Component;
use crate::config::InitializerConfig;
use crate::error::{InitializationError, SystemError};
use crate::events::{BackendEvent, EventBus};
use crate::graph::DependencyGraph;
use crate::lifecycle::{BreakerError, CircuitBreaker, CircuitState};
use crate::services::StopReport;
use crate::types::ComponentHealth;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentState {
    Registered,
    Initializing,
    Initialized,
    Failed,
    ShutDown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub name: String,
    pub state: ComponentState,
    pub required: bool,
    pub attempts: u32,
    pub initialized_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub circuit: CircuitState,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitializationReport {
    pub initialized: Vec<String>,
    /// Optional components that gave up; initialization continued.
    pub failed: Vec<(String, String)>,
    /// Initialized but reporting unhealthy in the post-initialization pass.
    pub unhealthy: Vec<(String, String)>,
}

struct Registered {
    component: Arc<dyn Component>,
    breaker: Arc<CircuitBreaker>,
}

/// Brings one-shot components up in dependency order, each attempt guarded by
/// a per-component circuit breaker.
pub struct ComponentInitializer {
    config: InitializerConfig,
    events: EventBus,
    components: RwLock<HashMap<String, Registered>>,
    statuses: Mutex<HashMap<String, ComponentStatus>>,
    graph: RwLock<DependencyGraph>,
}

impl ComponentInitializer {
    pub fn new(config: InitializerConfig, events: EventBus) -> Self {
        Self {
            config,
            events,
            components: RwLock::new(HashMap::new()),
            statuses: Mutex::new(HashMap::new()),
            graph: RwLock::new(DependencyGraph::new()),
        }
    }

    pub fn register_component(&self, component: Arc<dyn Component>) -> Result<(), SystemError> {
        let name = component.name().to_string();
        let mut components = self.components.write();
        if components.contains_key(&name) {
            return Err(SystemError::DuplicateComponent(name));
        }

        self.graph
            .write()
            .add_node(name.clone(), component.dependencies());
        self.statuses.lock().insert(
            name.clone(),
            ComponentStatus {
                name: name.clone(),
                state: ComponentState::Registered,
                required: component.required(),
                attempts: 0,
                initialized_at: None,
                last_error: None,
                circuit: CircuitState::Closed,
            },
        );
        let breaker = Arc::new(CircuitBreaker::new(
            name.clone(),
            self.config.circuit_breaker.clone(),
        ));
        components.insert(name.clone(), Registered { component, breaker });

        log::debug!("Registered component {}", name);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.components.read().contains_key(name)
    }

    fn lookup(&self, name: &str) -> Option<(Arc<dyn Component>, Arc<CircuitBreaker>)> {
        self.components
            .read()
            .get(name)
            .map(|r| (Arc::clone(&r.component), Arc::clone(&r.breaker)))
    }

    fn update_status(&self, name: &str, f: impl FnOnce(&mut ComponentStatus)) {
        if let Some(status) = self.statuses.lock().get_mut(name) {
            f(status);
        }
    }

    fn state_of(&self, name: &str) -> Option<ComponentState> {
        self.statuses.lock().get(name).map(|s| s.state)
    }

    /// Attempts initialization with exponential backoff. Returns the number
    /// of attempts made, or that number with the last error.
    async fn initialize_one(
        &self,
        name: &str,
        component: &Arc<dyn Component>,
        breaker: &CircuitBreaker,
    ) -> Result<u32, (u32, String)> {
        let max_attempts = self.config.attempts_for(component.required());
        let mut attempts = 0;
        let mut last_error = String::new();

        while attempts < max_attempts {
            attempts += 1;
            self.update_status(name, |s| {
                s.state = ComponentState::Initializing;
                s.attempts = attempts;
            });

            match breaker.call(|| component.initialize()).await {
                Ok(()) => return Ok(attempts),
                Err(BreakerError::Rejected(e)) => {
                    log::warn!("Component {} not attempted: {}", name, e);
                    last_error = e.to_string();
                    break;
                }
                Err(BreakerError::Failed(e)) => {
                    last_error = format!("{:#}", e);
                    log::warn!(
                        "Component {} initialization attempt {}/{} failed: {}",
                        name,
                        attempts,
                        max_attempts,
                        last_error
                    );
                    if attempts < max_attempts {
                        let factor = 1u32 << (attempts - 1).min(16);
                        tokio::time::sleep(self.config.base_retry_delay.saturating_mul(factor))
                            .await;
                    }
                }
            }
        }

        Err((attempts, last_error))
    }

    fn mark_initialized(&self, name: &str) {
        self.update_status(name, |s| {
            s.state = ComponentState::Initialized;
            s.initialized_at = Some(Utc::now());
            s.last_error = None;
        });
    }

    fn mark_failed(&self, name: &str, reason: &str) {
        self.update_status(name, |s| {
            s.state = ComponentState::Failed;
            s.last_error = Some(reason.to_string());
        });
    }

    pub async fn initialize_all(&self) -> Result<InitializationReport, InitializationError> {
        let order = self.graph.read().order()?;
        let mut initialized_now = Vec::new();
        let mut report = InitializationReport::default();

        log::info!("Initializing {} component(s): {}", order.len(), order.join(", "));

        for name in &order {
            let Some((component, breaker)) = self.lookup(name) else {
                continue;
            };
            if self.state_of(name) == Some(ComponentState::Initialized) {
                report.initialized.push(name.clone());
                continue;
            }

            match self.initialize_one(name, &component, &breaker).await {
                Ok(attempts) => {
                    self.mark_initialized(name);
                    log::info!("Component {} initialized ({} attempt(s))", name, attempts);
                    initialized_now.push(name.clone());
                    report.initialized.push(name.clone());
                }
                Err((attempts, reason)) => {
                    self.mark_failed(name, &reason);
                    if component.required() {
                        log::error!("Required component {} failed: {}", name, reason);
                        self.cleanup(&initialized_now).await;
                        return Err(self.fail(InitializationError::ComponentFailed {
                            component: name.clone(),
                            attempts,
                            reason,
                        }));
                    }
                    log::warn!("Optional component {} skipped: {}", name, reason);
                    report.failed.push((name.clone(), reason));
                }
            }
        }

        for name in &report.initialized {
            let Some((component, _)) = self.lookup(name) else {
                continue;
            };
            let health = component.health_status().await;
            if !health.healthy {
                let error = health.error.unwrap_or_else(|| "unhealthy".to_string());
                log::warn!("Component {} unhealthy after initialization: {}", name, error);
                report.unhealthy.push((name.clone(), error));
            }
        }

        let missing: Vec<String> = self
            .config
            .critical_components
            .iter()
            .filter(|name| self.state_of(name) != Some(ComponentState::Initialized))
            .cloned()
            .collect();
        if !missing.is_empty() {
            log::error!("Critical components missing: {}", missing.join(", "));
            self.cleanup(&initialized_now).await;
            return Err(self.fail(SystemError::CriticalComponentsMissing(missing).into()));
        }

        self.events.publish(BackendEvent::BackendInitialized {
            components: report.initialized.clone(),
        });
        Ok(report)
    }

    fn fail(&self, error: InitializationError) -> InitializationError {
        self.events.publish(BackendEvent::InitializationFailed {
            error: error.to_string(),
        });
        error
    }

    async fn shutdown_one(&self, name: &str) -> anyhow::Result<()> {
        let Some((component, _)) = self.lookup(name) else {
            return Ok(());
        };
        let result = component.shutdown().await;
        self.update_status(name, |s| s.state = ComponentState::ShutDown);
        result
    }

    async fn cleanup(&self, initialized: &[String]) {
        for name in initialized.iter().rev() {
            log::info!("Shutting down component {} after failed initialization", name);
            if let Err(e) = self.shutdown_one(name).await {
                log::error!("Cleanup of component {} failed: {:#}", name, e);
            }
        }
    }

    /// Shuts down every initialized component in reverse dependency order.
    pub async fn shutdown_all(&self) -> StopReport {
        let stop_order = self.graph.read().stop_order();
        let order = match stop_order {
            Ok(order) => order,
            Err(e) => {
                log::error!("{}; shutting down in reverse registration order", e);
                self.graph.read().nodes().iter().rev().cloned().collect()
            }
        };

        let mut report = StopReport::default();
        for name in &order {
            if self.state_of(name) != Some(ComponentState::Initialized) {
                continue;
            }
            match self.shutdown_one(name).await {
                Ok(()) => report.stopped.push(name.clone()),
                Err(e) => {
                    log::error!("Failed to shut down component {}: {:#}", name, e);
                    report.failed.push((name.clone(), format!("{:#}", e)));
                }
            }
        }
        report
    }

    /// Shuts a single component down (if initialized) and initializes it
    /// again, leaving the others untouched.
    pub async fn restart_component(&self, name: &str) -> Result<(), InitializationError> {
        let (component, breaker) = self
            .lookup(name)
            .ok_or_else(|| SystemError::UnknownComponent(name.to_string()))?;

        if self.state_of(name) == Some(ComponentState::Initialized) {
            if let Err(e) = self.shutdown_one(name).await {
                log::warn!("Component {} shutdown before restart failed: {:#}", name, e);
            }
        }

        breaker.reset();
        match self.initialize_one(name, &component, &breaker).await {
            Ok(_) => {
                self.mark_initialized(name);
                log::info!("Component {} restarted", name);
                self.events.publish(BackendEvent::ComponentRestarted {
                    name: name.to_string(),
                });
                Ok(())
            }
            Err((attempts, reason)) => {
                self.mark_failed(name, &reason);
                Err(InitializationError::ComponentFailed {
                    component: name.to_string(),
                    attempts,
                    reason,
                })
            }
        }
    }

    pub fn component_status(&self, name: &str) -> Option<ComponentStatus> {
        let mut status = self.statuses.lock().get(name).cloned()?;
        if let Some((_, breaker)) = self.lookup(name) {
            status.circuit = breaker.state();
        }
        Some(status)
    }

    /// Statuses in registration order.
    pub fn statuses(&self) -> Vec<ComponentStatus> {
        let names = self.graph.read().nodes().to_vec();
        names
            .iter()
            .filter_map(|name| self.component_status(name))
            .collect()
    }

    pub fn initialized_components(&self) -> Vec<String> {
        self.statuses()
            .into_iter()
            .filter(|s| s.state == ComponentState::Initialized)
            .map(|s| s.name)
            .collect()
    }

    pub async fn health(&self) -> HashMap<String, ComponentHealth> {
        let mut health = HashMap::new();
        for name in self.initialized_components() {
            if let Some((component, _)) = self.lookup(&name) {
                health.insert(name, component.health_status().await);
            }
        }
        health
    }
}
