//! Top-level sequencing: core components, then services, then a system-wide
//! health gate before the backend is declared ready.

pub mod factory;

pub use factory::{
    service_factory, FnServiceFactory, ManagedServiceFactory, ServiceContext, ServiceFactory,
};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::components::{
    Component, ComponentInitializer, ComponentStatus, ConfigComponent, EventBusComponent,
    InitializationReport, LoggingComponent,
};
use crate::config::Config;
use crate::coordination::{CoordinationEngine, CoordinationService, COORDINATION_SERVICE};
use crate::error::{InitializationError, Result};
use crate::events::{BackendEvent, EventBus};
use crate::graph::DependencyGraph;
use crate::services::{ServiceManager, StartReport, StopReport};
use crate::types::{ServiceMetrics, ServiceState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrchestratorState {
    Idle,
    Initializing,
    Running,
    ShuttingDown,
    Stopped,
    Failed,
}

/// Readiness report published with `backend:orchestration_complete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationReport {
    pub components: Vec<String>,
    pub started: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub health: BTreeMap<String, bool>,
    pub healthy: bool,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub state: ServiceState,
    pub healthy: bool,
    pub required: bool,
    pub metrics: ServiceMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub state: OrchestratorState,
    pub services: BTreeMap<String, ServiceStatus>,
    pub components: Vec<ComponentStatus>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShutdownReport {
    pub services: StopReport,
    pub components: StopReport,
}

pub struct OrchestratorBuilder {
    config: Config,
    components: Vec<Arc<dyn Component>>,
    factories: Vec<Box<dyn ServiceFactory>>,
    builtin_components: bool,
}

impl OrchestratorBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            components: Vec::new(),
            factories: Vec::new(),
            builtin_components: true,
        }
    }

    pub fn with_component(mut self, component: Arc<dyn Component>) -> Self {
        self.components.push(component);
        self
    }

    pub fn with_service(mut self, factory: impl ServiceFactory + 'static) -> Self {
        self.factories.push(Box::new(factory));
        self
    }

    /// Skips registering the logging, config and event bus components.
    pub fn without_builtin_components(mut self) -> Self {
        self.builtin_components = false;
        self
    }

    pub fn build(self) -> Result<Orchestrator, InitializationError> {
        self.config.validate()?;

        let config = Arc::new(self.config);
        let events = EventBus::new(config.event_bus_capacity);
        let coordination = Arc::new(CoordinationEngine::new(
            config.coordination.clone(),
            events.clone(),
        )?);
        let initializer = ComponentInitializer::new(config.initializer.clone(), events.clone());

        if self.builtin_components {
            initializer.register_component(Arc::new(LoggingComponent::new(
                config.log_level.clone(),
            )))?;
            initializer.register_component(Arc::new(ConfigComponent::new(Arc::clone(&config))))?;
            initializer.register_component(Arc::new(EventBusComponent::new(events.clone())))?;
        }
        for component in self.components {
            initializer.register_component(component)?;
        }

        Ok(Orchestrator {
            config,
            events,
            initializer,
            services: ServiceManager::new(),
            coordination,
            factories: self.factories,
            state: RwLock::new(OrchestratorState::Idle),
        })
    }
}

pub struct Orchestrator {
    config: Arc<Config>,
    events: EventBus,
    initializer: ComponentInitializer,
    services: ServiceManager,
    coordination: Arc<CoordinationEngine>,
    factories: Vec<Box<dyn ServiceFactory>>,
    state: RwLock<OrchestratorState>,
}

impl Orchestrator {
    pub fn builder(config: Config) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BackendEvent> {
        self.events.subscribe()
    }

    pub fn coordination(&self) -> &Arc<CoordinationEngine> {
        &self.coordination
    }

    pub fn services(&self) -> &ServiceManager {
        &self.services
    }

    pub fn initializer(&self) -> &ComponentInitializer {
        &self.initializer
    }

    pub fn state(&self) -> OrchestratorState {
        *self.state.read()
    }

    fn set_state(&self, state: OrchestratorState) {
        *self.state.write() = state;
    }

    /// Brings the backend up. Either returns a full readiness report or an
    /// error after everything already started has been torn down again.
    pub async fn initialize(&self) -> Result<OrchestrationReport, InitializationError> {
        self.set_state(OrchestratorState::Initializing);
        log::info!("Initializing backend");

        let components = match self.initializer.initialize_all().await {
            Ok(report) => report,
            Err(e) => {
                log::error!("Component initialization failed: {}", e);
                self.set_state(OrchestratorState::Failed);
                return Err(e);
            }
        };

        match self.bring_up_services(&components).await {
            Ok(report) => {
                self.set_state(OrchestratorState::Running);
                log::info!(
                    "Backend ready: {} service(s) started, {} failed",
                    report.started.len(),
                    report.failed.len()
                );
                self.events.publish(BackendEvent::OrchestrationComplete {
                    report: report.clone(),
                });
                Ok(report)
            }
            Err(e) => {
                log::error!("Orchestration failed: {}", e);
                self.services.stop_all().await;
                self.initializer.shutdown_all().await;
                self.set_state(OrchestratorState::Failed);
                self.events.publish(BackendEvent::InitializationFailed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Constructs factory services in dependency order. Before each factory
    /// runs, the services it names are started so it sees them Running.
    async fn construct_services(&self) -> Result<StartReport, InitializationError> {
        if !self.services.contains(COORDINATION_SERVICE) {
            let coordination = CoordinationService::managed(
                Arc::clone(&self.coordination),
                self.config.service.clone(),
                self.events.clone(),
            );
            self.services.register_service(Arc::new(coordination))?;
        }

        let mut graph = DependencyGraph::new();
        for factory in &self.factories {
            graph.add_node(factory.name(), factory.dependencies());
        }

        let mut report = StartReport::default();
        for name in graph.order()? {
            if self.services.contains(&name) {
                continue;
            }
            let Some(factory) = self.factories.iter().find(|f| f.name() == name) else {
                continue;
            };

            let dependencies = factory.dependencies();
            let early = self.services.start_services(dependencies.as_slice()).await?;
            report.started.extend(early.started);
            report.failed.extend(early.failed);

            let context = ServiceContext {
                config: &self.config,
                events: &self.events,
                coordination: &self.coordination,
                services: &self.services,
            };
            let service = factory.create(&context).map_err(|e| {
                InitializationError::ServiceConstruction {
                    service: name.clone(),
                    reason: format!("{:#}", e),
                }
            })?;
            self.services.register_service(service)?;
        }

        Ok(report)
    }

    async fn bring_up_services(
        &self,
        components: &InitializationReport,
    ) -> Result<OrchestrationReport, InitializationError> {
        let mut started = self.construct_services().await?;
        let rest = self.services.start_all().await?;
        // A failed optional dependency gets another attempt in start_all.
        started.failed.retain(|(name, _)| {
            !rest.started.contains(name) && !rest.failed.iter().any(|(n, _)| n == name)
        });
        started.started.extend(rest.started);
        started.failed.extend(rest.failed);

        let health = self.services.get_service_health().await;
        let states = self.services.service_states();

        let mut unhealthy = Vec::new();
        for name in self.services.service_names() {
            let Some(service) = self.services.get_service(&name) else {
                continue;
            };
            let healthy = health.get(&name).copied().unwrap_or(false);
            let running = states.get(&name) == Some(&ServiceState::Running);
            if service.required() && !(healthy && running) {
                log::error!(
                    "Required service {} not ready (healthy: {}, running: {})",
                    name,
                    healthy,
                    running
                );
                unhealthy.push(name);
            }
        }
        if !unhealthy.is_empty() {
            return Err(InitializationError::UnhealthyServices(unhealthy));
        }

        let health: BTreeMap<String, bool> = health.into_iter().collect();
        Ok(OrchestrationReport {
            components: components.initialized.clone(),
            started: started.started,
            failed: started.failed,
            healthy: health.values().all(|h| *h),
            health,
            completed_at: Utc::now(),
        })
    }

    /// Stops services in reverse dependency order, then shuts components down.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.set_state(OrchestratorState::ShuttingDown);
        log::info!("Shutting down backend");

        let services = self.services.stop_all().await;
        let components = self.initializer.shutdown_all().await;

        self.set_state(OrchestratorState::Stopped);
        self.events.publish(BackendEvent::BackendShutdown);
        log::info!(
            "Backend stopped ({} service(s), {} component(s))",
            services.stopped.len(),
            components.stopped.len()
        );

        ShutdownReport {
            services,
            components,
        }
    }

    pub async fn restart(&self) -> Result<OrchestrationReport, InitializationError> {
        log::info!("Restarting backend");
        self.shutdown().await;
        self.initialize().await
    }

    pub async fn restart_service(&self, name: &str) -> Result<()> {
        self.services.restart_service(name).await
    }

    pub async fn restart_component(&self, name: &str) -> Result<(), InitializationError> {
        self.initializer.restart_component(name).await
    }

    pub async fn get_service_health(&self) -> HashMap<String, bool> {
        self.services.get_service_health().await
    }

    pub async fn get_status(&self) -> SystemStatus {
        let health = self.services.get_service_health().await;
        let mut services = BTreeMap::new();
        for name in self.services.service_names() {
            let Some(service) = self.services.get_service(&name) else {
                continue;
            };
            services.insert(
                name.clone(),
                ServiceStatus {
                    state: service.state(),
                    healthy: health.get(&name).copied().unwrap_or(false),
                    required: service.required(),
                    metrics: service.metrics(),
                },
            );
        }

        SystemStatus {
            state: self.state(),
            services,
            components: self.initializer.statuses(),
            timestamp: Utc::now(),
        }
    }
}
