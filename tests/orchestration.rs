//! Integration tests for backend orchestration
//!
//! Drives the full sequence: core components, the coordination service,
//! factory-built services, the health gate and shutdown.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backbone::components::{Component, ComponentState};
use backbone::config::{Config, ServiceConfig};
use backbone::coordination::COORDINATION_SERVICE;
use backbone::error::{InitializationError, SystemError};
use backbone::events::BackendEvent;
use backbone::orchestrator::{
    service_factory, ManagedServiceFactory, Orchestrator, OrchestratorState,
};
use backbone::services::{Service, ServiceDescriptor, ServiceHandler};
use backbone::types::{ComponentHealth, ServiceState};

/// Mock service whose health can be toggled
struct MockService {
    healthy: AtomicBool,
}

impl MockService {
    fn healthy() -> Arc<Self> {
        Arc::new(Self {
            healthy: AtomicBool::new(true),
        })
    }

    fn sick() -> Arc<Self> {
        Arc::new(Self {
            healthy: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl ServiceHandler for MockService {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.healthy.load(Ordering::SeqCst))
    }
}

/// Mock service that never starts
struct FailingService;

#[async_trait]
impl ServiceHandler for FailingService {
    async fn start(&self) -> Result<()> {
        Err(anyhow!("connection refused"))
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

/// Mock component standing in for an external dependency
struct MockComponent {
    name: &'static str,
}

#[async_trait]
impl Component for MockComponent {
    fn name(&self) -> &str {
        self.name
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    async fn health_status(&self) -> ComponentHealth {
        ComponentHealth::healthy()
    }
}

fn test_config() -> Config {
    Config {
        log_level: "warn".to_string(),
        service: ServiceConfig {
            health_check_interval: Duration::ZERO,
            restart_delay: Duration::from_millis(10),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn test_full_startup_and_shutdown() {
    let orchestrator = Orchestrator::builder(test_config())
        .with_service(ManagedServiceFactory::new(
            ServiceDescriptor::new("store"),
            MockService::healthy(),
        ))
        .with_service(
            service_factory("api", |ctx| {
                let store = ctx
                    .service("store")
                    .ok_or_else(|| anyhow!("store not registered"))?;
                Ok(ctx.managed(
                    ServiceDescriptor::new("api").depends_on(store.name()),
                    MockService::healthy(),
                ))
            })
            .depends_on("store"),
        )
        .build()
        .unwrap();
    let mut rx = orchestrator.subscribe();

    let report = orchestrator.initialize().await.unwrap();
    assert_eq!(orchestrator.state(), OrchestratorState::Running);
    assert!(report.healthy);
    assert_eq!(report.components, vec!["logging", "config", "event_bus"]);
    for name in [COORDINATION_SERVICE, "store", "api"] {
        assert!(report.started.contains(&name.to_string()), "{name} not started");
    }

    let topics: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
        .map(|event| event.topic())
        .collect();
    let initialized = topics
        .iter()
        .position(|t| t == "backend:initialized")
        .unwrap();
    let complete = topics
        .iter()
        .position(|t| t == "backend:orchestration_complete")
        .unwrap();
    assert!(initialized < complete);
    assert!(topics.contains(&"coordination:ready".to_string()));

    let shutdown = orchestrator.shutdown().await;
    assert_eq!(shutdown.services.stopped, vec!["api", "store", COORDINATION_SERVICE]);
    assert!(shutdown.services.failed.is_empty());
    assert_eq!(orchestrator.state(), OrchestratorState::Stopped);
    assert!(orchestrator
        .services()
        .service_states()
        .values()
        .all(|state| *state == ServiceState::Stopped));
}

#[tokio::test]
async fn test_unhealthy_required_service_aborts_and_cleans_up() {
    let orchestrator = Orchestrator::builder(test_config())
        .with_service(ManagedServiceFactory::new(
            ServiceDescriptor::new("store"),
            MockService::sick(),
        ))
        .build()
        .unwrap();
    let mut rx = orchestrator.subscribe();

    let err = orchestrator.initialize().await.unwrap_err();
    match err {
        InitializationError::UnhealthyServices(names) => assert_eq!(names, vec!["store"]),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(orchestrator.state(), OrchestratorState::Failed);

    assert!(orchestrator
        .services()
        .service_states()
        .values()
        .all(|state| !state.is_active()));
    assert!(orchestrator
        .initializer()
        .statuses()
        .iter()
        .all(|status| status.state == ComponentState::ShutDown));

    let failed = std::iter::from_fn(|| rx.try_recv().ok())
        .any(|event| matches!(event, BackendEvent::InitializationFailed { .. }));
    assert!(failed);
}

#[tokio::test]
async fn test_missing_critical_components_abort() {
    let orchestrator = Orchestrator::builder(test_config())
        .without_builtin_components()
        .with_component(Arc::new(MockComponent { name: "logging" }))
        .build()
        .unwrap();

    let err = orchestrator.initialize().await.unwrap_err();
    match err {
        InitializationError::System(SystemError::CriticalComponentsMissing(missing)) => {
            assert_eq!(missing, vec!["config", "event_bus"])
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(orchestrator.state(), OrchestratorState::Failed);
    assert!(orchestrator.services().is_empty());
}

#[tokio::test]
async fn test_factory_sees_its_dependencies_running() {
    let seen: Arc<Mutex<Vec<(String, Option<ServiceState>)>>> = Arc::default();
    let recorder = Arc::clone(&seen);

    let orchestrator = Orchestrator::builder(test_config())
        .with_service(ManagedServiceFactory::new(
            ServiceDescriptor::new("a"),
            MockService::healthy(),
        ))
        .with_service(
            service_factory("b", move |ctx| {
                for name in ["a", COORDINATION_SERVICE] {
                    let state = ctx.service(name).map(|service| service.state());
                    recorder.lock().push((name.to_string(), state));
                }
                Ok(ctx.managed(
                    ServiceDescriptor::new("b").depends_on("a"),
                    MockService::healthy(),
                ))
            })
            .depends_on("a")
            .depends_on(COORDINATION_SERVICE),
        )
        .build()
        .unwrap();

    let report = orchestrator.initialize().await.unwrap();
    assert_eq!(
        *seen.lock(),
        vec![
            ("a".to_string(), Some(ServiceState::Running)),
            (COORDINATION_SERVICE.to_string(), Some(ServiceState::Running)),
        ]
    );
    for name in [COORDINATION_SERVICE, "a", "b"] {
        let count = report.started.iter().filter(|n| *n == name).count();
        assert_eq!(count, 1, "{name} reported {count} times");
    }

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_failed_dependency_stops_construction() {
    let orchestrator = Orchestrator::builder(test_config())
        .with_service(ManagedServiceFactory::new(
            ServiceDescriptor::new("store"),
            Arc::new(FailingService),
        ))
        .with_service(
            service_factory("api", |_ctx| Err(anyhow!("should not be constructed")))
                .depends_on("store"),
        )
        .build()
        .unwrap();

    let err = orchestrator.initialize().await.unwrap_err();
    match err {
        InitializationError::ServiceFailed { service, .. } => assert_eq!(service, "store"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!orchestrator.services().contains("api"));
    assert_eq!(orchestrator.state(), OrchestratorState::Failed);
}

#[tokio::test]
async fn test_factory_error_aborts_initialization() {
    let orchestrator = Orchestrator::builder(test_config())
        .with_service(service_factory("broken", |_ctx| {
            Err(anyhow!("missing credentials"))
        }))
        .build()
        .unwrap();

    let err = orchestrator.initialize().await.unwrap_err();
    match err {
        InitializationError::ServiceConstruction { service, reason } => {
            assert_eq!(service, "broken");
            assert!(reason.contains("missing credentials"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_status_reports_services_and_components() {
    let orchestrator = Orchestrator::builder(test_config())
        .with_service(ManagedServiceFactory::new(
            ServiceDescriptor::new("cache").optional(),
            MockService::healthy(),
        ))
        .build()
        .unwrap();
    orchestrator.initialize().await.unwrap();

    let status = orchestrator.get_status().await;
    assert_eq!(status.state, OrchestratorState::Running);
    assert_eq!(status.components.len(), 3);

    let coordination = &status.services[COORDINATION_SERVICE];
    assert_eq!(coordination.state, ServiceState::Running);
    assert!(coordination.healthy);
    assert!(coordination.required);
    assert!(!status.services["cache"].required);

    orchestrator.restart_service("cache").await.unwrap();
    assert_eq!(
        orchestrator.get_status().await.services["cache"].metrics.restart_count,
        1
    );
    assert!(orchestrator.restart_service("nope").await.is_err());

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_restart_brings_backend_back_up() {
    let orchestrator = Orchestrator::builder(test_config()).build().unwrap();
    orchestrator.initialize().await.unwrap();

    let report = orchestrator.restart().await.unwrap();
    assert_eq!(orchestrator.state(), OrchestratorState::Running);
    assert!(report.started.contains(&COORDINATION_SERVICE.to_string()));

    orchestrator.shutdown().await;
}
