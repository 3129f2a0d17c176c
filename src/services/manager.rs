use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::Service;
use crate::error::{CyclicDependencyError, InitializationError, Result, SystemError};
use crate::graph::DependencyGraph;
use crate::types::{ServiceMetrics, ServiceState};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartReport {
    pub started: Vec<String>,
    /// Already running, or in maintenance, before the call.
    pub skipped: Vec<String>,
    /// Optional services that failed; startup continued past them.
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StopReport {
    pub stopped: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Registry of services with dependency-ordered bulk start and stop.
#[derive(Default)]
pub struct ServiceManager {
    services: RwLock<HashMap<String, Arc<dyn Service>>>,
    graph: RwLock<DependencyGraph>,
    order_cache: Mutex<Option<Vec<String>>>,
}

impl ServiceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_service(&self, service: Arc<dyn Service>) -> Result<(), SystemError> {
        let name = service.name().to_string();
        {
            let mut services = self.services.write();
            if services.contains_key(&name) {
                return Err(SystemError::DuplicateService(name));
            }
            self.graph
                .write()
                .add_node(name.clone(), service.dependencies().iter().cloned());
            services.insert(name.clone(), service);
        }
        self.order_cache.lock().take();

        log::info!("Registered service {}", name);
        Ok(())
    }

    /// Removes a service, stopping it first if it is active.
    pub async fn unregister_service(&self, name: &str) -> Result<Arc<dyn Service>, SystemError> {
        let service = self
            .get_service(name)
            .ok_or_else(|| SystemError::UnknownService(name.to_string()))?;

        if service.state().is_active() || service.state() == ServiceState::Error {
            if let Err(e) = service.stop().await {
                log::warn!("Failed to stop {} while unregistering: {}", name, e);
            }
        }

        self.services.write().remove(name);
        self.graph.write().remove_node(name);
        self.order_cache.lock().take();

        log::info!("Unregistered service {}", name);
        Ok(service)
    }

    pub fn get_service(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.services.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.read().contains_key(name)
    }

    /// Names in registration order.
    pub fn service_names(&self) -> Vec<String> {
        self.graph.read().nodes().to_vec()
    }

    pub fn start_order(&self) -> Result<Vec<String>, CyclicDependencyError> {
        if let Some(order) = self.order_cache.lock().as_ref() {
            return Ok(order.clone());
        }

        let order = self.graph.read().order()?;
        *self.order_cache.lock() = Some(order.clone());
        Ok(order)
    }

    pub fn stop_order(&self) -> Result<Vec<String>, CyclicDependencyError> {
        let mut order = self.start_order()?;
        order.reverse();
        Ok(order)
    }

    /// Starts every service in dependency order. A required failure stops the
    /// services started by this call in reverse and aborts.
    pub async fn start_all(&self) -> Result<StartReport, InitializationError> {
        let order = self.start_order()?;
        log::info!("Starting {} service(s): {}", order.len(), order.join(", "));
        self.start_in_order(&order).await
    }

    /// Starts `names` and their transitive dependencies, leaving every other
    /// service alone. Failure handling matches [`ServiceManager::start_all`].
    pub async fn start_services<S: AsRef<str>>(
        &self,
        names: &[S],
    ) -> Result<StartReport, InitializationError> {
        let order = self.graph.read().order_for(names)?;
        self.start_in_order(&order).await
    }

    async fn start_in_order(&self, order: &[String]) -> Result<StartReport, InitializationError> {
        let mut report = StartReport::default();

        for name in order {
            let Some(service) = self.get_service(name) else {
                continue;
            };

            if service.state().is_active() {
                report.skipped.push(name.clone());
                continue;
            }

            match service.start().await {
                Ok(()) => report.started.push(name.clone()),
                Err(e) if service.required() => {
                    log::error!("Required service {} failed to start: {}", name, e);
                    self.rollback(&report.started).await;
                    return Err(InitializationError::ServiceFailed {
                        service: name.clone(),
                        source: e,
                    });
                }
                Err(e) => {
                    log::warn!("Optional service {} failed to start: {}", name, e);
                    report.failed.push((name.clone(), e.to_string()));
                }
            }
        }

        Ok(report)
    }

    async fn rollback(&self, started: &[String]) {
        for name in started.iter().rev() {
            let Some(service) = self.get_service(name) else {
                continue;
            };
            log::info!("Rolling back service {}", name);
            if let Err(e) = service.stop().await {
                log::error!("Rollback of {} failed: {}", name, e);
            }
        }
    }

    /// Stops every active service in reverse dependency order. Failures are
    /// logged and the loop carries on.
    pub async fn stop_all(&self) -> StopReport {
        let order = match self.stop_order() {
            Ok(order) => order,
            Err(e) => {
                log::error!("{}; stopping in reverse registration order", e);
                let mut names = self.service_names();
                names.reverse();
                names
            }
        };

        let mut report = StopReport::default();
        for name in &order {
            let Some(service) = self.get_service(name) else {
                continue;
            };
            if !service.state().is_active() {
                continue;
            }

            match service.stop().await {
                Ok(()) => report.stopped.push(name.clone()),
                Err(e) => {
                    log::error!("Failed to stop service {}: {}", name, e);
                    report.failed.push((name.clone(), e.to_string()));
                }
            }
        }

        report
    }

    /// Runs every health check concurrently. An erroring check counts as
    /// unhealthy.
    pub async fn get_service_health(&self) -> HashMap<String, bool> {
        let services: Vec<_> = self
            .services
            .read()
            .iter()
            .map(|(name, service)| (name.clone(), Arc::clone(service)))
            .collect();

        let checks = services.into_iter().map(|(name, service)| async move {
            let healthy = match service.health_check().await {
                Ok(healthy) => healthy,
                Err(e) => {
                    log::warn!("Health check for {} errored: {:#}", name, e);
                    false
                }
            };
            (name, healthy)
        });

        join_all(checks).await.into_iter().collect()
    }

    pub async fn restart_service(&self, name: &str) -> Result<()> {
        let service = self
            .get_service(name)
            .ok_or_else(|| SystemError::UnknownService(name.to_string()))?;
        service.restart().await?;
        Ok(())
    }

    pub fn service_states(&self) -> HashMap<String, ServiceState> {
        self.services
            .read()
            .iter()
            .map(|(name, service)| (name.clone(), service.state()))
            .collect()
    }

    pub fn service_metrics(&self) -> HashMap<String, ServiceMetrics> {
        self.services
            .read()
            .iter()
            .map(|(name, service)| (name.clone(), service.metrics()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }
}
