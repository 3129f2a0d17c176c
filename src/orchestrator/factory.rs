use std::sync::Arc;

use crate::config::{Config, ServiceConfig};
use crate::coordination::CoordinationEngine;
use crate::events::EventBus;
use crate::lifecycle::ManagedService;
use crate::services::{Service, ServiceDescriptor, ServiceHandler, ServiceManager};

/// Handles passed to a factory when its service is constructed. Services
/// named in the factory's dependencies are already registered and started.
pub struct ServiceContext<'a> {
    pub config: &'a Arc<Config>,
    pub events: &'a EventBus,
    pub coordination: &'a Arc<CoordinationEngine>,
    pub services: &'a ServiceManager,
}

impl ServiceContext<'_> {
    pub fn service(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.services.get_service(name)
    }

    /// Wraps `handler` in the standard lifecycle with the global service config.
    pub fn managed(
        &self,
        descriptor: ServiceDescriptor,
        handler: Arc<dyn ServiceHandler>,
    ) -> Arc<dyn Service> {
        Arc::new(ManagedService::new(
            descriptor,
            handler,
            self.config.service.clone(),
            self.events.clone(),
        ))
    }
}

pub trait ServiceFactory: Send + Sync {
    fn name(&self) -> &str;

    /// Factories named here are constructed first, and the services they
    /// name are started before `create` runs.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    fn create(&self, context: &ServiceContext<'_>) -> anyhow::Result<Arc<dyn Service>>;
}

/// Builds a [`ManagedService`] around a ready-made handler, optionally with
/// its own [`ServiceConfig`].
pub struct ManagedServiceFactory {
    descriptor: ServiceDescriptor,
    handler: Arc<dyn ServiceHandler>,
    config: Option<ServiceConfig>,
}

impl ManagedServiceFactory {
    pub fn new(descriptor: ServiceDescriptor, handler: Arc<dyn ServiceHandler>) -> Self {
        Self {
            descriptor,
            handler,
            config: None,
        }
    }

    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = Some(config);
        self
    }
}

impl ServiceFactory for ManagedServiceFactory {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn dependencies(&self) -> Vec<String> {
        self.descriptor.dependencies.clone()
    }

    fn create(&self, context: &ServiceContext<'_>) -> anyhow::Result<Arc<dyn Service>> {
        let config = self
            .config
            .clone()
            .unwrap_or_else(|| context.config.service.clone());
        config.validate()?;
        Ok(Arc::new(ManagedService::new(
            self.descriptor.clone(),
            Arc::clone(&self.handler),
            config,
            context.events.clone(),
        )))
    }
}

pub struct FnServiceFactory<F> {
    name: String,
    dependencies: Vec<String>,
    create: F,
}

impl<F> FnServiceFactory<F> {
    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }
}

impl<F> ServiceFactory for FnServiceFactory<F>
where
    F: Fn(&ServiceContext<'_>) -> anyhow::Result<Arc<dyn Service>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> Vec<String> {
        self.dependencies.clone()
    }

    fn create(&self, context: &ServiceContext<'_>) -> anyhow::Result<Arc<dyn Service>> {
        (self.create)(context)
    }
}

/// Factory from a closure, for services that need handles from the context.
pub fn service_factory<F>(name: impl Into<String>, create: F) -> FnServiceFactory<F>
where
    F: Fn(&ServiceContext<'_>) -> anyhow::Result<Arc<dyn Service>> + Send + Sync,
{
    FnServiceFactory {
        name: name.into(),
        dependencies: Vec::new(),
        create,
    }
}
