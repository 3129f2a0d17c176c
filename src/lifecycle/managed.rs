//! Lifecycle plumbing shared by every concrete service.
//!
//! `ManagedService` composes a user [`ServiceHandler`] with the transition
//! table, startup/shutdown timeouts, hooks, metrics and a background health
//! monitor that restarts the service on failure up to a bounded count.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::health::{HealthOutcome, HealthTracker};
use super::state_machine::{LifecycleEvent, ServiceStateMachine};
use crate::config::ServiceConfig;
use crate::error::{FailureCause, ServiceError};
use crate::events::{BackendEvent, EventBus};
use crate::services::{Service, ServiceDescriptor, ServiceHandler};
use crate::types::{ServiceMetrics, ServiceState};

const TRANSITION_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: ServiceState,
    pub to: ServiceState,
    pub event: LifecycleEvent,
    pub at: DateTime<Utc>,
}

struct ServiceInner {
    descriptor: ServiceDescriptor,
    config: ServiceConfig,
    handler: Arc<dyn ServiceHandler>,
    events: EventBus,
    state: Mutex<ServiceState>,
    metrics: Mutex<ServiceMetrics>,
    health: Mutex<HealthTracker>,
    auto_restart: AtomicBool,
    monitor: Mutex<Option<CancellationToken>>,
    transitions: Mutex<VecDeque<StateTransition>>,
}

/// Cloning yields another handle to the same service.
#[derive(Clone)]
pub struct ManagedService {
    inner: Arc<ServiceInner>,
}

impl ManagedService {
    pub fn new(
        descriptor: ServiceDescriptor,
        handler: Arc<dyn ServiceHandler>,
        config: ServiceConfig,
        events: EventBus,
    ) -> Self {
        let auto_restart = config.enable_auto_restart;
        Self {
            inner: Arc::new(ServiceInner {
                descriptor,
                config,
                handler,
                events,
                state: Mutex::new(ServiceState::Stopped),
                metrics: Mutex::new(ServiceMetrics::default()),
                health: Mutex::new(HealthTracker::new()),
                auto_restart: AtomicBool::new(auto_restart),
                monitor: Mutex::new(None),
                transitions: Mutex::new(VecDeque::new()),
            }),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    pub fn auto_restart_enabled(&self) -> bool {
        self.inner.auto_restart.load(Ordering::SeqCst)
    }

    pub fn set_auto_restart(&self, enabled: bool) {
        self.inner.auto_restart.store(enabled, Ordering::SeqCst);
    }

    pub fn health(&self) -> HealthTracker {
        self.inner.health.lock().clone()
    }

    /// Most recent transitions, oldest first.
    pub fn transitions(&self) -> Vec<StateTransition> {
        self.inner.transitions.lock().iter().cloned().collect()
    }

    pub fn is_monitoring(&self) -> bool {
        self.inner
            .monitor
            .lock()
            .as_ref()
            .map(|token| !token.is_cancelled())
            .unwrap_or(false)
    }

    fn apply(&self, state: &mut ServiceState, event: LifecycleEvent) -> Result<(), ServiceError> {
        let from = *state;
        let to = ServiceStateMachine::transition(self.name(), state, event)?;

        let mut transitions = self.inner.transitions.lock();
        transitions.push_back(StateTransition {
            from,
            to,
            event,
            at: Utc::now(),
        });
        if transitions.len() > TRANSITION_HISTORY_LIMIT {
            transitions.pop_front();
        }
        Ok(())
    }

    fn transition(&self, event: LifecycleEvent) -> Result<(), ServiceError> {
        let mut state = self.inner.state.lock();
        self.apply(&mut state, event)
    }

    fn record_error(&self, message: &str) {
        let mut metrics = self.inner.metrics.lock();
        metrics.error_count += 1;
        metrics.last_error = Some(message.to_string());
    }

    /// Runs `fut` on its own task, bounded by `limit`. On timeout the task is
    /// left running; it owns its own cleanup.
    async fn guarded<F>(limit: Duration, fut: F) -> Result<(), FailureCause>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        match tokio::time::timeout(limit, tokio::spawn(fut)).await {
            Err(_) => Err(FailureCause::Timeout(limit)),
            Ok(Err(_)) => Err(FailureCause::Panicked),
            Ok(Ok(Err(e))) => Err(FailureCause::Implementation(format!("{:#}", e))),
            Ok(Ok(Ok(()))) => Ok(()),
        }
    }

    fn hook_failure(hook: &'static str, e: anyhow::Error) -> FailureCause {
        FailureCause::Hook {
            hook,
            message: format!("{:#}", e),
        }
    }

    async fn run_start(&self) -> Result<(), FailureCause> {
        let handler = Arc::clone(&self.inner.handler);
        handler
            .before_start()
            .await
            .map_err(|e| Self::hook_failure("before_start", e))?;

        let task_handler = Arc::clone(&handler);
        Self::guarded(self.inner.config.startup_timeout, async move {
            task_handler.start().await
        })
        .await?;

        handler
            .after_start()
            .await
            .map_err(|e| Self::hook_failure("after_start", e))
    }

    async fn run_stop(&self) -> Result<(), FailureCause> {
        let handler = Arc::clone(&self.inner.handler);
        handler
            .before_stop()
            .await
            .map_err(|e| Self::hook_failure("before_stop", e))?;

        let task_handler = Arc::clone(&handler);
        Self::guarded(self.inner.config.shutdown_timeout, async move {
            task_handler.stop().await
        })
        .await?;

        handler
            .after_stop()
            .await
            .map_err(|e| Self::hook_failure("after_stop", e))
    }

    fn spawn_monitor(&self) {
        if !self.inner.config.health_checks_enabled() {
            return;
        }

        let token = CancellationToken::new();
        {
            let mut slot = self.inner.monitor.lock();
            if let Some(previous) = slot.replace(token.clone()) {
                previous.cancel();
            }
        }

        let service = self.clone();
        tokio::spawn(async move {
            service.monitor_loop(token).await;
        });
    }

    fn cancel_monitor(&self) {
        let token = self.inner.monitor.lock().take();
        if let Some(token) = token {
            token.cancel();
        }
    }

    async fn probe(&self, limit: Duration) -> HealthOutcome {
        let handler = Arc::clone(&self.inner.handler);
        match tokio::time::timeout(limit, handler.health_check()).await {
            Err(_) => HealthOutcome::TimedOut,
            Ok(Ok(true)) => HealthOutcome::Passed,
            Ok(Ok(false)) => HealthOutcome::Failed,
            Ok(Err(e)) => HealthOutcome::Errored(format!("{:#}", e)),
        }
    }

    async fn monitor_loop(self, token: CancellationToken) {
        let interval = self.inner.config.health_check_interval;
        log::debug!("Health monitor started for {}", self.name());

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            // Maintenance and transitional states are not checked.
            if self.state() != ServiceState::Running {
                continue;
            }

            let outcome = self.probe(interval).await;
            let healthy = outcome.is_healthy();
            self.inner.health.lock().record(outcome.clone());

            if healthy || token.is_cancelled() {
                continue;
            }

            if !self.handle_unhealthy(outcome).await || token.is_cancelled() {
                break;
            }
        }

        log::debug!("Health monitor stopped for {}", self.name());
    }

    /// Returns whether the monitor should keep running.
    async fn handle_unhealthy(&self, outcome: HealthOutcome) -> bool {
        let name = self.name().to_string();
        let reason = match &outcome {
            HealthOutcome::Failed => "health check failed".to_string(),
            HealthOutcome::TimedOut => "health check timed out".to_string(),
            HealthOutcome::Errored(e) => format!("health check errored: {}", e),
            HealthOutcome::Passed => return true,
        };
        log::warn!("Service {} unhealthy: {}", name, reason);

        if !self.auto_restart_enabled() {
            self.mark_unhealthy(&reason);
            self.inner.events.publish(BackendEvent::ServiceError {
                name,
                error: reason,
            });
            return false;
        }

        let restarts = self.inner.metrics.lock().restart_count;
        if restarts >= self.inner.config.max_restart_attempts {
            self.set_auto_restart(false);
            let reason = format!("{} after {} restart(s)", reason, restarts);
            self.mark_unhealthy(&reason);
            log::error!("Service {} failed permanently: {}", name, reason);
            self.inner
                .events
                .publish(BackendEvent::ServiceFailed { name, reason });
            return false;
        }

        match Service::restart(self).await {
            Ok(()) => true,
            Err(e) => {
                log::error!("Auto-restart of {} failed: {}", name, e);
                false
            }
        }
    }

    fn mark_unhealthy(&self, reason: &str) {
        {
            let mut state = self.inner.state.lock();
            if *state == ServiceState::Running {
                if let Err(e) = self.apply(&mut state, LifecycleEvent::HealthCheckFailed) {
                    log::error!("{}", e);
                }
            }
        }
        self.record_error(reason);
    }
}

#[async_trait]
impl Service for ManagedService {
    fn descriptor(&self) -> &ServiceDescriptor {
        &self.inner.descriptor
    }

    async fn start(&self) -> Result<(), ServiceError> {
        let name = self.name().to_string();
        {
            let mut state = self.inner.state.lock();
            match *state {
                ServiceState::Running => {
                    log::warn!("Service {} is already running", name);
                    return Ok(());
                }
                ServiceState::Stopped | ServiceState::Error => {}
                other => {
                    return Err(ServiceError::InvalidState {
                        name,
                        action: "start",
                        state: other,
                    })
                }
            }
            self.apply(&mut state, LifecycleEvent::StartRequested)?;
        }

        log::info!("Starting service {}", name);
        match self.run_start().await {
            Ok(()) => {
                self.transition(LifecycleEvent::Started)?;
                self.inner.metrics.lock().started_at = Some(Utc::now());
                log::info!("Service {} running", name);
                self.inner
                    .events
                    .publish(BackendEvent::ServiceStarted { name });
                self.spawn_monitor();
                Ok(())
            }
            Err(cause) => {
                self.transition(LifecycleEvent::Failed)?;
                self.record_error(&cause.to_string());
                log::error!("Service {} failed to start: {}", name, cause);
                self.inner.events.publish(BackendEvent::ServiceError {
                    name: name.clone(),
                    error: cause.to_string(),
                });
                Err(ServiceError::Startup { name, cause })
            }
        }
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        let name = self.name().to_string();
        {
            let mut state = self.inner.state.lock();
            match *state {
                ServiceState::Stopped => {
                    log::warn!("Service {} is already stopped", name);
                    return Ok(());
                }
                ServiceState::Starting | ServiceState::Stopping => {
                    return Err(ServiceError::InvalidState {
                        name,
                        action: "stop",
                        state: *state,
                    })
                }
                _ => {}
            }
            self.apply(&mut state, LifecycleEvent::StopRequested)?;
        }

        self.cancel_monitor();
        log::info!("Stopping service {}", name);

        match self.run_stop().await {
            Ok(()) => {
                self.transition(LifecycleEvent::Stopped)?;
                {
                    let mut metrics = self.inner.metrics.lock();
                    if let Some(started) = metrics.started_at.take() {
                        metrics.uptime = (Utc::now() - started).to_std().unwrap_or_default();
                    }
                }
                log::info!("Service {} stopped", name);
                self.inner
                    .events
                    .publish(BackendEvent::ServiceStopped { name });
                Ok(())
            }
            Err(cause) => {
                self.transition(LifecycleEvent::Failed)?;
                self.record_error(&cause.to_string());
                log::error!("Service {} failed to stop: {}", name, cause);
                self.inner.events.publish(BackendEvent::ServiceError {
                    name: name.clone(),
                    error: cause.to_string(),
                });
                Err(ServiceError::Shutdown { name, cause })
            }
        }
    }

    async fn restart(&self) -> Result<(), ServiceError> {
        let name = self.name().to_string();
        let restart_count = {
            let mut metrics = self.inner.metrics.lock();
            metrics.restart_count += 1;
            metrics.last_restart = Some(Utc::now());
            metrics.restart_count
        };
        log::info!("Restarting service {} (restart #{})", name, restart_count);

        let result: Result<(), ServiceError> = async {
            self.stop().await?;
            tokio::time::sleep(self.inner.config.restart_delay).await;
            self.start().await
        }
        .await;

        match result {
            Ok(()) => {
                self.inner.events.publish(BackendEvent::ServiceRestarted {
                    name,
                    restart_count,
                });
                Ok(())
            }
            Err(e) => Err(ServiceError::Restart {
                name,
                reason: e.to_string(),
            }),
        }
    }

    fn state(&self) -> ServiceState {
        *self.inner.state.lock()
    }

    fn metrics(&self) -> ServiceMetrics {
        let mut metrics = self.inner.metrics.lock().clone();
        if let Some(started) = metrics.started_at {
            metrics.uptime = (Utc::now() - started).to_std().unwrap_or_default();
        }

        metrics.custom.extend(self.inner.handler.metrics());
        let health = self.inner.health.lock();
        metrics.custom.insert(
            "health_consecutive_failures".to_string(),
            health.consecutive_failures as f64,
        );
        metrics
            .custom
            .insert("health_pass_rate".to_string(), health.recent_pass_rate(10));
        metrics
    }

    async fn health_check(&self) -> anyhow::Result<bool> {
        if !self.state().is_active() {
            return Ok(false);
        }
        self.inner.handler.health_check().await
    }

    async fn enter_maintenance(&self) -> Result<(), ServiceError> {
        let mut state = self.inner.state.lock();
        if *state != ServiceState::Running {
            return Err(ServiceError::InvalidState {
                name: self.name().to_string(),
                action: "enter maintenance",
                state: *state,
            });
        }
        self.apply(&mut state, LifecycleEvent::EnterMaintenance)?;
        log::info!("Service {} entered maintenance", self.name());
        Ok(())
    }

    async fn exit_maintenance(&self) -> Result<(), ServiceError> {
        let mut state = self.inner.state.lock();
        if *state != ServiceState::Maintenance {
            return Err(ServiceError::InvalidState {
                name: self.name().to_string(),
                action: "exit maintenance",
                state: *state,
            });
        }
        self.apply(&mut state, LifecycleEvent::ExitMaintenance)?;
        log::info!("Service {} left maintenance", self.name());
        Ok(())
    }
}
