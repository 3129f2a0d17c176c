//! Task assignment and resource arbitration among agents.
//!
//! All coordination state lives behind one mutex and is only touched by the
//! synchronous sections of the operations below; the lock is never held
//! across an await. A blocked `acquire_resource` waits on a oneshot channel
//! that `release_resource` (or maintenance) completes, so grants are handed
//! over directly to the head of the FIFO queue.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use super::deadlock::WaitForGraph;
use super::mailbox::{Mailbox, MessageEnvelope};
use super::scheduling::{AgentLoad, LeastLoaded, RoundRobin, SchedulingPolicy};
use crate::config::CoordinationConfig;
use crate::error::{ConfigError, CoordinationError};
use crate::events::{BackendEvent, EventBus};
use crate::types::{
    AgentId, ConflictReport, ConflictType, ResourceId, ResourceSnapshot, Task, TaskId,
    TaskStatus, WaiterSnapshot,
};

const CONFLICT_HISTORY_LIMIT: usize = 1000;

type Grant = Result<(), CoordinationError>;

struct Waiter {
    ticket: u64,
    agent_id: AgentId,
    requested_at: DateTime<Utc>,
    deadline: Instant,
    deadline_at: DateTime<Utc>,
    notify: oneshot::Sender<Grant>,
}

#[derive(Default)]
struct ResourceEntry {
    holder: Option<AgentId>,
    acquired_at: Option<DateTime<Utc>>,
    queue: VecDeque<Waiter>,
}

impl ResourceEntry {
    fn is_idle(&self) -> bool {
        self.holder.is_none() && self.queue.is_empty()
    }

    /// Agents a newcomer to the queue would have to wait for.
    fn blockers(&self) -> Vec<AgentId> {
        self.holder
            .iter()
            .cloned()
            .chain(
                self.queue
                    .iter()
                    .filter(|w| !w.notify.is_closed())
                    .map(|w| w.agent_id.clone()),
            )
            .collect()
    }
}

#[derive(Default)]
struct CoordinationState {
    agents: Vec<AgentId>,
    tasks: HashMap<TaskId, Task>,
    resources: HashMap<ResourceId, ResourceEntry>,
    conflicts: VecDeque<ConflictReport>,
    next_ticket: u64,
}

impl CoordinationState {
    fn has_agent(&self, agent_id: &str) -> bool {
        self.agents.iter().any(|a| a == agent_id)
    }

    fn ensure_agent(&self, agent_id: &str) -> Result<(), CoordinationError> {
        if self.has_agent(agent_id) {
            Ok(())
        } else {
            Err(CoordinationError::UnknownAgent(agent_id.to_string()))
        }
    }

    fn record_conflict(&mut self, report: ConflictReport) {
        self.conflicts.push_back(report);
        if self.conflicts.len() > CONFLICT_HISTORY_LIMIT {
            self.conflicts.pop_front();
        }
    }

    /// Each queued agent waits on the holder and on everyone queued ahead of
    /// it. Waits whose caller has gone away are left out.
    fn wait_for_graph(&self) -> WaitForGraph {
        let mut graph = WaitForGraph::new();
        for entry in self.resources.values() {
            let mut ahead: Vec<&AgentId> = entry.holder.iter().collect();
            for waiter in entry.queue.iter().filter(|w| !w.notify.is_closed()) {
                for blocker in &ahead {
                    graph.add_edge(waiter.agent_id.clone(), (*blocker).clone());
                }
                ahead.push(&waiter.agent_id);
            }
        }
        graph
    }
}

enum Acquisition {
    Granted,
    Waiting {
        ticket: u64,
        receiver: oneshot::Receiver<Grant>,
    },
}

/// A queued acquisition. If the caller stops waiting before it settles, the
/// entry leaves the queue and a grant that already landed is handed back.
struct PendingWait<'a> {
    engine: &'a CoordinationEngine,
    resource_id: &'a str,
    agent_id: &'a str,
    ticket: u64,
    receiver: oneshot::Receiver<Grant>,
    settled: bool,
}

impl Drop for PendingWait<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if self.engine.withdraw_waiter(self.resource_id, self.ticket) {
            log::debug!(
                "Agent {} abandoned its wait for resource {}",
                self.agent_id,
                self.resource_id
            );
            return;
        }
        if let Ok(Ok(())) = self.receiver.try_recv() {
            log::debug!(
                "Returning resource {} granted to departed waiter {}",
                self.resource_id,
                self.agent_id
            );
            if let Err(e) = self.engine.release_resource(self.resource_id, self.agent_id) {
                log::warn!("Could not return resource {}: {}", self.resource_id, e);
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaintenanceReport {
    /// Waiters dropped because their deadline passed, their agent was torn
    /// down, or the caller stopped waiting.
    pub expired_waiters: usize,
    pub released_resources: Vec<(ResourceId, AgentId)>,
    pub cancelled_tasks: Vec<TaskId>,
    pub pruned_resources: usize,
}

impl MaintenanceReport {
    pub fn is_empty(&self) -> bool {
        self.expired_waiters == 0
            && self.released_resources.is_empty()
            && self.cancelled_tasks.is_empty()
            && self.pruned_resources == 0
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinationStats {
    pub agents: usize,
    pub live_tasks: usize,
    pub held_resources: usize,
    pub waiting_agents: usize,
    pub conflicts: usize,
}

pub struct CoordinationEngine {
    config: CoordinationConfig,
    events: EventBus,
    state: Mutex<CoordinationState>,
    advanced_scheduling: AtomicBool,
    basic_policy: RoundRobin,
    advanced_policy: RwLock<Arc<dyn SchedulingPolicy>>,
}

impl CoordinationEngine {
    pub fn new(config: CoordinationConfig, events: EventBus) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            events,
            state: Mutex::new(CoordinationState::default()),
            advanced_scheduling: AtomicBool::new(false),
            basic_policy: RoundRobin::new(),
            advanced_policy: RwLock::new(Arc::new(LeastLoaded)),
        })
    }

    pub fn config(&self) -> &CoordinationConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn emit(&self, events: Vec<BackendEvent>) {
        for event in events {
            self.events.publish(event);
        }
    }

    // ---- agents ----

    pub fn register_agent(&self, agent_id: impl Into<AgentId>) -> Result<(), CoordinationError> {
        let agent_id = agent_id.into();
        let mut state = self.state.lock();
        if state.has_agent(&agent_id) {
            return Err(CoordinationError::DuplicateAgent(agent_id));
        }
        log::info!("Registered agent {}", agent_id);
        state.agents.push(agent_id);
        Ok(())
    }

    /// Removes the agent from the registry. Tasks, resources and waits it
    /// leaves behind are swept by [`perform_maintenance`](Self::perform_maintenance).
    pub fn unregister_agent(&self, agent_id: &str) -> Result<(), CoordinationError> {
        let mut state = self.state.lock();
        state.ensure_agent(agent_id)?;
        state.agents.retain(|a| a != agent_id);
        log::info!("Unregistered agent {}", agent_id);
        Ok(())
    }

    pub fn agents(&self) -> Vec<AgentId> {
        self.state.lock().agents.clone()
    }

    pub fn is_registered(&self, agent_id: &str) -> bool {
        self.state.lock().has_agent(agent_id)
    }

    // ---- tasks ----

    /// Records `task` against `agent_id`. Re-assigning a live task to the
    /// same agent is a no-op; to another agent it is a conflict.
    pub fn assign_task(&self, task: Task, agent_id: &str) -> Result<Task, CoordinationError> {
        let mut events = Vec::new();
        let result = {
            let mut state = self.state.lock();
            self.assign_locked(&mut state, task, agent_id, &mut events)
        };
        self.emit(events);
        result
    }

    fn assign_locked(
        &self,
        state: &mut CoordinationState,
        mut task: Task,
        agent_id: &str,
        events: &mut Vec<BackendEvent>,
    ) -> Result<Task, CoordinationError> {
        state.ensure_agent(agent_id)?;

        let current = state
            .tasks
            .get(&task.id)
            .filter(|existing| existing.is_live())
            .and_then(|existing| existing.agent_id.clone());
        match current {
            Some(owner) if owner == agent_id => {
                if let Some(existing) = state.tasks.get(&task.id) {
                    return Ok(existing.clone());
                }
            }
            Some(owner) => {
                log::warn!(
                    "Task {} requested by {} is already assigned to {}",
                    task.id,
                    agent_id,
                    owner
                );
                let report = ConflictReport::new(
                    ConflictType::Task,
                    task.id.clone(),
                    [owner.clone(), agent_id.to_string()],
                );
                state.record_conflict(report.clone());
                events.push(BackendEvent::ConflictReported { report });
                return Err(CoordinationError::TaskConflict {
                    task_id: task.id,
                    agent_id: owner,
                });
            }
            None => {}
        }

        task.agent_id = Some(agent_id.to_string());
        task.status = TaskStatus::Assigned;
        task.cancellation_reason = None;
        task.updated_at = Utc::now();

        log::debug!("Assigned task {} to {}", task.id, agent_id);
        events.push(BackendEvent::TaskAssigned {
            task_id: task.id.clone(),
            agent_id: agent_id.to_string(),
        });
        state.tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    /// Cancels a live task. Returns whether anything changed; unknown and
    /// already-finished tasks are left alone.
    pub fn cancel_task(&self, task_id: &str, reason: Option<String>) -> bool {
        let cancelled = {
            let mut state = self.state.lock();
            match state.tasks.get_mut(task_id) {
                Some(task) if task.is_live() => {
                    task.status = TaskStatus::Cancelled;
                    task.cancellation_reason = reason.clone();
                    task.updated_at = Utc::now();
                    true
                }
                _ => false,
            }
        };

        if cancelled {
            log::debug!("Cancelled task {}", task_id);
            self.events.publish(BackendEvent::TaskCancelled {
                task_id: task_id.to_string(),
                reason,
            });
        }
        cancelled
    }

    pub fn complete_task(&self, task_id: &str, agent_id: &str) -> Result<(), CoordinationError> {
        {
            let mut state = self.state.lock();
            let task = state
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| CoordinationError::UnknownTask(task_id.to_string()))?;
            if !task.is_live() || !task.is_assigned_to(agent_id) {
                return Err(CoordinationError::TaskNotAssigned {
                    task_id: task_id.to_string(),
                    agent_id: agent_id.to_string(),
                });
            }
            task.status = TaskStatus::Completed;
            task.updated_at = Utc::now();
        }

        self.events.publish(BackendEvent::TaskCompleted {
            task_id: task_id.to_string(),
            agent_id: agent_id.to_string(),
        });
        Ok(())
    }

    pub fn get_task(&self, task_id: &str) -> Option<Task> {
        self.state.lock().tasks.get(task_id).cloned()
    }

    /// Every task ever assigned to the agent, oldest first.
    pub fn tasks_for_agent(&self, agent_id: &str) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .state
            .lock()
            .tasks
            .values()
            .filter(|t| t.is_assigned_to(agent_id))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        tasks
    }

    // ---- scheduling ----

    pub fn enable_advanced_scheduling(&self) {
        self.advanced_scheduling.store(true, Ordering::SeqCst);
        log::info!(
            "Advanced scheduling enabled ({})",
            self.advanced_policy.read().name()
        );
    }

    pub fn disable_advanced_scheduling(&self) {
        self.advanced_scheduling.store(false, Ordering::SeqCst);
        log::info!("Advanced scheduling disabled");
    }

    pub fn is_advanced_scheduling_enabled(&self) -> bool {
        self.advanced_scheduling.load(Ordering::SeqCst)
    }

    /// Replaces the policy used while advanced scheduling is enabled.
    pub fn set_scheduling_policy(&self, policy: Arc<dyn SchedulingPolicy>) {
        log::info!("Scheduling policy set to {}", policy.name());
        *self.advanced_policy.write() = policy;
    }

    /// Picks an agent with the active policy and assigns `task` to it.
    pub fn schedule_task(&self, task: Task) -> Result<Task, CoordinationError> {
        let advanced = if self.is_advanced_scheduling_enabled() {
            Some(Arc::clone(&*self.advanced_policy.read()))
        } else {
            None
        };
        let policy: &dyn SchedulingPolicy = match &advanced {
            Some(policy) => policy.as_ref(),
            None => &self.basic_policy,
        };

        let mut events = Vec::new();
        let result = {
            let mut state = self.state.lock();
            let candidates: Vec<AgentLoad> = state
                .agents
                .iter()
                .map(|agent_id| AgentLoad {
                    agent_id: agent_id.clone(),
                    live_tasks: state
                        .tasks
                        .values()
                        .filter(|t| t.is_live() && t.is_assigned_to(agent_id))
                        .count(),
                })
                .collect();

            if candidates.is_empty() {
                Err(CoordinationError::NoAgentAvailable(task.id.clone()))
            } else {
                match policy.select(&task, &candidates) {
                    Some(agent_id) => self.assign_locked(&mut state, task, &agent_id, &mut events),
                    None => Err(CoordinationError::NoAgentAvailable(task.id.clone())),
                }
            }
        };
        self.emit(events);
        result
    }

    // ---- resources ----

    /// Grants `resource_id` to `agent_id`, waiting in FIFO order behind other
    /// requesters for at most the configured resource timeout. A wait that
    /// would close a cycle in the wait-for graph is rejected immediately.
    pub async fn acquire_resource(
        &self,
        resource_id: &str,
        agent_id: &str,
    ) -> Result<(), CoordinationError> {
        let mut events = Vec::new();
        let acquisition = {
            let mut state = self.state.lock();
            self.try_acquire(&mut state, resource_id, agent_id, &mut events)
        };
        self.emit(events);

        let (ticket, receiver) = match acquisition? {
            Acquisition::Granted => return Ok(()),
            Acquisition::Waiting { ticket, receiver } => (ticket, receiver),
        };

        let mut wait = PendingWait {
            engine: self,
            resource_id,
            agent_id,
            ticket,
            receiver,
            settled: false,
        };
        let outcome = tokio::time::timeout(self.config.resource_timeout, &mut wait.receiver).await;
        let result = match outcome {
            Ok(Ok(grant)) => grant,
            Ok(Err(_)) => Err(CoordinationError::WaitAborted {
                resource_id: resource_id.to_string(),
                agent_id: agent_id.to_string(),
                reason: "wait queue entry dropped".to_string(),
            }),
            Err(_) if self.withdraw_waiter(resource_id, ticket) => {
                log::warn!(
                    "Agent {} timed out waiting for resource {}",
                    agent_id,
                    resource_id
                );
                Err(self.timeout_error(resource_id, agent_id))
            }
            // Granted or failed between the timer firing and the lock.
            Err(_) => wait
                .receiver
                .try_recv()
                .unwrap_or_else(|_| Err(self.timeout_error(resource_id, agent_id))),
        };
        wait.settled = true;
        result
    }

    /// Removes a queued wait. Returns false if it had already left the queue.
    fn withdraw_waiter(&self, resource_id: &str, ticket: u64) -> bool {
        let mut state = self.state.lock();
        let (removed, idle) = match state.resources.get_mut(resource_id) {
            Some(entry) => {
                let removed = match entry.queue.iter().position(|w| w.ticket == ticket) {
                    Some(index) => entry.queue.remove(index).is_some(),
                    None => false,
                };
                (removed, entry.is_idle())
            }
            None => (false, false),
        };
        if idle {
            state.resources.remove(resource_id);
        }
        removed
    }

    fn timeout_error(&self, resource_id: &str, agent_id: &str) -> CoordinationError {
        CoordinationError::Timeout {
            resource_id: resource_id.to_string(),
            agent_id: agent_id.to_string(),
            timeout: self.config.resource_timeout,
        }
    }

    fn try_acquire(
        &self,
        state: &mut CoordinationState,
        resource_id: &str,
        agent_id: &str,
        events: &mut Vec<BackendEvent>,
    ) -> Result<Acquisition, CoordinationError> {
        state.ensure_agent(agent_id)?;

        let holder = state
            .resources
            .get(resource_id)
            .and_then(|entry| entry.holder.clone());

        let holder = match holder {
            None => {
                let entry = state.resources.entry(resource_id.to_string()).or_default();
                entry.holder = Some(agent_id.to_string());
                entry.acquired_at = Some(Utc::now());
                log::debug!("Agent {} acquired resource {}", agent_id, resource_id);
                events.push(BackendEvent::ResourceAcquired {
                    resource_id: resource_id.to_string(),
                    agent_id: agent_id.to_string(),
                });
                return Ok(Acquisition::Granted);
            }
            Some(holder) if holder == agent_id => return Ok(Acquisition::Granted),
            Some(holder) => holder,
        };

        let already_waiting = state
            .resources
            .get(resource_id)
            .map(|entry| entry.queue.iter().any(|w| w.agent_id == agent_id))
            .unwrap_or(false);
        if already_waiting {
            return Err(CoordinationError::AlreadyWaiting {
                resource_id: resource_id.to_string(),
                agent_id: agent_id.to_string(),
            });
        }

        if self.config.deadlock_detection {
            let blockers = state
                .resources
                .get(resource_id)
                .map(ResourceEntry::blockers)
                .unwrap_or_default();
            let cycle = state
                .wait_for_graph()
                .cycle_if_waiting_on(agent_id, &blockers);
            if let Some(cycle) = cycle {
                log::warn!(
                    "Rejected wait by {} for {}: would deadlock ({})",
                    agent_id,
                    resource_id,
                    cycle.join(" -> ")
                );
                let report =
                    ConflictReport::new(ConflictType::Resource, resource_id, cycle.iter().cloned());
                state.record_conflict(report.clone());
                events.push(BackendEvent::DeadlockPrevented {
                    resource_id: resource_id.to_string(),
                    agent_id: agent_id.to_string(),
                    cycle: cycle.clone(),
                });
                events.push(BackendEvent::ConflictReported { report });
                return Err(CoordinationError::Deadlock {
                    resource_id: resource_id.to_string(),
                    agent_id: agent_id.to_string(),
                    cycle,
                });
            }
        }

        let report = ConflictReport::new(
            ConflictType::Resource,
            resource_id,
            [holder.clone(), agent_id.to_string()],
        );
        state.record_conflict(report.clone());
        events.push(BackendEvent::ConflictReported { report });

        let ticket = state.next_ticket;
        state.next_ticket += 1;

        let (notify, receiver) = oneshot::channel();
        let now = Utc::now();
        let timeout = self.config.resource_timeout;
        let deadline_at = chrono::Duration::from_std(timeout)
            .map(|timeout| now + timeout)
            .unwrap_or(now);
        let waiter = Waiter {
            ticket,
            agent_id: agent_id.to_string(),
            requested_at: now,
            deadline: Instant::now() + timeout,
            deadline_at,
            notify,
        };
        if let Some(entry) = state.resources.get_mut(resource_id) {
            entry.queue.push_back(waiter);
        }

        log::debug!(
            "Agent {} waiting for resource {} held by {}",
            agent_id,
            resource_id,
            holder
        );
        Ok(Acquisition::Waiting { ticket, receiver })
    }

    /// Like [`acquire_resource`](Self::acquire_resource), retrying timed-out
    /// waits up to `max_retries` times. Other errors are returned at once.
    pub async fn acquire_resource_with_retry(
        &self,
        resource_id: &str,
        agent_id: &str,
    ) -> Result<(), CoordinationError> {
        let mut retries = 0;
        loop {
            match self.acquire_resource(resource_id, agent_id).await {
                Err(e) if e.is_timeout() && retries < self.config.max_retries => {
                    retries += 1;
                    log::debug!(
                        "Retrying acquisition of {} by {} ({}/{})",
                        resource_id,
                        agent_id,
                        retries,
                        self.config.max_retries
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                result => return result,
            }
        }
    }

    /// Releases a held resource and hands it to the head of its wait queue.
    pub fn release_resource(
        &self,
        resource_id: &str,
        agent_id: &str,
    ) -> Result<(), CoordinationError> {
        let mut events = Vec::new();
        let result = {
            let mut state = self.state.lock();
            let CoordinationState {
                agents, resources, ..
            } = &mut *state;

            let holder = resources.get(resource_id).and_then(|e| e.holder.clone());
            if holder.as_deref() != Some(agent_id) {
                Err(CoordinationError::NotHolder {
                    resource_id: resource_id.to_string(),
                    agent_id: agent_id.to_string(),
                    holder,
                })
            } else {
                let idle = match resources.get_mut(resource_id) {
                    Some(entry) => {
                        entry.holder = None;
                        entry.acquired_at = None;
                        log::debug!("Agent {} released resource {}", agent_id, resource_id);
                        events.push(BackendEvent::ResourceReleased {
                            resource_id: resource_id.to_string(),
                            agent_id: agent_id.to_string(),
                        });
                        self.grant_next(resource_id, entry, agents, &mut events);
                        entry.is_idle()
                    }
                    None => false,
                };
                if idle {
                    resources.remove(resource_id);
                }
                Ok(())
            }
        };
        self.emit(events);
        result
    }

    /// Hands an unheld resource to the first live waiter. Returns how many
    /// stale waiters were skipped.
    fn grant_next(
        &self,
        resource_id: &str,
        entry: &mut ResourceEntry,
        agents: &[AgentId],
        events: &mut Vec<BackendEvent>,
    ) -> usize {
        let now = Instant::now();
        let mut skipped = 0;

        while let Some(waiter) = entry.queue.pop_front() {
            if waiter.deadline <= now {
                let _ = waiter
                    .notify
                    .send(Err(self.timeout_error(resource_id, &waiter.agent_id)));
                skipped += 1;
                continue;
            }
            if !agents.contains(&waiter.agent_id) {
                let _ = waiter.notify.send(Err(CoordinationError::WaitAborted {
                    resource_id: resource_id.to_string(),
                    agent_id: waiter.agent_id.clone(),
                    reason: "agent unregistered".to_string(),
                }));
                skipped += 1;
                continue;
            }

            entry.holder = Some(waiter.agent_id.clone());
            entry.acquired_at = Some(Utc::now());
            if waiter.notify.send(Ok(())).is_err() {
                // Caller stopped waiting.
                entry.holder = None;
                entry.acquired_at = None;
                skipped += 1;
                continue;
            }

            log::debug!(
                "Resource {} handed to waiting agent {}",
                resource_id,
                waiter.agent_id
            );
            events.push(BackendEvent::ResourceAcquired {
                resource_id: resource_id.to_string(),
                agent_id: waiter.agent_id,
            });
            break;
        }

        skipped
    }

    pub fn resource_holder(&self, resource_id: &str) -> Option<AgentId> {
        self.state
            .lock()
            .resources
            .get(resource_id)
            .and_then(|e| e.holder.clone())
    }

    /// Agents queued for `resource_id`, in grant order.
    pub fn waiters(&self, resource_id: &str) -> Vec<AgentId> {
        self.state
            .lock()
            .resources
            .get(resource_id)
            .map(|e| e.queue.iter().map(|w| w.agent_id.clone()).collect())
            .unwrap_or_default()
    }

    pub fn resource(&self, resource_id: &str) -> Option<ResourceSnapshot> {
        let state = self.state.lock();
        state
            .resources
            .get(resource_id)
            .map(|entry| Self::snapshot(resource_id, entry))
    }

    pub fn resources(&self) -> Vec<ResourceSnapshot> {
        let state = self.state.lock();
        let mut snapshots: Vec<_> = state
            .resources
            .iter()
            .map(|(id, entry)| Self::snapshot(id, entry))
            .collect();
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        snapshots
    }

    fn snapshot(resource_id: &str, entry: &ResourceEntry) -> ResourceSnapshot {
        ResourceSnapshot {
            id: resource_id.to_string(),
            holder: entry.holder.clone(),
            acquired_at: entry.acquired_at,
            waiters: entry
                .queue
                .iter()
                .map(|w| WaiterSnapshot {
                    agent_id: w.agent_id.clone(),
                    requested_at: w.requested_at,
                    deadline: w.deadline_at,
                })
                .collect(),
        }
    }

    // ---- conflicts and messaging ----

    /// Records a conflict for observability. Never blocks or rejects anything.
    pub fn report_conflict<I, A>(
        &self,
        conflict_type: ConflictType,
        target_id: &str,
        agents: I,
    ) -> ConflictReport
    where
        I: IntoIterator<Item = A>,
        A: Into<AgentId>,
    {
        let report = ConflictReport::new(conflict_type, target_id, agents);
        log::info!(
            "Conflict on {} {}: {:?}",
            conflict_type.as_str(),
            target_id,
            report.agents
        );
        self.state.lock().record_conflict(report.clone());
        self.events.publish(BackendEvent::ConflictReported {
            report: report.clone(),
        });
        report
    }

    pub fn conflicts(&self) -> Vec<ConflictReport> {
        self.state.lock().conflicts.iter().cloned().collect()
    }

    /// Relays a message over the event bus. Delivery is best-effort; messages
    /// from one sender to one recipient arrive in send order.
    pub fn send_message(
        &self,
        from: &str,
        to: &str,
        payload: serde_json::Value,
    ) -> Result<Uuid, CoordinationError> {
        {
            let state = self.state.lock();
            state.ensure_agent(from)?;
            state.ensure_agent(to)?;
        }

        let envelope = MessageEnvelope::new(from, to, payload, self.config.message_timeout);
        let id = envelope.id;
        let delivered = self.events.publish(BackendEvent::AgentMessage { envelope });
        log::trace!("Message {} from {} to {} ({} subscriber(s))", id, from, to, delivered);
        Ok(id)
    }

    pub fn mailbox(&self, agent_id: &str) -> Result<Mailbox, CoordinationError> {
        self.state.lock().ensure_agent(agent_id)?;
        Ok(Mailbox::new(agent_id.to_string(), self.events.subscribe()))
    }

    // ---- maintenance ----

    /// Sweeps expired and orphaned waits, releases resources held by
    /// unregistered agents, cancels their live tasks and prunes idle entries.
    pub fn perform_maintenance(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();
        let mut events = Vec::new();

        {
            let mut state = self.state.lock();
            let CoordinationState {
                agents,
                tasks,
                resources,
                ..
            } = &mut *state;
            let now = Instant::now();

            let mut ids: Vec<ResourceId> = resources.keys().cloned().collect();
            ids.sort();
            for resource_id in &ids {
                let Some(entry) = resources.get_mut(resource_id) else {
                    continue;
                };

                let mut kept = VecDeque::with_capacity(entry.queue.len());
                for waiter in entry.queue.drain(..) {
                    if waiter.deadline <= now {
                        let _ = waiter
                            .notify
                            .send(Err(self.timeout_error(resource_id, &waiter.agent_id)));
                        report.expired_waiters += 1;
                    } else if !agents.contains(&waiter.agent_id) {
                        let _ = waiter.notify.send(Err(CoordinationError::WaitAborted {
                            resource_id: resource_id.clone(),
                            agent_id: waiter.agent_id.clone(),
                            reason: "agent unregistered".to_string(),
                        }));
                        report.expired_waiters += 1;
                    } else if waiter.notify.is_closed() {
                        report.expired_waiters += 1;
                    } else {
                        kept.push_back(waiter);
                    }
                }
                entry.queue = kept;

                if let Some(holder) = entry.holder.clone() {
                    if !agents.contains(&holder) {
                        log::info!(
                            "Releasing resource {} held by unregistered agent {}",
                            resource_id,
                            holder
                        );
                        entry.holder = None;
                        entry.acquired_at = None;
                        events.push(BackendEvent::ResourceReleased {
                            resource_id: resource_id.clone(),
                            agent_id: holder.clone(),
                        });
                        report.released_resources.push((resource_id.clone(), holder));
                    }
                }

                if entry.holder.is_none() && !entry.queue.is_empty() {
                    report.expired_waiters +=
                        self.grant_next(resource_id, entry, agents, &mut events);
                }
            }

            let before = resources.len();
            resources.retain(|_, entry| !entry.is_idle());
            report.pruned_resources = before - resources.len();

            for task in tasks.values_mut() {
                let orphaned = task.is_live()
                    && task
                        .agent_id
                        .as_ref()
                        .map(|a| !agents.contains(a))
                        .unwrap_or(false);
                if orphaned {
                    task.status = TaskStatus::Cancelled;
                    task.cancellation_reason = Some("agent unregistered".to_string());
                    task.updated_at = Utc::now();
                    events.push(BackendEvent::TaskCancelled {
                        task_id: task.id.clone(),
                        reason: task.cancellation_reason.clone(),
                    });
                    report.cancelled_tasks.push(task.id.clone());
                }
            }
            report.cancelled_tasks.sort();
        }

        self.emit(events);
        if !report.is_empty() {
            log::info!(
                "Maintenance: {} expired waiter(s), {} released, {} cancelled, {} pruned",
                report.expired_waiters,
                report.released_resources.len(),
                report.cancelled_tasks.len(),
                report.pruned_resources
            );
        }
        report
    }

    pub fn stats(&self) -> CoordinationStats {
        let state = self.state.lock();
        CoordinationStats {
            agents: state.agents.len(),
            live_tasks: state.tasks.values().filter(|t| t.is_live()).count(),
            held_resources: state
                .resources
                .values()
                .filter(|e| e.holder.is_some())
                .count(),
            waiting_agents: state.resources.values().map(|e| e.queue.len()).sum(),
            conflicts: state.conflicts.len(),
        }
    }
}
