//! FSM↔Messaging Bridge (component G, §4.6).
//!
//! Translates FSM events into addressed messages and maintains a
//! coordination set and task↔channel map that can always be rebuilt from
//! the FSM store (§3 "Lifecycle and ownership"). Grounded on
//! `original_source`'s `FSMCommunicationBridge`: the same
//! coordinator/manager substring routing, task-channel naming, and
//! progress-indicator calculation, re-expressed as synchronous event
//! handling instead of a polling thread (§9 design note: "FSM emits
//! immutable events; Bridge consumes and enqueues messages").
//!
//! Errors here are counted and logged, never propagated back into the FSM
//! (§4.6, §7 "Bridge/workflow internal errors").

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::agent_registry::AgentRegistry;
use crate::dispatcher::Dispatcher;
use crate::domain_types::{AgentId, Priority, TaskId};
use crate::fsm::store::{Task, TaskState, TaskStore};
use crate::message::{Message, MessageKind};

/// An FSM mutation the Bridge should translate into messages.
///
/// Callers (the FSM Engine's caller, typically the Workflow Orchestrator
/// or the CLI) emit one of these after each successful mutation; the
/// Bridge never reaches back into the FSM to discover what happened.
#[derive(Debug, Clone)]
pub enum FsmEvent {
    /// A new task was created.
    TaskCreated(Task),
    /// A task was claimed.
    Claimed(Task),
    /// A task was started.
    Started(Task),
    /// A task was blocked.
    Blocked(Task),
    /// A task entered or returned to review.
    Review(Task),
    /// A task was completed.
    Completed(Task),
}

/// Progress indicators embedded in `status_update` bodies (§4.10).
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProgressIndicators {
    /// Deterministic function of state: `new=0, blocked=25,
    /// in_progress=50, review=75, completed=100`.
    pub state_progress: u8,
    /// Seconds elapsed since `created_at`.
    pub time_elapsed_secs: i64,
    /// Length of the evidence log.
    pub evidence_count: usize,
}

impl ProgressIndicators {
    /// Computes indicators for `task` as of `now`.
    #[must_use]
    pub fn for_task(task: &Task, now: DateTime<Utc>) -> Self {
        let state_progress = match task.state {
            TaskState::New => 0,
            TaskState::Blocked => 25,
            TaskState::InProgress => 50,
            TaskState::Review => 75,
            TaskState::Completed | TaskState::Cancelled | TaskState::Failed => 100,
            TaskState::Claimed => 0,
        };
        Self {
            state_progress,
            time_elapsed_secs: (now - task.created_at).num_seconds(),
            evidence_count: task.evidence.len(),
        }
    }
}

/// Event-to-message translator and coordination cache (§4.6).
pub struct Bridge {
    dispatcher: Arc<Dispatcher>,
    registry: Arc<AgentRegistry>,
    store: Arc<TaskStore>,
    coordinated_agents: DashMap<AgentId, ()>,
    task_channels: DashMap<TaskId, String>,
    last_communication: DashMap<TaskId, DateTime<Utc>>,
    status_update_interval: chrono::Duration,
    error_count: AtomicU64,
    running: AtomicBool,
}

impl Bridge {
    /// Builds a bridge over the given dispatcher, registry, and (read-only)
    /// task store.
    #[must_use]
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        registry: Arc<AgentRegistry>,
        store: Arc<TaskStore>,
        status_update_interval_secs: u64,
    ) -> Self {
        Self {
            dispatcher,
            registry,
            store,
            coordinated_agents: DashMap::new(),
            task_channels: DashMap::new(),
            last_communication: DashMap::new(),
            status_update_interval: chrono::Duration::seconds(
                i64::try_from(status_update_interval_secs).unwrap_or(i64::MAX),
            ),
            error_count: AtomicU64::new(0),
            running: AtomicBool::new(false),
        }
    }

    /// Returns the logical channel name for `task_id`, creating one on
    /// first use (§4.6 "task_channel").
    pub fn task_channel(&self, task_id: &TaskId) -> String {
        self.task_channels
            .entry(task_id.clone())
            .or_insert_with(|| format!("task_{task_id}"))
            .clone()
    }

    /// Current coordination set: agents owning at least one non-terminal
    /// task, as tracked incrementally by [`Self::handle`].
    #[must_use]
    pub fn coordinated_agents(&self) -> HashSet<AgentId> {
        self.coordinated_agents
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Recomputes the coordination set from scratch against the live FSM
    /// store (§8 property 10, §3 "can be rebuilt from E at any time").
    ///
    /// # Errors
    ///
    /// Returns a [`crate::persistence::PersistenceError`] if the store
    /// cannot be scanned.
    pub async fn reconcile(&self) -> Result<(), crate::persistence::PersistenceError> {
        let tasks = self
            .store
            .list(&crate::fsm::store::TaskFilter::default())
            .await?;

        self.coordinated_agents.clear();
        for task in tasks.iter().filter(|t| !t.state.is_terminal()) {
            if let Some(owner) = &task.owner {
                self.coordinated_agents.insert(owner.clone(), ());
            }
        }
        Ok(())
    }

    fn note_owner_coordinated(&self, task: &Task) {
        if !task.state.is_terminal()
            && let Some(owner) = &task.owner
        {
            self.coordinated_agents.insert(owner.clone(), ());
        }
    }

    fn note_task_terminal(&self, task: &Task) {
        if task.state.is_terminal()
            && let Some(owner) = &task.owner
        {
            self.coordinated_agents.remove(owner);
        }
    }

    async fn enqueue(&self, message: Message) {
        let task_id_hint = message.body.get("task_id").and_then(|v| v.as_str()).map(String::from);
        match self.dispatcher.enqueue(message).await {
            Ok(_) => {}
            Err(error) => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                warn!(%error, task_id = ?task_id_hint, "bridge failed to enqueue message");
            }
        }
    }

    fn touch(&self, task_id: &TaskId) {
        self.last_communication.insert(task_id.clone(), Utc::now());
    }

    /// Translates `event` into zero or more addressed messages (§4.6).
    ///
    /// Never returns an error: failures are counted via
    /// [`Self::error_count`] and logged, per the Bridge's isolation policy
    /// (§4.6, §7).
    pub async fn handle(&self, event: FsmEvent) {
        let _ = self.task_channel(
            &match &event {
                FsmEvent::TaskCreated(t)
                | FsmEvent::Claimed(t)
                | FsmEvent::Started(t)
                | FsmEvent::Blocked(t)
                | FsmEvent::Review(t)
                | FsmEvent::Completed(t) => t.id.clone(),
            },
        );

        match event {
            FsmEvent::TaskCreated(task) => self.handle_task_created(task).await,
            FsmEvent::Claimed(task) | FsmEvent::Started(task) => {
                self.note_owner_coordinated(&task);
                self.handle_status_update(&task).await;
            }
            FsmEvent::Blocked(task) => {
                self.note_owner_coordinated(&task);
                self.handle_blocked(&task).await;
            }
            FsmEvent::Review(task) => {
                self.note_owner_coordinated(&task);
                self.handle_review(&task).await;
            }
            FsmEvent::Completed(task) => {
                self.note_task_terminal(&task);
                self.handle_status_update(&task).await;
                self.handle_completed(&task).await;
            }
        }
    }

    async fn handle_task_created(&self, task: Task) {
        if let Some(owner) = &task.owner {
            self.send_task_notification(&task, owner.clone()).await;
        }
        if task.contract.is_some() {
            let recipients = self.registry.active_agents();
            if !recipients.is_empty() {
                let body = serde_json::json!({
                    "task_id": task.id,
                    "title": task.title,
                    "notification": "contract_available",
                });
                self.enqueue(Message::new(
                    AgentId::system(),
                    recipients,
                    task.priority,
                    MessageKind::SystemBroadcast,
                    body,
                ))
                .await;
                self.touch(&task.id);
            }
        }
    }

    async fn send_task_notification(&self, task: &Task, owner: AgentId) {
        let body = serde_json::json!({
            "task_id": task.id,
            "title": task.title,
            "state": task.state,
        });
        self.enqueue(Message::new(
            AgentId::system(),
            vec![owner],
            task.priority,
            MessageKind::TaskNotification,
            body,
        ))
        .await;
        self.touch(&task.id);
    }

    async fn handle_status_update(&self, task: &Task) {
        let Some(owner) = task.owner.clone() else {
            return;
        };
        let body = serde_json::json!({
            "task_id": task.id,
            "state": task.state,
            "progress": ProgressIndicators::for_task(task, Utc::now()),
        });
        self.enqueue(Message::new(
            AgentId::system(),
            vec![owner],
            task.priority,
            MessageKind::StatusUpdate,
            body,
        ))
        .await;
        self.touch(&task.id);
    }

    async fn handle_blocked(&self, task: &Task) {
        let coordinated = self.coordinated_agents();
        let mut recipients: Vec<AgentId> = coordinated
            .iter()
            .filter(|agent_id| agent_id.contains_ignore_case("coordinator") || agent_id.contains_ignore_case("manager"))
            .cloned()
            .collect();
        if recipients.is_empty() {
            recipients = coordinated.into_iter().collect();
        }
        if recipients.is_empty() {
            return;
        }

        let body = serde_json::json!({
            "task_id": task.id,
            "reason": "task_blocked",
            "requested_action": "coordinate_resolution",
        });
        self.enqueue(Message::new(
            AgentId::system(),
            recipients,
            Priority::High,
            MessageKind::CoordinationRequest,
            body,
        ))
        .await;
        self.touch(&task.id);
    }

    async fn handle_review(&self, task: &Task) {
        let Some(owner) = task.owner.clone() else {
            return;
        };
        let kind = if task.linked_pr.is_some() {
            MessageKind::PrEvent
        } else {
            MessageKind::StatusUpdate
        };
        let body = serde_json::json!({
            "task_id": task.id,
            "linked_pr": task.linked_pr,
            "state": task.state,
        });
        self.enqueue(Message::new(AgentId::system(), vec![owner], task.priority, kind, body))
            .await;
        self.touch(&task.id);
    }

    async fn handle_completed(&self, task: &Task) {
        let dependents = match self
            .store
            .list(&crate::fsm::store::TaskFilter::default())
            .await
        {
            Ok(tasks) => tasks,
            Err(error) => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                warn!(%error, "bridge failed to scan for dependent tasks");
                return;
            }
        };

        for dependent in dependents
            .into_iter()
            .filter(|candidate| candidate.dependencies.contains(&task.id))
        {
            let deps_satisfied = self.dependencies_satisfied(&dependent).await;
            if deps_satisfied
                && let Some(owner) = dependent.owner.clone()
            {
                self.send_task_notification(&dependent, owner).await;
            }
        }
    }

    async fn dependencies_satisfied(&self, task: &Task) -> bool {
        for dependency_id in &task.dependencies {
            match self.store.get(dependency_id).await {
                Ok(Some(dependency)) if dependency.state == TaskState::Completed => {}
                _ => return false,
            }
        }
        true
    }

    /// Emits a periodic `status_update` for every non-terminal task whose
    /// `last_communication_at` is older than the configured interval
    /// (§4.6 "periodic `status_update` with progress indicators").
    ///
    /// # Errors
    ///
    /// Returns a [`crate::persistence::PersistenceError`] if the store
    /// cannot be scanned.
    pub async fn emit_periodic_updates(&self) -> Result<(), crate::persistence::PersistenceError> {
        let now = Utc::now();
        let tasks = self
            .store
            .list(&crate::fsm::store::TaskFilter::default())
            .await?;

        for task in tasks.into_iter().filter(|t| !t.state.is_terminal()) {
            let stale = self
                .last_communication
                .get(&task.id)
                .is_none_or(|entry| now - *entry.value() > self.status_update_interval);
            if stale {
                self.handle_status_update(&task).await;
            }
        }
        Ok(())
    }

    /// Runs [`Self::emit_periodic_updates`] on a background cadence of
    /// `status_update_interval` until [`Self::stop`] is called (§4.6, §4.10
    /// "periodic `status_update`").
    pub fn spawn_periodic_updates(self: &Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::Relaxed);
        let this = Arc::clone(self);
        let interval = this
            .status_update_interval
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(300));
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "bridge periodic update loop starting");
            while this.running.load(Ordering::Relaxed) {
                tokio::time::sleep(interval).await;
                if !this.running.load(Ordering::Relaxed) {
                    break;
                }
                if let Err(error) = this.emit_periodic_updates().await {
                    warn!(%error, "periodic status update sweep failed");
                }
            }
            info!("bridge periodic update loop stopped");
        })
    }

    /// Signals the periodic update loop started by
    /// [`Self::spawn_periodic_updates`] to stop after its current sleep.
    pub fn stop_periodic_updates(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Number of internal errors counted since construction (§4.6,
    /// exposed for observability, never surfaced as an FSM or Dispatcher
    /// failure).
    #[must_use]
    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }
}
