//! FSM Task Store (component E, §3 "Task"/"Contract", §4.5 durability).
//!
//! Tasks are persisted one JSON file per task, keyed by `task_id` (§6).
//! This module owns the on-disk schema and per-task serialization; legal
//! transition rules live in [`crate::fsm::engine`].

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::domain_types::{AgentId, Priority, TaskId};
use crate::persistence::{self, PersistenceError};

/// Legal states of a [`Task`] (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Freshly created, unowned.
    New,
    /// An agent has claimed it but not started work.
    Claimed,
    /// Actively being worked.
    InProgress,
    /// Work is stalled on an external blocker.
    Blocked,
    /// Submitted for review.
    Review,
    /// Approved and done. Terminal.
    Completed,
    /// Abandoned before completion. Terminal.
    Cancelled,
    /// Ended in a fatal error. Terminal.
    Failed,
}

impl TaskState {
    /// Terminal states admit no further transitions (§4.5).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// Whether a task in this state must carry a non-null owner (§3
    /// invariant 2).
    #[must_use]
    pub fn requires_owner(self) -> bool {
        matches!(
            self,
            Self::Claimed | Self::InProgress | Self::Blocked | Self::Review
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Claimed => "claimed",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Review => "review",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// One append-only entry in a task's evidence log (§3 "Task.evidence").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceEntry {
    /// Who performed the action (agent id, or the `system` sentinel).
    pub actor: AgentId,
    /// When the action was recorded.
    pub timestamp: DateTime<Utc>,
    /// Free-text description of what happened.
    pub note: String,
}

/// Contract-specific fields, present only when a [`Task`] was published
/// for claiming (§3 "Contract").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractInfo {
    /// Agent ids allowed to claim, or `{"*"}` for anyone. Represented as
    /// `None` to mean "anyone" and `Some(set)` to mean "only these ids".
    pub claimable_by: Option<HashSet<AgentId>>,
    /// Claims after this instant are rejected.
    pub claim_deadline: DateTime<Utc>,
}

impl ContractInfo {
    /// Whether `agent_id` is allowed to claim this contract right now.
    #[must_use]
    pub fn can_be_claimed_by(&self, agent_id: &AgentId, now: DateTime<Utc>) -> bool {
        if now > self.claim_deadline {
            return false;
        }
        match &self.claimable_by {
            None => true,
            Some(allowed) => allowed.contains(agent_id),
        }
    }
}

/// A unit of work tracked by the FSM (§3 "Task").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Stable identifier, used as the persisted file key.
    pub id: TaskId,
    /// Short title.
    pub title: String,
    /// Longer description.
    pub description: String,
    /// Scheduling priority.
    pub priority: Priority,
    /// Current FSM state.
    pub state: TaskState,
    /// Owning agent, if any.
    pub owner: Option<AgentId>,
    /// Ids of tasks that must be `completed` before this one may start.
    pub dependencies: HashSet<TaskId>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Stamped on entering `completed`.
    pub completed_at: Option<DateTime<Utc>>,
    /// Append-only audit trail.
    pub evidence: Vec<EvidenceEntry>,
    /// Set by the Bridge after every emitted message (§4.6).
    pub last_communication_at: Option<DateTime<Utc>>,
    /// Present iff this Task is a Contract.
    pub contract: Option<ContractInfo>,
    /// Linked PR id, if this task's review phase is backed by a PR
    /// (consulted by the Bridge, §4.6 "review").
    pub linked_pr: Option<crate::domain_types::PrId>,
    /// Fields not recognized by this version of the schema, preserved
    /// verbatim across load/save cycles (§6 forward-compatibility).
    #[serde(flatten)]
    pub unknown_fields: HashMap<String, serde_json::Value>,
}

impl Task {
    /// Builds a brand new, unowned task in state `new`.
    #[must_use]
    pub fn new(title: String, description: String, priority: Priority) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::generate(),
            title,
            description,
            priority,
            state: TaskState::New,
            owner: None,
            dependencies: HashSet::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            evidence: Vec::new(),
            last_communication_at: None,
            contract: None,
            linked_pr: None,
            unknown_fields: HashMap::new(),
        }
    }

    fn record(&mut self, actor: AgentId, note: impl Into<String>) {
        self.evidence.push(EvidenceEntry {
            actor,
            timestamp: Utc::now(),
            note: note.into(),
        });
        self.updated_at = Utc::now();
    }
}

/// Filters for [`TaskStore::list`].
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Restrict to this state, if set.
    pub state: Option<TaskState>,
    /// Restrict to this owner, if set.
    pub owner: Option<AgentId>,
}

/// Durable task store with per-task serialization (§4.5 "Concurrency").
pub struct TaskStore {
    data_root: PathBuf,
    locks: DashMap<TaskId, Arc<Mutex<()>>>,
}

impl TaskStore {
    /// Opens a store rooted at `data_root/tasks`.
    #[must_use]
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            locks: DashMap::new(),
        }
    }

    fn path(&self, id: &TaskId) -> PathBuf {
        self.data_root
            .join("tasks")
            .join(format!("{}.json", id.as_ref()))
    }

    pub(crate) fn lock_for(&self, id: &TaskId) -> Arc<Mutex<()>> {
        self.locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Persists `task`, overwriting any prior record with the same id.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] if the write fails.
    pub async fn save(&self, task: &Task) -> Result<(), PersistenceError> {
        persistence::write_json_atomic(&self.path(&task.id), task).await
    }

    /// Loads the task with `id`, if present and uncorrupted.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] if the file exists but cannot be read.
    pub async fn get(&self, id: &TaskId) -> Result<Option<Task>, PersistenceError> {
        persistence::read_json_lenient(&self.path(id)).await
    }

    /// Lists every task matching `filter`.
    ///
    /// Snapshot-consistency across separately-fetched tasks is not
    /// required (§4.5 "Concurrency").
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] if a task file cannot be read.
    pub async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, PersistenceError> {
        let paths =
            persistence::list_files_with_extension(&self.data_root.join("tasks"), "json").await?;

        let mut tasks = Vec::with_capacity(paths.len());
        for path in paths {
            if let Some(task) = persistence::read_json_lenient::<Task>(&path).await? {
                if filter.state.is_some_and(|s| s != task.state) {
                    continue;
                }
                if filter
                    .owner
                    .as_ref()
                    .is_some_and(|owner| task.owner.as_ref() != Some(owner))
                {
                    continue;
                }
                tasks.push(task);
            }
        }
        Ok(tasks)
    }
}

pub(crate) fn append_evidence(task: &mut Task, actor: AgentId, note: impl Into<String>) {
    task.record(actor, note);
}
