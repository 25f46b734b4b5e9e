//! FSM Engine (component F, §4.5).
//!
//! Legal-transition rules, assignment/claim/complete protocol, and
//! dependency resolution, layered over [`crate::fsm::store::TaskStore`].
//! Grounded on the teacher's agent lifecycle state machine
//! (`domain::agent_lifecycle`): an enum of legal successor states plus a
//! `transition_to` guard, generalized here to the richer Task/Contract
//! rules in §4.5 and to async, persisted storage.

use chrono::Utc;
use thiserror::Error;
use tracing::instrument;

use crate::domain_types::{AgentId, Priority, TaskId};
use crate::fsm::store::{ContractInfo, Task, TaskFilter, TaskState, TaskStore};
use crate::persistence::PersistenceError;

/// Errors raised by the FSM Engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FsmError {
    /// The requested transition is not legal from the task's current state.
    #[error("illegal transition for task {task_id}: {from} -> {to}")]
    IllegalTransition {
        /// The task being mutated.
        task_id: TaskId,
        /// State it was in.
        from: TaskState,
        /// State the caller asked to move to.
        to: TaskState,
    },

    /// No task exists with the given id.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// `start` was attempted while a dependency is not `completed` (§3
    /// invariant 3).
    #[error("task {task_id} blocked on incomplete dependency {dependency}")]
    DependencyNotSatisfied {
        /// The task being started.
        task_id: TaskId,
        /// The dependency preventing it.
        dependency: TaskId,
    },

    /// A Contract claim was attempted by an agent not in `claimable_by`,
    /// or after `claim_deadline` (§4.5 "Contract flavor").
    #[error("task {task_id} cannot be claimed by {agent_id}")]
    NotClaimable {
        /// The contract being claimed.
        task_id: TaskId,
        /// The agent attempting to claim it.
        agent_id: AgentId,
    },

    /// The underlying store failed to read or write a record.
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Legal-transition rules and task-mutation operations (§4.5).
pub struct FsmEngine {
    store: TaskStore,
}

impl FsmEngine {
    /// Wraps a [`TaskStore`] with transition rules.
    #[must_use]
    pub fn new(store: TaskStore) -> Self {
        Self { store }
    }

    /// Returns the set of legal next states from `from` (§4.5 state
    /// machine, excluding the Contract-only claim precondition which is
    /// checked separately in [`Self::claim`]).
    #[must_use]
    pub fn legal_transitions(from: TaskState) -> &'static [TaskState] {
        match from {
            TaskState::New => &[TaskState::Claimed, TaskState::Cancelled],
            TaskState::Claimed => &[TaskState::InProgress, TaskState::Cancelled],
            TaskState::InProgress => &[
                TaskState::Blocked,
                TaskState::Review,
                TaskState::Cancelled,
                TaskState::Failed,
            ],
            TaskState::Blocked => &[TaskState::InProgress, TaskState::Cancelled, TaskState::Failed],
            TaskState::Review => &[
                TaskState::Completed,
                TaskState::InProgress,
                TaskState::Cancelled,
                TaskState::Failed,
            ],
            TaskState::Completed | TaskState::Cancelled | TaskState::Failed => &[],
        }
    }

    fn check_transition(task: &Task, to: TaskState) -> Result<(), FsmError> {
        if Self::legal_transitions(task.state).contains(&to) {
            Ok(())
        } else {
            Err(FsmError::IllegalTransition {
                task_id: task.id.clone(),
                from: task.state,
                to,
            })
        }
    }

    async fn load(&self, id: &TaskId) -> Result<Task, FsmError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| FsmError::TaskNotFound(id.clone()))
    }

    /// Creates and persists a new task, returning it.
    #[instrument(skip(self, title, description))]
    pub async fn create_task(
        &self,
        title: String,
        description: String,
        priority: Priority,
        dependencies: std::collections::HashSet<TaskId>,
        contract: Option<ContractInfo>,
    ) -> Result<Task, FsmError> {
        let mut task = Task::new(title, description, priority);
        task.dependencies = dependencies;
        task.contract = contract;
        crate::fsm::store::append_evidence(&mut task, AgentId::system(), "task created");
        self.store.save(&task).await?;
        Ok(task)
    }

    /// Fetches a task by id.
    ///
    /// # Errors
    ///
    /// Returns [`FsmError::Persistence`] on a read failure; does not error
    /// if the task is simply absent (`Ok(None)`).
    pub async fn get(&self, id: &TaskId) -> Result<Option<Task>, FsmError> {
        Ok(self.store.get(id).await?)
    }

    /// Lists tasks matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`FsmError::Persistence`] on a read failure.
    pub async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, FsmError> {
        Ok(self.store.list(filter).await?)
    }

    async fn mutate(
        &self,
        id: &TaskId,
        to: TaskState,
        actor: AgentId,
        note: impl Into<String>,
        apply: impl FnOnce(&mut Task),
    ) -> Result<Task, FsmError> {
        let lock = self.store.lock_for(id);
        let _guard = lock.lock().await;

        let mut task = self.load(id).await?;
        Self::check_transition(&task, to)?;

        apply(&mut task);
        task.state = to;
        if to == TaskState::Completed {
            task.completed_at = Some(Utc::now());
        }
        crate::fsm::store::append_evidence(&mut task, actor, note);

        self.store.save(&task).await?;
        Ok(task)
    }

    /// Claims `id` for `agent_id` (`new -> claimed`). For Contracts,
    /// additionally requires `agent_id` is eligible and the deadline has
    /// not passed (§4.5 "Contract flavor").
    ///
    /// # Errors
    ///
    /// Returns [`FsmError::IllegalTransition`], [`FsmError::TaskNotFound`],
    /// or [`FsmError::NotClaimable`].
    pub async fn claim(&self, id: &TaskId, agent_id: AgentId) -> Result<Task, FsmError> {
        let lock = self.store.lock_for(id);
        let _guard = lock.lock().await;

        let task = self.load(id).await?;
        Self::check_transition(&task, TaskState::Claimed)?;

        if let Some(contract) = &task.contract
            && !contract.can_be_claimed_by(&agent_id, Utc::now())
        {
            return Err(FsmError::NotClaimable {
                task_id: id.clone(),
                agent_id,
            });
        }

        let mut task = task;
        task.owner = Some(agent_id.clone());
        task.state = TaskState::Claimed;
        crate::fsm::store::append_evidence(&mut task, agent_id, "claimed");
        self.store.save(&task).await?;
        Ok(task)
    }

    /// Starts `id` (`claimed -> in_progress`), rejecting the transition if
    /// any dependency is not `completed` (§3 invariant 3).
    ///
    /// # Errors
    ///
    /// Returns [`FsmError::DependencyNotSatisfied`] if a dependency is
    /// unmet, or the usual transition/not-found/persistence errors.
    pub async fn start(&self, id: &TaskId, actor: AgentId) -> Result<Task, FsmError> {
        let lock = self.store.lock_for(id);
        let _guard = lock.lock().await;

        let task = self.load(id).await?;
        Self::check_transition(&task, TaskState::InProgress)?;

        for dependency_id in &task.dependencies {
            let dependency = self
                .store
                .get(dependency_id)
                .await?
                .ok_or_else(|| FsmError::TaskNotFound(dependency_id.clone()))?;
            if dependency.state != TaskState::Completed {
                return Err(FsmError::DependencyNotSatisfied {
                    task_id: id.clone(),
                    dependency: dependency_id.clone(),
                });
            }
        }

        let mut task = task;
        task.state = TaskState::InProgress;
        crate::fsm::store::append_evidence(&mut task, actor, "started");
        self.store.save(&task).await?;
        Ok(task)
    }

    /// Raises a blocker (`in_progress -> blocked`).
    ///
    /// # Errors
    ///
    /// See [`Self::mutate`].
    pub async fn block(&self, id: &TaskId, actor: AgentId, reason: String) -> Result<Task, FsmError> {
        self.mutate(id, TaskState::Blocked, actor, format!("blocked: {reason}"), |_| {})
            .await
    }

    /// Resolves a blocker (`blocked -> in_progress`).
    ///
    /// # Errors
    ///
    /// See [`Self::mutate`].
    pub async fn unblock(&self, id: &TaskId, actor: AgentId) -> Result<Task, FsmError> {
        self.mutate(id, TaskState::InProgress, actor, "unblocked", |_| {})
            .await
    }

    /// Submits work for review (`in_progress -> review`).
    ///
    /// # Errors
    ///
    /// See [`Self::mutate`].
    pub async fn submit_for_review(
        &self,
        id: &TaskId,
        actor: AgentId,
        linked_pr: Option<crate::domain_types::PrId>,
    ) -> Result<Task, FsmError> {
        self.mutate(
            id,
            TaskState::Review,
            actor,
            "submitted for review",
            move |task| task.linked_pr = linked_pr,
        )
        .await
    }

    /// Approves reviewed work (`review -> completed`).
    ///
    /// # Errors
    ///
    /// See [`Self::mutate`].
    pub async fn approve(&self, id: &TaskId, actor: AgentId) -> Result<Task, FsmError> {
        self.mutate(id, TaskState::Completed, actor, "approved", |_| {})
            .await
    }

    /// Requests changes (`review -> in_progress`).
    ///
    /// # Errors
    ///
    /// See [`Self::mutate`].
    pub async fn request_changes(
        &self,
        id: &TaskId,
        actor: AgentId,
        note: String,
    ) -> Result<Task, FsmError> {
        self.mutate(
            id,
            TaskState::InProgress,
            actor,
            format!("changes requested: {note}"),
            |_| {},
        )
        .await
    }

    /// Cancels a non-terminal task.
    ///
    /// # Errors
    ///
    /// See [`Self::mutate`].
    pub async fn cancel(&self, id: &TaskId, actor: AgentId) -> Result<Task, FsmError> {
        self.mutate(id, TaskState::Cancelled, actor, "cancelled", |_| {})
            .await
    }

    /// Records a fatal error (`in_progress | review | blocked -> failed`).
    ///
    /// # Errors
    ///
    /// See [`Self::mutate`].
    pub async fn fail(&self, id: &TaskId, actor: AgentId, reason: String) -> Result<Task, FsmError> {
        self.mutate(id, TaskState::Failed, actor, format!("failed: {reason}"), |_| {})
            .await
    }

    /// Appends an evidence entry without changing state, used by the
    /// Workflow Orchestrator to record per-cycle progress increments on a
    /// task that stays `in_progress` (§4.12 "Work").
    ///
    /// # Errors
    ///
    /// Returns [`FsmError::TaskNotFound`] or [`FsmError::Persistence`].
    pub async fn record_progress(
        &self,
        id: &TaskId,
        actor: AgentId,
        note: impl Into<String>,
    ) -> Result<Task, FsmError> {
        let lock = self.store.lock_for(id);
        let _guard = lock.lock().await;

        let mut task = self.load(id).await?;
        crate::fsm::store::append_evidence(&mut task, actor, note);
        self.store.save(&task).await?;
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    async fn engine() -> (FsmEngine, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (FsmEngine::new(TaskStore::new(dir.path())), dir)
    }

    fn agent(id: &str) -> AgentId {
        AgentId::try_new(id).unwrap()
    }

    #[tokio::test]
    async fn full_lifecycle_reaches_completed() {
        let (engine, _dir) = engine().await;
        let task = engine
            .create_task(
                "T1".into(),
                "desc".into(),
                Priority::High,
                HashSet::new(),
                None,
            )
            .await
            .unwrap();

        engine.claim(&task.id, agent("Agent-3")).await.unwrap();
        engine.start(&task.id, agent("Agent-3")).await.unwrap();
        engine
            .submit_for_review(&task.id, agent("Agent-3"), None)
            .await
            .unwrap();
        let final_task = engine.approve(&task.id, agent("Agent-3")).await.unwrap();

        assert_eq!(final_task.state, TaskState::Completed);
        assert!(final_task.completed_at.is_some());
        assert!(final_task.evidence.len() >= 5);
        assert!(
            final_task
                .evidence
                .iter()
                .filter(|e| e.actor == agent("Agent-3"))
                .count()
                >= 4
        );
    }

    #[tokio::test]
    async fn start_rejected_until_dependency_completes() {
        let (engine, _dir) = engine().await;
        let t1 = engine
            .create_task("T1".into(), "d".into(), Priority::Normal, HashSet::new(), None)
            .await
            .unwrap();
        engine.claim(&t1.id, agent("Agent-1")).await.unwrap();
        engine.start(&t1.id, agent("Agent-1")).await.unwrap();

        let t2 = engine
            .create_task(
                "T2".into(),
                "d".into(),
                Priority::Normal,
                HashSet::from([t1.id.clone()]),
                None,
            )
            .await
            .unwrap();
        engine.claim(&t2.id, agent("Agent-2")).await.unwrap();

        let err = engine.start(&t2.id, agent("Agent-2")).await.unwrap_err();
        assert!(matches!(err, FsmError::DependencyNotSatisfied { .. }));

        engine
            .submit_for_review(&t1.id, agent("Agent-1"), None)
            .await
            .unwrap();
        engine.approve(&t1.id, agent("Agent-1")).await.unwrap();

        engine.start(&t2.id, agent("Agent-2")).await.unwrap();
    }

    #[tokio::test]
    async fn illegal_transition_leaves_task_unchanged() {
        let (engine, _dir) = engine().await;
        let task = engine
            .create_task("T1".into(), "d".into(), Priority::Normal, HashSet::new(), None)
            .await
            .unwrap();

        let err = engine.approve(&task.id, agent("Agent-1")).await.unwrap_err();
        assert!(matches!(err, FsmError::IllegalTransition { .. }));

        let reloaded = engine.get(&task.id).await.unwrap().unwrap();
        assert_eq!(reloaded.state, TaskState::New);
    }

    #[tokio::test]
    async fn contract_claim_respects_claimable_by_and_deadline() {
        let (engine, _dir) = engine().await;
        let contract = ContractInfo {
            claimable_by: Some(HashSet::from([agent("Agent-1")])),
            claim_deadline: Utc::now() + chrono::Duration::hours(1),
        };
        let task = engine
            .create_task(
                "T1".into(),
                "d".into(),
                Priority::Normal,
                HashSet::new(),
                Some(contract),
            )
            .await
            .unwrap();

        let err = engine.claim(&task.id, agent("Agent-2")).await.unwrap_err();
        assert!(matches!(err, FsmError::NotClaimable { .. }));

        engine.claim(&task.id, agent("Agent-1")).await.unwrap();
    }
}
