//! Workflow Orchestrator (component L, §4.12).
//!
//! Drives the cyclic "overnight" loop — review & claim, work, report,
//! summary — over the FSM, Bridge, and Dispatcher built by the other
//! components. Grounded on `original_source`'s `FSMOrchestrator`: the same
//! notion of a supervised background loop over a shared task set, replacing
//! its `threading.Thread`/`time.sleep` polling with a `tokio` task and
//! `tokio::time::sleep`, and its ad hoc `Dict[str, FSMTask]` with the real
//! FSM Engine and Bridge built in [`crate::fsm`] and [`crate::bridge`].

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::agent_registry::AgentRegistry;
use crate::bridge::{Bridge, FsmEvent};
use crate::dispatcher::Dispatcher;
use crate::domain_types::{AgentId, Priority, TaskId};
use crate::fsm::engine::{FsmEngine, FsmError};
use crate::fsm::store::{Task, TaskFilter, TaskState};
use crate::message::{Message, MessageKind};
use crate::persistence::PersistenceError;

/// Errors raised by one cycle of the Workflow loop. A cycle-level error
/// aborts that cycle only; the loop itself keeps running (§4.12, §7
/// "Bridge/workflow internal errors").
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// A phase's FSM call failed.
    #[error("fsm error: {0}")]
    Fsm(#[from] FsmError),

    /// A phase's store scan failed.
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Default per-cycle progress increment for `in_progress` tasks (§4.12
/// "Work", "default +20%").
const DEFAULT_PROGRESS_INCREMENT: u8 = 20;

/// Progress threshold beyond which a stalled task may synthesize a
/// blocker (§4.12 "beyond 50%, optionally synthesize a blocker").
const BLOCKER_THRESHOLD: u8 = 50;

/// Deterministic, re-computed-each-cycle progress counter for a task,
/// since `Task` itself has no persisted "percent done" field — the FSM
/// only tracks state. The Workflow derives it from evidence notes it
/// itself appends, so it survives restarts without a separate store.
fn synthetic_progress(task: &Task) -> u8 {
    let increments = task
        .evidence
        .iter()
        .filter(|e| e.note.starts_with("workflow progress"))
        .count();
    u8::try_from(increments).unwrap_or(u8::MAX).saturating_mul(DEFAULT_PROGRESS_INCREMENT)
}

/// How well `agent`'s capabilities match `task` (§4.12 "skill-match
/// score"): count of capability tags that appear, case-insensitively, as
/// a substring of the task's title or description.
fn skill_match_score(capabilities: &[crate::domain_types::Capability], task: &Task) -> usize {
    let haystack = format!("{} {}", task.title, task.description).to_lowercase();
    capabilities
        .iter()
        .filter(|capability| haystack.contains(&capability.to_string()))
        .count()
}

/// Deterministic tiebreaker beyond priority: longer descriptions are
/// treated as more complex and so weighted slightly higher (§4.12 "then
/// complexity bonus").
fn complexity_bonus(task: &Task) -> usize {
    task.description.len()
}

/// Per-cycle outcome, returned by [`WorkflowOrchestrator::run_cycle`] for
/// tests and the CLI's single-cycle mode (§6 "run a single review/claim
/// /work cycle").
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CycleReport {
    /// Tasks claimed this cycle, by id.
    pub claimed: Vec<TaskId>,
    /// Tasks advanced (progressed, blocked, or completed) this cycle.
    pub advanced: Vec<TaskId>,
    /// Counts of tasks by state, as of the Report phase.
    pub counts_by_state: std::collections::BTreeMap<String, usize>,
    /// Per-agent count of non-terminal tasks owned, as of the Report phase.
    pub workload_by_agent: std::collections::BTreeMap<String, usize>,
}

/// Drives the cyclic review/claim/work/report/summary loop (§4.12).
pub struct WorkflowOrchestrator {
    fsm: Arc<FsmEngine>,
    task_store: Arc<crate::fsm::store::TaskStore>,
    registry: Arc<AgentRegistry>,
    bridge: Arc<Bridge>,
    dispatcher: Arc<Dispatcher>,
    cycle_interval: std::time::Duration,
    running: Arc<AtomicBool>,
}

impl WorkflowOrchestrator {
    /// Builds a Workflow loop over the given components, with a cycle
    /// cadence of `cycle_interval` (default one hour per §4.12).
    #[must_use]
    pub fn new(
        fsm: Arc<FsmEngine>,
        store: Arc<crate::fsm::store::TaskStore>,
        registry: Arc<AgentRegistry>,
        bridge: Arc<Bridge>,
        dispatcher: Arc<Dispatcher>,
        cycle_interval: std::time::Duration,
    ) -> Self {
        Self {
            fsm,
            task_store: store,
            registry,
            bridge,
            dispatcher,
            cycle_interval,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn broadcast(&self, kind: MessageKind, priority: Priority, body: serde_json::Value) {
        let recipients = self.registry.active_agents();
        if recipients.is_empty() {
            return;
        }
        if let Err(error) = self
            .dispatcher
            .enqueue(Message::new(AgentId::system(), recipients, priority, kind, body))
            .await
        {
            warn!(%error, "workflow failed to enqueue broadcast");
        }
    }

    /// Phase 1: pulls available Contracts, broadcasts the list, and lets
    /// each active agent claim at most one (§4.12 "Review & claim").
    #[instrument(skip(self))]
    async fn review_and_claim(&self) -> Result<Vec<TaskId>, WorkflowError> {
        let available = self
            .fsm
            .list(&TaskFilter {
                state: Some(TaskState::New),
                owner: None,
            })
            .await?;
        let contracts: Vec<Task> = available.into_iter().filter(|t| t.contract.is_some()).collect();

        self.broadcast(
            MessageKind::SystemBroadcast,
            Priority::Normal,
            serde_json::json!({
                "phase": "review_and_claim",
                "available_tasks": contracts.iter().map(|t| &t.id).collect::<Vec<_>>(),
            }),
        )
        .await;

        let mut agent_ids = self.registry.active_agents();
        agent_ids.sort();

        let mut claimed_ids: HashSet<TaskId> = HashSet::new();
        let mut claimed = Vec::new();
        let now = Utc::now();

        for agent_id in agent_ids {
            let Some(record) = self.registry.get(&agent_id) else {
                continue;
            };

            let best = contracts
                .iter()
                .filter(|task| !claimed_ids.contains(&task.id))
                .filter(|task| {
                    task.contract
                        .as_ref()
                        .is_some_and(|contract| contract.can_be_claimed_by(&agent_id, now))
                })
                .max_by(|a, b| {
                    skill_match_score(&record.capabilities, a)
                        .cmp(&skill_match_score(&record.capabilities, b))
                        .then(a.priority.cmp(&b.priority))
                        .then(complexity_bonus(a).cmp(&complexity_bonus(b)))
                });

            let Some(task) = best else {
                continue;
            };
            if !record.capabilities.is_empty() && skill_match_score(&record.capabilities, task) == 0 {
                continue;
            }

            match self.fsm.claim(&task.id, agent_id.clone()).await {
                Ok(claimed_task) => {
                    claimed_ids.insert(task.id.clone());
                    claimed.push(task.id.clone());
                    self.bridge.handle(FsmEvent::Claimed(claimed_task)).await;
                }
                Err(error) => warn!(%error, task_id = %task.id, %agent_id, "claim attempt failed"),
            }
        }

        Ok(claimed)
    }

    /// Phase 2: advances `claimed` tasks to `in_progress`, and progresses
    /// every already-`in_progress` task one increment, synthesizing a
    /// blocker past the threshold and completing at 100% (§4.12 "Work").
    #[instrument(skip(self, claimed))]
    async fn work(&self, claimed: &[TaskId]) -> Result<Vec<TaskId>, WorkflowError> {
        let mut advanced = Vec::new();

        for task_id in claimed {
            let Some(task) = self.fsm.get(task_id).await? else {
                continue;
            };
            let Some(owner) = task.owner.clone() else {
                continue;
            };
            let started = self.fsm.start(task_id, owner).await?;
            advanced.push(task_id.clone());
            self.bridge.handle(FsmEvent::Started(started)).await;
        }

        let in_progress = self
            .fsm
            .list(&TaskFilter {
                state: Some(TaskState::InProgress),
                owner: None,
            })
            .await?;

        for task in in_progress {
            let Some(owner) = task.owner.clone() else {
                continue;
            };
            let progress_before = synthetic_progress(&task);
            let progress_after = progress_before.saturating_add(DEFAULT_PROGRESS_INCREMENT).min(100);

            if progress_after >= 100 {
                let completed = self
                    .fsm
                    .submit_for_review(&task.id, owner.clone(), None)
                    .await?;
                let completed = self.fsm.approve(&completed.id, owner).await?;
                advanced.push(task.id.clone());
                self.bridge.handle(FsmEvent::Completed(completed)).await;
                continue;
            }

            if progress_after > BLOCKER_THRESHOLD && progress_before <= BLOCKER_THRESHOLD {
                let blocked = self
                    .fsm
                    .block(&task.id, owner, "progress stalled past halfway".to_string())
                    .await?;
                advanced.push(task.id.clone());
                self.bridge.handle(FsmEvent::Blocked(blocked)).await;
                continue;
            }

            self.fsm
                .record_progress(&task.id, owner, format!("workflow progress {progress_after}"))
                .await?;
            advanced.push(task.id.clone());
        }

        Ok(advanced)
    }

    /// Phase 3: broadcasts an aggregated progress summary (§4.12 "Report").
    #[instrument(skip(self))]
    async fn report(&self) -> Result<CycleReport, WorkflowError> {
        let all_tasks = self.task_store.list(&TaskFilter::default()).await?;

        let mut counts_by_state = std::collections::BTreeMap::new();
        let mut workload_by_agent = std::collections::BTreeMap::new();
        for task in &all_tasks {
            *counts_by_state.entry(task.state.to_string()).or_insert(0usize) += 1;
            if !task.state.is_terminal()
                && let Some(owner) = &task.owner
            {
                *workload_by_agent.entry(owner.to_string()).or_insert(0usize) += 1;
            }
        }

        self.broadcast(
            MessageKind::SystemBroadcast,
            Priority::Normal,
            serde_json::json!({
                "phase": "report",
                "counts_by_state": counts_by_state,
                "workload_by_agent": workload_by_agent,
            }),
        )
        .await;

        Ok(CycleReport {
            claimed: Vec::new(),
            advanced: Vec::new(),
            counts_by_state,
            workload_by_agent,
        })
    }

    /// Phase 4: broadcasts a cycle summary (§4.12 "Summary"). Sleeping to
    /// the next cycle is the loop's responsibility, not this phase's.
    #[instrument(skip(self, report))]
    async fn summary(&self, report: &CycleReport) {
        self.broadcast(
            MessageKind::SystemBroadcast,
            Priority::Normal,
            serde_json::json!({
                "phase": "summary",
                "claimed_count": report.claimed.len(),
                "advanced_count": report.advanced.len(),
            }),
        )
        .await;
    }

    /// Runs exactly one cycle: review & claim, work, report, summary. A
    /// failure in any phase aborts this cycle and is returned to the
    /// caller; it never panics and never corrupts FSM state (§4.12, §7).
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError`] if a phase's FSM or store call fails.
    pub async fn run_cycle(&self) -> Result<CycleReport, WorkflowError> {
        let claimed = self.review_and_claim().await?;
        let advanced = self.work(&claimed).await?;
        let mut report = self.report().await?;
        report.claimed = claimed;
        report.advanced = advanced;
        self.summary(&report).await;
        Ok(report)
    }

    /// Whether the supervised loop is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Starts the supervised cyclic loop as a background task. A fatal
    /// error in any phase is logged and aborts that cycle only; the loop
    /// sleeps and retries at the next cadence (§4.12 "Start/stop are
    /// supervised").
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::Relaxed);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            info!(interval_secs = this.cycle_interval.as_secs(), "workflow loop starting");
            while this.running.load(Ordering::Relaxed) {
                match this.run_cycle().await {
                    Ok(report) => info!(
                        claimed = report.claimed.len(),
                        advanced = report.advanced.len(),
                        "workflow cycle completed"
                    ),
                    Err(error) => warn!(%error, "workflow cycle aborted"),
                }
                tokio::time::sleep(this.cycle_interval).await;
            }
            info!("workflow loop stopped");
        })
    }

    /// Signals the loop to stop after its current cycle and sleep.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_registry::{AgentAddress, AgentRecord};
    use crate::delivery::NoopDeliveryAdapter;
    use crate::domain_types::{AgentName, AgentStatus, Capability, MaxAttempts, ModeName, Target};
    use crate::fsm::store::{ContractInfo, TaskStore};
    use crate::inbox::InboxStore;
    use std::collections::HashSet as StdHashSet;

    fn agent(id: &str, capabilities: &[&str]) -> AgentRecord {
        AgentRecord {
            id: AgentId::try_new(id).unwrap(),
            name: AgentName::try_new(id).unwrap(),
            capabilities: capabilities
                .iter()
                .map(|c| Capability::try_new((*c).to_string()).unwrap())
                .collect(),
            status: AgentStatus::Idle,
            addresses: std::collections::HashMap::from([(
                ModeName::try_new("test").unwrap(),
                AgentAddress {
                    input_target: Target::new(0, 0),
                    starter_target: Target::new(0, 1),
                },
            )]),
        }
    }

    async fn harness() -> (Arc<WorkflowOrchestrator>, Arc<FsmEngine>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TaskStore::new(dir.path()));
        let fsm = Arc::new(FsmEngine::new(TaskStore::new(dir.path())));
        let registry = Arc::new(AgentRegistry::new());
        registry.set_mode(ModeName::try_new("test").unwrap());
        registry.register(agent("Agent-1", &["networking"]));

        let inbox = Arc::new(InboxStore::new(dir.path()));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            Arc::new(NoopDeliveryAdapter),
            inbox,
            MaxAttempts::try_new(1).unwrap(),
            1,
            std::time::Duration::from_secs(5),
        ));
        let bridge = Arc::new(Bridge::new(Arc::clone(&dispatcher), Arc::clone(&registry), Arc::clone(&store), 300));

        let workflow = Arc::new(WorkflowOrchestrator::new(
            Arc::clone(&fsm),
            Arc::clone(&store),
            registry,
            bridge,
            dispatcher,
            std::time::Duration::from_secs(3600),
        ));
        (workflow, fsm, dir)
    }

    #[tokio::test]
    async fn claims_matching_contract_by_capability() {
        let (workflow, fsm, _dir) = harness().await;
        let contract = ContractInfo {
            claimable_by: None,
            claim_deadline: Utc::now() + chrono::Duration::hours(1),
        };
        let task = fsm
            .create_task(
                "Fix networking bug".into(),
                "a networking regression".into(),
                Priority::Normal,
                StdHashSet::new(),
                Some(contract),
            )
            .await
            .unwrap();

        let claimed = workflow.review_and_claim().await.unwrap();
        assert_eq!(claimed, vec![task.id.clone()]);

        let reloaded = fsm.get(&task.id).await.unwrap().unwrap();
        assert_eq!(reloaded.owner, Some(AgentId::try_new("Agent-1").unwrap()));
    }

    #[tokio::test]
    async fn full_cycle_advances_claimed_task() {
        let (workflow, fsm, _dir) = harness().await;
        let contract = ContractInfo {
            claimable_by: None,
            claim_deadline: Utc::now() + chrono::Duration::hours(1),
        };
        fsm.create_task(
            "Improve networking layer".into(),
            "networking throughput work".into(),
            Priority::Normal,
            StdHashSet::new(),
            Some(contract),
        )
        .await
        .unwrap();

        let report = workflow.run_cycle().await.unwrap();
        assert_eq!(report.claimed.len(), 1);
        assert!(report.advanced.contains(&report.claimed[0]));
    }
}
