//! Command-line interface for the orchestrator (§6).
//!
//! A single binary exposing: starting the dispatcher/bridge/workflow
//! loop, running one review/claim/work cycle, submitting and reviewing
//! PRs, inspecting the inbox and FSM, and running a standalone vibe
//! check over a path. Exit codes: `0` success, `1` logic failure (e.g. a
//! PR needs changes), `2` misuse, `3` configuration error.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use orchestrator::agent_registry::AgentRegistry;
use orchestrator::bridge::Bridge;
use orchestrator::complexity::ComplexityThresholds;
use orchestrator::config::OrchestratorConfig;
use orchestrator::delivery::NoopDeliveryAdapter;
use orchestrator::design_authority::DesignAuthority;
use orchestrator::dispatcher::Dispatcher;
use orchestrator::domain_types::{AgentId, Priority, TaskId};
use orchestrator::fsm::engine::FsmEngine;
use orchestrator::fsm::store::{TaskFilter, TaskStore};
use orchestrator::inbox::{InboxFilter, InboxStore};
use orchestrator::pr_review::{CodeChange, PrReviewProtocol};
use orchestrator::project_registry::ProjectRegistry;
use orchestrator::vibe_check::VibeCheckReport;
use orchestrator::workflow::WorkflowOrchestrator;
use tracing::info;

#[derive(Parser)]
#[command(name = "orchestrator-cli", version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Starts the Dispatcher worker pool, the Bridge, and the Workflow
    /// loop, and blocks until interrupted.
    Start,
    /// Runs a single review/claim/work/report cycle and prints the
    /// resulting `CycleReport` as JSON.
    Cycle,
    /// Submits a pull request. `changes` is a path to a JSON file holding
    /// an array of `CodeChange` objects.
    SubmitPr {
        #[arg(long)]
        author: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        changes: PathBuf,
        #[arg(long, default_value = "normal")]
        priority: String,
        #[arg(long)]
        reviewer: Option<String>,
    },
    /// Reviews a pending pull request as its assigned reviewer.
    ReviewPr {
        #[arg(long)]
        pr_id: String,
        #[arg(long)]
        reviewer: String,
    },
    /// Lists inbox entries for an agent.
    Inbox {
        #[arg(long)]
        agent_id: String,
        #[arg(long)]
        unread_only: bool,
    },
    /// Inspects the task FSM: one task by id, or every task.
    Fsm {
        #[arg(long)]
        task_id: Option<String>,
    },
    /// Runs a standalone vibe check over a file or every file in a
    /// directory.
    VibeCheck {
        path: PathBuf,
        #[arg(long)]
        strict: bool,
    },
}

fn parse_priority(raw: &str) -> Result<Priority, String> {
    match raw {
        "low" => Ok(Priority::Low),
        "normal" => Ok(Priority::Normal),
        "high" => Ok(Priority::High),
        "urgent" => Ok(Priority::Urgent),
        "critical" => Ok(Priority::Critical),
        other => Err(format!("unknown priority: {other}")),
    }
}

struct Stack {
    fsm: Arc<FsmEngine>,
    task_store: Arc<TaskStore>,
    registry: Arc<AgentRegistry>,
    inbox: Arc<InboxStore>,
    dispatcher: Arc<Dispatcher>,
    project_registry: Arc<ProjectRegistry>,
    pr_review: Arc<PrReviewProtocol>,
}

impl Stack {
    async fn build(config: &OrchestratorConfig, roster: Vec<AgentId>) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_root)?;

        let registry = Arc::new(AgentRegistry::new());
        let task_store = Arc::new(TaskStore::new(&config.data_root));
        let fsm = Arc::new(FsmEngine::new(TaskStore::new(&config.data_root)));
        let inbox = Arc::new(InboxStore::new(&config.data_root));
        let adapter = Arc::new(NoopDeliveryAdapter);
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            adapter,
            Arc::clone(&inbox),
            config.max_attempts,
            config.retry_backoff_ms,
            std::time::Duration::from_millis(config.delivery_timeout_ms),
        ));

        let project_registry = Arc::new(ProjectRegistry::open(&config.data_root, "orchestrator").await?);
        let design_authority = Arc::new(DesignAuthority::new(Arc::clone(&project_registry)));
        let pr_review = Arc::new(
            PrReviewProtocol::open(
                &config.data_root,
                Arc::clone(&project_registry),
                design_authority,
                roster,
                config.reviewer_fairness_window,
            )
            .await?,
        );

        Ok(Self {
            fsm,
            task_store,
            registry,
            inbox,
            dispatcher,
            project_registry,
            pr_review,
        })
    }
}

/// Registers `Agent-1`..`Agent-N` so one-shot commands have a roster to
/// assign PR reviewers from, matching the server binary's seeding.
fn default_roster(n: usize) -> Vec<AgentId> {
    (1..=n).map(|i| AgentId::try_new(format!("Agent-{i}")).expect("valid agent id")).collect()
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();

    let config = match OrchestratorConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::from(3);
        }
    };

    match run(cli.command, config).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(1)
        }
    }
}

async fn run(command: Command, config: OrchestratorConfig) -> anyhow::Result<ExitCode> {
    match command {
        Command::Start => {
            let stack = Stack::build(&config, default_roster(4)).await?;
            stack.dispatcher.spawn_workers(config.worker_count);
            let bridge = Arc::new(Bridge::new(
                Arc::clone(&stack.dispatcher),
                Arc::clone(&stack.registry),
                Arc::clone(&stack.task_store),
                config.status_update_interval_secs,
            ));
            bridge.spawn_periodic_updates();
            let workflow = Arc::new(WorkflowOrchestrator::new(
                Arc::clone(&stack.fsm),
                Arc::clone(&stack.task_store),
                Arc::clone(&stack.registry),
                bridge.clone(),
                Arc::clone(&stack.dispatcher),
                std::time::Duration::from_secs(3600),
            ));
            workflow.spawn();
            info!("dispatcher, bridge, and workflow loop started; press ctrl-c to stop");
            tokio::signal::ctrl_c().await?;
            workflow.stop();
            bridge.stop_periodic_updates();
            Ok(ExitCode::SUCCESS)
        }

        Command::Cycle => {
            let stack = Stack::build(&config, default_roster(4)).await?;
            let bridge = Arc::new(Bridge::new(
                Arc::clone(&stack.dispatcher),
                Arc::clone(&stack.registry),
                Arc::clone(&stack.task_store),
                config.status_update_interval_secs,
            ));
            let workflow = WorkflowOrchestrator::new(
                Arc::clone(&stack.fsm),
                Arc::clone(&stack.task_store),
                Arc::clone(&stack.registry),
                bridge,
                Arc::clone(&stack.dispatcher),
                std::time::Duration::from_secs(3600),
            );
            let report = workflow.run_cycle().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(ExitCode::SUCCESS)
        }

        Command::SubmitPr {
            author,
            title,
            description,
            changes,
            priority,
            reviewer,
        } => {
            let Ok(author) = AgentId::try_new(author) else {
                eprintln!("invalid author agent id");
                return Ok(ExitCode::from(2));
            };
            let priority = match parse_priority(&priority) {
                Ok(priority) => priority,
                Err(err) => {
                    eprintln!("{err}");
                    return Ok(ExitCode::from(2));
                }
            };
            let reviewer = match reviewer.map(AgentId::try_new).transpose() {
                Ok(reviewer) => reviewer,
                Err(err) => {
                    eprintln!("invalid reviewer agent id: {err}");
                    return Ok(ExitCode::from(2));
                }
            };
            let raw = std::fs::read_to_string(&changes)?;
            let changes: Vec<CodeChange> = serde_json::from_str(&raw)?;

            let stack = Stack::build(&config, default_roster(4)).await?;
            match stack.pr_review.create(author, title, description, changes, priority, reviewer).await {
                Ok(id) => {
                    println!("{id}");
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => {
                    eprintln!("pull request rejected: {err}");
                    Ok(ExitCode::from(1))
                }
            }
        }

        Command::ReviewPr { pr_id, reviewer } => {
            let Ok(pr_id) = pr_id.parse::<uuid::Uuid>().map(orchestrator::domain_types::PrId::from) else {
                eprintln!("invalid pr id");
                return Ok(ExitCode::from(2));
            };
            let Ok(reviewer) = AgentId::try_new(reviewer) else {
                eprintln!("invalid reviewer agent id");
                return Ok(ExitCode::from(2));
            };
            let stack = Stack::build(&config, default_roster(4)).await?;
            let result = stack.pr_review.review(&pr_id, &reviewer).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if result.approved {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(1))
            }
        }

        Command::Inbox { agent_id, unread_only } => {
            let Ok(agent_id) = AgentId::try_new(agent_id) else {
                eprintln!("invalid agent id");
                return Ok(ExitCode::from(2));
            };
            let stack = Stack::build(&config, default_roster(4)).await?;
            let entries = stack
                .inbox
                .list(&agent_id, InboxFilter { direction: None, unread_only })
                .await?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
            Ok(ExitCode::SUCCESS)
        }

        Command::Fsm { task_id } => {
            let stack = Stack::build(&config, default_roster(4)).await?;
            match task_id {
                Some(raw) => {
                    let Ok(id) = TaskId::try_new(raw) else {
                        eprintln!("invalid task id");
                        return Ok(ExitCode::from(2));
                    };
                    match stack.fsm.get(&id).await? {
                        Some(task) => {
                            println!("{}", serde_json::to_string_pretty(&task)?);
                            Ok(ExitCode::SUCCESS)
                        }
                        None => {
                            eprintln!("task not found: {id}");
                            Ok(ExitCode::from(1))
                        }
                    }
                }
                None => {
                    let tasks = stack.fsm.list(&TaskFilter::default()).await?;
                    println!("{}", serde_json::to_string_pretty(&tasks)?);
                    Ok(ExitCode::SUCCESS)
                }
            }
        }

        Command::VibeCheck { path, strict } => {
            let files = collect_files(&path)?;
            let report = VibeCheckReport::run(&files, &ComplexityThresholds::default(), strict);
            println!("{}", serde_json::to_string_pretty(&report)?);
            match report.status() {
                orchestrator::vibe_check::VibeStatus::Fail => Ok(ExitCode::from(1)),
                _ => Ok(ExitCode::SUCCESS),
            }
        }
    }
}

/// Reads `path` as a single file, or every regular file directly under it
/// if it is a directory, pairing each with its relative display path.
fn collect_files(path: &std::path::Path) -> anyhow::Result<Vec<(String, String)>> {
    if path.is_dir() {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                let content = std::fs::read_to_string(entry.path())?;
                files.push((entry.path().display().to_string(), content));
            }
        }
        Ok(files)
    } else {
        let content = std::fs::read_to_string(path)?;
        Ok(vec![(path.display().to_string(), content)])
    }
}
