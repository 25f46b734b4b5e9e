//! Orchestrator server entry point.
//!
//! Wires the full component stack (§5, §6): an Agent Registry seeded with
//! a fixed roster, a Dispatcher worker pool, a Bridge, a Project Registry
//! and Design Authority, a PR Review Protocol, and the Workflow
//! Orchestrator's overnight loop, then serves the REST surface.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use orchestrator::agent_registry::{AgentAddress, AgentRecord, AgentRegistry};
use orchestrator::bridge::Bridge;
use orchestrator::config::OrchestratorConfig;
use orchestrator::delivery::NoopDeliveryAdapter;
use orchestrator::design_authority::DesignAuthority;
use orchestrator::dispatcher::Dispatcher;
use orchestrator::domain_types::{AgentId, AgentName, AgentStatus, ModeName, Target};
use orchestrator::fsm::engine::FsmEngine;
use orchestrator::fsm::store::TaskStore;
use orchestrator::inbox::InboxStore;
use orchestrator::pr_review::PrReviewProtocol;
use orchestrator::project_registry::ProjectRegistry;
use orchestrator::rest_api::{self, AppState};
use orchestrator::workflow::WorkflowOrchestrator;
use tracing::info;

/// Number of agents seeded into the registry when no roster file is
/// configured, named `Agent-1`..`Agent-N` per `original_source`'s
/// `_generate_agent_skills` convention. The active mode is named
/// `"{N}-agent"` to match.
const DEFAULT_ROSTER_SIZE: usize = 4;

/// Registers `DEFAULT_ROSTER_SIZE` agents and activates the matching mode.
///
/// Each agent gets one address pair in its own mode, with targets derived
/// from its index; a real deployment would load addresses from the
/// mode's configuration file instead (§4.1 "AgentAddress").
fn seed_roster(registry: &AgentRegistry) -> (ModeName, Vec<AgentId>) {
    let mode = ModeName::try_new(format!("{DEFAULT_ROSTER_SIZE}-agent")).expect("valid mode name");
    let mut roster = Vec::with_capacity(DEFAULT_ROSTER_SIZE);

    for i in 1..=DEFAULT_ROSTER_SIZE {
        let id = AgentId::try_new(format!("Agent-{i}")).expect("valid agent id");
        let name = AgentName::try_new(format!("Agent-{i}")).expect("valid agent name");
        let x = i32::try_from(i).expect("roster size fits in i32");
        registry.register(AgentRecord {
            id: id.clone(),
            name,
            capabilities: vec![],
            status: AgentStatus::Idle,
            addresses: std::collections::HashMap::from([(
                mode.clone(),
                AgentAddress {
                    input_target: Target::new(x, 0),
                    starter_target: Target::new(x, 1),
                },
            )]),
        });
        roster.push(id);
    }

    (mode, roster)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = OrchestratorConfig::from_env()?;

    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive("orchestrator=info".parse()?);
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!(data_root = %config.data_root.display(), workers = config.worker_count.as_usize(), "starting orchestrator");

    std::fs::create_dir_all(&config.data_root)?;

    let registry = Arc::new(AgentRegistry::new());
    let (mode, roster) = seed_roster(&registry);
    registry.set_mode(mode);

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
    dispatcher.spawn_workers(config.worker_count);

    let bridge = Arc::new(Bridge::new(
        Arc::clone(&dispatcher),
        Arc::clone(&registry),
        Arc::clone(&task_store),
        config.status_update_interval_secs,
    ));
    bridge.spawn_periodic_updates();

    let project_registry = Arc::new(ProjectRegistry::open(&config.data_root, "orchestrator").await?);
    let design_authority = Arc::new(DesignAuthority::new(Arc::clone(&project_registry)));
    let pr_review = Arc::new(
        PrReviewProtocol::open(
            &config.data_root,
            Arc::clone(&project_registry),
            Arc::clone(&design_authority),
            roster,
            config.reviewer_fairness_window,
        )
        .await?,
    );

    let workflow = Arc::new(WorkflowOrchestrator::new(
        Arc::clone(&fsm),
        Arc::clone(&task_store),
        Arc::clone(&registry),
        Arc::clone(&bridge),
        Arc::clone(&dispatcher),
        std::time::Duration::from_secs(3600),
    ));
    workflow.spawn();

    let state = AppState {
        fsm,
        registry,
        inbox,
        dispatcher,
        project_registry,
        pr_review,
        workflow,
        vibe_thresholds: orchestrator::complexity::ComplexityThresholds::default(),
    };

    let addr: SocketAddr = std::env::var("ORCHESTRATOR_LISTEN_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
        .parse()?;
    info!(%addr, "REST API server listening");
    rest_api::start_server(addr, state).await?;

    Ok(())
}
