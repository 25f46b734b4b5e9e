//! End-to-end REST surface tests: a real HTTP server on an ephemeral
//! port, driven with `reqwest`, covering the task lifecycle and PR
//! review flows documented in `SPEC_FULL.md` §8.

use std::collections::HashMap;
use std::sync::Arc;

use orchestrator::agent_registry::{AgentAddress, AgentRecord, AgentRegistry};
use orchestrator::bridge::Bridge;
use orchestrator::complexity::ComplexityThresholds;
use orchestrator::delivery::NoopDeliveryAdapter;
use orchestrator::design_authority::DesignAuthority;
use orchestrator::dispatcher::Dispatcher;
use orchestrator::domain_types::{AgentId, AgentName, AgentStatus, MaxAttempts, ModeName, Target, WorkerCount};
use orchestrator::fsm::engine::FsmEngine;
use orchestrator::fsm::store::TaskStore;
use orchestrator::inbox::InboxStore;
use orchestrator::pr_review::PrReviewProtocol;
use orchestrator::project_registry::ProjectRegistry;
use orchestrator::rest_api::{create_app, AppState};
use orchestrator::workflow::WorkflowOrchestrator;
use serde_json::json;
use tempfile::TempDir;

async fn spawn_test_server() -> (String, TempDir) {
    let dir = TempDir::new().unwrap();

    let registry = Arc::new(AgentRegistry::new());
    let mode = ModeName::try_new("2-agent").unwrap();
    let mut roster = Vec::new();
    for name in ["Agent-1", "Agent-2"] {
        let id = AgentId::try_new(name).unwrap();
        registry.register(AgentRecord {
            id: id.clone(),
            name: AgentName::try_new(name).unwrap(),
            capabilities: vec![],
            status: AgentStatus::Idle,
            addresses: HashMap::from([(
                mode.clone(),
                AgentAddress {
                    input_target: Target::new(0, 0),
                    starter_target: Target::new(0, 1),
                },
            )]),
        });
        roster.push(id);
    }
    registry.set_mode(mode);

    let task_store = Arc::new(TaskStore::new(dir.path()));
    let fsm = Arc::new(FsmEngine::new(TaskStore::new(dir.path())));
    let inbox = Arc::new(InboxStore::new(dir.path()));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&registry),
        Arc::new(NoopDeliveryAdapter),
        Arc::clone(&inbox),
        MaxAttempts::try_new(3).unwrap(),
        1,
        std::time::Duration::from_secs(5),
    ));
    dispatcher.spawn_workers(WorkerCount::try_new(1).unwrap());

    let bridge = Arc::new(Bridge::new(Arc::clone(&dispatcher), Arc::clone(&registry), Arc::clone(&task_store), 300));

    let project_registry = Arc::new(ProjectRegistry::open(dir.path(), "test-project").await.unwrap());
    let design_authority = Arc::new(DesignAuthority::new(Arc::clone(&project_registry)));
    let pr_review = Arc::new(
        PrReviewProtocol::open(dir.path(), Arc::clone(&project_registry), design_authority, roster, 20)
            .await
            .unwrap(),
    );

    let workflow = Arc::new(WorkflowOrchestrator::new(
        Arc::clone(&fsm),
        Arc::clone(&task_store),
        Arc::clone(&registry),
        bridge,
        Arc::clone(&dispatcher),
        std::time::Duration::from_secs(3600),
    ));

    let state = AppState {
        fsm,
        registry,
        inbox,
        dispatcher,
        project_registry,
        pr_review,
        workflow,
        vibe_thresholds: ComplexityThresholds::default(),
    };

    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), dir)
}

#[tokio::test]
async fn health_check_reports_healthy() {
    let (base, _dir) = spawn_test_server().await;
    let client = reqwest::Client::new();

    let response = client.get(format!("{base}/api/v1/health")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn task_lifecycle_end_to_end() {
    let (base, _dir) = spawn_test_server().await;
    let client = reqwest::Client::new();

    let created: serde_json::Value = client
        .post(format!("{base}/api/v1/tasks"))
        .json(&json!({
            "title": "Ship the thing",
            "description": "Implement the thing end to end",
            "priority": "high",
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let task_id = created["id"].as_str().unwrap().to_string();

    let claimed = client
        .post(format!("{base}/api/v1/tasks/{task_id}/claim"))
        .json(&json!({"agent_id": "Agent-1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(claimed.status(), 200);

    let started = client
        .post(format!("{base}/api/v1/tasks/{task_id}/start"))
        .json(&json!({"agent_id": "Agent-1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(started.status(), 200);

    let submitted = client
        .post(format!("{base}/api/v1/tasks/{task_id}/submit-for-review"))
        .json(&json!({"agent_id": "Agent-1", "linked_pr": null}))
        .send()
        .await
        .unwrap();
    assert_eq!(submitted.status(), 200);

    let approved = client
        .post(format!("{base}/api/v1/tasks/{task_id}/approve"))
        .json(&json!({"agent_id": "Agent-1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(approved.status(), 200);
    let task: serde_json::Value = approved.json().await.unwrap();
    assert_eq!(task["state"], "completed");
    assert!(task["completed_at"].is_string());
}

#[tokio::test]
async fn get_unknown_task_returns_404() {
    let (base, _dir) = spawn_test_server().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{base}/api/v1/tasks/does-not-exist"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "task_not_found");
}

#[tokio::test]
async fn pr_needing_changes_is_not_approved() {
    let (base, _dir) = spawn_test_server().await;
    let client = reqwest::Client::new();

    let mut long_function = "pub fn process() {\n".to_string();
    for i in 0..40 {
        long_function.push_str(&format!("    let _x{i} = {i};\n"));
    }
    long_function.push_str("}\n");

    let created: serde_json::Value = client
        .post(format!("{base}/api/v1/prs"))
        .json(&json!({
            "author": "Agent-1",
            "title": "Add processing step",
            "description": "Adds a processing function",
            "changes": [{
                "file_path": "src/processing.rs",
                "change_type": "added",
                "old_content": "",
                "new_content": long_function,
                "line_start": 1,
                "line_end": 41,
            }],
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let pr_id = created["id"].as_str().unwrap().to_string();

    let review: serde_json::Value = client
        .post(format!("{base}/api/v1/prs/{pr_id}/review"))
        .json(&json!({"reviewer": "Agent-2"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(review["approved"], false);
    assert_eq!(review["status"], "needs_changes");
}
