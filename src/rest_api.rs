//! REST API for the orchestration substrate.
//!
//! Thin JSON boundary over the Task FSM, Inbox Store, PR Review Protocol,
//! Vibe Check, and Workflow Orchestrator. Follows the teacher's
//! `create_app()`/`State`/`ErrorResponse` shape and its practice of
//! validating/parsing at the boundary before touching domain types, with
//! the agent-deployment surface replaced by the orchestrator's own
//! domain operations.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent_registry::{AgentRegistry, AgentRegistryError};
use crate::complexity::ComplexityThresholds;
use crate::dispatcher::{DispatchError, Dispatcher};
use crate::domain_types::{AgentId, PrId, Priority, SequenceNumber, TaskId};
use crate::fsm::engine::{FsmEngine, FsmError};
use crate::fsm::store::{ContractInfo, Task, TaskFilter, TaskState};
use crate::inbox::{InboxError, InboxFilter, InboxStore};
use crate::message::InboxEntry;
use crate::pr_review::{CodeChange, PrReviewProtocol, PullRequest, ReviewError, ReviewResult};
use crate::project_registry::{ProjectRegistry, RegistryError, RegistrySummary};
use crate::vibe_check::VibeCheckReport;
use crate::workflow::{CycleReport, WorkflowError, WorkflowOrchestrator};

/// Health check response for `/api/v1/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    /// Always `"healthy"`; a minimal liveness signal.
    pub status: String,
}

/// Uniform error body for every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short machine-oriented error kind.
    pub error: String,
    /// Human-readable detail.
    pub details: Option<String>,
}

/// Shared component handles threaded into every handler via [`State`].
#[derive(Clone)]
pub struct AppState {
    /// Task FSM.
    pub fsm: Arc<FsmEngine>,
    /// Agent Registry.
    pub registry: Arc<AgentRegistry>,
    /// Per-agent inbox.
    pub inbox: Arc<InboxStore>,
    /// Message dispatcher.
    pub dispatcher: Arc<Dispatcher>,
    /// Project Registry.
    pub project_registry: Arc<ProjectRegistry>,
    /// PR Review Protocol.
    pub pr_review: Arc<PrReviewProtocol>,
    /// Workflow Orchestrator, driving the overnight cycle.
    pub workflow: Arc<WorkflowOrchestrator>,
    /// Thresholds applied by the standalone vibe-check endpoint.
    pub vibe_thresholds: ComplexityThresholds,
}

/// A catch-all API error, mapped to a status code and [`ErrorResponse`]
/// body at the boundary (§4 "Propagation policy": components surface
/// structured results to their caller rather than panicking).
pub enum ApiError {
    /// The request body itself was invalid, independent of any component.
    BadRequest(String),
    Fsm(FsmError),
    Dispatch(DispatchError),
    Inbox(InboxError),
    Registry(RegistryError),
    Review(ReviewError),
    AgentRegistry(AgentRegistryError),
    Workflow(WorkflowError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, error, details) = match self {
            Self::BadRequest(detail) => (StatusCode::BAD_REQUEST, "invalid_request", detail),
            Self::Fsm(err @ FsmError::TaskNotFound(_)) => (StatusCode::NOT_FOUND, "task_not_found", err.to_string()),
            Self::Fsm(err) => (StatusCode::CONFLICT, "fsm_error", err.to_string()),
            Self::Dispatch(err) => (StatusCode::BAD_REQUEST, "dispatch_error", err.to_string()),
            Self::Inbox(err @ InboxError::NotFound { .. }) => (StatusCode::NOT_FOUND, "inbox_entry_not_found", err.to_string()),
            Self::Inbox(err) => (StatusCode::INTERNAL_SERVER_ERROR, "inbox_error", err.to_string()),
            Self::Registry(err @ RegistryError::NotFound(_)) => (StatusCode::NOT_FOUND, "component_not_found", err.to_string()),
            Self::Registry(err @ RegistryError::AlreadyExists(_)) => (StatusCode::CONFLICT, "component_already_exists", err.to_string()),
            Self::Registry(err) => (StatusCode::INTERNAL_SERVER_ERROR, "registry_error", err.to_string()),
            Self::Review(err @ ReviewError::NotFound(_)) => (StatusCode::NOT_FOUND, "pull_request_not_found", err.to_string()),
            Self::Review(err @ (ReviewError::AuthorIsReviewer | ReviewError::NoEligibleReviewer)) => {
                (StatusCode::BAD_REQUEST, "review_error", err.to_string())
            }
            Self::Review(err) => (StatusCode::INTERNAL_SERVER_ERROR, "review_error", err.to_string()),
            Self::AgentRegistry(err) => (StatusCode::BAD_REQUEST, "agent_registry_error", err.to_string()),
            Self::Workflow(err) => (StatusCode::INTERNAL_SERVER_ERROR, "workflow_error", err.to_string()),
        };
        (
            status,
            Json(ErrorResponse {
                error: error.to_string(),
                details: Some(details),
            }),
        )
            .into_response()
    }
}

impl From<FsmError> for ApiError {
    fn from(err: FsmError) -> Self {
        Self::Fsm(err)
    }
}
impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        Self::Dispatch(err)
    }
}
impl From<InboxError> for ApiError {
    fn from(err: InboxError) -> Self {
        Self::Inbox(err)
    }
}
impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        Self::Registry(err)
    }
}
impl From<ReviewError> for ApiError {
    fn from(err: ReviewError) -> Self {
        Self::Review(err)
    }
}
impl From<AgentRegistryError> for ApiError {
    fn from(err: AgentRegistryError) -> Self {
        Self::AgentRegistry(err)
    }
}
impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        Self::Workflow(err)
    }
}

/// Builds the Axum router over an already-constructed [`AppState`].
#[must_use]
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health_check))
        .route("/api/v1/agents", get(list_agents))
        .route("/api/v1/tasks", get(list_tasks).post(create_task))
        .route("/api/v1/tasks/{id}", get(get_task))
        .route("/api/v1/tasks/{id}/claim", post(claim_task))
        .route("/api/v1/tasks/{id}/start", post(start_task))
        .route("/api/v1/tasks/{id}/block", post(block_task))
        .route("/api/v1/tasks/{id}/unblock", post(unblock_task))
        .route("/api/v1/tasks/{id}/submit-for-review", post(submit_task_for_review))
        .route("/api/v1/tasks/{id}/approve", post(approve_task))
        .route("/api/v1/tasks/{id}/request-changes", post(request_task_changes))
        .route("/api/v1/tasks/{id}/cancel", post(cancel_task))
        .route("/api/v1/tasks/{id}/fail", post(fail_task))
        .route("/api/v1/inbox/{agent_id}", get(list_inbox))
        .route("/api/v1/inbox/{agent_id}/{sequence}/read", post(mark_inbox_read))
        .route("/api/v1/inbox/{agent_id}/{sequence}/ack", post(acknowledge_inbox))
        .route("/api/v1/prs", post(create_pr))
        .route("/api/v1/prs/{id}", get(get_pr))
        .route("/api/v1/prs/{id}/review", post(review_pr))
        .route("/api/v1/registry/summary", get(registry_summary))
        .route("/api/v1/vibe-check", post(run_vibe_check))
        .route("/api/v1/workflow/run-cycle", post(run_workflow_cycle))
        .with_state(state)
}

/// Starts the HTTP server on `addr` using `state`.
///
/// # Errors
///
/// Returns an error if the server fails to bind or serve requests.
pub async fn start_server(
    addr: std::net::SocketAddr,
    state: AppState,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_check() -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: "healthy".to_string(),
    })
}

async fn list_agents(State(state): State<AppState>) -> Json<Vec<AgentId>> {
    Json(state.registry.active_agents())
}

#[derive(Debug, Deserialize)]
struct TaskListQuery {
    state: Option<String>,
    owner: Option<String>,
}

async fn list_tasks(State(state): State<AppState>, Query(query): Query<TaskListQuery>) -> Result<Json<Vec<Task>>, ApiError> {
    let filter = TaskFilter {
        state: query
            .state
            .as_deref()
            .map(parse_task_state)
            .transpose()
            .map_err(ApiError::BadRequest)?,
        owner: query
            .owner
            .as_deref()
            .map(AgentId::try_new)
            .transpose()
            .map_err(|err| ApiError::BadRequest(err.to_string()))?,
    };
    let tasks = state.fsm.list(&filter).await?;
    Ok(Json(tasks))
}

fn parse_task_state(raw: &str) -> Result<TaskState, String> {
    match raw {
        "new" => Ok(TaskState::New),
        "claimed" => Ok(TaskState::Claimed),
        "in_progress" => Ok(TaskState::InProgress),
        "blocked" => Ok(TaskState::Blocked),
        "review" => Ok(TaskState::Review),
        "completed" => Ok(TaskState::Completed),
        "cancelled" => Ok(TaskState::Cancelled),
        "failed" => Ok(TaskState::Failed),
        other => Err(format!("unknown task state: {other}")),
    }
}

/// Request body for creating a [`crate::fsm::store::ContractInfo`]
/// alongside a new task.
#[derive(Debug, Deserialize)]
struct CreateContractRequest {
    claimable_by: Option<Vec<String>>,
    claim_deadline: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct CreateTaskRequest {
    title: String,
    description: String,
    #[serde(default)]
    priority: Priority,
    #[serde(default)]
    dependencies: Vec<String>,
    contract: Option<CreateContractRequest>,
}

async fn create_task(State(state): State<AppState>, Json(request): Json<CreateTaskRequest>) -> Result<Json<Task>, ApiError> {
    let dependencies: HashSet<TaskId> = request
        .dependencies
        .iter()
        .map(|id| TaskId::try_new(id.clone()))
        .collect::<Result<_, _>>()
        .map_err(|err| ApiError::BadRequest(err.to_string()))?;

    let contract = request
        .contract
        .map(|c| {
            let claimable_by = c
                .claimable_by
                .map(|ids| ids.iter().map(|id| AgentId::try_new(id.clone())).collect::<Result<HashSet<_>, _>>())
                .transpose()
                .map_err(|err| ApiError::BadRequest(err.to_string()))?;
            Ok::<_, ApiError>(ContractInfo {
                claimable_by,
                claim_deadline: c.claim_deadline,
            })
        })
        .transpose()?;

    let task = state
        .fsm
        .create_task(request.title, request.description, request.priority, dependencies, contract)
        .await?;
    Ok(Json(task))
}

fn parse_task_id(raw: &str) -> Result<TaskId, ApiError> {
    TaskId::try_new(raw.to_string()).map_err(|err| ApiError::BadRequest(err.to_string()))
}

async fn get_task(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Task>, ApiError> {
    let id = parse_task_id(&id)?;
    let task = state.fsm.get(&id).await?.ok_or(FsmError::TaskNotFound(id))?;
    Ok(Json(task))
}

#[derive(Debug, Deserialize)]
struct ActorRequest {
    agent_id: String,
}

#[derive(Debug, Deserialize)]
struct ReasonRequest {
    agent_id: String,
    reason: String,
}

fn parse_actor(raw: &str) -> Result<AgentId, ApiError> {
    AgentId::try_new(raw.to_string()).map_err(|err| ApiError::BadRequest(err.to_string()))
}

async fn claim_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ActorRequest>,
) -> Result<Json<Task>, ApiError> {
    let id = parse_task_id(&id)?;
    let actor = parse_actor(&request.agent_id)?;
    Ok(Json(state.fsm.claim(&id, actor).await?))
}

async fn start_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ActorRequest>,
) -> Result<Json<Task>, ApiError> {
    let id = parse_task_id(&id)?;
    let actor = parse_actor(&request.agent_id)?;
    Ok(Json(state.fsm.start(&id, actor).await?))
}

async fn block_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ReasonRequest>,
) -> Result<Json<Task>, ApiError> {
    let id = parse_task_id(&id)?;
    let actor = parse_actor(&request.agent_id)?;
    Ok(Json(state.fsm.block(&id, actor, request.reason).await?))
}

async fn unblock_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ActorRequest>,
) -> Result<Json<Task>, ApiError> {
    let id = parse_task_id(&id)?;
    let actor = parse_actor(&request.agent_id)?;
    Ok(Json(state.fsm.unblock(&id, actor).await?))
}

#[derive(Debug, Deserialize)]
struct SubmitForReviewRequest {
    agent_id: String,
    linked_pr: Option<String>,
}

async fn submit_task_for_review(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SubmitForReviewRequest>,
) -> Result<Json<Task>, ApiError> {
    let id = parse_task_id(&id)?;
    let actor = parse_actor(&request.agent_id)?;
    let linked_pr = request.linked_pr.as_deref().map(parse_pr_id).transpose()?;
    Ok(Json(state.fsm.submit_for_review(&id, actor, linked_pr).await?))
}

async fn approve_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ActorRequest>,
) -> Result<Json<Task>, ApiError> {
    let id = parse_task_id(&id)?;
    let actor = parse_actor(&request.agent_id)?;
    Ok(Json(state.fsm.approve(&id, actor).await?))
}

async fn request_task_changes(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ReasonRequest>,
) -> Result<Json<Task>, ApiError> {
    let id = parse_task_id(&id)?;
    let actor = parse_actor(&request.agent_id)?;
    Ok(Json(state.fsm.request_changes(&id, actor, request.reason).await?))
}

async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ActorRequest>,
) -> Result<Json<Task>, ApiError> {
    let id = parse_task_id(&id)?;
    let actor = parse_actor(&request.agent_id)?;
    Ok(Json(state.fsm.cancel(&id, actor).await?))
}

async fn fail_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ReasonRequest>,
) -> Result<Json<Task>, ApiError> {
    let id = parse_task_id(&id)?;
    let actor = parse_actor(&request.agent_id)?;
    Ok(Json(state.fsm.fail(&id, actor, request.reason).await?))
}

#[derive(Debug, Deserialize)]
struct InboxListQuery {
    #[serde(default)]
    unread_only: bool,
}

async fn list_inbox(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Query(query): Query<InboxListQuery>,
) -> Result<Json<Vec<InboxEntry>>, ApiError> {
    let agent_id = parse_actor(&agent_id)?;
    let entries = state
        .inbox
        .list(
            &agent_id,
            InboxFilter {
                direction: None,
                unread_only: query.unread_only,
            },
        )
        .await?;
    Ok(Json(entries))
}

fn parse_sequence(raw: u64) -> Result<SequenceNumber, ApiError> {
    SequenceNumber::try_new(raw).map_err(|err| ApiError::BadRequest(err.to_string()))
}

async fn mark_inbox_read(
    State(state): State<AppState>,
    Path((agent_id, sequence)): Path<(String, u64)>,
) -> Result<StatusCode, ApiError> {
    let agent_id = parse_actor(&agent_id)?;
    let sequence = parse_sequence(sequence)?;
    state.inbox.mark_read(&agent_id, sequence).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn acknowledge_inbox(
    State(state): State<AppState>,
    Path((agent_id, sequence)): Path<(String, u64)>,
) -> Result<StatusCode, ApiError> {
    let agent_id = parse_actor(&agent_id)?;
    let sequence = parse_sequence(sequence)?;
    state.inbox.acknowledge(&agent_id, sequence).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct CreatePrRequest {
    author: String,
    title: String,
    description: String,
    changes: Vec<CodeChange>,
    #[serde(default)]
    priority: Priority,
    reviewer: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreatePrResponse {
    id: PrId,
}

async fn create_pr(State(state): State<AppState>, Json(request): Json<CreatePrRequest>) -> Result<Json<CreatePrResponse>, ApiError> {
    let author = parse_actor(&request.author)?;
    let reviewer = request.reviewer.as_deref().map(AgentId::try_new).transpose().map_err(|err| ApiError::BadRequest(err.to_string()))?;
    let id = state
        .pr_review
        .create(author, request.title, request.description, request.changes, request.priority, reviewer)
        .await?;
    Ok(Json(CreatePrResponse { id }))
}

fn parse_pr_id(raw: &str) -> Result<PrId, ApiError> {
    raw.parse::<uuid::Uuid>()
        .map(PrId::from)
        .map_err(|err| ApiError::BadRequest(err.to_string()))
}

async fn get_pr(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<PullRequest>, ApiError> {
    let id = parse_pr_id(&id)?;
    let pr = state.pr_review.get(&id).await.ok_or_else(|| ReviewError::NotFound(id))?;
    Ok(Json(pr))
}

#[derive(Debug, Deserialize)]
struct ReviewPrRequest {
    reviewer: String,
}

async fn review_pr(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ReviewPrRequest>,
) -> Result<Json<ReviewResult>, ApiError> {
    let id = parse_pr_id(&id)?;
    let reviewer = parse_actor(&request.reviewer)?;
    Ok(Json(state.pr_review.review(&id, &reviewer).await?))
}

async fn registry_summary(State(state): State<AppState>) -> Json<RegistrySummary> {
    Json(state.project_registry.summary().await)
}

#[derive(Debug, Deserialize)]
struct VibeCheckFile {
    path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct VibeCheckRequest {
    files: Vec<VibeCheckFile>,
    #[serde(default)]
    strict_mode: bool,
}

async fn run_vibe_check(State(state): State<AppState>, Json(request): Json<VibeCheckRequest>) -> Json<VibeCheckReport> {
    let files: Vec<(String, String)> = request.files.into_iter().map(|f| (f.path, f.content)).collect();
    Json(VibeCheckReport::run(&files, &state.vibe_thresholds, request.strict_mode))
}

async fn run_workflow_cycle(State(state): State<AppState>) -> Result<Json<CycleReport>, ApiError> {
    Ok(Json(state.workflow.run_cycle().await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_check_response_can_be_created() {
        let response = HealthCheckResponse {
            status: "healthy".to_string(),
        };
        assert_eq!(response.status, "healthy");
    }

    #[test]
    fn parse_task_state_rejects_unknown_value() {
        assert!(parse_task_state("not_a_state").is_err());
    }

    #[test]
    fn parse_task_state_accepts_every_known_value() {
        for raw in ["new", "claimed", "in_progress", "blocked", "review", "completed", "cancelled", "failed"] {
            assert!(parse_task_state(raw).is_ok(), "{raw} should parse");
        }
    }
}
