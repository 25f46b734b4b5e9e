//! Crate-wide error type.
//!
//! Individual components define their own focused error enums (see
//! [`crate::dispatcher::DispatchError`], [`crate::fsm::engine::FsmError`],
//! [`crate::pr_review::ReviewError`], ...); this type is the one returned
//! from the CLI and REST boundary, where any of them can surface.

use thiserror::Error;

/// Top-level error type for orchestrator operations.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// An operation was attempted with a recipient, agent, or mode that is
    /// not known to the current configuration.
    #[error("validation error: {0}")]
    Validation(String),

    /// A task state machine transition was rejected.
    #[error("fsm error: {0}")]
    Fsm(#[from] crate::fsm::engine::FsmError),

    /// Dispatcher-level failure (unknown recipient, empty recipient list).
    #[error("dispatch error: {0}")]
    Dispatch(#[from] crate::dispatcher::DispatchError),

    /// Inbox Store failure (missing entry, persistence).
    #[error("inbox error: {0}")]
    Inbox(#[from] crate::inbox::InboxError),

    /// Agent Registry failure (unknown agent, unknown address for mode).
    #[error("agent registry error: {0}")]
    AgentRegistry(#[from] crate::agent_registry::AgentRegistryError),

    /// PR review protocol failure.
    #[error("review error: {0}")]
    Review(#[from] crate::pr_review::ReviewError),

    /// Project registry failure.
    #[error("registry error: {0}")]
    Registry(#[from] crate::project_registry::RegistryError),

    /// Persisted record could not be read back (corruption, schema drift).
    #[error("persistence error: {0}")]
    Persistence(#[from] crate::persistence::PersistenceError),

    /// A Workflow Orchestrator cycle phase failed.
    #[error("workflow error: {0}")]
    Workflow(#[from] crate::workflow::WorkflowError),

    /// Configuration was missing or malformed.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Wrapped I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
