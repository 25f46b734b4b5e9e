//! Shared domain types for the orchestration substrate.
//!
//! Strongly-typed values used across the messaging fabric, the task FSM,
//! and the PR review subsystem, to keep agent identifiers, priorities, and
//! timestamps from degrading into bare `String`/`u8`/`i64` primitives.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of an agent in the fleet (e.g. `"Agent-3"`), or the sentinel
/// `"system"` used for messages not attributed to any agent.
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 128),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        AsRef
    )
)]
pub struct AgentId(String);

impl AgentId {
    /// The sentinel sender id used for system-originated messages.
    pub const SYSTEM: &'static str = "system";

    /// Returns the `system` sentinel agent id.
    ///
    /// # Panics
    ///
    /// Never panics: `"system"` always satisfies the length validation.
    #[must_use]
    pub fn system() -> Self {
        Self::try_new(Self::SYSTEM).expect("\"system\" is a valid AgentId")
    }

    /// Whether this id is the `system` sentinel.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.as_ref().as_str() == Self::SYSTEM
    }

    /// Case-insensitive substring check, used by the Bridge to route
    /// coordination requests to agents whose id looks like a coordinator.
    #[must_use]
    pub fn contains_ignore_case(&self, needle: &str) -> bool {
        self.as_ref()
            .to_lowercase()
            .contains(&needle.to_lowercase())
    }
}

/// A human-readable display name for an agent, distinct from its id.
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct AgentName(String);

/// Name of an operating mode (e.g. `"2-agent"`, `"8-agent"`), selecting
/// which agent ids are active and how each is addressed.
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 64),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct ModeName(String);

/// A capability tag an agent advertises (used for contract-claim scoring).
#[nutype(
    sanitize(trim, lowercase),
    validate(len_char_min = 1, len_char_max = 64),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct Capability(String);

/// Current operational status of an agent. Transitions are unrestricted
/// (informational only, per §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Not currently connected to the fleet.
    Offline,
    /// Connected, no task assigned.
    Idle,
    /// Working on an assigned task.
    Busy,
    /// Actively participating (e.g. mid review, mid claim).
    Active,
    /// Last known operation failed.
    Error,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Offline => "offline",
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Active => "active",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Message/task priority. Total order, `Low < Normal < High < Urgent <
/// Critical`, derived from declaration order (see §3 invariant 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Lowest dispatch priority.
    Low,
    /// Default priority for ordinary traffic.
    Normal,
    /// Above-normal priority.
    High,
    /// Time-sensitive; preempts `High` and below.
    Urgent,
    /// Highest priority; preempts everything else.
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// A coordinate pair a Delivery Adapter knows how to interpret; opaque to
/// the core (§ GLOSSARY "Address / Target").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct Target {
    /// Horizontal coordinate understood only by the adapter.
    pub x: i32,
    /// Vertical coordinate understood only by the adapter.
    pub y: i32,
}

impl Target {
    /// Builds a target from raw coordinates.
    #[must_use]
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Monotonically increasing per-agent sequence number used to order
/// inbox entries (§4.3).
#[nutype(
    validate(greater_or_equal = 0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    )
)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    /// The first sequence number issued to a fresh inbox.
    #[must_use]
    pub fn first() -> Self {
        Self::try_new(0).expect("0 is always a valid SequenceNumber")
    }

    /// Returns the next sequence number.
    ///
    /// # Panics
    ///
    /// Never panics in practice: overflow would require `u64::MAX` prior
    /// messages delivered to a single agent.
    #[must_use]
    pub fn next(self) -> Self {
        Self::try_new(self.into_inner() + 1).expect("sequence counter overflow")
    }
}

/// Unique message identifier.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generates a new random message id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Unique task identifier (stable across persistence, used as the file
/// key per §6).
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 128),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct TaskId(String);

impl TaskId {
    /// Generates a new random task id.
    #[must_use]
    pub fn generate() -> Self {
        Self::try_new(Uuid::new_v4().to_string()).expect("uuid string is always valid")
    }
}

/// Unique pull request identifier.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct PrId(Uuid);

impl PrId {
    /// Generates a new random PR id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Number of worker threads in the Dispatcher pool (§5).
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 256),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 4
)]
pub struct WorkerCount(usize);

impl WorkerCount {
    /// Gets the value as `usize`.
    #[must_use]
    pub fn as_usize(self) -> usize {
        self.into_inner()
    }
}

/// Maximum transient-failure retry attempts before a receipt is marked
/// `failed` (§4.4, default 3).
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 20),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 3
)]
pub struct MaxAttempts(u8);

impl MaxAttempts {
    /// Gets the value as `u8`.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self.into_inner()
    }
}
