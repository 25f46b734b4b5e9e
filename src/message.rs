//! Wire-level message model shared by the Inbox Store, Dispatcher, and
//! Bridge (§3 "Message", "Receipt", "InboxEntry").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain_types::{AgentId, MessageId, Priority, SequenceNumber};

/// What a [`Message`] represents, used by the Bridge to pick a rendering
/// template and by the Dispatcher only for the high-priority marker rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Agent-to-agent message with no special semantics.
    Direct,
    /// Materialized to every active agent at enqueue time.
    Broadcast,
    /// A task became available or assigned.
    TaskNotification,
    /// Progress or state-change update for a task owner.
    StatusUpdate,
    /// Bridge-originated request for coordinator/manager attention.
    CoordinationRequest,
    /// System-originated broadcast (e.g. a Contract announcement).
    SystemBroadcast,
    /// PR lifecycle event.
    PrEvent,
}

/// Terminal or in-flight delivery status of a [`Message`] as a whole.
///
/// A message is `Delivered` iff every recipient's [`Receipt`] is
/// `Delivered` (§3 invariant: "delivered iff every recipient has a
/// delivered receipt").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Waiting in the Dispatcher's priority queue.
    Queued,
    /// At least one recipient is being attempted right now.
    Sending,
    /// Every recipient receipt is `Delivered`.
    Delivered,
    /// At least one recipient receipt is terminally `Failed`.
    Failed,
    /// Removed from consideration without completing (not currently
    /// produced by the Dispatcher; reserved for future TTL support).
    Expired,
}

/// A message enqueued with the Dispatcher (§3 "Message").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message id.
    pub id: MessageId,
    /// Sender agent id, or the `system` sentinel.
    pub sender: AgentId,
    /// Ordered recipient list; non-empty after enqueue validation.
    pub recipients: Vec<AgentId>,
    /// Dispatch priority.
    pub priority: Priority,
    /// What kind of event this message represents.
    pub kind: MessageKind,
    /// Opaque payload; the Dispatcher never interprets its contents beyond
    /// prepending a priority marker when rendering.
    pub body: serde_json::Value,
    /// Enqueue time; used for same-priority FIFO ordering (§4.4).
    pub created_at: DateTime<Utc>,
    /// Total delivery attempts made across all recipients combined.
    pub attempts: u32,
    /// Most recent error text, if any recipient has failed or retried.
    pub last_error: Option<String>,
    /// Aggregate status, recomputed from receipts (§3).
    pub status: MessageStatus,
}

impl Message {
    /// Builds a freshly enqueued message in `Queued` status with zero
    /// attempts, stamped `created_at = now`.
    #[must_use]
    pub fn new(
        sender: AgentId,
        recipients: Vec<AgentId>,
        priority: Priority,
        kind: MessageKind,
        body: serde_json::Value,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            sender,
            recipients,
            priority,
            kind,
            body,
            created_at: Utc::now(),
            attempts: 0,
            last_error: None,
            status: MessageStatus::Queued,
        }
    }

    /// Whether the priority marker should be prepended when rendering, per
    /// the Dispatcher's rule that only `high`/`urgent`/`critical` messages
    /// are marked (§4.4).
    #[must_use]
    pub fn wants_priority_marker(&self) -> bool {
        matches!(
            self.priority,
            Priority::High | Priority::Urgent | Priority::Critical
        )
    }
}

/// Per-(message, recipient) delivery outcome (§3 "Receipt").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    /// Not yet attempted.
    Pending,
    /// Delivered successfully.
    Delivered,
    /// Exhausted retries, adapter returned a permanent failure, or
    /// cancelled.
    Failed,
}

impl ReceiptStatus {
    /// Whether this status will never change again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }
}

/// Delivery state for one recipient of one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    /// Message this receipt belongs to.
    pub message_id: MessageId,
    /// Recipient agent id.
    pub recipient: AgentId,
    /// Current status.
    pub status: ReceiptStatus,
    /// Attempts made against this recipient specifically.
    pub attempts: u32,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
    /// Error text, set on transient or permanent failure.
    pub error: Option<String>,
}

impl Receipt {
    /// Builds a fresh, not-yet-attempted receipt.
    #[must_use]
    pub fn pending(message_id: MessageId, recipient: AgentId) -> Self {
        Self {
            message_id,
            recipient,
            status: ReceiptStatus::Pending,
            attempts: 0,
            updated_at: Utc::now(),
            error: None,
        }
    }
}

/// Direction of an [`InboxEntry`] relative to the owning agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Message received by this agent.
    Inbound,
    /// Message sent by this agent.
    Outbound,
}

/// A durable per-agent mailbox entry (§3 "InboxEntry", §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxEntry {
    /// Monotonic per-agent ordering key, assigned on append.
    pub sequence: SequenceNumber,
    /// The message this entry references.
    pub message_id: MessageId,
    /// Sender, copied from the message for display without a join.
    pub sender: AgentId,
    /// `Inbound` or `Outbound` relative to the owning agent.
    pub direction: Direction,
    /// Whether the owning agent has read this entry.
    pub read: bool,
    /// Whether the owning agent has acknowledged this entry.
    pub acknowledged: bool,
    /// Append time.
    pub received_at: DateTime<Utc>,
}
