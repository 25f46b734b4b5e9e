//! Message Dispatcher (component D, §4.4).
//!
//! A priority heap, a pool of worker tasks, per-recipient serialization,
//! retry with backoff, and a status tracker, driving the Agent Registry,
//! Delivery Adapter, and Inbox Store. Grounded on the teacher's
//! dispatcher-style worker-pool/circuit-breaker plumbing in
//! `message_router::traits`, adapted from a network router to this
//! priority-queue-plus-adapter shape.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::Rng;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{instrument, warn};

use crate::agent_registry::AgentRegistry;
use crate::delivery::{DeliveryAdapter, DeliveryOutcome};
use crate::domain_types::{AgentId, MaxAttempts, MessageId, Priority, WorkerCount};
use crate::inbox::InboxStore;
use crate::message::{Direction, Message, MessageStatus, Receipt, ReceiptStatus};

/// Errors raised by the Dispatcher at enqueue time.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// `enqueue` was called with an empty recipient list.
    #[error("message has no recipients")]
    EmptyRecipients,

    /// A recipient is not known in the current mode.
    #[error("unknown recipient: {0}")]
    UnknownRecipient(AgentId),
}

#[derive(Debug)]
struct QueueKey {
    priority: Priority,
    created_at: DateTime<Utc>,
    message_id: MessageId,
}

impl PartialEq for QueueKey {
    fn eq(&self, other: &Self) -> bool {
        self.message_id == other.message_id
    }
}
impl Eq for QueueKey {}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: higher priority must compare greater,
        // and for equal priority, the earlier `created_at` must compare
        // greater so it pops first (global FIFO within a priority, §4.4).
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.created_at.cmp(&self.created_at))
    }
}

/// Aggregated per-recipient delivery counters (§4.4 `DeliveryStatusTracker`).
#[derive(Debug, Clone, Copy, Default)]
pub struct RecipientStats {
    /// Terminal-success count.
    pub success: u64,
    /// Terminal-failure count.
    pub failure: u64,
    /// Last time this recipient's status changed.
    pub last_seen: Option<DateTime<Utc>>,
}

struct MessageState {
    message: Message,
    receipts: HashMap<AgentId, Receipt>,
    cancelled: bool,
}

/// Priority queue, worker pool, and status tracker (§4.4, §5).
pub struct Dispatcher {
    registry: Arc<AgentRegistry>,
    adapter: Arc<dyn DeliveryAdapter>,
    inbox: Arc<InboxStore>,
    max_attempts: MaxAttempts,
    retry_backoff_ms: u64,
    delivery_timeout: Duration,
    heap: Mutex<BinaryHeap<QueueKey>>,
    notify: Notify,
    messages: DashMap<MessageId, Arc<Mutex<MessageState>>>,
    // Per-recipient FIFO: a message claims its turn only once it reaches the
    // front of its recipients' queues, which are populated in pop order
    // (§4.4 FIFO per recipient) rather than raced for after the fact.
    recipient_queues: DashMap<AgentId, Arc<Mutex<VecDeque<MessageId>>>>,
    recipient_ready: DashMap<AgentId, Arc<Notify>>,
    stats: DashMap<AgentId, RecipientStats>,
    shutting_down: AtomicBool,
}

impl Dispatcher {
    /// Builds a dispatcher over the given registry, adapter, and inbox.
    #[must_use]
    pub fn new(
        registry: Arc<AgentRegistry>,
        adapter: Arc<dyn DeliveryAdapter>,
        inbox: Arc<InboxStore>,
        max_attempts: MaxAttempts,
        retry_backoff_ms: u64,
        delivery_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            adapter,
            inbox,
            max_attempts,
            retry_backoff_ms,
            delivery_timeout,
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            messages: DashMap::new(),
            recipient_queues: DashMap::new(),
            recipient_ready: DashMap::new(),
            stats: DashMap::new(),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Enqueues `message`, rejecting it if `recipients` is empty or any
    /// recipient is unknown in the registry's current mode (§4.4).
    ///
    /// Appends an outbound [`crate::message::InboxEntry`] for the sender.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::EmptyRecipients`] or
    /// [`DispatchError::UnknownRecipient`].
    #[instrument(skip(self, message), fields(message_id = %message.id))]
    pub async fn enqueue(&self, message: Message) -> Result<MessageId, DispatchError> {
        if message.recipients.is_empty() {
            return Err(DispatchError::EmptyRecipients);
        }
        for recipient in &message.recipients {
            if !self.registry.contains(recipient) {
                return Err(DispatchError::UnknownRecipient(recipient.clone()));
            }
        }

        let message_id = message.id;
        let key = QueueKey {
            priority: message.priority,
            created_at: message.created_at,
            message_id,
        };

        let receipts = message
            .recipients
            .iter()
            .map(|recipient| (recipient.clone(), Receipt::pending(message_id, recipient.clone())))
            .collect();

        if self
            .inbox
            .append(
                &message.sender,
                message_id,
                message.sender.clone(),
                Direction::Outbound,
            )
            .await
            .is_err()
        {
            warn!(%message_id, "failed to record outbound inbox entry");
        }

        self.messages.insert(
            message_id,
            Arc::new(Mutex::new(MessageState {
                message,
                receipts,
                cancelled: false,
            })),
        );

        self.heap.lock().await.push(key);
        self.notify.notify_one();

        Ok(message_id)
    }

    // Pops are serialized by `heap`'s lock, and the fanout below runs while
    // that lock is still held, so per-recipient queues are populated in
    // exactly the order messages leave the heap -- priority, then earliest
    // `created_at` (§4.4) -- no matter how many workers pop concurrently.
    async fn try_pop(&self) -> Option<MessageId> {
        let mut heap = self.heap.try_lock().ok()?;
        let id = heap.pop()?.message_id;
        self.fanout_to_recipient_queues(id).await;
        Some(id)
    }

    async fn pop_blocking(&self) -> MessageId {
        loop {
            let popped = {
                let mut heap = self.heap.lock().await;
                let id = heap.pop().map(|key| key.message_id);
                if let Some(id) = id {
                    self.fanout_to_recipient_queues(id).await;
                }
                id
            };
            if let Some(id) = popped {
                return id;
            }
            self.notify.notified().await;
        }
    }

    async fn message_recipients(&self, message_id: MessageId) -> Vec<AgentId> {
        let Some(state_lock) = self.messages.get(&message_id).map(|e| Arc::clone(&e)) else {
            return Vec::new();
        };
        state_lock.lock().await.message.recipients.clone()
    }

    async fn fanout_to_recipient_queues(&self, message_id: MessageId) {
        for recipient in self.message_recipients(message_id).await {
            self.recipient_queue(&recipient)
                .lock()
                .await
                .push_back(message_id);
        }
    }

    fn recipient_queue(&self, recipient: &AgentId) -> Arc<Mutex<VecDeque<MessageId>>> {
        Arc::clone(
            &self
                .recipient_queues
                .entry(recipient.clone())
                .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new()))),
        )
    }

    fn recipient_ready(&self, recipient: &AgentId) -> Arc<Notify> {
        Arc::clone(
            &self
                .recipient_ready
                .entry(recipient.clone())
                .or_insert_with(|| Arc::new(Notify::new())),
        )
    }

    /// Blocks until `message_id` is at the head of `recipient`'s queue.
    async fn await_recipient_turn(&self, recipient: &AgentId, message_id: MessageId) {
        let queue = self.recipient_queue(recipient);
        let ready = self.recipient_ready(recipient);
        loop {
            let notified = ready.notified();
            if queue.lock().await.front() == Some(&message_id) {
                return;
            }
            notified.await;
        }
    }

    /// Releases `message_id`'s turn, letting the next queued message in.
    async fn release_recipient_turn(&self, recipient: &AgentId, message_id: MessageId) {
        let queue = self.recipient_queue(recipient);
        {
            let mut queue = queue.lock().await;
            if queue.front() == Some(&message_id) {
                queue.pop_front();
            }
        }
        self.recipient_ready(recipient).notify_waiters();
    }

    /// Processes one queued message to completion (all recipients, all
    /// retries), returning its id, or `None` if the queue was empty.
    ///
    /// Intended for tests and for single-cycle CLI invocations; production
    /// use is [`Self::spawn_workers`].
    pub async fn process_one(&self) -> Option<MessageId> {
        let id = self.try_pop().await?;
        self.process_message(id).await;
        Some(id)
    }

    /// Spawns `count` worker tasks that pop and process messages until
    /// [`Self::shutdown`] is called.
    pub fn spawn_workers(self: &Arc<Self>, count: WorkerCount) -> Vec<JoinHandle<()>> {
        (0..count.as_usize())
            .map(|_| {
                let dispatcher = Arc::clone(self);
                tokio::spawn(async move {
                    loop {
                        if dispatcher.shutting_down.load(AtomicOrdering::Relaxed) {
                            return;
                        }
                        let id = dispatcher.pop_blocking().await;
                        dispatcher.process_message(id).await;
                    }
                })
            })
            .collect()
    }

    async fn process_message(&self, message_id: MessageId) {
        let Some(state_lock) = self.messages.get(&message_id).map(|e| Arc::clone(&e)) else {
            return;
        };

        let recipients: Vec<AgentId> = {
            let state = state_lock.lock().await;
            state.message.recipients.clone()
        };

        for recipient in recipients {
            if self.shutting_down.load(AtomicOrdering::Relaxed) {
                break;
            }
            self.deliver_to_one(&state_lock, message_id, &recipient)
                .await;
        }

        self.finalize_status(&state_lock).await;
    }

    async fn deliver_to_one(
        &self,
        state_lock: &Arc<Mutex<MessageState>>,
        message_id: MessageId,
        recipient: &AgentId,
    ) {
        self.await_recipient_turn(recipient, message_id).await;
        self.deliver_to_one_in_turn(state_lock, message_id, recipient)
            .await;
        self.release_recipient_turn(recipient, message_id).await;
    }

    async fn deliver_to_one_in_turn(
        &self,
        state_lock: &Arc<Mutex<MessageState>>,
        message_id: MessageId,
        recipient: &AgentId,
    ) {
        let address = match self.registry.address(recipient) {
            Ok(address) => address,
            Err(error) => {
                self.terminate_receipt(
                    state_lock,
                    recipient,
                    ReceiptStatus::Failed,
                    Some(error.to_string()),
                )
                .await;
                return;
            }
        };

        let high_priority = {
            let state = state_lock.lock().await;
            state.message.wants_priority_marker()
        };
        let marker_supported = self.adapter.supports_high_priority_marker();

        let mut attempt: u32 = 0;
        loop {
            if self.is_cancelled(state_lock).await {
                self.terminate_receipt(
                    state_lock,
                    recipient,
                    ReceiptStatus::Failed,
                    Some("cancelled".to_string()),
                )
                .await;
                return;
            }

            attempt += 1;
            let rendered = self.render(state_lock, high_priority && marker_supported).await;
            let outcome = match tokio::time::timeout(self.delivery_timeout, self.adapter.deliver(address, rendered)).await {
                Ok(outcome) => outcome,
                Err(_) => DeliveryOutcome::TransientFailure("delivery timed out".to_string()),
            };

            self.record_attempt(state_lock, recipient, attempt).await;

            match outcome {
                DeliveryOutcome::Ok => {
                    self.terminate_receipt(state_lock, recipient, ReceiptStatus::Delivered, None)
                        .await;
                    self.append_inbound(state_lock, message_id, recipient).await;
                    return;
                }
                DeliveryOutcome::PermanentFailure(reason) => {
                    self.terminate_receipt(
                        state_lock,
                        recipient,
                        ReceiptStatus::Failed,
                        Some(reason),
                    )
                    .await;
                    return;
                }
                DeliveryOutcome::TransientFailure(reason) => {
                    if attempt >= u32::from(self.max_attempts.as_u8()) {
                        self.terminate_receipt(
                            state_lock,
                            recipient,
                            ReceiptStatus::Failed,
                            Some(reason),
                        )
                        .await;
                        return;
                    }
                    self.set_last_error(state_lock, reason).await;
                    tokio::time::sleep(self.backoff_delay(attempt)).await;
                }
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.retry_backoff_ms.saturating_mul(2u64.saturating_pow(attempt - 1));
        let jitter = rand::thread_rng().gen_range(0..=base.max(1) / 4 + 1);
        Duration::from_millis(base + jitter)
    }

    async fn render(&self, state_lock: &Arc<Mutex<MessageState>>, mark_priority: bool) -> String {
        let state = state_lock.lock().await;
        let body = state.message.body.to_string();
        if mark_priority {
            format!("[{}] {}", state.message.priority, body)
        } else {
            body
        }
    }

    async fn is_cancelled(&self, state_lock: &Arc<Mutex<MessageState>>) -> bool {
        state_lock.lock().await.cancelled
    }

    async fn record_attempt(
        &self,
        state_lock: &Arc<Mutex<MessageState>>,
        recipient: &AgentId,
        attempt: u32,
    ) {
        let mut state = state_lock.lock().await;
        state.message.attempts += 1;
        if let Some(receipt) = state.receipts.get_mut(recipient) {
            receipt.attempts = attempt;
            receipt.updated_at = Utc::now();
        }
    }

    async fn set_last_error(&self, state_lock: &Arc<Mutex<MessageState>>, reason: String) {
        let mut state = state_lock.lock().await;
        state.message.last_error = Some(reason.clone());
        state.message.status = MessageStatus::Sending;
    }

    async fn terminate_receipt(
        &self,
        state_lock: &Arc<Mutex<MessageState>>,
        recipient: &AgentId,
        status: ReceiptStatus,
        error: Option<String>,
    ) {
        let mut state = state_lock.lock().await;
        if let Some(receipt) = state.receipts.get_mut(recipient) {
            receipt.status = status;
            receipt.error = error.clone();
            receipt.updated_at = Utc::now();
        }
        if let Some(error) = &error {
            state.message.last_error = Some(error.clone());
        }
        drop(state);

        let mut entry = self.stats.entry(recipient.clone()).or_default();
        match status {
            ReceiptStatus::Delivered => entry.success += 1,
            ReceiptStatus::Failed => entry.failure += 1,
            ReceiptStatus::Pending => {}
        }
        entry.last_seen = Some(Utc::now());
    }

    async fn append_inbound(
        &self,
        state_lock: &Arc<Mutex<MessageState>>,
        message_id: MessageId,
        recipient: &AgentId,
    ) {
        let sender = {
            let state = state_lock.lock().await;
            state.message.sender.clone()
        };
        if self
            .inbox
            .append(recipient, message_id, sender, Direction::Inbound)
            .await
            .is_err()
        {
            warn!(%message_id, %recipient, "failed to record inbound inbox entry");
        }
    }

    async fn finalize_status(&self, state_lock: &Arc<Mutex<MessageState>>) {
        let mut state = state_lock.lock().await;
        let all_delivered = state
            .receipts
            .values()
            .all(|receipt| receipt.status == ReceiptStatus::Delivered);
        let any_failed = state
            .receipts
            .values()
            .any(|receipt| receipt.status == ReceiptStatus::Failed);

        state.message.status = if any_failed {
            MessageStatus::Failed
        } else if all_delivered {
            MessageStatus::Delivered
        } else {
            MessageStatus::Sending
        };
    }

    /// Cancels a message: non-terminal receipts transition to
    /// `failed(cancelled)` and no further attempts are made. Already
    /// in-flight adapter calls are allowed to finish (§4.4).
    pub async fn cancel(&self, message_id: MessageId) {
        let Some(state_lock) = self.messages.get(&message_id).map(|e| Arc::clone(&e)) else {
            return;
        };
        let mut state = state_lock.lock().await;
        state.cancelled = true;
        for receipt in state.receipts.values_mut() {
            if !receipt.status.is_terminal() {
                receipt.status = ReceiptStatus::Failed;
                receipt.error = Some("cancelled".to_string());
                receipt.updated_at = Utc::now();
            }
        }
        state.message.status = MessageStatus::Failed;
    }

    /// Returns the current terminal/aggregate status of `message_id`.
    pub async fn status(&self, message_id: MessageId) -> Option<MessageStatus> {
        let entry = self.messages.get(&message_id)?;
        let state = entry.lock().await;
        Some(state.message.status)
    }

    /// Returns a clone of every receipt recorded for `message_id`.
    pub async fn receipts(&self, message_id: MessageId) -> Vec<Receipt> {
        let Some(entry) = self.messages.get(&message_id) else {
            return Vec::new();
        };
        let state = entry.lock().await;
        state.receipts.values().cloned().collect()
    }

    /// Returns the aggregated delivery counters for `recipient`.
    #[must_use]
    pub fn recipient_stats(&self, recipient: &AgentId) -> RecipientStats {
        self.stats.get(recipient).map_or_else(RecipientStats::default, |entry| *entry)
    }

    /// Begins shutdown: stops workers from picking up new messages after a
    /// grace period during which in-flight work may complete, then cancels
    /// whatever remains non-terminal (§5).
    pub async fn shutdown(&self, grace_period: Duration) {
        self.shutting_down.store(true, AtomicOrdering::Relaxed);
        tokio::time::sleep(grace_period).await;

        let ids: Vec<MessageId> = self.messages.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            self.cancel(id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_registry::{AgentAddress, AgentRecord};
    use crate::delivery::NoopDeliveryAdapter;
    use crate::domain_types::{AgentName, AgentStatus, ModeName, Target};
    use crate::message::MessageKind;

    async fn dispatcher_with_agents(ids: &[&str]) -> (Arc<Dispatcher>, tempfile::TempDir) {
        let registry = Arc::new(AgentRegistry::new());
        let mode = ModeName::try_new("test").unwrap();
        registry.set_mode(mode.clone());
        for id in ids {
            registry.register(AgentRecord {
                id: AgentId::try_new(*id).unwrap(),
                name: AgentName::try_new(*id).unwrap(),
                capabilities: vec![],
                status: AgentStatus::Idle,
                addresses: std::collections::HashMap::from([(
                    mode.clone(),
                    AgentAddress {
                        input_target: Target::new(0, 0),
                        starter_target: Target::new(0, 1),
                    },
                )]),
            });
        }
        let dir = tempfile::tempdir().unwrap();
        let inbox = Arc::new(InboxStore::new(dir.path()));
        let dispatcher = Arc::new(Dispatcher::new(
            registry,
            Arc::new(NoopDeliveryAdapter),
            inbox,
            MaxAttempts::try_new(3).unwrap(),
            1,
            Duration::from_secs(5),
        ));
        (dispatcher, dir)
    }

    #[tokio::test]
    async fn direct_send_delivers_and_updates_inbox() {
        let (dispatcher, _dir) = dispatcher_with_agents(&["Agent-1", "Agent-2"]).await;
        let message = Message::new(
            AgentId::try_new("Agent-1").unwrap(),
            vec![AgentId::try_new("Agent-2").unwrap()],
            Priority::Normal,
            MessageKind::Direct,
            serde_json::json!("hello"),
        );
        let id = dispatcher.enqueue(message).await.unwrap();
        dispatcher.process_one().await;

        assert_eq!(dispatcher.status(id).await, Some(MessageStatus::Delivered));
        let stats = dispatcher.recipient_stats(&AgentId::try_new("Agent-2").unwrap());
        assert_eq!(stats.success, 1);

        let counts = dispatcher
            .inbox
            .counts(&AgentId::try_new("Agent-2").unwrap())
            .await
            .unwrap();
        assert_eq!(counts.unread, 1);
    }

    #[tokio::test]
    async fn enqueue_rejects_empty_recipients() {
        let (dispatcher, _dir) = dispatcher_with_agents(&["Agent-1"]).await;
        let message = Message::new(
            AgentId::try_new("Agent-1").unwrap(),
            vec![],
            Priority::Normal,
            MessageKind::Direct,
            serde_json::json!("x"),
        );
        let err = dispatcher.enqueue(message).await.unwrap_err();
        assert_eq!(err, DispatchError::EmptyRecipients);
    }

    #[tokio::test]
    async fn enqueue_rejects_unknown_recipient() {
        let (dispatcher, _dir) = dispatcher_with_agents(&["Agent-1"]).await;
        let message = Message::new(
            AgentId::try_new("Agent-1").unwrap(),
            vec![AgentId::try_new("Agent-99").unwrap()],
            Priority::Normal,
            MessageKind::Direct,
            serde_json::json!("x"),
        );
        let err = dispatcher.enqueue(message).await.unwrap_err();
        assert!(matches!(err, DispatchError::UnknownRecipient(_)));
    }

    #[tokio::test]
    async fn priority_preemption_orders_by_priority_then_fifo() {
        let (dispatcher, _dir) = dispatcher_with_agents(&["Agent-1", "Agent-2"]).await;
        let recipient = AgentId::try_new("Agent-2").unwrap();

        let low = Message::new(
            AgentId::try_new("Agent-1").unwrap(),
            vec![recipient.clone()],
            Priority::Normal,
            MessageKind::Direct,
            serde_json::json!("m1"),
        );
        let low_id = low.id;
        dispatcher.enqueue(low).await.unwrap();

        let high = Message::new(
            AgentId::try_new("Agent-1").unwrap(),
            vec![recipient.clone()],
            Priority::Critical,
            MessageKind::Direct,
            serde_json::json!("m2"),
        );
        let high_id = high.id;
        dispatcher.enqueue(high).await.unwrap();

        let first_popped = dispatcher.process_one().await.unwrap();
        assert_eq!(first_popped, high_id);
        let second_popped = dispatcher.process_one().await.unwrap();
        assert_eq!(second_popped, low_id);
    }

    /// A delivery adapter whose latency is deliberately *inverted*: earlier
    /// calls are slower than later ones. With a worker pool racing for
    /// `deliver` calls this is the adversarial case for per-recipient FIFO.
    #[derive(Default)]
    struct SkewedDeliveryAdapter {
        calls: std::sync::atomic::AtomicU32,
    }

    #[async_trait::async_trait]
    impl DeliveryAdapter for SkewedDeliveryAdapter {
        async fn deliver(
            &self,
            _address: crate::agent_registry::AgentAddress,
            _rendered_payload: String,
        ) -> DeliveryOutcome {
            let call = self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            let delay_ms = 30u64.saturating_sub(u64::from(call) * 5);
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            DeliveryOutcome::Ok
        }

        fn supports_high_priority_marker(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn concurrent_workers_preserve_per_recipient_fifo() {
        let registry = Arc::new(AgentRegistry::new());
        let mode = ModeName::try_new("test").unwrap();
        registry.set_mode(mode.clone());
        for id in ["Agent-1", "Agent-2"] {
            registry.register(AgentRecord {
                id: AgentId::try_new(id).unwrap(),
                name: AgentName::try_new(id).unwrap(),
                capabilities: vec![],
                status: AgentStatus::Idle,
                addresses: std::collections::HashMap::from([(
                    mode.clone(),
                    AgentAddress {
                        input_target: Target::new(0, 0),
                        starter_target: Target::new(0, 1),
                    },
                )]),
            });
        }
        let dir = tempfile::tempdir().unwrap();
        let inbox = Arc::new(InboxStore::new(dir.path()));
        let dispatcher = Arc::new(Dispatcher::new(
            registry,
            Arc::new(SkewedDeliveryAdapter::default()),
            inbox,
            MaxAttempts::try_new(3).unwrap(),
            1,
            Duration::from_secs(5),
        ));

        let recipient = AgentId::try_new("Agent-2").unwrap();
        let mut expected_ids = Vec::new();
        for i in 0..6 {
            let message = Message::new(
                AgentId::try_new("Agent-1").unwrap(),
                vec![recipient.clone()],
                Priority::Normal,
                MessageKind::Direct,
                serde_json::json!(format!("m{i}")),
            );
            expected_ids.push(dispatcher.enqueue(message).await.unwrap());
        }

        let workers = dispatcher.spawn_workers(WorkerCount::try_new(4).unwrap());
        tokio::time::sleep(Duration::from_millis(500)).await;
        dispatcher.shutdown(Duration::ZERO).await;
        for worker in workers {
            let _ = worker.await;
        }

        let inbound = dispatcher
            .inbox
            .list(&recipient, crate::inbox::InboxFilter::default())
            .await
            .unwrap();
        let actual_ids: Vec<MessageId> = inbound
            .into_iter()
            .filter(|entry| entry.direction == Direction::Inbound)
            .map(|entry| entry.message_id)
            .collect();
        assert_eq!(actual_ids, expected_ids);
    }
}
