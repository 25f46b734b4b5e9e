//! Delivery Adapter (component B, §4.2).
//!
//! The only system boundary for message egress. Concrete adapters (the UI
//! automation transport that types into foreign editor windows) are out of
//! scope (§1); this module defines the contract and ships a no-op adapter
//! for tests and for running the core without a live transport (§6).

use async_trait::async_trait;

use crate::agent_registry::AgentAddress;

/// Result of one [`DeliveryAdapter::deliver`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The payload was delivered.
    Ok,
    /// A retryable failure (e.g. target window not focused, transport
    /// hiccup). The Dispatcher retries with backoff up to `max_attempts`.
    TransientFailure(String),
    /// A non-retryable failure (e.g. target permanently gone). The
    /// Dispatcher marks the receipt `failed` immediately.
    PermanentFailure(String),
}

/// Contract required by the Dispatcher (§4.2).
///
/// Adapters are expected to be synchronous and blocking from the
/// Dispatcher worker's perspective; the Dispatcher serializes concurrent
/// calls for a single address itself (§5), so implementations do not need
/// to be internally reentrant-safe per address, but must tolerate calls
/// from different worker tasks for different addresses concurrently.
#[async_trait]
pub trait DeliveryAdapter: Send + Sync {
    /// Delivers `rendered_payload` to `address`.
    async fn deliver(&self, address: AgentAddress, rendered_payload: String) -> DeliveryOutcome;

    /// Whether this adapter can visually tag a high-priority message (used
    /// by the Dispatcher's rendering step, §4.4).
    fn supports_high_priority_marker(&self) -> bool;
}

/// A [`DeliveryAdapter`] that always succeeds without doing anything,
/// for tests and for running the core with no live transport configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDeliveryAdapter;

#[async_trait]
impl DeliveryAdapter for NoopDeliveryAdapter {
    async fn deliver(&self, _address: AgentAddress, _rendered_payload: String) -> DeliveryOutcome {
        DeliveryOutcome::Ok
    }

    fn supports_high_priority_marker(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::Target;

    #[tokio::test]
    async fn noop_adapter_always_succeeds() {
        let adapter = NoopDeliveryAdapter;
        let address = AgentAddress {
            input_target: Target::new(0, 0),
            starter_target: Target::new(0, 1),
        };
        let outcome = adapter.deliver(address, "hello".to_string()).await;
        assert_eq!(outcome, DeliveryOutcome::Ok);
        assert!(adapter.supports_high_priority_marker());
    }
}
