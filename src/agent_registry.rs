//! Agent Registry & Coordinate Map (component A, §4.1).
//!
//! Catalog of known agents and their per-mode addressing metadata. Reads
//! vastly outnumber writes (startup registration plus occasional status
//! changes), so the registry is a [`dashmap`] rather than a mutex-guarded
//! map, matching the teacher's reader-preference guidance for the Agent
//! Registry (§5 shared-resource policy).

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use crate::domain_types::{AgentId, AgentName, AgentStatus, Capability, ModeName, Target};

/// Errors raised by the Agent Registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgentRegistryError {
    /// `address()` was called for an agent with no entry for the current
    /// mode.
    #[error("no address for agent {agent_id} in mode {mode}")]
    UnknownAddress {
        /// The agent that was looked up.
        agent_id: AgentId,
        /// The mode active at the time of lookup.
        mode: ModeName,
    },

    /// An operation referenced an agent id with no registration at all.
    #[error("agent not registered: {0}")]
    UnknownAgent(AgentId),
}

/// The input and starter coordinates a Delivery Adapter uses to reach one
/// (agent, mode) pair (§3 "AgentAddress").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentAddress {
    /// Where rendered payloads are typed/sent.
    pub input_target: Target,
    /// Where a fresh agent session is started, if not already running.
    pub starter_target: Target,
}

/// A registered agent: identity, capabilities, status, and its address
/// book across every mode it is configured for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Stable identifier, e.g. `"Agent-3"`.
    pub id: AgentId,
    /// Human-readable display name.
    pub name: AgentName,
    /// Capability tags used for contract-claim scoring (§4.12).
    pub capabilities: Vec<Capability>,
    /// Current operational status.
    pub status: AgentStatus,
    /// Addressing metadata, keyed by mode name.
    pub addresses: std::collections::HashMap<ModeName, AgentAddress>,
}

/// Catalog of known agents and the currently active operating mode.
///
/// Agents are registered at startup and never removed at runtime (§3
/// "Lifecycle and ownership": "never destroyed at runtime").
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: DashMap<AgentId, AgentRecord>,
    active_mode: std::sync::RwLock<Option<ModeName>>,
}

impl AgentRegistry {
    /// Builds an empty registry with no mode selected yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `agent`, replacing any prior record with the same id.
    #[instrument(skip(self, agent), fields(agent_id = %agent.id))]
    pub fn register(&self, agent: AgentRecord) {
        self.agents.insert(agent.id.clone(), agent);
    }

    /// Selects the active operating mode. Does not validate that every
    /// agent has an address for it; `address()` surfaces that per-lookup.
    pub fn set_mode(&self, mode: ModeName) {
        *self.active_mode.write().expect("active_mode lock poisoned") = Some(mode);
    }

    /// Returns the currently active mode, if one has been set.
    #[must_use]
    pub fn mode(&self) -> Option<ModeName> {
        self.active_mode
            .read()
            .expect("active_mode lock poisoned")
            .clone()
    }

    /// Ids of every registered agent, regardless of status or whether they
    /// have an address in the active mode.
    ///
    /// Used by the Dispatcher to materialize broadcast recipient sets
    /// (§3 invariant 7, §8 property 4): callers that need only the agents
    /// addressable in the current mode should filter with
    /// [`Self::address`].
    #[must_use]
    pub fn active_agents(&self) -> Vec<AgentId> {
        self.agents
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Looks up `agent_id`'s address for the currently active mode.
    ///
    /// # Errors
    ///
    /// Returns [`AgentRegistryError::UnknownAgent`] if the id has never
    /// been registered, or [`AgentRegistryError::UnknownAddress`] if it has
    /// no address configured for the active mode (or no mode is active).
    pub fn address(&self, agent_id: &AgentId) -> Result<AgentAddress, AgentRegistryError> {
        let record = self
            .agents
            .get(agent_id)
            .ok_or_else(|| AgentRegistryError::UnknownAgent(agent_id.clone()))?;

        let mode = self
            .mode()
            .ok_or_else(|| AgentRegistryError::UnknownAddress {
                agent_id: agent_id.clone(),
                mode: ModeName::try_new("unset").expect("literal is valid"),
            })?;

        record
            .addresses
            .get(&mode)
            .copied()
            .ok_or(AgentRegistryError::UnknownAddress {
                agent_id: agent_id.clone(),
                mode,
            })
    }

    /// Whether `agent_id` is registered at all, regardless of mode.
    #[must_use]
    pub fn contains(&self, agent_id: &AgentId) -> bool {
        self.agents.contains_key(agent_id)
    }

    /// Sets an agent's operational status. Transitions are unrestricted;
    /// this is informational only (§4.1).
    ///
    /// # Errors
    ///
    /// Returns [`AgentRegistryError::UnknownAgent`] if `agent_id` has never
    /// been registered.
    pub fn set_status(
        &self,
        agent_id: &AgentId,
        status: AgentStatus,
    ) -> Result<(), AgentRegistryError> {
        let mut record = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| AgentRegistryError::UnknownAgent(agent_id.clone()))?;
        record.status = status;
        Ok(())
    }

    /// Returns a clone of the full record for `agent_id`, if registered.
    #[must_use]
    pub fn get(&self, agent_id: &AgentId) -> Option<AgentRecord> {
        self.agents.get(agent_id).map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_agent(id: &str, mode: &str) -> AgentRecord {
        AgentRecord {
            id: AgentId::try_new(id).unwrap(),
            name: AgentName::try_new(id).unwrap(),
            capabilities: vec![],
            status: AgentStatus::Idle,
            addresses: std::collections::HashMap::from([(
                ModeName::try_new(mode).unwrap(),
                AgentAddress {
                    input_target: Target::new(0, 0),
                    starter_target: Target::new(0, 1),
                },
            )]),
        }
    }

    #[test]
    fn address_fails_for_unconfigured_mode() {
        let registry = AgentRegistry::new();
        registry.register(sample_agent("Agent-1", "2-agent"));
        registry.set_mode(ModeName::try_new("4-agent").unwrap());

        let err = registry
            .address(&AgentId::try_new("Agent-1").unwrap())
            .unwrap_err();
        assert!(matches!(err, AgentRegistryError::UnknownAddress { .. }));
    }

    #[test]
    fn address_succeeds_for_configured_mode() {
        let registry = AgentRegistry::new();
        registry.register(sample_agent("Agent-1", "2-agent"));
        registry.set_mode(ModeName::try_new("2-agent").unwrap());

        let address = registry
            .address(&AgentId::try_new("Agent-1").unwrap())
            .unwrap();
        assert_eq!(address.input_target, Target::new(0, 0));
    }

    #[test]
    fn status_is_unrestricted() {
        let registry = AgentRegistry::new();
        registry.register(sample_agent("Agent-1", "2-agent"));
        let id = AgentId::try_new("Agent-1").unwrap();

        registry.set_status(&id, AgentStatus::Busy).unwrap();
        registry.set_status(&id, AgentStatus::Error).unwrap();
        registry.set_status(&id, AgentStatus::Idle).unwrap();

        assert_eq!(registry.get(&id).unwrap().status, AgentStatus::Idle);
    }
}
