//! # Orchestrator substrate
//!
//! A durable, file-backed substrate for coordinating a fixed roster of
//! agents around a shared task lifecycle: an Agent Registry, a priority
//! message Dispatcher with an Inbox Store, a Task FSM with Contract
//! claiming, a Bridge that turns FSM events into addressed messages, a
//! Project Registry, a Design Authority knowledge base, a Vibe Check
//! complexity/anti-pattern scanner, and a PR Review protocol, all wired
//! together by a Workflow Orchestrator and exposed over a small REST
//! surface and CLI.
//!
//! ## Architecture
//!
//! Every component follows the same shape: a `nutype`-validated domain
//! type layer ([`domain_types`]), file-per-record persistence with
//! atomic writes ([`persistence`]), `thiserror` error enums per module
//! aggregated into [`error::OrchestratorError`], and `tracing` spans at
//! the public entry points. See `DESIGN.md` for the grounding of each
//! part and `SPEC_FULL.md` for the full specification.

pub mod agent_registry;
pub mod bridge;
pub mod complexity;
pub mod config;
pub mod delivery;
pub mod design_authority;
pub mod dispatcher;
pub mod domain_types;
pub mod error;
pub mod fsm;
pub mod inbox;
pub mod message;
pub mod persistence;
pub mod pr_review;
pub mod project_registry;
pub mod rest_api;
pub mod vibe_check;
pub mod workflow;

pub use crate::error::{OrchestratorError, OrchestratorResult};
