//! Task finite-state machine: durable store (component E) plus transition
//! rules and mutation protocol (component F). See §3 "Task"/"Contract" and
//! §4.5.

pub mod engine;
pub mod store;
