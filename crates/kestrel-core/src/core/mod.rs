//! Core module: UI-agnostic orchestration engine.
//!
//! This module contains:
//! - `retry`: Bounded retry with exponential backoff for provider calls
//! - `dispatcher`: Parallel or sequential execution of tool batches
//! - `conversation`: The append-only message sequence
//! - `agent`: The per-turn orchestration loop (`Agent::chat`)
//! - `session`: Session snapshot persistence
//! - `events`: Tool lifecycle events and presentation hooks

pub mod agent;
pub mod conversation;
pub mod dispatcher;
pub mod events;
pub mod retry;
pub mod session;
