//! Domain records for the skill-tree engine.
//!
//! # Responsibility
//! - Define the canonical shapes for users, trees, skills, achievements,
//!   activities, and layouts.
//! - Hold the pure graph and arithmetic rules that storage relies on.
//!
//! # Invariants
//! - Entities reference each other by id only; there is no embedded object
//!   graph.
//! - Timestamps are Unix epoch milliseconds.

pub mod achievement;
pub mod activity;
pub mod layout;
pub mod patch;
pub mod recent;
pub mod skill;
pub mod tree;
pub mod user;
pub mod validation;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}
