//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define one data access contract per aggregate.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Every lookup is scoped to the calling user; foreign rows are `NotFound`.
//! - Every multi-row write runs in one immediate transaction, and the
//!   structural check guarding it runs inside that same transaction.
//! - Repository APIs return semantic errors (`NotFound`, `Conflict`) in
//!   addition to DB transport errors.

pub mod achievement_repo;
pub mod activity_repo;
mod error;
pub mod layout_repo;
mod schema;
pub mod skill_repo;
pub mod tree_repo;
pub mod user_repo;

pub use error::{RepoError, RepoResult};
