//! Core use-case services.
//!
//! # Responsibility
//! - Validate caller input and apply merge patches above the repository layer.
//! - Map repository failures onto the public `EngineError` taxonomy.
//! - Emit one metadata-only log line per write.
//!
//! # Invariants
//! - Every operation takes the authenticated owner id and never reads or
//!   writes another user's rows.
//! - Ids arriving as text are parsed here; a malformed id is `NotFound`.

pub mod achievement_service;
pub mod activity_service;
pub mod layout_service;
pub mod skill_service;
pub mod tree_service;
pub mod user_service;

use crate::error::{EngineError, EngineResult};
use log::{info, warn};
use std::time::Instant;
use uuid::Uuid;

/// Anything a caller may use to name an entity: a typed id or its text form.
pub trait EntityRef {
    /// Resolves to a typed id, or `NotFound` for `entity` when malformed.
    fn resolve(&self, entity: &'static str) -> EngineResult<Uuid>;
}

impl EntityRef for Uuid {
    fn resolve(&self, _entity: &'static str) -> EngineResult<Uuid> {
        Ok(*self)
    }
}

impl EntityRef for str {
    fn resolve(&self, entity: &'static str) -> EngineResult<Uuid> {
        Uuid::parse_str(self.trim()).map_err(|_| EngineError::not_found(entity, self))
    }
}

impl EntityRef for String {
    fn resolve(&self, entity: &'static str) -> EngineResult<Uuid> {
        self.as_str().resolve(entity)
    }
}

impl<T: EntityRef + ?Sized> EntityRef for &T {
    fn resolve(&self, entity: &'static str) -> EngineResult<Uuid> {
        (**self).resolve(entity)
    }
}

/// Logs the outcome of one write and passes the result through.
pub(crate) fn record<T>(
    event: &'static str,
    module: &'static str,
    started_at: Instant,
    result: EngineResult<T>,
) -> EngineResult<T> {
    match &result {
        Ok(_) => info!(
            "event={event} module={module} status=ok duration_ms={}",
            started_at.elapsed().as_millis()
        ),
        Err(err) => warn!(
            "event={event} module={module} status=error duration_ms={} error_code={}",
            started_at.elapsed().as_millis(),
            err.code()
        ),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::EntityRef;
    use crate::error::ErrorKind;
    use uuid::Uuid;

    #[test]
    fn text_ids_parse_and_malformed_ones_are_not_found() {
        let id = Uuid::new_v4();
        assert_eq!(id.to_string().resolve("skill").unwrap(), id);
        assert_eq!((&id).resolve("skill").unwrap(), id);

        let err = "definitely-not-an-id".resolve("skill").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
