use thiserror::Error;

use crate::db::DbError;

/// Errors raised while resolving or executing a retention run.
///
/// `Configuration` never aborts a run: the cutoff resolver absorbs it by
/// falling back to the default age. `Environment` aborts the run before any
/// table is touched. `Query` is fatal to one table only and `Delete` to one
/// entry only.
#[derive(Debug, Error)]
pub enum RetentionError {
    #[error("Invalid retention configuration: {0}")]
    Configuration(String),

    #[error("Retention environment unavailable: {0}")]
    Environment(String),

    #[error("Candidate query for '{entity_kind}' failed: {source}")]
    Query {
        entity_kind: String,
        #[source]
        source: DbError,
    },

    #[error("Delete of {entity_kind} entry ({identity}) failed: {reason}")]
    Delete {
        entity_kind: String,
        identity: String,
        reason: String,
    },

    #[error("Cutoff was already published for this run")]
    CutoffAlreadyPublished,
}
