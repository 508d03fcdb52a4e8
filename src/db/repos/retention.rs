use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    db::error::DbResult,
    models::{ExpiredEntry, RetentionPolicy},
};

#[async_trait]
pub trait RetentionRepo: Send + Sync {
    /// Check that the store is reachable.
    async fn ping(&self) -> DbResult<()>;

    /// List every entry of the policy's table whose age attribute is at or
    /// before `cutoff`, oldest first.
    async fn find_expired(
        &self,
        policy: &RetentionPolicy,
        cutoff: DateTime<Utc>,
    ) -> DbResult<Vec<ExpiredEntry>>;

    /// Delete a single entry previously returned by [`find_expired`].
    ///
    /// The age predicate is applied again, so an entry that is no longer
    /// expired is left in place. Returns `false` when nothing matched.
    ///
    /// [`find_expired`]: RetentionRepo::find_expired
    async fn delete_entry(
        &self,
        policy: &RetentionPolicy,
        entry: &ExpiredEntry,
        cutoff: DateTime<Utc>,
    ) -> DbResult<bool>;

    /// Count entries of the policy's table, optionally only those at or
    /// before `cutoff`.
    async fn count_entries(
        &self,
        policy: &RetentionPolicy,
        cutoff: Option<DateTime<Utc>>,
    ) -> DbResult<u64>;
}
