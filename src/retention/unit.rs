use futures::stream::{self, StreamExt};
use serde::Serialize;

use super::{CutoffResult, RetentionError};
use crate::{
    db::{DbResult, RetentionRepo},
    models::{EntryIdentity, ExpiredEntry, RetentionPolicy},
    observability::metrics,
};

/// One entry whose delete did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteFailure {
    pub identity: EntryIdentity,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// Every candidate was handled.
    Succeeded,
    /// The candidate query worked but some deletes failed.
    Degraded,
    /// The candidate query failed, nothing was deleted.
    Failed,
    /// The run deadline passed before this unit started.
    NotAttempted,
}

/// Result of cleaning up one table.
///
/// `deleted_count` never exceeds `matched_count` and is always zero when
/// deletion is disabled.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupOutcome {
    pub policy: RetentionPolicy,
    pub matched_count: u64,
    pub deleted_count: u64,
    pub delete_enabled: bool,
    pub errors: Vec<DeleteFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal_error: Option<String>,
    pub status: UnitStatus,
}

impl CleanupOutcome {
    fn completed(
        policy: &RetentionPolicy,
        matched_count: u64,
        deleted_count: u64,
        delete_enabled: bool,
        errors: Vec<DeleteFailure>,
    ) -> Self {
        let status = if errors.is_empty() {
            UnitStatus::Succeeded
        } else {
            UnitStatus::Degraded
        };
        Self {
            policy: policy.clone(),
            matched_count,
            deleted_count,
            delete_enabled,
            errors,
            fatal_error: None,
            status,
        }
    }

    fn failed(policy: &RetentionPolicy, delete_enabled: bool, error: &RetentionError) -> Self {
        Self {
            policy: policy.clone(),
            matched_count: 0,
            deleted_count: 0,
            delete_enabled,
            errors: Vec::new(),
            fatal_error: Some(error.to_string()),
            status: UnitStatus::Failed,
        }
    }

    pub(crate) fn not_attempted(policy: &RetentionPolicy, delete_enabled: bool) -> Self {
        Self {
            policy: policy.clone(),
            matched_count: 0,
            deleted_count: 0,
            delete_enabled,
            errors: Vec::new(),
            fatal_error: Some("run deadline passed before cleanup started".to_string()),
            status: UnitStatus::NotAttempted,
        }
    }

    /// True when the unit failed as a whole (query error or not attempted).
    pub fn is_fatal(&self) -> bool {
        self.fatal_error.is_some()
    }
}

/// Cleans up the expired entries of one table against a published cutoff.
pub struct CleanupUnit<'a> {
    repo: &'a dyn RetentionRepo,
    delete_concurrency: usize,
}

impl<'a> CleanupUnit<'a> {
    pub fn new(repo: &'a dyn RetentionRepo, delete_concurrency: usize) -> Self {
        Self {
            repo,
            delete_concurrency: delete_concurrency.max(1),
        }
    }

    /// Query, report and (optionally) delete every expired entry.
    ///
    /// Each delete stands alone: a failed delete is recorded and the rest
    /// continue. Deletes that already happened are never rolled back.
    #[tracing::instrument(
        name = "cleanup_unit",
        skip_all,
        fields(
            entity_kind = %policy.entity_kind,
            age_attribute = %policy.age_attribute,
            cutoff = %cutoff.cutoff,
        )
    )]
    pub async fn execute(
        &self,
        policy: &RetentionPolicy,
        cutoff: &CutoffResult,
        delete_enabled: bool,
    ) -> CleanupOutcome {
        let table = policy.entity_kind.as_str();

        let candidates = match self.repo.find_expired(policy, cutoff.cutoff).await {
            Ok(candidates) => candidates,
            Err(source) => {
                let error = RetentionError::Query {
                    entity_kind: table.to_string(),
                    source,
                };
                tracing::error!(error = %error, "Cleanup failed");
                metrics::record_retention_unit_failure(table);
                return CleanupOutcome::failed(policy, delete_enabled, &error);
            }
        };

        let matched = candidates.len() as u64;
        for entry in &candidates {
            tracing::info!(
                identity = %entry.identity,
                age = %entry.age,
                "Expired {} entry",
                table
            );
        }
        tracing::info!(matched, "Found {} expired {} entries", matched, table);
        metrics::record_retention_candidates(table, matched);

        if !delete_enabled {
            tracing::warn!(
                matched,
                "Deletion is disabled, leaving {} expired {} entries in place",
                matched,
                table
            );
            return CleanupOutcome::completed(policy, matched, 0, false, Vec::new());
        }

        let (deleted, errors) = self.delete_all(policy, cutoff, &candidates).await;

        metrics::record_retention_deletion(table, deleted);
        if !errors.is_empty() {
            metrics::record_retention_delete_errors(table, errors.len() as u64);
        }
        tracing::info!(
            matched,
            deleted,
            failed = errors.len(),
            "Deleted {} of {} expired {} entries",
            deleted,
            matched,
            table
        );

        CleanupOutcome::completed(policy, matched, deleted, true, errors)
    }

    async fn delete_one<'e>(
        &self,
        policy: &RetentionPolicy,
        cutoff: &CutoffResult,
        entry: &'e ExpiredEntry,
    ) -> (&'e ExpiredEntry, DbResult<bool>) {
        let result = self.repo.delete_entry(policy, entry, cutoff.cutoff).await;
        (entry, result)
    }

    async fn delete_all(
        &self,
        policy: &RetentionPolicy,
        cutoff: &CutoffResult,
        candidates: &[ExpiredEntry],
    ) -> (u64, Vec<DeleteFailure>) {
        let deletes: Vec<_> = candidates
            .iter()
            .map(|entry| self.delete_one(policy, cutoff, entry))
            .collect();
        let results: Vec<_> = stream::iter(deletes)
            .buffered(self.delete_concurrency)
            .collect()
            .await;

        let mut deleted = 0;
        let mut errors = Vec::new();
        for (entry, result) in results {
            let reason = match result {
                Ok(true) => {
                    tracing::debug!(identity = %entry.identity, "Deleted entry");
                    deleted += 1;
                    continue;
                }
                Ok(false) => "entry no longer present or no longer expired".to_string(),
                Err(e) => e.to_string(),
            };

            let error = RetentionError::Delete {
                entity_kind: policy.entity_kind.to_string(),
                identity: entry.identity.to_string(),
                reason,
            };
            tracing::warn!(error = %error, "Failed to delete entry");
            errors.push(DeleteFailure {
                identity: entry.identity.clone(),
                error: error.to_string(),
            });
        }

        (deleted, errors)
    }
}
