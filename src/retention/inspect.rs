use chrono::{DateTime, Utc};
use serde::Serialize;

use super::PolicyRegistry;
use crate::db::{DbResult, RetentionRepo};

/// Row counts for one table, total and at or before a cutoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyStats {
    pub entity_kind: String,
    pub age_attribute: String,
    pub total: u64,
    pub expired: u64,
}

/// Count rows per registered table without deleting anything.
///
/// Stops at the first table that cannot be counted.
pub async fn inspect_policies(
    repo: &dyn RetentionRepo,
    registry: &PolicyRegistry,
    cutoff: DateTime<Utc>,
) -> DbResult<Vec<PolicyStats>> {
    let mut stats = Vec::with_capacity(registry.len());
    for policy in registry.list() {
        let total = repo.count_entries(policy, None).await?;
        let expired = repo.count_entries(policy, Some(cutoff)).await?;
        stats.push(PolicyStats {
            entity_kind: policy.entity_kind.to_string(),
            age_attribute: policy.age_attribute.to_string(),
            total,
            expired,
        });
    }
    Ok(stats)
}
