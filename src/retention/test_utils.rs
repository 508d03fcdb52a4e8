//! In-memory store and clocks for engine tests.

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Clock, RetentionError};
use crate::{
    db::{DbError, DbResult, RetentionRepo},
    models::{EntryIdentity, ExpiredEntry, IdentityValue, RetentionPolicy},
};

pub fn log_policy() -> RetentionPolicy {
    RetentionPolicy::new("log", "dttm", &["id"]).unwrap()
}

pub fn policy(table: &str) -> RetentionPolicy {
    RetentionPolicy::new(table, "created_at", &["id"]).unwrap()
}

#[derive(Default)]
struct State {
    tables: HashMap<String, Vec<(String, DateTime<Utc>)>>,
    failing_queries: HashSet<String>,
    failing_deletes: HashSet<(String, String)>,
    vanishing: HashSet<(String, String)>,
    unreachable: bool,
}

/// Keeps rows as `(id, age)` pairs per table. The id is reported under the
/// policy's first identity column.
#[derive(Default)]
pub struct MemoryRetentionRepo {
    state: Mutex<State>,
}

impl MemoryRetentionRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, table: &str, id: &str, age: DateTime<Utc>) {
        self.state
            .lock()
            .unwrap()
            .tables
            .entry(table.to_string())
            .or_default()
            .push((id.to_string(), age));
    }

    /// Remaining ids of a table, in insertion order.
    pub fn ids(&self, table: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(table)
            .map(|rows| rows.iter().map(|(id, _)| id.clone()).collect())
            .unwrap_or_default()
    }

    pub fn fail_queries_for(&self, table: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_queries
            .insert(table.to_string());
    }

    pub fn fail_delete_of(&self, table: &str, id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_deletes
            .insert((table.to_string(), id.to_string()));
    }

    /// Simulate another writer removing the row between query and delete.
    pub fn vanish_before_delete(&self, table: &str, id: &str) {
        self.state
            .lock()
            .unwrap()
            .vanishing
            .insert((table.to_string(), id.to_string()));
    }

    pub fn set_unreachable(&self) {
        self.state.lock().unwrap().unreachable = true;
    }
}

fn identity(policy: &RetentionPolicy, id: &str) -> EntryIdentity {
    EntryIdentity::new(vec![IdentityValue {
        column: policy.identity_columns[0].to_string(),
        value: Some(id.to_string()),
    }])
}

fn id_of(entry: &ExpiredEntry) -> String {
    entry.identity.values()[0].value.clone().unwrap_or_default()
}

#[async_trait]
impl RetentionRepo for MemoryRetentionRepo {
    async fn ping(&self) -> DbResult<()> {
        if self.state.lock().unwrap().unreachable {
            return Err(DbError::Internal("connection refused".into()));
        }
        Ok(())
    }

    async fn find_expired(
        &self,
        policy: &RetentionPolicy,
        cutoff: DateTime<Utc>,
    ) -> DbResult<Vec<ExpiredEntry>> {
        let state = self.state.lock().unwrap();
        let table = policy.entity_kind.as_str();
        if state.failing_queries.contains(table) {
            return Err(DbError::Internal(format!("no such table: {table}")));
        }

        let mut entries: Vec<_> = state
            .tables
            .get(table)
            .into_iter()
            .flatten()
            .filter(|(_, age)| *age <= cutoff)
            .map(|(id, age)| ExpiredEntry {
                identity: identity(policy, id),
                age: *age,
            })
            .collect();
        entries.sort_by_key(|e| e.age);
        Ok(entries)
    }

    async fn delete_entry(
        &self,
        policy: &RetentionPolicy,
        entry: &ExpiredEntry,
        cutoff: DateTime<Utc>,
    ) -> DbResult<bool> {
        let mut state = self.state.lock().unwrap();
        let key = (policy.entity_kind.to_string(), id_of(entry));
        if state.failing_deletes.contains(&key) {
            return Err(DbError::Internal("constraint violation".into()));
        }

        let vanished = state.vanishing.remove(&key);
        let Some(rows) = state.tables.get_mut(&key.0) else {
            return Ok(false);
        };
        let before = rows.len();
        rows.retain(|(id, age)| !(*id == key.1 && *age <= cutoff));
        Ok(!vanished && rows.len() < before)
    }

    async fn count_entries(
        &self,
        policy: &RetentionPolicy,
        cutoff: Option<DateTime<Utc>>,
    ) -> DbResult<u64> {
        let state = self.state.lock().unwrap();
        let table = policy.entity_kind.as_str();
        if state.failing_queries.contains(table) {
            return Err(DbError::Internal(format!("no such table: {table}")));
        }
        Ok(state
            .tables
            .get(table)
            .into_iter()
            .flatten()
            .filter(|(_, age)| cutoff.is_none_or(|c| *age <= c))
            .count() as u64)
    }
}

pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> Result<DateTime<Utc>, RetentionError> {
        Ok(self.0)
    }
}

pub struct FailingClock;

impl Clock for FailingClock {
    fn now(&self) -> Result<DateTime<Utc>, RetentionError> {
        Err(RetentionError::Environment("system clock unavailable".into()))
    }
}
