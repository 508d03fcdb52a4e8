use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use crate::{
    db::{
        error::DbResult,
        repos::RetentionRepo,
        sql::{self, Dialect},
    },
    models::{EntryIdentity, ExpiredEntry, IdentityValue, RetentionPolicy},
};

pub struct SqliteRetentionRepo {
    pool: SqlitePool,
}

impl SqliteRetentionRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn entry_from_row(policy: &RetentionPolicy, row: &SqliteRow) -> DbResult<ExpiredEntry> {
        let values = policy
            .identity_columns
            .iter()
            .enumerate()
            .map(|(i, column)| {
                Ok(IdentityValue {
                    column: column.to_string(),
                    value: row.try_get(sql::identity_alias(i).as_str())?,
                })
            })
            .collect::<DbResult<Vec<_>>>()?;

        Ok(ExpiredEntry {
            identity: EntryIdentity::new(values),
            age: row.try_get(sql::AGE_ALIAS)?,
        })
    }
}

#[async_trait]
impl RetentionRepo for SqliteRetentionRepo {
    async fn ping(&self) -> DbResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn find_expired(
        &self,
        policy: &RetentionPolicy,
        cutoff: DateTime<Utc>,
    ) -> DbResult<Vec<ExpiredEntry>> {
        let statement = sql::select_expired(policy, Dialect::Sqlite);
        let rows = sqlx::query(&statement)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| Self::entry_from_row(policy, row))
            .collect()
    }

    async fn delete_entry(
        &self,
        policy: &RetentionPolicy,
        entry: &ExpiredEntry,
        cutoff: DateTime<Utc>,
    ) -> DbResult<bool> {
        let statement = sql::delete_entry(policy, entry, Dialect::Sqlite);
        let mut query = sqlx::query(&statement).bind(cutoff);
        for value in sql::delete_entry_binds(entry) {
            query = query.bind(value);
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_entries(
        &self,
        policy: &RetentionPolicy,
        cutoff: Option<DateTime<Utc>>,
    ) -> DbResult<u64> {
        let statement = sql::count_entries(policy, cutoff.is_some(), Dialect::Sqlite);
        let mut query = sqlx::query(&statement);
        if let Some(cutoff) = cutoff {
            query = query.bind(cutoff);
        }

        let row = query.fetch_one(&self.pool).await?;
        let total: i64 = row.try_get(sql::COUNT_ALIAS)?;
        Ok(total.max(0) as u64)
    }
}
