use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    db::{
        error::DbResult,
        repos::RetentionRepo,
        sql::{self, Dialect},
    },
    models::{EntryIdentity, ExpiredEntry, IdentityValue, RetentionPolicy},
};

pub struct PostgresRetentionRepo {
    write_pool: PgPool,
    read_pool: PgPool,
}

impl PostgresRetentionRepo {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        let read_pool = read_pool.unwrap_or_else(|| write_pool.clone());
        Self {
            write_pool,
            read_pool,
        }
    }

    fn entry_from_row(policy: &RetentionPolicy, row: &PgRow) -> DbResult<ExpiredEntry> {
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

        // TIMESTAMPTZ decodes directly; TIMESTAMP columns are taken as UTC.
        let age = match row.try_get::<DateTime<Utc>, _>(sql::AGE_ALIAS) {
            Ok(age) => age,
            Err(_) => row
                .try_get::<NaiveDateTime, _>(sql::AGE_ALIAS)?
                .and_utc(),
        };

        Ok(ExpiredEntry {
            identity: EntryIdentity::new(values),
            age,
        })
    }
}

#[async_trait]
impl RetentionRepo for PostgresRetentionRepo {
    async fn ping(&self) -> DbResult<()> {
        sqlx::query("SELECT 1").execute(&self.write_pool).await?;
        Ok(())
    }

    async fn find_expired(
        &self,
        policy: &RetentionPolicy,
        cutoff: DateTime<Utc>,
    ) -> DbResult<Vec<ExpiredEntry>> {
        // Candidates come from the primary so the deletes that follow see the same rows.
        let statement = sql::select_expired(policy, Dialect::Postgres);
        let rows = sqlx::query(&statement)
            .bind(cutoff)
            .fetch_all(&self.write_pool)
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
        let statement = sql::delete_entry(policy, entry, Dialect::Postgres);
        let mut query = sqlx::query(&statement).bind(cutoff);
        for value in sql::delete_entry_binds(entry) {
            query = query.bind(value);
        }

        let result = query.execute(&self.write_pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_entries(
        &self,
        policy: &RetentionPolicy,
        cutoff: Option<DateTime<Utc>>,
    ) -> DbResult<u64> {
        let statement = sql::count_entries(policy, cutoff.is_some(), Dialect::Postgres);
        let mut query = sqlx::query(&statement);
        if let Some(cutoff) = cutoff {
            query = query.bind(cutoff);
        }

        let row = query.fetch_one(&self.read_pool).await?;
        let total: i64 = row.try_get(sql::COUNT_ALIAS)?;
        Ok(total.max(0) as u64)
    }
}
