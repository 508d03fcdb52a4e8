//! SQL generation for retention queries.
//!
//! Table and column names come from validated [`Identifier`]s and are always
//! double-quoted; values are always bound as parameters. Identity columns are
//! compared as text so one statement shape works for integer, text and
//! timestamp keys on both SQLite and PostgreSQL.
//!
//! SQLite has no timestamp type. Airflow writes `2024-05-02 05:00:00.000000`
//! while sqlx binds `2024-05-02T00:00:00+00:00`, so ages are compared and
//! ordered through `julianday()` there rather than as text.
//!
//! [`Identifier`]: crate::models::Identifier

use crate::models::{ExpiredEntry, RetentionPolicy};

/// Column alias under which the age attribute is selected.
pub const AGE_ALIAS: &str = "age_value";

/// Column alias under which `COUNT(*)` is selected.
pub const COUNT_ALIAS: &str = "total";

/// Target database: bind parameter syntax and timestamp comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `?` binds, ages compared as Julian day numbers
    Sqlite,
    /// `$1`, `$2`, ... binds, native timestamp comparison
    Postgres,
}

impl Dialect {
    fn nth(self, n: usize) -> String {
        match self {
            Dialect::Sqlite => "?".to_string(),
            Dialect::Postgres => format!("${}", n),
        }
    }

    /// Sortable, comparable form of a timestamp column.
    fn timestamp(self, column: &str) -> String {
        match self {
            Dialect::Sqlite => format!("julianday({})", column),
            Dialect::Postgres => column.to_string(),
        }
    }

    /// `age <= cutoff` with the cutoff bound at position `n`.
    fn expired(self, age_column: &str, n: usize) -> String {
        match self {
            Dialect::Sqlite => format!("julianday({}) <= julianday(?)", age_column),
            Dialect::Postgres => format!("{} <= ${}", age_column, n),
        }
    }
}

/// Alias of the `index`-th identity column in [`select_expired`] results.
pub fn identity_alias(index: usize) -> String {
    format!("identity_{}", index)
}

/// `SELECT` listing expired entries. Binds: cutoff.
pub fn select_expired(policy: &RetentionPolicy, dialect: Dialect) -> String {
    let identity = policy
        .identity_columns
        .iter()
        .enumerate()
        .map(|(i, column)| {
            format!(
                "CAST({} AS TEXT) AS \"{}\"",
                column.quoted(),
                identity_alias(i)
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    let age = policy.age_attribute.quoted();

    format!(
        "SELECT {identity}, {age} AS \"{AGE_ALIAS}\" FROM {table} WHERE {expired} ORDER BY {order}",
        table = policy.entity_kind.quoted(),
        expired = dialect.expired(&age, 1),
        order = dialect.timestamp(&age),
    )
}

/// `DELETE` removing a single entry. Binds: cutoff, then every non-null
/// identity value in order (see [`delete_entry_binds`]).
pub fn delete_entry(
    policy: &RetentionPolicy,
    entry: &ExpiredEntry,
    dialect: Dialect,
) -> String {
    let mut sql = format!(
        "DELETE FROM {} WHERE {}",
        policy.entity_kind.quoted(),
        dialect.expired(&policy.age_attribute.quoted(), 1)
    );

    let mut next = 2;
    for (column, part) in policy
        .identity_columns
        .iter()
        .zip(entry.identity.values())
    {
        match part.value {
            Some(_) => {
                sql.push_str(&format!(
                    " AND CAST({} AS TEXT) = {}",
                    column.quoted(),
                    dialect.nth(next)
                ));
                next += 1;
            }
            None => sql.push_str(&format!(" AND {} IS NULL", column.quoted())),
        }
    }

    sql
}

/// Identity values to bind after the cutoff in [`delete_entry`].
pub fn delete_entry_binds(entry: &ExpiredEntry) -> impl Iterator<Item = &str> {
    entry
        .identity
        .values()
        .iter()
        .filter_map(|part| part.value.as_deref())
}

/// `SELECT COUNT(*)`, optionally restricted to expired entries.
/// Binds: cutoff when `expired_only`.
pub fn count_entries(
    policy: &RetentionPolicy,
    expired_only: bool,
    dialect: Dialect,
) -> String {
    let mut sql = format!(
        "SELECT COUNT(*) AS \"{}\" FROM {}",
        COUNT_ALIAS,
        policy.entity_kind.quoted()
    );
    if expired_only {
        sql.push_str(&format!(
            " WHERE {}",
            dialect.expired(&policy.age_attribute.quoted(), 1)
        ));
    }
    sql
}
