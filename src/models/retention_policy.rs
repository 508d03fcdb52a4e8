use std::{fmt, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

static IDENTIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").unwrap()
});

/// A validated SQL identifier naming a table or a column.
///
/// Accepts a bare name (`dag_run`) or a schema-qualified one (`airflow.dag_run`).
/// Because every identifier is checked against a strict pattern, it can be
/// interpolated into generated SQL once quoted with [`Identifier::quoted`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    pub fn parse(value: impl Into<String>) -> Result<Self, String> {
        let value = value.into();
        if IDENTIFIER_RE.is_match(&value) {
            Ok(Self(value))
        } else {
            Err(format!(
                "Invalid identifier '{}': expected letters, digits and underscores, \
                 optionally qualified as schema.name",
                value
            ))
        }
    }

    /// Build an identifier from a literal known to be valid.
    pub(crate) fn from_static(value: &'static str) -> Self {
        debug_assert!(IDENTIFIER_RE.is_match(value), "invalid identifier: {value}");
        Self(value.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted form, quoting each part of a qualified name separately.
    pub fn quoted(&self) -> String {
        self.0
            .split('.')
            .map(|part| format!("\"{}\"", part))
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Identifier {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self {
        value.0
    }
}

/// Describes one prunable table: which table, which timestamp column decides
/// an entry's age, and which columns identify an entry.
///
/// Policies are plain data. Every table is cleaned up by the same code path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct RetentionPolicy {
    /// Table holding the entries subject to retention.
    pub entity_kind: Identifier,

    /// Timestamp column compared against the run's cutoff.
    pub age_attribute: Identifier,

    /// Columns that together identify a single entry.
    /// Used when reporting candidates and when deleting them one by one.
    pub identity_columns: Vec<Identifier>,
}

impl RetentionPolicy {
    pub fn new(
        entity_kind: &str,
        age_attribute: &str,
        identity_columns: &[&str],
    ) -> Result<Self, String> {
        Ok(Self {
            entity_kind: Identifier::parse(entity_kind)?,
            age_attribute: Identifier::parse(age_attribute)?,
            identity_columns: identity_columns
                .iter()
                .map(|c| Identifier::parse(*c))
                .collect::<Result<_, _>>()?,
        })
    }

    pub(crate) fn from_static(
        entity_kind: &'static str,
        age_attribute: &'static str,
        identity_columns: &[&'static str],
    ) -> Self {
        Self {
            entity_kind: Identifier::from_static(entity_kind),
            age_attribute: Identifier::from_static(age_attribute),
            identity_columns: identity_columns
                .iter()
                .map(|c| Identifier::from_static(c))
                .collect(),
        }
    }
}
