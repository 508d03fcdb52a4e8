use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One identity column of an entry, with its value rendered as text.
///
/// `None` means the column is SQL `NULL`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityValue {
    pub column: String,
    pub value: Option<String>,
}

/// The natural identity of an entry, in the policy's identity column order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct EntryIdentity(Vec<IdentityValue>);

impl EntryIdentity {
    pub fn new(values: Vec<IdentityValue>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[IdentityValue] {
        &self.0
    }
}

impl fmt::Display for EntryIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match &part.value {
                Some(value) => write!(f, "{}={}", part.column, value)?,
                None => write!(f, "{}=NULL", part.column)?,
            }
        }
        Ok(())
    }
}

/// An entry whose age attribute is at or before the run's cutoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpiredEntry {
    pub identity: EntryIdentity,
    /// Value of the policy's age attribute for this entry.
    pub age: DateTime<Utc>,
}
