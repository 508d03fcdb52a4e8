use std::collections::HashSet;

use thiserror::Error;

use crate::models::RetentionPolicy;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("at least one retention policy is required")]
    Empty,

    #[error("entity kind '{0}' is registered more than once")]
    DuplicateEntityKind(String),

    #[error("policy for '{0}' has no identity columns")]
    NoIdentityColumns(String),
}

/// Ordered, read-only set of retention policies.
///
/// Order is processing order and result order. Entity kinds are unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRegistry {
    policies: Vec<RetentionPolicy>,
}

impl PolicyRegistry {
    pub fn new(policies: Vec<RetentionPolicy>) -> Result<Self, RegistryError> {
        if policies.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut seen = HashSet::new();
        for policy in &policies {
            if !seen.insert(policy.entity_kind.as_str()) {
                return Err(RegistryError::DuplicateEntityKind(
                    policy.entity_kind.to_string(),
                ));
            }
            if policy.identity_columns.is_empty() {
                return Err(RegistryError::NoIdentityColumns(
                    policy.entity_kind.to_string(),
                ));
            }
        }

        Ok(Self { policies })
    }

    /// The Airflow metadata tables that grow without bound.
    pub fn metastore_defaults() -> Self {
        Self {
            policies: vec![
                RetentionPolicy::from_static("dag_run", "execution_date", &["id"]),
                RetentionPolicy::from_static(
                    "task_instance",
                    "execution_date",
                    &["dag_id", "task_id", "execution_date"],
                ),
                RetentionPolicy::from_static("log", "dttm", &["id"]),
                RetentionPolicy::from_static(
                    "xcom",
                    "execution_date",
                    &["dag_id", "task_id", "execution_date", "key"],
                ),
                RetentionPolicy::from_static("job", "latest_heartbeat", &["id"]),
                RetentionPolicy::from_static(
                    "sla_miss",
                    "execution_date",
                    &["dag_id", "task_id", "execution_date"],
                ),
            ],
        }
    }

    pub fn list(&self) -> &[RetentionPolicy] {
        &self.policies
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
