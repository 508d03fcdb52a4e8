//! Retention engine for workflow metadata stores.
//!
//! A run resolves one cutoff instant, publishes it once, then fans out one
//! cleanup unit per registered table:
//! 1. Resolve `now - max_age_days` from the trigger override or the default
//! 2. Query each table for rows whose age attribute is at or before the cutoff
//! 3. Delete matching rows one at a time, or only report them in dry-run mode
//! 4. Aggregate per-table outcomes into a run status and exit code
//!
//! A failing table never stops its siblings, and deletions already made are
//! not rolled back.

mod coordinator;
mod cutoff;
mod error;
mod inspect;
mod policy;
#[cfg(test)]
pub(crate) mod test_utils;
mod unit;
mod worker;

pub use coordinator::{RunCoordinator, RunOptions, RunResult, RunStatus};
pub use cutoff::{
    AgeSource, Clock, CutoffResult, CutoffSlot, DEFAULT_MAX_AGE_DAYS, MAX_AGE_DAYS_LIMIT,
    MAX_AGE_OVERRIDE_KEY, MaxAgeOverride, RunConfig, SystemClock, resolve_cutoff,
};
pub use error::RetentionError;
pub use inspect::{PolicyStats, inspect_policies};
pub use policy::{PolicyRegistry, RegistryError};
pub use unit::{CleanupOutcome, CleanupUnit, DeleteFailure, UnitStatus};
pub use worker::{log_run_result, start_retention_worker};
