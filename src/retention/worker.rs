//! Scheduled retention worker.
//!
//! Runs the retention coordinator at a fixed interval with the configured
//! default max age. A failed run is logged and counted; the loop keeps going.

use std::sync::Arc;

use super::{PolicyRegistry, RunCoordinator, RunResult, RunStatus};
use crate::{config::RetentionConfig, db::DbPool};

/// Starts the retention worker.
///
/// The worker runs in a loop at the configured interval.
/// It will run indefinitely until the task is cancelled.
pub async fn start_retention_worker(
    db: Arc<DbPool>,
    config: RetentionConfig,
    registry: PolicyRegistry,
) {
    let dry_run_msg = if config.delete_enabled {
        ""
    } else {
        " (DRY RUN)"
    };

    tracing::info!(
        interval_hours = config.interval_hours,
        default_max_age_days = config.default_max_age_days,
        policies = registry.len(),
        max_concurrent_units = config.max_concurrent_units,
        delete_enabled = config.delete_enabled,
        "Starting retention worker{}",
        dry_run_msg
    );

    let coordinator = RunCoordinator::new(db.retention()).with_options(config.run_options());
    let run_config = config.run_config();
    let interval = config.interval();

    if !config.run_on_start {
        tokio::time::sleep(interval).await;
    }

    loop {
        let result = coordinator.run(&registry, &run_config).await;
        log_run_result(&result);

        tokio::time::sleep(interval).await;
    }
}

/// Log a one-line summary of a finished run at a level matching its status.
pub fn log_run_result(result: &RunResult) {
    let dry_run_msg = if result.delete_enabled {
        ""
    } else {
        " (DRY RUN)"
    };

    match result.status {
        RunStatus::Succeeded if result.total_matched() == 0 => {
            tracing::debug!(run_id = %result.run_id, "Retention run complete, no entries to delete");
        }
        RunStatus::Succeeded | RunStatus::Degraded => {
            tracing::info!(
                run_id = %result.run_id,
                status = result.status.as_str(),
                matched = result.total_matched(),
                deleted = result.total_deleted(),
                delete_errors = result.total_delete_errors(),
                duration_ms = result.duration_ms,
                "Retention run complete{}",
                dry_run_msg
            );
        }
        RunStatus::Failed => {
            tracing::error!(
                run_id = %result.run_id,
                failed_units = result.failed_units(),
                matched = result.total_matched(),
                deleted = result.total_deleted(),
                duration_ms = result.duration_ms,
                "Retention run failed{}",
                dry_run_msg
            );
        }
        RunStatus::Aborted => {
            tracing::error!(
                run_id = %result.run_id,
                error = result.fatal_error.as_deref().unwrap_or("unknown"),
                "Retention run aborted"
            );
        }
    }
}
