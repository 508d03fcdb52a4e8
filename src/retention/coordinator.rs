use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use super::{
    CleanupOutcome, CleanupUnit, Clock, CutoffResult, CutoffSlot, PolicyRegistry,
    RetentionError, RunConfig, SystemClock, resolve_cutoff,
};
use crate::{db::RetentionRepo, models::RetentionPolicy, observability::metrics};

/// Concurrency and time limits for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Tables cleaned up at the same time.
    pub max_concurrent_units: usize,
    /// In-flight deletes per table.
    pub delete_concurrency: usize,
    /// Units not started within this time after the run began are recorded
    /// as not attempted. Units already running are left to finish.
    pub deadline: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_concurrent_units: 4,
            delete_concurrency: 1,
            deadline: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every unit handled every candidate.
    Succeeded,
    /// Every unit ran, some individual deletes failed.
    Degraded,
    /// At least one unit failed or was not attempted.
    Failed,
    /// The cutoff could not be resolved; no unit ran.
    Aborted,
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Degraded)
    }

    /// Process exit code reported to the scheduler.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Succeeded | RunStatus::Degraded => 0,
            RunStatus::Failed => 1,
            RunStatus::Aborted => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::Degraded => "degraded",
            RunStatus::Failed => "failed",
            RunStatus::Aborted => "aborted",
        }
    }
}

/// Terminal report of a run. Outcomes follow registry order.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub delete_enabled: bool,
    pub cutoff: Option<CutoffResult>,
    pub outcomes: Vec<CleanupOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal_error: Option<String>,
    pub duration_ms: u64,
}

impl RunResult {
    pub fn total_matched(&self) -> u64 {
        self.outcomes.iter().map(|o| o.matched_count).sum()
    }

    pub fn total_deleted(&self) -> u64 {
        self.outcomes.iter().map(|o| o.deleted_count).sum()
    }

    pub fn total_delete_errors(&self) -> usize {
        self.outcomes.iter().map(|o| o.errors.len()).sum()
    }

    pub fn failed_units(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_fatal()).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunPhase {
    Initialized,
    ResolvingCutoff,
    FanningOut,
    Aggregating,
    Completed,
    Aborted,
}

impl RunPhase {
    fn advance(&mut self, next: RunPhase) {
        let from = *self;
        tracing::debug!(from = ?from, to = ?next, "Run phase changed");
        *self = next;
    }
}

/// Runs the two phases of a retention run: resolve and publish one cutoff,
/// then clean up every registered table against it.
pub struct RunCoordinator {
    repo: Arc<dyn RetentionRepo>,
    clock: Arc<dyn Clock>,
    options: RunOptions,
}

impl RunCoordinator {
    pub fn new(repo: Arc<dyn RetentionRepo>) -> Self {
        Self {
            repo,
            clock: Arc::new(SystemClock),
            options: RunOptions::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Execute one run. Never fails: every problem is reported in the result.
    pub async fn run(&self, registry: &PolicyRegistry, config: &RunConfig) -> RunResult {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("retention_run", %run_id);
        self.execute(run_id, registry, config).instrument(span).await
    }

    async fn execute(
        &self,
        run_id: Uuid,
        registry: &PolicyRegistry,
        config: &RunConfig,
    ) -> RunResult {
        let started = Instant::now();
        let deadline_at = self.options.deadline.map(|d| started + d);
        let mut phase = RunPhase::Initialized;

        phase.advance(RunPhase::ResolvingCutoff);
        let slot = CutoffSlot::new();
        let cutoff = match self.resolve(&slot, config).await {
            Ok(cutoff) => cutoff,
            Err(error) => {
                phase.advance(RunPhase::Aborted);
                tracing::error!(error = %error, "Retention run aborted before cleanup");
                metrics::record_retention_run(RunStatus::Aborted.as_str());
                return RunResult {
                    run_id,
                    status: RunStatus::Aborted,
                    delete_enabled: config.delete_enabled,
                    cutoff: None,
                    outcomes: Vec::new(),
                    fatal_error: Some(error.to_string()),
                    duration_ms: elapsed_ms(started),
                };
            }
        };

        let policies = registry
            .list()
            .iter()
            .map(|p| format!("{}.{}", p.entity_kind, p.age_attribute))
            .collect::<Vec<_>>()
            .join(", ");
        tracing::info!(
            max_age_days = cutoff.max_age_days,
            source = ?cutoff.source,
            cutoff = %cutoff.cutoff,
            delete_enabled = config.delete_enabled,
            policies = %policies,
            "Retention configuration"
        );

        phase.advance(RunPhase::FanningOut);
        // The stream holds concrete unit futures, not a closure, so the run
        // future stays `Send` and can be spawned.
        let units: Vec<_> = registry
            .list()
            .iter()
            .map(|policy| self.run_unit(policy, cutoff, config.delete_enabled, deadline_at))
            .collect();
        let outcomes: Vec<CleanupOutcome> = stream::iter(units)
            .buffered(self.options.max_concurrent_units.max(1))
            .collect()
            .await;

        phase.advance(RunPhase::Aggregating);
        let status = if outcomes.iter().any(CleanupOutcome::is_fatal) {
            RunStatus::Failed
        } else if outcomes.iter().any(|o| !o.errors.is_empty()) {
            RunStatus::Degraded
        } else {
            RunStatus::Succeeded
        };

        let result = RunResult {
            run_id,
            status,
            delete_enabled: config.delete_enabled,
            cutoff: Some(cutoff.clone()),
            outcomes,
            fatal_error: None,
            duration_ms: elapsed_ms(started),
        };

        metrics::record_retention_run(status.as_str());
        phase.advance(RunPhase::Completed);
        result
    }

    /// Clean up one table, unless the run deadline passed before it started.
    async fn run_unit(
        &self,
        policy: &RetentionPolicy,
        cutoff: &CutoffResult,
        delete_enabled: bool,
        deadline_at: Option<Instant>,
    ) -> CleanupOutcome {
        if deadline_at.is_some_and(|deadline| Instant::now() >= deadline) {
            tracing::warn!(
                entity_kind = %policy.entity_kind,
                "Run deadline passed, not starting cleanup"
            );
            metrics::record_retention_unit_failure(policy.entity_kind.as_str());
            return CleanupOutcome::not_attempted(policy, delete_enabled);
        }
        CleanupUnit::new(self.repo.as_ref(), self.options.delete_concurrency)
            .execute(policy, cutoff, delete_enabled)
            .await
    }

    /// Obtain the time, check the store and publish the cutoff.
    async fn resolve<'s>(
        &self,
        slot: &'s CutoffSlot,
        config: &RunConfig,
    ) -> Result<&'s CutoffResult, RetentionError> {
        let now = self.clock.now()?;
        self.repo
            .ping()
            .await
            .map_err(|e| RetentionError::Environment(format!("metadata store unreachable: {e}")))?;

        slot.publish(resolve_cutoff(config, now))?;
        slot.get()
            .ok_or_else(|| RetentionError::Environment("cutoff was not published".into()))
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::{
        models::RetentionPolicy,
        retention::{
            AgeSource, MaxAgeOverride, UnitStatus,
            test_utils::{FailingClock, FixedClock, MemoryRetentionRepo, log_policy, policy},
        },
    };

    fn june_first() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn coordinator(repo: &Arc<MemoryRetentionRepo>) -> RunCoordinator {
        RunCoordinator::new(repo.clone()).with_clock(Arc::new(FixedClock(june_first())))
    }

    fn registry(policies: Vec<RetentionPolicy>) -> PolicyRegistry {
        PolicyRegistry::new(policies).unwrap()
    }

    fn seed_log(repo: &MemoryRetentionRepo) {
        repo.insert("log", "1", Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap());
        repo.insert("log", "2", Utc.with_ymd_and_hms(2024, 5, 15, 0, 0, 0).unwrap());
        repo.insert("log", "3", june_first());
    }

    #[tokio::test]
    async fn test_default_age_run_deletes_old_log_entries() {
        let repo = Arc::new(MemoryRetentionRepo::new());
        seed_log(&repo);

        let result = coordinator(&repo)
            .run(&registry(vec![log_policy()]), &RunConfig::default())
            .await;

        assert_eq!(result.status, RunStatus::Succeeded);
        let cutoff = result.cutoff.as_ref().unwrap();
        assert_eq!(cutoff.cutoff, Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap());
        assert_eq!(cutoff.source, AgeSource::Default);
        assert_eq!(result.outcomes.len(), 1);
        assert_eq!(result.outcomes[0].matched_count, 1);
        assert_eq!(result.outcomes[0].deleted_count, 1);
        assert_eq!(repo.ids("log"), ["2", "3"]);
    }

    #[tokio::test]
    async fn test_run_can_be_spawned() {
        let repo = Arc::new(MemoryRetentionRepo::new());
        seed_log(&repo);
        repo.insert("xcom", "9", Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap());
        let coordinator = coordinator(&repo).with_options(RunOptions {
            max_concurrent_units: 2,
            delete_concurrency: 2,
            deadline: None,
        });
        let registry = registry(vec![log_policy(), policy("xcom")]);

        let handle = tokio::spawn(async move {
            coordinator.run(&registry, &RunConfig::default()).await
        });
        let result = handle.await.unwrap();

        assert_eq!(result.status, RunStatus::Succeeded);
        assert_eq!(result.total_deleted(), 2);
        assert_eq!(repo.ids("log"), ["2", "3"]);
        assert!(repo.ids("xcom").is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_deletes_nothing() {
        let repo = Arc::new(MemoryRetentionRepo::new());
        seed_log(&repo);
        repo.insert("xcom", "9", Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap());

        let config = RunConfig::default().with_delete_enabled(false);
        let result = coordinator(&repo)
            .run(&registry(vec![log_policy(), policy("xcom")]), &config)
            .await;

        assert_eq!(result.status, RunStatus::Succeeded);
        assert!(!result.delete_enabled);
        assert_eq!(result.total_matched(), 2);
        assert!(result.outcomes.iter().all(|o| o.deleted_count == 0));
        assert_eq!(repo.ids("log"), ["1", "2", "3"]);
        assert_eq!(repo.ids("xcom"), ["9"]);
    }

    #[tokio::test]
    async fn test_zero_override_matches_entries_at_now() {
        let repo = Arc::new(MemoryRetentionRepo::new());
        seed_log(&repo);

        let config = RunConfig::default().with_override(MaxAgeOverride::Days(0));
        let result = coordinator(&repo)
            .run(&registry(vec![log_policy()]), &config)
            .await;

        let cutoff = result.cutoff.as_ref().unwrap();
        assert_eq!(cutoff.cutoff, june_first());
        assert_eq!(cutoff.source, AgeSource::Override);
        assert_eq!(result.outcomes[0].matched_count, 3);
        assert!(repo.ids("log").is_empty());
    }

    #[tokio::test]
    async fn test_failing_unit_does_not_affect_siblings() {
        let repo = Arc::new(MemoryRetentionRepo::new());
        seed_log(&repo);
        repo.insert("xcom", "1", Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        repo.fail_queries_for("xcom");

        let result = coordinator(&repo)
            .run(&registry(vec![log_policy(), policy("xcom")]), &RunConfig::default())
            .await;

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.status.exit_code(), 1);
        assert_eq!(result.outcomes[0].status, UnitStatus::Succeeded);
        assert_eq!(result.outcomes[0].deleted_count, 1);
        assert_eq!(result.outcomes[1].status, UnitStatus::Failed);
        assert_eq!(result.failed_units(), 1);
        // log deletions stay deleted
        assert_eq!(repo.ids("log"), ["2", "3"]);
    }

    #[tokio::test]
    async fn test_outcomes_follow_registry_order() {
        let repo = Arc::new(MemoryRetentionRepo::new());
        let tables = ["dag_run", "task_instance", "log", "xcom", "job", "sla_miss"];
        for table in tables {
            repo.insert(table, "1", Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
        }

        let result = coordinator(&repo)
            .with_options(RunOptions {
                max_concurrent_units: 3,
                delete_concurrency: 2,
                deadline: None,
            })
            .run(
                &registry(tables.iter().map(|t| policy(t)).collect()),
                &RunConfig::default(),
            )
            .await;

        let order: Vec<_> = result
            .outcomes
            .iter()
            .map(|o| o.policy.entity_kind.as_str())
            .collect();
        assert_eq!(order, tables);
        assert_eq!(result.total_deleted(), 6);
    }

    #[tokio::test]
    async fn test_second_run_matches_nothing() {
        let repo = Arc::new(MemoryRetentionRepo::new());
        seed_log(&repo);
        let coordinator = coordinator(&repo);
        let registry = registry(vec![log_policy()]);

        coordinator.run(&registry, &RunConfig::default()).await;
        let again = coordinator.run(&registry, &RunConfig::default()).await;

        assert_eq!(again.status, RunStatus::Succeeded);
        assert_eq!(again.total_matched(), 0);
    }

    #[tokio::test]
    async fn test_clock_failure_aborts_run() {
        let repo = Arc::new(MemoryRetentionRepo::new());
        seed_log(&repo);

        let result = RunCoordinator::new(repo.clone())
            .with_clock(Arc::new(FailingClock))
            .run(&registry(vec![log_policy()]), &RunConfig::default())
            .await;

        assert_eq!(result.status, RunStatus::Aborted);
        assert_eq!(result.status.exit_code(), 2);
        assert!(result.cutoff.is_none());
        assert!(result.outcomes.is_empty());
        assert!(result.fatal_error.unwrap().contains("clock"));
        assert_eq!(repo.ids("log"), ["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_unreachable_store_aborts_run() {
        let repo = Arc::new(MemoryRetentionRepo::new());
        repo.set_unreachable();

        let result = coordinator(&repo)
            .run(&registry(vec![log_policy()]), &RunConfig::default())
            .await;

        assert_eq!(result.status, RunStatus::Aborted);
        assert!(result.outcomes.is_empty());
        assert!(result.fatal_error.unwrap().contains("unreachable"));
    }

    #[tokio::test]
    async fn test_invalid_override_still_runs_with_default() {
        let repo = Arc::new(MemoryRetentionRepo::new());
        seed_log(&repo);

        let config = RunConfig::default().with_override(MaxAgeOverride::from_days(-3));
        let result = coordinator(&repo)
            .run(&registry(vec![log_policy()]), &config)
            .await;

        assert_eq!(result.status, RunStatus::Succeeded);
        let cutoff = result.cutoff.unwrap();
        assert_eq!(cutoff.max_age_days, 30);
        assert!(cutoff.fallback_reason.is_some());
    }

    #[tokio::test]
    async fn test_elapsed_deadline_marks_units_not_attempted() {
        let repo = Arc::new(MemoryRetentionRepo::new());
        seed_log(&repo);

        let result = coordinator(&repo)
            .with_options(RunOptions {
                deadline: Some(Duration::ZERO),
                ..Default::default()
            })
            .run(&registry(vec![log_policy(), policy("xcom")]), &RunConfig::default())
            .await;

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.outcomes.len(), 2);
        assert!(
            result
                .outcomes
                .iter()
                .all(|o| o.status == UnitStatus::NotAttempted)
        );
        assert_eq!(repo.ids("log"), ["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_delete_errors_degrade_but_succeed() {
        let repo = Arc::new(MemoryRetentionRepo::new());
        seed_log(&repo);
        repo.fail_delete_of("log", "1");

        let result = coordinator(&repo)
            .run(&registry(vec![log_policy()]), &RunConfig::default())
            .await;

        assert_eq!(result.status, RunStatus::Degraded);
        assert!(result.status.is_success());
        assert_eq!(result.status.exit_code(), 0);
        assert_eq!(result.total_delete_errors(), 1);
    }

    #[tokio::test]
    async fn test_run_result_json_report() {
        let repo = Arc::new(MemoryRetentionRepo::new());
        seed_log(&repo);

        let result = coordinator(&repo)
            .run(&registry(vec![log_policy()]), &RunConfig::default())
            .await;
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["status"], "succeeded");
        assert_eq!(json["cutoff"]["max_age_days"], 30);
        assert_eq!(json["cutoff"]["source"], "default");
        assert_eq!(json["outcomes"][0]["policy"]["entity_kind"], "log");
        assert_eq!(json["outcomes"][0]["matched_count"], 1);
        assert!(json.get("fatal_error").is_none());
    }
}
