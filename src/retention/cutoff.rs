use std::sync::OnceLock;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use serde_json::Value;

use super::RetentionError;
use crate::config::RetentionConfig;

/// Trigger payload key carrying the per-run maximum age in days.
pub const MAX_AGE_OVERRIDE_KEY: &str = "maxDBEntryAgeInDays";

pub const DEFAULT_MAX_AGE_DAYS: u32 = 30;

/// Largest accepted maximum age, a little over 2700 years.
pub const MAX_AGE_DAYS_LIMIT: u32 = 1_000_000;

/// Per-run maximum age requested by the trigger.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MaxAgeOverride {
    /// No override supplied.
    #[default]
    Absent,
    Days(u32),
    /// An override was supplied but cannot be used. Holds the reason.
    Invalid(String),
}

impl MaxAgeOverride {
    /// Read the override from a trigger payload.
    ///
    /// Only [`MAX_AGE_OVERRIDE_KEY`] is recognized. Other keys are ignored.
    pub fn from_payload(payload: Option<&Value>) -> Self {
        let map = match payload {
            None | Some(Value::Null) => return Self::Absent,
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Self::Invalid(format!("payload must be a JSON object, got {other}"));
            }
        };

        for key in map.keys().filter(|k| *k != MAX_AGE_OVERRIDE_KEY) {
            tracing::debug!(key = %key, "Ignoring unrecognized trigger payload key");
        }

        match map.get(MAX_AGE_OVERRIDE_KEY) {
            None | Some(Value::Null) => Self::Absent,
            Some(Value::Number(n)) => match (n.as_u64(), n.as_i64()) {
                (Some(days), _) => Self::from_days(days as i128),
                (None, Some(days)) => Self::from_days(days as i128),
                _ => Self::Invalid(format!("{MAX_AGE_OVERRIDE_KEY} must be an integer, got {n}")),
            },
            // Operators often pass numbers as strings through trigger UIs
            Some(Value::String(s)) => match s.trim().parse::<i128>() {
                Ok(days) => Self::from_days(days),
                Err(_) => {
                    Self::Invalid(format!("{MAX_AGE_OVERRIDE_KEY} must be an integer, got {s:?}"))
                }
            },
            Some(other) => {
                Self::Invalid(format!("{MAX_AGE_OVERRIDE_KEY} must be an integer, got {other}"))
            }
        }
    }

    /// Parse a raw JSON trigger payload.
    pub fn from_json_str(payload: &str) -> Self {
        match serde_json::from_str::<Value>(payload) {
            Ok(value) => Self::from_payload(Some(&value)),
            Err(e) => Self::Invalid(format!("payload is not valid JSON: {e}")),
        }
    }

    /// Range-check a day count.
    pub fn from_days(days: i128) -> Self {
        if days < 0 {
            Self::Invalid(format!("{MAX_AGE_OVERRIDE_KEY} must not be negative, got {days}"))
        } else if days > MAX_AGE_DAYS_LIMIT as i128 {
            Self::Invalid(format!(
                "{MAX_AGE_OVERRIDE_KEY} must be at most {MAX_AGE_DAYS_LIMIT}, got {days}"
            ))
        } else {
            Self::Days(days as u32)
        }
    }
}

/// Settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub max_age_days: MaxAgeOverride,
    pub default_max_age_days: u32,
    pub delete_enabled: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_age_days: MaxAgeOverride::Absent,
            default_max_age_days: DEFAULT_MAX_AGE_DAYS,
            delete_enabled: true,
        }
    }
}

impl RunConfig {
    pub fn from_retention_config(config: &RetentionConfig) -> Self {
        Self {
            max_age_days: MaxAgeOverride::Absent,
            default_max_age_days: config.default_max_age_days,
            delete_enabled: config.delete_enabled,
        }
    }

    pub fn with_override(mut self, max_age_days: MaxAgeOverride) -> Self {
        self.max_age_days = max_age_days;
        self
    }

    pub fn with_delete_enabled(mut self, delete_enabled: bool) -> Self {
        self.delete_enabled = delete_enabled;
        self
    }
}

/// Where the effective maximum age came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeSource {
    Override,
    Default,
}

/// The run's single cutoff. Entries aged at or before `cutoff` are expired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CutoffResult {
    pub cutoff: DateTime<Utc>,
    pub resolved_at: DateTime<Utc>,
    pub max_age_days: u32,
    pub source: AgeSource,
    /// Why a supplied override was rejected, if it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

/// Compute the cutoff as `now` minus the effective maximum age in whole days.
///
/// An unusable override falls back to the default with a warning. This never
/// fails.
pub fn resolve_cutoff(config: &RunConfig, now: DateTime<Utc>) -> CutoffResult {
    let (max_age_days, source, fallback_reason) = match &config.max_age_days {
        MaxAgeOverride::Days(days) => (*days, AgeSource::Override, None),
        MaxAgeOverride::Absent => {
            tracing::info!(
                default_max_age_days = config.default_max_age_days,
                "{} not supplied, using default",
                MAX_AGE_OVERRIDE_KEY
            );
            (config.default_max_age_days, AgeSource::Default, None)
        }
        MaxAgeOverride::Invalid(reason) => {
            let error = RetentionError::Configuration(reason.clone());
            tracing::warn!(
                error = %error,
                default_max_age_days = config.default_max_age_days,
                "Ignoring max age override, using default"
            );
            (
                config.default_max_age_days,
                AgeSource::Default,
                Some(reason.clone()),
            )
        }
    };

    let cutoff = TimeDelta::try_days(i64::from(max_age_days))
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    CutoffResult {
        cutoff,
        resolved_at: now,
        max_age_days,
        source,
        fallback_reason,
    }
}

/// Source of the current time for cutoff resolution.
pub trait Clock: Send + Sync {
    fn now(&self) -> Result<DateTime<Utc>, RetentionError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Result<DateTime<Utc>, RetentionError> {
        Ok(Utc::now())
    }
}

/// Write-once holder for a run's cutoff.
///
/// Created fresh for every run, so concurrent runs never share a cutoff.
#[derive(Debug, Default)]
pub struct CutoffSlot {
    cell: OnceLock<CutoffResult>,
}

impl CutoffSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, result: CutoffResult) -> Result<(), RetentionError> {
        self.cell
            .set(result)
            .map_err(|_| RetentionError::CutoffAlreadyPublished)
    }

    pub fn get(&self) -> Option<&CutoffResult> {
        self.cell.get()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn june_first() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_default_cutoff() {
        let result = resolve_cutoff(&RunConfig::default(), june_first());
        assert_eq!(result.cutoff, Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap());
        assert_eq!(result.resolved_at, june_first());
        assert_eq!(result.max_age_days, 30);
        assert_eq!(result.source, AgeSource::Default);
        assert!(result.fallback_reason.is_none());
    }

    #[test]
    fn test_zero_override_cutoff_is_now() {
        let config = RunConfig::default().with_override(MaxAgeOverride::Days(0));
        let result = resolve_cutoff(&config, june_first());
        assert_eq!(result.cutoff, june_first());
        assert_eq!(result.source, AgeSource::Override);
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(30)]
    #[case(365)]
    #[case(MAX_AGE_DAYS_LIMIT)]
    fn test_cutoff_is_exactly_now_minus_days(#[case] days: u32) {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 13, 45, 10).unwrap();
        let config = RunConfig::default().with_override(MaxAgeOverride::Days(days));
        let result = resolve_cutoff(&config, now);
        assert_eq!(now - result.cutoff, TimeDelta::days(i64::from(days)));
    }

    #[test]
    fn test_cutoff_monotone_in_max_age() {
        let now = june_first();
        let cutoffs: Vec<_> = [0u32, 1, 7, 30, 90, 1000]
            .into_iter()
            .map(|d| {
                resolve_cutoff(
                    &RunConfig::default().with_override(MaxAgeOverride::Days(d)),
                    now,
                )
                .cutoff
            })
            .collect();
        assert!(cutoffs.windows(2).all(|w| w[0] > w[1]));
    }

    #[rstest]
    #[case(json!({"maxDBEntryAgeInDays": -5}))]
    #[case(json!({"maxDBEntryAgeInDays": "abc"}))]
    #[case(json!({"maxDBEntryAgeInDays": 2.5}))]
    #[case(json!({"maxDBEntryAgeInDays": true}))]
    #[case(json!({"maxDBEntryAgeInDays": 5_000_000}))]
    #[case(json!([7]))]
    fn test_invalid_override_falls_back(#[case] payload: Value) {
        let max_age = MaxAgeOverride::from_payload(Some(&payload));
        assert!(matches!(max_age, MaxAgeOverride::Invalid(_)), "{max_age:?}");

        let config = RunConfig {
            default_max_age_days: 10,
            ..Default::default()
        }
        .with_override(max_age);
        let result = resolve_cutoff(&config, june_first());
        assert_eq!(result.max_age_days, 10);
        assert_eq!(result.source, AgeSource::Default);
        assert!(result.fallback_reason.is_some());
    }

    #[rstest]
    #[case(json!({"maxDBEntryAgeInDays": 7}), MaxAgeOverride::Days(7))]
    #[case(json!({"maxDBEntryAgeInDays": "14"}), MaxAgeOverride::Days(14))]
    #[case(json!({"maxDBEntryAgeInDays": 0}), MaxAgeOverride::Days(0))]
    #[case(json!({"maxDBEntryAgeInDays": null}), MaxAgeOverride::Absent)]
    #[case(json!({"somethingElse": 3}), MaxAgeOverride::Absent)]
    #[case(json!({}), MaxAgeOverride::Absent)]
    #[case(Value::Null, MaxAgeOverride::Absent)]
    fn test_payload_parsing(#[case] payload: Value, #[case] expected: MaxAgeOverride) {
        assert_eq!(MaxAgeOverride::from_payload(Some(&payload)), expected);
    }

    #[test]
    fn test_payload_unknown_keys_ignored() {
        let max_age =
            MaxAgeOverride::from_json_str(r#"{"maxDBEntryAgeInDays": 3, "dryRun": true}"#);
        assert_eq!(max_age, MaxAgeOverride::Days(3));
    }

    #[test]
    fn test_malformed_json_payload() {
        assert!(matches!(
            MaxAgeOverride::from_json_str("{not json"),
            MaxAgeOverride::Invalid(_)
        ));
        assert_eq!(MaxAgeOverride::from_payload(None), MaxAgeOverride::Absent);
    }

    #[test]
    fn test_slot_publishes_once() {
        let slot = CutoffSlot::new();
        assert!(slot.get().is_none());

        let first = resolve_cutoff(&RunConfig::default(), june_first());
        slot.publish(first.clone()).unwrap();
        assert_eq!(slot.get(), Some(&first));

        let second = resolve_cutoff(
            &RunConfig::default().with_override(MaxAgeOverride::Days(1)),
            june_first(),
        );
        assert!(matches!(
            slot.publish(second),
            Err(RetentionError::CutoffAlreadyPublished)
        ));
        assert_eq!(slot.get(), Some(&first));
    }
}
