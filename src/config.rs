use std::time::Duration as StdDuration;

use anyhow::{bail, Context};
use chrono::{Duration, FixedOffset};
use clap::Args;

pub const IDLE_THRESHOLD_MINUTES: i64 = 30;
pub const IDLE_CHECK_INTERVAL_SECONDS: u64 = 60;
pub const DEADLINE_WINDOW_MINUTES: i64 = 60 * 6;
pub const DEADLINE_CHECK_INTERVAL_SECONDS: u64 = 300;
pub const ANOMALY_LOOKBACK_DAYS: i64 = 14;
pub const ANOMALY_DROP_PERCENT: f64 = 50.0;
pub const ANOMALY_CHECK_INTERVAL_SECONDS: u64 = 1800;
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = 330;

#[derive(Debug, Clone, PartialEq)]
pub struct IdleConfig {
    pub threshold: Duration,
    pub interval: StdDuration,
    pub suppression: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeadlineConfig {
    pub window: Duration,
    pub interval: StdDuration,
    pub suppression: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyConfig {
    pub lookback: Duration,
    pub drop_percent: f64,
    pub interval: StdDuration,
    pub suppression: Duration,
}

/// Static thresholds for the three detectors.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertConfig {
    pub idle: IdleConfig,
    pub deadline: DeadlineConfig,
    pub anomaly: AnomalyConfig,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            idle: IdleConfig {
                threshold: Duration::minutes(IDLE_THRESHOLD_MINUTES),
                interval: StdDuration::from_secs(IDLE_CHECK_INTERVAL_SECONDS),
                suppression: Duration::minutes(IDLE_THRESHOLD_MINUTES),
            },
            deadline: DeadlineConfig {
                window: Duration::minutes(DEADLINE_WINDOW_MINUTES),
                interval: StdDuration::from_secs(DEADLINE_CHECK_INTERVAL_SECONDS),
                suppression: Duration::minutes(DEADLINE_WINDOW_MINUTES) / 2,
            },
            anomaly: AnomalyConfig {
                lookback: Duration::days(ANOMALY_LOOKBACK_DAYS),
                drop_percent: ANOMALY_DROP_PERCENT,
                interval: StdDuration::from_secs(ANOMALY_CHECK_INTERVAL_SECONDS),
                suppression: Duration::seconds(ANOMALY_CHECK_INTERVAL_SECONDS as i64),
            },
        }
    }
}

/// Command-line / environment surface for [`AlertConfig`].
#[derive(Debug, Clone, Args)]
pub struct AlertSettings {
    /// Minutes without activity before a user counts as idle
    #[arg(long, env = "IDLE_THRESHOLD_MINUTES", default_value_t = IDLE_THRESHOLD_MINUTES)]
    pub idle_threshold_minutes: i64,

    /// Seconds between idle passes
    #[arg(long, env = "IDLE_CHECK_INTERVAL_SECONDS", default_value_t = IDLE_CHECK_INTERVAL_SECONDS)]
    pub idle_check_interval_seconds: u64,

    /// Minutes before the same user can be flagged idle again (defaults to the idle threshold)
    #[arg(long, env = "IDLE_SUPPRESSION_MINUTES")]
    pub idle_suppression_minutes: Option<i64>,

    /// Minutes ahead of a due date that a task is reported
    #[arg(long, env = "DEADLINE_WINDOW_MINUTES", default_value_t = DEADLINE_WINDOW_MINUTES)]
    pub deadline_window_minutes: i64,

    /// Seconds between deadline passes
    #[arg(long, env = "DEADLINE_CHECK_INTERVAL_SECONDS", default_value_t = DEADLINE_CHECK_INTERVAL_SECONDS)]
    pub deadline_check_interval_seconds: u64,

    /// Minutes before the same task is reported again (defaults to half the deadline window)
    #[arg(long, env = "DEADLINE_SUPPRESSION_MINUTES")]
    pub deadline_suppression_minutes: Option<i64>,

    /// Days examined by the anomaly detector, split into two halves
    #[arg(long, env = "ANOMALY_LOOKBACK_DAYS", default_value_t = ANOMALY_LOOKBACK_DAYS)]
    pub anomaly_lookback_days: i64,

    /// Minimum completion drop, in percent, that raises an anomaly
    #[arg(long, env = "ANOMALY_DROP_PERCENT", default_value_t = ANOMALY_DROP_PERCENT)]
    pub anomaly_drop_percent: f64,

    /// Seconds between anomaly passes
    #[arg(long, env = "ANOMALY_CHECK_INTERVAL_SECONDS", default_value_t = ANOMALY_CHECK_INTERVAL_SECONDS)]
    pub anomaly_check_interval_seconds: u64,

    /// Seconds before a manager hears about the same subject again (defaults to the anomaly interval)
    #[arg(long, env = "ANOMALY_SUPPRESSION_SECONDS")]
    pub anomaly_suppression_seconds: Option<i64>,
}

/// Upper bound for minute-based windows and thresholds: one year.
const MAX_WINDOW_MINUTES: i64 = 60 * 24 * 365;
/// Upper bound for the anomaly lookback: ten years.
const MAX_LOOKBACK_DAYS: i64 = 3650;
/// Upper bound for check intervals: one week.
const MAX_INTERVAL_SECONDS: u64 = 7 * 24 * 60 * 60;
const MAX_SUPPRESSION_SECONDS: i64 = MAX_WINDOW_MINUTES * 60;

impl AlertSettings {
    pub fn resolve(&self) -> anyhow::Result<AlertConfig> {
        let idle_threshold = minutes(
            "idle threshold",
            bounded("idle threshold", self.idle_threshold_minutes, 1, MAX_WINDOW_MINUTES)?,
        )?;
        let deadline_window = minutes(
            "deadline window",
            bounded("deadline window", self.deadline_window_minutes, 1, MAX_WINDOW_MINUTES)?,
        )?;
        let lookback_days =
            bounded("anomaly lookback", self.anomaly_lookback_days, 1, MAX_LOOKBACK_DAYS)?;
        let lookback = Duration::try_days(lookback_days)
            .with_context(|| format!("anomaly lookback of {lookback_days} days is out of range"))?;

        let idle_interval = interval("idle interval", self.idle_check_interval_seconds)?;
        let deadline_interval = interval("deadline interval", self.deadline_check_interval_seconds)?;
        let anomaly_interval = interval("anomaly interval", self.anomaly_check_interval_seconds)?;

        if !(self.anomaly_drop_percent > 0.0 && self.anomaly_drop_percent <= 100.0) {
            bail!(
                "anomaly drop percent must be within (0, 100], got {}",
                self.anomaly_drop_percent
            );
        }

        let idle_suppression = match self.idle_suppression_minutes {
            Some(value) => minutes(
                "idle suppression",
                bounded("idle suppression", value, 0, MAX_WINDOW_MINUTES)?,
            )?,
            None => idle_threshold,
        };
        let deadline_suppression = match self.deadline_suppression_minutes {
            Some(value) => minutes(
                "deadline suppression",
                bounded("deadline suppression", value, 0, MAX_WINDOW_MINUTES)?,
            )?,
            None => deadline_window / 2,
        };
        let anomaly_suppression = match self.anomaly_suppression_seconds {
            Some(value) => {
                let seconds =
                    bounded("anomaly suppression", value, 0, MAX_SUPPRESSION_SECONDS)?;
                Duration::try_seconds(seconds).with_context(|| {
                    format!("anomaly suppression of {seconds} seconds is out of range")
                })?
            }
            None => Duration::from_std(anomaly_interval).context("anomaly interval too large")?,
        };

        Ok(AlertConfig {
            idle: IdleConfig {
                threshold: idle_threshold,
                interval: idle_interval,
                suppression: idle_suppression,
            },
            deadline: DeadlineConfig {
                window: deadline_window,
                interval: deadline_interval,
                suppression: deadline_suppression,
            },
            anomaly: AnomalyConfig {
                lookback,
                drop_percent: self.anomaly_drop_percent,
                interval: anomaly_interval,
                suppression: anomaly_suppression,
            },
        })
    }
}

pub fn civil_timezone(offset_minutes: i32) -> anyhow::Result<FixedOffset> {
    offset_minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .with_context(|| format!("UTC offset of {offset_minutes} minutes is out of range"))
}

fn bounded(name: &str, value: i64, min: i64, max: i64) -> anyhow::Result<i64> {
    if value < min || value > max {
        bail!("{name} must be within [{min}, {max}], got {value}");
    }
    Ok(value)
}

fn minutes(name: &str, value: i64) -> anyhow::Result<Duration> {
    Duration::try_minutes(value)
        .with_context(|| format!("{name} of {value} minutes is out of range"))
}

fn interval(name: &str, seconds: u64) -> anyhow::Result<StdDuration> {
    if seconds == 0 || seconds > MAX_INTERVAL_SECONDS {
        bail!("{name} must be within [1, {MAX_INTERVAL_SECONDS}] seconds, got {seconds}");
    }
    Ok(StdDuration::from_secs(seconds))
}
