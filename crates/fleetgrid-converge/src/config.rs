//! Engine configuration (`fleetgrid.toml`).
//!
//! Durations are written as strings: `"500ms"`, `"5s"`, `"2m"`, `"1h"`, or
//! a plain number of seconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use fleetgrid_state::{MAX_ATTACHMENT_BATCH, MAX_PROTECTION_BATCH};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Poll interval bounds shared by every wait loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    #[serde(with = "duration_str")]
    pub min_interval: Duration,
    #[serde(with = "duration_str")]
    pub max_interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub attachment_batch_size: usize,
    pub protection_batch_size: usize,
    /// Zero means "do not wait for capacity".
    #[serde(with = "duration_str")]
    pub capacity_timeout: Duration,
    #[serde(with = "duration_str")]
    pub update_timeout: Duration,
    #[serde(with = "duration_str")]
    pub delete_timeout: Duration,
    #[serde(with = "duration_str")]
    pub refresh_start_timeout: Duration,
    #[serde(with = "duration_str")]
    pub refresh_cancel_timeout: Duration,
    /// Skip the failed-scaling-activity check while waiting for capacity.
    pub ignore_failed_scaling_activities: bool,
    pub poll: PollConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            attachment_batch_size: MAX_ATTACHMENT_BATCH,
            protection_batch_size: MAX_PROTECTION_BATCH,
            capacity_timeout: Duration::from_secs(10 * 60),
            update_timeout: Duration::from_secs(10 * 60),
            delete_timeout: Duration::from_secs(10 * 60),
            refresh_start_timeout: Duration::from_secs(15 * 60),
            refresh_cancel_timeout: Duration::from_secs(15 * 60),
            ignore_failed_scaling_activities: false,
            poll: PollConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll.min_interval.is_zero() {
            return Err(invalid("poll.min_interval", "must be greater than zero"));
        }
        if self.poll.max_interval < self.poll.min_interval {
            return Err(invalid("poll.max_interval", "must not be below poll.min_interval"));
        }
        if !(1..=MAX_ATTACHMENT_BATCH).contains(&self.attachment_batch_size) {
            return Err(invalid(
                "attachment_batch_size",
                format!("must be within 1..={MAX_ATTACHMENT_BATCH}"),
            ));
        }
        if !(1..=MAX_PROTECTION_BATCH).contains(&self.protection_batch_size) {
            return Err(invalid(
                "protection_batch_size",
                format!("must be within 1..={MAX_PROTECTION_BATCH}"),
            ));
        }
        for (field, value) in [
            ("update_timeout", self.update_timeout),
            ("delete_timeout", self.delete_timeout),
            ("refresh_cancel_timeout", self.refresh_cancel_timeout),
        ] {
            if value.is_zero() {
                return Err(invalid(field, "must be greater than zero"));
            }
        }
        // The start budget must cover at least one full cancellation wait.
        if self.refresh_start_timeout < self.refresh_cancel_timeout {
            return Err(invalid(
                "refresh_start_timeout",
                "must not be below refresh_cancel_timeout",
            ));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Parse a duration string like "5s", "500ms", "2m", "1h", or plain seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok()?.checked_mul(60).map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok()?.checked_mul(3600).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// Render a duration in the shortest unit that represents it exactly.
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms % 1000 != 0 {
        format!("{ms}ms")
    } else if ms % 3_600_000 == 0 && ms > 0 {
        format!("{}h", ms / 3_600_000)
    } else if ms % 60_000 == 0 && ms > 0 {
        format!("{}m", ms / 60_000)
    } else {
        format!("{}s", ms / 1000)
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw)
            .ok_or_else(|| de::Error::custom(format!("invalid duration {raw:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("soon"), None);
    }

    #[test]
    fn format_duration_picks_largest_exact_unit() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
        assert_eq!(format_duration(Duration::from_secs(90)), "90s");
        assert_eq!(format_duration(Duration::from_secs(600)), "10m");
        assert_eq!(format_duration(Duration::from_secs(7200)), "2h");
        assert_eq!(format_duration(Duration::ZERO), "0s");
    }

    #[test]
    fn empty_file_yields_defaults() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.refresh_start_timeout, Duration::from_secs(900));
    }

    #[test]
    fn parses_overrides() {
        let config = EngineConfig::from_toml(
            r#"
            capacity_timeout = "0s"
            attachment_batch_size = 5

            [poll]
            min_interval = "200ms"
            max_interval = "2s"
            "#,
        )
        .unwrap();
        assert!(config.capacity_timeout.is_zero());
        assert_eq!(config.attachment_batch_size, 5);
        assert_eq!(config.poll.min_interval, Duration::from_millis(200));
        assert_eq!(config.delete_timeout, Duration::from_secs(600));
    }

    #[test]
    fn rejects_oversized_batches() {
        let err = EngineConfig::from_toml("protection_batch_size = 51").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { field: "protection_batch_size", .. }
        ));
    }

    #[test]
    fn rejects_start_budget_below_cancel_budget() {
        let err = EngineConfig::from_toml(
            r#"
            refresh_start_timeout = "5m"
            refresh_cancel_timeout = "15m"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("refresh_start_timeout"));
    }

    #[test]
    fn rejects_bad_duration() {
        let err = EngineConfig::from_toml(r#"delete_timeout = "forever""#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn overflowing_duration_is_a_parse_error() {
        assert_eq!(parse_duration("307445734561825861m"), None);
        assert_eq!(parse_duration("5124095576030432h"), None);
        assert_eq!(
            parse_duration("5124095576030431h"),
            Some(Duration::from_secs(5_124_095_576_030_431 * 3600))
        );

        let err = EngineConfig::from_toml(r#"update_timeout = "307445734561825861m""#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn serializes_back_to_duration_strings() {
        let text = toml::to_string(&EngineConfig::default()).unwrap();
        assert!(text.contains(r#"capacity_timeout = "10m""#));
        assert_eq!(EngineConfig::from_toml(&text).unwrap(), EngineConfig::default());
    }
}
