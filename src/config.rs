use std::{str::FromStr, time::Duration};

use crate::{DebounceError, Result};

/// Quiet period used when the caller does not specify one.
pub const DEFAULT_DELAY_MS: u64 = 500;

/// Debouncer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceConfig {
    /// Quiet period that must elapse without a new call before the target runs.
    pub delay: Duration,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(DEFAULT_DELAY_MS),
        }
    }
}

impl DebounceConfig {
    /// Create config with an already validated delay.
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Create config from a millisecond count.
    ///
    /// Fails with [`DebounceError::Configuration`] when `millis` is negative,
    /// NaN or infinite. Fractional milliseconds are kept.
    pub fn from_millis(millis: f64) -> Result<Self> {
        if millis.is_nan() || millis.is_infinite() {
            return Err(DebounceError::Configuration(format!(
                "delay must be a finite number, got {}",
                millis
            )));
        }

        if millis < 0.0 {
            return Err(DebounceError::Configuration(format!(
                "delay must be non-negative, got {}",
                millis
            )));
        }

        Ok(Self {
            delay: Duration::from_nanos((millis * 1_000_000.0).round() as u64),
        })
    }

    /// Resolve an optional millisecond count, falling back to [`DEFAULT_DELAY_MS`].
    pub fn from_optional_millis(millis: Option<f64>) -> Result<Self> {
        match millis {
            Some(millis) => Self::from_millis(millis),
            None => Ok(Self::default()),
        }
    }
}

impl FromStr for DebounceConfig {
    type Err = DebounceError;

    /// Accepts a bare millisecond count (`"300"`) or a humantime duration
    /// (`"300ms"`, `"2s"`, `"1s 500ms"`).
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();

        if let Ok(millis) = s.parse::<f64>() {
            return Self::from_millis(millis);
        }

        let delay = humantime::parse_duration(s).map_err(|err| {
            DebounceError::Configuration(format!("invalid delay {:?}: {}", s, err))
        })?;

        Ok(Self { delay })
    }
}
