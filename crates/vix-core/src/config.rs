//! Bridge configuration.

use crate::error::{Result, VixError};
use std::time::Duration;

/// Unit of the native `GUEST_PROGRAM_ELAPSED_TIME` job property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ElapsedUnit {
    /// Whole seconds, as documented for VIX hosts.
    #[default]
    Seconds,
    /// Milliseconds.
    Milliseconds,
}

impl ElapsedUnit {
    /// Parse from string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "s" | "sec" | "secs" | "seconds" => Some(Self::Seconds),
            "ms" | "millis" | "milliseconds" => Some(Self::Milliseconds),
            _ => None,
        }
    }

    /// Convert a raw native value. Negative values clamp to zero.
    pub fn to_duration(self, raw: i64) -> Duration {
        let raw = u64::try_from(raw).unwrap_or(0);
        match self {
            Self::Seconds => Duration::from_secs(raw),
            Self::Milliseconds => Duration::from_millis(raw),
        }
    }
}

/// Configuration shared by the completion bridge and the async waiters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BridgeConfig {
    /// How to interpret the elapsed-time result of a guest process.
    pub elapsed_unit: ElapsedUnit,
    /// Give up waiting for a guest process to exit after this long.
    ///
    /// The guest process keeps running and its record stays registered.
    pub process_timeout: Option<Duration>,
    /// Give up waiting for a native job after this long (default: wait forever).
    pub job_timeout: Option<Duration>,
}

impl BridgeConfig {
    /// Set the elapsed-time unit.
    pub fn elapsed_unit(mut self, unit: ElapsedUnit) -> Self {
        self.elapsed_unit = unit;
        self
    }

    /// Set the guest process wait timeout.
    pub fn process_timeout(mut self, timeout: Duration) -> Self {
        self.process_timeout = Some(timeout);
        self
    }

    /// Set the job wait timeout.
    pub fn job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `VIX_ELAPSED_UNIT` | `seconds` (`seconds`, `ms`) |
    /// | `VIX_PROCESS_TIMEOUT_SECS` | unset (wait forever) |
    /// | `VIX_JOB_TIMEOUT_SECS` | unset (wait forever) |
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("VIX_ELAPSED_UNIT") {
            config.elapsed_unit = ElapsedUnit::parse(&raw).ok_or_else(|| {
                VixError::Config(format!("VIX_ELAPSED_UNIT: unknown unit '{raw}'"))
            })?;
        }
        config.process_timeout = secs_from_env("VIX_PROCESS_TIMEOUT_SECS")?;
        config.job_timeout = secs_from_env("VIX_JOB_TIMEOUT_SECS")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.process_timeout == Some(Duration::ZERO) {
            return Err(VixError::Config("process_timeout must be > 0".into()));
        }
        if self.job_timeout == Some(Duration::ZERO) {
            return Err(VixError::Config("job_timeout must be > 0".into()));
        }
        Ok(())
    }
}

fn secs_from_env(name: &str) -> Result<Option<Duration>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|e| VixError::Config(format!("{name}: {e}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.elapsed_unit, ElapsedUnit::Seconds);
        assert!(config.process_timeout.is_none());
        assert!(config.job_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_elapsed_unit_parse() {
        assert_eq!(ElapsedUnit::parse("MS"), Some(ElapsedUnit::Milliseconds));
        assert_eq!(ElapsedUnit::parse("seconds"), Some(ElapsedUnit::Seconds));
        assert_eq!(ElapsedUnit::parse("hours"), None);
    }

    #[test]
    fn test_elapsed_unit_conversion() {
        assert_eq!(
            ElapsedUnit::Milliseconds.to_duration(500),
            Duration::from_millis(500)
        );
        assert_eq!(ElapsedUnit::Seconds.to_duration(3), Duration::from_secs(3));
        assert_eq!(ElapsedUnit::Seconds.to_duration(-1), Duration::ZERO);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = BridgeConfig::default().process_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_setters() {
        let config = BridgeConfig::default()
            .elapsed_unit(ElapsedUnit::Milliseconds)
            .process_timeout(Duration::from_secs(30))
            .job_timeout(Duration::from_secs(5));
        assert_eq!(config.elapsed_unit, ElapsedUnit::Milliseconds);
        assert_eq!(config.process_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.job_timeout, Some(Duration::from_secs(5)));
    }
}
