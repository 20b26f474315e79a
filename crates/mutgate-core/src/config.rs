//! Pipeline configuration

use mutgate_executor::ExecutorOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Errors loading or validating a [`PipelineConfig`]
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("cannot read config {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config text is not valid TOML for this schema
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config could not be rendered as TOML
    #[error("cannot render config: {0}")]
    Render(#[from] toml::ser::Error),

    /// A value is out of range
    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Seconds in `d`, rounded up so a sub-second value never becomes zero
fn whole_secs(d: Duration) -> u64 {
    d.as_secs().saturating_add(u64::from(d.subsec_nanos() > 0))
}

/// Milliseconds in `d`, rounded up
fn whole_millis(d: Duration) -> u64 {
    let millis = u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
    millis.saturating_add(u64::from(d.subsec_nanos() % 1_000_000 > 0))
}

/// Pipeline configuration
///
/// Every field has a default, so a TOML file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// How long terminal records are kept before the id may be reused
    pub record_retention_secs: u64,
    /// Interval between housekeeping passes
    pub purge_interval_secs: u64,
    /// Gate holds older than this are forcibly released
    pub stale_gate_secs: u64,
    /// `Pending` records older than this are closed as rolled back
    pub stale_pending_secs: u64,
    /// Per-attempt remote I/O timeout (0 disables)
    pub remote_timeout_ms: u64,
    /// Probe the backend after an ambiguous connection loss
    pub reconcile_on_interrupt: bool,
}

impl PipelineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With record retention
    #[inline]
    #[must_use]
    pub fn with_record_retention(mut self, retention: Duration) -> Self {
        self.record_retention_secs = whole_secs(retention);
        self
    }

    /// With housekeeping interval
    #[inline]
    #[must_use]
    pub fn with_purge_interval(mut self, interval: Duration) -> Self {
        self.purge_interval_secs = whole_secs(interval);
        self
    }

    /// With stale gate threshold
    #[inline]
    #[must_use]
    pub fn with_stale_gate(mut self, threshold: Duration) -> Self {
        self.stale_gate_secs = whole_secs(threshold);
        self
    }

    /// With stale pending threshold
    #[inline]
    #[must_use]
    pub fn with_stale_pending(mut self, threshold: Duration) -> Self {
        self.stale_pending_secs = whole_secs(threshold);
        self
    }

    /// With per-attempt remote timeout
    #[inline]
    #[must_use]
    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout_ms = whole_millis(timeout);
        self
    }

    /// With reconciliation of ambiguous losses
    #[inline]
    #[must_use]
    pub fn with_reconciliation(mut self, enabled: bool) -> Self {
        self.reconcile_on_interrupt = enabled;
        self
    }

    /// Record retention
    #[inline]
    #[must_use]
    pub fn record_retention(&self) -> Duration {
        Duration::from_secs(self.record_retention_secs)
    }

    /// Housekeeping interval
    #[inline]
    #[must_use]
    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }

    /// Stale gate threshold
    #[inline]
    #[must_use]
    pub fn stale_gate(&self) -> Duration {
        Duration::from_secs(self.stale_gate_secs)
    }

    /// Stale pending threshold
    #[inline]
    #[must_use]
    pub fn stale_pending(&self) -> Duration {
        Duration::from_secs(self.stale_pending_secs)
    }

    /// Per-attempt remote timeout, if enabled
    #[inline]
    #[must_use]
    pub fn remote_timeout(&self) -> Option<Duration> {
        (self.remote_timeout_ms > 0).then(|| Duration::from_millis(self.remote_timeout_ms))
    }

    /// Options for a [`ClassifyingExecutor`](mutgate_executor::ClassifyingExecutor)
    #[must_use]
    pub fn executor_options(&self) -> ExecutorOptions {
        ExecutorOptions {
            io_timeout: self.remote_timeout(),
            reconcile_on_interrupt: self.reconcile_on_interrupt,
        }
    }

    /// Check value ranges
    ///
    /// # Errors
    /// `ConfigError::Invalid` for a zero interval or threshold
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.purge_interval_secs == 0 {
            return Err(ConfigError::Invalid("purge_interval_secs must be positive".into()));
        }
        if self.stale_gate_secs == 0 {
            return Err(ConfigError::Invalid("stale_gate_secs must be positive".into()));
        }
        if self.stale_pending_secs == 0 {
            return Err(ConfigError::Invalid("stale_pending_secs must be positive".into()));
        }
        Ok(())
    }

    /// Parse and validate TOML
    ///
    /// # Errors
    /// `ConfigError::Parse` or `ConfigError::Invalid`
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    ///
    /// # Errors
    /// `ConfigError::Io` if the file cannot be read, otherwise as
    /// [`from_toml_str`](Self::from_toml_str)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Render as TOML
    ///
    /// # Errors
    /// `ConfigError::Render` if serialization fails
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            record_retention_secs: 24 * 60 * 60,
            purge_interval_secs: 60,
            stale_gate_secs: 600,
            stale_pending_secs: 900,
            remote_timeout_ms: 30_000,
            reconcile_on_interrupt: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml_str("stale_gate_secs = 5\n").unwrap();
        assert_eq!(config.stale_gate(), Duration::from_secs(5));
        assert_eq!(config.record_retention_secs, PipelineConfig::default().record_retention_secs);
    }

    #[test]
    fn zero_interval_rejected() {
        let err = PipelineConfig::from_toml_str("purge_interval_secs = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn sub_second_builders_round_up() {
        let config = PipelineConfig::new()
            .with_purge_interval(Duration::from_millis(500))
            .with_stale_gate(Duration::from_millis(1500))
            .with_stale_pending(Duration::from_nanos(1))
            .with_record_retention(Duration::from_millis(10))
            .with_remote_timeout(Duration::from_micros(10));

        assert_eq!(config.purge_interval(), Duration::from_secs(1));
        assert_eq!(config.stale_gate(), Duration::from_secs(2));
        assert_eq!(config.stale_pending(), Duration::from_secs(1));
        assert_eq!(config.record_retention(), Duration::from_secs(1));
        assert_eq!(config.remote_timeout(), Some(Duration::from_millis(1)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_type_is_parse_error() {
        let err = PipelineConfig::from_toml_str("stale_gate_secs = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_remote_timeout_disables_it() {
        let config = PipelineConfig::new().with_remote_timeout(Duration::ZERO);
        assert_eq!(config.remote_timeout(), None);
        assert_eq!(config.executor_options().io_timeout, None);
    }

    #[test]
    fn toml_round_trip() {
        let config = PipelineConfig::new()
            .with_record_retention(Duration::from_secs(30))
            .with_reconciliation(true);
        let text = config.to_toml_string().unwrap();
        assert_eq!(PipelineConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn from_file_reports_path() {
        let err = PipelineConfig::from_file("/nonexistent/mutgate.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/mutgate.toml"));
    }
}
