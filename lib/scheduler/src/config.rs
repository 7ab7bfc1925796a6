//! Tunables left as implementation parameters for the coordinator.

use serde::Deserialize;

/// Configuration for one `SchedulerCore` instance.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound, in milliseconds, on how long the coordinator ever sleeps
    /// between heap checks, even with no entry due. A safety net against a
    /// missed wakeup signal stranding the coordinator asleep forever.
    #[serde(default = "default_max_sleep_millis")]
    pub max_coordinator_sleep_millis: u64,

    /// Whether a pool rejection should also be surfaced via `tracing::warn!`
    /// (it always reaches the configured `DiagnosticSink`; this additionally
    /// routes through `tracing` when the sink itself isn't `TracingSink`).
    #[serde(default = "default_true")]
    pub log_pool_rejections: bool,
}

fn default_max_sleep_millis() -> u64 {
    60_000
}

fn default_true() -> bool {
    true
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_coordinator_sleep_millis: default_max_sleep_millis(),
            log_pool_rejections: default_true(),
        }
    }
}

impl SchedulerConfig {
    /// Loads configuration from environment variables prefixed
    /// `SCHEDULER__`, the same convention `ServerConfig::from_env` uses.
    ///
    /// # Errors
    ///
    /// Returns an error if a present variable fails to parse.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .set_default("max_coordinator_sleep_millis", default_max_sleep_millis())?
            .set_default("log_pool_rejections", default_true())?
            .add_source(
                config::Environment::with_prefix("SCHEDULER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
