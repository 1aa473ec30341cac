//! Top-level error types for KubeFreezer.

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Cron(#[from] CronError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Exemption(#[from] ExemptionError),

    #[error(transparent)]
    Evaluator(#[from] EvaluatorError),

    #[error(transparent)]
    Watcher(#[from] WatcherError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Cron expression parse and evaluation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CronError {
    /// A cron expression failed to parse. `field` is the 0-based index
    /// (minute, hour, day-of-month, month, day-of-week) of the offending
    /// field, when identifiable.
    #[error("invalid cron expression {expr:?}: {reason} (field {field:?})")]
    InvalidCron {
        expr: String,
        field: Option<usize>,
        reason: String,
    },

    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),
}

/// Configuration object parsing and validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required config key: {0}")]
    MissingKey(String),

    #[error("failed to parse config value for {key}: {reason}")]
    ParseValue { key: String, reason: String },

    #[error("failed to load config source: {0}")]
    SourceUnavailable(String),
}

/// Schedule definition validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ScheduleError {
    #[error("schedule {name:?} is missing both a window and a cron expression")]
    Unspecified { name: String },

    #[error("schedule {name:?} has end <= start")]
    NonPositiveWindow { name: String },

    #[error(transparent)]
    Cron(#[from] CronError),

    #[error("schedule {name:?} not found")]
    NotFound { name: String },
}

/// Exemption creation and lookup errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExemptionError {
    #[error("exemption duration must be positive")]
    NonPositiveDuration,

    #[error("exemption namespace must not be empty")]
    EmptyNamespace,

    #[error("exemption would already be expired at creation")]
    AlreadyExpired,

    #[error("exemption {id:?} not found")]
    NotFound { id: String },
}

/// Errors surfaced by the policy evaluator itself (as opposed to a deny
/// decision, which is not an error).
#[derive(Debug, Clone, thiserror::Error)]
pub enum EvaluatorError {
    #[error("exemption store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("evaluation exceeded its deadline")]
    Timeout,
}

/// Config watcher subscription errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WatcherError {
    #[error("config event stream disconnected: {0}")]
    StreamDisconnected(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
