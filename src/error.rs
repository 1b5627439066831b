use camino::Utf8PathBuf;
use thiserror::Error;

use crate::issue::SyncIssue;

pub use anyhow::Error as RuntimeError;

pub type Result<T, E = DroidGraphError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DroidGraphError {
    #[error(transparent)]
    Task(#[from] TaskError),

    #[error("Error while using the build cache:\n{0}")]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Build finished with failing hooks:\n{0}")]
    Session(#[from] SessionError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors raised by the task registry while the graph is being wired.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task '{0}' is already registered")]
    Duplicate(String),

    #[error("Task '{0}' cannot depend on itself")]
    SelfDependency(String),

    #[error("Cycle detected in task graph at '{0}'")]
    Cycle(String),

    #[error("Task '{0}' not found")]
    NotFound(String),

    #[error("Variant '{variant}' read slot {slot} before it was written")]
    ReadBeforeWrite { variant: String, slot: String },

    #[error("Variant '{variant}' cannot set slot {slot}: its stage is already complete")]
    StageCompleted { variant: String, slot: String },

    #[error("Variant '{variant}' cannot set slot {slot} before its stage started")]
    StageNotReached { variant: String, slot: String },

    #[error("Variant '{variant}' is at stage {current}, cannot complete {stage}")]
    StageOrder {
        variant: String,
        stage: String,
        current: String,
    },

    #[error("Variant '{variant}' already has a task in slot {slot}")]
    SlotTaken { variant: String, slot: String },
}

/// Configuration problems found while building the graph. These always abort
/// graph construction before any task runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    SyncIssue(Box<SyncIssue>),

    #[error("Couldn't parse configuration.\n{0}")]
    Toml(#[from] toml::de::Error),

    #[error("Couldn't read configuration file '{path}'.\n{source}")]
    Read {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Couldn't serialize report.\n{0}")]
    Json(#[from] serde_json::Error),

    #[error("Couldn't determine the home directory for the build cache")]
    NoHomeDir,
}

impl From<SyncIssue> for ConfigError {
    fn from(issue: SyncIssue) -> Self {
        ConfigError::SyncIssue(Box::new(issue))
    }
}

impl From<SyncIssue> for DroidGraphError {
    fn from(issue: SyncIssue) -> Self {
        DroidGraphError::Config(issue.into())
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Couldn't read archive '{path}'.\n{source}")]
    Zip {
        path: Utf8PathBuf,
        source: zip::result::ZipError,
    },

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Cache entry '{key}' could not be created.\n{source}")]
    Creator { key: String, source: anyhow::Error },

    #[error("Archive '{0}' contains an entry escaping the destination")]
    UnsafeEntry(String),

    #[error("Build cache lock for '{0}' was poisoned")]
    Poisoned(String),

    #[error("Output '{output}' must not overlap the cache directory '{cache}'")]
    OutputInCache {
        output: Utf8PathBuf,
        cache: Utf8PathBuf,
    },

    #[error(transparent)]
    Pattern(#[from] glob::PatternError),
}

#[derive(Debug, Error)]
#[error("{}", format_hooks(.0))]
pub struct SessionError(pub Vec<(String, anyhow::Error)>);

fn format_hooks(failures: &[(String, anyhow::Error)]) -> String {
    failures
        .iter()
        .map(|(name, err)| format!("hook '{name}': {err}"))
        .collect::<Vec<_>>()
        .join("\n")
}
