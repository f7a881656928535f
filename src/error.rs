//! Error types for runtime construction, serving, and fine-tuning.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ProviderKind;

/// A specialized Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Unified error type for all runtime operations.
///
/// The variants distinguish "fix your configuration" (`ConfigMismatch`,
/// `UnsupportedProvider`), "retry later" (`Load`, `Busy`), and "this specific
/// call failed" (`Generation`, `Training`) so callers can react without
/// string matching.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A runtime of one kind was requested from a config of another.
    #[error("configuration mismatch: {expected} runtime cannot be built from {actual} config")]
    ConfigMismatch {
        expected: ProviderKind,
        actual: ProviderKind,
    },

    /// Unknown provider tag.
    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),

    /// Resource acquisition failed; the runtime reverted to `Unloaded`.
    #[error("model load failed: {0}")]
    Load(#[source] anyhow::Error),

    /// An adapter resume path was supplied but does not hold a valid snapshot.
    #[error("adapter not found at {path}: {reason}")]
    AdapterNotFound { path: PathBuf, reason: String },

    /// Auto-load during a generate call failed.
    #[error("runtime not loaded: {0}")]
    NotLoaded(String),

    /// A single generation call failed; the runtime remains usable.
    #[error("generation failed: {0}")]
    Generation(#[source] anyhow::Error),

    /// A training job failed; the runtime remains `Ready` with the prior adapter.
    #[error("training failed: {0}")]
    Training(#[source] anyhow::Error),

    /// Operation temporarily refused due to a state conflict.
    #[error("runtime busy: {0}")]
    Busy(String),

    /// The runtime variant (or process configuration) has no training capability.
    #[error("training is not supported by this runtime")]
    TrainingUnsupported,
}

impl RuntimeError {
    /// Wrap a backend cause as a load failure.
    pub fn load<E: Into<anyhow::Error>>(cause: E) -> Self {
        RuntimeError::Load(cause.into())
    }

    /// Wrap a backend cause as a generation failure.
    pub fn generation<E: Into<anyhow::Error>>(cause: E) -> Self {
        RuntimeError::Generation(cause.into())
    }

    /// Wrap a backend cause as a training failure.
    pub fn training<E: Into<anyhow::Error>>(cause: E) -> Self {
        RuntimeError::Training(cause.into())
    }

    /// Whether the caller may reasonably retry the same operation later.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            RuntimeError::Load(_)
                | RuntimeError::NotLoaded(_)
                | RuntimeError::Busy(_)
                | RuntimeError::AdapterNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatch_message_names_both_kinds() {
        let err = RuntimeError::ConfigMismatch {
            expected: ProviderKind::Local,
            actual: ProviderKind::Remote,
        };
        let msg = err.to_string();
        assert!(msg.contains("local"));
        assert!(msg.contains("remote"));
    }

    #[test]
    fn retryable_classification() {
        assert!(RuntimeError::Busy("training in flight".into()).retryable());
        assert!(RuntimeError::load(anyhow::anyhow!("missing weights")).retryable());
        assert!(!RuntimeError::UnsupportedProvider("tpu".into()).retryable());
        assert!(!RuntimeError::TrainingUnsupported.retryable());
    }
}
