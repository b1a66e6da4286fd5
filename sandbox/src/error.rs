//! Error types for admission and execution plumbing.
//!
//! Faults raised *inside* a fragment are not errors here: they are reported
//! as an [`Outcome`](crate::Outcome). These variants cover what goes wrong
//! before a fragment runs, or in the pool around it.

use hotmod_overrides::Language;
use thiserror::Error;

/// Errors raised by the sandbox itself.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The fragment does not compile. Never cached.
    #[error("{language} compile error: {message}")]
    Compile { language: Language, message: String },

    /// The fragment exceeds the compile budget on the hot path.
    #[error("admission rejected: {reason}")]
    AdmissionRejected { reason: String },

    /// A fragment of a set failed while the set was being precompiled.
    #[error("fragment for {point}: {source}")]
    Fragment {
        point: String,
        #[source]
        source: Box<SandboxError>,
    },

    /// No engine is registered for the fragment's language.
    #[error("no engine for language: {0}")]
    UnsupportedLanguage(Language),

    /// Engine setup failed.
    #[error("engine error: {0}")]
    Engine(String),

    /// No execution unit could be obtained.
    #[error("execution unit unavailable: {0}")]
    Unavailable(String),
}

impl SandboxError {
    pub fn compile(language: Language, message: impl Into<String>) -> Self {
        SandboxError::Compile {
            language,
            message: message.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        SandboxError::AdmissionRejected {
            reason: reason.into(),
        }
    }
}

/// Result type alias for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;
