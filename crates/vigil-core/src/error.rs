//! Unified error types for vigil

use std::fmt;
use thiserror::Error;

/// Classification of a failed browser interaction.
///
/// Produced by the session layer so that callers branch on a discriminant
/// instead of the automation engine's message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The element or navigation did not become ready within its ceiling
    Timeout,
    /// The lookup completed but matched nothing
    NotFound,
    /// The element exists but rejects text assignment (checkbox, radio, ...)
    NotFillable,
    /// Any other engine or protocol failure
    Protocol,
}

impl FailureKind {
    /// Best-effort classification of raw engine text.
    ///
    /// Only for adapters whose engine does not expose structured errors.
    pub fn classify(raw: &str) -> Self {
        let lower = raw.to_lowercase();
        if raw.contains("Timeout") || lower.contains("timed out") || lower.contains("waiting for selector") {
            Self::Timeout
        } else if lower.contains("cannot be filled") {
            Self::NotFillable
        } else if lower.contains("not found") || lower.contains("no node") {
            Self::NotFound
        } else {
            Self::Protocol
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::NotFound => write!(f, "not_found"),
            Self::NotFillable => write!(f, "not_fillable"),
            Self::Protocol => write!(f, "protocol"),
        }
    }
}

/// A failed step-level browser interaction
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StepFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl StepFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NotFound, message)
    }

    pub fn not_fillable(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NotFillable, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Protocol, message)
    }

    /// Build a failure from raw engine text, classifying it on the way
    pub fn from_raw(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(FailureKind::classify(&message), message)
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == FailureKind::Timeout
    }
}

/// Unified error type for all vigil operations
#[derive(Error, Debug)]
pub enum VigilError {
    // Lookup errors
    #[error("Script not found: {0}")]
    ScriptNotFound(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Visual test not found: {0}")]
    VisualTestNotFound(String),

    // Execution errors
    #[error(transparent)]
    Step(#[from] StepFailure),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Invalid script: {0}")]
    InvalidScript(String),

    #[error("Invalid run transition: {0}")]
    InvalidTransition(String),

    // Healing errors
    #[error("Healing unavailable: {0}")]
    HealingUnavailable(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("API limit: {0}")]
    ApiLimit(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    // Visual errors
    #[error("Visual comparison failed: {0}")]
    VisualComparison(String),

    #[error("Nothing to approve: no latest image for {0}")]
    NothingToApprove(String),

    #[error("Image error: {0}")]
    Image(String),

    // Persistence errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl VigilError {
    /// Storage hiccups worth another attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Persistence(_))
    }
}

/// Result type alias using VigilError
pub type Result<T> = std::result::Result<T, VigilError>;
