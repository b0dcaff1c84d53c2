use std::fmt;

use thiserror::Error;

use crate::browser::BrowserError;

/// Why a single resolution attempt ended without a manifest.
///
/// This is the reason code recorded on a [`ResolutionAttempt`](crate::resolver::ResolutionAttempt)
/// and consumed by the retry controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    ElementMissing,
    CaptchaDetected,
    ScriptNotFound,
    ManifestPatternNotFound,
    /// The browser collaborator failed in a way that is not a missing element
    /// (navigation error, dead session, script evaluation error).
    Browser,
    Enumeration,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ElementMissing => "element_missing",
            Self::CaptchaDetected => "captcha_detected",
            Self::ScriptNotFound => "script_not_found",
            Self::ManifestPatternNotFound => "manifest_pattern_not_found",
            Self::Browser => "browser",
            Self::Enumeration => "enumeration",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("required element missing: {what}")]
    ElementMissing { what: String },
    #[error("captcha shown in place of the player")]
    CaptchaDetected,
    #[error("no packed player script in frame")]
    ScriptNotFound,
    #[error("packed script found but no manifest source in it")]
    ManifestPatternNotFound,
    #[error("cannot read season/episode listing: {0}")]
    EnumerationFailure(String),
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ResolveError {
    pub fn element_missing(what: impl Into<String>) -> Self {
        Self::ElementMissing { what: what.into() }
    }

    /// Reason code for this error, as stored on a resolution attempt.
    pub fn reason(&self) -> FailureReason {
        match self {
            Self::ElementMissing { .. } => FailureReason::ElementMissing,
            Self::CaptchaDetected => FailureReason::CaptchaDetected,
            Self::ScriptNotFound => FailureReason::ScriptNotFound,
            Self::ManifestPatternNotFound => FailureReason::ManifestPatternNotFound,
            Self::EnumerationFailure(_) => FailureReason::Enumeration,
            Self::Browser(e) if e.is_not_found() => FailureReason::ElementMissing,
            Self::Browser(_) | Self::Io(_) => FailureReason::Browser,
        }
    }

    /// Whether another attempt on the same page may succeed.
    ///
    /// Every frame-traversal failure is retryable; enumeration failures and
    /// local io errors are not.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::EnumerationFailure(_) | Self::Io(_))
    }
}

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("transcoder exited with status {status}")]
    Exited { status: String },
    #[error("transcode cancelled")]
    Cancelled,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
