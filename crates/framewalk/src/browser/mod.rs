//! Browser automation collaborator.
//!
//! The resolver never talks to a browser engine directly. It drives a
//! [`BrowserSession`], which owns one page plus a stack of entered frames.
//! Every query runs against the frame on top of that stack.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[cfg(test)]
pub(crate) mod fake;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("element not found: {selector}")]
    NotFound { selector: String },
    #[error("timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("frame error: {0}")]
    Frame(String),
    #[error("script evaluation failed: {0}")]
    Script(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BrowserError {
    pub fn not_found(selector: impl Into<String>) -> Self {
        Self::NotFound {
            selector: selector.into(),
        }
    }

    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            after,
        }
    }

    /// The recoverable "expected element is not there (yet)" condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Timeout { .. })
    }
}

/// One browser page driven by the resolution pipeline.
///
/// Implementations hold exactly one frame-context stack; callers own the
/// session exclusively for the duration of an item.
#[async_trait]
pub trait BrowserSession: Send {
    /// Opens `url` in the top-level document and resets the frame stack.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), BrowserError>;

    /// Reloads the current top-level document and resets the frame stack.
    async fn reload(&mut self, timeout: Duration) -> Result<(), BrowserError>;

    /// Waits until `selector` matches an element in the current frame.
    async fn wait_for_element(&mut self, selector: &str, timeout: Duration)
    -> Result<(), BrowserError>;

    /// Waits until the current frame's document has finished loading.
    async fn wait_for_ready(&mut self, timeout: Duration) -> Result<(), BrowserError>;

    /// Whether `selector` becomes visible within `timeout`. Never fails on absence.
    async fn is_visible(&mut self, selector: &str, timeout: Duration) -> Result<bool, BrowserError>;

    async fn click(&mut self, selector: &str) -> Result<(), BrowserError>;

    /// Sets a `<select>` element to `value` and fires its change handlers.
    async fn select_option(&mut self, selector: &str, value: &str) -> Result<(), BrowserError>;

    /// Current value of a form control.
    async fn input_value(&mut self, selector: &str) -> Result<Option<String>, BrowserError>;

    async fn attribute(&mut self, selector: &str, name: &str)
    -> Result<Option<String>, BrowserError>;

    /// Waits for the iframe matched by `selector` and makes it the current frame.
    async fn enter_frame(&mut self, selector: &str, timeout: Duration) -> Result<(), BrowserError>;

    /// Pops the current frame. A no-op at the top-level document.
    async fn exit_frame(&mut self) -> Result<(), BrowserError>;

    /// Number of frames entered below the top-level document.
    fn frame_depth(&self) -> usize;

    /// Serialised HTML of the current frame's document.
    async fn current_html(&mut self) -> Result<String, BrowserError>;

    /// Full-page screenshot of the top-level document, written as PNG.
    async fn screenshot(&mut self, path: &Path) -> Result<(), BrowserError>;

    /// Unwinds every entered frame back to the top-level document.
    async fn exit_to_top(&mut self) -> Result<(), BrowserError> {
        while self.frame_depth() > 0 {
            self.exit_frame().await?;
        }
        Ok(())
    }
}
