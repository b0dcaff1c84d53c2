//! [`BrowserSession`] over the Chrome DevTools Protocol.
//!
//! Frames are tracked as a stack of CDP frame ids. Every script runs in the
//! execution context of the frame on top of the stack, looked up again on
//! each call because the selection frame reloads itself when the player
//! changes.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::dom::DescribeNodeParams;
use chromiumoxide::cdp::browser_protocol::page::FrameId;
use chromiumoxide::cdp::js_protocol::runtime::{EvaluateParams, ExecutionContextId, RemoteObject};
use chromiumoxide::error::CdpError;
use chromiumoxide::page::{Page, ScreenshotParams};
use framewalk::{BrowserError, BrowserSession};
use futures::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, warn};

use crate::config::BrowserSettings;

pub struct ChromiumSession {
    browser: Browser,
    handler: JoinHandle<()>,
    page: Page,
    frames: Vec<FrameId>,
    poll_interval: Duration,
}

impl ChromiumSession {
    pub async fn launch(settings: &BrowserSettings, user_agent: &str) -> anyhow::Result<Self> {
        let mut builder = BrowserConfig::builder()
            .window_size(settings.window_width, settings.window_height)
            .arg("--disable-blink-features=AutomationControlled")
            // keeps the cross-origin player frame inside the page session
            .arg("--disable-site-isolation-trials")
            .arg("--disable-features=IsolateOrigins,site-per-process")
            .arg("--disable-dev-shm-usage")
            .arg("--mute-audio")
            .arg(format!("--user-agent={user_agent}"));
        if !settings.headless {
            builder = builder.with_head();
        }
        if let Some(executable) = &settings.executable {
            builder = builder.chrome_executable(executable);
        }
        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to launch browser: {e}"))?;
        let handler = tokio::spawn(async move {
            while handler.next().await.is_some() {}
        });
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create page: {e}"))?;
        debug!(headless = settings.headless, "Browser launched");

        Ok(Self {
            browser,
            handler,
            page,
            frames: Vec::new(),
            poll_interval: Duration::from_millis(settings.poll_interval_ms.max(10)),
        })
    }

    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!(error = %e, "Failed to close browser");
        }
        if let Err(e) = self.browser.wait().await {
            warn!(error = %e, "Failed to wait for browser exit");
        }
        self.handler.abort();
    }

    async fn context(&self) -> Result<Option<ExecutionContextId>, BrowserError> {
        let Some(frame) = self.frames.last() else {
            return Ok(None);
        };
        self.page
            .frame_execution_context(frame.clone())
            .await
            .map_err(protocol)?
            .map(Some)
            .ok_or_else(|| BrowserError::Frame(format!("frame {frame:?} has no execution context")))
    }

    async fn evaluate(&self, expression: String, by_value: bool) -> Result<RemoteObject, BrowserError> {
        let mut builder = EvaluateParams::builder()
            .expression(expression)
            .return_by_value(by_value)
            .await_promise(true);
        if let Some(context) = self.context().await? {
            builder = builder.context_id(context);
        }
        let params = builder.build().map_err(BrowserError::Script)?;

        let returns = self.page.execute(params).await.map_err(protocol)?.result;
        match returns.exception_details {
            Some(details) => Err(BrowserError::Script(details.text)),
            None => Ok(returns.result),
        }
    }

    async fn value(&self, expression: String) -> Result<Value, BrowserError> {
        Ok(self.evaluate(expression, true).await?.value.unwrap_or(Value::Null))
    }

    /// Polls `expression` until it evaluates to `true`. Evaluation errors
    /// while polling count as "not yet": frames come and go during loads.
    async fn wait_until(
        &self,
        expression: &str,
        what: &str,
        limit: Duration,
    ) -> Result<(), BrowserError> {
        let deadline = Instant::now() + limit;
        loop {
            match self.value(expression.to_string()).await {
                Ok(Value::Bool(true)) => return Ok(()),
                Ok(_) => {}
                Err(e) => debug!(what, error = %e, "Condition check failed"),
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::timeout(what, limit));
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn frame_id(&self, selector: &str) -> Result<FrameId, BrowserError> {
        let element = self
            .evaluate(format!("document.querySelector({})", quote(selector)), false)
            .await?;
        let object_id = element
            .object_id
            .ok_or_else(|| BrowserError::not_found(selector))?;

        let described = self
            .page
            .execute(DescribeNodeParams::builder().object_id(object_id).build())
            .await
            .map_err(protocol)?;
        described
            .result
            .node
            .frame_id
            .ok_or_else(|| BrowserError::Frame(format!("{selector} is not a frame owner")))
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate(&mut self, url: &str, limit: Duration) -> Result<(), BrowserError> {
        self.frames.clear();
        match timeout(limit, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(BrowserError::Navigation(e.to_string())),
            Err(_) => Err(BrowserError::timeout(format!("navigation to {url}"), limit)),
        }
    }

    async fn reload(&mut self, limit: Duration) -> Result<(), BrowserError> {
        self.frames.clear();
        match timeout(limit, self.page.reload()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(BrowserError::Navigation(e.to_string())),
            Err(_) => Err(BrowserError::timeout("page reload", limit)),
        }
    }

    async fn wait_for_element(&mut self, selector: &str, limit: Duration) -> Result<(), BrowserError> {
        let expression = format!("document.querySelector({}) !== null", quote(selector));
        self.wait_until(&expression, selector, limit).await
    }

    async fn wait_for_ready(&mut self, limit: Duration) -> Result<(), BrowserError> {
        self.wait_until("document.readyState === 'complete'", "document ready", limit)
            .await
    }

    async fn is_visible(&mut self, selector: &str, limit: Duration) -> Result<bool, BrowserError> {
        let expression = format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return false; \
             const style = getComputedStyle(el); \
             return style.display !== 'none' && style.visibility !== 'hidden' \
             && el.getClientRects().length > 0; }})()",
            quote(selector)
        );
        match self.wait_until(&expression, selector, limit).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn click(&mut self, selector: &str) -> Result<(), BrowserError> {
        let expression = format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return false; \
             el.click(); return true; }})()",
            quote(selector)
        );
        match self.value(expression).await? {
            Value::Bool(true) => Ok(()),
            _ => Err(BrowserError::not_found(selector)),
        }
    }

    async fn select_option(&mut self, selector: &str, value: &str) -> Result<(), BrowserError> {
        let expression = format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return false; \
             el.value = {}; \
             el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
             return true; }})()",
            quote(selector),
            quote(value)
        );
        match self.value(expression).await? {
            Value::Bool(true) => Ok(()),
            _ => Err(BrowserError::not_found(selector)),
        }
    }

    async fn input_value(&mut self, selector: &str) -> Result<Option<String>, BrowserError> {
        let expression = format!(
            "(() => {{ const el = document.querySelector({}); \
             return el ? String(el.value ?? '') : null; }})()",
            quote(selector)
        );
        Ok(self.value(expression).await?.as_str().map(str::to_string))
    }

    async fn attribute(&mut self, selector: &str, name: &str) -> Result<Option<String>, BrowserError> {
        let expression = format!(
            "(() => {{ const el = document.querySelector({}); \
             return el ? el.getAttribute({}) : null; }})()",
            quote(selector),
            quote(name)
        );
        Ok(self.value(expression).await?.as_str().map(str::to_string))
    }

    async fn enter_frame(&mut self, selector: &str, limit: Duration) -> Result<(), BrowserError> {
        let deadline = Instant::now() + limit;
        self.wait_for_element(selector, limit).await?;
        let frame_id = self.frame_id(selector).await?;
        self.frames.push(frame_id);

        // the frame owner can exist before its document has a context
        loop {
            match self.context().await {
                Ok(_) => break,
                Err(e) if Instant::now() >= deadline => {
                    self.frames.pop();
                    debug!(selector, error = %e, "Frame never got an execution context");
                    return Err(BrowserError::timeout(format!("frame {selector}"), limit));
                }
                Err(_) => sleep(self.poll_interval).await,
            }
        }
        debug!(selector, depth = self.frames.len(), "Entered frame");
        Ok(())
    }

    async fn exit_frame(&mut self) -> Result<(), BrowserError> {
        self.frames.pop();
        Ok(())
    }

    fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    async fn current_html(&mut self) -> Result<String, BrowserError> {
        let html = self
            .value(
                "document.documentElement ? document.documentElement.outerHTML : ''".to_string(),
            )
            .await?;
        Ok(html.as_str().unwrap_or_default().to_string())
    }

    async fn screenshot(&mut self, path: &Path) -> Result<(), BrowserError> {
        self.page
            .save_screenshot(ScreenshotParams::builder().full_page(true).build(), path)
            .await
            .map_err(protocol)?;
        Ok(())
    }
}

fn protocol(error: CdpError) -> BrowserError {
    BrowserError::Protocol(error.to_string())
}

/// JavaScript string literal for `value`.
fn quote(value: &str) -> String {
    Value::from(value).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_are_quoted_as_js_strings() {
        assert_eq!(
            quote("iframe[src*='streaming-serie-tv']"),
            r#""iframe[src*='streaming-serie-tv']""#
        );
        assert_eq!(quote(r#"a[title="x"]"#), r#""a[title=\"x\"]""#);
    }
}
