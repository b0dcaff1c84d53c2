//! Scripted in-memory browser for driving the resolver in tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use super::{BrowserError, BrowserSession};

/// One rendered document: the elements it contains and the frames below it.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeDocument {
    elements: HashSet<String>,
    visible: HashSet<String>,
    values: HashMap<String, String>,
    attributes: HashMap<(String, String), String>,
    frames: HashMap<String, FakeDocument>,
    html: String,
    /// Document that replaces this one once an option is selected.
    reloaded: Option<Box<FakeDocument>>,
    stalled: HashSet<String>,
}

impl FakeDocument {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_element(mut self, selector: &str) -> Self {
        self.elements.insert(selector.to_string());
        self
    }

    pub(crate) fn with_visible(mut self, selector: &str) -> Self {
        self.elements.insert(selector.to_string());
        self.visible.insert(selector.to_string());
        self
    }

    pub(crate) fn with_value(mut self, selector: &str, value: &str) -> Self {
        self.elements.insert(selector.to_string());
        self.values.insert(selector.to_string(), value.to_string());
        self
    }

    pub(crate) fn with_attribute(mut self, selector: &str, name: &str, value: &str) -> Self {
        self.elements.insert(selector.to_string());
        self.attributes
            .insert((selector.to_string(), name.to_string()), value.to_string());
        self
    }

    pub(crate) fn with_frame(mut self, selector: &str, frame: FakeDocument) -> Self {
        self.elements.insert(selector.to_string());
        self.frames.insert(selector.to_string(), frame);
        self
    }

    pub(crate) fn with_html(mut self, html: impl Into<String>) -> Self {
        self.html = html.into();
        self
    }

    /// A frame owner whose document never finishes loading.
    pub(crate) fn with_stalled_frame(mut self, selector: &str) -> Self {
        self.elements.insert(selector.to_string());
        self.stalled.insert(selector.to_string());
        self
    }

    /// Selecting any option reloads this document as `document`.
    pub(crate) fn reloads_on_select(mut self, document: FakeDocument) -> Self {
        self.reloaded = Some(Box::new(document));
        self
    }
}

/// Serves scripted documents per URL. Each load of a URL consumes the next
/// queued document; the last one is repeated once the queue runs dry.
#[derive(Debug, Default)]
pub(crate) struct FakeBrowser {
    pages: HashMap<String, VecDeque<FakeDocument>>,
    current_url: Option<String>,
    stack: Vec<FakeDocument>,
    log: Vec<String>,
    screenshots: Vec<PathBuf>,
}

impl FakeBrowser {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_page(mut self, url: &str, document: FakeDocument) -> Self {
        self.pages
            .entry(url.to_string())
            .or_default()
            .push_back(document);
        self
    }

    pub(crate) fn log(&self) -> &[String] {
        &self.log
    }

    pub(crate) fn screenshots(&self) -> &[PathBuf] {
        &self.screenshots
    }

    fn count(&self, prefix: &str) -> usize {
        self.log.iter().filter(|e| e.starts_with(prefix)).count()
    }

    pub(crate) fn navigations(&self) -> usize {
        self.count("navigate ")
    }

    pub(crate) fn reloads(&self) -> usize {
        self.count("reload")
    }

    fn load(&mut self, url: &str) -> Result<(), BrowserError> {
        self.stack.clear();
        self.current_url = Some(url.to_string());
        let queue = self
            .pages
            .get_mut(url)
            .ok_or_else(|| BrowserError::Navigation(format!("no route to {url}")))?;
        let document = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        let document =
            document.ok_or_else(|| BrowserError::Navigation(format!("no route to {url}")))?;
        self.stack.push(document);
        Ok(())
    }

    fn current(&self) -> Result<&FakeDocument, BrowserError> {
        self.stack
            .last()
            .ok_or_else(|| BrowserError::Frame("no document loaded".into()))
    }

    fn current_mut(&mut self) -> Result<&mut FakeDocument, BrowserError> {
        self.stack
            .last_mut()
            .ok_or_else(|| BrowserError::Frame("no document loaded".into()))
    }

    fn require(&self, selector: &str) -> Result<&FakeDocument, BrowserError> {
        let document = self.current()?;
        if document.elements.contains(selector) {
            Ok(document)
        } else {
            Err(BrowserError::not_found(selector))
        }
    }
}

#[async_trait]
impl BrowserSession for FakeBrowser {
    async fn navigate(&mut self, url: &str, _timeout: Duration) -> Result<(), BrowserError> {
        self.log.push(format!("navigate {url}"));
        self.load(url)
    }

    async fn reload(&mut self, _timeout: Duration) -> Result<(), BrowserError> {
        self.log.push("reload".into());
        let url = self
            .current_url
            .clone()
            .ok_or_else(|| BrowserError::Navigation("nothing to reload".into()))?;
        self.load(&url)
    }

    async fn wait_for_element(
        &mut self,
        selector: &str,
        _timeout: Duration,
    ) -> Result<(), BrowserError> {
        self.require(selector).map(|_| ())
    }

    async fn wait_for_ready(&mut self, _timeout: Duration) -> Result<(), BrowserError> {
        self.current().map(|_| ())
    }

    async fn is_visible(&mut self, selector: &str, _timeout: Duration) -> Result<bool, BrowserError> {
        Ok(self.current()?.visible.contains(selector))
    }

    async fn click(&mut self, selector: &str) -> Result<(), BrowserError> {
        self.require(selector)?;
        self.log.push(format!("click {selector}"));
        Ok(())
    }

    async fn select_option(&mut self, selector: &str, value: &str) -> Result<(), BrowserError> {
        self.require(selector)?;
        self.log.push(format!("select {selector}={value}"));
        let current = self.current_mut()?;
        match current.reloaded.take() {
            Some(reloaded) => {
                *current = *reloaded;
                self.log.push("frame reloaded".into());
            }
            None => {
                current
                    .values
                    .insert(selector.to_string(), value.to_string());
            }
        }
        Ok(())
    }

    async fn input_value(&mut self, selector: &str) -> Result<Option<String>, BrowserError> {
        Ok(self.require(selector)?.values.get(selector).cloned())
    }

    async fn attribute(
        &mut self,
        selector: &str,
        name: &str,
    ) -> Result<Option<String>, BrowserError> {
        let document = self.require(selector)?;
        Ok(document
            .attributes
            .get(&(selector.to_string(), name.to_string()))
            .cloned())
    }

    async fn enter_frame(&mut self, selector: &str, _timeout: Duration) -> Result<(), BrowserError> {
        if self.current()?.stalled.contains(selector) {
            self.log.push(format!("stalled {selector}"));
            std::future::pending::<()>().await;
        }
        let frame = self
            .current()?
            .frames
            .get(selector)
            .cloned()
            .ok_or_else(|| BrowserError::not_found(selector))?;
        self.log.push(format!("enter_frame {selector}"));
        self.stack.push(frame);
        Ok(())
    }

    async fn exit_frame(&mut self) -> Result<(), BrowserError> {
        if self.stack.len() > 1 {
            self.stack.pop();
            self.log.push("exit_frame".into());
        }
        Ok(())
    }

    fn frame_depth(&self) -> usize {
        self.stack.len().saturating_sub(1)
    }

    async fn current_html(&mut self) -> Result<String, BrowserError> {
        Ok(self.current()?.html.clone())
    }

    async fn screenshot(&mut self, path: &Path) -> Result<(), BrowserError> {
        tokio::fs::write(path, b"\x89PNG\r\n\x1a\n").await?;
        self.log.push(format!("screenshot {}", path.display()));
        self.screenshots.push(path.to_path_buf());
        Ok(())
    }
}
