//! Browser automation seam.
//!
//! Steps talk to a [`BrowserSession`]; the worker obtains sessions from a
//! [`BrowserLauncher`] through the [`pool::BrowserPool`]. The production
//! implementation speaks the W3C WebDriver protocol to a spawned
//! geckodriver or chromedriver (see [`webdriver`]).

pub mod pool;
pub mod webdriver;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::BrowserError;
use crate::steps::transport::ClientType;

pub use pool::BrowserPool;
pub use webdriver::WebDriverLauncher;

/// Opaque reference to an element in the current page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementRef(pub String);

/// How to find an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Id(String),
    ClassName(String),
    TagName(String),
    XPath(String),
}

impl Locator {
    /// W3C location strategy and selector value.
    pub fn strategy(&self) -> (&'static str, String) {
        match self {
            Locator::Id(id) => ("css selector", format!("[id=\"{}\"]", css_escape(id))),
            Locator::ClassName(class) => ("css selector", format!(".{}", css_escape(class))),
            Locator::TagName(tag) => ("tag name", tag.clone()),
            Locator::XPath(xpath) => ("xpath", xpath.clone()),
        }
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Locator::Id(v) => write!(f, "id '{}'", v),
            Locator::ClassName(v) => write!(f, "class '{}'", v),
            Locator::TagName(v) => write!(f, "tag '{}'", v),
            Locator::XPath(v) => write!(f, "xpath '{}'", v),
        }
    }
}

fn css_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            out.push(c);
        } else {
            out.push('\\');
            out.push(c);
        }
    }
    out
}

/// One live browser session.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), BrowserError>;
    async fn current_url(&self) -> Result<String, BrowserError>;
    async fn title(&self) -> Result<String, BrowserError>;
    /// Find one element, within `scope` when given, otherwise in the whole document.
    async fn find_element(
        &self,
        scope: Option<&ElementRef>,
        locator: &Locator,
    ) -> Result<ElementRef, BrowserError>;
    async fn element_text(&self, element: &ElementRef) -> Result<String, BrowserError>;
    async fn click(&self, element: &ElementRef) -> Result<(), BrowserError>;
    async fn send_keys(&self, element: &ElementRef, text: &str) -> Result<(), BrowserError>;
    async fn is_displayed(&self, element: &ElementRef) -> Result<bool, BrowserError>;
    async fn is_enabled(&self, element: &ElementRef) -> Result<bool, BrowserError>;
    /// PNG bytes of the current viewport.
    async fn screenshot(&self) -> Result<Vec<u8>, BrowserError>;
    async fn execute_script(&self, script: &str) -> Result<Value, BrowserError>;
    async fn delete_all_cookies(&self) -> Result<(), BrowserError>;
    async fn close_window(&self) -> Result<(), BrowserError>;
    async fn quit(&self) -> Result<(), BrowserError>;
}

/// A launched browser plus what is needed to kill it.
pub struct BrowserHandle {
    pub id: Uuid,
    pub kind: ClientType,
    pub headless: bool,
    /// Driver process id, used to force-kill the process group on teardown
    pub pid: Option<u32>,
    pub session: Arc<dyn BrowserSession>,
    pub process: Option<tokio::process::Child>,
}

impl BrowserHandle {
    pub fn new(kind: ClientType, headless: bool, session: Arc<dyn BrowserSession>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            headless,
            pid: None,
            session,
            process: None,
        }
    }

    pub fn with_process(mut self, process: tokio::process::Child) -> Self {
        self.pid = process.id();
        self.process = Some(process);
        self
    }
}

impl std::fmt::Debug for BrowserHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("headless", &self.headless)
            .field("pid", &self.pid)
            .finish()
    }
}

/// Starts browsers.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, kind: ClientType) -> Result<BrowserHandle, BrowserError>;
}
