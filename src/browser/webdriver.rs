//! W3C WebDriver client and driver launcher.
//!
//! The launcher spawns `geckodriver` or `chromedriver` on a free local port
//! in its own process group, waits for `/status` to report ready, then opens
//! a session:
//!
//! ```text
//! geckodriver --port=PORT   ->  GET /status  ->  POST /session
//! ```

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Method;
use serde_json::{Value, json};
use tokio::process::Command;

use super::{BrowserHandle, BrowserLauncher, BrowserSession, ElementRef, Locator};
use crate::config::BrowserSection;
use crate::errors::BrowserError;
use crate::steps::transport::ClientType;

/// Key under which WebDriver returns element references.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Implicit wait applied to element lookups.
const IMPLICIT_WAIT_MS: u64 = 1000;

/// One WebDriver session.
#[derive(Debug, Clone)]
pub struct WebDriverClient {
    http: reqwest::Client,
    base_url: String,
    session_id: String,
}

impl WebDriverClient {
    /// Open a new session on the driver at `base_url`.
    pub async fn connect(
        http: reqwest::Client,
        base_url: impl Into<String>,
        capabilities: Value,
    ) -> Result<Self, BrowserError> {
        let base_url = base_url.into();
        let value = send(
            &http,
            Method::POST,
            &format!("{}/session", base_url),
            Some(json!({"capabilities": {"alwaysMatch": capabilities}})),
        )
        .await?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| BrowserError::Protocol {
                error: "session not created".to_string(),
                message: format!("no sessionId in response: {}", value),
            })?
            .to_string();
        Ok(Self {
            http,
            base_url,
            session_id,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, BrowserError> {
        let url = format!("{}/session/{}{}", self.base_url, self.session_id, path);
        send(&self.http, method, &url, body).await
    }

    async fn element_command(
        &self,
        method: Method,
        element: &ElementRef,
        action: &str,
        body: Option<Value>,
    ) -> Result<Value, BrowserError> {
        self.command(method, &format!("/element/{}/{}", element.0, action), body)
            .await
    }
}

/// Send one request and unwrap the `value` field of the response.
async fn send(
    http: &reqwest::Client,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> Result<Value, BrowserError> {
    let mut request = http.request(method, url);
    // POST endpoints require a JSON body, even an empty one.
    if let Some(body) = body {
        request = request.json(&body);
    }
    let response = request.send().await.map_err(|err| {
        if err.is_connect() {
            BrowserError::Unreachable {
                url: url.to_string(),
                message: err.to_string(),
            }
        } else {
            BrowserError::Http(err)
        }
    })?;

    let status = response.status();
    let payload: Value = response.json().await?;
    let value = payload.get("value").cloned().unwrap_or(Value::Null);
    if status.is_success() {
        return Ok(value);
    }
    Err(protocol_error(&value))
}

/// Map a WebDriver error payload to a [`BrowserError`].
fn protocol_error(value: &Value) -> BrowserError {
    let error = value
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    match error.as_str() {
        "invalid session id" => BrowserError::InvalidSession(message),
        "no such element" | "stale element reference" => BrowserError::NoSuchElement(message),
        "element not interactable" | "element click intercepted" => BrowserError::NotInteractable(message),
        _ => BrowserError::Protocol { error, message },
    }
}

fn element_ref(value: &Value) -> Result<ElementRef, BrowserError> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(|id| ElementRef(id.to_string()))
        .ok_or_else(|| BrowserError::Protocol {
            error: "invalid element".to_string(),
            message: format!("no element reference in {}", value),
        })
}

fn as_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl BrowserSession for WebDriverClient {
    async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        self.command(Method::POST, "/url", Some(json!({"url": url})))
            .await
            .map(drop)
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        self.command(Method::GET, "/url", None).await.map(as_string)
    }

    async fn title(&self) -> Result<String, BrowserError> {
        self.command(Method::GET, "/title", None).await.map(as_string)
    }

    async fn find_element(
        &self,
        scope: Option<&ElementRef>,
        locator: &Locator,
    ) -> Result<ElementRef, BrowserError> {
        let (using, value) = locator.strategy();
        let body = Some(json!({"using": using, "value": value}));
        let found = match scope {
            Some(parent) => self.element_command(Method::POST, parent, "element", body).await?,
            None => self.command(Method::POST, "/element", body).await?,
        };
        element_ref(&found)
    }

    async fn element_text(&self, element: &ElementRef) -> Result<String, BrowserError> {
        self.element_command(Method::GET, element, "text", None)
            .await
            .map(as_string)
    }

    async fn click(&self, element: &ElementRef) -> Result<(), BrowserError> {
        self.element_command(Method::POST, element, "click", Some(json!({})))
            .await
            .map(drop)
    }

    async fn send_keys(&self, element: &ElementRef, text: &str) -> Result<(), BrowserError> {
        self.element_command(Method::POST, element, "value", Some(json!({"text": text})))
            .await
            .map(drop)
    }

    async fn is_displayed(&self, element: &ElementRef) -> Result<bool, BrowserError> {
        let value = self.element_command(Method::GET, element, "displayed", None).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn is_enabled(&self, element: &ElementRef) -> Result<bool, BrowserError> {
        let value = self.element_command(Method::GET, element, "enabled", None).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn screenshot(&self) -> Result<Vec<u8>, BrowserError> {
        let encoded = as_string(self.command(Method::GET, "/screenshot", None).await?);
        BASE64.decode(encoded.as_bytes()).map_err(|err| BrowserError::Protocol {
            error: "invalid screenshot".to_string(),
            message: err.to_string(),
        })
    }

    async fn execute_script(&self, script: &str) -> Result<Value, BrowserError> {
        self.command(
            Method::POST,
            "/execute/sync",
            Some(json!({"script": script, "args": []})),
        )
        .await
    }

    async fn delete_all_cookies(&self) -> Result<(), BrowserError> {
        self.command(Method::DELETE, "/cookie", None).await.map(drop)
    }

    async fn close_window(&self) -> Result<(), BrowserError> {
        self.command(Method::DELETE, "/window", None).await.map(drop)
    }

    async fn quit(&self) -> Result<(), BrowserError> {
        self.command(Method::DELETE, "", None).await.map(drop)
    }
}

/// Starts a driver process per browser.
#[derive(Debug, Clone)]
pub struct WebDriverLauncher {
    settings: BrowserSection,
    http: reqwest::Client,
}

impl WebDriverLauncher {
    pub fn new(settings: BrowserSection) -> Result<Self, BrowserError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { settings, http })
    }

    fn driver_path(&self, kind: ClientType) -> &str {
        match kind {
            ClientType::Chrome => &self.settings.chromedriver_path,
            _ => &self.settings.geckodriver_path,
        }
    }

    /// Session capabilities and whether the browser runs headless.
    fn capabilities(&self, kind: ClientType) -> (Value, bool) {
        match kind {
            ClientType::Chrome => {
                let mut args = vec!["--no-sandbox".to_string()];
                let headless = self.settings.chrome_headless_mode.flag();
                if let Some(flag) = headless {
                    args.push(flag.to_string());
                }
                (
                    json!({
                        "browserName": "chrome",
                        "goog:chromeOptions": {
                            "binary": self.settings.chrome_binary,
                            "args": args,
                        }
                    }),
                    headless.is_some(),
                )
            }
            _ => {
                let headless = self.settings.firefox_headless;
                let args: Vec<&str> = if headless { vec!["-headless"] } else { vec![] };
                (
                    json!({
                        "browserName": "firefox",
                        "moz:firefoxOptions": {"args": args}
                    }),
                    headless,
                )
            }
        }
    }

    async fn wait_until_ready(&self, base_url: &str, driver: &str) -> Result<(), BrowserError> {
        let started = tokio::time::Instant::now();
        let limit = Duration::from_secs(self.settings.driver_startup_timeout_secs);
        let status_url = format!("{}/status", base_url);
        while started.elapsed() < limit {
            if let Ok(value) = send(&self.http, Method::GET, &status_url, None).await
                && value.get("ready").and_then(Value::as_bool) == Some(true)
            {
                return Ok(());
            }
            tokio::time::sleep(STATUS_POLL_INTERVAL).await;
        }
        Err(BrowserError::Launch {
            driver: driver.to_string(),
            message: format!(
                "not ready within {}s",
                self.settings.driver_startup_timeout_secs
            ),
        })
    }
}

/// Ask the OS for a free local port.
fn free_port() -> std::io::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    async fn launch(&self, kind: ClientType) -> Result<BrowserHandle, BrowserError> {
        if !kind.is_browser() {
            return Err(BrowserError::Launch {
                driver: kind.to_string(),
                message: "not a browser transport".to_string(),
            });
        }
        let driver = self.driver_path(kind).to_string();
        let launch_error = |message: String| BrowserError::Launch {
            driver: driver.clone(),
            message,
        };

        let port = free_port().map_err(|err| launch_error(format!("no free port: {}", err)))?;
        let mut cmd = Command::new(&driver);
        cmd.arg(format!("--port={}", port))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        let child = cmd.spawn().map_err(|err| launch_error(err.to_string()))?;
        tracing::debug!(driver = %driver, port, pid = ?child.id(), "spawned browser driver");

        let base_url = format!("http://127.0.0.1:{}", port);
        self.wait_until_ready(&base_url, &driver).await?;

        let (capabilities, headless) = self.capabilities(kind);
        let client = WebDriverClient::connect(self.http.clone(), base_url, capabilities).await?;

        if let Err(err) = client.command(Method::POST, "/window/maximize", Some(json!({}))).await {
            tracing::debug!(error = %err, "could not maximize browser window");
        }
        client
            .command(Method::POST, "/timeouts", Some(json!({"implicit": IMPLICIT_WAIT_MS})))
            .await?;

        tracing::info!(browser = %kind, session = client.session_id(), "browser session started");
        Ok(BrowserHandle::new(kind, headless, Arc::new(client)).with_process(child))
    }
}
