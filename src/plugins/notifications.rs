//! Notification plugins, called when a scheduled run finishes and when the
//! queue timeout detector finds missed checks.
//!
//! Every hook has a no-op default, so a plugin only implements what it needs.
//! Webhook delivery is configured from the environment:
//!
//! ```text
//! SLACK_WEBHOOK_URL=https://hooks.slack.com/services/...
//! SLACK_TOKEN=xoxb-...   # used with the check attribute notification_slack_channel
//! ```

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde_json::{Map, Value, json};

use crate::steps::status::StepStatus;

const SLACK_POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";
const SLACK_CHANNEL_ATTRIBUTE: &str = "notification_slack_channel";

/// Everything a notification hook receives about a finished run.
#[derive(Debug, Clone)]
pub struct RunNotification {
    pub check_name: String,
    pub environment_name: String,
    pub run_status: StepStatus,
    pub run_timestamp: DateTime<Local>,
    pub run_log: String,
    pub attributes: Map<String, Value>,
}

#[async_trait]
pub trait NotificationPlugin: Send + Sync {
    fn name(&self) -> &str;

    async fn on_first_failure(&self, _event: &RunNotification) -> Result<()> {
        Ok(())
    }

    async fn on_every_failure(&self, _event: &RunNotification) -> Result<()> {
        Ok(())
    }

    async fn on_first_success(&self, _event: &RunNotification) -> Result<()> {
        Ok(())
    }

    async fn on_every_success(&self, _event: &RunNotification) -> Result<()> {
        Ok(())
    }

    async fn on_first_timeout(&self, _event: &RunNotification) -> Result<()> {
        Ok(())
    }

    async fn on_every_timeout(&self, _event: &RunNotification) -> Result<()> {
        Ok(())
    }

    async fn on_complete(&self, _event: &RunNotification) -> Result<()> {
        Ok(())
    }

    async fn on_check_queue_timeout(&self, _check_count: usize) -> Result<()> {
        Ok(())
    }
}

/// One run-completion hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationMethod {
    Complete,
    EverySuccess,
    FirstSuccess,
    EveryFailure,
    FirstFailure,
    EveryTimeout,
    FirstTimeout,
}

impl NotificationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationMethod::Complete => "on_complete",
            NotificationMethod::EverySuccess => "on_every_success",
            NotificationMethod::FirstSuccess => "on_first_success",
            NotificationMethod::EveryFailure => "on_every_failure",
            NotificationMethod::FirstFailure => "on_first_failure",
            NotificationMethod::EveryTimeout => "on_every_timeout",
            NotificationMethod::FirstTimeout => "on_first_timeout",
        }
    }

    /// Hooks to call for a finished run, in call order.
    ///
    /// `on_complete` always fires. `is_new_state` is true for the first run of
    /// a check or when the latest two runs differ in status.
    pub fn for_transition(status: StepStatus, is_new_state: bool) -> Vec<Self> {
        let mut methods = vec![NotificationMethod::Complete];
        let (every, first) = match status {
            StepStatus::Success => (NotificationMethod::EverySuccess, NotificationMethod::FirstSuccess),
            StepStatus::Failed => (NotificationMethod::EveryFailure, NotificationMethod::FirstFailure),
            StepStatus::Timeout => (NotificationMethod::EveryTimeout, NotificationMethod::FirstTimeout),
            _ => return methods,
        };
        methods.push(every);
        if is_new_state {
            methods.push(first);
        }
        methods
    }

    pub(super) async fn dispatch(
        self,
        plugin: &dyn NotificationPlugin,
        event: &RunNotification,
    ) -> Result<()> {
        match self {
            NotificationMethod::Complete => plugin.on_complete(event).await,
            NotificationMethod::EverySuccess => plugin.on_every_success(event).await,
            NotificationMethod::FirstSuccess => plugin.on_first_success(event).await,
            NotificationMethod::EveryFailure => plugin.on_every_failure(event).await,
            NotificationMethod::FirstFailure => plugin.on_first_failure(event).await,
            NotificationMethod::EveryTimeout => plugin.on_every_timeout(event).await,
            NotificationMethod::FirstTimeout => plugin.on_first_timeout(event).await,
        }
    }
}

impl std::fmt::Display for NotificationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Writes state changes and queue timeouts to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl NotificationPlugin for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn on_first_failure(&self, event: &RunNotification) -> Result<()> {
        tracing::warn!(check = %event.check_name, environment = %event.environment_name, "check has failed");
        Ok(())
    }

    async fn on_first_timeout(&self, event: &RunNotification) -> Result<()> {
        tracing::warn!(check = %event.check_name, environment = %event.environment_name, "check has timed out");
        Ok(())
    }

    async fn on_first_success(&self, event: &RunNotification) -> Result<()> {
        tracing::info!(check = %event.check_name, environment = %event.environment_name, "check is back to normal");
        Ok(())
    }

    async fn on_complete(&self, event: &RunNotification) -> Result<()> {
        tracing::debug!(
            check = %event.check_name,
            environment = %event.environment_name,
            status = %event.run_status,
            "run complete"
        );
        Ok(())
    }

    async fn on_check_queue_timeout(&self, check_count: usize) -> Result<()> {
        tracing::warn!(check_count, "checks missed due to queue timeout");
        Ok(())
    }
}

/// Posts Slack-compatible `{"text": ...}` messages.
///
/// With a bot token and a `notification_slack_channel` check attribute the
/// message goes to `chat.postMessage`; otherwise to the incoming webhook.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
    token: Option<String>,
    api_url: String,
}

impl WebhookNotifier {
    pub fn new(webhook_url: Option<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url,
            token,
            api_url: SLACK_POST_MESSAGE_URL.to_string(),
        }
    }

    /// Configure from `SLACK_WEBHOOK_URL` and `SLACK_TOKEN`. None when neither is set.
    pub fn from_env() -> Option<Self> {
        let webhook_url = std::env::var("SLACK_WEBHOOK_URL").ok().filter(|v| !v.is_empty());
        let token = std::env::var("SLACK_TOKEN").ok().filter(|v| !v.is_empty());
        if webhook_url.is_none() && token.is_none() {
            return None;
        }
        Some(Self::new(webhook_url, token))
    }

    /// Override the chat API endpoint.
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    async fn post_message(&self, text: &str, attributes: &Map<String, Value>) -> Result<()> {
        let channel = attributes.get(SLACK_CHANNEL_ATTRIBUTE).and_then(Value::as_str);
        let request = match (&self.token, channel, &self.webhook_url) {
            (Some(token), Some(channel), _) => self
                .client
                .post(&self.api_url)
                .bearer_auth(token)
                .json(&json!({"text": text, "channel": channel})),
            (_, _, Some(url)) => self.client.post(url).json(&json!({"text": text})),
            _ => {
                tracing::debug!("Slack not enabled");
                return Ok(());
            }
        };

        let response = request
            .send()
            .await
            .context("Failed to post notification")?
            .error_for_status()
            .context("Notification endpoint returned an error status")?;

        let body = response.text().await.unwrap_or_default();
        if !response_ok(&body) {
            bail!("Slack did not return an OK status when posting notification");
        }
        Ok(())
    }
}

/// Webhooks answer `ok` as plain text; the chat API answers `{"ok": true}`.
fn response_ok(body: &str) -> bool {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => value.get("ok").and_then(Value::as_bool) == Some(true),
        Err(_) => body.trim() == "ok",
    }
}

#[async_trait]
impl NotificationPlugin for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn on_first_failure(&self, event: &RunNotification) -> Result<()> {
        self.post_message(&format!("{} has failed :alarm:", event.check_name), &event.attributes)
            .await
    }

    async fn on_first_timeout(&self, event: &RunNotification) -> Result<()> {
        self.post_message(&format!("{} has timed out :alarm:", event.check_name), &event.attributes)
            .await
    }

    async fn on_first_success(&self, event: &RunNotification) -> Result<()> {
        self.post_message(
            &format!("{} is back to normal :white_check_mark:", event.check_name),
            &event.attributes,
        )
        .await
    }

    async fn on_check_queue_timeout(&self, check_count: usize) -> Result<()> {
        self.post_message(
            &format!(
                "WARNING: {} check(s) missed due to queue timeout. \
                 Check queue size and consider increase workers.",
                check_count
            ),
            &Map::new(),
        )
        .await
    }
}
