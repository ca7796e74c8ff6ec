//! `actions`: interact with the focused element or the page.
//!
//! ```yaml
//! - find:
//!     - id: username
//!     - actions:
//!         - type: "{username}"
//!         - press: enter
//! - actions:
//!     - wait:
//!         type: visible
//!         timeout: 30
//!     - click
//!     - screenshot: after-login
//!     - report-performance
//! ```

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;

use super::kind::StepKind;
use super::state::{BrowserState, ExecutionState};
use super::status::StepStatus;
use super::variables::inject;
use super::{StepCall, unsupported};
use crate::browser::{BrowserSession, ElementRef, Locator};
use crate::errors::BrowserError;
use crate::logging::StepLogger;
use crate::retry::{RetryOutcome, RetryPolicy, retry};
use crate::run::{Deadline, RunContext};

static SCREENSHOT_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w-]").unwrap());

/// WebDriver key code for Enter.
const ENTER_KEY: &str = "\u{E007}";

const DEFAULT_WAIT_SECS: u64 = 60;
const WAIT_POLL: Duration = Duration::from_millis(500);

/// Collects navigation and paint timings into one object.
const PERFORMANCE_SCRIPT: &str = r#"
const nav = performance.getEntriesByType('navigation')[0] || {};
const paint = {};
for (const entry of performance.getEntriesByType('paint')) { paint[entry.name] = entry.startTime; }
const resources = performance.getEntriesByType('resource');
const transfer = resources.reduce((total, r) => total + (r.transferSize || 0), nav.transferSize || 0);
return {
  pageSize: transfer,
  nrRequests: resources.length + 1,
  load: nav.loadEventEnd || 0,
  domContentLoaded: nav.domContentLoadedEventEnd || 0,
  firstMeaningfulPaint: paint['first-contentful-paint'] || 0,
  firstPaint: paint['first-paint'] || 0,
  firstContentfulPaint: paint['first-contentful-paint'] || 0
};
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitCondition {
    Present,
    Visible,
    Clickable,
}

impl WaitCondition {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "present" => Some(WaitCondition::Present),
            "visible" => Some(WaitCondition::Visible),
            "clickable" => Some(WaitCondition::Clickable),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            WaitCondition::Present => "present",
            WaitCondition::Visible => "visible",
            WaitCondition::Clickable => "clickable",
        }
    }
}

fn wait_config(config: &Value) -> Result<(WaitCondition, u64), String> {
    let (kind, timeout) = match config {
        Value::String(kind) => (kind.as_str(), None),
        Value::Object(map) => (
            map.get("type").and_then(Value::as_str).unwrap_or_default(),
            map.get("timeout"),
        ),
        _ => return Err("Wait must be a wait type or a mapping with 'type' and 'timeout'".to_string()),
    };
    let condition = WaitCondition::parse(kind).ok_or_else(|| {
        format!("Invalid wait type '{}'. Valid values: present, visible, clickable", kind)
    })?;
    let timeout = match timeout {
        None => DEFAULT_WAIT_SECS,
        Some(value) => value
            .as_u64()
            .filter(|secs| *secs > 0)
            .ok_or_else(|| "Wait timeout must be a positive number of seconds".to_string())?,
    };
    Ok((condition, timeout))
}

fn screenshot_name(config: &Value) -> Option<String> {
    let name = SCREENSHOT_NAME.replace_all(config.as_str().unwrap_or_default(), "");
    (!name.is_empty()).then(|| format!("{}.png", name))
}

pub(super) fn validate(kind: StepKind, config: &Value) -> Vec<String> {
    let error = match kind {
        StepKind::Actions => {
            let has_action = matches!(config, Value::Array(entries) if !entries.is_empty())
                && !super::kind::child_configs(kind, config).is_empty();
            (!has_action).then(|| {
                "Actions must be a list containing at least one of: click, type, press, wait, screenshot, report-performance"
                    .to_string()
            })
        }
        StepKind::Click | StepKind::ReportPerformance => (!config.is_null()).then(|| {
            format!("{} does not take a value", kind.config_key().unwrap_or_default())
        }),
        StepKind::Type => (!config.as_str().is_some_and(|s| !s.is_empty()))
            .then(|| "Type value must be a non-empty string".to_string()),
        StepKind::Press => (config.as_str().map(str::to_lowercase).as_deref() != Some("enter"))
            .then(|| "Press only supports: enter".to_string()),
        StepKind::Wait => wait_config(config).err(),
        StepKind::Screenshot => screenshot_name(config)
            .is_none()
            .then(|| "Screenshot name must contain at least one letter, digit, '_' or '-'".to_string()),
        _ => None,
    };
    error.into_iter().collect()
}

pub(super) fn describe(kind: StepKind, config: &Value) -> String {
    match kind {
        StepKind::Actions => "Performing actions".to_string(),
        StepKind::Click => "Clicking element".to_string(),
        StepKind::Type => format!("Typing text: {}", config.as_str().unwrap_or_default()),
        StepKind::Press => format!("Pressing key: {}", config.as_str().unwrap_or_default()),
        StepKind::Wait => match wait_config(config) {
            Ok((condition, _)) => format!("Waiting for element - {}", condition.as_str()),
            Err(_) => "Waiting for element".to_string(),
        },
        StepKind::Screenshot => format!(
            "Taking screenshot of browser: {}",
            screenshot_name(config).unwrap_or_default()
        ),
        StepKind::ReportPerformance => "Reporting page performance".to_string(),
        _ => String::new(),
    }
}

pub(super) async fn execute(
    call: &StepCall<'_>,
    ctx: &mut RunContext,
    state: &mut ExecutionState,
) -> Option<StepStatus> {
    if call.kind == StepKind::Actions {
        return None;
    }
    let ExecutionState::Browser(browser) = state else {
        return unsupported(call);
    };
    let logger = call.logger;
    let deadline = ctx.deadline();

    match call.kind {
        StepKind::Click => {
            let Some(element) = focused(browser, logger) else {
                return Some(StepStatus::Failed);
            };
            let session = browser.session.clone();
            interact(deadline, logger, "click element", move || {
                let session = session.clone();
                let element = element.clone();
                async move { session.click(&element).await }
            })
            .await
        }
        StepKind::Type => {
            let Some(element) = focused(browser, logger) else {
                return Some(StepStatus::Failed);
            };
            let text = inject(call.config.as_str().unwrap_or_default(), ctx.variables(), logger);
            let session = browser.session.clone();
            interact(deadline, logger, "type into element", move || {
                let session = session.clone();
                let element = element.clone();
                let text = text.clone();
                async move { session.send_keys(&element, &text).await }
            })
            .await
        }
        StepKind::Press => {
            let Some(element) = focused(browser, logger) else {
                return Some(StepStatus::Failed);
            };
            match browser.session.send_keys(&element, ENTER_KEY).await {
                Ok(()) => None,
                Err(err) => {
                    logger.error(format!("Failed to press key: {}", err.summary()));
                    Some(StepStatus::Failed)
                }
            }
        }
        StepKind::Wait => {
            let (condition, timeout_secs) = match wait_config(call.config) {
                Ok(parsed) => parsed,
                Err(reason) => {
                    logger.error(reason);
                    return Some(StepStatus::Failed);
                }
            };
            let Some(element) = focused(browser, logger) else {
                return Some(StepStatus::Failed);
            };
            wait_for(browser.session.as_ref(), &element, condition, timeout_secs, deadline, logger).await
        }
        StepKind::Screenshot => {
            let Some(name) = screenshot_name(call.config) else {
                logger.error("Screenshot name is invalid");
                return Some(StepStatus::Failed);
            };
            match browser.session.screenshot().await {
                Ok(png) => {
                    ctx.register_artifact(name, png);
                    None
                }
                Err(err) => {
                    logger.error(format!("Failed to take screenshot: {}", err.summary()));
                    Some(StepStatus::Failed)
                }
            }
        }
        StepKind::ReportPerformance => match browser.session.execute_script(PERFORMANCE_SCRIPT).await {
            Ok(performance) => {
                logger.debug(format!("Performance: {}", performance));
                ctx.set_variable("performance", performance);
                None
            }
            Err(err) => {
                logger.error(format!("Failed to collect performance data: {}", err.summary()));
                Some(StepStatus::Failed)
            }
        },
        _ => unsupported(call),
    }
}

/// The element focused by an enclosing find. Logs when there is none.
fn focused(browser: &BrowserState, logger: &StepLogger) -> Option<ElementRef> {
    if browser.element.is_none() {
        logger.error("This step requires an element. Use a find directive first");
    }
    browser.element.clone()
}

async fn interact<F, Fut>(deadline: Deadline, logger: &StepLogger, what: &str, act: F) -> Option<StepStatus>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<(), BrowserError>>,
{
    let outcome = retry(RetryPolicy::ELEMENT, || !deadline.is_expired(), |_| {
        let pending = act();
        async move {
            match pending.await {
                Ok(()) => Some(()),
                Err(err) => {
                    logger.error(format!("Failed to {}: {}", what, err.summary()));
                    None
                }
            }
        }
    })
    .await;

    match outcome {
        RetryOutcome::Success(()) => None,
        RetryOutcome::DeadlineExceeded => Some(StepStatus::Timeout),
        RetryOutcome::Exhausted => Some(StepStatus::Failed),
    }
}

async fn wait_for(
    session: &dyn BrowserSession,
    element: &ElementRef,
    condition: WaitCondition,
    timeout_secs: u64,
    deadline: Deadline,
    logger: &StepLogger,
) -> Option<StepStatus> {
    let attempts = u32::try_from(timeout_secs.saturating_mul(2)).unwrap_or(u32::MAX).max(1);
    let policy = RetryPolicy::new(attempts, WAIT_POLL);

    let outcome = retry(policy, || !deadline.is_expired(), |_| async move {
        let ready = match condition {
            // Re-reading the element proves it is still attached
            WaitCondition::Present => session
                .find_element(Some(element), &Locator::XPath(".".to_string()))
                .await
                .map(|_| true),
            WaitCondition::Visible => session.is_displayed(element).await,
            WaitCondition::Clickable => match session.is_displayed(element).await {
                Ok(true) => session.is_enabled(element).await,
                other => other,
            },
        };
        match ready {
            Ok(true) => Some(()),
            Ok(false) => None,
            Err(err) => {
                logger.debug(err.summary());
                None
            }
        }
    })
    .await;

    match outcome {
        RetryOutcome::Success(()) => None,
        RetryOutcome::DeadlineExceeded => Some(StepStatus::Timeout),
        RetryOutcome::Exhausted => {
            logger.error(format!(
                "Element was not {} within {}s",
                condition.as_str(),
                timeout_secs
            ));
            Some(StepStatus::Failed)
        }
    }
}
