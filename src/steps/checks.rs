//! `check`: assertions on the page, the last response or the last DNS answer.
//!
//! ```yaml
//! - check:
//!     url: https://example.com/home
//!     title: Home
//! - check:
//!     response: 200
//!     json:
//!       selector: $.user.name
//!       equals: alice
//! - check:
//!     records:
//!       contains: 93.184.216.34
//! ```

use serde_json::Value;

use super::kind::StepKind;
use super::selector::JsonSelector;
use super::state::{DnsAnswer, ExecutionState, HttpResponse};
use super::status::StepStatus;
use super::variables::{inject, inject_json};
use super::{StepCall, unsupported};
use crate::browser::{BrowserSession, Locator};
use crate::logging::StepLogger;
use crate::retry::{RetryOutcome, RetryPolicy, retry};
use crate::run::{Deadline, RunContext};

const NO_RESPONSE: &str = "This step requires a request to have been made";
const NO_DNS_ANSWER: &str = "This step requires a DNS step to have been performed";

/// `equals` or `contains`, with `equals` taking precedence when both are given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchType {
    Equals,
    Contains,
}

fn comparator(config: &Value) -> Option<(MatchType, &Value)> {
    let map = config.as_object()?;
    if let Some(value) = map.get("equals") {
        return Some((MatchType::Equals, value));
    }
    map.get("contains").map(|value| (MatchType::Contains, value))
}

pub(super) fn validate(kind: StepKind, config: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    match kind {
        StepKind::Check => {
            if !config.is_object() {
                errors.push("Check must be a mapping of check types to expected values".to_string());
            } else if super::kind::child_configs(kind, config).is_empty() {
                errors.push(
                    "Check must contain at least one of: url, title, text, body, json, response, records"
                        .to_string(),
                );
            }
        }
        StepKind::CheckUrl | StepKind::CheckTitle | StepKind::CheckText => {
            if !config.as_str().is_some_and(|s| !s.is_empty()) {
                errors.push(format!(
                    "Expected {} must be a non-empty string",
                    kind.config_key().unwrap_or("value")
                ));
            }
        }
        StepKind::CheckBody | StepKind::CheckRecords => {
            errors.extend(validate_comparator(kind, config, &[]));
            if kind == StepKind::CheckRecords
                && let Some((_, expected)) = comparator(config)
                && expected_records(expected).is_none()
            {
                errors.push("Records must be a string or a list of strings".to_string());
            }
        }
        StepKind::CheckJson => {
            errors.extend(validate_comparator(kind, config, &["selector"]));
            if let Some(selector) = config.get("selector") {
                match selector.as_str().map(JsonSelector::parse) {
                    Some(Ok(_)) => {}
                    Some(Err(reason)) => errors.push(format!("Invalid JSON selector: {}", reason)),
                    None => errors.push("JSON selector must be a string".to_string()),
                }
            }
        }
        StepKind::CheckResponse => {
            let valid = config
                .as_u64()
                .is_some_and(|code| (100..=599).contains(&code));
            if !valid {
                errors.push("Response code must be an integer between 100 and 599".to_string());
            }
        }
        _ => {}
    }
    errors
}

fn validate_comparator(kind: StepKind, config: &Value, extra_keys: &[&str]) -> Vec<String> {
    let name = kind.config_key().unwrap_or("check");
    let Some(map) = config.as_object() else {
        return vec![format!(
            "{} check must be a mapping containing either 'contains' or 'equals'",
            name
        )];
    };
    let mut errors = Vec::new();
    if comparator(config).is_none() {
        errors.push(format!(
            "{} check must provide a comparator. Either 'contains' or 'equals'",
            name
        ));
    }
    for key in map.keys() {
        if !["equals", "contains"].contains(&key.as_str()) && !extra_keys.contains(&key.as_str()) {
            errors.push(format!("{} check contains unknown attribute: {}", name, key));
        }
    }
    errors
}

fn expected_records(value: &Value) -> Option<Vec<&str>> {
    match value {
        Value::String(s) => Some(vec![s.as_str()]),
        Value::Array(items) => items.iter().map(Value::as_str).collect(),
        _ => None,
    }
}

pub(super) fn describe(kind: StepKind, config: &Value) -> String {
    match kind {
        StepKind::Check => "Checking page".to_string(),
        StepKind::CheckUrl => format!("Check current URL matches: {}", display(config)),
        StepKind::CheckTitle => format!("Check page title matches: {}", display(config)),
        StepKind::CheckText => format!("Check element text matches: {}", display(config)),
        StepKind::CheckBody => format!("Check response body matches: {}", config),
        StepKind::CheckJson => format!("Check JSON response matches: {}", config),
        StepKind::CheckResponse => format!("Check response code is: {}", config),
        StepKind::CheckRecords => format!("Check DNS records match: {}", config),
        _ => String::new(),
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(super) async fn execute(
    call: &StepCall<'_>,
    ctx: &mut RunContext,
    state: &mut ExecutionState,
) -> Option<StepStatus> {
    let logger = call.logger;
    match call.kind {
        // Container: children decide
        StepKind::Check => None,
        StepKind::CheckUrl => {
            let expected = inject(&display(call.config), ctx.variables(), logger);
            if let ExecutionState::Browser(browser) = state {
                let session = browser.session.clone();
                return page_assert(ctx.deadline(), logger, "URL", &expected, move || {
                    let session = session.clone();
                    async move { session.current_url().await }
                })
                .await;
            }
            let Some(response) = state.response() else {
                logger.error(NO_RESPONSE);
                return Some(StepStatus::Failed);
            };
            (response.url != expected).then(|| {
                logger.error(format!(
                    "URL does not match expected URL. Expected \"{}\" and got: \"{}\"",
                    expected, response.url
                ));
                StepStatus::Failed
            })
        }
        StepKind::CheckTitle => {
            let ExecutionState::Browser(browser) = state else {
                return unsupported(call);
            };
            let expected = inject(&display(call.config), ctx.variables(), logger);
            let session = browser.session.clone();
            page_assert(ctx.deadline(), logger, "Title", &expected, move || {
                let session = session.clone();
                async move { session.title().await }
            })
            .await
        }
        StepKind::CheckText => {
            let ExecutionState::Browser(browser) = state else {
                return unsupported(call);
            };
            let expected = inject(&display(call.config), ctx.variables(), logger);
            let session = browser.session.clone();
            let element = browser.element.clone();
            page_assert(ctx.deadline(), logger, "Element text", &expected, move || {
                let session = session.clone();
                let element = element.clone();
                async move { element_text(session.as_ref(), element).await }
            })
            .await
        }
        StepKind::CheckBody | StepKind::CheckJson | StepKind::CheckResponse => {
            if state.is_browser() {
                return unsupported(call);
            }
            let Some(response) = state.response() else {
                logger.error(NO_RESPONSE);
                return Some(StepStatus::Failed);
            };
            match call.kind {
                StepKind::CheckBody => body_check(response, call.config, ctx, logger),
                StepKind::CheckJson => json_check(response, call.config, ctx, logger),
                _ => response_check(response, call.config, logger),
            }
        }
        StepKind::CheckRecords => {
            if state.is_browser() {
                return unsupported(call);
            }
            let Some(answer) = state.dns_answer() else {
                logger.error(NO_DNS_ANSWER);
                return Some(StepStatus::Failed);
            };
            records_check(answer, call.config, ctx, logger)
        }
        _ => unsupported(call),
    }
}

/// `comparator` for an already validated config, logging when absent.
fn require_comparator<'c>(config: &'c Value, logger: &StepLogger) -> Result<(MatchType, &'c Value), StepStatus> {
    comparator(config).ok_or_else(|| {
        logger.error("Check must provide a comparator. Either 'contains' or 'equals'");
        StepStatus::Failed
    })
}

fn body_check(
    response: &HttpResponse,
    config: &Value,
    ctx: &RunContext,
    logger: &StepLogger,
) -> Option<StepStatus> {
    let (match_type, expected) = match require_comparator(config, logger) {
        Ok(found) => found,
        Err(status) => return Some(status),
    };
    let expected = inject(&display(expected), ctx.variables(), logger);
    let message = match match_type {
        MatchType::Equals if response.body != expected => {
            Some("Body does not match expected value".to_string())
        }
        MatchType::Contains if !response.body.contains(&expected) => {
            Some(format!("Could not find '{}' in body", expected))
        }
        _ => None,
    };
    message.map(|message| {
        logger.error(format!("Body match failed: {}", message));
        StepStatus::Failed
    })
}

fn response_check(response: &HttpResponse, config: &Value, logger: &StepLogger) -> Option<StepStatus> {
    let expected = config.as_u64().unwrap_or_default();
    (u64::from(response.status) != expected).then(|| {
        logger.error(format!(
            "Status code does not match expected code. Expected {} and got: {}",
            expected, response.status
        ));
        StepStatus::Failed
    })
}

async fn element_text(
    session: &dyn BrowserSession,
    element: Option<crate::browser::ElementRef>,
) -> Result<String, crate::errors::BrowserError> {
    let element = match element {
        Some(element) => element,
        None => session.find_element(None, &Locator::TagName("body".into())).await?,
    };
    session.element_text(&element).await
}

/// Poll a page property until it equals `expected`, within the retry policy and deadline.
async fn page_assert<F, Fut>(
    deadline: Deadline,
    logger: &StepLogger,
    what: &str,
    expected: &str,
    read: F,
) -> Option<StepStatus>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<String, crate::errors::BrowserError>>,
{
    let outcome = retry(RetryPolicy::ELEMENT, || !deadline.is_expired(), |_| {
        let pending = read();
        async move {
            match pending.await {
                Ok(actual) if actual == expected => Some(()),
                Ok(actual) => {
                    logger.error(format!(
                        "{} does not match expected value. Expected \"{}\" and got: \"{}\"",
                        what, expected, actual
                    ));
                    None
                }
                Err(err) => {
                    logger.error(format!("Could not read {}: {}", what.to_lowercase(), err.summary()));
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

fn json_check(
    response: &HttpResponse,
    config: &Value,
    ctx: &RunContext,
    logger: &StepLogger,
) -> Option<StepStatus> {
    let document = match response.json() {
        Ok(document) => document,
        Err(err) => {
            logger.error(format!("Response is not valid JSON: {}", err));
            return Some(StepStatus::Failed);
        }
    };

    let selector = match config.get("selector").and_then(Value::as_str).map(JsonSelector::parse) {
        Some(Ok(selector)) => Some(selector),
        Some(Err(reason)) => {
            logger.error(format!("Invalid JSON selector: {}", reason));
            return Some(StepStatus::Failed);
        }
        None => None,
    };
    let actual = match &selector {
        Some(selector) => selector.select(&document).cloned().unwrap_or(Value::Null),
        None => document.clone(),
    };
    let from = selector
        .as_ref()
        .map(|s| format!(", from JSON selector '{}'", s))
        .unwrap_or_default();

    let (match_type, expected) = match require_comparator(config, logger) {
        Ok(found) => found,
        Err(status) => return Some(status),
    };
    let expected = inject_json(expected, ctx.variables(), logger);
    let message = match match_type {
        MatchType::Equals if actual != expected => Some(format!(
            "Value '{}' does not match expected '{}'{}",
            actual, expected, from
        )),
        MatchType::Contains if !json_contains(&actual, &expected) => Some(format!(
            "Could not find '{}' in actual value '{}'{}",
            expected, actual, from
        )),
        _ => None,
    };

    message.map(|message| {
        logger.error(format!("JSON match failed: {}\nFull Response: {}", message, document));
        StepStatus::Failed
    })
}

/// Membership: element of an array, substring of a string, or key of an object.
fn json_contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::Array(items), needle) => items.contains(needle),
        (Value::String(text), Value::String(part)) => text.contains(part.as_str()),
        (Value::Object(map), Value::String(key)) => map.contains_key(key),
        _ => false,
    }
}

fn records_check(
    answer: &DnsAnswer,
    config: &Value,
    ctx: &RunContext,
    logger: &StepLogger,
) -> Option<StepStatus> {
    let (match_type, expected) = match require_comparator(config, logger) {
        Ok(found) => found,
        Err(status) => return Some(status),
    };
    let mut expected: Vec<String> = expected_records(expected)
        .unwrap_or_default()
        .into_iter()
        .map(|r| inject(r, ctx.variables(), logger))
        .collect();

    match match_type {
        MatchType::Equals => {
            let mut actual = answer.records.clone();
            actual.sort();
            expected.sort();
            (actual != expected).then(|| {
                logger.error(format!(
                    "DNS records do not match expected records. Expected {:?} and got: {:?}",
                    expected, actual
                ));
                StepStatus::Failed
            })
        }
        MatchType::Contains => {
            let missing: Vec<&String> = expected
                .iter()
                .filter(|record| !answer.records.contains(record))
                .collect();
            (!missing.is_empty()).then(|| {
                logger.error(format!(
                    "DNS records missing expected values: {:?}. Actual records: {:?}",
                    missing, answer.records
                ));
                StepStatus::Failed
            })
        }
    }
}
