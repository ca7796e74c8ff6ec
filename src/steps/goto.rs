//! `goto`: load a URL.
//!
//! A plain string works with every transport. The mapping form carries a
//! method, headers and body and is only available to the request transport:
//!
//! ```yaml
//! - goto:
//!     url: https://example.com/api/login
//!     method: post
//!     headers:
//!       X-Api-Key: "{api_key}"
//!     body:
//!       user: alice
//! ```

use std::sync::Arc;

use reqwest::Method;
use serde_json::Value;

use super::state::{ExecutionState, HttpResponse};
use super::status::StepStatus;
use super::variables::{inject, inject_json};
use super::{StepCall, error_chain, unsupported};
use crate::run::RunContext;

const METHODS: [&str; 4] = ["get", "post", "delete", "patch"];

struct GotoRequest<'a> {
    url: &'a str,
    method: Method,
    headers: Vec<(&'a str, &'a str)>,
    body: Option<&'a Value>,
}

impl<'a> GotoRequest<'a> {
    fn parse(config: &'a Value) -> Result<Self, Vec<String>> {
        match config {
            Value::String(url) if url.is_empty() => {
                Err(vec!["Goto value must contain a URL".to_string()])
            }
            Value::String(url) => Ok(Self {
                url,
                method: Method::GET,
                headers: Vec::new(),
                body: None,
            }),
            Value::Object(map) => {
                let mut errors = Vec::new();

                let url = match map.get("url") {
                    Some(Value::String(url)) if !url.is_empty() => url.as_str(),
                    _ => {
                        errors.push("Goto config must contain a non-empty 'url' attribute".to_string());
                        ""
                    }
                };

                let method = match map.get("method") {
                    None => Method::GET,
                    Some(Value::String(m)) if METHODS.contains(&m.to_lowercase().as_str()) => {
                        parse_method(&m.to_lowercase())
                    }
                    Some(other) => {
                        errors.push(format!(
                            "Goto method must be one of: {} (got {})",
                            METHODS.join(", "),
                            other
                        ));
                        Method::GET
                    }
                };

                let mut headers = Vec::new();
                match map.get("headers") {
                    None => {}
                    Some(Value::Object(entries)) => {
                        for (name, value) in entries {
                            match value {
                                Value::String(v) if !name.is_empty() && !v.is_empty() => {
                                    headers.push((name.as_str(), v.as_str()));
                                }
                                _ => errors.push(format!(
                                    "Goto header '{}' must be a non-empty string",
                                    name
                                )),
                            }
                        }
                    }
                    Some(_) => errors.push("Goto headers must be a mapping of names to values".to_string()),
                }

                for key in map.keys() {
                    if !["url", "method", "headers", "body"].contains(&key.as_str()) {
                        errors.push(format!("Goto config contains unknown attribute: {}", key));
                    }
                }

                if errors.is_empty() {
                    Ok(Self {
                        url,
                        method,
                        headers,
                        body: map.get("body"),
                    })
                } else {
                    Err(errors)
                }
            }
            _ => Err(vec![
                "Goto must be a URL string or a mapping containing 'url'".to_string(),
            ]),
        }
    }
}

fn parse_method(method: &str) -> Method {
    match method {
        "post" => Method::POST,
        "delete" => Method::DELETE,
        "patch" => Method::PATCH,
        _ => Method::GET,
    }
}

pub(super) fn validate(config: &Value) -> Vec<String> {
    GotoRequest::parse(config).err().unwrap_or_default()
}

pub(super) fn describe(config: &Value) -> String {
    match config {
        Value::String(url) => format!("Going to URL: {}", url),
        Value::Object(map) => format!(
            "Going to URL: {}",
            map.get("url").and_then(Value::as_str).unwrap_or_default()
        ),
        _ => "Going to URL".to_string(),
    }
}

pub(super) async fn execute(
    call: &StepCall<'_>,
    ctx: &mut RunContext,
    state: &mut ExecutionState,
) -> Option<StepStatus> {
    let request = match GotoRequest::parse(call.config) {
        Ok(request) => request,
        Err(errors) => {
            call.logger.error(errors.join("; "));
            return Some(StepStatus::Failed);
        }
    };
    if call.config.is_object() && state.is_browser() {
        return unsupported(call);
    }
    let url = inject(request.url, ctx.variables(), call.logger);

    match state {
        ExecutionState::Browser(browser) => {
            if let Err(err) = browser.session.goto(&url).await {
                call.logger.error(format!("Failed to load URL: {}", err.summary()));
                return Some(StepStatus::Failed);
            }
            None
        }
        ExecutionState::Request(request_state) => {
            let mut builder = ctx.http.request(request.method.clone(), &url);
            for (name, value) in &request.headers {
                builder = builder.header(*name, inject(value, ctx.variables(), call.logger));
            }
            if let Some(body) = request.body {
                builder = match inject_json(body, ctx.variables(), call.logger) {
                    body @ (Value::Array(_) | Value::Object(_)) => builder.json(&body),
                    Value::String(text) => builder.body(text),
                    other => builder.body(other.to_string()),
                };
            }

            let response = match builder.send().await {
                Ok(response) => response,
                Err(err) => {
                    call.logger.error(format!("Failed to load URL: {}", error_chain(&err)));
                    return Some(StepStatus::Failed);
                }
            };

            let status = response.status().as_u16();
            let final_url = response.url().to_string();
            let headers = response
                .headers()
                .iter()
                .map(|(name, value)| {
                    (
                        name.to_string(),
                        value.to_str().unwrap_or_default().to_string(),
                    )
                })
                .collect();
            let body = match response.text().await {
                Ok(body) => body,
                Err(err) => {
                    call.logger.error(format!("Failed to read response body: {}", error_chain(&err)));
                    return Some(StepStatus::Failed);
                }
            };

            call.logger.debug(format!("{} {} -> {}", request.method, url, status));
            request_state.response = Some(Arc::new(HttpResponse {
                status,
                url: final_url,
                headers,
                body,
            }));
            None
        }
    }
}
