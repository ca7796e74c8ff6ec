//! `find`: locate an element and focus it for nested steps.
//!
//! Attributes: `id`, `class`, `tag`, `text`, `placeholder`. Use exactly one,
//! or combine `tag` with `text` and/or `placeholder`. A find nested in another
//! find searches inside the element the outer one found.
//!
//! ```yaml
//! - find:
//!     - id: content
//!     - find:
//!         - tag: input
//!           placeholder: Username
//!         - actions:
//!             - type: alice
//! ```

use serde_json::Value;

use super::kind::StepKind;
use super::state::ExecutionState;
use super::status::StepStatus;
use super::variables::{Variables, inject};
use super::{StepCall, unsupported};
use crate::browser::Locator;
use crate::logging::StepLogger;
use crate::retry::{RetryOutcome, RetryPolicy, retry};
use crate::run::RunContext;

const ATTRIBUTES: [&str; 5] = ["id", "class", "text", "placeholder", "tag"];

#[derive(Debug, Default, PartialEq, Eq)]
struct FindQuery<'a> {
    id: Option<&'a str>,
    class: Option<&'a str>,
    text: Option<&'a str>,
    placeholder: Option<&'a str>,
    tag: Option<&'a str>,
}

impl<'a> FindQuery<'a> {
    fn from_config(config: &'a Value) -> Self {
        let mut query = FindQuery::default();
        let Some(entries) = config.as_array() else {
            return query;
        };
        for (key, value) in entries.iter().filter_map(Value::as_object).flatten() {
            let Some(value) = value.as_str() else { continue };
            match key.as_str() {
                "id" => query.id = Some(value),
                "class" => query.class = Some(value),
                "text" => query.text = Some(value),
                "placeholder" => query.placeholder = Some(value),
                "tag" => query.tag = Some(value),
                _ => {}
            }
        }
        query
    }

    /// Locator and a human description, with variables injected.
    fn locator(&self, variables: &Variables, logger: &StepLogger) -> (Locator, String) {
        let expand = |v: &str| inject(v, variables, logger);

        if let Some(id) = self.id {
            let id = expand(id);
            return (Locator::Id(id.clone()), format!("by ID: {}", id));
        }

        let text_or_placeholder = self
            .text
            .map(|t| ("text", expand(t)))
            .or_else(|| self.placeholder.map(|p| ("placeholder", expand(p))));
        if let Some((key, value)) = text_or_placeholder {
            let tag = self.tag.map(expand);
            let mut description = format!("by {}: {}", key, value);
            if let Some(tag) = &tag {
                description.push_str(&format!(" and tag: {}", tag));
            }
            let tag = tag.unwrap_or_else(|| "*".to_string());
            let xpath = if key == "text" {
                format!(".//{}[contains(text(), '{}')]", tag, value)
            } else {
                format!(".//{}[@placeholder='{}']", tag, value)
            };
            return (Locator::XPath(xpath), description);
        }

        if let Some(class) = self.class {
            let class = expand(class);
            return (Locator::ClassName(class.clone()), format!("by class: {}", class));
        }

        let tag = expand(self.tag.unwrap_or("*"));
        (Locator::TagName(tag.clone()), format!("by tag: {}", tag))
    }
}

pub(super) fn validate(config: &Value) -> Vec<String> {
    let Some(entries) = config.as_array() else {
        return vec![format!(
            "Find must be a list of mappings, e.g. `- find: [{{id: my_div_id}}]`. Actual config: {}",
            config
        )];
    };

    let mut errors = Vec::new();
    let mut found = Vec::new();
    for entry in entries {
        let Some(map) = entry.as_object() else {
            errors.push(format!("Find entries must be mappings. Actual entry: {}", entry));
            continue;
        };
        let locator_keys: Vec<&str> = map
            .keys()
            .map(String::as_str)
            .filter(|k| ATTRIBUTES.contains(k))
            .collect();
        if locator_keys.is_empty() {
            continue;
        }
        for (key, value) in map {
            if !ATTRIBUTES.contains(&key.as_str()) {
                errors.push(format!("Find config contains invalid attribute: {}", key));
            } else if !value.is_string() {
                errors.push(format!("Find attribute '{}' must be a string", key));
            }
        }
        found.extend(locator_keys);
    }

    let combined =
        found.contains(&"tag") && (found.contains(&"text") || found.contains(&"placeholder"));
    if found.len() != 1 && !combined {
        errors.push(
            "Find only supports one of: id, class, tag. Or placeholder or text with optional tag"
                .to_string(),
        );
    }
    errors
}

pub(super) fn describe(config: &Value) -> String {
    let query = FindQuery::from_config(config);
    let parts: Vec<String> = [
        ("ID", query.id),
        ("class", query.class),
        ("text", query.text),
        ("placeholder", query.placeholder),
        ("tag", query.tag),
    ]
    .into_iter()
    .filter_map(|(label, value)| value.map(|v| format!("{}: {}", label, v)))
    .collect();
    format!("Find element by {}", parts.join(" and "))
}

pub(super) async fn execute(
    call: &StepCall<'_>,
    ctx: &mut RunContext,
    state: &mut ExecutionState,
) -> Option<StepStatus> {
    let ExecutionState::Browser(browser) = state else {
        return unsupported(call);
    };

    let (locator, description) = FindQuery::from_config(call.config).locator(ctx.variables(), call.logger);
    call.logger.debug(format!("Searching {}", description));

    // Only a nested find narrows the search to the parent's element
    let scope = match call.parent {
        Some(StepKind::Find) => browser.element.clone(),
        _ => None,
    };
    let deadline = ctx.deadline();
    let session = browser.session.clone();

    let outcome = retry(RetryPolicy::ELEMENT, || !deadline.is_expired(), |_| {
        let session = session.clone();
        let scope = scope.clone();
        let locator = locator.clone();
        let logger = call.logger.clone();
        async move {
            match session.find_element(scope.as_ref(), &locator).await {
                Ok(element) => Some(element),
                Err(err) => {
                    logger.error("Could not find element");
                    logger.debug(err.summary());
                    None
                }
            }
        }
    })
    .await;

    match outcome {
        RetryOutcome::Success(element) => {
            browser.element = Some(element);
            None
        }
        RetryOutcome::DeadlineExceeded => {
            browser.element = None;
            Some(StepStatus::Timeout)
        }
        RetryOutcome::Exhausted => {
            browser.element = None;
            Some(StepStatus::Failed)
        }
    }
}
