//! Run-variable substitution.
//!
//! Templates reference variables as `{name}`; `{{` and `}}` are literal braces.
//! A template that cannot be fully expanded is left exactly as written and a
//! warning goes to the step log.

use serde_json::{Map, Value};

use crate::logging::StepLogger;

/// Variables available to a run. Plugins may add to them while the run executes.
pub type Variables = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubstitutionError {
    /// `{name}` referenced a variable that is not set
    Missing(String),
    /// Unbalanced or empty braces
    Malformed(String),
}

impl std::fmt::Display for SubstitutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubstitutionError::Missing(name) => write!(f, "variable '{}' is not set", name),
            SubstitutionError::Malformed(reason) => write!(f, "malformed template: {}", reason),
        }
    }
}

/// Expand every `{name}` in `template`.
pub fn substitute(template: &str, variables: &Variables) -> Result<String, SubstitutionError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => return Err(SubstitutionError::Malformed("single '}'".to_string())),
            '{' => {
                let mut field = String::new();
                let mut closed = false;
                for next in chars.by_ref() {
                    if next == '}' {
                        closed = true;
                        break;
                    }
                    field.push(next);
                }
                if !closed {
                    return Err(SubstitutionError::Malformed("unclosed '{'".to_string()));
                }
                // Format specs and conversions (`{x:>4}`, `{x!r}`) are accepted and ignored
                let name = field.split([':', '!']).next().unwrap_or_default().trim();
                if name.is_empty() {
                    return Err(SubstitutionError::Malformed("empty field name".to_string()));
                }
                match variables.get(name) {
                    Some(value) => out.push_str(&render(value)),
                    None => return Err(SubstitutionError::Missing(name.to_string())),
                }
            }
            other => out.push(other),
        }
    }

    Ok(out)
}

/// Expand `template`, logging a warning and returning it unchanged on failure.
pub fn inject(template: &str, variables: &Variables, logger: &StepLogger) -> String {
    match substitute(template, variables) {
        Ok(expanded) => expanded,
        Err(err) => {
            logger.warn(format!(
                "Could not inject variables into '{}': {}",
                template, err
            ));
            template.to_string()
        }
    }
}

/// Expand every string inside a JSON value, recursing into arrays and objects.
/// Object keys are left as written.
pub fn inject_json(value: &Value, variables: &Variables, logger: &StepLogger) -> Value {
    match value {
        Value::String(s) => Value::String(inject(s, variables, logger)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| inject_json(item, variables, logger))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), inject_json(v, variables, logger)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "None".to_string(),
        other => other.to_string(),
    }
}
