//! Error types for the check execution engine.
//!
//! - `StepValidationError` / `ValidationErrors`: problems found in a step tree before it runs
//! - `BrowserError`: failures of a browser session or its driver process
//! - `RunError`: failures surfaced by the run orchestrator and worker
//!
//! Deadline expiry is a step status, not an error.

use thiserror::Error;

/// A single validation problem, located by the breadcrumb of the offending step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{path}: {message}")]
pub struct StepValidationError {
    /// Breadcrumb path, e.g. `Root -> Find -> Actions -> Type`.
    pub path: String,
    /// Human-readable reason.
    pub message: String,
}

impl StepValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Every validation problem found in one pass over a step tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<StepValidationError>);

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StepValidationError> {
        self.0.iter()
    }

    pub fn push(&mut self, error: StepValidationError) {
        self.0.push(error);
    }

    /// `Ok(())` when no problems were collected.
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Errors raised by a browser-automation session or its driver process.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Invalid session id: {0}")]
    InvalidSession(String),

    #[error("Cannot connect to browser driver at {url}: {message}")]
    Unreachable { url: String, message: String },

    #[error("No such element: {0}")]
    NoSuchElement(String),

    #[error("Element not interactable: {0}")]
    NotInteractable(String),

    #[error("Failed to launch {driver}: {message}")]
    Launch { driver: String, message: String },

    #[error("WebDriver error '{error}': {message}")]
    Protocol { error: String, message: String },

    #[error("WebDriver request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl BrowserError {
    /// Whether the error means the session is already gone.
    ///
    /// Teardown treats this class as expected and does not report it.
    pub fn is_dead_session(&self) -> bool {
        matches!(
            self,
            BrowserError::InvalidSession(_) | BrowserError::Unreachable { .. }
        )
    }

    /// First line of the message, for run logs.
    pub fn summary(&self) -> String {
        self.to_string().lines().next().unwrap_or_default().to_string()
    }
}

/// Errors from the run orchestrator and worker.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Check '{name}' not found in environment '{environment}'")]
    CheckNotFound { name: String, environment: String },

    #[error("No transport supports every step of check '{0}'")]
    NoSupportedTransport(String),

    #[error("Check '{check}' has invalid steps:\n{errors}")]
    Validation {
        check: String,
        #[source]
        errors: ValidationErrors,
    },

    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),

    #[error("Store error: {0}")]
    Store(#[source] anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_display_one_per_line() {
        let mut errors = ValidationErrors::default();
        errors.push(StepValidationError::new("Root -> GoTo", "Goto value must contain a value"));
        errors.push(StepValidationError::new("Root -> Find", "Find must be a list"));

        let rendered = errors.to_string();
        assert_eq!(
            rendered,
            "Root -> GoTo: Goto value must contain a value\nRoot -> Find: Find must be a list"
        );
    }

    #[test]
    fn test_empty_validation_errors_into_ok() {
        assert!(ValidationErrors::default().into_result().is_ok());
    }

    #[test]
    fn test_dead_session_classification() {
        assert!(BrowserError::InvalidSession("abc".into()).is_dead_session());
        assert!(
            BrowserError::Unreachable {
                url: "http://127.0.0.1:4444".into(),
                message: "connection refused".into()
            }
            .is_dead_session()
        );
        assert!(!BrowserError::NoSuchElement("#login".into()).is_dead_session());
    }

    #[test]
    fn test_summary_keeps_first_line() {
        let err = BrowserError::Protocol {
            error: "unknown error".into(),
            message: "net::ERR_NAME_NOT_RESOLVED\nstacktrace here".into(),
        };
        assert_eq!(err.summary(), "WebDriver error 'unknown error': net::ERR_NAME_NOT_RESOLVED");
    }

    #[test]
    fn test_run_error_converts_from_browser_error() {
        let err: RunError = BrowserError::InvalidSession("x".into()).into();
        assert!(matches!(err, RunError::Browser(BrowserError::InvalidSession(_))));
    }

    #[test]
    fn test_all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&ValidationErrors::default());
        assert_std_error(&BrowserError::NoSuchElement("x".into()));
        assert_std_error(&RunError::NoSupportedTransport("c".into()));
    }
}
