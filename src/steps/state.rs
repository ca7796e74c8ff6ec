//! Transport-specific state carried through a step tree.
//!
//! Each child receives a copy of its parent's state and hands back what it
//! produced. Request state carries the last HTTP response and DNS answer;
//! browser state carries the focused element.

use std::sync::Arc;

use serde_json::Value;

use crate::browser::{BrowserSession, ElementRef};

/// A fully read HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Final URL after redirects
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// Records returned by a DNS lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsAnswer {
    pub domain: String,
    pub record_type: String,
    pub records: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RequestState {
    pub response: Option<Arc<HttpResponse>>,
    pub dns_answer: Option<Arc<DnsAnswer>>,
}

#[derive(Clone)]
pub struct BrowserState {
    pub session: Arc<dyn BrowserSession>,
    /// Element found by the nearest enclosing find, if any
    pub element: Option<ElementRef>,
}

#[derive(Clone)]
pub enum ExecutionState {
    Request(RequestState),
    Browser(BrowserState),
}

impl ExecutionState {
    pub fn requests() -> Self {
        ExecutionState::Request(RequestState::default())
    }

    pub fn browser(session: Arc<dyn BrowserSession>) -> Self {
        ExecutionState::Browser(BrowserState {
            session,
            element: None,
        })
    }

    /// State handed to a child step.
    pub fn clone_to_child(&self) -> Self {
        self.clone()
    }

    /// Take back what a finished child produced.
    pub fn integrate_from_child(&mut self, child: ExecutionState) {
        match (self, child) {
            (ExecutionState::Request(parent), ExecutionState::Request(child)) => {
                parent.response = child.response;
                parent.dns_answer = child.dns_answer;
            }
            (ExecutionState::Browser(parent), ExecutionState::Browser(child)) => {
                parent.element = child.element;
            }
            _ => {}
        }
    }

    pub fn response(&self) -> Option<&HttpResponse> {
        match self {
            ExecutionState::Request(state) => state.response.as_deref(),
            ExecutionState::Browser(_) => None,
        }
    }

    pub fn dns_answer(&self) -> Option<&DnsAnswer> {
        match self {
            ExecutionState::Request(state) => state.dns_answer.as_deref(),
            ExecutionState::Browser(_) => None,
        }
    }

    pub fn element(&self) -> Option<&ElementRef> {
        match self {
            ExecutionState::Browser(state) => state.element.as_ref(),
            ExecutionState::Request(_) => None,
        }
    }

    pub fn session(&self) -> Option<&Arc<dyn BrowserSession>> {
        match self {
            ExecutionState::Browser(state) => Some(&state.session),
            ExecutionState::Request(_) => None,
        }
    }

    pub fn is_browser(&self) -> bool {
        matches!(self, ExecutionState::Browser(_))
    }
}

impl std::fmt::Debug for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionState::Request(state) => f.debug_tuple("Request").field(state).finish(),
            ExecutionState::Browser(state) => f
                .debug_struct("Browser")
                .field("element", &state.element)
                .finish_non_exhaustive(),
        }
    }
}
