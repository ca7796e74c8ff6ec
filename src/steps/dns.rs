//! `dns`: resolve a name and keep the answer for `check: records`.

use std::sync::Arc;

use serde_json::Value;

use super::state::ExecutionState;
use super::status::StepStatus;
use super::variables::inject;
use super::{StepCall, unsupported};
use crate::dns::{DnsQuery, resolve};
use crate::run::RunContext;

pub(super) fn validate(config: &Value) -> Vec<String> {
    DnsQuery::from_config(config).err().unwrap_or_default()
}

pub(super) fn describe(config: &Value) -> String {
    match DnsQuery::from_config(config) {
        Ok(query) => format!("Resolving {} record for {}", query.record_type, query.domain),
        Err(_) => "Resolving DNS".to_string(),
    }
}

pub(super) async fn execute(
    call: &StepCall<'_>,
    ctx: &mut RunContext,
    state: &mut ExecutionState,
) -> Option<StepStatus> {
    let ExecutionState::Request(request_state) = state else {
        return unsupported(call);
    };
    let mut query = match DnsQuery::from_config(call.config) {
        Ok(query) => query,
        Err(errors) => {
            call.logger.error(errors.join("; "));
            return Some(StepStatus::Failed);
        }
    };
    query.domain = inject(&query.domain, ctx.variables(), call.logger);

    match resolve(&query).await {
        Ok(answer) => {
            call.logger.debug(format!("Records: {}", answer.records.join(", ")));
            request_state.dns_answer = Some(Arc::new(answer));
            None
        }
        Err(err) => {
            let message = format!("{:#}", err);
            call.logger.error(format!(
                "DNS lookup failed: {}",
                message.lines().next().unwrap_or_default()
            ));
            Some(StepStatus::Failed)
        }
    }
}
