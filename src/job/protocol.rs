//! Wire format of the job channel.
//!
//! Outbound: `{ "action": ..., "payload": { "subject", "message", "target" } }`.
//! Inbound: one acknowledgement frame, then
//! `{ "statusCode": 200, "body": { "action_response": { "response": { <field>: ... } } } }`
//! where `body` may also arrive as a JSON-encoded string.

use super::models::{JobRequest, JobResult};
use crate::error::{CoordinatorError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
struct RequestFrame<'a> {
    action: &'a str,
    payload: &'a JobRequest,
}

#[derive(Debug, Deserialize)]
struct ResultFrame {
    #[serde(rename = "statusCode")]
    status_code: Option<u16>,
    body: Option<Value>,
}

/// Serialize the request frame sent right after the channel opens.
pub fn encode_request(action: &str, request: &JobRequest) -> Result<String> {
    serde_json::to_string(&RequestFrame {
        action,
        payload: request,
    })
    .map_err(|e| CoordinatorError::Protocol(format!("cannot encode request: {}", e)))
}

/// Extract the result object from a payload frame.
///
/// Anything other than status 200 with a non-null `result_field` is a
/// protocol error.
pub fn decode_result(text: &str, result_field: &str) -> Result<JobResult> {
    let frame: ResultFrame = serde_json::from_str(text)
        .map_err(|e| CoordinatorError::Protocol(format!("result frame is not JSON: {}", e)))?;

    match frame.status_code {
        Some(200) => {}
        Some(code) => {
            return Err(CoordinatorError::Protocol(format!(
                "unexpected statusCode {}",
                code
            )))
        }
        None => return Err(CoordinatorError::Protocol("missing statusCode".into())),
    }

    let body = match frame.body {
        Some(Value::String(raw)) => serde_json::from_str::<Value>(&raw)
            .map_err(|e| CoordinatorError::Protocol(format!("body string is not JSON: {}", e)))?,
        Some(body @ Value::Object(_)) => body,
        _ => return Err(CoordinatorError::Protocol("missing body".into())),
    };

    match body
        .get("action_response")
        .and_then(|r| r.get("response"))
        .and_then(|r| r.get(result_field))
    {
        Some(value) if !value.is_null() => Ok(JobResult {
            value: value.clone(),
        }),
        _ => Err(CoordinatorError::Protocol(format!(
            "body.action_response.response.{} is missing",
            result_field
        ))),
    }
}
