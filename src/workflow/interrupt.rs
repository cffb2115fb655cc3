//! Human-in-the-loop waits: what a suspended step asks for, how the answer
//! is checked, and how a repeated answer is recognised.

use super::{StepError, StepId};
use crate::shared::TaskId;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterruptKind {
    OperatorInput,
    FundingToken,
    DelegationSigning,
}

impl InterruptKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OperatorInput => "operator-input",
            Self::FundingToken => "funding-token",
            Self::DelegationSigning => "delegation-signing",
        }
    }

    pub fn step(self) -> StepId {
        match self {
            Self::OperatorInput => StepId::CollectOperatorInput,
            Self::FundingToken => StepId::CollectFundingToken,
            Self::DelegationSigning => StepId::CollectDelegations,
        }
    }
}

/// Structured request shown to the approving party. `payload` carries the
/// protocol fields (signer, chain id, unsigned artifacts) the answer
/// depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterruptRequest {
    pub kind: InterruptKind,
    pub message: String,
    pub schema: Value,
    #[serde(default)]
    pub payload: Value,
}

impl InterruptRequest {
    pub fn new(kind: InterruptKind, message: impl Into<String>, schema: Value) -> Self {
        Self {
            kind,
            message: message.into(),
            schema,
            payload: Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingInterrupt {
    pub id: String,
    pub step: StepId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    pub issued_at: i64,
    pub request: InterruptRequest,
}

impl PendingInterrupt {
    pub fn kind(&self) -> InterruptKind {
        self.request.kind
    }
}

pub fn interrupt_id(kind: InterruptKind, task_id: Option<&TaskId>, issued_at: i64) -> String {
    match task_id {
        Some(task_id) => format!("{}:{task_id}:{issued_at}", kind.as_str()),
        None => format!("{}:{issued_at}", kind.as_str()),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResumeDecision {
    Accepted(Value),
    Declined(String),
}

/// Classifies a resume payload. An explicit `{"outcome": "rejected"}` is a
/// decline; anything else must satisfy the request schema.
pub fn interpret_response(
    request: &InterruptRequest,
    response: &Value,
) -> Result<ResumeDecision, StepError> {
    if response.get("outcome").and_then(Value::as_str) == Some("rejected") {
        let reason = response
            .get("reason")
            .and_then(Value::as_str)
            .filter(|reason| !reason.trim().is_empty())
            .unwrap_or("no reason given");
        return Ok(ResumeDecision::Declined(format!(
            "{} request declined: {reason}",
            request.kind.as_str()
        )));
    }
    validate_against_schema(&request.schema, response).map_err(StepError::Validation)?;
    Ok(ResumeDecision::Accepted(response.clone()))
}

/// Hex SHA-256 over the canonical JSON encoding of a response.
pub fn response_digest(response: &Value) -> String {
    let encoded = serde_json::to_vec(response).unwrap_or_default();
    let digest = Sha256::digest(&encoded);
    let mut out = String::with_capacity(digest.len() * 2);
    const HEX: &[u8; 16] = b"0123456789abcdef";
    for byte in digest.iter() {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

/// Checks `value` against the JSON-schema keywords interrupt requests use:
/// `type`, `enum`, `required`, `properties`, `items`, `minItems`,
/// `maxItems`, `minLength` and `minimum`. Unknown keywords are ignored.
pub fn validate_against_schema(schema: &Value, value: &Value) -> Result<(), String> {
    validate_at("$", schema, value)
}

fn validate_at(path: &str, schema: &Value, value: &Value) -> Result<(), String> {
    let Some(schema) = schema.as_object() else {
        return Ok(());
    };

    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if !type_matches(expected, value) {
            return Err(format!("{path} must be of type {expected}"));
        }
    }
    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            let rendered = allowed
                .iter()
                .map(Value::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            return Err(format!("{path} must be one of: {rendered}"));
        }
    }
    if let (Some(min), Some(text)) = (
        schema.get("minLength").and_then(Value::as_u64),
        value.as_str(),
    ) {
        if (text.trim().chars().count() as u64) < min {
            return Err(format!("{path} must be at least {min} characters"));
        }
    }
    if let (Some(min), Some(number)) = (
        schema.get("minimum").and_then(Value::as_f64),
        value.as_f64(),
    ) {
        if number < min {
            return Err(format!("{path} must be >= {min}"));
        }
    }

    if let Some(object) = value.as_object() {
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for key in required.iter().filter_map(Value::as_str) {
                if object.get(key).map_or(true, Value::is_null) {
                    return Err(format!("{path}.{key} is required"));
                }
            }
        }
        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (key, property) in properties {
                match object.get(key) {
                    Some(child) if !child.is_null() => {
                        validate_at(&format!("{path}.{key}"), property, child)?
                    }
                    _ => {}
                }
            }
        }
    }

    if let Some(items) = value.as_array() {
        if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
            if (items.len() as u64) < min {
                return Err(format!("{path} must contain at least {min} item(s)"));
            }
        }
        if let Some(max) = schema.get("maxItems").and_then(Value::as_u64) {
            if (items.len() as u64) > max {
                return Err(format!("{path} must contain at most {max} item(s)"));
            }
        }
        if let Some(item_schema) = schema.get("items") {
            for (index, item) in items.iter().enumerate() {
                validate_at(&format!("{path}[{index}]"), item_schema, item)?;
            }
        }
    }
    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

pub fn operator_input_schema() -> Value {
    json!({
        "type": "object",
        "required": ["walletAddress", "resourceId"],
        "properties": {
            "walletAddress": { "type": "string", "minLength": 1 },
            "resourceId": { "type": "string", "minLength": 1 },
            "contributionUsd": { "type": "number", "minimum": 0 },
            "fundingTokenAddress": { "type": "string", "minLength": 1 }
        }
    })
}

pub fn funding_token_schema(options: &[String]) -> Value {
    let mut address = json!({ "type": "string", "minLength": 1 });
    if !options.is_empty() {
        address["enum"] = json!(options);
    }
    json!({
        "type": "object",
        "required": ["fundingTokenAddress"],
        "properties": { "fundingTokenAddress": address }
    })
}

pub fn delegation_signing_schema() -> Value {
    json!({
        "type": "object",
        "required": ["outcome", "signedDelegations"],
        "properties": {
            "outcome": { "type": "string", "enum": ["signed"] },
            "signedDelegations": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["delegate", "delegator", "signature"],
                    "properties": {
                        "delegate": { "type": "string", "minLength": 1 },
                        "delegator": { "type": "string", "minLength": 1 },
                        "signature": { "type": "string", "minLength": 1 }
                    }
                }
            }
        }
    })
}
