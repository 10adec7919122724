//! Wire types for the line-delimited JSON-RPC channel.
//!
//! One inbound line is one [`Request`]; one outbound line is one [`Reply`]. Tool calls answer with
//! a [`ToolResult`] inside the reply's `result` member.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol versions the server can speak, in no particular order.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26"];

/// Assumed when `initialize` carries no `protocolVersion`.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INTERNAL_ERROR: i64 = -32603;
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid Request: expected a JSON object")]
    NotAnObject,
}

impl ParseError {
    #[must_use]
    pub const fn code(&self) -> i64 {
        match self {
            Self::Json(_) => error_codes::PARSE_ERROR,
            Self::NotAnObject => error_codes::INVALID_REQUEST,
        }
    }
}

/// One parsed inbound message.
///
/// `id: None` covers both an absent member and an explicit `null`.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: Option<Value>,
    pub method: Option<String>,
    pub params: Value,
}

impl Request {
    /// A message with a method and no id never receives a reply.
    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.is_none() && self.method.is_some()
    }

    #[must_use]
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    #[must_use]
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.param(key).and_then(Value::as_str)
    }

    /// The id to echo back; `null` when the caller sent none.
    #[must_use]
    pub fn reply_id(&self) -> Value {
        self.id.clone().unwrap_or(Value::Null)
    }
}

/// Parse one inbound line.
pub fn parse_request(line: &str) -> Result<Request, ParseError> {
    let value: Value = serde_json::from_str(line)?;
    let Value::Object(mut obj) = value else {
        return Err(ParseError::NotAnObject);
    };

    let id = obj.remove("id").filter(|id| !id.is_null());
    let method = obj
        .remove("method")
        .and_then(|m| m.as_str().map(str::to_string));
    let params = match obj.remove("params") {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(other) => other,
    };

    Ok(Request { id, method, params })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ReplyPayload {
    Result(Value),
    Error(RpcError),
}

/// One outbound message, correlated to a request by `id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reply {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(flatten)]
    pub payload: ReplyPayload,
}

impl Reply {
    #[must_use]
    pub fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            payload: ReplyPayload::Result(result),
        }
    }

    #[must_use]
    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            payload: ReplyPayload::Error(RpcError {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn to_line(&self) -> serde_json::Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

/// Pick the caller's version when supported, else the greatest supported one.
#[must_use]
pub fn negotiate_version(requested: Option<&str>) -> &'static str {
    let requested = requested.unwrap_or(DEFAULT_PROTOCOL_VERSION);
    if let Some(found) = SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .find(|v| **v == requested)
    {
        return found;
    }
    SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .max()
        .copied()
        .unwrap_or(DEFAULT_PROTOCOL_VERSION)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub server_info: ServerInfo,
    pub capabilities: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    Text { text: String },
}

impl Content {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Result of one `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolResult {
    pub content: Vec<Content>,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl ToolResult {
    #[must_use]
    pub fn text(text: impl Into<String>, is_error: bool) -> Self {
        Self {
            content: vec![Content::text(text)],
            is_error,
        }
    }

    #[must_use]
    pub fn ok(text: impl Into<String>) -> Self {
        Self::text(text, false)
    }

    #[must_use]
    pub fn error(text: impl Into<String>) -> Self {
        Self::text(text, true)
    }

    /// All text blocks joined with newlines.
    #[must_use]
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .map(|c| match c {
                Content::Text { text } => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
