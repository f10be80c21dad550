//! Pure helpers that turn raw HTTP headers and bodies into canonical packet fields.
//!
//! Nothing here touches the store or returns an error: malformed input degrades
//! to `None`/empty values.

use crate::model::Direction;
use serde_json::{Map, Value};

/// HTTP headers as the proxy observed them. Values are usually strings but may
/// be arrays for repeated headers.
pub type Headers = Map<String, Value>;

/// Probe order for the session header. Exact-case matches win, in this order.
pub const SESSION_HEADER_NAMES: &[&str] = &[
    "mcp-session-id",
    "Mcp-Session-Id",
    "X-MCP-Session-Id",
    "x-mcp-session-id",
    "MCP-Session-Id",
];

fn header_str(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Array(items) => items.iter().find_map(header_str),
        _ => None,
    }
}

/// Session id from the first recognized header carrying a non-empty value.
///
/// The fixed variants are probed first, in order. If none is present, any
/// other casing of `mcp-session-id` / `x-mcp-session-id` is accepted.
pub fn normalize_session_id(headers: &Headers) -> Option<String> {
    for name in SESSION_HEADER_NAMES {
        if let Some(v) = headers.get(*name).and_then(header_str) {
            return Some(v.to_string());
        }
    }
    headers
        .iter()
        .filter(|(k, _)| {
            k.eq_ignore_ascii_case("mcp-session-id") || k.eq_ignore_ascii_case("x-mcp-session-id")
        })
        .find_map(|(_, v)| header_str(v))
        .map(str::to_string)
}

/// `host` or `Host` header value.
pub fn extract_host(headers: &Headers) -> Option<String> {
    ["host", "Host"]
        .iter()
        .find_map(|k| headers.get(*k).and_then(header_str))
        .map(str::to_string)
}

pub fn headers_json(headers: &Headers) -> String {
    // Map<String, Value> serialization cannot fail.
    serde_json::to_string(headers).unwrap_or_else(|_| "{}".into())
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BodyFields {
    pub raw: String,
    pub json: Option<String>,
}

/// Split a captured body into its raw text and JSON text.
///
/// Strings are stored verbatim in both fields without validation; objects and
/// arrays are serialized; anything else (absent, null, numbers, booleans)
/// yields an empty raw body and no JSON.
pub fn extract_body(body: Option<&Value>) -> BodyFields {
    match body {
        Some(Value::String(s)) if !s.is_empty() => BodyFields {
            raw: s.clone(),
            json: Some(s.clone()),
        },
        Some(v @ (Value::Object(_) | Value::Array(_))) => {
            let raw = v.to_string();
            BodyFields {
                json: Some(raw.clone()),
                raw,
            }
        }
        _ => BodyFields::default(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JsonRpcMetadata {
    pub id: Option<String>,
    pub method: Option<String>,
    pub result: Option<String>,
    pub error: Option<String>,
}

/// String form of a JSON-RPC id. Numbers keep serde_json's rendering, so `1`
/// stays `"1"` and `1.5` stays `"1.5"`; explicit `null` and `""` count as absent.
pub fn coerce_id(id: &Value) -> Option<String> {
    match id {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Pull id/method/result/error out of a JSON-RPC envelope.
pub fn extract_jsonrpc_metadata(body: Option<&str>) -> JsonRpcMetadata {
    let Some(text) = body.filter(|t| !t.is_empty()) else {
        return JsonRpcMetadata::default();
    };

    let parsed: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            log::warn!("body is not JSON, skipping JSON-RPC metadata: {e}");
            return JsonRpcMetadata::default();
        }
    };

    let Some(envelope) = parsed.as_object() else {
        return JsonRpcMetadata::default();
    };

    JsonRpcMetadata {
        id: envelope.get("id").and_then(coerce_id),
        method: envelope
            .get("method")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .map(str::to_string),
        result: envelope
            .get("result")
            .filter(|v| is_truthy(v))
            .map(Value::to_string),
        error: envelope
            .get("error")
            .filter(|v| is_truthy(v))
            .map(Value::to_string),
    }
}

/// One-line packet summary: `"{method} {url}[ {rpc}]"` or `"{status}[ {rpc}]"`.
pub fn generate_info(
    direction: Direction,
    method: Option<&str>,
    url: Option<&str>,
    status_code: Option<u16>,
    jsonrpc_method: Option<&str>,
) -> String {
    let mut info = match direction {
        Direction::Request => format!("{} {}", method.unwrap_or(""), url.unwrap_or("")),
        Direction::Response => status_code.map(|c| c.to_string()).unwrap_or_default(),
    };
    if let Some(rpc) = jsonrpc_method {
        info.push(' ');
        info.push_str(rpc);
    }
    info
}

pub fn duration_ms(start_ns: i64, end_ns: i64) -> f64 {
    (end_ns - start_ns) as f64 / 1_000_000.0
}

/// Approximate packet size: serialized headers plus raw body, in bytes.
pub fn packet_length(headers_json: &str, body_raw: &str) -> i64 {
    (headers_json.len() + body_raw.len()) as i64
}
