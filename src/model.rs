use rusqlite::Row;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Request => "request",
            Direction::Response => "response",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Pending,
    Completed,
    Timeout,
    Error,
}

impl ConversationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConversationStatus::Pending => "pending",
            ConversationStatus::Completed => "completed",
            ConversationStatus::Timeout => "timeout",
            ConversationStatus::Error => "error",
        }
    }

    /// Status of a conversation closed by a response with this HTTP status.
    pub fn for_http_status(status_code: u16) -> Self {
        if (200..300).contains(&status_code) {
            ConversationStatus::Completed
        } else {
            ConversationStatus::Error
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown value: {:?}", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

macro_rules! text_enum {
    ($ty:ty, [$($variant:expr),+ $(,)?]) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                [$($variant),+]
                    .into_iter()
                    .find(|v| v.as_str() == s)
                    .ok_or_else(|| UnknownVariant(s.to_string()))
            }
        }

        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: UnknownVariant| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

text_enum!(Direction, [Direction::Request, Direction::Response]);
text_enum!(
    ConversationStatus,
    [
        ConversationStatus::Pending,
        ConversationStatus::Completed,
        ConversationStatus::Timeout,
        ConversationStatus::Error,
    ]
);

/// One recorded HTTP request or response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Packet {
    pub frame_number: i64,
    pub timestamp_ns: i64,
    pub timestamp_iso: String,
    pub direction: Direction,
    pub protocol: String,
    pub session_id: Option<String>,
    pub method: Option<String>,
    pub url: Option<String>,
    pub status_code: Option<i64>,
    pub headers_json: String,
    pub body_raw: Option<String>,
    pub body_json: Option<String>,
    pub jsonrpc_id: Option<String>,
    pub jsonrpc_method: Option<String>,
    pub jsonrpc_result: Option<String>,
    pub jsonrpc_error: Option<String>,
    pub length: i64,
    pub info: Option<String>,
    pub user_agent: Option<String>,
    pub remote_address: Option<String>,
    pub host: Option<String>,
}

pub const PACKET_COLUMNS: &str = "frame_number, timestamp_ns, timestamp_iso, direction, protocol,
     session_id, method, url, status_code, headers_json, body_raw, body_json,
     jsonrpc_id, jsonrpc_method, jsonrpc_result, jsonrpc_error, length, info,
     user_agent, remote_address, host";

impl Packet {
    pub fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Packet {
            frame_number: row.get("frame_number")?,
            timestamp_ns: row.get("timestamp_ns")?,
            timestamp_iso: row.get("timestamp_iso")?,
            direction: row.get("direction")?,
            protocol: row.get("protocol")?,
            session_id: row.get("session_id")?,
            method: row.get("method")?,
            url: row.get("url")?,
            status_code: row.get("status_code")?,
            headers_json: row.get("headers_json")?,
            body_raw: row.get("body_raw")?,
            body_json: row.get("body_json")?,
            jsonrpc_id: row.get("jsonrpc_id")?,
            jsonrpc_method: row.get("jsonrpc_method")?,
            jsonrpc_result: row.get("jsonrpc_result")?,
            jsonrpc_error: row.get("jsonrpc_error")?,
            length: row.get("length")?,
            info: row.get("info")?,
            user_agent: row.get("user_agent")?,
            remote_address: row.get("remote_address")?,
            host: row.get("host")?,
        })
    }
}

/// Aggregate of all packets sharing one normalized session id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub session_id: String,
    pub first_seen_ns: i64,
    pub last_seen_ns: i64,
    pub packet_count: i64,
    pub user_agent: Option<String>,
    pub remote_address: Option<String>,
    pub host: Option<String>,
}

pub const SESSION_COLUMNS: &str =
    "session_id, first_seen_ns, last_seen_ns, packet_count, user_agent, remote_address, host";

impl Session {
    pub fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Session {
            session_id: row.get("session_id")?,
            first_seen_ns: row.get("first_seen_ns")?,
            last_seen_ns: row.get("last_seen_ns")?,
            packet_count: row.get::<_, Option<i64>>("packet_count")?.unwrap_or(0),
            user_agent: row.get("user_agent")?,
            remote_address: row.get("remote_address")?,
            host: row.get("host")?,
        })
    }
}

/// A conversation joined to its request and (possibly absent) response packet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationView {
    pub conversation_id: i64,
    pub request_frame_number: i64,
    pub response_frame_number: Option<i64>,
    pub session_id: Option<String>,
    pub jsonrpc_id: Option<String>,
    pub method: Option<String>,
    pub request_timestamp_ns: i64,
    pub response_timestamp_ns: Option<i64>,
    pub duration_ms: Option<f64>,
    pub status: ConversationStatus,

    pub req_frame: Option<i64>,
    pub req_timestamp_iso: Option<String>,
    pub req_method: Option<String>,
    pub req_url: Option<String>,
    pub req_jsonrpc_method: Option<String>,
    pub req_body_json: Option<String>,
    pub req_headers_json: Option<String>,

    pub resp_frame: Option<i64>,
    pub resp_timestamp_iso: Option<String>,
    pub resp_status_code: Option<i64>,
    pub resp_jsonrpc_method: Option<String>,
    pub resp_body_json: Option<String>,
    pub resp_headers_json: Option<String>,
    pub resp_jsonrpc_result: Option<String>,
    pub resp_jsonrpc_error: Option<String>,
}

impl ConversationView {
    pub fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ConversationView {
            conversation_id: row.get("conversation_id")?,
            request_frame_number: row.get("request_frame_number")?,
            response_frame_number: row.get("response_frame_number")?,
            session_id: row.get("session_id")?,
            jsonrpc_id: row.get("jsonrpc_id")?,
            method: row.get("method")?,
            request_timestamp_ns: row.get("request_timestamp_ns")?,
            response_timestamp_ns: row.get("response_timestamp_ns")?,
            duration_ms: row.get("duration_ms")?,
            status: row
                .get::<_, Option<ConversationStatus>>("status")?
                .unwrap_or(ConversationStatus::Pending),
            req_frame: row.get("req_frame")?,
            req_timestamp_iso: row.get("req_timestamp_iso")?,
            req_method: row.get("req_method")?,
            req_url: row.get("req_url")?,
            req_jsonrpc_method: row.get("req_jsonrpc_method")?,
            req_body_json: row.get("req_body_json")?,
            req_headers_json: row.get("req_headers_json")?,
            resp_frame: row.get("resp_frame")?,
            resp_timestamp_iso: row.get("resp_timestamp_iso")?,
            resp_status_code: row.get("resp_status_code")?,
            resp_jsonrpc_method: row.get("resp_jsonrpc_method")?,
            resp_body_json: row.get("resp_body_json")?,
            resp_headers_json: row.get("resp_headers_json")?,
            resp_jsonrpc_result: row.get("resp_jsonrpc_result")?,
            resp_jsonrpc_error: row.get("resp_jsonrpc_error")?,
        })
    }

    /// True when every `resp_*` projection is null.
    pub fn response_side_empty(&self) -> bool {
        self.resp_frame.is_none()
            && self.resp_timestamp_iso.is_none()
            && self.resp_status_code.is_none()
            && self.resp_jsonrpc_method.is_none()
            && self.resp_body_json.is_none()
            && self.resp_headers_json.is_none()
            && self.resp_jsonrpc_result.is_none()
            && self.resp_jsonrpc_error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PacketStatistics {
    pub total_packets: i64,
    pub total_requests: i64,
    pub total_responses: i64,
    pub total_errors: i64,
    pub unique_sessions: i64,
    pub avg_packet_size: Option<f64>,
    pub total_bytes: Option<i64>,
    pub first_packet_ns: Option<i64>,
    pub last_packet_ns: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationStatistics {
    pub total_conversations: i64,
    pub completed: i64,
    pub pending: i64,
    pub errors: i64,
    pub timeouts: i64,
    pub avg_duration_ms: Option<f64>,
    pub min_duration_ms: Option<f64>,
    pub max_duration_ms: Option<f64>,
}
