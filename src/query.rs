//! Read-only forensic queries over packets, conversations and sessions.
//!
//! Every filter field is optional; an omitted (or empty) field places no
//! constraint on its column. Time ranges are inclusive on both ends.

use crate::SharkError;
use crate::builder::{Op, Predicate, QueryBuilder, contains_pattern, escape_like};
use crate::model::{
    ConversationStatistics, ConversationStatus, ConversationView, Direction, PACKET_COLUMNS,
    Packet, PacketStatistics, SESSION_COLUMNS, Session,
};
use rusqlite::{Connection, Row, params_from_iter};
use schemars::JsonSchema;
use serde::Deserialize;

pub const DEFAULT_LIMIT: i64 = 1000;
pub const DEFAULT_SESSION_LIMIT: i64 = 10_000;

/// Exact-match packet filter.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct PacketFilter {
    /// Normalized session id.
    pub session_id: Option<String>,
    /// `request` or `response`.
    pub direction: Option<Direction>,
    /// HTTP method, e.g. POST.
    pub method: Option<String>,
    /// JSON-RPC method, e.g. tools/call.
    pub jsonrpc_method: Option<String>,
    /// HTTP status code.
    pub status_code: Option<i64>,
    /// JSON-RPC id as stored (numbers in decimal form).
    pub jsonrpc_id: Option<String>,
    /// Lower bound on capture time, nanoseconds.
    pub start_time: Option<i64>,
    /// Upper bound on capture time, nanoseconds.
    pub end_time: Option<i64>,
    /// Max rows (default 1000).
    pub limit: Option<i64>,
    /// Rows to skip (default 0).
    pub offset: Option<i64>,
}

/// Substring-matching packet filter with free-text search.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct RequestFilter {
    /// Substring of any textual packet field, or a `"name":"<search>` prefix in the body.
    pub search: Option<String>,
    /// Downstream server whose name appears as `"name":"<server>"` or `"name":"<server>.tool"` in the body.
    pub server_name: Option<String>,
    /// Substring of the session id.
    pub session_id: Option<String>,
    /// `request` or `response`.
    pub direction: Option<Direction>,
    /// Substring of the HTTP method.
    pub method: Option<String>,
    /// Substring of the JSON-RPC method.
    pub jsonrpc_method: Option<String>,
    /// HTTP status code.
    pub status_code: Option<i64>,
    /// Substring of the JSON-RPC id.
    pub jsonrpc_id: Option<String>,
    /// Lower bound on capture time, nanoseconds.
    pub start_time: Option<i64>,
    /// Upper bound on capture time, nanoseconds.
    pub end_time: Option<i64>,
    /// Max rows (default 1000).
    pub limit: Option<i64>,
    /// Rows to skip (default 0).
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct ConversationFilter {
    /// Session id.
    pub session_id: Option<String>,
    /// Conversation method (JSON-RPC method, or HTTP method when absent).
    pub method: Option<String>,
    /// pending, completed, timeout or error.
    pub status: Option<ConversationStatus>,
    /// JSON-RPC id.
    pub jsonrpc_id: Option<String>,
    /// Lower bound on request time, nanoseconds.
    pub start_time: Option<i64>,
    /// Upper bound on request time, nanoseconds.
    pub end_time: Option<i64>,
    /// Max rows (default 1000).
    pub limit: Option<i64>,
    /// Rows to skip (default 0).
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionFilter {
    /// Sessions first seen at or after this time, nanoseconds.
    pub start_time: Option<i64>,
    /// Sessions last seen at or before this time, nanoseconds.
    pub end_time: Option<i64>,
    /// Max rows (default 1000).
    pub limit: Option<i64>,
    /// Rows to skip (default 0).
    pub offset: Option<i64>,
}

/// Scope for the aggregate queries.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct StatsFilter {
    /// Session id.
    pub session_id: Option<String>,
    /// Lower bound, nanoseconds.
    pub start_time: Option<i64>,
    /// Upper bound, nanoseconds.
    pub end_time: Option<i64>,
}

fn text(value: &Option<String>) -> Option<String> {
    value.as_deref().filter(|s| !s.is_empty()).map(str::to_string)
}

fn contains(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(contains_pattern)
}

fn page(limit: Option<i64>, offset: Option<i64>, default_limit: i64) -> (i64, i64) {
    (
        limit.unwrap_or(default_limit).max(0),
        offset.unwrap_or(0).max(0),
    )
}

fn fetch<T>(
    conn: &Connection,
    query: &QueryBuilder,
    map: fn(&Row) -> rusqlite::Result<T>,
) -> Result<Vec<T>, SharkError> {
    let (sql, values) = query.build();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), map)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn fetch_one<T>(
    conn: &Connection,
    query: &QueryBuilder,
    map: fn(&Row) -> rusqlite::Result<T>,
) -> Result<T, SharkError> {
    let (sql, values) = query.build();
    Ok(conn.query_row(&sql, params_from_iter(values.iter()), map)?)
}

fn direction_value(direction: Option<Direction>) -> Option<String> {
    direction.map(|d| d.as_str().to_string())
}

/// Packets matching `filter`, oldest first.
pub fn query_packets(conn: &Connection, filter: &PacketFilter) -> Result<Vec<Packet>, SharkError> {
    let (limit, offset) = page(filter.limit, filter.offset, DEFAULT_LIMIT);
    let mut q = QueryBuilder::new(format!("SELECT {PACKET_COLUMNS} FROM packets"));
    q.push_opt("session_id", Op::Eq, text(&filter.session_id))
        .push_opt("direction", Op::Eq, direction_value(filter.direction))
        .push_opt("method", Op::Eq, text(&filter.method))
        .push_opt("jsonrpc_method", Op::Eq, text(&filter.jsonrpc_method))
        .push_opt("status_code", Op::Eq, filter.status_code)
        .push_opt("timestamp_ns", Op::Gte, filter.start_time)
        .push_opt("timestamp_ns", Op::Lte, filter.end_time)
        .push_opt("jsonrpc_id", Op::Eq, text(&filter.jsonrpc_id))
        .order_by("timestamp_ns ASC, frame_number ASC")
        .paginate(limit, offset);
    fetch(conn, &q, Packet::from_row)
}

const SEARCH_COLUMNS: [&str; 11] = [
    "session_id",
    "method",
    "url",
    "jsonrpc_method",
    "jsonrpc_id",
    "info",
    "body_raw",
    "body_json",
    "headers_json",
    "host",
    "remote_address",
];

fn search_group(search: &str) -> Vec<Predicate> {
    let pattern = contains_pattern(search);
    let name_prefix = format!("%\"name\":\"{}%", escape_like(search));

    let mut group: Vec<Predicate> = SEARCH_COLUMNS
        .iter()
        .map(|&col| Predicate::new(col, Op::Like, pattern.clone()))
        .collect();
    group.push(Predicate::new("body_json", Op::Like, name_prefix.clone()));
    group.push(Predicate::new("body_raw", Op::Like, name_prefix));
    group
}

fn server_name_group(server: &str) -> Vec<Predicate> {
    let escaped = escape_like(server);
    let dotted = format!("%\"name\":\"{escaped}.%");
    let exact = format!("%\"name\":\"{escaped}\"%");
    vec![
        Predicate::new("body_json", Op::Like, dotted.clone()),
        Predicate::new("body_raw", Op::Like, dotted),
        Predicate::new("body_json", Op::Like, exact.clone()),
        Predicate::new("body_raw", Op::Like, exact),
    ]
}

fn request_builder(filter: &RequestFilter) -> QueryBuilder {
    let (limit, offset) = page(filter.limit, filter.offset, DEFAULT_LIMIT);
    let mut q = QueryBuilder::new(format!("SELECT {PACKET_COLUMNS} FROM packets"));

    if let Some(search) = text(&filter.search) {
        q.push_any(search_group(&search));
    }
    q.push_opt("session_id", Op::Like, contains(&filter.session_id))
        .push_opt("direction", Op::Eq, direction_value(filter.direction))
        .push_opt("method", Op::Like, contains(&filter.method))
        .push_opt("jsonrpc_method", Op::Like, contains(&filter.jsonrpc_method))
        .push_opt("status_code", Op::Eq, filter.status_code)
        .push_opt("timestamp_ns", Op::Gte, filter.start_time)
        .push_opt("timestamp_ns", Op::Lte, filter.end_time)
        .push_opt("jsonrpc_id", Op::Like, contains(&filter.jsonrpc_id));
    if let Some(server) = text(&filter.server_name) {
        q.push_any(server_name_group(&server));
    }

    q.order_by("timestamp_ns DESC, frame_number DESC")
        .paginate(limit, offset);
    q
}

/// Packets matching free-text search and substring filters, newest first.
pub fn query_requests(conn: &Connection, filter: &RequestFilter) -> Result<Vec<Packet>, SharkError> {
    fetch(conn, &request_builder(filter), Packet::from_row)
}

const CONVERSATION_SELECT: &str = "SELECT
    c.conversation_id, c.request_frame_number, c.response_frame_number, c.session_id,
    c.jsonrpc_id, c.method, c.request_timestamp_ns, c.response_timestamp_ns,
    c.duration_ms, c.status,
    req.frame_number AS req_frame,
    req.timestamp_iso AS req_timestamp_iso,
    req.method AS req_method,
    req.url AS req_url,
    req.jsonrpc_method AS req_jsonrpc_method,
    req.body_json AS req_body_json,
    req.headers_json AS req_headers_json,
    resp.frame_number AS resp_frame,
    resp.timestamp_iso AS resp_timestamp_iso,
    resp.status_code AS resp_status_code,
    resp.jsonrpc_method AS resp_jsonrpc_method,
    resp.body_json AS resp_body_json,
    resp.headers_json AS resp_headers_json,
    resp.jsonrpc_result AS resp_jsonrpc_result,
    resp.jsonrpc_error AS resp_jsonrpc_error
 FROM conversations c
 LEFT JOIN packets req ON c.request_frame_number = req.frame_number
 LEFT JOIN packets resp ON c.response_frame_number = resp.frame_number";

/// Conversations joined to both packets, oldest request first.
pub fn query_conversations(
    conn: &Connection,
    filter: &ConversationFilter,
) -> Result<Vec<ConversationView>, SharkError> {
    let (limit, offset) = page(filter.limit, filter.offset, DEFAULT_LIMIT);
    let mut q = QueryBuilder::new(CONVERSATION_SELECT);
    q.push_opt("c.session_id", Op::Eq, text(&filter.session_id))
        .push_opt("c.method", Op::Eq, text(&filter.method))
        .push_opt("c.status", Op::Eq, filter.status.map(|s| s.as_str().to_string()))
        .push_opt("c.request_timestamp_ns", Op::Gte, filter.start_time)
        .push_opt("c.request_timestamp_ns", Op::Lte, filter.end_time)
        .push_opt("c.jsonrpc_id", Op::Eq, text(&filter.jsonrpc_id))
        .order_by("c.request_timestamp_ns ASC, c.conversation_id ASC")
        .paginate(limit, offset);
    fetch(conn, &q, ConversationView::from_row)
}

fn session_scoped(session_id: &str, order: &'static str, limit: Option<i64>) -> QueryBuilder {
    let (limit, _) = page(limit, None, DEFAULT_SESSION_LIMIT);
    let mut q = QueryBuilder::new(format!("SELECT {PACKET_COLUMNS} FROM packets"));
    q.push(Predicate::new("session_id", Op::Eq, session_id.to_string()))
        .order_by(order)
        .paginate(limit, 0);
    q
}

/// Every packet of one session, oldest first.
pub fn get_session_packets(
    conn: &Connection,
    session_id: &str,
    limit: Option<i64>,
) -> Result<Vec<Packet>, SharkError> {
    let q = session_scoped(session_id, "timestamp_ns ASC, frame_number ASC", limit);
    fetch(conn, &q, Packet::from_row)
}

/// Every packet of one session, newest first.
pub fn get_session_requests(
    conn: &Connection,
    session_id: &str,
    limit: Option<i64>,
) -> Result<Vec<Packet>, SharkError> {
    let q = session_scoped(session_id, "timestamp_ns DESC, frame_number DESC", limit);
    fetch(conn, &q, Packet::from_row)
}

/// Sessions whose whole lifetime falls in the range, most recently started first.
pub fn get_sessions(conn: &Connection, filter: &SessionFilter) -> Result<Vec<Session>, SharkError> {
    let (limit, offset) = page(filter.limit, filter.offset, DEFAULT_LIMIT);
    let mut q = QueryBuilder::new(format!("SELECT {SESSION_COLUMNS} FROM sessions"));
    q.push_opt("first_seen_ns", Op::Gte, filter.start_time)
        .push_opt("last_seen_ns", Op::Lte, filter.end_time)
        .order_by("first_seen_ns DESC, session_id ASC")
        .paginate(limit, offset);
    fetch(conn, &q, Session::from_row)
}

fn packet_statistics_row(row: &Row) -> rusqlite::Result<PacketStatistics> {
    Ok(PacketStatistics {
        total_packets: row.get("total_packets")?,
        total_requests: row.get("total_requests")?,
        total_responses: row.get("total_responses")?,
        total_errors: row.get("total_errors")?,
        unique_sessions: row.get("unique_sessions")?,
        avg_packet_size: row.get("avg_packet_size")?,
        total_bytes: row.get("total_bytes")?,
        first_packet_ns: row.get("first_packet_ns")?,
        last_packet_ns: row.get("last_packet_ns")?,
    })
}

/// Packet aggregates. Error count covers status codes of 400 and above.
pub fn get_statistics(conn: &Connection, filter: &StatsFilter) -> Result<PacketStatistics, SharkError> {
    let mut q = QueryBuilder::new(
        "SELECT
            COUNT(*) AS total_packets,
            COUNT(CASE WHEN direction = 'request' THEN 1 END) AS total_requests,
            COUNT(CASE WHEN direction = 'response' THEN 1 END) AS total_responses,
            COUNT(CASE WHEN status_code >= 400 THEN 1 END) AS total_errors,
            COUNT(DISTINCT session_id) AS unique_sessions,
            AVG(length) AS avg_packet_size,
            SUM(length) AS total_bytes,
            MIN(timestamp_ns) AS first_packet_ns,
            MAX(timestamp_ns) AS last_packet_ns
         FROM packets",
    );
    q.push_opt("session_id", Op::Eq, text(&filter.session_id))
        .push_opt("timestamp_ns", Op::Gte, filter.start_time)
        .push_opt("timestamp_ns", Op::Lte, filter.end_time);
    fetch_one(conn, &q, packet_statistics_row)
}

fn conversation_statistics_row(row: &Row) -> rusqlite::Result<ConversationStatistics> {
    Ok(ConversationStatistics {
        total_conversations: row.get("total_conversations")?,
        completed: row.get("completed")?,
        pending: row.get("pending")?,
        errors: row.get("errors")?,
        timeouts: row.get("timeouts")?,
        avg_duration_ms: row.get("avg_duration_ms")?,
        min_duration_ms: row.get("min_duration_ms")?,
        max_duration_ms: row.get("max_duration_ms")?,
    })
}

/// Conversation counts by status and duration aggregates, scoped by request time.
pub fn get_conversation_statistics(
    conn: &Connection,
    filter: &StatsFilter,
) -> Result<ConversationStatistics, SharkError> {
    let mut q = QueryBuilder::new(
        "SELECT
            COUNT(*) AS total_conversations,
            COUNT(CASE WHEN status = 'completed' THEN 1 END) AS completed,
            COUNT(CASE WHEN status = 'pending' THEN 1 END) AS pending,
            COUNT(CASE WHEN status = 'error' THEN 1 END) AS errors,
            COUNT(CASE WHEN status = 'timeout' THEN 1 END) AS timeouts,
            AVG(duration_ms) AS avg_duration_ms,
            MIN(duration_ms) AS min_duration_ms,
            MAX(duration_ms) AS max_duration_ms
         FROM conversations",
    );
    q.push_opt("session_id", Op::Eq, text(&filter.session_id))
        .push_opt("request_timestamp_ns", Op::Gte, filter.start_time)
        .push_opt("request_timestamp_ns", Op::Lte, filter.end_time);
    fetch_one(conn, &q, conversation_statistics_row)
}
