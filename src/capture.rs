//! Capture logger: persists observed requests/responses as packets, keeps the
//! per-session aggregate current and pairs responses with their requests.

use crate::SharkError;
use crate::clock::{Clock, SystemClock};
use crate::metrics;
use crate::model::{ConversationStatus, Direction, Session, SESSION_COLUMNS};
use crate::normalize::{
    self, Headers, duration_ms, extract_body, extract_host, extract_jsonrpc_metadata,
    generate_info, normalize_session_id, packet_length,
};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Caller-supplied JSON-RPC id, coerced like ids read from a body.
fn deserialize_jsonrpc_id<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let id = Option::<Value>::deserialize(d)?;
    Ok(id.as_ref().and_then(normalize::coerce_id))
}

/// A request observed by the proxy.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub remote_address: Option<String>,
}

/// A response observed by the proxy.
///
/// `request_frame_number` pins the conversation to close. Without it the
/// response is matched by JSON-RPC id: the body's id wins over `jsonrpc_id`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogResponse {
    pub status_code: u16,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub request_frame_number: Option<i64>,
    #[serde(default)]
    pub request_timestamp_ns: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_jsonrpc_id")]
    pub jsonrpc_id: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub remote_address: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoggedRequest {
    pub frame_number: i64,
    pub timestamp_ns: i64,
    /// Conversation opened for this request; `None` without a JSON-RPC id.
    pub conversation_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoggedResponse {
    pub frame_number: i64,
    pub timestamp_ns: i64,
    /// Conversation closed by this response; `None` when uncorrelated.
    pub conversation_id: Option<i64>,
}

/// Network metadata and timing of one packet, as seen by its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSighting {
    pub session_id: String,
    pub timestamp_ns: i64,
    pub user_agent: Option<String>,
    pub remote_address: Option<String>,
    pub host: Option<String>,
}

/// Keep the old value unless a new one is present.
pub fn merge_field(old: Option<String>, new: Option<String>) -> Option<String> {
    new.or(old)
}

/// Fold one packet sighting into the session aggregate.
///
/// Seen-times are min/max so out-of-order arrivals never shrink the window.
pub fn merge_session(existing: Option<Session>, sighting: &SessionSighting) -> Session {
    match existing {
        None => Session {
            session_id: sighting.session_id.clone(),
            first_seen_ns: sighting.timestamp_ns,
            last_seen_ns: sighting.timestamp_ns,
            packet_count: 1,
            user_agent: sighting.user_agent.clone(),
            remote_address: sighting.remote_address.clone(),
            host: sighting.host.clone(),
        },
        Some(old) => Session {
            session_id: old.session_id,
            first_seen_ns: old.first_seen_ns.min(sighting.timestamp_ns),
            last_seen_ns: old.last_seen_ns.max(sighting.timestamp_ns),
            packet_count: old.packet_count + 1,
            user_agent: merge_field(old.user_agent, sighting.user_agent.clone()),
            remote_address: merge_field(old.remote_address, sighting.remote_address.clone()),
            host: merge_field(old.host, sighting.host.clone()),
        },
    }
}

struct NewPacket<'a> {
    timestamp_ns: i64,
    timestamp_iso: &'a str,
    direction: Direction,
    session_id: Option<&'a str>,
    method: Option<&'a str>,
    url: Option<&'a str>,
    status_code: Option<u16>,
    headers_json: &'a str,
    body_raw: &'a str,
    body_json: Option<&'a str>,
    jsonrpc_id: Option<&'a str>,
    jsonrpc_method: Option<&'a str>,
    jsonrpc_result: Option<&'a str>,
    jsonrpc_error: Option<&'a str>,
    info: &'a str,
    user_agent: Option<&'a str>,
    remote_address: Option<&'a str>,
    host: Option<&'a str>,
}

fn insert_packet(conn: &Connection, p: &NewPacket) -> Result<i64, SharkError> {
    conn.execute(
        "INSERT INTO packets (
            timestamp_ns, timestamp_iso, direction, protocol, session_id,
            method, url, status_code, headers_json, body_raw, body_json,
            jsonrpc_id, jsonrpc_method, jsonrpc_result, jsonrpc_error,
            length, info, user_agent, remote_address, host
         ) VALUES (?1, ?2, ?3, 'HTTP', ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
        params![
            p.timestamp_ns,
            p.timestamp_iso,
            p.direction,
            p.session_id,
            p.method,
            p.url,
            p.status_code,
            p.headers_json,
            p.body_raw,
            p.body_json,
            p.jsonrpc_id,
            p.jsonrpc_method,
            p.jsonrpc_result,
            p.jsonrpc_error,
            packet_length(p.headers_json, p.body_raw),
            p.info,
            p.user_agent,
            p.remote_address,
            p.host,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn upsert_session(conn: &Connection, sighting: &SessionSighting) -> Result<Session, SharkError> {
    let existing = conn
        .query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?1"),
            params![sighting.session_id],
            Session::from_row,
        )
        .optional()?;

    let merged = merge_session(existing, sighting);
    conn.execute(
        "INSERT INTO sessions (session_id, first_seen_ns, last_seen_ns, packet_count, user_agent, remote_address, host)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(session_id) DO UPDATE SET
            first_seen_ns = excluded.first_seen_ns,
            last_seen_ns = excluded.last_seen_ns,
            packet_count = excluded.packet_count,
            user_agent = excluded.user_agent,
            remote_address = excluded.remote_address,
            host = excluded.host",
        params![
            merged.session_id,
            merged.first_seen_ns,
            merged.last_seen_ns,
            merged.packet_count,
            merged.user_agent,
            merged.remote_address,
            merged.host,
        ],
    )?;
    Ok(merged)
}

fn open_conversation_row(r: &rusqlite::Row) -> rusqlite::Result<(i64, i64)> {
    Ok((r.get(0)?, r.get(1)?))
}

/// Conversation a response should close, with its request timestamp.
fn find_open_conversation(
    conn: &Connection,
    request_frame_number: Option<i64>,
    jsonrpc_id: Option<&str>,
) -> Result<Option<(i64, i64)>, SharkError> {
    if let Some(frame) = request_frame_number {
        // Explicit linkage wins and ignores the current status.
        let found = conn
            .query_row(
                "SELECT conversation_id, request_timestamp_ns FROM conversations
                 WHERE request_frame_number = ?1
                 ORDER BY conversation_id DESC LIMIT 1",
                params![frame],
                open_conversation_row,
            )
            .optional()?;
        if found.is_none() {
            log::debug!("no conversation for request frame {frame}");
        }
        return Ok(found);
    }

    let Some(id) = jsonrpc_id else {
        return Ok(None);
    };

    // Newest unmatched request with this id wins when ids collide.
    let found = conn
        .query_row(
            "SELECT conversation_id, request_timestamp_ns FROM conversations
             WHERE jsonrpc_id = ?1 AND response_frame_number IS NULL
             ORDER BY request_timestamp_ns DESC, conversation_id DESC
             LIMIT 1",
            params![id],
            open_conversation_row,
        )
        .optional()?;
    if found.is_none() {
        log::debug!("no open conversation for jsonrpc id {id:?}");
    }
    Ok(found)
}

/// Persists captured traffic into the store it was given.
pub struct CaptureLogger<'c, C: Clock = SystemClock> {
    conn: &'c Connection,
    clock: C,
}

impl<'c> CaptureLogger<'c, SystemClock> {
    pub fn new(conn: &'c Connection) -> Self {
        Self::with_clock(conn, SystemClock)
    }
}

impl<'c, C: Clock> CaptureLogger<'c, C> {
    pub fn with_clock(conn: &'c Connection, clock: C) -> Self {
        Self { conn, clock }
    }

    pub fn log_request(&self, req: &LogRequest) -> Result<LoggedRequest, SharkError> {
        let timestamp_ns = self.clock.now_ns();
        let timestamp_iso = self.clock.now_iso();

        let session_id = normalize_session_id(&req.headers);
        let host = extract_host(&req.headers);
        let body = extract_body(req.body.as_ref());
        let headers_json = normalize::headers_json(&req.headers);
        let rpc = extract_jsonrpc_metadata(body.json.as_deref().or(Some(body.raw.as_str())));
        let info = generate_info(
            Direction::Request,
            Some(&req.method),
            Some(&req.url),
            None,
            rpc.method.as_deref(),
        );

        let tx = self.conn.unchecked_transaction()?;

        let frame_number = insert_packet(
            &tx,
            &NewPacket {
                timestamp_ns,
                timestamp_iso: &timestamp_iso,
                direction: Direction::Request,
                session_id: session_id.as_deref(),
                method: Some(&req.method),
                url: Some(&req.url),
                status_code: None,
                headers_json: &headers_json,
                body_raw: &body.raw,
                body_json: body.json.as_deref(),
                jsonrpc_id: rpc.id.as_deref(),
                jsonrpc_method: rpc.method.as_deref(),
                jsonrpc_result: None,
                jsonrpc_error: None,
                info: &info,
                user_agent: req.user_agent.as_deref(),
                remote_address: req.remote_address.as_deref(),
                host: host.as_deref(),
            },
        )?;

        if let Some(sid) = &session_id {
            upsert_session(
                &tx,
                &SessionSighting {
                    session_id: sid.clone(),
                    timestamp_ns,
                    user_agent: req.user_agent.clone(),
                    remote_address: req.remote_address.clone(),
                    host: host.clone(),
                },
            )?;
        }

        let conversation_id = match &rpc.id {
            Some(id) => {
                tx.execute(
                    "INSERT INTO conversations (
                        request_frame_number, session_id, jsonrpc_id, method,
                        request_timestamp_ns, status
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        frame_number,
                        session_id,
                        id,
                        rpc.method.as_deref().unwrap_or(&req.method),
                        timestamp_ns,
                        ConversationStatus::Pending,
                    ],
                )?;
                Some(tx.last_insert_rowid())
            }
            None => None,
        };

        tx.commit()?;

        metrics::record_packet(Direction::Request);
        log::debug!("request frame {frame_number}: {info}");
        Ok(LoggedRequest {
            frame_number,
            timestamp_ns,
            conversation_id,
        })
    }

    pub fn log_response(&self, resp: &LogResponse) -> Result<LoggedResponse, SharkError> {
        let timestamp_ns = self.clock.now_ns();
        let timestamp_iso = self.clock.now_iso();

        let session_id = normalize_session_id(&resp.headers);
        let host = extract_host(&resp.headers);
        let body = extract_body(resp.body.as_ref());
        let headers_json = normalize::headers_json(&resp.headers);
        let rpc = extract_jsonrpc_metadata(body.json.as_deref().or(Some(body.raw.as_str())));
        let jsonrpc_id = rpc
            .id
            .clone()
            .or_else(|| resp.jsonrpc_id.clone().filter(|id| !id.is_empty()));
        let info = generate_info(
            Direction::Response,
            None,
            None,
            Some(resp.status_code),
            rpc.method.as_deref(),
        );

        let tx = self.conn.unchecked_transaction()?;

        let frame_number = insert_packet(
            &tx,
            &NewPacket {
                timestamp_ns,
                timestamp_iso: &timestamp_iso,
                direction: Direction::Response,
                session_id: session_id.as_deref(),
                method: None,
                url: None,
                status_code: Some(resp.status_code),
                headers_json: &headers_json,
                body_raw: &body.raw,
                body_json: body.json.as_deref(),
                jsonrpc_id: jsonrpc_id.as_deref(),
                jsonrpc_method: rpc.method.as_deref(),
                jsonrpc_result: rpc.result.as_deref(),
                jsonrpc_error: rpc.error.as_deref(),
                info: &info,
                user_agent: resp.user_agent.as_deref(),
                remote_address: resp.remote_address.as_deref(),
                host: host.as_deref(),
            },
        )?;

        if let Some(sid) = &session_id {
            upsert_session(
                &tx,
                &SessionSighting {
                    session_id: sid.clone(),
                    timestamp_ns,
                    user_agent: resp.user_agent.clone(),
                    remote_address: resp.remote_address.clone(),
                    host: host.clone(),
                },
            )?;
        }

        let open = find_open_conversation(&tx, resp.request_frame_number, jsonrpc_id.as_deref())?;
        let conversation_id = match open {
            Some((conversation_id, stored_request_ns)) => {
                let start_ns = resp.request_timestamp_ns.unwrap_or(stored_request_ns);
                let status = ConversationStatus::for_http_status(resp.status_code);
                tx.execute(
                    "UPDATE conversations
                     SET response_frame_number = ?1,
                         response_timestamp_ns = ?2,
                         duration_ms = ?3,
                         status = ?4
                     WHERE conversation_id = ?5",
                    params![
                        frame_number,
                        timestamp_ns,
                        duration_ms(start_ns, timestamp_ns).max(0.0),
                        status,
                        conversation_id,
                    ],
                )?;
                Some(conversation_id)
            }
            None => None,
        };

        tx.commit()?;

        metrics::record_packet(Direction::Response);
        metrics::record_correlation(conversation_id.is_some());
        log::debug!(
            "response frame {frame_number}: {info} (conversation {conversation_id:?})"
        );
        Ok(LoggedResponse {
            frame_number,
            timestamp_ns,
            conversation_id,
        })
    }
}
