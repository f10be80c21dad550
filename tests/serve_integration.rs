use mcp_shark::capture::{CaptureLogger, LogRequest, LogResponse};
use mcp_shark::clock::ManualClock;
use mcp_shark::query::{ConversationFilter, PacketFilter, RequestFilter, SessionFilter, StatsFilter};
use mcp_shark::serve::{SessionPacketsParams, SharkServer};
use rusqlite::Connection;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

fn request(session: &str, id: i64, method: &str) -> LogRequest {
    LogRequest {
        method: "POST".into(),
        url: "/mcp".into(),
        headers: json!({"mcp-session-id": session, "host": "proxy.local"})
            .as_object()
            .cloned()
            .unwrap(),
        body: Some(json!({"jsonrpc": "2.0", "id": id, "method": method})),
        ..Default::default()
    }
}

fn response(session: &str, id: i64, status_code: u16) -> LogResponse {
    LogResponse {
        status_code,
        headers: json!({"mcp-session-id": session}).as_object().cloned().unwrap(),
        body: Some(json!({"jsonrpc": "2.0", "id": id, "result": {"ok": true}})),
        ..Default::default()
    }
}

fn test_db() -> Arc<Mutex<Connection>> {
    let mut conn = Connection::open_in_memory().unwrap();
    mcp_shark::schema_migrations().to_latest(&mut conn).unwrap();

    {
        let logger = CaptureLogger::with_clock(&conn, ManualClock::new(1_000_000, 1_000_000));
        logger.log_request(&request("sess-a", 1, "initialize")).unwrap();
        logger.log_response(&response("sess-a", 1, 200)).unwrap();
        logger.log_request(&request("sess-a", 2, "tools/call")).unwrap();
        logger.log_response(&response("sess-a", 2, 503)).unwrap();
        logger.log_request(&request("sess-b", 1, "tools/list")).unwrap();
    }

    Arc::new(Mutex::new(conn))
}

fn make_server() -> SharkServer {
    SharkServer::new(test_db())
}

/// Extract result text from a CallToolResult
fn result_text(result: &rmcp::model::CallToolResult) -> String {
    result
        .content
        .first()
        .map(|c| c.as_text().unwrap().text.clone())
        .unwrap_or_default()
}

fn result_json(result: &rmcp::model::CallToolResult) -> Value {
    serde_json::from_str(&result_text(result)).unwrap()
}

#[test]
fn query_packets_returns_json_rows() {
    let server = make_server();
    let result = server
        .do_query_packets(PacketFilter {
            session_id: Some("sess-a".into()),
            ..Default::default()
        })
        .unwrap();
    let rows = result_json(&result);
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0]["direction"], "request");
    assert_eq!(rows[0]["jsonrpc_method"], "initialize");
}

#[test]
fn query_packets_limit_is_clamped_to_at_least_one() {
    let server = make_server();
    let result = server
        .do_query_packets(PacketFilter {
            limit: Some(0),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(result_json(&result).as_array().unwrap().len(), 1);
}

#[test]
fn query_requests_newest_first() {
    let server = make_server();
    let result = server
        .do_query_requests(RequestFilter {
            search: Some("proxy.local".into()),
            ..Default::default()
        })
        .unwrap();
    let rows = result_json(&result);
    let methods: Vec<&str> = rows
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["jsonrpc_method"].as_str().unwrap())
        .collect();
    assert_eq!(methods, vec!["tools/list", "tools/call", "initialize"]);
}

#[test]
fn query_conversations_exposes_both_sides() {
    let server = make_server();
    let result = server
        .do_query_conversations(ConversationFilter {
            session_id: Some("sess-a".into()),
            ..Default::default()
        })
        .unwrap();
    let rows = result_json(&result);
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["status"], "completed");
    assert_eq!(rows[1]["status"], "error");
    assert_eq!(rows[1]["resp_status_code"], 503);
    assert_eq!(rows[1]["req_url"], "/mcp");
}

#[test]
fn pending_conversation_serializes_null_response() {
    let server = make_server();
    let result = server
        .do_query_conversations(ConversationFilter {
            session_id: Some("sess-b".into()),
            ..Default::default()
        })
        .unwrap();
    let rows = result_json(&result);
    let row = &rows[0];
    assert_eq!(row["status"], "pending");
    assert!(row["resp_frame"].is_null());
    assert!(row["resp_body_json"].is_null());
    assert!(row["duration_ms"].is_null());
}

#[test]
fn session_packets_in_both_orders() {
    let server = make_server();
    let params = |limit| SessionPacketsParams {
        session_id: "sess-a".into(),
        limit,
    };

    let asc = result_json(&server.do_session_packets(params(None)).unwrap());
    let desc = result_json(&server.do_session_requests(params(None)).unwrap());
    assert_eq!(asc.as_array().unwrap().len(), 4);
    assert_eq!(asc[0]["frame_number"], desc[3]["frame_number"]);

    let capped = result_json(&server.do_session_packets(params(Some(2))).unwrap());
    assert_eq!(capped.as_array().unwrap().len(), 2);
}

#[test]
fn session_packets_rejects_empty_id() {
    let server = make_server();
    let result = server
        .do_session_packets(SessionPacketsParams {
            session_id: String::new(),
            limit: None,
        })
        .unwrap();
    assert_eq!(result.is_error, Some(true));
}

#[test]
fn sessions_listing() {
    let server = make_server();
    let rows = result_json(&server.do_sessions(SessionFilter::default()).unwrap());
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["session_id"], "sess-b");
    assert_eq!(rows[1]["packet_count"], 4);
    assert_eq!(rows[1]["host"], "proxy.local");
}

#[test]
fn statistics_tools() {
    let server = make_server();
    let stats = result_json(&server.do_statistics(StatsFilter::default()).unwrap());
    assert_eq!(stats["total_packets"], 5);
    assert_eq!(stats["total_requests"], 3);
    assert_eq!(stats["total_responses"], 2);
    assert_eq!(stats["total_errors"], 1);
    assert_eq!(stats["unique_sessions"], 2);

    let convs = result_json(
        &server
            .do_conversation_statistics(StatsFilter {
                session_id: Some("sess-a".into()),
                ..Default::default()
            })
            .unwrap(),
    );
    assert_eq!(convs["total_conversations"], 2);
    assert_eq!(convs["completed"], 1);
    assert_eq!(convs["errors"], 1);
    assert_eq!(convs["pending"], 0);
}

#[test]
fn filters_accept_camel_case_tool_arguments() {
    let filter: RequestFilter =
        serde_json::from_value(json!({"sessionId": "sess", "jsonrpcMethod": "tools"})).unwrap();
    let server = make_server();
    let rows = result_json(&server.do_query_requests(filter).unwrap());
    // "sess" is a substring of both session ids.
    assert_eq!(rows.as_array().unwrap().len(), 2);
}
