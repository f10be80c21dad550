use mcp_shark::capture::{CaptureLogger, LogRequest, LogResponse};
use mcp_shark::clock::ManualClock;
use mcp_shark::db::{open_db, open_in_memory};
use mcp_shark::model::{ConversationStatus, Direction};
use mcp_shark::normalize::{Headers, extract_jsonrpc_metadata, normalize_session_id};
use mcp_shark::query::{
    ConversationFilter, PacketFilter, RequestFilter, StatsFilter, get_conversation_statistics,
    get_session_packets, get_sessions, get_statistics, query_conversations, query_packets,
    query_requests,
};
use mcp_shark::reaper::reap_stale_conversations;
use rusqlite::Connection;
use serde_json::{Value, json};

const MS: i64 = 1_000_000;

fn headers(v: Value) -> Headers {
    v.as_object().cloned().unwrap()
}

fn call(session: &str, id: Value, method: &str) -> LogRequest {
    LogRequest {
        method: "POST".into(),
        url: "/mcp".into(),
        headers: headers(json!({"Mcp-Session-Id": session, "Host": "127.0.0.1:9851"})),
        body: Some(json!({"jsonrpc": "2.0", "id": id, "method": method, "params": {}})),
        user_agent: Some("inspector/0.9".into()),
        remote_address: Some("10.0.0.7".into()),
    }
}

fn result(session: &str, id: Value, status_code: u16) -> LogResponse {
    LogResponse {
        status_code,
        headers: headers(json!({"Mcp-Session-Id": session})),
        body: Some(json!({"jsonrpc": "2.0", "id": id, "result": {"content": []}})),
        ..Default::default()
    }
}

fn count(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |r| r.get(0)).unwrap()
}

#[test]
fn frame_numbers_strictly_increase_across_directions_and_sessions() {
    let conn = open_in_memory().unwrap();
    let logger = CaptureLogger::with_clock(&conn, ManualClock::new(0, MS));

    let mut frames = Vec::new();
    for (i, session) in ["a", "b", "a", "c"].iter().enumerate() {
        frames.push(logger.log_request(&call(session, json!(i), "ping")).unwrap().frame_number);
        frames.push(
            logger
                .log_response(&result(session, json!(i), 200))
                .unwrap()
                .frame_number,
        );
    }
    frames.push(
        logger
            .log_request(&LogRequest {
                method: "GET".into(),
                url: "/sse".into(),
                ..Default::default()
            })
            .unwrap()
            .frame_number,
    );

    assert!(frames.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(count(&conn, "SELECT COUNT(DISTINCT frame_number) FROM packets"), 9);
}

#[test]
fn response_closes_conversation_for_its_id() {
    let conn = open_in_memory().unwrap();
    let logger = CaptureLogger::with_clock(&conn, ManualClock::new(0, 3 * MS));

    logger.log_request(&call("s", json!(42), "tools/call")).unwrap();
    let resp = logger.log_response(&result("s", json!(42), 200)).unwrap();

    let rows = query_conversations(
        &conn,
        &ConversationFilter {
            jsonrpc_id: Some("42".into()),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(rows.len(), 1);
    let conv = &rows[0];
    assert_eq!(conv.status, ConversationStatus::Completed);
    assert_eq!(conv.response_frame_number, Some(resp.frame_number));
    assert_eq!(conv.duration_ms, Some(3.0));
    assert_eq!(conv.resp_frame, Some(resp.frame_number));
    assert!(conv.resp_jsonrpc_result.is_some());
}

#[test]
fn duplicate_ids_match_most_recent_unmatched_request() {
    let conn = open_in_memory().unwrap();
    let logger = CaptureLogger::with_clock(&conn, ManualClock::new(0, MS));

    let older = logger.log_request(&call("s", json!(1), "tools/call")).unwrap();
    let newer = logger.log_request(&call("s", json!(1), "tools/call")).unwrap();
    let resp = logger.log_response(&result("s", json!(1), 200)).unwrap();
    assert_eq!(resp.conversation_id, newer.conversation_id);

    let pending = query_conversations(
        &conn,
        &ConversationFilter {
            status: Some(ConversationStatus::Pending),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(Some(pending[0].conversation_id), older.conversation_id);

    // A second response with the same id now finds the older request.
    let second = logger.log_response(&result("s", json!(1), 200)).unwrap();
    assert_eq!(second.conversation_id, older.conversation_id);
}

#[test]
fn request_without_id_never_creates_conversation() {
    let conn = open_in_memory().unwrap();
    let logger = CaptureLogger::with_clock(&conn, ManualClock::new(0, MS));

    logger
        .log_request(&LogRequest {
            method: "POST".into(),
            url: "/mcp".into(),
            headers: headers(json!({"mcp-session-id": "s"})),
            body: Some(json!({"jsonrpc": "2.0", "method": "notifications/initialized"})),
            ..Default::default()
        })
        .unwrap();
    let resp = logger
        .log_response(&LogResponse {
            status_code: 202,
            headers: headers(json!({"mcp-session-id": "s"})),
            ..Default::default()
        })
        .unwrap();

    assert_eq!(resp.conversation_id, None);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM conversations"), 0);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM packets"), 2);
}

#[test]
fn session_aggregates_three_packets() {
    let conn = open_in_memory().unwrap();
    let logger = CaptureLogger::with_clock(&conn, ManualClock::new(100 * MS, 10 * MS));

    let first = logger.log_request(&call("sess-1", json!(1), "initialize")).unwrap();
    logger.log_request(&call("sess-1", json!(2), "tools/list")).unwrap();
    let last = logger.log_response(&result("sess-1", json!(1), 200)).unwrap();

    let sessions = get_sessions(&conn, &Default::default()).unwrap();
    assert_eq!(sessions.len(), 1);
    let s = &sessions[0];
    assert_eq!(s.session_id, "sess-1");
    assert_eq!(s.packet_count, 3);
    assert_eq!(s.first_seen_ns, first.timestamp_ns);
    assert_eq!(s.last_seen_ns, last.timestamp_ns);
    assert_eq!(s.user_agent.as_deref(), Some("inspector/0.9"));
    assert_eq!(s.host.as_deref(), Some("127.0.0.1:9851"));
}

#[test]
fn session_header_probe_order() {
    assert_eq!(normalize_session_id(&headers(json!({"accept": "*/*"}))), None);
    let h = headers(json!({"x-mcp-session-id": "late", "mcp-session-id": "early"}));
    assert_eq!(normalize_session_id(&h).as_deref(), Some("early"));
}

#[test]
fn non_json_body_yields_empty_metadata() {
    let meta = extract_jsonrpc_metadata(Some("event: message\ndata: {"));
    assert_eq!(meta.id, None);
    assert_eq!(meta.method, None);
    assert_eq!(meta.result, None);
    assert_eq!(meta.error, None);
}

#[test]
fn statistics_count_requests_and_responses() {
    let conn = open_in_memory().unwrap();
    let logger = CaptureLogger::with_clock(&conn, ManualClock::new(0, MS));
    for i in 0..4 {
        logger.log_request(&call("s", json!(i), "ping")).unwrap();
    }
    for i in 0..3 {
        logger.log_response(&result("s", json!(i), 200)).unwrap();
    }

    let stats = get_statistics(&conn, &StatsFilter::default()).unwrap();
    assert_eq!(stats.total_packets, 7);
    assert_eq!(stats.total_requests, 4);
    assert_eq!(stats.total_responses, 3);
    assert_eq!(stats.total_errors, 0);

    let convs = get_conversation_statistics(&conn, &StatsFilter::default()).unwrap();
    assert_eq!(convs.total_conversations, 4);
    assert_eq!(convs.completed, 3);
    assert_eq!(convs.pending, 1);
}

#[test]
fn search_matches_host_alone() {
    let conn = open_in_memory().unwrap();
    let logger = CaptureLogger::with_clock(&conn, ManualClock::new(0, MS));
    logger
        .log_request(&LogRequest {
            method: "GET".into(),
            url: "/health".into(),
            headers: headers(json!({"host": "foo.internal"})),
            ..Default::default()
        })
        .unwrap();
    logger
        .log_request(&LogRequest {
            method: "GET".into(),
            url: "/health".into(),
            headers: headers(json!({"host": "bar.internal"})),
            ..Default::default()
        })
        .unwrap();

    let rows = query_requests(
        &conn,
        &RequestFilter {
            search: Some("foo".into()),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].host.as_deref(), Some("foo.internal"));
}

#[test]
fn search_wildcards_are_literal() {
    let conn = open_in_memory().unwrap();
    let logger = CaptureLogger::with_clock(&conn, ManualClock::new(0, MS));
    logger
        .log_request(&LogRequest {
            method: "GET".into(),
            url: "/files/100%25".into(),
            ..Default::default()
        })
        .unwrap();
    logger
        .log_request(&LogRequest {
            method: "GET".into(),
            url: "/files/abc".into(),
            ..Default::default()
        })
        .unwrap();

    let search = |text: &str| {
        query_requests(
            &conn,
            &RequestFilter {
                search: Some(text.into()),
                ..Default::default()
            },
        )
        .unwrap()
        .len()
    };
    assert_eq!(search("%"), 1);
    assert_eq!(search("_"), 0);
}

#[test]
fn pending_conversation_has_null_response_side() {
    let conn = open_in_memory().unwrap();
    let logger = CaptureLogger::with_clock(&conn, ManualClock::new(0, MS));
    logger.log_request(&call("s", json!("abc"), "resources/read")).unwrap();

    let rows = query_conversations(&conn, &ConversationFilter::default()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, ConversationStatus::Pending);
    assert!(rows[0].response_side_empty());
    assert_eq!(rows[0].req_jsonrpc_method.as_deref(), Some("resources/read"));
}

#[test]
fn server_name_filter_finds_tool_calls() {
    let conn = open_in_memory().unwrap();
    let logger = CaptureLogger::with_clock(&conn, ManualClock::new(0, MS));
    let tool_call = |id: i64, name: &str| LogRequest {
        method: "POST".into(),
        url: "/mcp".into(),
        body: Some(json!({"jsonrpc": "2.0", "id": id, "method": "tools/call", "params": {"name": name}})),
        ..Default::default()
    };
    logger.log_request(&tool_call(1, "github.create_issue")).unwrap();
    logger.log_request(&tool_call(2, "github")).unwrap();
    logger.log_request(&tool_call(3, "githubber.read")).unwrap();

    let rows = query_requests(
        &conn,
        &RequestFilter {
            server_name: Some("github".into()),
            ..Default::default()
        },
    )
    .unwrap();
    let ids: Vec<_> = rows.iter().filter_map(|p| p.jsonrpc_id.as_deref()).collect();
    assert_eq!(ids, vec!["2", "1"]);
}

#[test]
fn store_survives_reopen_and_keeps_correlating() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.sqlite");

    let frame = {
        let conn = open_db(&path).unwrap();
        let logger = CaptureLogger::with_clock(&conn, ManualClock::new(0, MS));
        logger.log_request(&call("s", json!(9), "tools/list")).unwrap().frame_number
    };

    let conn = open_db(&path).unwrap();
    let logger = CaptureLogger::with_clock(&conn, ManualClock::new(10 * MS, MS));
    let resp = logger
        .log_response(&LogResponse {
            request_frame_number: Some(frame),
            ..result("s", json!(9), 200)
        })
        .unwrap();
    assert!(resp.conversation_id.is_some());
    assert!(resp.frame_number > frame);

    let packets = get_session_packets(&conn, "s", None).unwrap();
    assert_eq!(packets.len(), 2);
    assert_eq!(packets[0].direction, Direction::Request);
    assert_eq!(packets[1].direction, Direction::Response);
}

#[test]
fn reaped_conversations_are_distinct_from_errors() {
    let conn = open_in_memory().unwrap();
    let logger = CaptureLogger::with_clock(&conn, ManualClock::new(0, MS));
    logger.log_request(&call("s", json!(1), "slow")).unwrap();
    logger.log_request(&call("s", json!(2), "broken")).unwrap();
    logger.log_response(&result("s", json!(2), 500)).unwrap();

    reap_stale_conversations(&conn, MS, 100 * MS).unwrap();

    let stats = get_conversation_statistics(&conn, &StatsFilter::default()).unwrap();
    assert_eq!(stats.timeouts, 1);
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.pending, 0);

    let errors = query_packets(
        &conn,
        &PacketFilter {
            status_code: Some(500),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(errors.len(), 1);
}
