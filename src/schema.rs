use rusqlite_migration::{M, Migrations};
use std::sync::LazyLock;

// Every statement is IF NOT EXISTS: stores written before migration tracking
// existed (user_version = 0, tables present) must pass through untouched.
pub static MIGRATIONS: LazyLock<Migrations<'static>> = LazyLock::new(|| {
    Migrations::new(vec![M::up(
        "
CREATE TABLE IF NOT EXISTS packets (
    frame_number    INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp_ns    INTEGER NOT NULL,
    timestamp_iso   TEXT NOT NULL,
    direction       TEXT NOT NULL CHECK(direction IN ('request', 'response')),
    protocol        TEXT NOT NULL DEFAULT 'HTTP',
    session_id      TEXT,
    method          TEXT,
    url             TEXT,
    status_code     INTEGER,
    headers_json    TEXT NOT NULL,
    body_raw        TEXT,
    body_json       TEXT,
    jsonrpc_id      TEXT,
    jsonrpc_method  TEXT,
    jsonrpc_result  TEXT,
    jsonrpc_error   TEXT,
    length          INTEGER NOT NULL CHECK(length >= 0),
    info            TEXT,
    user_agent      TEXT,
    remote_address  TEXT,
    host            TEXT
);

CREATE TABLE IF NOT EXISTS conversations (
    conversation_id       INTEGER PRIMARY KEY AUTOINCREMENT,
    request_frame_number  INTEGER NOT NULL,
    response_frame_number INTEGER,
    session_id            TEXT,
    jsonrpc_id            TEXT,
    method                TEXT,
    request_timestamp_ns  INTEGER NOT NULL,
    response_timestamp_ns INTEGER,
    duration_ms           REAL,
    status                TEXT DEFAULT 'pending'
                          CHECK(status IN ('pending', 'completed', 'timeout', 'error')),
    FOREIGN KEY (request_frame_number) REFERENCES packets(frame_number),
    FOREIGN KEY (response_frame_number) REFERENCES packets(frame_number)
);

CREATE TABLE IF NOT EXISTS sessions (
    session_id      TEXT PRIMARY KEY,
    first_seen_ns   INTEGER NOT NULL,
    last_seen_ns    INTEGER NOT NULL,
    packet_count    INTEGER DEFAULT 0,
    user_agent      TEXT,
    remote_address  TEXT,
    host            TEXT
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_packets_timestamp ON packets(timestamp_ns);
CREATE INDEX IF NOT EXISTS idx_packets_session ON packets(session_id);
CREATE INDEX IF NOT EXISTS idx_packets_direction ON packets(direction);
CREATE INDEX IF NOT EXISTS idx_packets_jsonrpc_id ON packets(jsonrpc_id);
CREATE INDEX IF NOT EXISTS idx_packets_jsonrpc_method ON packets(jsonrpc_method);
CREATE INDEX IF NOT EXISTS idx_packets_method ON packets(method);
CREATE INDEX IF NOT EXISTS idx_packets_status_code ON packets(status_code);
CREATE INDEX IF NOT EXISTS idx_packets_session_timestamp ON packets(session_id, timestamp_ns);

CREATE INDEX IF NOT EXISTS idx_conversations_session ON conversations(session_id);
CREATE INDEX IF NOT EXISTS idx_conversations_jsonrpc_id ON conversations(jsonrpc_id);
CREATE INDEX IF NOT EXISTS idx_conversations_request_frame ON conversations(request_frame_number);
CREATE INDEX IF NOT EXISTS idx_conversations_response_frame ON conversations(response_frame_number);
CREATE INDEX IF NOT EXISTS idx_conversations_timestamp ON conversations(request_timestamp_ns);

CREATE INDEX IF NOT EXISTS idx_sessions_first_seen ON sessions(first_seen_ns);
CREATE INDEX IF NOT EXISTS idx_sessions_last_seen ON sessions(last_seen_ns);
",
    )])
});
