use crate::capture::{CaptureLogger, LogRequest, LogResponse};
use crate::clock::{Clock, SystemClock};
use crate::config::SharkConfig;
use crate::db::{open_db, open_db_readonly};
use crate::model::{ConversationStatus, Direction};
use crate::query::{
    self, ConversationFilter, PacketFilter, RequestFilter, SessionFilter, StatsFilter,
};
use crate::reaper::reap_stale_conversations;
use crate::SharkError;
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "mcp-shark",
    version,
    about = "Forensic capture store for JSON-RPC over HTTP traffic"
)]
pub struct Cli {
    /// Database path
    #[arg(long, env = "MCP_SHARK_DB", global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create the database and its tables if absent
    Init,
    /// Record one captured request or response read as JSON from stdin
    Record,
    /// Packets matching exact filters, oldest first
    Packets(PacketArgs),
    /// Search packets by text and substring filters, newest first
    Requests(RequestArgs),
    /// Request/response conversations, oldest first
    Conversations(ConversationArgs),
    /// Observed sessions, most recently started first
    Sessions(RangeArgs),
    /// All packets of one session
    Session(SessionArgs),
    /// Packet and conversation statistics
    Stats(StatsArgs),
    /// Mark stale pending conversations as timed out
    Reap(ReapArgs),
    /// Start MCP query server on stdio
    Serve,
}

#[derive(Args, Default)]
pub struct RangeArgs {
    /// Lower time bound, nanoseconds
    #[arg(long)]
    pub start: Option<i64>,
    /// Upper time bound, nanoseconds
    #[arg(long)]
    pub end: Option<i64>,
    /// Max rows (default 1000)
    #[arg(long)]
    pub limit: Option<i64>,
    /// Rows to skip
    #[arg(long)]
    pub offset: Option<i64>,
}

#[derive(Args)]
pub struct PacketArgs {
    #[arg(long)]
    pub session: Option<String>,
    /// request or response
    #[arg(long)]
    pub direction: Option<Direction>,
    /// HTTP method
    #[arg(long)]
    pub method: Option<String>,
    #[arg(long)]
    pub jsonrpc_method: Option<String>,
    #[arg(long)]
    pub status: Option<i64>,
    #[arg(long)]
    pub jsonrpc_id: Option<String>,
    #[command(flatten)]
    pub range: RangeArgs,
}

impl From<PacketArgs> for PacketFilter {
    fn from(a: PacketArgs) -> Self {
        PacketFilter {
            session_id: a.session,
            direction: a.direction,
            method: a.method,
            jsonrpc_method: a.jsonrpc_method,
            status_code: a.status,
            jsonrpc_id: a.jsonrpc_id,
            start_time: a.range.start,
            end_time: a.range.end,
            limit: a.range.limit,
            offset: a.range.offset,
        }
    }
}

#[derive(Args)]
pub struct RequestArgs {
    /// Free-text search across all textual packet fields
    pub search: Option<String>,
    /// Downstream server name embedded as "name":"<server>..." in bodies
    #[arg(long)]
    pub server: Option<String>,
    #[command(flatten)]
    pub packet: PacketArgs,
}

impl From<RequestArgs> for RequestFilter {
    fn from(a: RequestArgs) -> Self {
        let p = a.packet;
        RequestFilter {
            search: a.search,
            server_name: a.server,
            session_id: p.session,
            direction: p.direction,
            method: p.method,
            jsonrpc_method: p.jsonrpc_method,
            status_code: p.status,
            jsonrpc_id: p.jsonrpc_id,
            start_time: p.range.start,
            end_time: p.range.end,
            limit: p.range.limit,
            offset: p.range.offset,
        }
    }
}

#[derive(Args)]
pub struct ConversationArgs {
    #[arg(long)]
    pub session: Option<String>,
    /// JSON-RPC method (HTTP method for id-only requests)
    #[arg(long)]
    pub method: Option<String>,
    /// pending, completed, timeout or error
    #[arg(long)]
    pub status: Option<ConversationStatus>,
    #[arg(long)]
    pub jsonrpc_id: Option<String>,
    #[command(flatten)]
    pub range: RangeArgs,
}

impl From<ConversationArgs> for ConversationFilter {
    fn from(a: ConversationArgs) -> Self {
        ConversationFilter {
            session_id: a.session,
            method: a.method,
            status: a.status,
            jsonrpc_id: a.jsonrpc_id,
            start_time: a.range.start,
            end_time: a.range.end,
            limit: a.range.limit,
            offset: a.range.offset,
        }
    }
}

impl From<RangeArgs> for SessionFilter {
    fn from(a: RangeArgs) -> Self {
        SessionFilter {
            start_time: a.start,
            end_time: a.end,
            limit: a.limit,
            offset: a.offset,
        }
    }
}

#[derive(Args)]
pub struct SessionArgs {
    /// Session id
    pub id: String,
    /// Most recent packets first
    #[arg(long)]
    pub newest_first: bool,
    /// Max packets (default 10000)
    #[arg(long)]
    pub limit: Option<i64>,
}

#[derive(Args)]
pub struct StatsArgs {
    #[arg(long)]
    pub session: Option<String>,
    #[arg(long)]
    pub start: Option<i64>,
    #[arg(long)]
    pub end: Option<i64>,
}

impl From<StatsArgs> for StatsFilter {
    fn from(a: StatsArgs) -> Self {
        StatsFilter {
            session_id: a.session,
            start_time: a.start,
            end_time: a.end,
        }
    }
}

#[derive(Args)]
pub struct ReapArgs {
    /// Override reaper.stale_after_secs from config
    #[arg(long)]
    pub stale_after_secs: Option<u64>,
}

/// One capture event as fed to `record`.
#[derive(Debug, Deserialize)]
#[serde(tag = "direction", rename_all = "lowercase")]
pub enum CaptureEvent {
    Request(LogRequest),
    Response(LogResponse),
}

fn print_json<T: Serialize>(value: &T) -> Result<(), SharkError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn handle_init(db_path: &Path) -> Result<(), SharkError> {
    open_db(db_path)?;
    eprintln!("mcp-shark: store ready at {}", db_path.display());
    Ok(())
}

pub fn handle_record(db_path: &Path, input: &str) -> Result<(), SharkError> {
    let event: CaptureEvent = serde_json::from_str(input)?;
    let conn = open_db(db_path)?;
    let logger = CaptureLogger::new(&conn);

    match event {
        CaptureEvent::Request(req) => print_json(&logger.log_request(&req)?),
        CaptureEvent::Response(resp) => print_json(&logger.log_response(&resp)?),
    }
}

pub fn handle_packets(db_path: &Path, args: PacketArgs) -> Result<(), SharkError> {
    let conn = open_db_readonly(db_path)?;
    print_json(&query::query_packets(&conn, &args.into())?)
}

pub fn handle_requests(db_path: &Path, args: RequestArgs) -> Result<(), SharkError> {
    let conn = open_db_readonly(db_path)?;
    print_json(&query::query_requests(&conn, &args.into())?)
}

pub fn handle_conversations(db_path: &Path, args: ConversationArgs) -> Result<(), SharkError> {
    let conn = open_db_readonly(db_path)?;
    print_json(&query::query_conversations(&conn, &args.into())?)
}

pub fn handle_sessions(db_path: &Path, args: RangeArgs) -> Result<(), SharkError> {
    let conn = open_db_readonly(db_path)?;
    print_json(&query::get_sessions(&conn, &args.into())?)
}

pub fn handle_session(db_path: &Path, args: SessionArgs) -> Result<(), SharkError> {
    let conn = open_db_readonly(db_path)?;
    let packets = if args.newest_first {
        query::get_session_requests(&conn, &args.id, args.limit)?
    } else {
        query::get_session_packets(&conn, &args.id, args.limit)?
    };
    print_json(&packets)
}

#[derive(Serialize)]
struct StatsReport {
    packets: crate::model::PacketStatistics,
    conversations: crate::model::ConversationStatistics,
}

pub fn handle_stats(db_path: &Path, args: StatsArgs) -> Result<(), SharkError> {
    let conn = open_db_readonly(db_path)?;
    let filter: StatsFilter = args.into();
    print_json(&StatsReport {
        packets: query::get_statistics(&conn, &filter)?,
        conversations: query::get_conversation_statistics(&conn, &filter)?,
    })
}

#[derive(Serialize)]
struct ReapReport {
    cutoff_ns: i64,
    timed_out: usize,
    by_session: Vec<SessionCount>,
}

#[derive(Serialize)]
struct SessionCount {
    session_id: Option<String>,
    count: usize,
}

pub fn handle_reap(db_path: &Path, args: ReapArgs, config: &SharkConfig) -> Result<(), SharkError> {
    let stale_after_secs = args
        .stale_after_secs
        .unwrap_or(config.reaper.stale_after_secs);
    if stale_after_secs == 0 {
        return Err(SharkError::Config("--stale-after-secs must be greater than 0".into()));
    }

    let conn = open_db(db_path)?;
    let stale_after_ns = (stale_after_secs as i64).saturating_mul(1_000_000_000);
    let result = reap_stale_conversations(&conn, stale_after_ns, SystemClock.now_ns())?;
    eprintln!(
        "mcp-shark: {} pending conversations older than {stale_after_secs}s marked timeout",
        result.timed_out
    );

    print_json(&ReapReport {
        cutoff_ns: result.cutoff_ns,
        timed_out: result.timed_out,
        by_session: result
            .by_session
            .into_iter()
            .map(|(session_id, count)| SessionCount { session_id, count })
            .collect(),
    })
}
