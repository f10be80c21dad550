use crate::SharkError;
use crate::config::SharkConfig;
use crate::db::open_db_readonly;
use crate::metrics::record_query_metrics;
use crate::query::{
    self, ConversationFilter, DEFAULT_LIMIT, DEFAULT_SESSION_LIMIT, PacketFilter, RequestFilter,
    SessionFilter, StatsFilter,
};
use rmcp::{
    ErrorData, ServerHandler, ServiceExt,
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router,
    transport::stdio,
};
use rusqlite::Connection;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};

type DbHandle = Arc<Mutex<Connection>>;

const MAX_LIMIT: i64 = 10_000;

#[derive(Clone)]
pub struct SharkServer {
    db: DbHandle,
    #[allow(dead_code)]
    tool_router: ToolRouter<Self>,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionPacketsParams {
    /// Normalized session id.
    pub session_id: String,
    /// Max packets (default 10000).
    #[serde(default)]
    pub limit: Option<i64>,
}

fn db_err(e: &impl std::fmt::Display) -> ErrorData {
    ErrorData::new(ErrorCode::INTERNAL_ERROR, format!("db: {e}"), None)
}

fn clamp(val: Option<i64>, default: i64, max: i64) -> i64 {
    val.unwrap_or(default).max(1).min(max)
}

fn json_result<T: Serialize>(result: Result<T, SharkError>) -> Result<CallToolResult, ErrorData> {
    let rows = result.map_err(|e| db_err(&e))?;
    let json = serde_json::to_string(&rows).map_err(|e| db_err(&e))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

// --- Core query logic (pub for testing) ---

impl SharkServer {
    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, ErrorData> {
        self.db.lock().map_err(|e| db_err(&e))
    }

    pub fn do_query_packets(&self, mut filter: PacketFilter) -> Result<CallToolResult, ErrorData> {
        filter.limit = Some(clamp(filter.limit, DEFAULT_LIMIT, MAX_LIMIT));
        let db = self.conn()?;
        json_result(query::query_packets(&db, &filter))
    }

    pub fn do_query_requests(&self, mut filter: RequestFilter) -> Result<CallToolResult, ErrorData> {
        filter.limit = Some(clamp(filter.limit, DEFAULT_LIMIT, MAX_LIMIT));
        let db = self.conn()?;
        json_result(query::query_requests(&db, &filter))
    }

    pub fn do_query_conversations(
        &self,
        mut filter: ConversationFilter,
    ) -> Result<CallToolResult, ErrorData> {
        filter.limit = Some(clamp(filter.limit, DEFAULT_LIMIT, MAX_LIMIT));
        let db = self.conn()?;
        json_result(query::query_conversations(&db, &filter))
    }

    pub fn do_session_packets(&self, p: SessionPacketsParams) -> Result<CallToolResult, ErrorData> {
        if p.session_id.is_empty() {
            return Ok(CallToolResult::error(vec![Content::text(
                "sessionId must not be empty",
            )]));
        }
        let limit = clamp(p.limit, DEFAULT_SESSION_LIMIT, MAX_LIMIT);
        let db = self.conn()?;
        json_result(query::get_session_packets(&db, &p.session_id, Some(limit)))
    }

    pub fn do_session_requests(&self, p: SessionPacketsParams) -> Result<CallToolResult, ErrorData> {
        if p.session_id.is_empty() {
            return Ok(CallToolResult::error(vec![Content::text(
                "sessionId must not be empty",
            )]));
        }
        let limit = clamp(p.limit, DEFAULT_SESSION_LIMIT, MAX_LIMIT);
        let db = self.conn()?;
        json_result(query::get_session_requests(&db, &p.session_id, Some(limit)))
    }

    pub fn do_sessions(&self, mut filter: SessionFilter) -> Result<CallToolResult, ErrorData> {
        filter.limit = Some(clamp(filter.limit, DEFAULT_LIMIT, MAX_LIMIT));
        let db = self.conn()?;
        json_result(query::get_sessions(&db, &filter))
    }

    pub fn do_statistics(&self, filter: StatsFilter) -> Result<CallToolResult, ErrorData> {
        let db = self.conn()?;
        json_result(query::get_statistics(&db, &filter))
    }

    pub fn do_conversation_statistics(
        &self,
        filter: StatsFilter,
    ) -> Result<CallToolResult, ErrorData> {
        let db = self.conn()?;
        json_result(query::get_conversation_statistics(&db, &filter))
    }
}

// --- MCP tool wrappers (delegate to do_* methods) ---

#[tool_router]
impl SharkServer {
    pub fn new(db: DbHandle) -> Self {
        Self {
            db,
            tool_router: Self::tool_router(),
        }
    }

    pub fn db_handle(&self) -> &DbHandle {
        &self.db
    }

    #[tool(
        description = "Captured HTTP packets matching exact filters (session, direction, HTTP/JSON-RPC method, status, JSON-RPC id, time range). Oldest first.",
        annotations(read_only_hint = true, open_world_hint = false)
    )]
    async fn query_packets(&self, p: Parameters<PacketFilter>) -> Result<CallToolResult, ErrorData> {
        let start = std::time::Instant::now();
        let result = self.do_query_packets(p.0);
        record_query_metrics("query_packets", start);
        result
    }

    #[tool(
        description = "Free-text search over captured packets plus substring filters and a downstream server-name filter. Newest first.",
        annotations(read_only_hint = true, open_world_hint = false)
    )]
    async fn query_requests(&self, p: Parameters<RequestFilter>) -> Result<CallToolResult, ErrorData> {
        let start = std::time::Instant::now();
        let result = self.do_query_requests(p.0);
        record_query_metrics("query_requests", start);
        result
    }

    #[tool(
        description = "Request/response conversations with both packets joined (req_*/resp_* fields; resp_* null while pending). Oldest first.",
        annotations(read_only_hint = true, open_world_hint = false)
    )]
    async fn query_conversations(
        &self,
        p: Parameters<ConversationFilter>,
    ) -> Result<CallToolResult, ErrorData> {
        let start = std::time::Instant::now();
        let result = self.do_query_conversations(p.0);
        record_query_metrics("query_conversations", start);
        result
    }

    #[tool(
        description = "All packets of one session in capture order.",
        annotations(read_only_hint = true, open_world_hint = false)
    )]
    async fn session_packets(
        &self,
        p: Parameters<SessionPacketsParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let start = std::time::Instant::now();
        let result = self.do_session_packets(p.0);
        record_query_metrics("session_packets", start);
        result
    }

    #[tool(
        description = "All packets of one session, most recent first.",
        annotations(read_only_hint = true, open_world_hint = false)
    )]
    async fn session_requests(
        &self,
        p: Parameters<SessionPacketsParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let start = std::time::Instant::now();
        let result = self.do_session_requests(p.0);
        record_query_metrics("session_requests", start);
        result
    }

    #[tool(
        description = "Observed sessions with first/last seen times, packet counts and client metadata. Most recently started first.",
        annotations(read_only_hint = true, open_world_hint = false)
    )]
    async fn sessions(&self, p: Parameters<SessionFilter>) -> Result<CallToolResult, ErrorData> {
        let start = std::time::Instant::now();
        let result = self.do_sessions(p.0);
        record_query_metrics("sessions", start);
        result
    }

    #[tool(
        description = "Packet totals: requests, responses, HTTP errors (>=400), distinct sessions, sizes and time span.",
        annotations(read_only_hint = true, open_world_hint = false)
    )]
    async fn statistics(&self, p: Parameters<StatsFilter>) -> Result<CallToolResult, ErrorData> {
        let start = std::time::Instant::now();
        let result = self.do_statistics(p.0);
        record_query_metrics("statistics", start);
        result
    }

    #[tool(
        description = "Conversation counts by status (completed, pending, error, timeout) and duration aggregates in milliseconds.",
        annotations(read_only_hint = true, open_world_hint = false)
    )]
    async fn conversation_statistics(
        &self,
        p: Parameters<StatsFilter>,
    ) -> Result<CallToolResult, ErrorData> {
        let start = std::time::Instant::now();
        let result = self.do_conversation_statistics(p.0);
        record_query_metrics("conversation_statistics", start);
        result
    }
}

#[tool_handler]
impl ServerHandler for SharkServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build()).with_instructions(
            "mcp-shark: forensic queries over captured JSON-RPC/HTTP traffic",
        )
    }
}

pub fn handle_serve(db_path: &Path, config: &SharkConfig) -> Result<(), SharkError> {
    let conn = open_db_readonly(db_path)?;
    let db: DbHandle = Arc::new(Mutex::new(conn));
    let server = SharkServer::new(db);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(SharkError::Io)?;

    rt.block_on(async {
        let provider = crate::metrics::init_meter_provider(&config.metrics);

        eprintln!("mcp-shark: serve starting");
        let service = server
            .serve(stdio())
            .await
            .map_err(|e| SharkError::Config(format!("mcp: {e}")))?;
        service
            .waiting()
            .await
            .map_err(|e| SharkError::Config(format!("mcp: {e}")))?;
        eprintln!("mcp-shark: serve stopped");

        if let Some(p) = provider {
            let _ = p.shutdown();
        }

        Ok(())
    })
}
