pub mod builder;
pub mod capture;
pub mod cli;
pub mod clock;
pub mod config;
pub mod db;
pub mod metrics;
pub mod model;
pub mod normalize;
pub mod query;
pub mod reaper;
pub mod schema;
pub mod serve;

pub use capture::{CaptureLogger, LogRequest, LogResponse, LoggedRequest, LoggedResponse};
pub use clock::{Clock, ManualClock, SystemClock};
pub use model::{ConversationStatus, Direction};

#[derive(Debug)]
pub enum SharkError {
    Database(rusqlite::Error),
    Io(std::io::Error),
    Json(serde_json::Error),
    Config(String),
}

impl std::fmt::Display for SharkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SharkError::Database(e) => write!(f, "database: {e}"),
            SharkError::Io(e) => write!(f, "io: {e}"),
            SharkError::Json(e) => write!(f, "json: {e}"),
            SharkError::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl std::error::Error for SharkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SharkError::Database(e) => Some(e),
            SharkError::Io(e) => Some(e),
            SharkError::Json(e) => Some(e),
            SharkError::Config(_) => None,
        }
    }
}

impl From<rusqlite::Error> for SharkError {
    fn from(e: rusqlite::Error) -> Self {
        SharkError::Database(e)
    }
}

impl From<std::io::Error> for SharkError {
    fn from(e: std::io::Error) -> Self {
        SharkError::Io(e)
    }
}

impl From<serde_json::Error> for SharkError {
    fn from(e: serde_json::Error) -> Self {
        SharkError::Json(e)
    }
}

impl From<rusqlite_migration::Error> for SharkError {
    fn from(e: rusqlite_migration::Error) -> Self {
        match e {
            rusqlite_migration::Error::RusqliteError { query: _, err } => SharkError::Database(err),
            other => SharkError::Config(format!("migration: {other}")),
        }
    }
}

pub fn schema_migrations() -> &'static rusqlite_migration::Migrations<'static> {
    &schema::MIGRATIONS
}
