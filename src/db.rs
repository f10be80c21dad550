use crate::schema::MIGRATIONS;
use crate::SharkError;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;

#[cfg(unix)]
fn ensure_secure_permissions(db_path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if let Some(dir) = db_path.parent()
        && !dir.as_os_str().is_empty()
        && !dir.exists()
    {
        std::fs::create_dir_all(dir)?;
        // Only set permissions on dirs we created
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    }
    if db_path.exists() {
        std::fs::set_permissions(db_path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn ensure_secure_permissions(db_path: &Path) -> std::io::Result<()> {
    if let Some(dir) = db_path.parent()
        && !dir.as_os_str().is_empty()
        && !dir.exists()
    {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// Create the packets/conversations/sessions tables and their indexes if absent.
///
/// Also sets the writer PRAGMAs: busy timeout, write-ahead journaling for
/// file-backed stores, NORMAL sync and foreign keys. Safe on every start:
/// existing rows are never dropped or rewritten.
pub fn initialize(mut conn: Connection) -> Result<Connection, SharkError> {
    conn.pragma_update(None, "busy_timeout", 5000)?;
    if conn.path().is_some_and(|p| !p.is_empty()) {
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |r| r.get(0))?;
        log::debug!("journal_mode = {mode}");
    }
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    MIGRATIONS.to_latest(&mut conn)?;
    Ok(conn)
}

pub fn open_db(db_path: &Path) -> Result<Connection, SharkError> {
    ensure_secure_permissions(db_path)?;

    let is_new = !db_path.exists();
    let conn = initialize(Connection::open(db_path)?)?;

    if is_new {
        log::info!("created capture store at {}", db_path.display());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(db_path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(conn)
}

pub fn open_db_readonly(db_path: &Path) -> Result<Connection, SharkError> {
    if !db_path.exists() {
        return Err(SharkError::Config(format!(
            "database not found: {}",
            db_path.display()
        )));
    }

    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection, SharkError> {
    initialize(Connection::open_in_memory()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_db_creates_parent_dir_and_wal() {
        let dir = tempfile::TempDir::new().unwrap();
        let db_path = dir.path().join("db").join("capture.sqlite");

        let conn = open_db(&db_path).unwrap();
        assert!(db_path.exists());

        let mode: String = conn
            .pragma_query_value(None, "journal_mode", |r| r.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");

        let fk: i64 = conn
            .pragma_query_value(None, "foreign_keys", |r| r.get(0))
            .unwrap();
        assert_eq!(fk, 1);
    }

    #[test]
    fn initialize_enables_wal_on_caller_connection() {
        let dir = tempfile::TempDir::new().unwrap();
        let conn = Connection::open(dir.path().join("embedded.sqlite")).unwrap();
        let conn = initialize(conn).unwrap();

        let mode: String = conn
            .pragma_query_value(None, "journal_mode", |r| r.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");

        let timeout: i64 = conn
            .pragma_query_value(None, "busy_timeout", |r| r.get(0))
            .unwrap();
        assert_eq!(timeout, 5000);

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'packets'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(tables, 1);
    }

    #[test]
    fn reopen_preserves_rows() {
        let dir = tempfile::TempDir::new().unwrap();
        let db_path = dir.path().join("capture.sqlite");

        {
            let conn = open_db(&db_path).unwrap();
            conn.execute(
                "INSERT INTO sessions (session_id, first_seen_ns, last_seen_ns, packet_count)
                 VALUES ('s1', 10, 20, 2)",
                [],
            )
            .unwrap();
        }

        let conn = open_db(&db_path).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn readonly_requires_existing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = open_db_readonly(&dir.path().join("missing.sqlite")).unwrap_err();
        assert!(matches!(err, SharkError::Config(_)));
    }

    #[test]
    fn in_memory_enforces_foreign_keys() {
        let conn = open_in_memory().unwrap();
        let result = conn.execute(
            "INSERT INTO conversations (request_frame_number, request_timestamp_ns)
             VALUES (999, 1)",
            [],
        );
        assert!(result.is_err());
    }
}
