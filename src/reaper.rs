use crate::SharkError;
use crate::model::ConversationStatus;
use rusqlite::{Connection, params};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReapResult {
    pub cutoff_ns: i64,
    pub timed_out: usize,
    /// Timed-out conversations per session; `None` groups unsessioned traffic.
    pub by_session: Vec<(Option<String>, usize)>,
}

/// Mark pending conversations whose request is older than `stale_after_ns` as
/// `timeout`. A later response can still close them.
pub fn reap_stale_conversations(
    conn: &Connection,
    stale_after_ns: i64,
    now_ns: i64,
) -> Result<ReapResult, SharkError> {
    let cutoff_ns = now_ns.saturating_sub(stale_after_ns);
    let tx = conn.unchecked_transaction()?;

    let by_session = {
        let mut stmt = tx.prepare(
            "SELECT session_id, COUNT(*) FROM conversations
             WHERE status = ?1 AND request_timestamp_ns < ?2
             GROUP BY session_id ORDER BY session_id",
        )?;
        let rows = stmt.query_map(params![ConversationStatus::Pending, cutoff_ns], |r| {
            Ok((r.get::<_, Option<String>>(0)?, r.get::<_, i64>(1)? as usize))
        })?;
        rows.collect::<Result<Vec<_>, _>>()?
    };

    let timed_out = tx.execute(
        "UPDATE conversations SET status = ?1
         WHERE status = ?2 AND request_timestamp_ns < ?3",
        params![ConversationStatus::Timeout, ConversationStatus::Pending, cutoff_ns],
    )?;
    tx.commit()?;

    if timed_out > 0 {
        log::info!("reaper: {timed_out} pending conversations timed out (cutoff {cutoff_ns})");
    }

    Ok(ReapResult {
        cutoff_ns,
        timed_out,
        by_session,
    })
}
