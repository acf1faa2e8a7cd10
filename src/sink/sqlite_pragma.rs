use rusqlite::Connection;

/// Apply the connection PRAGMAs shared by every ride log database handle
/// (WAL, NORMAL sync, in-memory temp store, mmap, page cache, autocheckpoint).
pub fn apply_optimized_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "mmap_size", 268_435_456i64)?;
    conn.pragma_update(None, "cache_size", -64_000i64)?;
    conn.pragma_update(None, "wal_autocheckpoint", 1000i64)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(())
}
