//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.
//! Existing tables are never dropped or rewritten; schema changes must be
//! additive and backward-compatible so the buffer survives host upgrades.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: Initial schema
    r#"
    -- One row per installed app/device, keyed by the application key.
    CREATE TABLE IF NOT EXISTS identities (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        app_key         TEXT NOT NULL UNIQUE,
        account_id      INTEGER NOT NULL DEFAULT 0,
        user_id         INTEGER NOT NULL DEFAULT 0,
        client_uuid     TEXT NOT NULL,
        system_version  TEXT NOT NULL,
        device_model    TEXT NOT NULL,
        app_version     TEXT NOT NULL,
        app_build       TEXT NOT NULL,
        region          TEXT NOT NULL,
        location        TEXT,
        address         TEXT,
        latitude        TEXT,
        longitude       TEXT
    );

    -- Per-day, per-kind counters. The unique index backs the atomic
    -- increment upsert in the repository layer.
    CREATE TABLE IF NOT EXISTS daily_stats (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        app_key         TEXT NOT NULL,
        account_id      INTEGER NOT NULL DEFAULT 0,
        kind            INTEGER NOT NULL,
        count           INTEGER NOT NULL DEFAULT 1,
        date            TEXT NOT NULL,
        uploaded        INTEGER NOT NULL DEFAULT 0,

        UNIQUE(app_key, kind, date)
    );

    -- Append-only custom event log.
    CREATE TABLE IF NOT EXISTS events (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        app_key         TEXT NOT NULL,
        account_id      INTEGER NOT NULL DEFAULT 0,
        name            TEXT NOT NULL,
        attrs           TEXT,
        ts              DATETIME NOT NULL,
        uploaded        INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_daily_stats_pending ON daily_stats(app_key, uploaded);
    CREATE INDEX IF NOT EXISTS idx_events_pending ON events(app_key, uploaded);
    CREATE INDEX IF NOT EXISTS idx_daily_stats_backfill ON daily_stats(app_key, account_id);
    CREATE INDEX IF NOT EXISTS idx_events_backfill ON events(app_key, account_id);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        // Run migrations twice - should be idempotent
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables = ["identities", "daily_stats", "events"];
        for table in tables {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "table {} should exist", table);
        }
    }

    #[test]
    fn test_daily_stat_unique_per_kind_and_day() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO daily_stats (app_key, kind, date) VALUES ('k', 1, '2026-08-25')",
            [],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO daily_stats (app_key, kind, date) VALUES ('k', 1, '2026-08-25')",
            [],
        );
        assert!(dup.is_err());
    }
}
