//! Database repository layer
//!
//! Provides query and mutate operations for the three record kinds. All
//! multi-row writes run inside a transaction so a failed operation leaves no
//! partial state behind.

use crate::error::{Error, Result};
use crate::types::{DailyStat, DeviceProfile, EventRecord, Identity, RemoteProfile, StatKind};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::Mutex;
use uuid::Uuid;

/// Database handle with a single serialized connection
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL mode for better concurrency between the worker and host reads
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    // ============================================
    // Identity operations
    // ============================================

    /// Get the identity for an application key, if one exists
    pub fn get_identity(&self, app_key: &str) -> Result<Option<Identity>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM identities WHERE app_key = ?",
            [app_key],
            Self::row_to_identity,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Load the identity for an application key, creating it on first use.
    ///
    /// Creation inserts the identity (fresh client UUID, current device
    /// metadata, unassigned account id) together with its paired
    /// `download` stat for `today` in one transaction; both succeed or
    /// neither does. Calling this again for the same key returns the stored
    /// row untouched.
    pub fn get_or_create_identity(
        &self,
        app_key: &str,
        profile: &DeviceProfile,
        today: NaiveDate,
    ) -> Result<Identity> {
        if let Some(existing) = self.get_identity(app_key)? {
            return Ok(existing);
        }

        let client_uuid = Uuid::new_v4().to_string();

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO identities (app_key, account_id, user_id, client_uuid,
                                    system_version, device_model, app_version, app_build, region)
            VALUES (?1, 0, 0, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                app_key,
                client_uuid,
                profile.system_version,
                profile.device_model,
                profile.app_version,
                profile.app_build,
                profile.region,
            ],
        )?;
        let identity_id = tx.last_insert_rowid();

        tx.execute(
            r#"
            INSERT INTO daily_stats (app_key, account_id, kind, count, date, uploaded)
            VALUES (?1, 0, ?2, 1, ?3, 0)
            "#,
            params![app_key, StatKind::Download.code(), today.to_string()],
        )?;

        tx.commit()?;

        tracing::info!(app_key, identity_id, "Created identity and download stat");

        Ok(Identity {
            id: identity_id,
            app_key: app_key.to_string(),
            account_id: 0,
            user_id: 0,
            client_uuid,
            system_version: profile.system_version.clone(),
            device_model: profile.device_model.clone(),
            app_version: profile.app_version.clone(),
            app_build: profile.app_build.clone(),
            region: profile.region.clone(),
            location: None,
            address: None,
            latitude: None,
            longitude: None,
        })
    }

    /// Assign the remote account id to an identity and backfill it onto every
    /// stat and event row for that key that is still unassigned.
    ///
    /// Runs in one transaction; on failure nothing is mutated.
    pub fn assign_account_id(&self, identity: &Identity, account_id: i64) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute(
            "UPDATE identities SET account_id = ?1 WHERE id = ?2",
            params![account_id, identity.id],
        )?;
        tx.execute(
            "UPDATE daily_stats SET account_id = ?1 WHERE app_key = ?2 AND account_id = 0",
            params![account_id, identity.app_key],
        )?;
        tx.execute(
            "UPDATE events SET account_id = ?1 WHERE app_key = ?2 AND account_id = 0",
            params![account_id, identity.app_key],
        )?;

        tx.commit()?;

        tracing::debug!(
            app_key = %identity.app_key,
            account_id,
            "Assigned account id and backfilled pending rows"
        );
        Ok(())
    }

    /// Update the identity row from a profile-sync response.
    pub fn sync_profile(&self, identity: &Identity, remote: &RemoteProfile) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            UPDATE identities
            SET user_id = ?1, system_version = ?2, device_model = ?3,
                app_version = ?4, app_build = ?5, region = ?6
            WHERE id = ?7
            "#,
            params![
                remote.user_id,
                remote.system_version,
                remote.device_model,
                remote.app_version,
                remote.app_build,
                remote.region,
                identity.id,
            ],
        )?;

        tracing::debug!(
            app_key = %identity.app_key,
            user_id = remote.user_id,
            "Synced remote profile onto identity"
        );
        Ok(())
    }

    // ============================================
    // Daily stat operations
    // ============================================

    /// Record one trigger of a daily counter.
    ///
    /// A single upsert statement keyed on (app_key, kind, date): the first
    /// trigger of a day inserts count=1, later triggers increment the counter
    /// and reset `uploaded`. Concurrent triggers cannot lose an increment.
    pub fn record_daily_stat(
        &self,
        app_key: &str,
        account_id: i64,
        kind: StatKind,
        date: NaiveDate,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO daily_stats (app_key, account_id, kind, count, date, uploaded)
            VALUES (?1, ?2, ?3, 1, ?4, 0)
            ON CONFLICT(app_key, kind, date)
            DO UPDATE SET count = count + 1, uploaded = 0
            "#,
            params![app_key, account_id, kind.code(), date.to_string()],
        )?;

        tracing::debug!(app_key, kind = kind.as_str(), %date, "Recorded daily stat");
        Ok(())
    }

    /// Fetch the counter row for (app_key, kind, date), if any
    pub fn get_daily_stat(
        &self,
        app_key: &str,
        kind: StatKind,
        date: NaiveDate,
    ) -> Result<Option<DailyStat>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM daily_stats WHERE app_key = ?1 AND kind = ?2 AND date = ?3",
            params![app_key, kind.code(), date.to_string()],
            Self::row_to_stat,
        )
        .optional()
        .map_err(Error::from)
    }

    /// All stat rows not yet acknowledged by the collector, oldest first
    pub fn unsent_stats(&self, app_key: &str) -> Result<Vec<DailyStat>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM daily_stats WHERE app_key = ? AND uploaded = 0 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([app_key], Self::row_to_stat)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }

    // ============================================
    // Event operations
    // ============================================

    /// Append a custom event row. Every call produces a new row.
    pub fn record_event(
        &self,
        app_key: &str,
        account_id: i64,
        name: &str,
        attrs: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO events (app_key, account_id, name, attrs, ts, uploaded)
            VALUES (?1, ?2, ?3, ?4, ?5, 0)
            "#,
            params![app_key, account_id, name, attrs, timestamp.to_rfc3339()],
        )?;
        let id = conn.last_insert_rowid();

        tracing::debug!(app_key, name, id, "Recorded event");
        Ok(id)
    }

    /// All event rows not yet acknowledged by the collector, oldest first
    pub fn unsent_events(&self, app_key: &str) -> Result<Vec<EventRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT * FROM events WHERE app_key = ? AND uploaded = 0 ORDER BY id ASC")?;
        let rows = stmt.query_map([app_key], Self::row_to_event)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }

    // ============================================
    // Upload bookkeeping
    // ============================================

    /// Mark exactly the given stat and event row ids as uploaded.
    ///
    /// Rows outside the given id sets are untouched, so increments that
    /// arrived after the batch snapshot was taken stay pending.
    pub fn mark_uploaded(&self, stat_ids: &[i64], event_ids: &[i64]) -> Result<()> {
        if stat_ids.is_empty() && event_ids.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        for id in stat_ids {
            tx.execute("UPDATE daily_stats SET uploaded = 1 WHERE id = ?", [id])?;
        }
        for id in event_ids {
            tx.execute("UPDATE events SET uploaded = 1 WHERE id = ?", [id])?;
        }

        tx.commit()?;

        tracing::debug!(
            stats = stat_ids.len(),
            events = event_ids.len(),
            "Marked batch uploaded"
        );
        Ok(())
    }

    // ============================================
    // Row mapping
    // ============================================

    fn row_to_identity(row: &Row) -> rusqlite::Result<Identity> {
        Ok(Identity {
            id: row.get("id")?,
            app_key: row.get("app_key")?,
            account_id: row.get("account_id")?,
            user_id: row.get("user_id")?,
            client_uuid: row.get("client_uuid")?,
            system_version: row.get("system_version")?,
            device_model: row.get("device_model")?,
            app_version: row.get("app_version")?,
            app_build: row.get("app_build")?,
            region: row.get("region")?,
            location: row.get("location")?,
            address: row.get("address")?,
            latitude: row.get("latitude")?,
            longitude: row.get("longitude")?,
        })
    }

    // Corrupted kind/date/ts columns fail the mapping rather than being
    // coerced, so damage shows up in the diagnostic log instead of being
    // reported as fresh data.

    fn row_to_stat(row: &Row) -> rusqlite::Result<DailyStat> {
        let kind_code: i64 = row.get("kind")?;
        let kind = StatKind::from_code(kind_code).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Integer,
                format!("unknown stat kind code {}", kind_code).into(),
            )
        })?;

        let date_str: String = row.get("date")?;
        let date = date_str.parse().map_err(|e: chrono::ParseError| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(DailyStat {
            id: row.get("id")?,
            app_key: row.get("app_key")?,
            account_id: row.get("account_id")?,
            kind,
            count: row.get("count")?,
            date,
            uploaded: row.get("uploaded")?,
        })
    }

    fn row_to_event(row: &Row) -> rusqlite::Result<EventRecord> {
        let ts_str: String = row.get("ts")?;
        let timestamp = DateTime::parse_from_rfc3339(&ts_str)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    5,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;

        Ok(EventRecord {
            id: row.get("id")?,
            app_key: row.get("app_key")?,
            account_id: row.get("account_id")?,
            name: row.get("name")?,
            attrs: row.get("attrs")?,
            timestamp,
            uploaded: row.get("uploaded")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    fn test_profile() -> DeviceProfile {
        DeviceProfile {
            platform: "iOS".to_string(),
            system_version: "17.2".to_string(),
            device_model: "iPhone15,2".to_string(),
            app_version: "1.4.0".to_string(),
            app_build: "140".to_string(),
            region: "US".to_string(),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 25).unwrap()
    }

    #[test]
    fn test_get_or_create_identity_creates_download_stat() {
        let db = test_db();
        let identity = db
            .get_or_create_identity("abc123", &test_profile(), today())
            .unwrap();

        assert_eq!(identity.app_key, "abc123");
        assert_eq!(identity.account_id, 0);
        assert_eq!(identity.user_id, 0);
        assert!(!identity.client_uuid.is_empty());

        let stat = db
            .get_daily_stat("abc123", StatKind::Download, today())
            .unwrap()
            .expect("download stat should exist");
        assert_eq!(stat.count, 1);
        assert!(!stat.uploaded);
        assert_eq!(stat.account_id, 0);
    }

    #[test]
    fn test_get_or_create_identity_idempotent() {
        let db = test_db();
        let first = db
            .get_or_create_identity("abc123", &test_profile(), today())
            .unwrap();
        let second = db
            .get_or_create_identity("abc123", &test_profile(), today())
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.client_uuid, second.client_uuid);

        // Still exactly one download stat row
        let stats = db.unsent_stats("abc123").unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].count, 1);
    }

    #[test]
    fn test_assign_account_id_backfill_is_total() {
        let db = test_db();
        let identity = db
            .get_or_create_identity("abc123", &test_profile(), today())
            .unwrap();
        db.record_event("abc123", 0, "purchase", None, Utc::now())
            .unwrap();
        db.record_daily_stat("abc123", 0, StatKind::Launch, today())
            .unwrap();

        db.assign_account_id(&identity, 42).unwrap();

        let stored = db.get_identity("abc123").unwrap().unwrap();
        assert_eq!(stored.account_id, 42);

        for stat in db.unsent_stats("abc123").unwrap() {
            assert_eq!(stat.account_id, 42);
        }
        for event in db.unsent_events("abc123").unwrap() {
            assert_eq!(event.account_id, 42);
        }
    }

    #[test]
    fn test_assign_account_id_leaves_other_keys_alone() {
        let db = test_db();
        let identity = db
            .get_or_create_identity("abc123", &test_profile(), today())
            .unwrap();
        db.get_or_create_identity("other", &test_profile(), today())
            .unwrap();

        db.assign_account_id(&identity, 42).unwrap();

        let other = db.get_identity("other").unwrap().unwrap();
        assert_eq!(other.account_id, 0);
        assert_eq!(db.unsent_stats("other").unwrap()[0].account_id, 0);
    }

    #[test]
    fn test_sync_profile_updates_identity() {
        let db = test_db();
        let identity = db
            .get_or_create_identity("abc123", &test_profile(), today())
            .unwrap();

        let remote = RemoteProfile {
            user_id: 7,
            system_version: "17.3".to_string(),
            device_model: "iPhone15,2".to_string(),
            app_version: "1.4.1".to_string(),
            app_build: "141".to_string(),
            region: "DE".to_string(),
        };
        db.sync_profile(&identity, &remote).unwrap();

        let stored = db.get_identity("abc123").unwrap().unwrap();
        assert_eq!(stored.user_id, 7);
        assert_eq!(stored.system_version, "17.3");
        assert_eq!(stored.region, "DE");
        // Client UUID never changes
        assert_eq!(stored.client_uuid, identity.client_uuid);
    }

    #[test]
    fn test_daily_stat_counter_semantics() {
        let db = test_db();

        db.record_daily_stat("abc123", 0, StatKind::Launch, today())
            .unwrap();
        db.record_daily_stat("abc123", 0, StatKind::Launch, today())
            .unwrap();

        let stat = db
            .get_daily_stat("abc123", StatKind::Launch, today())
            .unwrap()
            .unwrap();
        assert_eq!(stat.count, 2);

        // Next day gets a fresh row with count 1
        let tomorrow = today().succ_opt().unwrap();
        db.record_daily_stat("abc123", 0, StatKind::Launch, tomorrow)
            .unwrap();
        let next = db
            .get_daily_stat("abc123", StatKind::Launch, tomorrow)
            .unwrap()
            .unwrap();
        assert_eq!(next.count, 1);
        assert_ne!(stat.id, next.id);
    }

    #[test]
    fn test_increment_resets_uploaded() {
        let db = test_db();
        db.record_daily_stat("abc123", 0, StatKind::Activate, today())
            .unwrap();
        let stat = db
            .get_daily_stat("abc123", StatKind::Activate, today())
            .unwrap()
            .unwrap();
        db.mark_uploaded(&[stat.id], &[]).unwrap();

        assert!(db.unsent_stats("abc123").unwrap().is_empty());

        db.record_daily_stat("abc123", 0, StatKind::Activate, today())
            .unwrap();
        let pending = db.unsent_stats("abc123").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, stat.id);
        assert_eq!(pending[0].count, 2);
    }

    #[test]
    fn test_events_are_append_only() {
        let db = test_db();
        let attrs = Some(r#"{"sku":"x"}"#.to_string());

        db.record_event("abc123", 0, "purchase", attrs.clone(), Utc::now())
            .unwrap();
        db.record_event("abc123", 0, "purchase", attrs, Utc::now())
            .unwrap();

        let events = db.unsent_events("abc123").unwrap();
        assert_eq!(events.len(), 2);
        assert_ne!(events[0].id, events[1].id);
        assert!(events.iter().all(|e| !e.uploaded));
        // Oldest first
        assert!(events[0].id < events[1].id);
    }

    #[test]
    fn test_mark_uploaded_is_exact() {
        let db = test_db();
        let first = db
            .record_event("abc123", 0, "a", None, Utc::now())
            .unwrap();
        let second = db
            .record_event("abc123", 0, "b", None, Utc::now())
            .unwrap();

        db.mark_uploaded(&[], &[first]).unwrap();

        let pending = db.unsent_events("abc123").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, second);
    }

    #[test]
    fn test_event_round_trips_timestamp_and_attrs() {
        let db = test_db();
        let ts = DateTime::parse_from_rfc3339("2026-08-25T10:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        db.record_event("abc123", 5, "purchase", Some("{}".to_string()), ts)
            .unwrap();

        let events = db.unsent_events("abc123").unwrap();
        assert_eq!(events[0].timestamp, ts);
        assert_eq!(events[0].attrs.as_deref(), Some("{}"));
        assert_eq!(events[0].account_id, 5);
    }

    #[test]
    fn test_unknown_stat_kind_is_an_error() {
        let db = test_db();
        db.conn
            .lock()
            .unwrap()
            .execute(
                r#"
                INSERT INTO daily_stats (app_key, account_id, kind, count, date, uploaded)
                VALUES ('abc123', 0, 9, 1, '2026-08-25', 0)
                "#,
                [],
            )
            .unwrap();

        // Corruption surfaces instead of being reported as a download
        assert!(db.unsent_stats("abc123").is_err());
    }

    #[test]
    fn test_malformed_date_and_timestamp_are_errors() {
        let db = test_db();
        db.conn
            .lock()
            .unwrap()
            .execute(
                r#"
                INSERT INTO daily_stats (app_key, account_id, kind, count, date, uploaded)
                VALUES ('abc123', 0, 1, 1, 'not-a-date', 0)
                "#,
                [],
            )
            .unwrap();
        assert!(db.unsent_stats("abc123").is_err());

        db.conn
            .lock()
            .unwrap()
            .execute(
                r#"
                INSERT INTO events (app_key, account_id, name, attrs, ts, uploaded)
                VALUES ('abc123', 0, 'purchase', NULL, 'not-a-time', 0)
                "#,
                [],
            )
            .unwrap();
        assert!(db.unsent_events("abc123").is_err());
    }
}
