// 🗃️ SQLite ledger
//
// paid_visits   - one row per paid visit (id autoincrement)
// ledger_meta   - single row holding the revision used as version token
// ledger_events - audit trail, one row per append/clear
//
// Every write runs in one IMMEDIATE transaction: check revision, change
// rows, bump revision, log event, commit. Any error rolls the whole batch back.

use super::{validate_rows, LedgerSnapshot, LedgerStore, LedgerVersion};
use crate::error::StoreError;
use crate::visit::{format_date, PaidVisit};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Audit record of one ledger write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,

    /// "append" or "clear"
    pub event_type: String,

    /// Rows appended, or rows erased by a clear
    pub row_count: i64,

    /// Revision the write produced
    pub revision: i64,
}

impl LedgerEvent {
    fn new(event_type: &str, row_count: i64, revision: i64) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            row_count,
            revision,
        }
    }
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
    location: String,
}

impl SqliteStore {
    /// Open (or create) a database file in WAL mode.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }

        let conn = Connection::open(path)?;
        // WAL mode for crash recovery
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Self::with_connection(conn, path.to_path_buf())
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, PathBuf::from(":memory:"))
    }

    fn with_connection(conn: Connection, path: PathBuf) -> Result<Self, StoreError> {
        setup_database(&conn)?;

        Ok(SqliteStore {
            conn: Mutex::new(conn),
            location: path.display().to_string(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("ledger connection poisoned".to_string()))
    }

    /// Audit trail, newest first
    pub fn events(&self) -> Result<Vec<LedgerEvent>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT event_id, timestamp, event_type, row_count, revision
             FROM ledger_events
             ORDER BY id DESC",
        )?;

        let raw = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(event_id, timestamp, event_type, row_count, revision)| {
                let timestamp = DateTime::parse_from_rfc3339(&timestamp)
                    .map_err(|e| StoreError::Corrupt(format!("event {}: {}", event_id, e)))?
                    .with_timezone(&Utc);

                Ok(LedgerEvent {
                    event_id,
                    timestamp,
                    event_type,
                    row_count,
                    revision,
                })
            })
            .collect()
    }

    /// Run `change` inside an IMMEDIATE transaction guarded by `expected`.
    /// `change` returns the row count recorded in the audit event.
    fn write<F>(
        &self,
        expected: &LedgerVersion,
        event_type: &str,
        change: F,
    ) -> Result<LedgerVersion, StoreError>
    where
        F: FnOnce(&Connection) -> Result<i64, StoreError>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let actual = read_revision(&tx)?;
        expected.check(&revision_version(actual))?;

        let row_count = change(&*tx)?;

        let revision = actual + 1;
        tx.execute("UPDATE ledger_meta SET revision = ?1 WHERE id = 1", params![revision])?;
        insert_event(&tx, &LedgerEvent::new(event_type, row_count, revision))?;

        tx.commit()?;

        Ok(revision_version(revision))
    }
}

fn revision_version(revision: i64) -> LedgerVersion {
    LedgerVersion::new(revision.to_string())
}

pub fn setup_database(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS paid_visits (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            subject_id TEXT NOT NULL,
            visit_name TEXT NOT NULL,
            visit_date TEXT NOT NULL,
            payment_date TEXT NOT NULL,
            payment_amount REAL NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS ledger_meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            revision INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO ledger_meta (id, revision) VALUES (1, 0)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS ledger_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            row_count INTEGER NOT NULL,
            revision INTEGER NOT NULL
        )",
        [],
    )?;

    // Indexes
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_visit_type ON paid_visits(subject_id, visit_name)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_visit_date ON paid_visits(subject_id, visit_date)",
        [],
    )?;

    Ok(())
}

fn read_revision(conn: &Connection) -> Result<i64, StoreError> {
    let revision = conn.query_row("SELECT revision FROM ledger_meta WHERE id = 1", [], |row| {
        row.get(0)
    })?;

    Ok(revision)
}

fn insert_event(conn: &Connection, event: &LedgerEvent) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO ledger_events (event_id, timestamp, event_type, row_count, revision)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.row_count,
            event.revision,
        ],
    )?;

    Ok(())
}

fn parse_stored_date(value: &str, column: &str, id: i64) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
        StoreError::Corrupt(format!("paid_visits row {}: invalid {} '{}'", id, column, value))
    })
}

fn get_all_paid_visits(conn: &Connection) -> Result<Vec<PaidVisit>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, subject_id, visit_name, visit_date, payment_date, payment_amount
         FROM paid_visits
         ORDER BY id",
    )?;

    let raw = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, f64>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(|(id, subject_id, visit_name, visit_date, payment_date, payment_amount)| {
            let entry = PaidVisit {
                subject_id,
                visit_name,
                visit_date: parse_stored_date(&visit_date, "visit_date", id)?,
                payment_date: parse_stored_date(&payment_date, "payment_date", id)?,
                payment_amount,
            };

            if !entry.has_valid_amount() {
                return Err(StoreError::Corrupt(format!(
                    "paid_visits row {}: invalid payment_amount {}",
                    id, payment_amount
                )));
            }

            Ok(entry)
        })
        .collect()
}

impl LedgerStore for SqliteStore {
    fn load_all(&self) -> Result<LedgerSnapshot, StoreError> {
        let mut conn = self.lock()?;
        // Read revision and rows from one consistent view
        let tx = conn.transaction()?;

        let revision = read_revision(&tx)?;
        let entries = get_all_paid_visits(&tx)?;
        tx.commit()?;

        debug!(db = %self.location, entries = entries.len(), revision, "ledger loaded");
        Ok(LedgerSnapshot {
            entries,
            version: revision_version(revision),
        })
    }

    fn append_batch(
        &self,
        expected: &LedgerVersion,
        rows: &[PaidVisit],
    ) -> Result<LedgerVersion, StoreError> {
        validate_rows(rows)?;

        let version = self.write(expected, "append", |conn| {
            let mut stmt = conn.prepare(
                "INSERT INTO paid_visits (subject_id, visit_name, visit_date, payment_date, payment_amount)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;

            for row in rows {
                stmt.execute(params![
                    row.subject_id,
                    row.visit_name,
                    format_date(row.visit_date),
                    format_date(row.payment_date),
                    row.payment_amount,
                ])?;
            }

            Ok(rows.len() as i64)
        })?;

        info!(db = %self.location, appended = rows.len(), version = %version, "ledger appended");
        Ok(version)
    }

    fn clear_all(&self, expected: &LedgerVersion) -> Result<LedgerVersion, StoreError> {
        self.write(expected, "clear", |conn| {
            let erased = conn.execute("DELETE FROM paid_visits", [])?;
            Ok(erased as i64)
        })
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visit::VisitRecord;

    fn paid(subject: &str, name: &str, day: u32) -> PaidVisit {
        let date = NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        VisitRecord::new(subject, name, date).into_paid(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(), 0.0)
    }

    #[test]
    fn test_empty_store_loads_empty() {
        let store = SqliteStore::open_in_memory().unwrap();

        let snapshot = store.load_all().unwrap();

        assert!(snapshot.is_empty());
        assert_eq!(snapshot.version.as_str(), "0");
    }

    #[test]
    fn test_append_then_load() {
        let store = SqliteStore::open_in_memory().unwrap();

        let v0 = store.load_all().unwrap().version;
        let v1 = store.append_batch(&v0, &[paid("P1", "VisitA", 10)]).unwrap();
        let v2 = store
            .append_batch(&v1, &[paid("P2", "VisitB", 11), paid("P1", "VisitC", 12)])
            .unwrap();

        let snapshot = store.load_all().unwrap();

        assert_eq!(snapshot.version, v2);
        assert_eq!(
            snapshot.entries,
            vec![paid("P1", "VisitA", 10), paid("P2", "VisitB", 11), paid("P1", "VisitC", 12)]
        );
    }

    #[test]
    fn test_conflicting_append_writes_nothing() {
        let store = SqliteStore::open_in_memory().unwrap();

        let stale = store.load_all().unwrap().version;
        store.append_batch(&stale, &[paid("P1", "VisitA", 10)]).unwrap();

        let err = store
            .append_batch(&stale, &[paid("P2", "VisitB", 11), paid("P3", "VisitC", 12)])
            .unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(store.load_all().unwrap().len(), 1);
        assert_eq!(store.events().unwrap().len(), 1);
    }

    #[test]
    fn test_clear_all_and_audit_trail() {
        let store = SqliteStore::open_in_memory().unwrap();

        let v0 = store.load_all().unwrap().version;
        let v1 = store
            .append_batch(&v0, &[paid("P1", "VisitA", 10), paid("P2", "VisitB", 11)])
            .unwrap();
        store.clear_all(&v1).unwrap();

        assert!(store.load_all().unwrap().is_empty());

        let events = store.events().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "clear");
        assert_eq!(events[0].row_count, 2);
        assert_eq!(events[1].event_type, "append");
        assert_eq!(events[1].revision, 1);
    }

    #[test]
    fn test_file_database_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger").join("payments.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            let v0 = store.load_all().unwrap().version;
            store.append_batch(&v0, &[paid("P1", "VisitA", 10)]).unwrap();
        }

        let reopened = SqliteStore::open(&path).unwrap();
        let snapshot = reopened.load_all().unwrap();

        assert_eq!(snapshot.entries, vec![paid("P1", "VisitA", 10)]);
        assert_eq!(snapshot.version.as_str(), "1");
    }

    #[test]
    fn test_bad_stored_date_is_corrupt() {
        let store = SqliteStore::open_in_memory().unwrap();
        {
            let conn = store.lock().unwrap();
            conn.execute(
                "INSERT INTO paid_visits (subject_id, visit_name, visit_date, payment_date, payment_amount)
                 VALUES ('P1', 'VisitA', '10/01/2024', '2024-02-01', 0)",
                [],
            )
            .unwrap();
        }

        let err = store.load_all().unwrap_err();

        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[test]
    fn test_not_a_database_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payments.db");
        fs::write(&path, "not an sqlite database\n".repeat(64)).unwrap();

        let err = SqliteStore::open(&path).err().unwrap();

        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[test]
    fn test_failure_mid_batch_writes_nothing() {
        let store = SqliteStore::open_in_memory().unwrap();
        {
            let conn = store.lock().unwrap();
            conn.execute_batch(
                "CREATE TRIGGER reject_p2 BEFORE INSERT ON paid_visits
                 WHEN NEW.subject_id = 'P2'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();
        }

        let v0 = store.load_all().unwrap().version;
        let result = store.append_batch(
            &v0,
            &[paid("P1", "VisitA", 10), paid("P2", "VisitB", 11), paid("P3", "VisitC", 12)],
        );

        assert!(result.is_err());

        let snapshot = store.load_all().unwrap();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.version, v0);
        assert!(store.events().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_amount_rejects_batch() {
        let store = SqliteStore::open_in_memory().unwrap();

        let v0 = store.load_all().unwrap().version;
        let v1 = store.append_batch(&v0, &[paid("P1", "VisitA", 10)]).unwrap();

        let mut nan = paid("P3", "VisitC", 12);
        nan.payment_amount = f64::NAN;
        let err = store
            .append_batch(&v1, &[paid("P2", "VisitB", 11), nan])
            .unwrap_err();

        assert!(matches!(err, StoreError::InvalidEntry(_)));

        let snapshot = store.load_all().unwrap();
        assert_eq!(snapshot.version, v1);
        assert_eq!(snapshot.entries, vec![paid("P1", "VisitA", 10)]);
        assert_eq!(store.events().unwrap().len(), 1);
    }
}
