// 🗄️ Ledger Store - append-only collection of paid visits
//
// One contract, two backings:
// - JsonFileStore: JSON array on disk, version = SHA-256 of the file bytes
// - SqliteStore: relational table, version = revision counter
//
// Writes are conditional on the version returned by the caller's last
// load. A mismatch is a WriteConflict; retrying is the caller's job.

pub mod json_file;
pub mod sqlite;

pub use json_file::JsonFileStore;
pub use sqlite::{LedgerEvent, SqliteStore};

use crate::config::StorageConfig;
use crate::error::StoreError;
use crate::visit::PaidVisit;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

// ============================================================================
// VERSION TOKEN
// ============================================================================

/// Opaque expected-state token handed out by `load_all`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LedgerVersion(String);

impl LedgerVersion {
    pub fn new(token: impl Into<String>) -> Self {
        LedgerVersion(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fail with WriteConflict unless `actual` is this version.
    pub fn check(&self, actual: &LedgerVersion) -> Result<(), StoreError> {
        if self == actual {
            Ok(())
        } else {
            warn!(expected = %self, actual = %actual, "ledger changed since last load");
            Err(StoreError::WriteConflict {
                expected: self.0.clone(),
                actual: actual.0.clone(),
            })
        }
    }
}

impl fmt::Display for LedgerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Every ledger entry in storage order, plus the version it was read at.
#[derive(Debug, Clone)]
pub struct LedgerSnapshot {
    pub entries: Vec<PaidVisit>,
    pub version: LedgerVersion,
}

impl LedgerSnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// STORE CONTRACT
// ============================================================================

/// The only interface the engine and its callers see.
pub trait LedgerStore: Send {
    /// Read every entry. Storage that does not exist yet is created empty.
    fn load_all(&self) -> Result<LedgerSnapshot, StoreError>;

    /// Append `rows` if the ledger is still at `expected`.
    /// All rows land or none do. Returns the new version.
    fn append_batch(
        &self,
        expected: &LedgerVersion,
        rows: &[PaidVisit],
    ) -> Result<LedgerVersion, StoreError>;

    /// Erase every entry if the ledger is still at `expected`.
    fn clear_all(&self, expected: &LedgerVersion) -> Result<LedgerVersion, StoreError>;

    /// Human-readable location, for logs
    fn describe(&self) -> String;
}

/// Reject a batch holding any row that `load_all` would refuse to read back.
pub(crate) fn validate_rows(rows: &[PaidVisit]) -> Result<(), StoreError> {
    match rows.iter().find(|row| !row.has_valid_amount()) {
        Some(bad) => {
            warn!(subject = %bad.subject_id, amount = bad.payment_amount, "batch rejected");
            Err(StoreError::InvalidEntry(format!(
                "payment_amount {} for subject {} visit {} must be a non-negative number",
                bad.payment_amount, bad.subject_id, bad.visit_name
            )))
        }
        None => Ok(()),
    }
}

/// Pick the backing named by configuration.
pub fn open_store(config: &StorageConfig) -> Result<Box<dyn LedgerStore>, StoreError> {
    let store: Box<dyn LedgerStore> = match config {
        StorageConfig::Json { path } => Box::new(JsonFileStore::new(path.clone())),
        StorageConfig::Sqlite { path } => Box::new(SqliteStore::open(path)?),
    };

    info!(store = %store.describe(), "ledger store opened");
    Ok(store)
}

// ============================================================================
// TWO-STEP CLEAR
// ============================================================================

/// Confirmation for a destructive clear.
///
/// Bound to the ledger version seen when it was requested, so a clear can
/// never erase rows the operator has not seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearToken {
    version: LedgerVersion,
    entry_count: usize,
}

impl ClearToken {
    pub fn version(&self) -> &LedgerVersion {
        &self.version
    }

    /// Entries that will be erased on confirmation
    pub fn entry_count(&self) -> usize {
        self.entry_count
    }
}

impl fmt::Display for ClearToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entry_count, self.version)
    }
}

#[derive(Debug, Error)]
#[error("invalid clear confirmation token '{0}'")]
pub struct InvalidClearToken(String);

impl FromStr for ClearToken {
    type Err = InvalidClearToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (count, version) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| InvalidClearToken(s.to_string()))?;

        let entry_count = count.parse().map_err(|_| InvalidClearToken(s.to_string()))?;
        if version.is_empty() {
            return Err(InvalidClearToken(s.to_string()));
        }

        Ok(ClearToken {
            version: LedgerVersion::new(version),
            entry_count,
        })
    }
}

/// Step one: capture what a clear would erase.
pub fn request_clear(store: &dyn LedgerStore) -> Result<ClearToken, StoreError> {
    let snapshot = store.load_all()?;

    Ok(ClearToken {
        version: snapshot.version,
        entry_count: snapshot.entries.len(),
    })
}

/// Step two: erase the ledger, provided it has not changed since the request.
pub fn confirm_clear(store: &dyn LedgerStore, token: &ClearToken) -> Result<LedgerVersion, StoreError> {
    let version = store.clear_all(&token.version)?;

    info!(erased = token.entry_count, store = %store.describe(), "ledger cleared");
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visit::VisitRecord;
    use chrono::NaiveDate;

    fn paid(subject: &str) -> PaidVisit {
        let date = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        VisitRecord::new(subject, "VisitA", date).into_paid(date, 0.0)
    }

    #[test]
    fn test_version_check() {
        let v1 = LedgerVersion::new("1");
        let v2 = LedgerVersion::new("2");

        assert!(v1.check(&v1.clone()).is_ok());

        let err = v1.check(&v2).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_clear_token_round_trip() {
        let token = ClearToken {
            version: LedgerVersion::new("abc123"),
            entry_count: 7,
        };

        let parsed: ClearToken = token.to_string().parse().unwrap();

        assert_eq!(parsed, token);
        assert!("garbage".parse::<ClearToken>().is_err());
        assert!("x:abc".parse::<ClearToken>().is_err());
        assert!("3:".parse::<ClearToken>().is_err());
    }

    #[test]
    fn test_two_step_clear() {
        let store = SqliteStore::open_in_memory().unwrap();
        let snapshot = store.load_all().unwrap();
        store.append_batch(&snapshot.version, &[paid("P1"), paid("P2")]).unwrap();

        let token = request_clear(&store).unwrap();
        assert_eq!(token.entry_count(), 2);

        confirm_clear(&store, &token).unwrap();

        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_stale_clear_token_is_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();

        let token = request_clear(&store).unwrap();

        // Someone pays a visit between request and confirmation
        let snapshot = store.load_all().unwrap();
        store.append_batch(&snapshot.version, &[paid("P1")]).unwrap();

        let err = confirm_clear(&store, &token).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.load_all().unwrap().len(), 1);
    }

    #[test]
    fn test_open_store_from_config() {
        let dir = tempfile::tempdir().unwrap();

        let json = open_store(&StorageConfig::Json {
            path: dir.path().join("payments.json"),
        })
        .unwrap();
        assert!(json.load_all().unwrap().is_empty());

        let sqlite = open_store(&StorageConfig::Sqlite {
            path: dir.path().join("payments.db"),
        })
        .unwrap();
        assert!(sqlite.load_all().unwrap().is_empty());
    }
}
