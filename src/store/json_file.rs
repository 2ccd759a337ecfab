// 📄 JSON ledger file
//
// Format: pretty-printed array of PaidVisit objects.
// Version token: hex SHA-256 of the exact file bytes.
// Writes land in a temp file next to the target and are renamed over it,
// so a failed write leaves the previous file untouched.
// Read-check-write runs under an exclusive lock on `<file>.lock`, shared by
// every process and every JsonFileStore pointing at the same path.

use super::{validate_rows, LedgerSnapshot, LedgerStore, LedgerVersion};
use crate::error::StoreError;
use crate::visit::PaidVisit;
use fs2::FileExt;
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

const EMPTY_LEDGER: &[u8] = b"[]";

pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sidecar file the writer lock is taken on
    pub fn lock_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".lock");
        PathBuf::from(name)
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    fn unavailable(&self, action: &str, e: std::io::Error) -> StoreError {
        StoreError::Unavailable(format!("failed to {} {}: {}", action, self.path.display(), e))
    }

    /// Block until this process holds the writer lock. Released on drop.
    fn lock(&self) -> Result<File, StoreError> {
        fs::create_dir_all(self.dir()).map_err(|e| self.unavailable("create directory for", e))?;

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path())
            .map_err(|e| self.unavailable("open lock for", e))?;
        file.lock_exclusive().map_err(|e| self.unavailable("lock", e))?;

        Ok(file)
    }

    /// Current bytes; a missing file is created as an empty ledger.
    fn read_bytes(&self) -> Result<Vec<u8>, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let _lock = self.lock()?;
                self.read_or_init()
            }
            Err(e) => Err(self.unavailable("read", e)),
        }
    }

    /// Like `read_bytes`, for callers already holding the lock.
    fn read_or_init(&self) -> Result<Vec<u8>, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "ledger file missing, creating empty ledger");
                self.write_bytes(EMPTY_LEDGER)?;
                Ok(EMPTY_LEDGER.to_vec())
            }
            Err(e) => Err(self.unavailable("read", e)),
        }
    }

    fn write_bytes(&self, bytes: &[u8]) -> Result<(), StoreError> {
        let dir = self.dir();
        fs::create_dir_all(dir).map_err(|e| self.unavailable("write", e))?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| self.unavailable("write", e))?;
        tmp.write_all(bytes).map_err(|e| self.unavailable("write", e))?;
        tmp.as_file().sync_all().map_err(|e| self.unavailable("write", e))?;
        tmp.persist(&self.path).map_err(|e| self.unavailable("write", e.error))?;

        Ok(())
    }

    fn parse(&self, bytes: &[u8]) -> Result<Vec<PaidVisit>, StoreError> {
        let entries: Vec<PaidVisit> = serde_json::from_slice(bytes).map_err(|e| {
            StoreError::Corrupt(format!("{}: {}", self.path.display(), e))
        })?;

        if let Some(bad) = entries.iter().find(|entry| !entry.has_valid_amount()) {
            return Err(StoreError::Corrupt(format!(
                "{}: invalid payment_amount {} for subject {}",
                self.path.display(),
                bad.payment_amount,
                bad.subject_id
            )));
        }

        Ok(entries)
    }

    /// Read, verify the caller's version, then replace the whole file.
    fn rewrite<F>(&self, expected: &LedgerVersion, change: F) -> Result<LedgerVersion, StoreError>
    where
        F: FnOnce(&mut Vec<PaidVisit>),
    {
        let _lock = self.lock()?;

        let current = self.read_or_init()?;
        expected.check(&digest(&current))?;

        let mut entries = self.parse(&current)?;
        change(&mut entries);

        let bytes = serde_json::to_vec_pretty(&entries).map_err(|e| {
            StoreError::Unavailable(format!("failed to serialize ledger: {}", e))
        })?;
        self.write_bytes(&bytes)?;

        Ok(digest(&bytes))
    }
}

fn digest(bytes: &[u8]) -> LedgerVersion {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    LedgerVersion::new(format!("{:x}", hasher.finalize()))
}

impl LedgerStore for JsonFileStore {
    fn load_all(&self) -> Result<LedgerSnapshot, StoreError> {
        let bytes = self.read_bytes()?;
        let entries = self.parse(&bytes)?;

        debug!(path = %self.path.display(), entries = entries.len(), "ledger loaded");
        Ok(LedgerSnapshot {
            entries,
            version: digest(&bytes),
        })
    }

    fn append_batch(
        &self,
        expected: &LedgerVersion,
        rows: &[PaidVisit],
    ) -> Result<LedgerVersion, StoreError> {
        validate_rows(rows)?;

        let version = self.rewrite(expected, |entries| entries.extend_from_slice(rows))?;

        info!(path = %self.path.display(), appended = rows.len(), "ledger appended");
        Ok(version)
    }

    fn clear_all(&self, expected: &LedgerVersion) -> Result<LedgerVersion, StoreError> {
        self.rewrite(expected, |entries| entries.clear())
    }

    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }
}
