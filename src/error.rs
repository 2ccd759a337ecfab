// ⚠️ Error taxonomy
// Input errors reject a whole batch; store errors propagate untouched.

use thiserror::Error;

/// A malformed upload. Classification never starts on a batch that produced one.
#[derive(Debug, Error)]
pub enum InputError {
    /// Upload has fewer than the three required columns
    #[error("upload needs 3 columns (subject_id, visit_name, visit_date), found {found}")]
    MissingColumns { found: usize },

    #[error("line {line}: column '{column}' is empty")]
    EmptyField { line: usize, column: &'static str },

    #[error("line {line}: cannot parse visit date '{value}'")]
    InvalidDate { line: usize, value: String },

    #[error("failed to read upload: {0}")]
    Read(#[from] csv::Error),

    #[error("failed to open upload: {0}")]
    Io(#[from] std::io::Error),
}

impl InputError {
    /// Source line of the offending row, when the error is row-level
    pub fn line(&self) -> Option<usize> {
        match self {
            InputError::EmptyField { line, .. } | InputError::InvalidDate { line, .. } => Some(*line),
            _ => None,
        }
    }
}

/// Failures of a ledger backing.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The medium could not be reached. Not the same thing as an empty ledger.
    #[error("ledger store unavailable: {0}")]
    Unavailable(String),

    /// Ledger changed since the caller's snapshot; reload, reclassify, retry.
    #[error("ledger changed since it was loaded (expected version {expected}, found {actual})")]
    WriteConflict { expected: String, actual: String },

    /// Persisted content does not parse. Never replaced with an empty ledger.
    #[error("ledger content is corrupt: {0}")]
    Corrupt(String),

    /// A row offered for writing breaks an entry invariant; nothing was written.
    #[error("invalid ledger entry: {0}")]
    InvalidEntry(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::WriteConflict { .. })
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if matches!(e.code, ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase) =>
            {
                StoreError::Corrupt(err.to_string())
            }
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::IntegralValueOutOfRange(..) => StoreError::Corrupt(err.to_string()),
            _ => StoreError::Unavailable(err.to_string()),
        }
    }
}

/// Invalid configuration file or environment override.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("unknown storage backend '{0}' (expected 'json' or 'sqlite')")]
    UnknownBackend(String),
}
