// Visit Ledger - Core Library
// Reconciles uploaded visit batches against the ledger of paid visits

pub mod visit;
pub mod error;
pub mod upload;
pub mod reconciliation;
pub mod store;
pub mod commit;
pub mod history;
pub mod report;
pub mod config;

// Re-export commonly used types
pub use visit::{PaidVisit, VisitRecord, format_date};
pub use error::{ConfigError, InputError, StoreError};
pub use upload::{load_batch, parse_batch, normalize_date};
pub use reconciliation::{
    classify, Classification, ClassifiedVisit, MatchCategory, MatchResult, ReconciliationEngine,
};
pub use store::{
    confirm_clear, open_store, request_clear, ClearToken, JsonFileStore, LedgerEvent,
    LedgerSnapshot, LedgerStore, LedgerVersion, SqliteStore,
};
pub use commit::{commit_visits, stamp_payment, PaySelection, DEFAULT_PAYMENT_AMOUNT};
pub use history::{recent_payments, subject_summary, LedgerStats, SubjectVisitCount};
pub use report::{write_history, write_report};
pub use config::{Config, StorageConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
