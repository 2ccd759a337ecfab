// 🗂️ Visit Records - uploaded rows and paid ledger entries
// A VisitRecord becomes a PaidVisit only through the commit path

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ============================================================================
// VISIT RECORD (uploaded, pre-ledger)
// ============================================================================

/// One normalized row of an upload batch.
///
/// Produced by `upload::parse_batch`; `visit_date` always serializes as
/// `YYYY-MM-DD`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VisitRecord {
    pub subject_id: String,
    pub visit_name: String,
    pub visit_date: NaiveDate,
}

impl VisitRecord {
    pub fn new(subject_id: impl Into<String>, visit_name: impl Into<String>, visit_date: NaiveDate) -> Self {
        VisitRecord {
            subject_id: subject_id.into(),
            visit_name: visit_name.into(),
            visit_date,
        }
    }

    /// Promote this visit to a ledger entry.
    pub fn into_paid(self, payment_date: NaiveDate, payment_amount: f64) -> PaidVisit {
        PaidVisit {
            subject_id: self.subject_id,
            visit_name: self.visit_name,
            visit_date: self.visit_date,
            payment_date,
            payment_amount,
        }
    }
}

// ============================================================================
// PAID VISIT (ledger entry)
// ============================================================================

/// Ledger entry. Immutable once written; only a full clear removes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaidVisit {
    pub subject_id: String,
    pub visit_name: String,
    pub visit_date: NaiveDate,

    /// Day the visit was marked as paid
    pub payment_date: NaiveDate,

    /// Always 0.0 today; no pricing exists yet
    pub payment_amount: f64,
}

impl PaidVisit {
    /// The visit part of the entry, without payment data
    pub fn visit(&self) -> VisitRecord {
        VisitRecord {
            subject_id: self.subject_id.clone(),
            visit_name: self.visit_name.clone(),
            visit_date: self.visit_date,
        }
    }

    /// Stored entries must carry a finite, non-negative amount.
    pub fn has_valid_amount(&self) -> bool {
        self.payment_amount.is_finite() && self.payment_amount >= 0.0
    }
}

/// Canonical `YYYY-MM-DD` rendering used by every store and report.
pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
