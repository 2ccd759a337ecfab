// ✅ Commit - turn the operator's selection into paid ledger entries
//
// Exact duplicates are never payable. The two review categories are paid
// only when the operator opts in, one switch per category.

use crate::error::StoreError;
use crate::reconciliation::{Classification, ClassifiedVisit};
use crate::store::{LedgerStore, LedgerVersion};
use crate::visit::{PaidVisit, VisitRecord};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Amount recorded for every committed visit; no pricing exists yet.
pub const DEFAULT_PAYMENT_AMOUNT: f64 = 0.0;

/// Operator opt-ins for the reviewable categories
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaySelection {
    /// Pay rows whose visit was already paid under another date
    pub include_same_visit_type: bool,

    /// Pay rows sharing a date with a differently named paid visit
    pub include_suspicious: bool,
}

impl Classification {
    /// New rows, then the opted-in review rows, each in upload order.
    pub fn visits_to_pay(&self, selection: &PaySelection) -> Vec<VisitRecord> {
        let mut rows = self.new.clone();

        if selection.include_same_visit_type {
            rows.extend(self.same_visit_different_date.iter().map(|c| c.visit.clone()));
        }

        if selection.include_suspicious {
            rows.extend(self.suspicious_same_date.iter().map(|c| c.visit.clone()));
        }

        rows
    }

    /// Review rows the operator did not opt into
    pub fn held_back(&self, selection: &PaySelection) -> Vec<&ClassifiedVisit> {
        let mut held = Vec::new();

        if !selection.include_same_visit_type {
            held.extend(self.same_visit_different_date.iter());
        }

        if !selection.include_suspicious {
            held.extend(self.suspicious_same_date.iter());
        }

        held
    }
}

/// Stamp rows with the payment date and the zero amount.
pub fn stamp_payment(rows: Vec<VisitRecord>, payment_date: NaiveDate) -> Vec<PaidVisit> {
    rows.into_iter()
        .map(|row| row.into_paid(payment_date, DEFAULT_PAYMENT_AMOUNT))
        .collect()
}

/// Append `rows` as paid on `payment_date`, conditioned on `expected`.
///
/// An empty selection writes nothing and returns `expected` unchanged.
pub fn commit_visits(
    store: &dyn LedgerStore,
    expected: &LedgerVersion,
    rows: Vec<VisitRecord>,
    payment_date: NaiveDate,
) -> Result<LedgerVersion, StoreError> {
    if rows.is_empty() {
        info!("nothing selected for payment");
        return Ok(expected.clone());
    }

    let paid = stamp_payment(rows, payment_date);
    let version = store.append_batch(expected, &paid)?;

    info!(
        committed = paid.len(),
        payment_date = %payment_date,
        store = %store.describe(),
        "visits marked as paid"
    );
    Ok(version)
}
