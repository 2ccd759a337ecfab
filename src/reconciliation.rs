// ⚖️ Reconciliation Engine - classify an upload batch against the paid ledger
//
// Three progressively looser keys, checked in priority order per row:
//   1. (subject_id, visit_name, visit_date) → exact duplicate
//   2. (subject_id, visit_name)             → same visit, different date
//   3. (subject_id, visit_date)             → suspicious, same date
// Anything else is new.
//
// Category assignment is total and deterministic. Which prior entry gets
// cited when several share a key is only a display aid: the index keeps the
// first one in ledger order, and callers must not rely on that choice.

use crate::visit::{PaidVisit, VisitRecord};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

// ============================================================================
// MATCH CATEGORY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchCategory {
    /// No ledger entry shares any key
    New,

    /// Subject, visit name and date all match a paid visit
    ExactDuplicate,

    /// Subject and visit name match, the date differs
    SameVisitDifferentDate,

    /// Subject and date match, the visit name differs
    SuspiciousSameDate,
}

impl MatchCategory {
    pub fn label(&self) -> &'static str {
        match self {
            MatchCategory::New => "new",
            MatchCategory::ExactDuplicate => "exact duplicate",
            MatchCategory::SameVisitDifferentDate => "same visit, different date",
            MatchCategory::SuspiciousSameDate => "suspicious, same date",
        }
    }
}

// ============================================================================
// MATCH RESULT
// ============================================================================

/// Outcome of matching one row, borrowing the cited ledger entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchResult<'a> {
    Exact(&'a PaidVisit),
    SameType(&'a PaidVisit),
    SameDate(&'a PaidVisit),
    None,
}

impl MatchResult<'_> {
    pub fn category(&self) -> MatchCategory {
        match self {
            MatchResult::Exact(_) => MatchCategory::ExactDuplicate,
            MatchResult::SameType(_) => MatchCategory::SameVisitDifferentDate,
            MatchResult::SameDate(_) => MatchCategory::SuspiciousSameDate,
            MatchResult::None => MatchCategory::New,
        }
    }
}

// ============================================================================
// CLASSIFIED VISIT
// ============================================================================

/// An uploaded row that collided with the ledger, plus what it collided with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedVisit {
    #[serde(flatten)]
    pub visit: VisitRecord,

    pub category: MatchCategory,

    /// Visit date of the cited entry (same-visit-type rows only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_visit_date: Option<NaiveDate>,

    /// Visit name of the cited entry (suspicious rows only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_visit_name: Option<String>,

    pub previous_payment_date: NaiveDate,
}

impl ClassifiedVisit {
    /// Annotate `visit` with the fields of `prior` its category calls for.
    fn new(visit: &VisitRecord, category: MatchCategory, prior: &PaidVisit) -> Self {
        let previous_visit_date = match category {
            MatchCategory::SameVisitDifferentDate => Some(prior.visit_date),
            _ => None,
        };
        let previous_visit_name = match category {
            MatchCategory::SuspiciousSameDate => Some(prior.visit_name.clone()),
            _ => None,
        };

        ClassifiedVisit {
            visit: visit.clone(),
            category,
            previous_visit_date,
            previous_visit_name,
            previous_payment_date: prior.payment_date,
        }
    }
}

// ============================================================================
// CLASSIFICATION
// ============================================================================

/// Four disjoint partitions whose union is the input batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub new: Vec<VisitRecord>,
    pub exact_duplicate: Vec<ClassifiedVisit>,
    pub same_visit_different_date: Vec<ClassifiedVisit>,
    pub suspicious_same_date: Vec<ClassifiedVisit>,
}

impl Classification {
    /// Number of classified rows (equals the batch length)
    pub fn total(&self) -> usize {
        self.new.len()
            + self.exact_duplicate.len()
            + self.same_visit_different_date.len()
            + self.suspicious_same_date.len()
    }

    /// Rows that need an operator decision before anything is paid
    pub fn needs_review(&self) -> bool {
        !self.same_visit_different_date.is_empty() || !self.suspicious_same_date.is_empty()
    }

    pub fn count(&self, category: MatchCategory) -> usize {
        match category {
            MatchCategory::New => self.new.len(),
            MatchCategory::ExactDuplicate => self.exact_duplicate.len(),
            MatchCategory::SameVisitDifferentDate => self.same_visit_different_date.len(),
            MatchCategory::SuspiciousSameDate => self.suspicious_same_date.len(),
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} rows: {} new, {} exact duplicates, {} same visit with different date, {} suspicious same date",
            self.total(),
            self.new.len(),
            self.exact_duplicate.len(),
            self.same_visit_different_date.len(),
            self.suspicious_same_date.len()
        )
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

type FullKey<'a> = (&'a str, &'a str, NaiveDate);
type VisitTypeKey<'a> = (&'a str, &'a str);
type DateKey<'a> = (&'a str, NaiveDate);

/// Lookup index over a ledger snapshot. Borrows the ledger, never mutates it.
pub struct ReconciliationEngine<'a> {
    by_full_key: HashMap<FullKey<'a>, &'a PaidVisit>,
    by_visit_type: HashMap<VisitTypeKey<'a>, &'a PaidVisit>,
    by_date: HashMap<DateKey<'a>, &'a PaidVisit>,
}

impl<'a> ReconciliationEngine<'a> {
    /// Build the three key indexes. First entry per key wins.
    pub fn new(ledger: &'a [PaidVisit]) -> Self {
        let mut by_full_key = HashMap::with_capacity(ledger.len());
        let mut by_visit_type = HashMap::with_capacity(ledger.len());
        let mut by_date = HashMap::with_capacity(ledger.len());

        for paid in ledger {
            let subject = paid.subject_id.as_str();
            let name = paid.visit_name.as_str();

            by_full_key.entry((subject, name, paid.visit_date)).or_insert(paid);
            by_visit_type.entry((subject, name)).or_insert(paid);
            by_date.entry((subject, paid.visit_date)).or_insert(paid);
        }

        ReconciliationEngine {
            by_full_key,
            by_visit_type,
            by_date,
        }
    }

    /// Match one row. Keys are tried strictly in priority order.
    pub fn match_visit(&self, visit: &VisitRecord) -> MatchResult<'a> {
        let subject = visit.subject_id.as_str();
        let name = visit.visit_name.as_str();

        if let Some(&prior) = self.by_full_key.get(&(subject, name, visit.visit_date)) {
            return MatchResult::Exact(prior);
        }

        if let Some(&prior) = self.by_visit_type.get(&(subject, name)) {
            return MatchResult::SameType(prior);
        }

        if let Some(&prior) = self.by_date.get(&(subject, visit.visit_date)) {
            return MatchResult::SameDate(prior);
        }

        MatchResult::None
    }

    /// Partition a batch. Input order is kept inside each partition.
    pub fn classify(&self, batch: &[VisitRecord]) -> Classification {
        let mut classification = Classification::default();

        for visit in batch {
            let result = self.match_visit(visit);
            let category = result.category();

            match result {
                MatchResult::None => classification.new.push(visit.clone()),
                MatchResult::Exact(prior) => classification
                    .exact_duplicate
                    .push(ClassifiedVisit::new(visit, category, prior)),
                MatchResult::SameType(prior) => classification
                    .same_visit_different_date
                    .push(ClassifiedVisit::new(visit, category, prior)),
                MatchResult::SameDate(prior) => classification
                    .suspicious_same_date
                    .push(ClassifiedVisit::new(visit, category, prior)),
            }
        }

        classification
    }
}

/// Classify `batch` against `ledger`. Pure: neither input is modified.
///
/// Example:
/// ```
/// use visit_ledger::{classify, VisitRecord};
/// use chrono::NaiveDate;
///
/// let date = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
/// let paid = VisitRecord::new("P1", "VisitA", date).into_paid(date, 0.0);
///
/// let batch = vec![VisitRecord::new("P1", "VisitA", date)];
/// let result = classify(&batch, &[paid]);
/// assert_eq!(result.exact_duplicate.len(), 1);
/// ```
pub fn classify(batch: &[VisitRecord], ledger: &[PaidVisit]) -> Classification {
    if ledger.is_empty() {
        debug!(rows = batch.len(), "empty ledger, every row is new");
        return Classification {
            new: batch.to_vec(),
            ..Classification::default()
        };
    }

    let classification = ReconciliationEngine::new(ledger).classify(batch);

    debug!(
        rows = batch.len(),
        ledger = ledger.len(),
        new = classification.new.len(),
        exact = classification.exact_duplicate.len(),
        same_visit = classification.same_visit_different_date.len(),
        suspicious = classification.suspicious_same_date.len(),
        "batch classified"
    );

    classification
}

// ============================================================================
// TESTS
// ============================================================================
