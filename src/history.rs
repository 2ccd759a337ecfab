// 📈 Ledger history - statistics over paid visits

use crate::visit::{PaidVisit, VisitRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Ledger totals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub total_paid: usize,
    pub unique_subjects: usize,
    pub unique_visit_names: usize,
}

impl LedgerStats {
    pub fn from_entries(entries: &[PaidVisit]) -> Self {
        let subjects: HashSet<&str> = entries.iter().map(|e| e.subject_id.as_str()).collect();
        let visit_names: HashSet<&str> = entries.iter().map(|e| e.visit_name.as_str()).collect();

        LedgerStats {
            total_paid: entries.len(),
            unique_subjects: subjects.len(),
            unique_visit_names: visit_names.len(),
        }
    }
}

/// The `limit` most recently paid entries, newest first.
/// Entries paid on the same day keep storage order.
pub fn recent_payments(entries: &[PaidVisit], limit: usize) -> Vec<&PaidVisit> {
    let mut sorted: Vec<&PaidVisit> = entries.iter().collect();
    sorted.sort_by(|a, b| b.payment_date.cmp(&a.payment_date));
    sorted.truncate(limit);
    sorted
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectVisitCount {
    pub subject_id: String,
    pub visit_count: usize,
}

/// Visits per subject, ordered by subject_id
pub fn subject_summary(rows: &[VisitRecord]) -> Vec<SubjectVisitCount> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for row in rows {
        *counts.entry(row.subject_id.as_str()).or_default() += 1;
    }

    counts
        .into_iter()
        .map(|(subject_id, visit_count)| SubjectVisitCount {
            subject_id: subject_id.to_string(),
            visit_count,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn paid(subject: &str, name: &str, paid_on: u32) -> PaidVisit {
        VisitRecord::new(subject, name, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
            .into_paid(NaiveDate::from_ymd_opt(2024, 2, paid_on).unwrap(), 0.0)
    }

    #[test]
    fn test_stats() {
        let entries = vec![
            paid("P1", "VisitA", 1),
            paid("P1", "VisitB", 2),
            paid("P2", "VisitA", 3),
        ];

        let stats = LedgerStats::from_entries(&entries);

        assert_eq!(stats.total_paid, 3);
        assert_eq!(stats.unique_subjects, 2);
        assert_eq!(stats.unique_visit_names, 2);
        assert_eq!(LedgerStats::from_entries(&[]), LedgerStats::default());
    }

    #[test]
    fn test_recent_payments_newest_first() {
        let entries = vec![
            paid("P1", "VisitA", 1),
            paid("P2", "VisitB", 5),
            paid("P3", "VisitC", 3),
            paid("P4", "VisitD", 5),
        ];

        let recent = recent_payments(&entries, 3);

        let subjects: Vec<&str> = recent.iter().map(|e| e.subject_id.as_str()).collect();
        assert_eq!(subjects, vec!["P2", "P4", "P3"]);
    }

    #[test]
    fn test_subject_summary_sorted() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let rows = vec![
            VisitRecord::new("P2", "VisitA", date),
            VisitRecord::new("P1", "VisitA", date),
            VisitRecord::new("P2", "VisitB", date),
        ];

        let summary = subject_summary(&rows);

        assert_eq!(
            summary,
            vec![
                SubjectVisitCount { subject_id: "P1".to_string(), visit_count: 1 },
                SubjectVisitCount { subject_id: "P2".to_string(), visit_count: 2 },
            ]
        );
    }
}
