// Property-based tests for batch classification.
// CI: 256 cases (default). Soak: PROPTEST_CASES=10000 cargo test --release

use std::collections::HashMap;

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use visit_ledger::{classify, stamp_payment, PaidVisit, PaySelection, VisitRecord};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn config_256() -> ProptestConfig {
    ProptestConfig {
        cases: std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(256),
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

/// Small alphabets so batches and ledgers collide on every key often.
fn arb_visit() -> impl Strategy<Value = VisitRecord> {
    (r"P[1-3]", r"Visit[A-C]", 0i64..6).prop_map(|(subject, name, offset)| {
        let base = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        VisitRecord::new(subject, name, base + Duration::days(offset))
    })
}

fn arb_paid() -> impl Strategy<Value = PaidVisit> {
    (arb_visit(), 0i64..30).prop_map(|(visit, delay)| {
        let paid_on = visit.visit_date + Duration::days(delay);
        visit.into_paid(paid_on, 0.0)
    })
}

fn arb_batch() -> impl Strategy<Value = Vec<VisitRecord>> {
    prop::collection::vec(arb_visit(), 0..40)
}

fn arb_ledger() -> impl Strategy<Value = Vec<PaidVisit>> {
    prop::collection::vec(arb_paid(), 0..40)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn counts<'a>(rows: impl Iterator<Item = &'a VisitRecord>) -> HashMap<&'a VisitRecord, usize> {
    let mut counts = HashMap::new();
    for row in rows {
        *counts.entry(row).or_insert(0) += 1;
    }
    counts
}

fn has_exact(ledger: &[PaidVisit], v: &VisitRecord) -> bool {
    ledger.iter().any(|p| {
        p.subject_id == v.subject_id && p.visit_name == v.visit_name && p.visit_date == v.visit_date
    })
}

fn has_same_type(ledger: &[PaidVisit], v: &VisitRecord) -> bool {
    ledger
        .iter()
        .any(|p| p.subject_id == v.subject_id && p.visit_name == v.visit_name)
}

fn has_same_date(ledger: &[PaidVisit], v: &VisitRecord) -> bool {
    ledger
        .iter()
        .any(|p| p.subject_id == v.subject_id && p.visit_date == v.visit_date)
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(config_256())]

    /// Every row lands in exactly one partition.
    #[test]
    fn partitions_cover_batch(batch in arb_batch(), ledger in arb_ledger()) {
        let result = classify(&batch, &ledger);

        prop_assert_eq!(result.total(), batch.len());

        let classified = result
            .new
            .iter()
            .chain(result.exact_duplicate.iter().map(|c| &c.visit))
            .chain(result.same_visit_different_date.iter().map(|c| &c.visit))
            .chain(result.suspicious_same_date.iter().map(|c| &c.visit));

        prop_assert_eq!(counts(classified), counts(batch.iter()));
    }

    /// Against an empty ledger the batch comes back untouched as new.
    #[test]
    fn empty_ledger_everything_new(batch in arb_batch()) {
        let result = classify(&batch, &[]);

        prop_assert_eq!(&result.new, &batch);
        prop_assert_eq!(result.total(), batch.len());
    }

    /// Each row sits in the highest-priority category its keys allow.
    #[test]
    fn categories_follow_key_priority(batch in arb_batch(), ledger in arb_ledger()) {
        let result = classify(&batch, &ledger);

        for row in &result.exact_duplicate {
            prop_assert!(has_exact(&ledger, &row.visit));
        }

        for row in &result.same_visit_different_date {
            prop_assert!(!has_exact(&ledger, &row.visit));
            prop_assert!(has_same_type(&ledger, &row.visit));
            prop_assert_ne!(row.previous_visit_date, Some(row.visit.visit_date));
        }

        for row in &result.suspicious_same_date {
            prop_assert!(!has_same_type(&ledger, &row.visit));
            prop_assert!(has_same_date(&ledger, &row.visit));
            prop_assert_ne!(row.previous_visit_name.as_deref(), Some(row.visit.visit_name.as_str()));
        }

        for row in &result.new {
            prop_assert!(!has_same_type(&ledger, row));
            prop_assert!(!has_same_date(&ledger, row));
        }
    }

    /// New rows keep their upload order.
    #[test]
    fn new_rows_keep_batch_order(batch in arb_batch(), ledger in arb_ledger()) {
        let result = classify(&batch, &ledger);

        let expected: Vec<VisitRecord> = batch
            .iter()
            .filter(|v| !has_same_type(&ledger, v) && !has_same_date(&ledger, v))
            .cloned()
            .collect();

        prop_assert_eq!(result.new, expected);
    }

    /// Once paid, a batch reclassifies as nothing but exact duplicates.
    #[test]
    fn paying_new_rows_makes_them_duplicates(batch in arb_batch(), ledger in arb_ledger()) {
        let first = classify(&batch, &ledger);
        let to_pay = first.visits_to_pay(&PaySelection::default());
        let paid_on = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

        let mut after = ledger.clone();
        after.extend(stamp_payment(to_pay.clone(), paid_on));

        let second = classify(&to_pay, &after);

        prop_assert_eq!(second.exact_duplicate.len(), to_pay.len());
        prop_assert!(second.new.is_empty());
    }
}
