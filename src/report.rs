// 📤 Report export - one CSV per category plus a per-subject summary
//
// Sheets for empty categories are skipped. The payable sheet and its
// summary are written only when something is payable.

use crate::commit::PaySelection;
use crate::history::subject_summary;
use crate::reconciliation::{Classification, ClassifiedVisit, MatchCategory};
use crate::visit::{format_date, PaidVisit, VisitRecord};
use csv::Writer;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const TO_PAY_FILE: &str = "to_pay.csv";
pub const SUMMARY_FILE: &str = "summary.csv";
pub const EXACT_DUPLICATES_FILE: &str = "exact_duplicates.csv";
pub const SAME_VISIT_FILE: &str = "same_visit_different_date.csv";
pub const SUSPICIOUS_FILE: &str = "suspicious_same_date.csv";

/// Write the full report into `dir`. Returns the files written.
pub fn write_report(
    dir: &Path,
    classification: &Classification,
    selection: &PaySelection,
) -> Result<Vec<PathBuf>, csv::Error> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::new();

    let to_pay = classification.visits_to_pay(selection);
    if !to_pay.is_empty() {
        let path = dir.join(TO_PAY_FILE);
        write_visits(&path, &to_pay)?;
        written.push(path);

        let path = dir.join(SUMMARY_FILE);
        let mut wtr = Writer::from_path(&path)?;
        for row in subject_summary(&to_pay) {
            wtr.serialize(row)?;
        }
        wtr.flush()?;
        written.push(path);
    }

    // New rows have no sheet of their own; they are the base of to_pay.csv
    for (category, file_name, rows) in [
        (MatchCategory::ExactDuplicate, EXACT_DUPLICATES_FILE, &classification.exact_duplicate),
        (
            MatchCategory::SameVisitDifferentDate,
            SAME_VISIT_FILE,
            &classification.same_visit_different_date,
        ),
        (MatchCategory::SuspiciousSameDate, SUSPICIOUS_FILE, &classification.suspicious_same_date),
    ] {
        if rows.is_empty() {
            continue;
        }

        let path = dir.join(file_name);
        write_classified(&path, category, rows)?;
        written.push(path);
    }

    info!(dir = %dir.display(), files = written.len(), "report written");
    Ok(written)
}

fn write_visits(path: &Path, rows: &[VisitRecord]) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_path(path)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

fn write_classified(
    path: &Path,
    category: MatchCategory,
    rows: &[ClassifiedVisit],
) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_path(path)?;

    let mut header = vec!["subject_id", "visit_name", "visit_date"];
    match category {
        MatchCategory::SameVisitDifferentDate => header.push("previous_visit_date"),
        MatchCategory::SuspiciousSameDate => header.push("previous_visit_name"),
        _ => {}
    }
    header.push("previous_payment_date");
    wtr.write_record(&header)?;

    for row in rows {
        let mut record = vec![
            row.visit.subject_id.clone(),
            row.visit.visit_name.clone(),
            format_date(row.visit.visit_date),
        ];
        match category {
            MatchCategory::SameVisitDifferentDate => {
                record.push(row.previous_visit_date.map(format_date).unwrap_or_default())
            }
            MatchCategory::SuspiciousSameDate => {
                record.push(row.previous_visit_name.clone().unwrap_or_default())
            }
            _ => {}
        }
        record.push(format_date(row.previous_payment_date));
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(())
}

/// Export the whole ledger as one CSV.
pub fn write_history(path: &Path, entries: &[PaidVisit]) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_path(path)?;
    for entry in entries {
        wtr.serialize(entry)?;
    }
    wtr.flush()?;

    info!(path = %path.display(), entries = entries.len(), "history exported");
    Ok(())
}
