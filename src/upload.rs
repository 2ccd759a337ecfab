// 📥 Upload Normalization - tabular batch → Vec<VisitRecord>
// Columns are positional: subject_id, visit_name, visit_date.
// Header names are free-form and extra columns are dropped.

use crate::error::InputError;
use crate::visit::VisitRecord;
use chrono::{NaiveDate, NaiveDateTime};
use csv::ReaderBuilder;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

const REQUIRED_COLUMNS: usize = 3;

/// Date-only layouts accepted in the visit_date column
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y"];

/// Timestamp layouts (spreadsheet exports often carry a midnight time part)
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Load and normalize a CSV upload from disk.
pub fn load_batch(path: &Path) -> Result<Vec<VisitRecord>, InputError> {
    let file = File::open(path)?;
    let batch = parse_batch(file)?;

    info!(path = %path.display(), rows = batch.len(), "upload normalized");
    Ok(batch)
}

/// Normalize an upload. The first malformed row rejects the whole batch.
pub fn parse_batch<R: Read>(reader: R) -> Result<Vec<VisitRecord>, InputError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let found = reader.headers()?.len();
    if found < REQUIRED_COLUMNS {
        return Err(InputError::MissingColumns { found });
    }

    let mut batch = Vec::new();

    for (index, result) in reader.records().enumerate() {
        let record = result?;
        let line = record
            .position()
            .map(|pos| pos.line() as usize)
            .unwrap_or(index + 2); // 1-indexed + header row

        let field = |i: usize| record.get(i).unwrap_or("").trim();

        if (0..REQUIRED_COLUMNS).all(|i| field(i).is_empty()) {
            debug!(line, "skipping blank row");
            continue;
        }

        let subject_id = required(field(0), line, "subject_id")?;
        let visit_name = required(field(1), line, "visit_name")?;
        let raw_date = required(field(2), line, "visit_date")?;

        let visit_date = normalize_date(raw_date).ok_or_else(|| InputError::InvalidDate {
            line,
            value: raw_date.to_string(),
        })?;

        batch.push(VisitRecord::new(subject_id, visit_name, visit_date));
    }

    Ok(batch)
}

fn required<'a>(value: &'a str, line: usize, column: &'static str) -> Result<&'a str, InputError> {
    if value.is_empty() {
        Err(InputError::EmptyField { line, column })
    } else {
        Ok(value)
    }
}

/// Parse a free-form visit date into a calendar date.
///
/// Tries date-only layouts first, then timestamps (time part dropped).
pub fn normalize_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date);
        }
    }

    for format in DATETIME_FORMATS {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(datetime.date());
        }
    }

    None
}
