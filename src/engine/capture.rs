//! Parsing of captured measurement output.

use std::path::Path;

use tracing::warn;

use crate::core::{RawRecord, Scalar};

/// Fold `perf stat -x,` rows from `stderr` into `record`.
///
/// The value is the first column and the event name the third, with any
/// `:u`/`:k` modifier stripped. Rows that do not have both are reported and
/// skipped. Returns the number of fields added.
pub fn parse_perf_csv(stderr: &str, record: &mut RawRecord, context: &str) -> usize {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(stderr.as_bytes());

    let mut added = 0;
    for row in reader.records() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                warn!(%context, error = %e, "unreadable profiler row");
                continue;
            }
        };
        if row.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        match (row.get(0), row.get(2).filter(|e| !e.trim().is_empty())) {
            (Some(value), Some(event)) => {
                let name = event.split(':').next().unwrap_or(event);
                record.insert(name, Scalar::from_raw(value));
                added += 1;
            }
            _ => warn!(%context, row = ?row, "profiler row without event column"),
        }
    }
    added
}

/// Value of the first `key:` line of a `/proc/<pid>/status`-style text.
pub fn status_value(text: &str, key: &str) -> Option<String> {
    text.lines()
        .find(|line| {
            line.strip_prefix(key)
                .is_some_and(|rest| rest.starts_with(':'))
        })
        .and_then(|line| line.split_whitespace().nth(1))
        .map(str::to_string)
}

/// Read `key` from the side-channel status file at `path`, then delete it.
///
/// Only the first occurrence counts, since a forked child appends its own
/// block after the benchmark's.
pub fn take_status_file(path: &Path, key: &str) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    if let Err(e) = std::fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "could not remove status file");
    }
    status_value(&text, key)
}
