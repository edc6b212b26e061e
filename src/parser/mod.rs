pub mod fields;
pub mod records;

use records::{build_records, filter_by_zip, parse_zip_filter, select_best};
pub use records::{AppointmentRecord, DisplayFormat};

/// One `<item>` of the feed. Missing elements are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEntry {
    pub title: String,
    pub description: String,
    pub link: String,
}

/// Parsed records that pass the zip filter, soonest first. An empty filter keeps everything.
pub fn matching_records(
    entries: &[RawEntry],
    format: &DisplayFormat,
    zip_filter: &str,
) -> Vec<AppointmentRecord> {
    let records = build_records(entries, format);
    match parse_zip_filter(zip_filter) {
        Some(allowed) => filter_by_zip(records, &allowed),
        None => records,
    }
}

/// Entries → records → zip filter → soonest. `None` is the "unknown" state.
pub fn run(entries: &[RawEntry], format: &DisplayFormat, zip_filter: &str) -> Option<AppointmentRecord> {
    select_best(matching_records(entries, format, zip_filter))
}
