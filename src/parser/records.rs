use std::collections::{BTreeMap, HashSet};
use std::fmt::Write;

use chrono::format::{Item, StrftimeItems};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use tracing::info;

use super::fields::{extract_description, extract_title, DescriptionFields, TitleFields};
use super::RawEntry;

const WHEN_FORMAT: &str = "%d.%m.%Y %H:%M";

/// A strftime pattern that is known to render a `NaiveDateTime` without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayFormat(String);

impl DisplayFormat {
    pub fn new(pattern: &str) -> Option<Self> {
        if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
            return None;
        }
        // Offset/timezone specifiers parse fine but fail on a naive timestamp.
        let probe = NaiveDate::from_ymd_opt(2024, 1, 1)?.and_hms_opt(0, 0, 0)?;
        let mut out = String::new();
        write!(out, "{}", probe.format(pattern)).ok()?;
        Some(Self(pattern.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn render(&self, when: &NaiveDateTime) -> String {
        let mut out = String::new();
        let _ = write!(out, "{}", when.format(&self.0));
        out
    }
}

/// One bookable appointment, built from a feed entry whose title and description both parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppointmentRecord {
    /// Sort key and published state.
    pub when: NaiveDateTime,
    pub title: TitleFields,
    pub description: DescriptionFields,
    pub link: String,
    /// `when` rendered with the configured display format.
    pub display_date: String,
}

impl AppointmentRecord {
    pub fn zipcode(&self) -> &str {
        &self.title.zipcode
    }

    /// Flat attribute map as published next to the state. `date` holds the display rendering.
    pub fn attributes(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("zipcode", self.title.zipcode.clone()),
            ("city", self.title.city.clone()),
            ("date", self.display_date.clone()),
            ("start", self.title.start.clone()),
            ("end", self.title.end.clone()),
            ("address", self.description.address.clone()),
            ("location", self.description.location.clone()),
            ("link", self.link.clone()),
        ])
    }
}

/// Parse every entry that carries an appointment, sorted by `when`.
/// Entries with equal timestamps keep their feed order.
pub fn build_records(entries: &[RawEntry], format: &DisplayFormat) -> Vec<AppointmentRecord> {
    let mut records: Vec<AppointmentRecord> = entries
        .iter()
        .filter_map(|entry| build_record(entry, format))
        .collect();
    records.sort_by_key(|r| r.when);
    records
}

fn build_record(entry: &RawEntry, format: &DisplayFormat) -> Option<AppointmentRecord> {
    let Some(title) = extract_title(&entry.title) else {
        info!(title = %entry.title, "Skipping entry: title has no appointment");
        return None;
    };
    let Some(description) = extract_description(&entry.description) else {
        info!(title = %entry.title, "Skipping entry: description has no address/location");
        return None;
    };
    let when = match NaiveDateTime::parse_from_str(
        &format!("{} {}", title.date, title.start),
        WHEN_FORMAT,
    ) {
        Ok(when) => when,
        Err(e) => {
            info!(
                title = %entry.title,
                date = %title.date,
                start = %title.start,
                "Skipping entry: bad date/time ({})",
                e
            );
            return None;
        }
    };

    Some(AppointmentRecord {
        when,
        display_date: format.render(&when),
        title,
        description,
        link: entry.link.clone(),
    })
}

/// Split a comma-separated filter into postcodes. `None` when nothing is left after trimming.
pub fn parse_zip_filter(raw: &str) -> Option<HashSet<String>> {
    let zips: HashSet<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|z| !z.is_empty())
        .map(str::to_string)
        .collect();
    if zips.is_empty() {
        None
    } else {
        Some(zips)
    }
}

pub fn filter_by_zip(
    records: Vec<AppointmentRecord>,
    allowed: &HashSet<String>,
) -> Vec<AppointmentRecord> {
    records
        .into_iter()
        .filter(|r| allowed.contains(r.zipcode()))
        .collect()
}

pub fn select_best(records: Vec<AppointmentRecord>) -> Option<AppointmentRecord> {
    records.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(title: &str, description: &str) -> RawEntry {
        RawEntry {
            title: title.to_string(),
            description: description.to_string(),
            link: format!("https://www.spenderservice.net/termin/{}", title.len()),
        }
    }

    fn default_format() -> DisplayFormat {
        DisplayFormat::new("%A, %d.%m.%Y").unwrap()
    }

    #[test]
    fn display_format_validation() {
        assert!(DisplayFormat::new("%A, %d.%m.%Y").is_some());
        assert!(DisplayFormat::new("%d.%m. %H:%M Uhr").is_some());
        assert!(DisplayFormat::new("%Q").is_none());
        // no offset on a naive timestamp
        assert!(DisplayFormat::new("%d.%m.%Y %z").is_none());
    }

    #[test]
    fn records_sorted_by_when() {
        let entries = vec![
            entry("10115 Berlin am 03.06.2024, 10:00 Uhr bis 14:00 Uhr", "X - Str. 1 - Halle A"),
            entry("10117 Berlin am 01.06.2024, 16:00 Uhr bis 19:00 Uhr", "X - Str. 2 - Halle B"),
            entry("10119 Berlin am 01.06.2024, 09:00 Uhr bis 12:00 Uhr", "X - Str. 3 - Halle C"),
            entry("10178 Berlin am 31.05.2024, 15:00 Uhr bis 18:00 Uhr", "X - Str. 4 - Halle D"),
        ];
        let records = build_records(&entries, &default_format());
        assert_eq!(records.len(), 4);
        assert!(records.windows(2).all(|w| w[0].when <= w[1].when));
        let zips: Vec<&str> = records.iter().map(|r| r.zipcode()).collect();
        assert_eq!(zips, ["10178", "10119", "10117", "10115"]);
    }

    #[test]
    fn equal_timestamps_keep_feed_order() {
        let entries = vec![
            entry("10115 Berlin am 01.06.2024, 10:00 Uhr bis 14:00 Uhr", "X - Str. 1 - Erste"),
            entry("10117 Berlin am 01.06.2024, 10:00 Uhr bis 12:00 Uhr", "X - Str. 2 - Zweite"),
        ];
        let records = build_records(&entries, &default_format());
        assert_eq!(records[0].description.location, "Erste");
        assert_eq!(records[1].description.location, "Zweite");
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let entries = vec![
            entry("Sondertermin - Informationen folgen", "X - Str. 1 - Halle"),
            entry("10115 Berlin am 01.06.2024, 10:00 Uhr bis 14:00 Uhr", "Keine Angaben"),
            // regex matches, date does not exist
            entry("10115 Berlin am 31.02.2024, 10:00 Uhr bis 14:00 Uhr", "X - Str. 1 - Halle"),
            entry("10115 Berlin am 1.6., 10:00 Uhr bis 14:00 Uhr", "X - Str. 1 - Halle"),
            entry("10117 Berlin am 02.06.2024, 10:00 Uhr bis 14:00 Uhr", "X - Str. 2 - Aula"),
        ];
        let records = build_records(&entries, &default_format());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].zipcode(), "10117");
    }

    #[test]
    fn attributes_use_display_date() {
        let entries = vec![entry(
            "12345 Berlin am 01.06.2024, 14:00 Uhr bis 18:00 Uhr",
            "Blutspende - Hauptstrasse 1 - Gemeindehalle<br/>extra",
        )];
        let records = build_records(&entries, &default_format());
        let r = &records[0];
        let when = NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(14, 0, 0)
            .unwrap();
        assert_eq!(r.when, when);
        assert_eq!(r.title.date, "01.06.2024");

        let attrs = r.attributes();
        assert_eq!(attrs["date"], "Saturday, 01.06.2024");
        assert_eq!(attrs["zipcode"], "12345");
        assert_eq!(attrs["city"], "Berlin");
        assert_eq!(attrs["start"], "14:00");
        assert_eq!(attrs["end"], "18:00");
        assert_eq!(attrs["address"], "Hauptstrasse 1");
        assert_eq!(attrs["location"], "Gemeindehalle");
        assert_eq!(attrs["link"], entries[0].link);
        assert_eq!(attrs.len(), 8);
    }

    #[test]
    fn zip_filter_parsing() {
        let zips = parse_zip_filter(" 12345, 67890 ,").unwrap();
        assert_eq!(zips.len(), 2);
        assert!(zips.contains("12345"));
        assert!(zips.contains("67890"));
        assert!(parse_zip_filter("").is_none());
        assert!(parse_zip_filter(" , ").is_none());
    }

    #[test]
    fn filter_keeps_allowed_in_order() {
        let entries = vec![
            entry("12345 Berlin am 01.06.2024, 10:00 Uhr bis 14:00 Uhr", "X - Str. 1 - A"),
            entry("11111 Berlin am 02.06.2024, 10:00 Uhr bis 14:00 Uhr", "X - Str. 2 - B"),
            entry("67890 Berlin am 03.06.2024, 10:00 Uhr bis 14:00 Uhr", "X - Str. 3 - C"),
        ];
        let records = build_records(&entries, &default_format());
        let allowed = parse_zip_filter("12345, 67890").unwrap();
        let kept = filter_by_zip(records, &allowed);
        let zips: Vec<&str> = kept.iter().map(|r| r.zipcode()).collect();
        assert_eq!(zips, ["12345", "67890"]);
    }

    #[test]
    fn select_best_takes_first() {
        assert!(select_best(Vec::new()).is_none());
        let entries = vec![
            entry("12345 Berlin am 05.06.2024, 10:00 Uhr bis 14:00 Uhr", "X - Str. 1 - Spät"),
            entry("12345 Berlin am 04.06.2024, 10:00 Uhr bis 14:00 Uhr", "X - Str. 1 - Früh"),
        ];
        let best = select_best(build_records(&entries, &default_format())).unwrap();
        assert_eq!(best.description.location, "Früh");
    }
}
