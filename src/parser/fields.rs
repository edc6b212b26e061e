use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

// "<zipcode> <city> am <date>, <start> Uhr bis <end> Uhr"
static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?P<zipcode>\d{5})\s(?P<city>.*)\sam\s(?P<date>[\d.]+),\s(?P<start>[\d:]+)[^\d]+(?P<end>[\d:]+)",
    )
    .unwrap()
});

// "<anything> - <address> - <location><markup...>"
static DESCRIPTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-\s(?P<address>.*)\s-\s(?P<location>[^<]+)").unwrap());

/// Fields carried by a feed item title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TitleFields {
    pub zipcode: String,
    pub city: String,
    /// Raw `DD.MM.YYYY` token, as it appeared in the feed.
    pub date: String,
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DescriptionFields {
    pub address: String,
    pub location: String,
}

/// Match the title pattern anywhere in `title`. `None` means the entry is not an appointment.
pub fn extract_title(title: &str) -> Option<TitleFields> {
    let caps = TITLE_RE.captures(title)?;
    Some(TitleFields {
        zipcode: caps["zipcode"].to_string(),
        city: caps["city"].to_string(),
        date: caps["date"].to_string(),
        start: caps["start"].to_string(),
        end: caps["end"].to_string(),
    })
}

/// Location stops at the first `<`; trailing markup is dropped.
pub fn extract_description(description: &str) -> Option<DescriptionFields> {
    let caps = DESCRIPTION_RE.captures(description)?;
    // "Halle <br>" yields "Halle", not "Halle "
    Some(DescriptionFields {
        address: caps["address"].trim().to_string(),
        location: caps["location"].trim().to_string(),
    })
}
