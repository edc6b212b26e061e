use std::time::Duration;

use chrono::{Days, NaiveDate};
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::debug;

use crate::error::FeedError;
use crate::parser::RawEntry;
use crate::settings::Source;

pub const FEED_URL: &str = "https://www.spenderservice.net/termine.rss";
const USER_AGENT: &str = concat!("blutspende/", env!("CARGO_PKG_VERSION"));

/// Query URL for a source. Parameters without a value are left out.
pub fn query_url(source: &Source, today: NaiveDate) -> String {
    let date_to = source
        .lookahead_days
        .and_then(|days| today.checked_add_days(Days::new(u64::from(days))))
        .map(|d| d.format("%d.%m.%Y").to_string());

    let params = [
        ("term", Some(source.zipcode.clone())),
        ("radius", source.radius.map(|r| r.to_string())),
        ("county_id", source.county_id.clone()),
        ("date_to", date_to),
    ];

    let query: Vec<String> = params
        .into_iter()
        .filter_map(|(key, value)| {
            let value = value.filter(|v| !v.is_empty())?;
            Some(format!("{}={}", key, value))
        })
        .collect();

    if query.is_empty() {
        FEED_URL.to_string()
    } else {
        format!("{}?{}", FEED_URL, query.join("&"))
    }
}

pub struct FeedClient {
    client: reqwest::Client,
}

impl FeedClient {
    pub fn new(timeout: Duration) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }

    /// GET the feed and split it into entries.
    pub async fn fetch(&self, url: &str) -> Result<Vec<RawEntry>, FeedError> {
        debug!("Fetching feed: {}", url);
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status {
                status,
                url: url.to_string(),
            });
        }

        let bytes = response.bytes().await?;
        let entries = parse_feed(&bytes)?;
        debug!(url, entries = entries.len(), "Parsed feed");
        Ok(entries)
    }
}

#[derive(Clone, Copy)]
enum Field {
    Title,
    Description,
    Link,
}

/// Collect title/description/link of every `<item>` in an RSS document.
pub fn parse_feed(xml: &[u8]) -> Result<Vec<RawEntry>, FeedError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut buf = Vec::new();
    let mut current: Option<RawEntry> = None;
    let mut field: Option<Field> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"item" => current = Some(RawEntry::default()),
                b"title" if current.is_some() => field = Some(Field::Title),
                b"description" if current.is_some() => field = Some(Field::Description),
                b"link" if current.is_some() => field = Some(Field::Link),
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if let (Some(entry), Some(f)) = (current.as_mut(), field) {
                    let text = e
                        .unescape()
                        .map_err(|e| FeedError::Parse(format!("bad text in item: {}", e)))?;
                    push_text(entry, f, &text);
                }
            }
            Ok(Event::CData(e)) => {
                if let (Some(entry), Some(f)) = (current.as_mut(), field) {
                    let raw = e.into_inner();
                    push_text(entry, f, &String::from_utf8_lossy(&raw));
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"item" => {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                    field = None;
                }
                b"title" | b"description" | b"link" => field = None,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(FeedError::Parse(format!("XML parse error: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    if current.is_some() {
        return Err(FeedError::Parse("unterminated <item>".to_string()));
    }
    Ok(entries)
}

fn push_text(entry: &mut RawEntry, field: Field, text: &str) {
    let target = match field {
        Field::Title => &mut entry.title,
        Field::Description => &mut entry.description,
        Field::Link => &mut entry.link,
    };
    target.push_str(text);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SourceConfig;

    fn source(cfg: SourceConfig) -> Source {
        cfg.validate().unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    #[test]
    fn url_with_all_parameters() {
        let s = source(SourceConfig {
            zipcode: "40211".into(),
            radius: Some(10),
            county_id: Some("duesseldorf".into()),
            lookahead_days: Some(14),
            ..SourceConfig::default()
        });
        assert_eq!(
            query_url(&s, today()),
            "https://www.spenderservice.net/termine.rss?term=40211&radius=10&county_id=duesseldorf&date_to=15.06.2024"
        );
    }

    #[test]
    fn url_omits_absent_parameters() {
        let s = source(SourceConfig {
            zipcode: "40211".into(),
            radius: None,
            county_id: Some(String::new()),
            lookahead_days: None,
            ..SourceConfig::default()
        });
        assert_eq!(
            query_url(&s, today()),
            "https://www.spenderservice.net/termine.rss?term=40211"
        );
    }

    #[test]
    fn url_lookahead_crosses_month() {
        let s = source(SourceConfig {
            zipcode: "12345".into(),
            lookahead_days: Some(30),
            ..SourceConfig::default()
        });
        assert_eq!(
            query_url(&s, NaiveDate::from_ymd_opt(2024, 12, 15).unwrap()),
            "https://www.spenderservice.net/termine.rss?term=12345&date_to=14.01.2025"
        );
    }

    #[test]
    fn fixture_entries() {
        let xml = std::fs::read("tests/fixtures/termine.rss").unwrap();
        let entries = parse_feed(&xml).unwrap();
        assert_eq!(entries.len(), 5);

        // channel title/link never leak into items
        assert!(entries.iter().all(|e| e.title != "DRK Blutspendetermine"));

        let first = &entries[0];
        assert_eq!(first.title, "40211 Düsseldorf am 03.06.2024, 15:30 Uhr bis 19:30 Uhr");
        assert_eq!(first.link, "https://www.spenderservice.net/termine/1001");
        assert!(first.description.starts_with("Blutspendetermin - Kölner Str. 12 - "));
        assert!(first.description.contains("<br/>"));

        // escaped markup is unescaped
        assert!(entries[1].description.contains("Kreuzweg<br />"));
    }

    #[test]
    fn item_without_description() {
        let xml = br#"<rss><channel><item><title>t</title><link>l</link></item></channel></rss>"#;
        let entries = parse_feed(xml).unwrap();
        assert_eq!(
            entries,
            vec![RawEntry {
                title: "t".into(),
                description: String::new(),
                link: "l".into(),
            }]
        );
    }

    #[test]
    fn empty_channel() {
        let xml = br#"<?xml version="1.0"?><rss version="2.0"><channel><title>x</title></channel></rss>"#;
        assert!(parse_feed(xml).unwrap().is_empty());
    }

    #[test]
    fn malformed_xml() {
        let xml = b"<rss><channel><item><title>a</link></item></channel></rss>";
        assert!(matches!(parse_feed(xml), Err(FeedError::Parse(_))));
    }
}
