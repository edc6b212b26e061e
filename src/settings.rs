use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use config::{Config, Environment, File};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ConfigError;
use crate::parser::DisplayFormat;

pub const DEFAULT_DISPLAY_FORMAT: &str = "%A, %d.%m.%Y";
pub const DEFAULT_LOOKAHEAD_DAYS: u32 = 14;
pub const DEFAULT_NAME: &str = "blutspende";
/// The feed is not queried more often than this.
pub const MIN_POLL_INTERVAL_SECS: u64 = 3600;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Search radius in km accepted by spenderservice.net.
pub const RADIUS_OPTIONS: &[u32] = &[0, 5, 10, 20, 30, 40, 50];

/// (county_id, display name)
pub const COUNTIES: &[(&str, &str)] = &[
    ("aachen", "StädteRegion Aachen"),
    ("bonn", "Bonn"),
    ("dortmund", "Dortmund"),
    ("duesseldorf", "Düsseldorf"),
    ("duisburg", "Duisburg"),
    ("essen", "Essen"),
    ("koeln", "Köln"),
    ("krefeld", "Krefeld"),
    ("mettmann", "Kreis Mettmann"),
    ("muenster", "Münster"),
    ("neuss", "Rhein-Kreis Neuss"),
    ("rhein-sieg", "Rhein-Sieg-Kreis"),
    ("saarbruecken", "Regionalverband Saarbrücken"),
    ("mainz", "Mainz"),
    ("trier", "Trier"),
    ("wuppertal", "Wuppertal"),
];

pub fn county_name(id: &str) -> Option<&'static str> {
    COUNTIES
        .iter()
        .find(|(known, _)| *known == id)
        .map(|(_, name)| *name)
}

static ZIP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{5}$").unwrap());

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

/// One configured query as written in the settings file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub zipcode: String,
    #[serde(default)]
    pub radius: Option<u32>,
    #[serde(default)]
    pub county_id: Option<String>,
    #[serde(default = "default_lookahead")]
    pub lookahead_days: Option<u32>,
    #[serde(default = "default_display_format")]
    pub display_format: String,
    #[serde(default)]
    pub zip_filter: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// A validated source. `id` is stable for identical configuration.
#[derive(Debug, Clone)]
pub struct Source {
    pub id: String,
    pub name: String,
    pub zipcode: String,
    pub radius: Option<u32>,
    pub county_id: Option<String>,
    pub lookahead_days: Option<u32>,
    pub display_format: DisplayFormat,
    pub zip_filter: String,
}

fn default_poll_interval() -> u64 {
    MIN_POLL_INTERVAL_SECS
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_lookahead() -> Option<u32> {
    Some(DEFAULT_LOOKAHEAD_DAYS)
}

fn default_display_format() -> String {
    DEFAULT_DISPLAY_FORMAT.to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            zipcode: String::new(),
            radius: None,
            county_id: None,
            lookahead_days: default_lookahead(),
            display_format: default_display_format(),
            zip_filter: None,
            name: None,
        }
    }
}

impl Settings {
    /// Settings file (optional, TOML) overlaid with `BLUTSPENDE_*` environment variables.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix("BLUTSPENDE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Never shorter than [`MIN_POLL_INTERVAL_SECS`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(MIN_POLL_INTERVAL_SECS))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn sources(&self) -> Result<Vec<Source>, ConfigError> {
        self.sources.iter().map(SourceConfig::validate).collect()
    }
}

/// Field order here is the hashed representation; changing it changes every id.
#[derive(Serialize)]
struct Canonical<'a> {
    name: &'a str,
    zipcode: &'a str,
    radius: Option<u32>,
    county_id: Option<&'a str>,
    lookahead_days: Option<u32>,
    display_format: &'a str,
    zip_filter: &'a str,
}

impl SourceConfig {
    pub fn validate(&self) -> Result<Source, ConfigError> {
        let zipcode = self.zipcode.trim().to_string();
        if !ZIP_RE.is_match(&zipcode) {
            return Err(ConfigError::Zipcode(self.zipcode.clone()));
        }

        if let Some(radius) = self.radius {
            if !RADIUS_OPTIONS.contains(&radius) {
                return Err(ConfigError::Radius(radius));
            }
        }

        let county_id = non_empty(self.county_id.as_deref());
        if let Some(id) = &county_id {
            if county_name(id).is_none() {
                return Err(ConfigError::County(id.clone()));
            }
        }

        let display_format = DisplayFormat::new(&self.display_format)
            .ok_or_else(|| ConfigError::DisplayFormat(self.display_format.clone()))?;

        let tokens: Vec<&str> = self
            .zip_filter
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|z| !z.is_empty())
            .collect();
        if let Some(bad) = tokens.iter().find(|z| !ZIP_RE.is_match(z)) {
            return Err(ConfigError::ZipFilter(bad.to_string()));
        }
        let zip_filter = tokens.join(",");

        let name = non_empty(self.name.as_deref()).unwrap_or_else(|| DEFAULT_NAME.to_string());

        let id = stable_id(&Canonical {
            name: &name,
            zipcode: &zipcode,
            radius: self.radius,
            county_id: county_id.as_deref(),
            lookahead_days: self.lookahead_days,
            display_format: display_format.as_str(),
            zip_filter: &zip_filter,
        });

        Ok(Source {
            id,
            name,
            zipcode,
            radius: self.radius,
            county_id,
            lookahead_days: self.lookahead_days,
            display_format,
            zip_filter,
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

fn stable_id(canonical: &Canonical) -> String {
    let json = serde_json::to_string(canonical).unwrap_or_default();
    let digest = Sha256::digest(json.as_bytes());
    digest.iter().take(4).map(|b| format!("{:02x}", b)).collect()
}
