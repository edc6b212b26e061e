use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status} when fetching {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("Failed to parse RSS feed: {0}")]
    Parse(String),

    #[error("Fetch task failed: {0}")]
    Task(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid zipcode {0:?}: expected 5 digits")]
    Zipcode(String),

    #[error("Radius {0} is not one of the allowed distances")]
    Radius(u32),

    #[error("Unknown county id {0:?}")]
    County(String),

    #[error("Invalid display format {0:?}")]
    DisplayFormat(String),

    #[error("Invalid zip filter entry {0:?}: expected 5 digits")]
    ZipFilter(String),
}
