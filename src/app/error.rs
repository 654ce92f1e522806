use thiserror::Error;

use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Manifest error: {0}")]
    Manifest(String),

    /// A lifecycle hook failed. These are never routed to `on_error`.
    #[error("{kind} hook failed: {source}")]
    Hook {
        kind: String,
        #[source]
        source: anyhow::Error,
    },

    /// A processing hook failed and no error hook was registered for it.
    #[error("Unhandled processing error in module {module} for {url}: {source}")]
    Processing {
        module: String,
        url: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{0}")]
    Other(String),
}

impl HarvestError {
    pub fn hook(kind: impl ToString, source: anyhow::Error) -> Self {
        Self::Hook {
            kind: kind.to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, HarvestError>;
