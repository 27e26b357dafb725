//! Crate-wide error type.

/// Errors surfaced by the tool layer, the agent and the PRISM pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} - {body}")]
    Api { status: u16, body: String },
    #[error("Cache miss in offline_only mode for key={key}… (cache={dir})")]
    OfflineCacheMiss { key: String, dir: String },
    #[error("LLM error: {0}")]
    Llm(String),
    #[error("failed to parse model output: {0}")]
    Parse(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Build an `Api` error, keeping at most the first 200 characters of the body.
    pub fn api(status: u16, body: &str) -> Self {
        Error::Api {
            status,
            body: body.chars().take(200).collect(),
        }
    }
}
