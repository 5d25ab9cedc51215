use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("request to {url} failed with status {status}")]
    HttpStatus { url: String, status: u16 },
    #[error("connection to {url} failed: {source}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("no local page mapped for {url}")]
    Unmapped { url: String },
    #[error("failed to read {path} for {url}: {source}")]
    Io {
        url: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("run stopped before {url} could be fetched")]
    Aborted { url: String },
}

impl FetchError {
    /// Status errors in the 4xx range are not worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            FetchError::Timeout { .. } | FetchError::Connection { .. } => true,
            FetchError::Unmapped { .. } | FetchError::Io { .. } | FetchError::Aborted { .. } => {
                false
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("no sales phases found by any extraction tier")]
    NoPhases,
    #[error("listing page has no away fixture cards")]
    NoFixtureCards,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DateParseError {
    #[error("unrecognised date text: {0:?}")]
    Date(String),
    #[error("unrecognised time text: {0:?}")]
    Time(String),
    #[error("date out of range: {0:?}")]
    OutOfRange(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read state file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write state file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("state file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("unknown fixture id {0}")]
    UnknownFixture(u64),
    #[error("unknown sales phase {name:?} for fixture {fixture_id}")]
    UnknownPhase { fixture_id: u64, name: String },
    #[error("store lock poisoned")]
    Poisoned,
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("{channel} delivery failed: {source}")]
    Delivery {
        channel: &'static str,
        #[source]
        source: std::io::Error,
    },
}
