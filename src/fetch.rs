use crate::config::{FetchConfig, FetchMode, LoadedConfig};
use crate::error::FetchError;
use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Anything that can hand back the markup behind an absolute url.
///
/// Implementations never retry; the pipeline decides whether a failure is
/// worth another attempt.
pub trait PageSource: Send + Sync {
    fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

pub fn page_source_from_config(loaded: &LoadedConfig) -> Result<Box<dyn PageSource>> {
    match loaded.config.fetch.mode {
        FetchMode::Http => Ok(Box::new(HttpFetcher::new(&loaded.config.fetch)?)),
        FetchMode::File => {
            let mut files = BTreeMap::new();
            for (url, path) in &loaded.config.fetch.files {
                files.insert(url.clone(), loaded.resolve(path)?);
            }
            Ok(Box::new(FileFetcher::new(files)))
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (k, v) in &config.headers {
            let name = HeaderName::from_bytes(k.as_bytes())
                .with_context(|| format!("invalid header name {k}"))?;
            let value =
                HeaderValue::from_str(v).with_context(|| format!("invalid header value for {k}"))?;
            headers.insert(name, value);
        }
        headers.insert(USER_AGENT, HeaderValue::from_str(&config.user_agent)?);

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self { client })
    }
}

impl PageSource for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let resp = self
            .client
            .get(url)
            .send()
            .map_err(|err| classify(url, err))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = resp.text().map_err(|err| classify(url, err))?;
        debug!(%url, bytes = body.len(), "fetched page");
        Ok(body)
    }
}

fn classify(url: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Connection {
            url: url.to_string(),
            source: err,
        }
    }
}

/// Serves pages from disk, keyed by the absolute url they stand in for.
#[derive(Debug, Clone, Default)]
pub struct FileFetcher {
    files: BTreeMap<String, PathBuf>,
}

impl FileFetcher {
    pub fn new(files: BTreeMap<String, PathBuf>) -> Self {
        Self { files }
    }
}

impl PageSource for FileFetcher {
    fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let path = self.files.get(url).ok_or_else(|| FetchError::Unmapped {
            url: url.to_string(),
        })?;
        let body = std::fs::read_to_string(path).map_err(|source| FetchError::Io {
            url: url.to_string(),
            path: path.clone(),
            source,
        })?;
        debug!(%url, file = %path.display(), bytes = body.len(), "loaded local page");
        Ok(body)
    }
}
