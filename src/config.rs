use anyhow::{Context, Result, anyhow, bail};
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub path: PathBuf,
    pub config: AppConfig,
}

impl LoadedConfig {
    /// Resolves a config-relative path against the directory holding the config file.
    pub fn resolve(&self, maybe_relative: &Path) -> Result<PathBuf> {
        resolve_path(&self.path, maybe_relative)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub site: SiteConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub politeness: PolitenessConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.site.base_url)
            .with_context(|| format!("site.base_url is not a valid url: {}", self.site.base_url))?;
        if self.site.listing_url.trim().is_empty() {
            bail!("site.listing_url must not be empty");
        }
        self.site.timezone()?;

        if self.fetch.timeout_secs == 0 {
            bail!("fetch.timeout_secs must be greater than 0");
        }
        if self.fetch.mode == FetchMode::File && self.fetch.files.is_empty() {
            bail!("fetch.files must map at least the listing url in file mode");
        }

        if self.politeness.concurrency == 0 {
            bail!("politeness.concurrency must be greater than 0");
        }

        for channel in &self.notify.channels {
            if !matches!(channel.as_str(), "mail" | "sms") {
                bail!("notify.channels contains unknown channel {channel:?}");
            }
        }

        Ok(())
    }

    /// Absolute form of the listing url, joined onto `site.base_url` when relative.
    pub fn listing_url(&self) -> Result<String> {
        absolutize(&self.site.base_url, &self.site.listing_url)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    pub base_url: String,
    #[serde(default = "default_listing_url")]
    pub listing_url: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl SiteConfig {
    pub fn timezone(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|err| anyhow!("site.timezone {:?} is not a known zone: {err}", self.timezone))
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    #[default]
    Http,
    File,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    #[serde(default)]
    pub mode: FetchMode,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_headers")]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u8,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Absolute url -> local file, used by the `file` mode.
    #[serde(default)]
    pub files: BTreeMap<String, PathBuf>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            mode: FetchMode::Http,
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
            headers: default_headers(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            files: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolitenessConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_run_deadline_secs")]
    pub run_deadline_secs: u64,
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            min_delay_ms: default_min_delay_ms(),
            run_deadline_secs: default_run_deadline_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_channels")]
    pub channels: Vec<String>,
    #[serde(default = "default_outbox_dir")]
    pub outbox_dir: PathBuf,
    #[serde(default)]
    pub recipients: Vec<Recipient>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channels: default_channels(),
            outbox_dir: default_outbox_dir(),
            recipients: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Recipient {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

pub fn load_config(config_path: &Path) -> Result<LoadedConfig> {
    let text = std::fs::read_to_string(config_path)
        .with_context(|| format!("failed to read config: {}", config_path.display()))?;
    let config: AppConfig = toml::from_str(&text)
        .with_context(|| format!("failed to parse toml in {}", config_path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid config {}", config_path.display()))?;
    Ok(LoadedConfig {
        path: config_path.to_path_buf(),
        config,
    })
}

pub fn resolve_path(base_config_path: &Path, maybe_relative: &Path) -> Result<PathBuf> {
    if maybe_relative.is_absolute() {
        return Ok(maybe_relative.to_path_buf());
    }

    let parent = base_config_path.parent().ok_or_else(|| {
        anyhow!(
            "config has no parent directory: {}",
            base_config_path.display()
        )
    })?;

    Ok(parent.join(maybe_relative))
}

pub fn absolutize(base_url: &str, value: &str) -> Result<String> {
    if value.starts_with("http://") || value.starts_with("https://") {
        return Ok(value.to_string());
    }
    let base = Url::parse(base_url).with_context(|| format!("invalid base url {base_url}"))?;
    let joined = base
        .join(value)
        .with_context(|| format!("cannot join {value} onto {base_url}"))?;
    Ok(joined.to_string())
}

fn default_true() -> bool {
    true
}

fn default_listing_url() -> String {
    "/tickets?field_arsenal_team_target_id=1".to_string()
}

fn default_timezone() -> String {
    "Europe/London".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36".to_string()
}

fn default_headers() -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "Accept".to_string(),
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
        ),
        ("Accept-Language".to_string(), "en-GB,en;q=0.9".to_string()),
    ])
}

fn default_retry_attempts() -> u8 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_concurrency() -> usize {
    2
}

fn default_min_delay_ms() -> u64 {
    750
}

fn default_run_deadline_secs() -> u64 {
    300
}

fn default_state_path() -> PathBuf {
    PathBuf::from("data/state/awaywatch.json")
}

fn default_outbox_dir() -> PathBuf {
    PathBuf::from("data/outbox")
}

fn default_channels() -> Vec<String> {
    vec!["mail".to_string(), "sms".to_string()]
}
