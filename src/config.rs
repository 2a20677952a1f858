use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Bytes between two validation passes while a URL is downloading.
pub const DEFAULT_CHECK_INTERVAL: u64 = 32 * 1024;
pub const DEFAULT_MAX_SIZE: u64 = 8 * 1024 * 1024;
pub const DEFAULT_MAX_DIM: u32 = 7500;
pub const DEFAULT_MAX_REDIRECTS: u32 = 5;
pub const DEFAULT_NUMRES: u32 = 16;
pub const NO_CACHE_CONTROL: &str = "no-store";

/// One searchable database of the matching engine.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ServiceConfig {
    /// Database id as the matcher knows it.
    pub id: u32,
    pub name: String,
}

/// Ceilings applied to a single URL transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchLimits {
    pub check_interval: u64,
    pub max_size: u64, // bytes
    pub max_dim: u32,  // pixels, applies to width and height
    pub max_redirects: u32,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self {
            check_interval: DEFAULT_CHECK_INTERVAL,
            max_size: DEFAULT_MAX_SIZE,
            max_dim: DEFAULT_MAX_DIM,
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }
}

/// HTTP client settings for the URL fetcher.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub limits: FetchLimits,
    pub connect_timeout: Duration,
    /// A transfer with no bytes for this long fails as a network error.
    pub idle_timeout: Duration,
    pub user_agent: String,
    /// Directory holding in-flight downloads.
    pub temp_dir: PathBuf,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            limits: FetchLimits::default(),
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(30),
            user_agent: concat!("imgquery/", env!("CARGO_PKG_VERSION")).to_string(),
            temp_dir: std::env::temp_dir(),
        }
    }
}

/// Token bucket applied per peer to the lookup routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub per_second: u64,
    pub burst_size: u32,
}

/// Everything the server needs. [`AppConfig::default`] is a working local
/// setup; [`AppConfig::from_env`] layers environment overrides on top.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub services: Vec<ServiceConfig>,
    pub thumb_dir: PathBuf,
    /// `host:port` of the matching daemon.
    pub matcher_addr: String,
    pub fetch: FetchConfig,
    pub max_upload_size: usize, // bytes
    pub numres: u32,
    /// Score (percent) a match needs to count as relevant.
    pub min_similarity: f64,
    pub rate_limit: Option<RateLimit>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            services: vec![ServiceConfig { id: 0, name: "default".into() }],
            thumb_dir: PathBuf::from("./thumbs"),
            matcher_addr: "127.0.0.1:5566".into(),
            fetch: FetchConfig::default(),
            max_upload_size: DEFAULT_MAX_SIZE as usize,
            numres: DEFAULT_NUMRES,
            min_similarity: 80.0,
            rate_limit: Some(RateLimit { per_second: 10, burst_size: 30 }),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("At least one service must be configured")] NoServices,
    #[error("Duplicate service id {0}")] DuplicateService(u32),
    #[error("Invalid service entry '{0}', expected <id>:<name>")] InvalidService(String),
    #[error("Check interval must be > 0")] InvalidCheckInterval,
    #[error("Max size must be > 0")] InvalidMaxSize,
    #[error("Max dimension must be > 0")] InvalidMaxDim,
    #[error("Max upload size must be > 0")] InvalidMaxUpload,
    #[error("Invalid value for {0}: {1}")] InvalidValue(&'static str, String),
}

impl AppConfig {
    /// Defaults overridden by `IMGQUERY_*` environment variables.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `IMGQUERY_SERVICES` | `services`, as `<id>:<name>,...` |
    /// | `IMGQUERY_THUMB_DIR` | `thumb_dir` |
    /// | `IMGQUERY_TEMP_DIR` | `fetch.temp_dir` |
    /// | `IMGQUERY_MATCHER` | `matcher_addr` |
    /// | `IMGQUERY_MAX_SIZE` | `fetch.limits.max_size` (bytes) |
    /// | `IMGQUERY_MAX_DIM` | `fetch.limits.max_dim` (pixels) |
    /// | `IMGQUERY_MAX_REDIRECTS` | `fetch.limits.max_redirects` |
    /// | `IMGQUERY_CHECK_INTERVAL` | `fetch.limits.check_interval` (bytes) |
    /// | `IMGQUERY_IDLE_TIMEOUT` | `fetch.idle_timeout` (seconds) |
    /// | `IMGQUERY_MAX_UPLOAD` | `max_upload_size` (bytes) |
    /// | `IMGQUERY_NUMRES` | `numres` |
    /// | `IMGQUERY_MIN_SIMILARITY` | `min_similarity` (percent) |
    /// | `DISABLE_RATE_LIMIT` | clears `rate_limit` when set |
    ///
    /// Values are not validated here; call [`AppConfig::validate`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("IMGQUERY_SERVICES") { cfg.services = parse_services(&v)?; }
        if let Ok(v) = std::env::var("IMGQUERY_THUMB_DIR") { cfg.thumb_dir = PathBuf::from(v); }
        if let Ok(v) = std::env::var("IMGQUERY_TEMP_DIR") { cfg.fetch.temp_dir = PathBuf::from(v); }
        if let Ok(v) = std::env::var("IMGQUERY_MATCHER") { cfg.matcher_addr = v; }
        if let Ok(v) = std::env::var("IMGQUERY_MAX_SIZE") { cfg.fetch.limits.max_size = parse_num("IMGQUERY_MAX_SIZE", &v)?; }
        if let Ok(v) = std::env::var("IMGQUERY_MAX_DIM") { cfg.fetch.limits.max_dim = parse_num("IMGQUERY_MAX_DIM", &v)?; }
        if let Ok(v) = std::env::var("IMGQUERY_MAX_REDIRECTS") { cfg.fetch.limits.max_redirects = parse_num("IMGQUERY_MAX_REDIRECTS", &v)?; }
        if let Ok(v) = std::env::var("IMGQUERY_CHECK_INTERVAL") { cfg.fetch.limits.check_interval = parse_num("IMGQUERY_CHECK_INTERVAL", &v)?; }
        if let Ok(v) = std::env::var("IMGQUERY_IDLE_TIMEOUT") { cfg.fetch.idle_timeout = Duration::from_secs(parse_num("IMGQUERY_IDLE_TIMEOUT", &v)?); }
        if let Ok(v) = std::env::var("IMGQUERY_MAX_UPLOAD") { cfg.max_upload_size = parse_num("IMGQUERY_MAX_UPLOAD", &v)?; }
        if let Ok(v) = std::env::var("IMGQUERY_NUMRES") { cfg.numres = parse_num("IMGQUERY_NUMRES", &v)?; }
        if let Ok(v) = std::env::var("IMGQUERY_MIN_SIMILARITY") { cfg.min_similarity = parse_num("IMGQUERY_MIN_SIMILARITY", &v)?; }
        if std::env::var("DISABLE_RATE_LIMIT").is_ok() { cfg.rate_limit = None; }
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.services.is_empty() { return Err(ConfigError::NoServices); }
        for (i, s) in self.services.iter().enumerate() {
            if self.services[..i].iter().any(|o| o.id == s.id) {
                return Err(ConfigError::DuplicateService(s.id));
            }
        }
        let limits = &self.fetch.limits;
        if limits.check_interval == 0 { return Err(ConfigError::InvalidCheckInterval); }
        if limits.max_size == 0 { return Err(ConfigError::InvalidMaxSize); }
        if limits.max_dim == 0 { return Err(ConfigError::InvalidMaxDim); }
        if self.max_upload_size == 0 { return Err(ConfigError::InvalidMaxUpload); }
        Ok(())
    }

    /// Resolve a request selector (numeric id or service name).
    pub fn service(&self, selector: &str) -> Option<&ServiceConfig> {
        let selector = selector.trim();
        match selector.parse::<u32>() {
            Ok(id) => self.services.iter().find(|s| s.id == id),
            Err(_) => self.services.iter().find(|s| s.name.eq_ignore_ascii_case(selector)),
        }
    }
}

/// Parse `0:danbooru,1:konachan`.
pub fn parse_services(list: &str) -> Result<Vec<ServiceConfig>, ConfigError> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (id, name) = entry
                .split_once(':')
                .ok_or_else(|| ConfigError::InvalidService(entry.to_string()))?;
            let id = id.trim().parse::<u32>().map_err(|_| ConfigError::InvalidService(entry.to_string()))?;
            let name = name.trim();
            if name.is_empty() { return Err(ConfigError::InvalidService(entry.to_string())); }
            Ok(ServiceConfig { id, name: name.to_string() })
        })
        .collect()
}

fn parse_num<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue(key, value.to_string()))
}
