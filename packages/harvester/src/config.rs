//! Configuration constants, defaults and validation for the harvester.

use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use url::Url;

use crate::error::{HarvesterError, Result};

/// Host serving the California legislative information archive.
pub const LEGINFO_BASE_URL: &str = "https://leginfo.legislature.ca.gov";

/// Path of the per-session bill listing page.
pub const LISTING_PATH: &str = "/faces/billSearchClient.xhtml";

/// Fixed listing filters appended after `session_year`.
pub const LISTING_FILTERS: &str = "house=Both&author=All&lawCode=All";

/// Query parameter that carries the bill identifier in detail links.
pub const BILL_ID_PARAM: &str = "bill_id=";

/// Extension of stored bill documents.
pub const DOCUMENT_EXTENSION: &str = "txt";

/// First year of the oldest session harvested by default.
pub const DEFAULT_MIN_YEAR: u32 = 1999;

/// Upper bound of the default year range.
///
/// The last session starts at `max_year - 2`, so 2022 yields 20202021.
pub const DEFAULT_MAX_YEAR: u32 = 2022;

/// Maximum number of requests in flight across all sessions.
pub const DEFAULT_WORKERS: usize = 10;

/// HTTP timeout in seconds.
pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// Retries after the first attempt for transient failures.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (milliseconds).
pub const RETRY_BASE_DELAY_MS: u64 = 500;

/// Politeness delay bounds after each bill page (milliseconds).
pub const DEFAULT_DELAY_MIN_MS: u64 = 1_000;
pub const DEFAULT_DELAY_MAX_MS: u64 = 3_000;

/// Default storage root, relative to the working directory.
pub const DEFAULT_DATA_DIR: &str = "data/raw";

/// Session id: two four-digit years.
#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static SESSION_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})(\d{4})$").expect("valid regex"));

/// Bill ids end up as file names, so only a conservative alphabet is accepted.
#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static BILL_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-][A-Za-z0-9._-]*$").expect("valid regex"));

/// Validate a session identifier such as `20192020`.
///
/// # Examples
/// ```
/// use leginfo_harvester::config::validate_session_id;
///
/// assert!(validate_session_id("20192020").is_ok());
/// assert!(validate_session_id("20192021").is_err());
/// assert!(validate_session_id("2019").is_err());
/// ```
pub fn validate_session_id(session_id: &str) -> Result<()> {
    let invalid = || HarvesterError::InvalidSessionId(session_id.to_string());
    let caps = SESSION_ID_PATTERN.captures(session_id).ok_or_else(invalid)?;

    let first: u32 = caps[1].parse().map_err(|_| invalid())?;
    let second: u32 = caps[2].parse().map_err(|_| invalid())?;
    if second == first + 1 {
        Ok(())
    } else {
        Err(invalid())
    }
}

/// Check whether a bill id can be used as a file name.
///
/// # Examples
/// ```
/// use leginfo_harvester::config::is_valid_bill_id;
///
/// assert!(is_valid_bill_id("201920200AB1"));
/// assert!(is_valid_bill_id("AB-1"));
/// assert!(!is_valid_bill_id("../etc"));
/// assert!(!is_valid_bill_id(""));
/// ```
#[must_use]
pub fn is_valid_bill_id(bill_id: &str) -> bool {
    BILL_ID_PATTERN.is_match(bill_id)
}

/// Build the listing URL for a session.
///
/// # Examples
/// ```
/// use leginfo_harvester::config::listing_url;
///
/// assert_eq!(
///     listing_url("https://leginfo.legislature.ca.gov", "20192020"),
///     "https://leginfo.legislature.ca.gov/faces/billSearchClient.xhtml?session_year=20192020&house=Both&author=All&lawCode=All"
/// );
/// ```
pub fn listing_url(base_url: &str, session_id: &str) -> String {
    debug_assert!(
        SESSION_ID_PATTERN.is_match(session_id),
        "session_id should be validated before calling listing_url"
    );
    let base = base_url.trim_end_matches('/');
    format!("{base}{LISTING_PATH}?session_year={session_id}&{LISTING_FILTERS}")
}

/// Resolve a listing href against the base URL.
///
/// Absolute hrefs are kept; relative ones are joined onto the base.
pub fn resolve_href(base_url: &str, href: &str) -> Result<String> {
    let base = Url::parse(base_url).map_err(|e| {
        HarvesterError::Config(format!("base URL '{base_url}' does not parse: {e}"))
    })?;
    let joined = base
        .join(href)
        .map_err(|e| HarvesterError::PermanentFetch {
            url: href.to_string(),
            status: None,
            message: format!("malformed link: {e}"),
        })?;
    Ok(joined.to_string())
}

/// Runtime configuration for a harvest run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestConfig {
    pub min_year: u32,
    pub max_year: u32,
    pub workers: usize,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub delay_min: Duration,
    pub delay_max: Duration,
    pub data_dir: PathBuf,
    pub base_url: String,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            min_year: DEFAULT_MIN_YEAR,
            max_year: DEFAULT_MAX_YEAR,
            workers: DEFAULT_WORKERS,
            timeout: Duration::from_secs(HTTP_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
            delay_min: Duration::from_millis(DEFAULT_DELAY_MIN_MS),
            delay_max: Duration::from_millis(DEFAULT_DELAY_MAX_MS),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            base_url: LEGINFO_BASE_URL.to_string(),
        }
    }
}

impl HarvestConfig {
    /// Defaults overridden by `LEGINFO_*` environment variables.
    ///
    /// Values that fail to parse keep their default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.parse::<u64>().ok());

        Self {
            min_year: lookup("LEGINFO_MIN_YEAR")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.min_year),
            max_year: lookup("LEGINFO_MAX_YEAR")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_year),
            workers: lookup("LEGINFO_WORKERS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.workers),
            timeout: parsed("LEGINFO_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_retries: lookup("LEGINFO_MAX_RETRIES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_retries),
            retry_base_delay: defaults.retry_base_delay,
            delay_min: parsed("LEGINFO_DELAY_MIN_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.delay_min),
            delay_max: parsed("LEGINFO_DELAY_MAX_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.delay_max),
            data_dir: lookup("LEGINFO_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            base_url: lookup("LEGINFO_BASE_URL").unwrap_or(defaults.base_url),
        }
    }

    pub fn with_years(mut self, min_year: u32, max_year: u32) -> Self {
        self.min_year = min_year;
        self.max_year = max_year;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay = base_delay;
        self
    }

    pub fn with_delay(mut self, min: Duration, max: Duration) -> Self {
        self.delay_min = min;
        self.delay_max = max;
        self
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Reject settings the harvester cannot run with.
    ///
    /// An empty year range is not an error; it yields no sessions.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(HarvesterError::Config("workers must be at least 1".into()));
        }
        if self.timeout.is_zero() {
            return Err(HarvesterError::Config("timeout must be non-zero".into()));
        }
        if self.delay_min > self.delay_max {
            return Err(HarvesterError::Config(format!(
                "politeness delay minimum ({:?}) exceeds maximum ({:?})",
                self.delay_min, self.delay_max
            )));
        }
        Url::parse(&self.base_url).map_err(|e| {
            HarvesterError::Config(format!("base URL '{}' does not parse: {e}", self.base_url))
        })?;
        Ok(())
    }
}
