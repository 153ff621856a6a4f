use std::path::PathBuf;
use std::time::Duration;

/// Inclusive range a randomized politeness delay is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    pub min: Duration,
    pub max: Duration,
}

impl DelayRange {
    pub const ZERO: DelayRange = DelayRange {
        min: Duration::ZERO,
        max: Duration::ZERO,
    };

    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max: max.max(min) }
    }
}

/// Adapter configuration, built once by the caller and handed to the hub.
///
/// Adapters copy what they need at construction time and never consult the
/// process environment afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    pub download_dir: PathBuf,
    pub request_timeout: Duration,
    pub ncbi_api_key: Option<String>,
    pub scopus_api_key: Option<String>,
    pub semantic_scholar_api_key: Option<String>,
    pub zenodo_base_url: String,
    pub zenodo_access_token: Option<String>,
    /// Run the browser without a window. A challenge page aborts the search in this mode.
    pub headless: bool,
    pub chrome_executable: Option<PathBuf>,
    pub scrape_delay: DelayRange,
    pub browser_settle: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("./downloads"),
            request_timeout: Duration::from_secs(30),
            ncbi_api_key: None,
            scopus_api_key: None,
            semantic_scholar_api_key: None,
            zenodo_base_url: "https://zenodo.org".to_string(),
            zenodo_access_token: None,
            headless: true,
            chrome_executable: None,
            scrape_delay: DelayRange::new(Duration::from_secs(1), Duration::from_secs(3)),
            browser_settle: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let request_timeout = var("PAPER_SEARCH_TIMEOUT_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout);

        let headless = var("PAPER_SEARCH_HEADLESS")
            .map(|v| !matches!(v.to_lowercase().as_str(), "0" | "false" | "no" | "off"))
            .unwrap_or(defaults.headless);

        Self {
            download_dir: var("PAPER_SEARCH_DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.download_dir),
            request_timeout,
            ncbi_api_key: var("NCBI_API_KEY"),
            scopus_api_key: var("SCOPUS_API_KEY"),
            semantic_scholar_api_key: var("SEMANTIC_SCHOLAR_API_KEY"),
            zenodo_base_url: var("ZENODO_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.zenodo_base_url),
            zenodo_access_token: var("ZENODO_ACCESS_TOKEN"),
            headless,
            chrome_executable: var("PAPER_SEARCH_CHROME_PATH").map(PathBuf::from),
            scrape_delay: defaults.scrape_delay,
            browser_settle: defaults.browser_settle,
        }
    }

    /// Configuration with every delay removed, for exercising adapters against local fixtures.
    pub fn without_delays(mut self) -> Self {
        self.scrape_delay = DelayRange::ZERO;
        self.browser_settle = Duration::ZERO;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_map(pairs: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults_when_env_empty() {
        let cfg = from_map(&[]);
        assert_eq!(cfg.download_dir, PathBuf::from("./downloads"));
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
        assert!(cfg.headless);
        assert!(cfg.scopus_api_key.is_none());
        assert_eq!(cfg.zenodo_base_url, "https://zenodo.org");
    }

    #[test]
    fn test_blank_values_are_unset() {
        let cfg = from_map(&[("SCOPUS_API_KEY", "   "), ("ZENODO_ACCESS_TOKEN", "")]);
        assert!(cfg.scopus_api_key.is_none());
        assert!(cfg.zenodo_access_token.is_none());
    }

    #[test]
    fn test_overrides() {
        let cfg = from_map(&[
            ("SCOPUS_API_KEY", "abc"),
            ("PAPER_SEARCH_TIMEOUT_SECS", "5"),
            ("PAPER_SEARCH_HEADLESS", "false"),
            ("ZENODO_BASE_URL", "https://sandbox.zenodo.org/"),
        ]);
        assert_eq!(cfg.scopus_api_key.as_deref(), Some("abc"));
        assert_eq!(cfg.request_timeout, Duration::from_secs(5));
        assert!(!cfg.headless);
        assert_eq!(cfg.zenodo_base_url, "https://sandbox.zenodo.org");
    }

    #[test]
    fn test_without_delays() {
        let cfg = Config::default().without_delays();
        assert_eq!(cfg.scrape_delay, DelayRange::ZERO);
        assert_eq!(cfg.browser_settle, Duration::ZERO);
    }
}
