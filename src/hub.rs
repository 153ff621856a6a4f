//! Platform keys and the lookup that turns one into a ready adapter.

use std::fmt;
use std::str::FromStr;

use crate::apis::arxiv::ArxivClient;
use crate::apis::jstor::JstorClient;
use crate::apis::pmc::PmcClient;
use crate::apis::scopus::ScopusClient;
use crate::apis::semantic_scholar::SemanticScholarClient;
use crate::apis::shodhganga::ShodhgangaClient;
use crate::apis::zenodo::ZenodoClient;
use crate::apis::{PaperSource, SourceError};
use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Arxiv,
    Jstor,
    Pmc,
    Scopus,
    SemanticScholar,
    Shodhganga,
    Zenodo,
}

impl Platform {
    pub const ALL: [Platform; 7] = [
        Platform::Arxiv,
        Platform::Jstor,
        Platform::Pmc,
        Platform::Scopus,
        Platform::SemanticScholar,
        Platform::Shodhganga,
        Platform::Zenodo,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Platform::Arxiv => "arxiv",
            Platform::Jstor => "jstor",
            Platform::Pmc => "pmc",
            Platform::Scopus => "scopus",
            Platform::SemanticScholar => "semantic_scholar",
            Platform::Shodhganga => "shodhganga",
            Platform::Zenodo => "zenodo",
        }
    }

    pub fn keys() -> Vec<String> {
        Self::ALL.iter().map(|p| p.key().to_string()).collect()
    }

    /// Build a fresh adapter for this platform.
    pub fn searcher(self, config: &Config) -> Result<Box<dyn PaperSource>, SourceError> {
        Ok(match self {
            Platform::Arxiv => Box::new(ArxivClient::new(config)?),
            Platform::Jstor => Box::new(JstorClient::new(config)),
            Platform::Pmc => Box::new(PmcClient::new(config)?),
            Platform::Scopus => Box::new(ScopusClient::new(config)?),
            Platform::SemanticScholar => Box::new(SemanticScholarClient::new(config)?),
            Platform::Shodhganga => Box::new(ShodhgangaClient::new(config)?),
            Platform::Zenodo => Box::new(ZenodoClient::new(config)?),
        })
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Platform {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.key() == wanted)
            .ok_or_else(|| SourceError::UnknownPlatform {
                name: wanted,
                available: Self::keys(),
            })
    }
}

/// Look up `platform_name` (case-insensitive) and construct its adapter.
pub fn get_searcher(platform_name: &str, config: &Config) -> Result<Box<dyn PaperSource>, SourceError> {
    let platform: Platform = platform_name.parse()?;
    tracing::debug!("hub: instantiating {}", platform);
    platform.searcher(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!("ArXiv".parse::<Platform>().unwrap(), Platform::Arxiv);
        assert_eq!(" SEMANTIC_SCHOLAR ".parse::<Platform>().unwrap(), Platform::SemanticScholar);
    }

    #[test]
    fn test_every_key_round_trips() {
        for platform in Platform::ALL {
            assert_eq!(platform.key().parse::<Platform>().unwrap(), platform);
        }
    }

    #[test]
    fn test_unknown_platform_lists_keys() {
        let err = get_searcher("nonexistent_platform", &Config::default()).err().unwrap();
        let message = err.to_string();
        assert!(message.starts_with("Unknown platform: nonexistent_platform."));
        for key in Platform::keys() {
            assert!(message.contains(&key));
        }
    }

    #[test]
    fn test_instantiates_adapters() {
        let config = Config::default();
        for key in ["arxiv", "pmc", "zenodo", "semantic_scholar", "shodhganga", "JSTOR"] {
            let searcher = get_searcher(key, &config).unwrap();
            assert_eq!(searcher.name(), key.to_lowercase());
        }
    }

    #[test]
    fn test_scopus_needs_key() {
        let err = get_searcher("scopus", &Config::default()).err().unwrap();
        assert!(matches!(err, SourceError::MissingKey(_)));

        let config = Config {
            scopus_api_key: Some("k".into()),
            ..Config::default()
        };
        assert_eq!(get_searcher("scopus", &config).unwrap().name(), "scopus");
    }
}
