use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use super::{PaperSource, SearchFilters, SourceError};
use crate::browser::chromium::ChromiumLauncher;
use crate::browser::{BrowserLauncher, BrowserSession};
use crate::config::Config;
use crate::normalize::{absolute_url, derive_id, split_authors};
use crate::paper::Paper;

const SEARCH_URL: &str = "https://www.jstor.org/action/doBasicSearch";
const SITE_URL: &str = "https://www.jstor.org";
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/115.0.0 Safari/537.36";

const PAGE_LOAD_TIMEOUT: Duration = Duration::from_secs(60);
const CAPTCHA_TIMEOUT: Duration = Duration::from_secs(10);
const LAYOUT_TIMEOUT: Duration = Duration::from_secs(60);
const CONTENT_TIMEOUT: Duration = Duration::from_secs(30);

const CAPTCHA: &str = "#px-captcha";
const RESULTS_LAYOUT: &str = ".search-results-layout";
const RESULTS_CONTENT: &str = ".search-results-layout__content";
const TITLES: &str = r#"[data-qa^="search-result-title-heading"]"#;
const AUTHORS: &str = r#"search-results-vue-pharos-link[data-qa*="search-result-authors-link"]"#;
const VENUES: &str = "span.metadata";
const STABLE_LINKS: &str = r#"[data-qa*="read-online"][href*="/stable/"]"#;

/// JSTOR basic search, driven through a real browser because results render client-side.
pub struct JstorClient {
    launcher: Box<dyn BrowserLauncher>,
    headless: bool,
    settle: Duration,
}

/// Parallel per-field lists pulled from one results page.
#[derive(Debug, Default)]
struct RawResults {
    titles: Vec<String>,
    authors: Vec<String>,
    venues: Vec<String>,
    links: Vec<Option<String>>,
}

impl JstorClient {
    pub fn new(config: &Config) -> Self {
        Self::with_launcher(config, Box::new(ChromiumLauncher::new(config)))
    }

    pub fn with_launcher(config: &Config, launcher: Box<dyn BrowserLauncher>) -> Self {
        Self {
            launcher,
            headless: config.headless,
            settle: config.browser_settle,
        }
    }

    /// Everything between opening and closing the session.
    async fn run_search(
        &self,
        session: &mut dyn BrowserSession,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<Paper>, SourceError> {
        let url = format!("{}?Query={}", SEARCH_URL, urlencoding::encode(query));
        tracing::info!("jstor: searching {:?}", query);
        session.goto(&url, PAGE_LOAD_TIMEOUT).await?;

        if session.wait_for_selector(CAPTCHA, CAPTCHA_TIMEOUT).await? {
            if self.headless {
                tracing::warn!("jstor: challenge page detected in headless mode, returning no results");
                return Ok(Vec::new());
            }
            tracing::info!("jstor: challenge page detected, waiting for it to be solved in the browser window");
        } else {
            tracing::debug!("jstor: no challenge page");
        }

        if !session.wait_for_selector(RESULTS_LAYOUT, LAYOUT_TIMEOUT).await? {
            tracing::warn!("jstor: timed out waiting for {}", RESULTS_LAYOUT);
        }
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }
        if !session.wait_for_selector(RESULTS_CONTENT, CONTENT_TIMEOUT).await? {
            tracing::warn!("jstor: timed out waiting for {}", RESULTS_CONTENT);
        }

        let raw = RawResults {
            titles: session.inner_texts(TITLES).await?,
            authors: session.inner_texts(AUTHORS).await?,
            venues: session.inner_texts(VENUES).await?,
            links: session.attribute_values(STABLE_LINKS, "href").await?,
        };
        tracing::debug!(
            "jstor: {} titles, {} authors, {} venues, {} links",
            raw.titles.len(),
            raw.authors.len(),
            raw.venues.len(),
            raw.links.len()
        );
        Ok(raw.into_papers(max_results as usize))
    }
}

impl RawResults {
    fn into_papers(self, max_results: usize) -> Vec<Paper> {
        let count = self.titles.len().min(max_results);
        (0..count)
            .filter_map(|i| {
                let title = self.titles.get(i).map(|t| t.trim()).unwrap_or_default();
                let url = self
                    .links
                    .get(i)
                    .and_then(|l| l.as_deref())
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(|href| absolute_url(SITE_URL, href))
                    .unwrap_or_default();
                if title.is_empty() && url.is_empty() {
                    return None;
                }
                let authors = self.authors.get(i).map(|a| split_authors(a)).unwrap_or_default();
                let venue = self
                    .venues
                    .get(i)
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty());
                let paper_id = stable_id(&url).unwrap_or_else(|| derive_id(&url, title));

                Paper::builder("jstor", paper_id)
                    .title(title)
                    .authors(authors)
                    .url(url)
                    .extra("journal", venue)
                    .build()
            })
            .collect()
    }
}

/// Path after `/stable/`, without query or fragment.
fn stable_id(url: &str) -> Option<String> {
    let tail = url.split("/stable/").nth(1)?;
    let id = tail.split(['?', '#']).next().unwrap_or_default().trim_end_matches('/');
    (!id.is_empty()).then(|| id.to_string())
}

#[async_trait]
impl PaperSource for JstorClient {
    fn name(&self) -> &str {
        "jstor"
    }

    async fn search(&self, query: &str, max_results: u32, _filters: &SearchFilters) -> Result<Vec<Paper>, SourceError> {
        let mut session = match self.launcher.open(USER_AGENT).await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("jstor: could not start browser: {}", e);
                return Ok(Vec::new());
            }
        };
        let outcome = self.run_search(session.as_mut(), query, max_results).await;
        session.close().await;

        match outcome {
            Ok(papers) => {
                tracing::info!("jstor: {} results for {:?}", papers.len(), query);
                Ok(papers)
            }
            Err(e) => {
                tracing::warn!("jstor: search failed: {}", e);
                Ok(Vec::new())
            }
        }
    }

    async fn download_pdf(&self, _paper_id: &str, _save_path: &Path) -> Result<PathBuf, SourceError> {
        Err(SourceError::unsupported(
            "jstor",
            "JSTOR requires institutional access for PDF downloads. \
             Please use the paper URL to access the article through your institution.",
        ))
    }

    async fn read_paper(&self, _paper_id: &str, _save_path: &Path) -> Result<String, SourceError> {
        Ok("JSTOR requires institutional access for full-text reading. \
            Please use the paper URL to access the article through your institution."
            .to_string())
    }
}
