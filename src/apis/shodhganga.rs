use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use scraper::{ElementRef, Html, Selector};

use super::{PaperSource, SearchFilters, SourceError};
use crate::config::{Config, DelayRange};
use crate::http;
use crate::normalize::{absolute_url, clean_text, derive_id, extract_year, split_authors, year_start};
use crate::paper::{Paper, UNKNOWN_AUTHOR};

const BASE_URL: &str = "https://shodhganga.inflibnet.ac.in";
/// Shodhganga serves at most this many results per page.
const MAX_RPP: u32 = 20;

/// Indian theses from Shodhganga, scraped from the DSpace simple-search pages.
pub struct ShodhgangaClient {
    client: reqwest::Client,
    base_url: String,
    delay: DelayRange,
    selectors: Selectors,
}

struct Selectors {
    block: Selector,
    title_link: Selector,
    authors: Selector,
    author_fallback: Selector,
    abstract_text: Selector,
    date: Selector,
    next_page: Selector,
    any_link: Selector,
}

impl Selectors {
    fn new() -> Result<Self, SourceError> {
        Ok(Self {
            block: selector("div.ds-artifact-item, div.artifact-description, li.ds-artifact-item")?,
            title_link: selector("h4.discovery-result-title a")?,
            authors: selector(r#"div.authors span[title="author"], meta[name="DC.creator"]"#)?,
            author_fallback: selector(r#"div[class*="author"]"#)?,
            abstract_text: selector("div.abstract-full, div.item-abstract")?,
            date: selector(r#"div.dateinfo, span.date, meta[name="DC.date.issued"]"#)?,
            next_page: selector(r#"a.next-page, a[title="next"]"#)?,
            any_link: selector("a")?,
        })
    }
}

fn selector(css: &str) -> Result<Selector, SourceError> {
    Selector::parse(css).map_err(|e| SourceError::Parse(format!("{:?}", e)))
}

/// What one results page yielded.
struct ResultsPage {
    blocks: usize,
    papers: Vec<Paper>,
    has_next: bool,
}

impl ShodhgangaClient {
    pub fn new(config: &Config) -> Result<Self, SourceError> {
        Self::with_base_url(config, BASE_URL)
    }

    pub fn with_base_url(config: &Config, base_url: &str) -> Result<Self, SourceError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
        Ok(Self {
            client: http::build_client(http::random_user_agent(), config.request_timeout, headers)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            delay: config.scrape_delay,
            selectors: Selectors::new()?,
        })
    }

    async fn fetch_page(&self, query: &str, rpp: u32, start: u32) -> Result<String, SourceError> {
        let resp = self
            .client
            .get(format!("{}/simple-search", self.base_url))
            .query(&[
                ("query", query),
                ("rpp", &rpp.to_string()),
                ("sort_by", "score"),
                ("order", "desc"),
                ("start", &start.to_string()),
            ])
            .send()
            .await?;
        Ok(http::ensure_success(resp)?.text().await?)
    }

    fn parse_page(&self, html: &str) -> ResultsPage {
        let document = Html::parse_document(html);
        let s = &self.selectors;

        let mut blocks = 0;
        let mut papers = Vec::new();
        for block in document.select(&s.block) {
            blocks += 1;
            match self.parse_block(block) {
                Some(paper) => papers.push(paper),
                None => tracing::warn!("shodhganga: skipped result block without title or link"),
            }
        }

        let has_next = document.select(&s.next_page).next().is_some()
            || document
                .select(&s.any_link)
                .any(|a| clean_text(&a.text().collect::<String>()) == "Next");

        ResultsPage {
            blocks,
            papers,
            has_next,
        }
    }

    fn parse_block(&self, block: ElementRef<'_>) -> Option<Paper> {
        let s = &self.selectors;

        let link = block.select(&s.title_link).next()?;
        let title = element_text(link);
        let href = link.value().attr("href").map(str::trim).filter(|h| !h.is_empty())?;
        if title.is_empty() {
            return None;
        }
        let url = absolute_url(&self.base_url, href);

        let mut authors: Vec<String> = block
            .select(&s.authors)
            .filter_map(|el| match el.value().name() {
                "meta" => el.value().attr("content").map(clean_text),
                _ => Some(element_text(el)),
            })
            .filter(|a| !a.is_empty())
            .collect();
        if authors.is_empty() {
            if let Some(div) = block.select(&s.author_fallback).next() {
                authors = split_authors(&div.text().collect::<String>());
            }
        }
        if authors.is_empty() {
            authors.push(UNKNOWN_AUTHOR.to_string());
        }

        let abstract_text = block.select(&s.abstract_text).next().map(element_text);

        let published = block
            .select(&s.date)
            .next()
            .map(|el| match el.value().name() {
                "meta" => el.value().attr("content").unwrap_or_default().to_string(),
                _ => el.text().collect::<String>(),
            })
            .and_then(|text| extract_year(&text))
            .and_then(year_start);

        let paper_id = format!("shodhganga_{}", derive_id(&url, &title));
        let mut builder = Paper::builder("shodhganga", paper_id)
            .title(title)
            .authors(authors)
            .url(url)
            .published_date(published);
        if let Some(text) = abstract_text {
            builder = builder.abstract_text(text);
        }
        builder.build()
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    clean_text(&el.text().collect::<String>())
}

#[async_trait]
impl PaperSource for ShodhgangaClient {
    fn name(&self) -> &str {
        "shodhganga"
    }

    async fn search(&self, query: &str, max_results: u32, _filters: &SearchFilters) -> Result<Vec<Paper>, SourceError> {
        let rpp = max_results.min(MAX_RPP);
        let wanted = max_results as usize;
        let mut papers: Vec<Paper> = Vec::new();
        let mut start = 0u32;

        while papers.len() < wanted {
            if start > 0 {
                http::polite_pause(self.delay).await;
            }
            tracing::debug!("shodhganga: query={:?} start={} rpp={}", query, start, rpp);
            let html = match self.fetch_page(query, rpp, start).await {
                Ok(html) => html,
                Err(e) => {
                    tracing::warn!("shodhganga: search stopped at start={}: {}", start, e);
                    break;
                }
            };
            // Html is not Send, so the document never lives across an await.
            let page = self.parse_page(&html);
            if page.blocks == 0 {
                tracing::debug!("shodhganga: no result blocks at start={}", start);
                break;
            }

            let found = page.papers.len();
            let room = wanted - papers.len();
            papers.extend(page.papers.into_iter().take(room));
            tracing::debug!("shodhganga: {} items on page, {} collected", found, papers.len());

            if found == 0 || !page.has_next {
                break;
            }
            start += rpp;
        }

        tracing::info!("shodhganga: {} results for {:?}", papers.len(), query);
        Ok(papers)
    }

    async fn download_pdf(&self, _paper_id: &str, _save_path: &Path) -> Result<PathBuf, SourceError> {
        Err(SourceError::unsupported(
            "shodhganga",
            "Shodhganga does not provide direct PDF downloads via this interface. \
             Please use the paper URL from the search results to navigate to the thesis page and find download options.",
        ))
    }

    async fn read_paper(&self, _paper_id: &str, _save_path: &Path) -> Result<String, SourceError> {
        Ok("Shodhganga papers cannot be read directly through this tool. \
            Please use the paper's URL to access the full text on the Shodhganga website."
            .to_string())
    }
}
