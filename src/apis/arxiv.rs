use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use reqwest::header::HeaderMap;

use super::{PaperSource, SearchFilters, SourceError};
use crate::config::Config;
use crate::http;
use crate::normalize::{clean_text, parse_date};
use crate::paper::Paper;

const API_URL: &str = "https://export.arxiv.org/api/query";
const PDF_URL: &str = "https://arxiv.org/pdf";
const PAGE_SIZE: u32 = 100;
/// arXiv asks API clients to wait three seconds between calls.
const PAGE_DELAY: Duration = Duration::from_secs(3);

pub struct ArxivClient {
    client: reqwest::Client,
    api_url: String,
    pdf_url: String,
    page_delay: Duration,
}

impl ArxivClient {
    pub fn new(config: &Config) -> Result<Self, SourceError> {
        Ok(Self {
            client: http::build_client(http::DEFAULT_USER_AGENT, config.request_timeout, HeaderMap::new())?,
            api_url: API_URL.to_string(),
            pdf_url: PDF_URL.to_string(),
            page_delay: PAGE_DELAY,
        })
    }

    /// Point both the query API and the PDF template at `base_url`.
    pub fn with_base_url(config: &Config, base_url: &str) -> Result<Self, SourceError> {
        let base = base_url.trim_end_matches('/');
        Ok(Self {
            api_url: format!("{}/api/query", base),
            pdf_url: format!("{}/pdf", base),
            page_delay: Duration::ZERO,
            ..Self::new(config)?
        })
    }

    async fn fetch_page(&self, query: &str, start: u32, size: u32) -> Result<AtomPage, SourceError> {
        let search_query = format!("all:{}", query);
        let resp = self
            .client
            .get(&self.api_url)
            .query(&[
                ("search_query", search_query.as_str()),
                ("start", &start.to_string()),
                ("max_results", &size.to_string()),
                ("sortBy", "relevance"),
                ("sortOrder", "descending"),
            ])
            .send()
            .await?;
        let body = http::ensure_success(resp)?.text().await?;
        parse_atom_feed(&body)
    }
}

#[async_trait]
impl PaperSource for ArxivClient {
    fn name(&self) -> &str {
        "arxiv"
    }

    async fn search(&self, query: &str, max_results: u32, _filters: &SearchFilters) -> Result<Vec<Paper>, SourceError> {
        let mut papers = Vec::new();
        if query.trim().is_empty() {
            tracing::debug!("arxiv: empty query, nothing to search");
            return Ok(papers);
        }

        let page_size = max_results.min(PAGE_SIZE);
        let mut start = 0u32;
        while (papers.len() as u32) < max_results {
            if start > 0 && !self.page_delay.is_zero() {
                tokio::time::sleep(self.page_delay).await;
            }
            let page = match self.fetch_page(query, start, page_size).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!("arxiv: page at offset {} failed: {}", start, e);
                    break;
                }
            };
            let room = (max_results as usize).saturating_sub(papers.len());
            papers.extend(page.papers.into_iter().take(room));
            if page.entries < page_size {
                break;
            }
            start += page_size;
        }

        tracing::info!("arxiv: {} results for {:?}", papers.len(), query);
        Ok(papers)
    }

    async fn download_pdf(&self, paper_id: &str, save_path: &Path) -> Result<PathBuf, SourceError> {
        let id = paper_id.trim().trim_start_matches("arxiv:");
        let url = format!("{}/{}", self.pdf_url, id);
        let file_name = format!("{}.pdf", http::safe_file_name(id));
        http::download_to_file(&self.client, &url, save_path, &file_name).await
    }
}

/// Fields of one Atom `<entry>` as they arrive from the feed.
#[derive(Default)]
struct AtomEntry {
    id: String,
    title: String,
    summary: String,
    authors: Vec<String>,
    published: String,
    updated: String,
    categories: Vec<String>,
    doi: String,
    journal_ref: String,
    comment: String,
    abs_link: String,
    pdf_link: String,
}

impl AtomEntry {
    fn take_link(&mut self, e: &BytesStart<'_>) {
        let mut href = String::new();
        let mut title = String::new();
        for attr in e.attributes().flatten() {
            let val = String::from_utf8_lossy(&attr.value).to_string();
            match attr.key.as_ref() {
                b"href" => href = val,
                b"title" => title = val,
                _ => {}
            }
        }
        if title == "pdf" {
            self.pdf_link = href;
        } else if self.abs_link.is_empty() && href.contains("/abs/") {
            self.abs_link = href;
        }
    }

    fn take_category(&mut self, e: &BytesStart<'_>) {
        for attr in e.attributes().flatten() {
            if attr.key.as_ref() == b"term" {
                self.categories.push(String::from_utf8_lossy(&attr.value).to_string());
            }
        }
    }

    fn into_paper(self) -> Option<Paper> {
        // The API reports query errors as an entry whose id points at /api/errors.
        if self.id.contains("/api/errors") {
            tracing::warn!("arxiv: API error entry: {}", clean_text(&self.summary));
            return None;
        }
        let arxiv_id = self
            .id
            .split("/abs/")
            .nth(1)
            .unwrap_or_else(|| self.id.rsplit('/').next().unwrap_or_default())
            .trim()
            .to_string();
        if arxiv_id.is_empty() {
            return None;
        }

        let url = if self.abs_link.is_empty() { self.id.clone() } else { self.abs_link };
        let pdf_url = if self.pdf_link.is_empty() {
            format!("{}/{}", PDF_URL, arxiv_id)
        } else {
            self.pdf_link
        };

        Paper::builder("arxiv", arxiv_id)
            .title(clean_text(&self.title))
            .authors(self.authors)
            .abstract_text(clean_text(&self.summary))
            .doi(self.doi.trim())
            .url(url)
            .pdf_url(pdf_url)
            .published_date(parse_date(&self.published))
            .updated_date(parse_date(&self.updated))
            .categories(self.categories)
            .extra("journal_ref", non_empty(&self.journal_ref))
            .extra("comment", non_empty(&self.comment))
            .build()
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = clean_text(s);
    (!s.is_empty()).then_some(s)
}

/// One feed page. `entries` counts every `<entry>`, including the ones that
/// did not produce a paper, so paging can tell a short page from a full one.
struct AtomPage {
    papers: Vec<Paper>,
    entries: u32,
}

fn parse_atom_feed(xml: &str) -> Result<AtomPage, SourceError> {
    let mut reader = Reader::from_str(xml);
    let mut papers = Vec::new();
    let mut entries = 0u32;
    let mut entry: Option<AtomEntry> = None;
    let mut current_tag = String::new();
    let mut author_name = String::new();
    let mut in_author = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let tag = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if tag == "entry" {
                    entry = Some(AtomEntry::default());
                } else if let Some(current) = entry.as_mut() {
                    match tag.as_str() {
                        "author" => {
                            in_author = true;
                            author_name.clear();
                        }
                        "link" => current.take_link(&e),
                        "category" => current.take_category(&e),
                        _ => {}
                    }
                    current_tag = tag;
                }
            }
            Ok(Event::Empty(e)) => {
                if let Some(current) = entry.as_mut() {
                    match e.local_name().as_ref() {
                        b"link" => current.take_link(&e),
                        b"category" => current.take_category(&e),
                        _ => {}
                    }
                }
            }
            Ok(Event::Text(e)) => {
                let Some(current) = entry.as_mut() else { continue };
                let text = e.unescape().unwrap_or_default().to_string();
                match current_tag.as_str() {
                    "title" => current.title.push_str(&text),
                    "summary" => current.summary.push_str(&text),
                    "id" => current.id.push_str(text.trim()),
                    "published" => current.published.push_str(text.trim()),
                    "updated" => current.updated.push_str(text.trim()),
                    "name" if in_author => author_name.push_str(&text),
                    "doi" => current.doi.push_str(text.trim()),
                    "journal_ref" => current.journal_ref.push_str(&text),
                    "comment" => current.comment.push_str(&text),
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                let tag = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                match tag.as_str() {
                    "entry" => {
                        if let Some(done) = entry.take() {
                            entries += 1;
                            match done.into_paper() {
                                Some(paper) => papers.push(paper),
                                None => tracing::debug!("arxiv: skipped entry without id or title"),
                            }
                        }
                    }
                    "author" if in_author => {
                        in_author = false;
                        let name = clean_text(&author_name);
                        if let (Some(current), false) = (entry.as_mut(), name.is_empty()) {
                            current.authors.push(name);
                        }
                    }
                    _ => {}
                }
                current_tag.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SourceError::Parse(format!("XML parse error: {}", e))),
            _ => {}
        }
    }
    Ok(AtomPage { papers, entries })
}
