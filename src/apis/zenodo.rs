use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{PaperSource, SearchFilters, SourceError};
use crate::config::Config;
use crate::http;
use crate::normalize::parse_date;
use crate::paper::Paper;

const MAX_PAGE_SIZE: u32 = 100;

/// Zenodo records and communities via the public REST API.
pub struct ZenodoClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: HitList,
}

#[derive(Debug, Default, Deserialize)]
struct HitList {
    #[serde(default)]
    hits: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ZenodoRecord {
    #[serde(default)]
    id: Value,
    doi: Option<String>,
    conceptdoi: Option<String>,
    updated: Option<String>,
    #[serde(default)]
    metadata: RecordMetadata,
    #[serde(default)]
    links: RecordLinks,
    #[serde(default)]
    files: Value,
}

#[derive(Debug, Default, Deserialize)]
struct RecordMetadata {
    title: Option<String>,
    #[serde(default)]
    creators: Vec<Creator>,
    description: Option<String>,
    publication_date: Option<String>,
    doi: Option<String>,
    keywords: Option<Keywords>,
    resource_type: Option<Value>,
    communities: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Creator {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Keywords {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Default, Deserialize)]
struct RecordLinks {
    html: Option<String>,
    latest_html: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RecordFile {
    #[serde(default)]
    key: String,
    size: Option<u64>,
    checksum: Option<String>,
    #[serde(rename = "type")]
    file_type: Option<String>,
    mimetype: Option<String>,
    #[serde(default)]
    links: FileLinks,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileLinks {
    download: Option<String>,
    #[serde(rename = "self")]
    self_link: Option<String>,
}

impl RecordFile {
    fn is_pdf(&self) -> bool {
        self.key.to_lowercase().ends_with(".pdf")
            || self.file_type.as_deref() == Some("pdf")
            || self.mimetype.as_deref() == Some("application/pdf")
    }

    fn download_link(&self) -> Option<&str> {
        self.links
            .download
            .as_deref()
            .or(self.links.self_link.as_deref())
            .filter(|l| !l.is_empty())
    }
}

impl ZenodoRecord {
    fn id_string(&self) -> Option<String> {
        match &self.id {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Older records list files as an array; anything else means no files.
    fn files(&self) -> Vec<RecordFile> {
        match &self.files {
            Value::Array(items) => items
                .iter()
                .filter_map(|f| serde_json::from_value(f.clone()).ok())
                .collect(),
            _ => Vec::new(),
        }
    }

    fn pdf_file(&self) -> Option<RecordFile> {
        self.files().into_iter().find(RecordFile::is_pdf)
    }

    fn into_paper(self) -> Option<Paper> {
        let pdf_url = self
            .pdf_file()
            .and_then(|f| f.download_link().map(str::to_string))
            .unwrap_or_default();
        let record_id = self.id_string();
        let meta = self.metadata;

        let title = meta.title.unwrap_or_default();
        let doi = self.doi.or(meta.doi).unwrap_or_default();
        let url = self.links.html.or(self.links.latest_html).unwrap_or_default();
        let authors: Vec<String> = meta
            .creators
            .into_iter()
            .filter_map(|c| c.name)
            .filter(|n| !n.trim().is_empty())
            .collect();
        let keywords = match meta.keywords {
            Some(Keywords::One(k)) => vec![k],
            Some(Keywords::Many(ks)) => ks,
            None => Vec::new(),
        };
        let category = meta
            .resource_type
            .as_ref()
            .and_then(|rt| rt.get("type"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let published = meta
            .publication_date
            .as_deref()
            .or(self.updated.as_deref())
            .and_then(parse_date);
        let updated = self.updated.as_deref().and_then(parse_date);

        let paper_id = record_id.unwrap_or_else(|| {
            [&doi, &url, &title]
                .into_iter()
                .find(|s| !s.is_empty())
                .cloned()
                .unwrap_or_default()
        });

        let mut builder = Paper::builder("zenodo", paper_id)
            .title(title)
            .authors(authors)
            .doi(doi)
            .url(url)
            .pdf_url(pdf_url)
            .published_date(published)
            .updated_date(updated)
            .keywords(keywords)
            .categories(category)
            .extra("conceptdoi", self.conceptdoi)
            .extra("resource_type", meta.resource_type)
            .extra("communities", meta.communities);
        if let Some(description) = meta.description {
            builder = builder.abstract_text(description);
        }
        builder.build()
    }
}

/// Summary of one Zenodo community.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Community {
    pub id: Option<String>,
    pub slug: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub created: Option<String>,
    pub updated: Option<String>,
    pub links: Value,
}

impl Community {
    fn from_hit(hit: &Value) -> Self {
        let field = |key: &str| {
            hit.get(key)
                .and_then(Value::as_str)
                .or_else(|| hit.get("metadata").and_then(|m| m.get(key)).and_then(Value::as_str))
                .map(str::to_string)
        };
        Self {
            id: field("id"),
            slug: field("slug"),
            title: field("title"),
            description: field("description"),
            created: field("created"),
            updated: field("updated"),
            links: hit.get("links").cloned().unwrap_or_else(|| Value::Object(Default::default())),
        }
    }
}

/// One file attached to a record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileInfo {
    pub key: String,
    pub size: Option<u64>,
    pub checksum: Option<String>,
    #[serde(rename = "type")]
    pub file_type: Option<String>,
    pub mimetype: Option<String>,
    pub download: Option<String>,
}

impl From<&RecordFile> for FileInfo {
    fn from(f: &RecordFile) -> Self {
        Self {
            key: f.key.clone(),
            size: f.size,
            checksum: f.checksum.clone(),
            file_type: f.file_type.clone(),
            mimetype: f.mimetype.clone(),
            download: f.download_link().map(str::to_string),
        }
    }
}

impl ZenodoClient {
    pub fn new(config: &Config) -> Result<Self, SourceError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        if let Some(token) = &config.zenodo_access_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| SourceError::MissingKey("ZENODO_ACCESS_TOKEN is not a valid header value".to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(Self {
            client: http::build_client(http::random_user_agent(), config.request_timeout, headers)?,
            base_url: config.zenodo_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Communities matching `query` (everything when blank), in the order Zenodo returns them.
    pub async fn search_communities(
        &self,
        query: &str,
        max_results: u32,
        sort: Option<&str>,
        order: Option<&str>,
    ) -> Result<Vec<Community>, SourceError> {
        let q = if query.trim().is_empty() { "*" } else { query };
        Ok(self
            .collect_hits("communities", q, max_results, sort, order, |hit| Some(Community::from_hit(&hit)))
            .await)
    }

    /// Raw record JSON for a numeric id or a record URL.
    pub async fn get_record_details(&self, paper_id: &str) -> Result<Value, SourceError> {
        let record_id = record_id_from(paper_id);
        let resp = self
            .client
            .get(format!("{}/api/records/{}", self.base_url, record_id))
            .send()
            .await?;
        Ok(http::ensure_success(resp)?.json().await?)
    }

    pub async fn list_files(&self, paper_id: &str) -> Result<Vec<FileInfo>, SourceError> {
        let record = self.get_record(paper_id).await?;
        Ok(record.files().iter().map(FileInfo::from).collect())
    }

    /// Search restricted to one creator name; the free-text query and keyword filter are cleared.
    pub async fn search_by_creator(
        &self,
        creator: &str,
        max_results: u32,
        filters: &SearchFilters,
    ) -> Result<Vec<Paper>, SourceError> {
        let filters = SearchFilters {
            creators: vec![creator.to_string()],
            keywords: Vec::new(),
            ..filters.clone()
        };
        self.search("", max_results, &filters).await
    }

    async fn get_record(&self, paper_id: &str) -> Result<ZenodoRecord, SourceError> {
        let raw = self.get_record_details(paper_id).await?;
        serde_json::from_value(raw)
            .map_err(|e| SourceError::Parse(format!("Zenodo record {}: {}", paper_id, e)))
    }

    /// Page through `/api/<endpoint>`, converting each hit, until `max_results`
    /// converted items, an empty page, or a failed request. Hits that `convert`
    /// rejects do not count, so later pages fill the gap.
    async fn collect_hits<T>(
        &self,
        endpoint: &str,
        q: &str,
        max_results: u32,
        sort: Option<&str>,
        order: Option<&str>,
        mut convert: impl FnMut(Value) -> Option<T> + Send,
    ) -> Vec<T> {
        let page_size = max_results.min(MAX_PAGE_SIZE);
        let wanted = max_results as usize;
        let mut items = Vec::new();
        let mut page = 1u32;

        while items.len() < wanted {
            let mut params = vec![
                ("q", q.to_string()),
                ("page", page.to_string()),
                ("size", page_size.to_string()),
            ];
            if let Some(sort) = sort {
                params.push(("sort", sort.to_string()));
            }
            if let Some(order) = order {
                params.push(("order", order.to_string()));
            }

            tracing::debug!("zenodo: {} page {} (size {})", endpoint, page, page_size);
            let resp = match self
                .client
                .get(format!("{}/api/{}", self.base_url, endpoint))
                .query(&params)
                .send()
                .await
                .map_err(SourceError::from)
                .and_then(http::ensure_success)
            {
                Ok(resp) => resp,
                Err(e) => {
                    tracing::warn!("zenodo: {} search stopped at page {}: {}", endpoint, page, e);
                    break;
                }
            };
            let body: SearchResponse = match resp.json().await {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!("zenodo: undecodable {} page {}: {}", endpoint, page, e);
                    break;
                }
            };
            if body.hits.hits.is_empty() {
                break;
            }
            for hit in body.hits.hits {
                if items.len() == wanted {
                    break;
                }
                items.extend(convert(hit));
            }
            page += 1;
        }
        items
    }
}

#[async_trait]
impl PaperSource for ZenodoClient {
    fn name(&self) -> &str {
        "zenodo"
    }

    async fn search(&self, query: &str, max_results: u32, filters: &SearchFilters) -> Result<Vec<Paper>, SourceError> {
        if max_results == 0 {
            return Ok(Vec::new());
        }
        let q = build_query(query, filters);
        let papers = self
            .collect_hits(
                "records",
                &q,
                max_results,
                filters.sort.as_deref(),
                filters.order.as_deref(),
                |hit| match serde_json::from_value::<ZenodoRecord>(hit) {
                    Ok(record) => record.into_paper(),
                    Err(e) => {
                        tracing::warn!("zenodo: skipped undecodable record: {}", e);
                        None
                    }
                },
            )
            .await;
        tracing::info!("zenodo: {} results for {:?}", papers.len(), q);
        Ok(papers)
    }

    async fn download_pdf(&self, paper_id: &str, save_path: &Path) -> Result<PathBuf, SourceError> {
        let record = self.get_record(paper_id).await?;
        let record_id = record.id_string().unwrap_or_else(|| record_id_from(paper_id));
        let file = record
            .pdf_file()
            .ok_or_else(|| SourceError::NoPdf(format!("No PDF file available for Zenodo record {}", record_id)))?;
        let link = file
            .download_link()
            .ok_or_else(|| SourceError::NoPdf(format!("No downloadable link for {} in record {}", file.key, record_id)))?;

        let mut name = file.key.rsplit('/').next().unwrap_or_default().to_string();
        if name.is_empty() {
            name = format!("zenodo_{}.pdf", record_id);
        }
        if !name.to_lowercase().ends_with(".pdf") {
            name.push_str(".pdf");
        }
        let file_name = http::safe_file_name(&format!("zenodo_{}_{}", record_id, name));
        http::download_to_file(&self.client, link, save_path, &file_name).await
    }
}

/// `https://zenodo.org/records/1234567` gives `1234567`; anything else passes through.
fn record_id_from(paper_id: &str) -> String {
    let trimmed = paper_id.trim();
    if trimmed.starts_with("http") {
        if let Some(digits) = trimmed
            .split('/')
            .find(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
        {
            return digits.to_string();
        }
    }
    trimmed.to_string()
}

/// Lucene range over `metadata.publication_date` for "2025", "2016-2020", "2010-" or "-2015".
fn year_clause(year: &str) -> Option<String> {
    let y = year.trim();
    if y.is_empty() {
        return None;
    }
    let (start, end) = match y.split_once('-') {
        Some((start, end)) => {
            let end = end.split('-').next().unwrap_or_default();
            (non_blank_or_star(start), non_blank_or_star(end))
        }
        None => (y, y),
    };
    Some(format!("metadata.publication_date:[{} TO {}]", start, end))
}

fn non_blank_or_star(s: &str) -> &str {
    let s = s.trim();
    if s.is_empty() {
        "*"
    } else {
        s
    }
}

fn quoted_any(values: &[String]) -> Option<String> {
    let quoted: Vec<String> = values
        .iter()
        .filter(|v| !v.trim().is_empty())
        .map(|v| format!("\"{}\"", v))
        .collect();
    (!quoted.is_empty()).then(|| quoted.join(" OR "))
}

fn build_query(query: &str, filters: &SearchFilters) -> String {
    let mut parts = Vec::new();
    if !query.trim().is_empty() {
        parts.push(format!("({})", query));
    }
    if let Some(community) = filters.community.as_deref().filter(|c| !c.is_empty()) {
        parts.push(format!("communities:{}", community));
    }
    if let Some(clause) = filters.year.as_deref().and_then(year_clause) {
        parts.push(clause);
    }
    if let Some(rt) = filters.resource_type.as_deref().filter(|r| !r.is_empty()) {
        parts.push(format!("resource_type.type:{}", rt));
    }
    if let Some(st) = filters.subtype.as_deref().filter(|s| !s.is_empty()) {
        parts.push(format!("resource_type.subtype:{}", st));
    }
    if let Some(names) = quoted_any(&filters.creators) {
        parts.push(format!("creators.name:({})", names));
    }
    if let Some(kws) = quoted_any(&filters.keywords) {
        parts.push(format!("keywords:({})", kws));
    }
    if parts.is_empty() {
        "*".to_string()
    } else {
        parts.join(" AND ")
    }
}
