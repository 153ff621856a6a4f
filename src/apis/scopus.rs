use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde::Deserialize;
use serde_json::Value;

use super::{PaperSource, SearchFilters, SourceError};
use crate::config::Config;
use crate::http;
use crate::normalize::parse_date;
use crate::paper::Paper;

const SEARCH_URL: &str = "https://api.elsevier.com/content/search/scopus";
/// Largest `count` the Scopus Search API accepts on the standard view.
const PAGE_SIZE: u32 = 25;

/// Elsevier Scopus Search API. Construction requires an API key.
pub struct ScopusClient {
    client: reqwest::Client,
    search_url: String,
}

#[derive(Debug, Deserialize)]
struct ScopusResponse {
    #[serde(rename = "search-results")]
    results: SearchResults,
}

#[derive(Debug, Deserialize)]
struct SearchResults {
    #[serde(default)]
    entry: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ScopusEntry {
    #[serde(rename = "dc:identifier", default)]
    identifier: String,
    #[serde(rename = "dc:title", default)]
    title: String,
    #[serde(default)]
    author: Vec<ScopusAuthor>,
    #[serde(rename = "dc:creator")]
    creator: Option<String>,
    #[serde(rename = "dc:description")]
    description: Option<String>,
    #[serde(rename = "prism:doi", default)]
    doi: String,
    #[serde(rename = "prism:url", default)]
    api_url: String,
    #[serde(default)]
    link: Vec<ScopusLink>,
    #[serde(rename = "prism:coverDate")]
    cover_date: Option<String>,
    #[serde(rename = "citedby-count")]
    cited_by: Option<String>,
    #[serde(rename = "prism:publicationName")]
    publication_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScopusAuthor {
    authname: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScopusLink {
    #[serde(rename = "@ref", default)]
    rel: String,
    #[serde(rename = "@href", default)]
    href: String,
}

impl ScopusEntry {
    fn into_paper(self) -> Option<Paper> {
        let paper_id = self.identifier.trim_start_matches("SCOPUS_ID:").to_string();
        let mut authors: Vec<String> = self.author.into_iter().filter_map(|a| a.authname).collect();
        if authors.is_empty() {
            authors.extend(self.creator.filter(|c| !c.trim().is_empty()));
        }
        let url = self
            .link
            .iter()
            .find(|l| l.rel == "scopus")
            .map(|l| l.href.clone())
            .unwrap_or(self.api_url);
        let citations = self
            .cited_by
            .as_deref()
            .and_then(|c| c.trim().parse::<u64>().ok())
            .unwrap_or(0);

        let mut builder = Paper::builder("scopus", paper_id)
            .title(self.title)
            .authors(authors)
            .doi(self.doi)
            .url(url)
            .published_date(self.cover_date.as_deref().and_then(parse_date))
            .citations(citations)
            .extra("journal", self.publication_name);
        if let Some(description) = self.description {
            builder = builder.abstract_text(description);
        }
        builder.build()
    }
}

impl ScopusClient {
    pub fn new(config: &Config) -> Result<Self, SourceError> {
        let api_key = config.scopus_api_key.as_deref().ok_or_else(|| {
            SourceError::MissingKey("Scopus API key not provided. Set SCOPUS_API_KEY".to_string())
        })?;
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            "X-ELS-APIKey",
            HeaderValue::from_str(api_key)
                .map_err(|_| SourceError::MissingKey("SCOPUS_API_KEY is not a valid header value".to_string()))?,
        );
        Ok(Self {
            client: http::build_client(http::DEFAULT_USER_AGENT, config.request_timeout, headers)?,
            search_url: SEARCH_URL.to_string(),
        })
    }

    pub fn with_base_url(config: &Config, base_url: &str) -> Result<Self, SourceError> {
        Ok(Self {
            search_url: format!("{}/content/search/scopus", base_url.trim_end_matches('/')),
            ..Self::new(config)?
        })
    }

    /// Raw entries of one page; each is decoded on its own so a malformed one
    /// does not cost the rest of the page.
    async fn fetch_page(&self, query: &str, start: u32, count: u32) -> Result<Vec<Value>, SourceError> {
        let resp = self
            .client
            .get(&self.search_url)
            .query(&[
                ("query", query),
                ("start", &start.to_string()),
                ("count", &count.to_string()),
            ])
            .send()
            .await?;
        let body: ScopusResponse = http::ensure_success(resp)?.json().await?;
        Ok(body.results.entry)
    }
}

#[async_trait]
impl PaperSource for ScopusClient {
    fn name(&self) -> &str {
        "scopus"
    }

    async fn search(&self, query: &str, max_results: u32, _filters: &SearchFilters) -> Result<Vec<Paper>, SourceError> {
        let mut papers = Vec::new();
        let mut start = 0u32;

        while (papers.len() as u32) < max_results {
            let count = (max_results - papers.len() as u32).min(PAGE_SIZE);
            tracing::debug!("scopus: start={} count={}", start, count);
            let entries = match self.fetch_page(query, start, count).await {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!("scopus: search stopped at offset {}: {}", start, e);
                    break;
                }
            };
            let fetched = entries.len() as u32;
            for entry in entries {
                match serde_json::from_value::<ScopusEntry>(entry) {
                    // An empty result set comes back as one entry carrying only an error field.
                    Ok(entry) => papers.extend(entry.into_paper()),
                    Err(e) => tracing::warn!("scopus: skipping malformed entry at offset {}: {}", start, e),
                }
            }
            if fetched < count {
                break;
            }
            start += fetched;
        }

        papers.truncate(max_results as usize);
        tracing::info!("scopus: {} results for {:?}", papers.len(), query);
        Ok(papers)
    }

    async fn download_pdf(&self, _paper_id: &str, _save_path: &Path) -> Result<PathBuf, SourceError> {
        Err(SourceError::unsupported(
            "scopus",
            "Direct PDF download from Scopus is not supported via this API.",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn config() -> Config {
        Config {
            scopus_api_key: Some("test_api_key".to_string()),
            ..Config::default()
        }
    }

    fn results(entries: serde_json::Value) -> String {
        json!({"search-results": {"opensearch:totalResults": "2", "entry": entries}}).to_string()
    }

    #[test]
    fn test_missing_key_fails_construction() {
        let err = ScopusClient::new(&Config::default()).err().unwrap();
        assert!(matches!(err, SourceError::MissingKey(_)));
        assert!(err.to_string().contains("Scopus API key not provided"));
    }

    #[tokio::test]
    async fn test_search_maps_entries() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/content/search/scopus")
            .match_header("X-ELS-APIKey", "test_api_key")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("query".into(), "test query".into()),
                Matcher::UrlEncoded("count".into(), "2".into()),
            ]))
            .with_body(results(json!([
                {
                    "dc:identifier": "SCOPUS_ID:12345",
                    "dc:title": "Test Paper 1",
                    "author": [{"authname": "Author A"}, {"authname": "Author B"}],
                    "dc:description": "This is a test abstract.",
                    "prism:doi": "10.1000/test1",
                    "prism:url": "http://api.scopus.com/test1",
                    "link": [{"@ref": "scopus", "@href": "http://scopus.com/test1"}],
                    "prism:coverDate": "2023-01-15",
                    "citedby-count": "7",
                    "prism:publicationName": "Journal of Tests"
                },
                {
                    "dc:identifier": "SCOPUS_ID:67890",
                    "dc:title": "Test Paper 2",
                    "dc:creator": "Author C",
                    "prism:url": "http://api.scopus.com/test2"
                }
            ])))
            .expect(1)
            .create_async()
            .await;

        let client = ScopusClient::with_base_url(&config(), &server.url()).unwrap();
        let papers = client.search("test query", 2, &SearchFilters::default()).await.unwrap();
        m.assert_async().await;

        assert_eq!(papers.len(), 2);
        assert_eq!(papers[0].paper_id(), "12345");
        assert_eq!(papers[0].authors(), ["Author A", "Author B"]);
        assert_eq!(papers[0].url(), "http://scopus.com/test1");
        assert_eq!(papers[0].citations(), 7);
        assert_eq!(papers[0].published_date().unwrap().date().to_string(), "2023-01-15");
        assert_eq!(papers[0].extra()["journal"], "Journal of Tests");
        assert_eq!(papers[1].authors(), ["Author C"]);
        assert_eq!(papers[1].url(), "http://api.scopus.com/test2");
        assert_eq!(papers[1].abstract_text(), crate::paper::NO_ABSTRACT);
    }

    #[tokio::test]
    async fn test_empty_result_set_entry_is_dropped() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/content/search/scopus")
            .match_query(Matcher::Any)
            .with_body(results(json!([{"@_fa": "true", "error": "Result set was empty"}])))
            .create_async()
            .await;

        let client = ScopusClient::with_base_url(&config(), &server.url()).unwrap();
        let papers = client.search("nothing", 5, &SearchFilters::default()).await.unwrap();
        assert!(papers.is_empty());
    }

    #[tokio::test]
    async fn test_api_error_returns_empty() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/content/search/scopus")
            .match_query(Matcher::Any)
            .with_status(401)
            .create_async()
            .await;

        let client = ScopusClient::with_base_url(&config(), &server.url()).unwrap();
        let papers = client.search("error query", 5, &SearchFilters::default()).await.unwrap();
        assert!(papers.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_entry_is_skipped() {
        let mut server = Server::new_async().await;
        let _first = server
            .mock("GET", "/content/search/scopus")
            .match_query(Matcher::UrlEncoded("start".into(), "0".into()))
            .with_body(results(json!([
                {"dc:identifier": "SCOPUS_ID:1", "dc:title": "First"},
                {"dc:identifier": "SCOPUS_ID:2", "dc:title": null},
                {"dc:identifier": "SCOPUS_ID:3", "dc:title": "Third"}
            ])))
            .create_async()
            .await;
        let rest = server
            .mock("GET", "/content/search/scopus")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("start".into(), "3".into()),
                Matcher::UrlEncoded("count".into(), "1".into()),
            ]))
            .with_body(results(json!([])))
            .expect(1)
            .create_async()
            .await;

        let client = ScopusClient::with_base_url(&config(), &server.url()).unwrap();
        let papers = client.search("q", 3, &SearchFilters::default()).await.unwrap();
        let ids: Vec<&str> = papers.iter().map(|p| p.paper_id()).collect();
        assert_eq!(ids, ["1", "3"]);
        rest.assert_async().await;
    }

    #[tokio::test]
    async fn test_search_pagination() {
        let page = |ids: std::ops::Range<u32>| {
            let entries: Vec<serde_json::Value> = ids
                .map(|i| json!({"dc:identifier": format!("SCOPUS_ID:{}", i), "dc:title": format!("Paper {}", i)}))
                .collect();
            results(json!(entries))
        };
        let mut server = Server::new_async().await;
        let first = server
            .mock("GET", "/content/search/scopus")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("start".into(), "0".into()),
                Matcher::UrlEncoded("count".into(), "25".into()),
            ]))
            .with_body(page(0..25))
            .expect(1)
            .create_async()
            .await;
        let second = server
            .mock("GET", "/content/search/scopus")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("start".into(), "25".into()),
                Matcher::UrlEncoded("count".into(), "5".into()),
            ]))
            .with_body(page(25..30))
            .expect(1)
            .create_async()
            .await;

        let client = ScopusClient::with_base_url(&config(), &server.url()).unwrap();
        let papers = client.search("q", 30, &SearchFilters::default()).await.unwrap();
        first.assert_async().await;
        second.assert_async().await;

        assert_eq!(papers.len(), 30);
        assert_eq!(papers[0].paper_id(), "0");
        assert_eq!(papers[29].paper_id(), "29");
    }

    #[tokio::test]
    async fn test_download_and_read_are_unsupported() {
        let client = ScopusClient::new(&config()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let err = client.download_pdf("12345", dir.path()).await.unwrap_err();
        assert!(matches!(err, SourceError::Unsupported { .. }));

        let text = client.read_paper("12345", dir.path()).await.unwrap();
        assert!(text.contains("not supported"));
    }
}
