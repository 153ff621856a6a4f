use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::Value;

use super::{PaperSource, SearchFilters, SourceError};
use crate::config::Config;
use crate::http;
use crate::normalize::{parse_date, year_start};
use crate::paper::Paper;

const BASE_URL: &str = "https://api.semanticscholar.org/graph/v1";
const PAGE_SIZE: u32 = 100;

pub struct SemanticScholarClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl SemanticScholarClient {
    pub fn new(config: &Config) -> Result<Self, SourceError> {
        Ok(Self {
            client: http::build_client(http::DEFAULT_USER_AGENT, config.request_timeout, HeaderMap::new())?,
            base_url: BASE_URL.to_string(),
            api_key: config.semantic_scholar_api_key.clone(),
        })
    }

    pub fn with_base_url(config: &Config, base_url: &str) -> Result<Self, SourceError> {
        Ok(Self {
            base_url: format!("{}/graph/v1", base_url.trim_end_matches('/')),
            ..Self::new(config)?
        })
    }

    fn add_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("x-api-key", key),
            None => req,
        }
    }

    async fn fetch_page(
        &self,
        query: &str,
        offset: u32,
        limit: u32,
        year: Option<&str>,
    ) -> Result<Vec<Value>, SourceError> {
        let mut params = vec![
            ("query", query.to_string()),
            ("offset", offset.to_string()),
            ("limit", limit.to_string()),
            ("fields", FIELDS.to_string()),
        ];
        if let Some(year) = year {
            params.push(("year", year.to_string()));
        }
        let resp = self
            .add_auth(self.client.get(format!("{}/paper/search", self.base_url)).query(&params))
            .send()
            .await?;
        let body: S2SearchResponse = http::ensure_success(resp)?.json().await?;
        Ok(body.data.unwrap_or_default())
    }

    async fn get_paper(&self, paper_id: &str) -> Result<S2Paper, SourceError> {
        let id = paper_id.strip_prefix("s2:").unwrap_or(paper_id);
        let resp = self
            .add_auth(
                self.client
                    .get(format!("{}/paper/{}", self.base_url, id))
                    .query(&[("fields", FIELDS)]),
            )
            .send()
            .await?;
        Ok(http::ensure_success(resp)?.json().await?)
    }
}

#[derive(Deserialize)]
struct S2SearchResponse {
    data: Option<Vec<Value>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct S2Paper {
    paper_id: Option<String>,
    title: Option<String>,
    authors: Option<Vec<S2Author>>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    year: Option<i32>,
    publication_date: Option<String>,
    external_ids: Option<S2ExternalIds>,
    citation_count: Option<u64>,
    url: Option<String>,
    venue: Option<String>,
    fields_of_study: Option<Vec<String>>,
    open_access_pdf: Option<S2Pdf>,
}

#[derive(Deserialize)]
struct S2Author {
    name: Option<String>,
}

#[derive(Deserialize)]
struct S2ExternalIds {
    #[serde(rename = "DOI")]
    doi: Option<String>,
    #[serde(rename = "ArXiv")]
    arxiv: Option<String>,
}

#[derive(Deserialize)]
struct S2Pdf {
    url: Option<String>,
}

impl S2Paper {
    fn pdf_url(&self) -> Option<&str> {
        self.open_access_pdf
            .as_ref()
            .and_then(|pdf| pdf.url.as_deref())
            .filter(|u| !u.is_empty())
    }
}

fn s2_to_paper(p: S2Paper) -> Option<Paper> {
    let pdf_url = p.pdf_url().unwrap_or_default().to_string();
    let published = p
        .publication_date
        .as_deref()
        .and_then(parse_date)
        .or_else(|| p.year.and_then(year_start));
    let (doi, arxiv) = p
        .external_ids
        .map(|e| (e.doi, e.arxiv))
        .unwrap_or_default();

    let mut builder = Paper::builder("semantic_scholar", p.paper_id.unwrap_or_default())
        .title(p.title.unwrap_or_default())
        .authors(
            p.authors
                .unwrap_or_default()
                .into_iter()
                .filter_map(|a| a.name)
                .collect(),
        )
        .doi(doi.unwrap_or_default())
        .url(p.url.unwrap_or_default())
        .pdf_url(pdf_url)
        .published_date(published)
        .categories(p.fields_of_study.unwrap_or_default())
        .citations(p.citation_count.unwrap_or(0))
        .extra("venue", p.venue.filter(|v| !v.is_empty()))
        .extra("arxiv_id", arxiv);
    if let Some(text) = p.abstract_text {
        builder = builder.abstract_text(text);
    }
    builder.build()
}

const FIELDS: &str =
    "title,authors,abstract,year,publicationDate,externalIds,citationCount,url,venue,fieldsOfStudy,openAccessPdf";

#[async_trait]
impl PaperSource for SemanticScholarClient {
    fn name(&self) -> &str {
        "semantic_scholar"
    }

    async fn search(&self, query: &str, max_results: u32, filters: &SearchFilters) -> Result<Vec<Paper>, SourceError> {
        let year = filters.year.as_deref().filter(|y| !y.trim().is_empty());
        let mut papers = Vec::new();
        let mut offset = 0u32;

        while (papers.len() as u32) < max_results {
            let limit = (max_results - papers.len() as u32).min(PAGE_SIZE);
            tracing::debug!("semantic_scholar: offset={} limit={}", offset, limit);
            let page = match self.fetch_page(query, offset, limit, year).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!("semantic_scholar: search stopped at offset {}: {}", offset, e);
                    break;
                }
            };
            let fetched = page.len() as u32;
            for item in page {
                match serde_json::from_value::<S2Paper>(item) {
                    Ok(p) => papers.extend(s2_to_paper(p)),
                    Err(e) => tracing::warn!("semantic_scholar: skipping malformed paper at offset {}: {}", offset, e),
                }
            }
            if fetched < limit {
                break;
            }
            offset += fetched;
        }

        papers.truncate(max_results as usize);
        tracing::info!("semantic_scholar: {} results for {:?}", papers.len(), query);
        Ok(papers)
    }

    async fn download_pdf(&self, paper_id: &str, save_path: &Path) -> Result<PathBuf, SourceError> {
        let paper = self.get_paper(paper_id).await?;
        let url = paper
            .pdf_url()
            .ok_or_else(|| SourceError::NoPdf(format!("Semantic Scholar lists no open-access PDF for {}", paper_id)))?;
        let id = paper_id.strip_prefix("s2:").unwrap_or(paper_id);
        let file_name = format!("{}.pdf", http::safe_file_name(id));
        http::download_to_file(&self.client, url, save_path, &file_name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn paper_json(id: &str, pdf: Option<&str>) -> serde_json::Value {
        json!({
            "paperId": id,
            "title": format!("Paper {}", id),
            "authors": [{"name": "Ada Lovelace"}, {"name": null}],
            "abstract": "An abstract.",
            "year": 2020,
            "publicationDate": null,
            "externalIds": {"DOI": "10.1/s2", "ArXiv": "2001.00001"},
            "citationCount": 12,
            "url": format!("https://www.semanticscholar.org/paper/{}", id),
            "venue": "NeurIPS",
            "fieldsOfStudy": ["Computer Science"],
            "openAccessPdf": pdf.map(|u| json!({"url": u}))
        })
    }

    #[test]
    fn test_mapping_falls_back_to_year() {
        let p: S2Paper = serde_json::from_value(paper_json("abc", None)).unwrap();
        let paper = s2_to_paper(p).unwrap();
        assert_eq!(paper.paper_id(), "abc");
        assert_eq!(paper.authors(), ["Ada Lovelace"]);
        assert_eq!(paper.published_date(), year_start(2020));
        assert_eq!(paper.citations(), 12);
        assert!(paper.categories().contains("Computer Science"));
        assert_eq!(paper.extra()["venue"], "NeurIPS");
        assert_eq!(paper.pdf_url(), "");
    }

    #[tokio::test]
    async fn test_search_pages_with_offset_and_year() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/graph/v1/paper/search")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("offset".into(), "0".into()),
                Matcher::UrlEncoded("limit".into(), "3".into()),
                Matcher::UrlEncoded("year".into(), "2019-2021".into()),
            ]))
            .with_body(json!({"total": 2, "data": [paper_json("a", None), paper_json("b", None)]}).to_string())
            .expect(1)
            .create_async()
            .await;

        let client = SemanticScholarClient::with_base_url(&Config::default(), &server.url()).unwrap();
        let filters = SearchFilters::default().with_year("2019-2021");
        let papers = client.search("graphs", 3, &filters).await.unwrap();
        assert_eq!(papers.len(), 2);
        m.assert_async().await;
    }

    #[tokio::test]
    async fn test_malformed_paper_is_skipped() {
        let mut bad = paper_json("b", None);
        bad["year"] = json!("2020");
        let mut server = Server::new_async().await;
        let _first = server
            .mock("GET", "/graph/v1/paper/search")
            .match_query(Matcher::UrlEncoded("offset".into(), "0".into()))
            .with_body(json!({"total": 3, "data": [paper_json("a", None), bad, paper_json("c", None)]}).to_string())
            .create_async()
            .await;
        let rest = server
            .mock("GET", "/graph/v1/paper/search")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("offset".into(), "3".into()),
                Matcher::UrlEncoded("limit".into(), "1".into()),
            ]))
            .with_body(json!({"total": 3, "data": []}).to_string())
            .expect(1)
            .create_async()
            .await;

        let client = SemanticScholarClient::with_base_url(&Config::default(), &server.url()).unwrap();
        let papers = client.search("x", 3, &SearchFilters::default()).await.unwrap();
        let ids: Vec<&str> = papers.iter().map(|p| p.paper_id()).collect();
        assert_eq!(ids, ["a", "c"]);
        rest.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limited_search_returns_empty() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/graph/v1/paper/search")
            .match_query(Matcher::Any)
            .with_status(429)
            .create_async()
            .await;

        let client = SemanticScholarClient::with_base_url(&Config::default(), &server.url()).unwrap();
        assert!(client.search("x", 5, &SearchFilters::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_download_open_access_pdf() {
        let mut server = Server::new_async().await;
        let pdf_url = format!("{}/files/a.pdf", server.url());
        let _p = server
            .mock("GET", "/graph/v1/paper/abc")
            .match_query(Matcher::Any)
            .with_body(paper_json("abc", Some(pdf_url.as_str())).to_string())
            .create_async()
            .await;
        let _f = server
            .mock("GET", "/files/a.pdf")
            .with_body("fake pdf content")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = SemanticScholarClient::with_base_url(&Config::default(), &server.url()).unwrap();
        let path = client.download_pdf("s2:abc", dir.path()).await.unwrap();
        assert_eq!(path, dir.path().join("abc.pdf"));
    }

    #[tokio::test]
    async fn test_no_open_access_pdf() {
        let mut server = Server::new_async().await;
        let _p = server
            .mock("GET", "/graph/v1/paper/closed")
            .match_query(Matcher::Any)
            .with_body(paper_json("closed", None).to_string())
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = SemanticScholarClient::with_base_url(&Config::default(), &server.url()).unwrap();
        let err = client.download_pdf("closed", dir.path()).await.unwrap_err();
        assert!(matches!(err, SourceError::NoPdf(_)));
    }
}
