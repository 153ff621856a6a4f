use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::header::HeaderMap;

use super::{PaperSource, SearchFilters, SourceError};
use crate::config::Config;
use crate::http;
use crate::normalize::assemble_abstract;
use crate::paper::Paper;
use crate::xml::XmlNode;

const EUTILS_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
const ARTICLES_URL: &str = "https://www.ncbi.nlm.nih.gov/pmc/articles";
/// E-utilities refuse larger `retmax` values for a single esearch call.
const MAX_IDS: u32 = 10_000;
/// Year recorded when an article carries no usable publication year.
const SENTINEL_YEAR: i32 = 1900;

/// PubMed Central via NCBI E-utilities: esearch resolves ids, efetch returns JATS.
pub struct PmcClient {
    client: reqwest::Client,
    eutils_url: String,
    articles_url: String,
    api_key: Option<String>,
}

impl PmcClient {
    pub fn new(config: &Config) -> Result<Self, SourceError> {
        Ok(Self {
            client: http::build_client(http::DEFAULT_USER_AGENT, config.request_timeout, HeaderMap::new())?,
            eutils_url: EUTILS_URL.to_string(),
            articles_url: ARTICLES_URL.to_string(),
            api_key: config.ncbi_api_key.clone(),
        })
    }

    pub fn with_base_url(config: &Config, base_url: &str) -> Result<Self, SourceError> {
        let base = base_url.trim_end_matches('/');
        Ok(Self {
            eutils_url: format!("{}/eutils", base),
            articles_url: format!("{}/pmc/articles", base),
            ..Self::new(config)?
        })
    }

    fn eutils_get(&self, endpoint: &str, params: &[(&str, &str)]) -> reqwest::RequestBuilder {
        let req = self
            .client
            .get(format!("{}/{}", self.eutils_url, endpoint))
            .query(params);
        match &self.api_key {
            Some(key) => req.query(&[("api_key", key.as_str())]),
            None => req,
        }
    }

    async fn search_ids(&self, query: &str, max_results: u32) -> Result<Vec<String>, SourceError> {
        let retmax = max_results.min(MAX_IDS).to_string();
        let resp = self
            .eutils_get(
                "esearch.fcgi",
                &[("db", "pmc"), ("term", query), ("retmax", &retmax), ("retmode", "xml")],
            )
            .send()
            .await?;
        let body = http::ensure_success(resp)?.text().await?;
        let root = XmlNode::parse(&body)?;
        Ok(root
            .descendants("Id")
            .into_iter()
            .map(XmlNode::text)
            .filter(|id| !id.is_empty())
            .collect())
    }

    async fn fetch_articles(&self, ids: &[String]) -> Result<Vec<Paper>, SourceError> {
        let joined = ids.join(",");
        let resp = self
            .eutils_get("efetch.fcgi", &[("db", "pmc"), ("id", &joined), ("retmode", "xml")])
            .send()
            .await?;
        let body = http::ensure_success(resp)?.text().await?;
        let root = XmlNode::parse(&body)?;
        Ok(root
            .descendants("article")
            .into_iter()
            .filter_map(|article| {
                let paper = article_to_paper(article, &self.articles_url);
                if paper.is_none() {
                    tracing::warn!("pmc: skipped article without a PMCID");
                }
                paper
            })
            .collect())
    }
}

/// PDF location for an article; used both for `Paper::pdf_url` and for downloads.
fn pdf_url(articles_url: &str, pmcid: &str) -> String {
    format!("{}/{}/pdf", articles_url, pmcid)
}

#[async_trait]
impl PaperSource for PmcClient {
    fn name(&self) -> &str {
        "pmc"
    }

    async fn search(&self, query: &str, max_results: u32, _filters: &SearchFilters) -> Result<Vec<Paper>, SourceError> {
        if max_results == 0 {
            return Ok(Vec::new());
        }
        let ids = match self.search_ids(query, max_results).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!("pmc: esearch failed: {}", e);
                return Ok(Vec::new());
            }
        };
        if ids.is_empty() {
            tracing::info!("pmc: no ids for {:?}", query);
            return Ok(Vec::new());
        }

        let mut papers = match self.fetch_articles(&ids).await {
            Ok(papers) => papers,
            Err(e) => {
                tracing::warn!("pmc: efetch failed for {} ids: {}", ids.len(), e);
                return Ok(Vec::new());
            }
        };
        papers.truncate(max_results as usize);
        tracing::info!("pmc: {} results for {:?}", papers.len(), query);
        Ok(papers)
    }

    async fn download_pdf(&self, paper_id: &str, save_path: &Path) -> Result<PathBuf, SourceError> {
        let pmcid = normalize_pmcid(paper_id);
        let url = pdf_url(&self.articles_url, &pmcid);
        let file_name = format!("{}.pdf", http::safe_file_name(&pmcid));
        http::download_to_file(&self.client, &url, save_path, &file_name).await
    }
}

/// `123`, `PMC123` and `pmc123` all become `PMC123`.
fn normalize_pmcid(raw: &str) -> String {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("PMC")
        .or_else(|| trimmed.strip_prefix("pmc"))
        .unwrap_or(trimmed);
    format!("PMC{}", digits)
}

fn article_to_paper(article: &XmlNode, articles_url: &str) -> Option<Paper> {
    let pmcid = ["pmc", "pmcid"]
        .iter()
        .find_map(|kind| article.find_with_attr("article-id", "pub-id-type", kind))
        .map(XmlNode::text)
        .filter(|id| !id.is_empty())
        .map(|id| normalize_pmcid(&id))?;

    let meta = article.find("article-meta").unwrap_or(article);

    let title = meta.find_text("article-title").unwrap_or_default();

    let authors: Vec<String> = meta
        .descendants("contrib")
        .into_iter()
        .filter(|c| c.attr("contrib-type") == Some("author"))
        .filter_map(|c| {
            let name = c.find("name")?;
            let given = name.find_text("given-names").unwrap_or_default();
            let surname = name.find_text("surname").unwrap_or_default();
            let full = format!("{} {}", given, surname).trim().to_string();
            (!full.is_empty()).then_some(full)
        })
        .collect();

    let doi = meta
        .find_with_attr("article-id", "pub-id-type", "doi")
        .map(XmlNode::text)
        .unwrap_or_default();

    let keywords: Vec<String> = meta
        .descendants("kwd")
        .into_iter()
        .map(XmlNode::text)
        .collect();
    let categories: Vec<String> = meta
        .descendants("subject")
        .into_iter()
        .map(XmlNode::text)
        .collect();
    let journal = article.find_text("journal-title");

    let published = publication_date(meta);
    let url = format!("{}/{}/", articles_url, pmcid);
    let pdf_link = pdf_url(articles_url, &pmcid);

    let mut builder = Paper::builder("pmc", pmcid)
        .title(title)
        .authors(authors)
        .doi(doi)
        .url(url)
        .pdf_url(pdf_link)
        .published_date(Some(published))
        .updated_date(Some(published))
        .keywords(keywords)
        .categories(categories)
        .extra("journal", journal);
    if let Some(text) = meta.child("abstract").or_else(|| meta.find("abstract")).and_then(abstract_text) {
        builder = builder.abstract_text(text);
    }
    builder.build()
}

/// Sectioned abstracts contribute one line per `<sec>`; otherwise direct `<p>` children, otherwise the bare text.
fn abstract_text(node: &XmlNode) -> Option<String> {
    let sections: Vec<String> = node
        .children_named("sec")
        .map(|sec| {
            sec.descendants("p")
                .into_iter()
                .map(XmlNode::text)
                .filter(|p| !p.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect();
    let paragraphs: Vec<String> = node.children_named("p").map(XmlNode::text).collect();
    assemble_abstract(&sections, &paragraphs, &node.text())
}

/// epub date first, then ppub, then any `pub-date`. Missing parts fall back to
/// January, the 1st, and the sentinel year.
fn publication_date(meta: &XmlNode) -> chrono::NaiveDateTime {
    let node = meta
        .find_with_attr("pub-date", "pub-type", "epub")
        .or_else(|| meta.find_with_attr("pub-date", "pub-type", "ppub"))
        .or_else(|| meta.find("pub-date"));

    let part = |name: &str| -> Option<u32> {
        node.and_then(|n| n.child(name))
            .map(XmlNode::text)
            .and_then(|t| t.parse::<u32>().ok())
    };
    let year = part("year").map(|y| y as i32).unwrap_or(SENTINEL_YEAR);
    let month = part("month").filter(|m| (1..=12).contains(m)).unwrap_or(1);
    let day = part("day").filter(|d| (1..=31).contains(d)).unwrap_or(1);

    chrono::NaiveDate::from_ymd_opt(year, month, day)
        .or_else(|| chrono::NaiveDate::from_ymd_opt(year, month, 1))
        .or_else(|| chrono::NaiveDate::from_ymd_opt(SENTINEL_YEAR, 1, 1))
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    const ESEARCH: &str = r#"<eSearchResult><Count>2</Count><IdList>
        <Id>123</Id><Id>456</Id>
    </IdList></eSearchResult>"#;

    const EFETCH: &str = r#"<pmc-articleset>
        <article>
            <front>
                <journal-meta><journal-title-group><journal-title>J. Tests</journal-title></journal-title-group></journal-meta>
                <article-meta>
                    <article-id pub-id-type="pmc">PMC123</article-id>
                    <article-id pub-id-type="doi">10.1000/xyz123</article-id>
                    <article-categories><subj-group><subject>Research Article</subject></subj-group></article-categories>
                    <title-group><article-title>Test Paper Title 1</article-title></title-group>
                    <contrib-group>
                        <contrib contrib-type="author">
                            <name><surname>Author</surname><given-names>First</given-names></name>
                        </contrib>
                        <contrib contrib-type="editor">
                            <name><surname>Editor</surname><given-names>Some</given-names></name>
                        </contrib>
                    </contrib-group>
                    <pub-date pub-type="ppub"><year>2022</year></pub-date>
                    <pub-date pub-type="epub"><year>2023</year><month>01</month><day>15</day></pub-date>
                    <abstract><p>This is abstract 1.</p></abstract>
                    <kwd-group><kwd>testing</kwd></kwd-group>
                </article-meta>
            </front>
        </article>
        <article>
            <front><article-meta>
                <title-group><article-title>No identifier at all</article-title></title-group>
            </article-meta></front>
        </article>
        <article>
            <front><article-meta>
                <article-id pub-id-type="pmc">456</article-id>
                <title-group><article-title>Test Paper Title 2</article-title></title-group>
                <pub-date pub-type="ppub"><year>2022</year><month>12</month></pub-date>
                <abstract>
                    <sec><title>BACKGROUND</title><p>Background info.</p></sec>
                    <sec><title>RESULTS</title><p>Results here.</p></sec>
                </abstract>
            </article-meta></front>
        </article>
    </pmc-articleset>"#;

    fn ymd(y: i32, m: u32, d: u32) -> chrono::NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    #[test]
    fn test_article_mapping() {
        let root = XmlNode::parse(EFETCH).unwrap();
        let papers: Vec<Paper> = root
            .descendants("article")
            .into_iter()
            .filter_map(|a| article_to_paper(a, ARTICLES_URL))
            .collect();
        assert_eq!(papers.len(), 2, "article without PMCID is skipped");

        let p1 = &papers[0];
        assert_eq!(p1.paper_id(), "PMC123");
        assert_eq!(p1.title(), "Test Paper Title 1");
        assert_eq!(p1.authors(), ["First Author"]);
        assert_eq!(p1.abstract_text(), "This is abstract 1.");
        assert_eq!(p1.doi(), "10.1000/xyz123");
        assert_eq!(p1.url(), "https://www.ncbi.nlm.nih.gov/pmc/articles/PMC123/");
        assert_eq!(p1.pdf_url(), "https://www.ncbi.nlm.nih.gov/pmc/articles/PMC123/pdf");
        assert_eq!(p1.published_date(), Some(ymd(2023, 1, 15)));
        assert_eq!(p1.extra()["journal"], "J. Tests");
        assert!(p1.keywords().contains("testing"));
        assert!(p1.categories().contains("Research Article"));

        let p2 = &papers[1];
        assert_eq!(p2.paper_id(), "PMC456");
        assert_eq!(p2.abstract_text(), "Background info.\nResults here.");
        assert_eq!(p2.published_date(), Some(ymd(2022, 12, 1)));
    }

    #[test]
    fn test_missing_date_uses_sentinel_year() {
        let root = XmlNode::parse("<article-meta><pub-date><month>13</month></pub-date></article-meta>").unwrap();
        let meta = root.find("article-meta").unwrap();
        assert_eq!(publication_date(meta), ymd(1900, 1, 1));
    }

    #[test]
    fn test_same_record_normalizes_identically() {
        let root = XmlNode::parse(EFETCH).unwrap();
        let article = root.find("article").unwrap();
        assert_eq!(article_to_paper(article, ARTICLES_URL), article_to_paper(article, ARTICLES_URL));
    }

    #[test]
    fn test_normalize_pmcid() {
        assert_eq!(normalize_pmcid("123"), "PMC123");
        assert_eq!(normalize_pmcid("PMC123"), "PMC123");
        assert_eq!(normalize_pmcid(" pmc9 "), "PMC9");
    }

    #[tokio::test]
    async fn test_search_two_phase() {
        let mut server = Server::new_async().await;
        let esearch = server
            .mock("GET", "/eutils/esearch.fcgi")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("db".into(), "pmc".into()),
                Matcher::UrlEncoded("term".into(), "test query".into()),
            ]))
            .with_body(ESEARCH)
            .expect(1)
            .create_async()
            .await;
        let efetch = server
            .mock("GET", "/eutils/efetch.fcgi")
            .match_query(Matcher::UrlEncoded("id".into(), "123,456".into()))
            .with_body(EFETCH)
            .expect(1)
            .create_async()
            .await;

        let client = PmcClient::with_base_url(&Config::default(), &server.url()).unwrap();
        let papers = client.search("test query", 10, &SearchFilters::default()).await.unwrap();
        assert_eq!(papers.len(), 2);
        assert!(papers[0].pdf_url().starts_with(&server.url()));
        esearch.assert_async().await;
        efetch.assert_async().await;
    }

    #[tokio::test]
    async fn test_no_ids_skips_fetch_phase() {
        let mut server = Server::new_async().await;
        let _esearch = server
            .mock("GET", "/eutils/esearch.fcgi")
            .match_query(Matcher::Any)
            .with_body("<eSearchResult><IdList></IdList></eSearchResult>")
            .create_async()
            .await;
        let efetch = server
            .mock("GET", "/eutils/efetch.fcgi")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let client = PmcClient::with_base_url(&Config::default(), &server.url()).unwrap();
        let papers = client.search("nothing matches", 10, &SearchFilters::default()).await.unwrap();
        assert!(papers.is_empty());
        efetch.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_failure_returns_empty() {
        let mut server = Server::new_async().await;
        let _esearch = server
            .mock("GET", "/eutils/esearch.fcgi")
            .match_query(Matcher::Any)
            .with_body("<eSearchResult><IdList><Id>123</Id></IdList></eSearchResult>")
            .create_async()
            .await;
        let _efetch = server
            .mock("GET", "/eutils/efetch.fcgi")
            .match_query(Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let client = PmcClient::with_base_url(&Config::default(), &server.url()).unwrap();
        let papers = client.search("test", 10, &SearchFilters::default()).await.unwrap();
        assert!(papers.is_empty());
    }

    #[tokio::test]
    async fn test_download_pdf_prefixes_pmcid() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/pmc/articles/PMC789/pdf")
            .with_body("fake pdf content")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = PmcClient::with_base_url(&Config::default(), &server.url()).unwrap();
        let path = client.download_pdf("789", dir.path()).await.unwrap();
        assert_eq!(path, dir.path().join("PMC789.pdf"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "fake pdf content");
    }

    #[tokio::test]
    async fn test_download_fetches_advertised_pdf_url() {
        let mut server = Server::new_async().await;
        let _esearch = server
            .mock("GET", "/eutils/esearch.fcgi")
            .match_query(Matcher::Any)
            .with_body(ESEARCH)
            .create_async()
            .await;
        let _efetch = server
            .mock("GET", "/eutils/efetch.fcgi")
            .match_query(Matcher::Any)
            .with_body(EFETCH)
            .create_async()
            .await;

        let client = PmcClient::with_base_url(&Config::default(), &server.url()).unwrap();
        let papers = client.search("test query", 1, &SearchFilters::default()).await.unwrap();
        let advertised = papers[0].pdf_url().strip_prefix(server.url().as_str()).unwrap().to_string();
        let pdf = server
            .mock("GET", advertised.as_str())
            .with_body("fake pdf content")
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        client.download_pdf(papers[0].paper_id(), dir.path()).await.unwrap();
        pdf.assert_async().await;
    }

    #[tokio::test]
    async fn test_download_pdf_failure_is_error() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/pmc/articles/PMC1/pdf")
            .with_status(403)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = PmcClient::with_base_url(&Config::default(), &server.url()).unwrap();
        let err = client.download_pdf("PMC1", dir.path()).await.unwrap_err();
        assert!(matches!(err, SourceError::Status { status: 403, .. }));
    }
}
