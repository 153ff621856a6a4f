use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDateTime;
use serde::Serialize;

/// Placeholder used when a source lists no authors for a record.
pub const UNKNOWN_AUTHOR: &str = "Unknown Author";
/// Placeholder used when a source exposes no abstract for a record.
pub const NO_ABSTRACT: &str = "No abstract available";

/// Canonical, source-agnostic record for one academic work.
///
/// Only constructed through [`PaperBuilder::build`], which refuses records that
/// carry neither a title nor a locator (`url`, `pdf_url` or `doi`). There are no
/// setters: once built a `Paper` is read-only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Paper {
    paper_id: String,
    title: String,
    authors: Vec<String>,
    #[serde(rename = "abstract")]
    abstract_text: String,
    doi: String,
    url: String,
    pdf_url: String,
    published_date: Option<NaiveDateTime>,
    updated_date: Option<NaiveDateTime>,
    source: String,
    categories: BTreeSet<String>,
    keywords: BTreeSet<String>,
    citations: u64,
    extra: BTreeMap<String, serde_json::Value>,
}

impl Paper {
    pub fn builder(source: &str, paper_id: impl Into<String>) -> PaperBuilder {
        PaperBuilder::new(source, paper_id)
    }

    /// Identifier scoped to [`Paper::source`]; not globally unique.
    pub fn paper_id(&self) -> &str {
        &self.paper_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn authors(&self) -> &[String] {
        &self.authors
    }

    pub fn abstract_text(&self) -> &str {
        &self.abstract_text
    }

    pub fn doi(&self) -> &str {
        &self.doi
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn pdf_url(&self) -> &str {
        &self.pdf_url
    }

    pub fn published_date(&self) -> Option<NaiveDateTime> {
        self.published_date
    }

    pub fn updated_date(&self) -> Option<NaiveDateTime> {
        self.updated_date
    }

    /// Platform key of the adapter that produced this record.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn categories(&self) -> &BTreeSet<String> {
        &self.categories
    }

    pub fn keywords(&self) -> &BTreeSet<String> {
        &self.keywords
    }

    pub fn citations(&self) -> u64 {
        self.citations
    }

    /// Source-specific fields (journal, concept DOI, communities, ...).
    pub fn extra(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.extra
    }
}

/// Accumulates normalized fields for a [`Paper`].
#[derive(Debug, Clone)]
pub struct PaperBuilder {
    paper: Paper,
}

impl PaperBuilder {
    pub fn new(source: &str, paper_id: impl Into<String>) -> Self {
        Self {
            paper: Paper {
                paper_id: paper_id.into(),
                title: String::new(),
                authors: Vec::new(),
                abstract_text: NO_ABSTRACT.to_string(),
                doi: String::new(),
                url: String::new(),
                pdf_url: String::new(),
                published_date: None,
                updated_date: None,
                source: source.to_string(),
                categories: BTreeSet::new(),
                keywords: BTreeSet::new(),
                citations: 0,
                extra: BTreeMap::new(),
            },
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.paper.title = title.into();
        self
    }

    pub fn authors(mut self, authors: Vec<String>) -> Self {
        self.paper.authors = authors;
        self
    }

    /// Empty or whitespace-only abstracts keep the [`NO_ABSTRACT`] placeholder.
    pub fn abstract_text(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        if !text.trim().is_empty() {
            self.paper.abstract_text = text;
        }
        self
    }

    pub fn doi(mut self, doi: impl Into<String>) -> Self {
        self.paper.doi = doi.into();
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.paper.url = url.into();
        self
    }

    pub fn pdf_url(mut self, pdf_url: impl Into<String>) -> Self {
        self.paper.pdf_url = pdf_url.into();
        self
    }

    pub fn published_date(mut self, date: Option<NaiveDateTime>) -> Self {
        self.paper.published_date = date;
        self
    }

    pub fn updated_date(mut self, date: Option<NaiveDateTime>) -> Self {
        self.paper.updated_date = date;
        self
    }

    pub fn categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paper.categories.extend(
            categories
                .into_iter()
                .map(Into::into)
                .filter(|c: &String| !c.trim().is_empty()),
        );
        self
    }

    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paper.keywords.extend(
            keywords
                .into_iter()
                .map(Into::into)
                .filter(|k: &String| !k.trim().is_empty()),
        );
        self
    }

    pub fn citations(mut self, citations: u64) -> Self {
        self.paper.citations = citations;
        self
    }

    /// Null values are dropped rather than stored.
    pub fn extra(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        let value = value.into();
        if !value.is_null() {
            self.paper.extra.insert(key.to_string(), value);
        }
        self
    }

    /// Returns `None` when the record has neither a title nor any locator.
    pub fn build(self) -> Option<Paper> {
        let p = &self.paper;
        let has_title = !p.title.trim().is_empty();
        let has_locator = [&p.url, &p.pdf_url, &p.doi]
            .iter()
            .any(|s| !s.trim().is_empty());
        if has_title || has_locator {
            Some(self.paper)
        } else {
            None
        }
    }
}
