pub mod arxiv;
pub mod jstor;
pub mod pmc;
pub mod scopus;
pub mod semantic_scholar;
pub mod shodhganga;
pub mod zenodo;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use thiserror::Error;

use crate::paper::Paper;
use crate::pdf;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("{reason}")]
    Unsupported { platform: String, reason: String },
    #[error("No PDF available: {0}")]
    NoPdf(String),
    #[error("Missing API key: {0}")]
    MissingKey(String),
    #[error("Unknown platform: {name}. Available platforms are: {}", .available.join(", "))]
    UnknownPlatform { name: String, available: Vec<String> },
    #[error("Browser error: {0}")]
    Browser(String),
    #[error("PDF extraction error: {0}")]
    PdfExtraction(String),
}

impl SourceError {
    pub fn unsupported(platform: &str, reason: impl Into<String>) -> Self {
        Self::Unsupported {
            platform: platform.to_string(),
            reason: reason.into(),
        }
    }

    /// Capability gaps are expected outcomes, not failures of the call itself.
    pub fn is_capability_gap(&self) -> bool {
        matches!(self, Self::Unsupported { .. } | Self::NoPdf(_))
    }
}

/// Platform-specific search refinements. Adapters ignore the ones they cannot express.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct SearchFilters {
    #[schemars(description = "Year or range: '2025', '2016-2020', '2010-', '-2015'")]
    #[serde(default)]
    pub year: Option<String>,
    #[schemars(description = "Community slug (Zenodo)")]
    #[serde(default)]
    pub community: Option<String>,
    #[schemars(description = "Resource type such as 'publication' or 'dataset' (Zenodo)")]
    #[serde(default)]
    pub resource_type: Option<String>,
    #[schemars(description = "Resource subtype such as 'article' (Zenodo)")]
    #[serde(default)]
    pub subtype: Option<String>,
    #[schemars(description = "Author names to match (Zenodo)")]
    #[serde(default)]
    pub creators: Vec<String>,
    #[schemars(description = "Keywords to match (Zenodo)")]
    #[serde(default)]
    pub keywords: Vec<String>,
    #[schemars(description = "Sort field, e.g. 'mostrecent' or 'bestmatch' (Zenodo)")]
    #[serde(default)]
    pub sort: Option<String>,
    #[schemars(description = "Sort order: 'asc' or 'desc' (Zenodo)")]
    #[serde(default)]
    pub order: Option<String>,
}

impl SearchFilters {
    pub fn with_year(mut self, year: &str) -> Self {
        self.year = Some(year.to_string());
        self
    }
}

/// The retrieval contract every platform adapter implements.
///
/// `search` only fails when the call could not be attempted at all; transport
/// and per-record problems are logged and whatever was collected is returned.
#[async_trait]
pub trait PaperSource: Send + Sync {
    /// Platform key, also stamped on every [`Paper::source`].
    fn name(&self) -> &str;

    async fn search(
        &self,
        query: &str,
        max_results: u32,
        filters: &SearchFilters,
    ) -> Result<Vec<Paper>, SourceError>;

    /// Save the paper's PDF under `save_path` (created if missing) and return the file path.
    async fn download_pdf(&self, paper_id: &str, save_path: &Path) -> Result<PathBuf, SourceError>;

    /// Download and extract full text. Capability gaps come back as an
    /// explanatory message instead of an error.
    async fn read_paper(&self, paper_id: &str, save_path: &Path) -> Result<String, SourceError> {
        let pdf_path = match self.download_pdf(paper_id, save_path).await {
            Ok(path) => path,
            Err(e) if e.is_capability_gap() => {
                tracing::info!("{}: full text unavailable for {}: {}", self.name(), paper_id, e);
                return Ok(e.to_string());
            }
            Err(e) => return Err(e),
        };
        let text = pdf::extract_text(&pdf_path).await?;
        if text.trim().is_empty() {
            return Ok(format!(
                "PDF downloaded to {}, but unable to extract readable text",
                pdf_path.display()
            ));
        }
        Ok(text)
    }
}
