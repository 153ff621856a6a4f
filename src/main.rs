use std::path::PathBuf;
use std::sync::Arc;

use paper_search_hub::apis::zenodo::ZenodoClient;
use paper_search_hub::{get_searcher, Config, PaperSource, Platform, SearchFilters, SourceError};
use rmcp::{
    handler::server::tool::ToolRouter, handler::server::wrapper::Parameters,
    model::*, tool, tool_handler, tool_router,
    transport::stdio, ErrorData as McpError, ServerHandler, ServiceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

// ── Parameter structs ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
struct SearchPapersParams {
    #[schemars(description = "Platform key (see list_platforms), e.g. \"arxiv\" or \"pmc\"")]
    platform: String,
    #[schemars(description = "Search query string")]
    query: String,
    #[schemars(description = "Maximum results to return (default 10, max 100)")]
    max_results: Option<u32>,
    #[schemars(description = "Optional platform-specific filters")]
    filters: Option<SearchFilters>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct PaperParams {
    #[schemars(description = "Platform key the paper was found on")]
    platform: String,
    #[schemars(description = "Platform-scoped paper ID as returned by search_papers")]
    paper_id: String,
    #[schemars(description = "Directory to save the PDF in (default from PAPER_SEARCH_DOWNLOAD_DIR)")]
    save_path: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CommunitySearchParams {
    #[schemars(description = "Free-text query over community title, slug and description")]
    query: Option<String>,
    #[schemars(description = "Maximum communities to return (default 20, max 100)")]
    max_results: Option<u32>,
    #[schemars(description = "Sort field, e.g. 'newest' or 'bestmatch'")]
    sort: Option<String>,
    #[schemars(description = "Sort order: 'asc' or 'desc'")]
    order: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ZenodoRecordParams {
    #[schemars(description = "Zenodo record ID (numeric) or record URL")]
    paper_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CreatorSearchParams {
    #[schemars(description = "Creator (author) name")]
    creator: String,
    #[schemars(description = "Maximum results to return (default 10, max 100)")]
    max_results: Option<u32>,
    #[schemars(description = "Optional community, year, resource type and sort filters")]
    filters: Option<SearchFilters>,
}

#[derive(Debug, Serialize)]
struct PlatformStatus {
    platform: &'static str,
    ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<String>,
}

// ── Server ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct PaperHubServer {
    tool_router: ToolRouter<Self>,
    config: Arc<Config>,
}

fn to_json<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(format!("Serialization error: {}", e), None))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

fn lookup_error(e: SourceError) -> McpError {
    McpError::invalid_params(e.to_string(), None)
}

#[tool_router]
impl PaperHubServer {
    pub fn new(config: Config) -> Self {
        tracing::info!(
            "Serving {} platforms, download_dir={}",
            Platform::ALL.len(),
            config.download_dir.display()
        );
        Self {
            tool_router: Self::tool_router(),
            config: Arc::new(config),
        }
    }

    fn searcher(&self, platform: &str) -> Result<Box<dyn PaperSource>, McpError> {
        get_searcher(platform, &self.config).map_err(lookup_error)
    }

    fn zenodo(&self) -> Result<ZenodoClient, McpError> {
        ZenodoClient::new(&self.config).map_err(lookup_error)
    }

    fn save_dir(&self, save_path: Option<String>) -> PathBuf {
        save_path
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| self.config.download_dir.clone())
    }

    #[tool(description = "List platform keys and whether each can be used with the current configuration")]
    async fn list_platforms(&self) -> Result<CallToolResult, McpError> {
        let statuses: Vec<PlatformStatus> = Platform::ALL
            .into_iter()
            .map(|p| match p.searcher(&self.config) {
                Ok(_) => PlatformStatus {
                    platform: p.key(),
                    ready: true,
                    note: None,
                },
                Err(e) => PlatformStatus {
                    platform: p.key(),
                    ready: false,
                    note: Some(e.to_string()),
                },
            })
            .collect();
        to_json(&statuses)
    }

    #[tool(description = "Search one platform for papers. Returns normalized paper records.")]
    async fn search_papers(
        &self,
        Parameters(params): Parameters<SearchPapersParams>,
    ) -> Result<CallToolResult, McpError> {
        let searcher = self.searcher(&params.platform)?;
        let max = params.max_results.unwrap_or(10).min(100);
        let filters = params.filters.unwrap_or_default();
        let papers = searcher
            .search(&params.query, max, &filters)
            .await
            .map_err(|e| McpError::internal_error(format!("Search failed: {}", e), None))?;
        to_json(&papers)
    }

    #[tool(description = "Download a paper's PDF and return the saved file path")]
    async fn download_paper(
        &self,
        Parameters(params): Parameters<PaperParams>,
    ) -> Result<CallToolResult, McpError> {
        let searcher = self.searcher(&params.platform)?;
        let dir = self.save_dir(params.save_path);
        match searcher.download_pdf(&params.paper_id, &dir).await {
            Ok(path) => Ok(CallToolResult::success(vec![Content::text(path.display().to_string())])),
            Err(e) if e.is_capability_gap() => Ok(CallToolResult::success(vec![Content::text(e.to_string())])),
            Err(e) => Err(McpError::internal_error(format!("Download failed: {}", e), None)),
        }
    }

    #[tool(description = "Download a paper and return its extracted full text")]
    async fn read_paper(
        &self,
        Parameters(params): Parameters<PaperParams>,
    ) -> Result<CallToolResult, McpError> {
        let searcher = self.searcher(&params.platform)?;
        let dir = self.save_dir(params.save_path);
        let text = searcher
            .read_paper(&params.paper_id, &dir)
            .await
            .map_err(|e| McpError::internal_error(format!("Read failed: {}", e), None))?;
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    #[tool(description = "Search Zenodo communities by title, slug or description")]
    async fn search_zenodo_communities(
        &self,
        Parameters(params): Parameters<CommunitySearchParams>,
    ) -> Result<CallToolResult, McpError> {
        let max = params.max_results.unwrap_or(20).min(100);
        let communities = self
            .zenodo()?
            .search_communities(
                params.query.as_deref().unwrap_or_default(),
                max,
                params.sort.as_deref(),
                params.order.as_deref(),
            )
            .await
            .map_err(|e| McpError::internal_error(format!("Community search failed: {}", e), None))?;
        to_json(&communities)
    }

    #[tool(description = "Fetch the raw Zenodo record JSON by record ID or URL")]
    async fn get_zenodo_record_details(
        &self,
        Parameters(params): Parameters<ZenodoRecordParams>,
    ) -> Result<CallToolResult, McpError> {
        let record = self
            .zenodo()?
            .get_record_details(&params.paper_id)
            .await
            .map_err(|e| McpError::internal_error(format!("Record lookup failed: {}", e), None))?;
        to_json(&record)
    }

    #[tool(description = "List the files attached to a Zenodo record with sizes, checksums and download links")]
    async fn list_zenodo_files(
        &self,
        Parameters(params): Parameters<ZenodoRecordParams>,
    ) -> Result<CallToolResult, McpError> {
        let files = self
            .zenodo()?
            .list_files(&params.paper_id)
            .await
            .map_err(|e| McpError::internal_error(format!("File listing failed: {}", e), None))?;
        to_json(&files)
    }

    #[tool(description = "Search Zenodo records by a single creator name")]
    async fn search_zenodo_by_creator(
        &self,
        Parameters(params): Parameters<CreatorSearchParams>,
    ) -> Result<CallToolResult, McpError> {
        let max = params.max_results.unwrap_or(10).min(100);
        let filters = params.filters.unwrap_or_default();
        let papers = self
            .zenodo()?
            .search_by_creator(&params.creator, max, &filters)
            .await
            .map_err(|e| McpError::internal_error(format!("Search failed: {}", e), None))?;
        to_json(&papers)
    }
}

#[tool_handler]
impl ServerHandler for PaperHubServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Search, download, and read papers from arXiv, PubMed Central, Zenodo, \
                 Scopus, Semantic Scholar, Shodhganga, and JSTOR. Pick a platform with \
                 list_platforms, then call search_papers, download_paper, or read_paper."
                    .into(),
            ),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!("Starting paper-search-hub MCP server");

    let server = PaperHubServer::new(Config::from_env());
    let service = server.serve(stdio()).await?;
    service.waiting().await?;

    Ok(())
}
