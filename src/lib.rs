//! Search, download, and read academic papers from heterogeneous platforms
//! through one adapter contract.
//!
//! ```no_run
//! # async fn demo() -> Result<(), paper_search_hub::SourceError> {
//! use paper_search_hub::{get_searcher, Config, SearchFilters};
//!
//! let config = Config::from_env();
//! let pmc = get_searcher("pmc", &config)?;
//! for paper in pmc.search("crispr off-target", 5, &SearchFilters::default()).await? {
//!     println!("{} {}", paper.paper_id(), paper.title());
//! }
//! # Ok(())
//! # }
//! ```

pub mod apis;
pub mod browser;
pub mod config;
pub mod http;
pub mod hub;
pub mod normalize;
pub mod paper;
pub mod pdf;
pub mod xml;

pub use apis::{PaperSource, SearchFilters, SourceError};
pub use config::Config;
pub use hub::{get_searcher, Platform};
pub use paper::Paper;
