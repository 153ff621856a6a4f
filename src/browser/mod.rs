//! Headless-browser seam for sources whose result pages are rendered client-side.
//!
//! Adapters drive a [`BrowserSession`] through a handful of coarse operations;
//! each bulk query costs one round trip to the browser regardless of how many
//! elements match.

pub mod chromium;

use std::time::Duration;

use async_trait::async_trait;

use crate::apis::SourceError;

/// Starts browser sessions. One session per search call.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn open(&self, user_agent: &str) -> Result<Box<dyn BrowserSession>, SourceError>;
}

/// A single page in a running browser.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Navigate and wait for the load to finish, failing after `timeout`.
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<(), SourceError>;

    /// `Ok(false)` when nothing matches `selector` within `timeout`.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<bool, SourceError>;

    /// Rendered text of every element matching `selector`, in document order.
    async fn inner_texts(&self, selector: &str) -> Result<Vec<String>, SourceError>;

    /// Value of `attribute` on every element matching `selector`, in document order.
    async fn attribute_values(&self, selector: &str, attribute: &str) -> Result<Vec<Option<String>>, SourceError>;

    /// Tear down the page and its browser.
    async fn close(self: Box<Self>);
}
