//! Chromium sessions over the DevTools protocol via chromiumoxide.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;

use super::{BrowserLauncher, BrowserSession};
use crate::apis::SourceError;
use crate::config::Config;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Launches a local Chromium, headless unless configured otherwise.
pub struct ChromiumLauncher {
    headless: bool,
    executable: Option<PathBuf>,
}

impl ChromiumLauncher {
    pub fn new(config: &Config) -> Self {
        Self {
            headless: config.headless,
            executable: config.chrome_executable.clone(),
        }
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn open(&self, user_agent: &str) -> Result<Box<dyn BrowserSession>, SourceError> {
        let mut builder = BrowserConfig::builder()
            .arg(format!("--user-agent={}", user_agent))
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions");
        if !self.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder
            .build()
            .map_err(|e| SourceError::Browser(format!("failed to build browser config: {}", e)))?;

        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| SourceError::Browser(format!("failed to launch Chromium: {}", e)))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("chromium handler: {}", e);
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                let _ = browser.close().await;
                handler_task.abort();
                return Err(SourceError::Browser(format!("failed to open page: {}", e)));
            }
        };
        tracing::debug!("chromium: session opened (headless={})", self.headless);

        Ok(Box::new(ChromiumSession {
            browser,
            page,
            handler_task,
        }))
    }
}

pub struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
}

impl ChromiumSession {
    async fn eval<T: DeserializeOwned>(&self, script: String) -> Result<T, SourceError> {
        self.page
            .evaluate(script)
            .await
            .map_err(|e| SourceError::Browser(format!("script failed: {}", e)))?
            .into_value()
            .map_err(|e| SourceError::Browser(format!("unexpected script result: {:?}", e)))
    }
}

/// JSON-encode a string so it can be spliced into a script as a literal.
fn js_string(s: &str) -> String {
    serde_json::Value::from(s).to_string()
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<(), SourceError> {
        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(SourceError::Browser(format!("navigation to {} failed: {}", url, e))),
            Err(_) => Err(SourceError::Browser(format!(
                "navigation to {} timed out after {:?}",
                url, timeout
            ))),
        }
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<bool, SourceError> {
        let script = format!("document.querySelector({}) !== null", js_string(selector));
        let poll = async {
            loop {
                if self.eval::<bool>(script.clone()).await? {
                    return Ok::<_, SourceError>(());
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        };
        match tokio::time::timeout(timeout, poll).await {
            Ok(result) => result.map(|_| true),
            Err(_) => Ok(false),
        }
    }

    async fn inner_texts(&self, selector: &str) -> Result<Vec<String>, SourceError> {
        self.eval(format!(
            "Array.from(document.querySelectorAll({}), el => (el.innerText || el.textContent || '').trim())",
            js_string(selector)
        ))
        .await
    }

    async fn attribute_values(&self, selector: &str, attribute: &str) -> Result<Vec<Option<String>>, SourceError> {
        self.eval(format!(
            "Array.from(document.querySelectorAll({}), el => el.getAttribute({}))",
            js_string(selector),
            js_string(attribute)
        ))
        .await
    }

    async fn close(self: Box<Self>) {
        let ChromiumSession {
            mut browser,
            page,
            handler_task,
        } = *self;
        if let Err(e) = page.close().await {
            tracing::debug!("chromium: page close failed: {}", e);
        }
        if let Err(e) = browser.close().await {
            tracing::debug!("chromium: browser close failed: {}", e);
        }
        let _ = browser.wait().await;
        handler_task.abort();
        tracing::debug!("chromium: session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_string_escapes_quotes() {
        assert_eq!(js_string(r#"[data-qa^="x"]"#), r#""[data-qa^=\"x\"]""#);
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_chromium_bulk_queries() {
        let launcher = ChromiumLauncher::new(&Config::default());
        let mut session = launcher.open("paper-search-hub-test").await.unwrap();
        session
            .goto(
                "data:text/html,<p class='a'>one</p><p class='a' data-x='2'>two</p>",
                Duration::from_secs(10),
            )
            .await
            .unwrap();

        assert!(session.wait_for_selector("p.a", Duration::from_secs(5)).await.unwrap());
        assert!(!session.wait_for_selector("#missing", Duration::from_millis(600)).await.unwrap());
        assert_eq!(session.inner_texts("p.a").await.unwrap(), vec!["one", "two"]);
        assert_eq!(
            session.attribute_values("p.a", "data-x").await.unwrap(),
            vec![None, Some("2".to_string())]
        );
        session.close().await;
    }
}
