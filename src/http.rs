use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::HeaderMap;
use reqwest::{Client, Response};
use tokio::io::AsyncWriteExt;

use crate::apis::SourceError;
use crate::config::DelayRange;

pub const DEFAULT_USER_AGENT: &str = concat!("paper-search-hub/", env!("CARGO_PKG_VERSION"));

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Desktop browser identities rotated by adapters that talk to HTML front ends.
pub const BROWSER_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:125.0) Gecko/20100101 Firefox/125.0",
];

pub fn random_user_agent() -> &'static str {
    BROWSER_USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(DEFAULT_USER_AGENT)
}

pub fn build_client(user_agent: &str, timeout: Duration, headers: HeaderMap) -> Result<Client, SourceError> {
    Ok(Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .connect_timeout(CONNECT_TIMEOUT.min(timeout))
        .default_headers(headers)
        .build()?)
}

/// Turn a non-2xx response into [`SourceError::Status`].
pub fn ensure_success(resp: Response) -> Result<Response, SourceError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(SourceError::Status {
            url: resp.url().to_string(),
            status: status.as_u16(),
        })
    }
}

/// Sleep for a random duration inside `range`.
pub async fn polite_pause(range: DelayRange) {
    let delay = if range.max > range.min {
        rand::thread_rng().gen_range(range.min..=range.max)
    } else {
        range.min
    };
    if !delay.is_zero() {
        tracing::debug!("Pausing {:?} before next request", delay);
        tokio::time::sleep(delay).await;
    }
}

/// Replace characters that are unsafe in file names (`10.1/abc` gives `10.1_abc`).
pub fn safe_file_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect()
}

/// Stream `url` into `dir/file_name`, creating `dir` first.
///
/// A file that was opened but not fully written is removed before the error
/// is returned.
pub async fn download_to_file(
    client: &Client,
    url: &str,
    dir: &Path,
    file_name: &str,
) -> Result<PathBuf, SourceError> {
    tokio::fs::create_dir_all(dir).await?;
    let dest = dir.join(file_name);

    let resp = ensure_success(client.get(url).send().await?)?;
    let mut file = tokio::fs::File::create(&dest).await?;
    let written = copy_body(resp, &mut file).await;
    drop(file);

    match written {
        Ok(bytes) => {
            tracing::info!("Downloaded {} bytes from {} to {}", bytes, url, dest.display());
            Ok(dest)
        }
        Err(e) => {
            if let Err(rm) = tokio::fs::remove_file(&dest).await {
                tracing::warn!("Could not remove partial download {}: {}", dest.display(), rm);
            }
            Err(e)
        }
    }
}

async fn copy_body(mut resp: Response, file: &mut tokio::fs::File) -> Result<u64, SourceError> {
    let mut written = 0u64;
    while let Some(chunk) = resp.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}
