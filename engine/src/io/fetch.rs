//! URL fetch collaborator (blocking HTTP with a bounded timeout and body size).

use std::io::Read;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::blocking::Client;
use tracing::{debug, instrument};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
    pub truncated: bool,
}

pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str, max_bytes: usize) -> Result<FetchedPage>;
}

/// Only `http` and `https` URLs are fetched.
pub fn check_scheme(url: &str) -> Result<()> {
    let lower = url.trim().to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        Ok(())
    } else {
        Err(anyhow!("only http and https URLs can be fetched"))
    }
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("engine/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("create http client")?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    #[instrument(skip(self))]
    fn fetch(&self, url: &str, max_bytes: usize) -> Result<FetchedPage> {
        check_scheme(url)?;
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("GET {url}"))?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut buf = Vec::new();
        response
            .take(max_bytes as u64 + 1)
            .read_to_end(&mut buf)
            .with_context(|| format!("read body of {url}"))?;
        let truncated = buf.len() > max_bytes;
        buf.truncate(max_bytes);
        debug!(status = status.as_u16(), bytes = buf.len(), truncated, "fetched url");

        if !status.is_success() {
            return Err(anyhow!("GET {url} returned {status}"));
        }
        Ok(FetchedPage {
            status: status.as_u16(),
            content_type,
            body: String::from_utf8_lossy(&buf).into_owned(),
            truncated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_http_schemes_pass() {
        assert!(check_scheme("https://example.com").is_ok());
        assert!(check_scheme("HTTP://example.com").is_ok());
        assert!(check_scheme("file:///etc/passwd").is_err());
        assert!(check_scheme("ftp://example.com").is_err());
    }
}
