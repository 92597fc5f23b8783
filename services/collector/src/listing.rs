//! Directory listings served as HTML index pages.
//!
//! Both remote trees (disclosure archives and the operator registry) are plain
//! web-server indexes: every child entry is an `<a href>` anchor. Directories
//! end with `/`, files do not.

use anyhow::{Context, Result};
use reqwest::Url;
use scraper::{Html, Selector};
use std::sync::LazyLock;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::config::Config;

static ANCHOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("static anchor selector"));

/// Something that can list the hrefs of a remote directory.
///
/// The HTTP implementation is the only production one; tests swap in
/// synthetic listings.
pub trait ListingSource {
    async fn list(&self, url: &Url) -> Result<Vec<String>>;
}

/// Something that can download a raw file body.
pub trait ArchiveSource {
    async fn download(&self, url: &Url) -> Result<Vec<u8>>;
}

/// Extract every anchor href from an index page, in document order.
pub fn parse_anchor_hrefs(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    document
        .select(&ANCHOR)
        .filter_map(|a| a.value().attr("href"))
        .map(|href| href.trim().to_string())
        .filter(|href| !href.is_empty())
        .collect()
}

/// Last path segment of an href, without query/fragment or trailing slash.
///
/// `"2024/"` -> `"2024"`, `"/FTP/PDA/x/1T2024.zip"` -> `"1T2024.zip"`.
pub fn entry_name(href: &str) -> &str {
    let path = href.split(['?', '#']).next().unwrap_or(href);
    let path = path.trim_end_matches('/');
    path.rsplit('/').next().unwrap_or(path)
}

pub fn is_directory(href: &str) -> bool {
    href.split(['?', '#'])
        .next()
        .map(|p| p.ends_with('/'))
        .unwrap_or(false)
}

/// Resolve an href against the listing it came from.
pub fn resolve(base: &Url, href: &str) -> Result<Url> {
    base.join(href)
        .with_context(|| format!("Cannot resolve link '{}' against {}", href, base))
}

/// HTTP access to the remote trees: listings and raw downloads.
pub struct HttpSource {
    client: reqwest::Client,
    rate_limit: Duration,
}

impl HttpSource {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .user_agent("AnsExpenseCollector/1.0 (coleta de dados abertos)")
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            rate_limit: Duration::from_millis(config.rate_limit_ms),
        })
    }

    /// GET a URL and return the body, failing on any non-success status.
    pub async fn get_bytes(&self, url: &Url) -> Result<Vec<u8>> {
        if !self.rate_limit.is_zero() {
            sleep(self.rate_limit).await;
        }

        debug!(%url, "GET");
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?
            .error_for_status()
            .with_context(|| format!("HTTP error from {}", url))?;

        let bytes = resp
            .bytes()
            .await
            .with_context(|| format!("Failed to read body from {}", url))?;
        Ok(bytes.to_vec())
    }
}

impl ListingSource for HttpSource {
    async fn list(&self, url: &Url) -> Result<Vec<String>> {
        let body = self.get_bytes(url).await?;
        let html = String::from_utf8_lossy(&body);
        Ok(parse_anchor_hrefs(&html))
    }
}

impl ArchiveSource for HttpSource {
    async fn download(&self, url: &Url) -> Result<Vec<u8>> {
        self.get_bytes(url).await
    }
}
