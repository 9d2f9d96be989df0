//! Content fetcher adapter.
//!
//! Turns a configured [`Source`] into a [`RawDocument`] of UTF-8 text.
//! The [`Fetcher`] trait is the seam the refresh orchestrator depends on;
//! [`SourceFetcher`] is the production implementation and dispatches on
//! [`SourceKind`] in one place:
//!
//! | Kind | Module | Behaviour |
//! |------|--------|-----------|
//! | `static_url` | [`web`] | GET, HTML → paragraphs of readable text |
//! | `dynamic_json` | [`json`] | GET with headers, JSON → `a > b: value` lines |
//! | `local_file` | [`local`] | read file; PDF/DOCX/HTML/JSON converted, else UTF-8 |
//!
//! HTTP targets pass an SSRF guard ([`is_safe_url`]) before any request is
//! made, and again on every redirect hop.

pub mod json;
pub mod local;
pub mod web;

use std::net::IpAddr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{StatusCode, Url};

use chatvat_core::models::{RawDocument, Source, SourceKind};

use crate::config::FetchConfig;

/// Maximum redirects followed per request.
const MAX_REDIRECTS: usize = 5;

/// Fetches the current content of a source.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, source: &Source) -> Result<RawDocument>;
}

/// HTTP and filesystem fetcher used in production.
pub struct SourceFetcher {
    client: reqwest::Client,
    allow_private_hosts: bool,
}

impl SourceFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let allow_private_hosts = config.allow_private_hosts;
        let redirect = reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                attempt.error("too many redirects")
            } else if !allow_private_hosts && !is_safe_url(attempt.url()) {
                attempt.error("redirect to a private or loopback host refused")
            } else {
                attempt.follow()
            }
        });

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("chatvat/", env!("CARGO_PKG_VERSION")))
            .redirect(redirect)
            .build()?;

        Ok(Self {
            client,
            allow_private_hosts,
        })
    }

    /// GET `source.target` with its headers. Returns the body and the
    /// response content type.
    async fn get(&self, source: &Source) -> Result<(String, String)> {
        let url = Url::parse(&source.target)
            .with_context(|| format!("invalid URL: {}", source.target))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("unsupported URL scheme: {}", url.scheme());
        }
        if !self.allow_private_hosts && !is_safe_url(&url) {
            bail!("refusing to fetch private or loopback host: {}", url);
        }

        let response = self
            .client
            .get(url)
            .headers(header_map(source)?)
            .send()
            .await
            .map_err(|e| anyhow!("request failed: {}", e))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            bail!(
                "authentication failed (HTTP {}); check the configured headers",
                status.as_u16()
            );
        }
        if !status.is_success() {
            bail!("HTTP {}", status);
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response.text().await?;
        Ok((body, content_type))
    }
}

#[async_trait]
impl Fetcher for SourceFetcher {
    async fn fetch(&self, source: &Source) -> Result<RawDocument> {
        let started = std::time::Instant::now();
        let (text, content_type) = match source.kind {
            SourceKind::StaticUrl => {
                let (body, content_type) = self.get(source).await?;
                let text = if content_type.contains("html") || looks_like_html(&body) {
                    web::html_to_text(&body)
                } else {
                    body
                };
                web::check_word_count(&text)?;
                (text, "text/html".to_string())
            }
            SourceKind::DynamicJson => {
                let (body, _) = self.get(source).await?;
                let value: serde_json::Value =
                    serde_json::from_str(&body).context("response is not valid JSON")?;
                (json::flatten_json(&value), "application/json".to_string())
            }
            SourceKind::LocalFile => {
                let path = std::path::PathBuf::from(&source.target);
                local::read_local(&path).await?
            }
        };

        tracing::debug!(
            source = %source.id,
            bytes = text.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fetched source"
        );

        Ok(RawDocument {
            source_id: source.id.clone(),
            bytes: text.into_bytes(),
            content_type,
            fetched_at: Utc::now(),
        })
    }
}

fn header_map(source: &Source) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in &source.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid header name: {}", name))?;
        // Never echo the value.
        let mut value = HeaderValue::from_str(value)
            .map_err(|_| anyhow!("invalid value for header {}", name))?;
        value.set_sensitive(true);
        headers.insert(name, value);
    }
    Ok(headers)
}

fn looks_like_html(body: &str) -> bool {
    let head: String = body.trim_start().chars().take(256).collect();
    let head = head.to_ascii_lowercase();
    head.starts_with("<!doctype html") || head.contains("<html")
}

/// `false` for loopback, unspecified, private and link-local hosts
/// (including `localhost`).
pub fn is_safe_url(url: &Url) -> bool {
    match url.host() {
        None => false,
        Some(url::Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            domain != "localhost" && !domain.ends_with(".localhost")
        }
        Some(url::Host::Ipv4(ip)) => is_public_ip(IpAddr::V4(ip)),
        Some(url::Host::Ipv6(ip)) => is_public_ip(IpAddr::V6(ip)),
    }
}

fn is_public_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !(v4.is_loopback()
                || v4.is_unspecified()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast())
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_public_ip(IpAddr::V4(mapped));
            }
            let first = v6.segments()[0];
            let unique_local = (first & 0xfe00) == 0xfc00;
            let link_local = (first & 0xffc0) == 0xfe80;
            !(v6.is_loopback() || v6.is_unspecified() || unique_local || link_local)
        }
    }
}
