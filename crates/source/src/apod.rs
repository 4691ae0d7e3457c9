//! NASA Astronomy Picture of the Day client.
//!
//! Two requests per fetch: the metadata endpoint (`?api_key=..&date=..`) for
//! the entry, then the image URL it names. Entries whose `media_type` is not
//! `image` (videos, interactive pages) are rejected.

use crate::error::{SourceError, SourceResult};
use crate::traits::ArtifactSource;
use almanac_core::config::SourceConfig;
use almanac_core::{Artifact, ImageDate};
use async_trait::async_trait;
use reqwest::Url;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use tracing::instrument;

/// Longest upstream error body kept in a [`SourceError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// Subset of the APOD entry we need.
#[derive(Debug, Deserialize)]
struct ApodEntry {
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    hdurl: Option<String>,
}

impl ApodEntry {
    fn image_url(&self, prefer_hd: bool) -> Option<&str> {
        let hd = self.hdurl.as_deref().filter(|_| prefer_hd);
        hd.or(self.url.as_deref()).filter(|u| !u.trim().is_empty())
    }
}

/// APOD-backed artifact source.
#[derive(Clone)]
pub struct ApodClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
    prefer_hd: bool,
}

impl std::fmt::Debug for ApodClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApodClient")
            .field("base_url", &self.base_url.as_str())
            .field("prefer_hd", &self.prefer_hd)
            .finish_non_exhaustive()
    }
}

impl ApodClient {
    /// Build a client from source configuration.
    pub fn new(config: &SourceConfig) -> SourceResult<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| SourceError::InvalidUrl(format!("{}: {e}", config.base_url)))?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("almanac/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url,
            api_key: config.api_key.clone(),
            prefer_hd: config.prefer_hd,
        })
    }

    fn entry_url(&self, date: ImageDate) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("api_key", &self.api_key)
            .append_pair("date", &date.to_string());
        url
    }

    async fn fetch_entry(&self, date: ImageDate) -> SourceResult<ApodEntry> {
        let response = self.http.get(self.entry_url(date)).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        serde_json::from_str(&body).map_err(|e| SourceError::Decode(format!("APOD entry: {e}")))
    }

    async fn download(&self, image_url: &str) -> SourceResult<Artifact> {
        let url = Url::parse(image_url)
            .map_err(|e| SourceError::InvalidUrl(format!("{image_url}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SourceError::InvalidUrl(format!(
                "unsupported scheme in image URL: {image_url}"
            )));
        }

        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(SourceError::Decode(format!("empty image body from {image_url}")));
        }

        Ok(Artifact::new(bytes, content_type).with_source_url(image_url))
    }
}

fn status_error(status: reqwest::StatusCode, body: &str) -> SourceError {
    let mut body = body.trim().to_string();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    SourceError::Status {
        status: status.as_u16(),
        body,
    }
}

#[async_trait]
impl ArtifactSource for ApodClient {
    #[instrument(skip(self, date), fields(source = "apod", date = %date))]
    async fn fetch(&self, date: ImageDate) -> SourceResult<Artifact> {
        let entry = self.fetch_entry(date).await?;

        if let Some(media_type) = entry.media_type.as_deref()
            && media_type != "image"
        {
            return Err(SourceError::UnsupportedMedia {
                date,
                media_type: media_type.to_string(),
            });
        }

        let image_url = entry
            .image_url(self.prefer_hd)
            .ok_or_else(|| SourceError::Decode(format!("APOD entry for {date} has no url")))?;

        let artifact = self.download(image_url).await?;
        tracing::debug!(
            url = image_url,
            size = artifact.len(),
            content_type = artifact.content_type.as_deref().unwrap_or("<none>"),
            "downloaded image"
        );
        Ok(artifact)
    }

    fn source_name(&self) -> &'static str {
        "apod"
    }
}
