//! CKAN open data catalog: dataset metadata lookup and trusted-origin downloads.

use std::pin::Pin;

use bytes::Bytes;
use civicetl_shared::{CivicError, HttpConfig, OpenDataConfig, Result};
use futures::{Stream, StreamExt, stream};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, instrument};
use url::Url;

use crate::http::{build_pinned_client, send_with_retry};

/// Raw bytes of a dataset download, chunked as they arrive.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

// ---------------------------------------------------------------------------
// ResourceDescriptor
// ---------------------------------------------------------------------------

/// One downloadable resource listed under a catalog package.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResourceDescriptor {
    pub name: String,
    pub url: String,
    pub format: String,
    #[serde(default)]
    pub is_preview: Option<bool>,
}

impl ResourceDescriptor {
    /// A complete CSV export, as opposed to a preview or another format.
    pub fn is_full_csv(&self) -> bool {
        !self.is_preview.unwrap_or(false)
            && self.format.eq_ignore_ascii_case("csv")
            && self.url.ends_with(".csv")
    }
}

#[derive(Debug, Deserialize)]
struct PackageShow {
    result: PackageResult,
}

#[derive(Debug, Deserialize)]
struct PackageResult {
    #[serde(default)]
    resources: Vec<ResourceDescriptor>,
}

// ---------------------------------------------------------------------------
// OpenDataClient
// ---------------------------------------------------------------------------

/// Client for a CKAN catalog. Downloads are restricted to the catalog's origin.
pub struct OpenDataClient {
    client: Client,
    base_url: Url,
    http: HttpConfig,
}

impl OpenDataClient {
    /// Create a client for the configured catalog.
    pub fn new(config: &OpenDataConfig, http: &HttpConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            CivicError::config(format!("invalid open data URL '{}': {e}", config.base_url))
        })?;
        Ok(Self {
            client: build_pinned_client(http, base_url.origin())?,
            base_url,
            http: http.clone(),
        })
    }

    /// List the resources published under `catalog_id`.
    #[instrument(skip(self))]
    pub async fn describe_dataset(&self, catalog_id: &str) -> Result<Vec<ResourceDescriptor>> {
        let mut url = self
            .base_url
            .join("/api/3/action/package_show")
            .map_err(|e| CivicError::config(e.to_string()))?;
        url.query_pairs_mut().append_pair("id", catalog_id);

        let response = send_with_retry(&self.http, || {
            self.client
                .get(url.clone())
                .header(reqwest::header::ACCEPT, "application/json")
        })
        .await
        .map_err(|e| CivicError::SourceUnavailable(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CivicError::SourceUnavailable(format!(
                "catalog lookup for {catalog_id} failed with HTTP {status}"
            )));
        }

        let package: PackageShow = response.json().await.map_err(|e| {
            CivicError::SourceUnavailable(format!("catalog returned invalid JSON: {e}"))
        })?;

        info!(
            catalog_id,
            resources = package.result.resources.len(),
            "dataset described"
        );
        Ok(package.result.resources)
    }

    /// Stream a dataset's bytes. The URL must share the catalog's origin.
    #[instrument(skip(self))]
    pub async fn stream_dataset(&self, url: &str) -> Result<ByteStream> {
        let parsed = Url::parse(url)
            .map_err(|e| CivicError::SourceUnavailable(format!("invalid dataset URL {url}: {e}")))?;
        if parsed.origin() != self.base_url.origin() {
            return Err(CivicError::SourceUnavailable(format!(
                "dataset URL {url} is not on the open data origin"
            )));
        }

        let response = send_with_retry(&self.http, || self.client.get(parsed.clone()))
            .await
            .map_err(|e| CivicError::SourceUnavailable(format!("{url}: {e}")))?;

        if response.url().origin() != self.base_url.origin() {
            return Err(CivicError::SourceUnavailable(format!(
                "dataset {url} was served from {}, off the open data origin",
                response.url()
            )));
        }
        let status = response.status();
        if !status.is_success() {
            return Err(CivicError::SourceUnavailable(format!(
                "dataset {url} failed with HTTP {status}"
            )));
        }
        if response.content_length() == Some(0) {
            return Err(CivicError::SourceUnavailable(format!(
                "dataset {url} has no response body"
            )));
        }

        // Chunked responses carry no length, so wait for the first bytes.
        let mut body = Box::pin(response.bytes_stream());
        let first = loop {
            match body.next().await {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => break chunk,
                Some(Err(e)) => {
                    return Err(CivicError::SourceUnavailable(format!(
                        "{url}: failed to read body: {e}"
                    )));
                }
                None => {
                    return Err(CivicError::SourceUnavailable(format!(
                        "dataset {url} has no response body"
                    )));
                }
            }
        };

        debug!(url, "dataset stream opened");
        let owned_url = url.to_string();
        let rest = body.map(move |chunk| {
            chunk.map_err(|e| {
                CivicError::SourceUnavailable(format!("{owned_url}: failed to read body: {e}"))
            })
        });
        Ok(Box::pin(stream::once(async move { Ok(first) }).chain(rest)))
    }
}
