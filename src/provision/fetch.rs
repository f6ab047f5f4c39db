//! # HTTP access to external catalogs.
//!
//! [`Fetch`] is the seam between the provisioning pipeline and the network:
//! resolvers and package catalogs issue JSON queries through it, and artifact
//! files are streamed to disk with [`Fetch::download`]. [`HttpFetch`] is the
//! `reqwest` implementation; tests use in-memory fakes.
//!
//! ## Download rules
//! - The body is streamed into a uniquely named `<dest>.<random>.part` sibling
//!   and renamed onto `dest` only after the last chunk is flushed. A failed
//!   transfer never leaves a truncated artifact behind, and concurrent
//!   downloads to the same `dest` never share a partial file.
//! - Non-2xx statuses are errors ([`FetchError::Status`]).

use std::path::Path;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use crate::config::Config;
use crate::error::FetchError;

/// Network access used by resolvers, package catalogs and the installer.
#[async_trait]
pub trait Fetch: Send + Sync + 'static {
    /// GETs `url` with `query` parameters and parses the body as JSON.
    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value, FetchError>;

    /// Streams `url` into `dest`; returns the number of bytes written.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, FetchError>;
}

/// GETs `url` and deserializes the JSON body into `T`.
pub async fn get_typed<T: DeserializeOwned>(
    fetch: &dyn Fetch,
    url: &str,
    query: &[(&str, String)],
) -> Result<T, FetchError> {
    let value = fetch.get_json(url, query).await?;
    serde_json::from_value(value).map_err(|e| FetchError::Parse {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

/// Creates a fresh partial file next to `dest`; it is deleted when dropped
/// unless persisted.
fn partial_file(dest: &Path) -> std::io::Result<tempfile::NamedTempFile> {
    let dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut prefix = dest.file_name().unwrap_or_default().to_os_string();
    prefix.push(".");
    tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".part")
        .tempfile_in(dir)
}

/// [`Fetch`] over a shared `reqwest` client.
#[derive(Clone, Debug)]
pub struct HttpFetch {
    client: reqwest::Client,
}

impl HttpFetch {
    /// Builds a client with the configured timeout and user agent.
    pub fn new(cfg: &Config) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(15))
            .timeout(cfg.http_timeout)
            .user_agent(cfg.user_agent.clone())
            .build()
            .map_err(|e| FetchError::Transport {
                url: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn send(&self, url: &str, query: &[(&str, String)]) -> Result<reqwest::Response, FetchError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| transport(url, &e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

fn transport(url: &str, e: &reqwest::Error) -> FetchError {
    FetchError::Transport {
        url: url.to_string(),
        reason: e.to_string(),
    }
}

#[async_trait]
impl Fetch for HttpFetch {
    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value, FetchError> {
        let response = self.send(url, query).await?;
        response.json::<Value>().await.map_err(|e| FetchError::Parse {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        let mut response = self.send(url, &[]).await?;
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| FetchError::Io { path, source }
        };

        let (file, part) = partial_file(dest).map_err(io_err(dest))?.into_parts();
        let mut file = tokio::fs::File::from_std(file);
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await.map_err(|e| transport(url, &e))? {
            file.write_all(&chunk).await.map_err(io_err(&*part))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(io_err(&*part))?;
        drop(file);

        // an early return above drops `part`, which deletes the partial file
        part.persist(dest).map_err(|e| FetchError::Io {
            path: dest.to_path_buf(),
            source: e.error,
        })?;
        tracing::debug!(url, dest = %dest.display(), bytes = written, "download complete");
        Ok(written)
    }
}
