//! In-memory [`Fetch`] used by the provisioning tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::fetch::Fetch;
use crate::error::FetchError;

/// Routes URLs to canned JSON documents and file bodies; anything else is a 404.
#[derive(Default)]
pub(crate) struct FakeFetch {
    json: HashMap<String, Value>,
    files: HashMap<String, Vec<u8>>,
    failing: HashMap<String, u16>,
    requests: Mutex<Vec<(String, Vec<(String, String)>)>>,
    downloads: Mutex<Vec<String>>,
}

impl FakeFetch {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn json(mut self, url: impl Into<String>, body: Value) -> Self {
        self.json.insert(url.into(), body);
        self
    }

    pub(crate) fn file(mut self, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.files.insert(url.into(), body.into());
        self
    }

    pub(crate) fn failing(mut self, url: impl Into<String>, status: u16) -> Self {
        self.failing.insert(url.into(), status);
        self
    }

    /// URLs passed to `download`, in call order.
    pub(crate) fn downloads(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }

    /// Query parameters of the last JSON request to `url`.
    pub(crate) fn last_query(&self, url: &str) -> Option<Vec<(String, String)>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(u, _)| u == url)
            .map(|(_, q)| q.clone())
    }

    fn status(&self, url: &str) -> Result<(), FetchError> {
        let status = self.failing.get(url).copied().unwrap_or(404);
        Err(FetchError::Status {
            url: url.to_string(),
            status,
        })
    }
}

#[async_trait]
impl Fetch for FakeFetch {
    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value, FetchError> {
        self.requests.lock().unwrap().push((
            url.to_string(),
            query.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        ));
        match self.json.get(url) {
            Some(body) if !self.failing.contains_key(url) => Ok(body.clone()),
            _ => self.status(url).map(|()| Value::Null),
        }
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        self.downloads.lock().unwrap().push(url.to_string());
        match self.files.get(url) {
            Some(body) if !self.failing.contains_key(url) => {
                std::fs::write(dest, body).map_err(|source| FetchError::Io {
                    path: dest.to_path_buf(),
                    source,
                })?;
                Ok(body.len() as u64)
            }
            _ => self.status(url).map(|()| 0),
        }
    }
}
