use std::collections::HashSet;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde_json::json;

use crate::error::{LoreError, Result};
use crate::models::UploadKind;

#[derive(Debug, Clone, PartialEq)]
pub struct CreateSource {
    pub title: String,
    pub content: String,
    pub kind: UploadKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Remote store of mirrored sources. Deleting an id the remote no longer has
/// reports `NotFound` instead of failing; whether that is tolerable is the
/// caller's decision.
pub trait SourceStore {
    fn create_source(&self, request: &CreateSource) -> Result<String>;
    fn delete_source(&self, id: &str) -> Result<DeleteOutcome>;
    fn list_live(&self) -> Result<HashSet<String>>;
}

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
}

impl RemoteConfig {
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("LOREKEEPER_REMOTE_URL").ok()?;
        let timeout_ms = std::env::var("LOREKEEPER_REMOTE_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(30_000);

        Some(Self {
            base_url: normalize_base_url(&base_url),
            api_key: std::env::var("LOREKEEPER_REMOTE_API_KEY").ok(),
            timeout_ms,
        })
    }
}

#[derive(Clone)]
pub struct HttpSourceStore {
    config: RemoteConfig,
    http: Client,
}

impl std::fmt::Debug for HttpSourceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSourceStore")
            .field("base_url", &self.config.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpSourceStore {
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &config.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {key}")).map_err(|e| {
                LoreError::Validation(format!("invalid LOREKEEPER_REMOTE_API_KEY: {e}"))
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        let http = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self { config, http })
    }

    #[must_use]
    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }
}

impl SourceStore for HttpSourceStore {
    fn create_source(&self, request: &CreateSource) -> Result<String> {
        let url = format!("{}/sources", self.config.base_url);
        let body = build_create_request(request);
        let resp = self.http.post(url).json(&body).send()?;
        if !resp.status().is_success() {
            return Err(LoreError::RemoteRejected(format!(
                "source create failed for {} with status {}",
                request.title,
                resp.status()
            )));
        }
        let value = resp.json::<serde_json::Value>()?;
        parse_create_response(&value)
    }

    fn delete_source(&self, id: &str) -> Result<DeleteOutcome> {
        let url = format!("{}/sources/{id}", self.config.base_url);
        let resp = self.http.delete(url).send()?;
        if resp.status().is_success() {
            return Ok(DeleteOutcome::Deleted);
        }
        if resp.status().as_u16() == 404 {
            return Ok(DeleteOutcome::NotFound);
        }
        Err(LoreError::RemoteRejected(format!(
            "source delete failed for {id} with status {}",
            resp.status()
        )))
    }

    fn list_live(&self) -> Result<HashSet<String>> {
        let url = format!("{}/sources", self.config.base_url);
        let resp = self.http.get(url).send()?;
        if !resp.status().is_success() {
            return Err(LoreError::RemoteRejected(format!(
                "source list failed with status {}",
                resp.status()
            )));
        }
        let value = resp.json::<serde_json::Value>()?;
        parse_list_response(&value)
    }
}

/// File-extension policy for what can be mirrored and how. Unknown
/// extensions get no kind at all and are skipped upstream.
#[must_use]
pub fn upload_kind_for_path(path: &str) -> Option<UploadKind> {
    let ext = path.rsplit('.').next()?.to_lowercase();
    match ext.as_str() {
        "md" | "markdown" | "txt" | "text" => Some(UploadKind::Text),
        "pdf" | "png" | "jpg" | "jpeg" | "gif" | "zip" => Some(UploadKind::Binary),
        _ => None,
    }
}

pub(crate) fn build_create_request(request: &CreateSource) -> serde_json::Value {
    json!({
        "title": request.title,
        "content": request.content,
        "kind": request.kind.as_str(),
    })
}

pub(crate) fn parse_create_response(response: &serde_json::Value) -> Result<String> {
    response
        .pointer("/id")
        .or_else(|| response.pointer("/result/id"))
        .and_then(|value| value.as_str())
        .map(ToString::to_string)
        .ok_or_else(|| LoreError::Validation("invalid source create response".to_string()))
}

pub(crate) fn parse_list_response(response: &serde_json::Value) -> Result<HashSet<String>> {
    let entries = response
        .get("sources")
        .or_else(|| response.get("result"))
        .and_then(|value| value.as_array())
        .ok_or_else(|| LoreError::Validation("invalid source list response".to_string()))?;

    let mut ids = HashSet::new();
    for entry in entries {
        let id = entry
            .as_str()
            .or_else(|| entry.get("id").and_then(|value| value.as_str()));
        if let Some(id) = id {
            ids.insert(id.to_string());
        }
    }
    Ok(ids)
}

fn normalize_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}
