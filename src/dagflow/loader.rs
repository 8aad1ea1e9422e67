// SPDX-License-Identifier: MIT

//! Template loader - fetches template documents from URLs or local files

use serde_json::Value;
use std::path::{Path, PathBuf};
use url::Url;

use crate::dagflow::EngineError;

/// Loads template documents as JSON values
#[derive(Clone, Default)]
pub struct TemplateLoader {
    client: reqwest::Client,
}

impl TemplateLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a template from an `http(s)` URL, a `file://` URL or a plain path
    pub async fn load(&self, location: &str) -> Result<Value, EngineError> {
        let content = match Url::parse(location) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {
                self.fetch(url).await?
            }
            Ok(url) if url.scheme() == "file" => {
                let path = url.to_file_path().map_err(|_| {
                    EngineError::template_fetch(format!("invalid file URL '{}'", location))
                })?;
                Self::read(&path).await?
            }
            _ => Self::read(&PathBuf::from(location)).await?,
        };
        Self::parse(&content)
    }

    async fn fetch(&self, url: Url) -> Result<String, EngineError> {
        log::debug!("Fetching template from {}", url);
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| EngineError::template_fetch(format!("{}: {}", url, e)))?;
        response
            .text()
            .await
            .map_err(|e| EngineError::template_fetch(format!("{}: {}", url, e)))
    }

    async fn read(path: &Path) -> Result<String, EngineError> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| EngineError::template_fetch(format!("{}: {}", path.display(), e)))
    }

    /// Parse a template document as JSON, falling back to YAML
    pub fn parse(content: &str) -> Result<Value, EngineError> {
        let value: Value = match serde_json::from_str(content) {
            Ok(value) => value,
            Err(_) => serde_yaml::from_str(content).map_err(|e| {
                EngineError::template_fetch(format!("unparseable template: {}", e))
            })?,
        };
        if !value.is_object() {
            return Err(EngineError::template_fetch("template must be a mapping"));
        }
        Ok(value)
    }
}
