//! HTTP client for the ModelDB web API and the GitHub mirror.

use base64::Engine;
use modeldb_core::{GithubSource, ModelId, ModelIdentity};
use serde::de::Deserializer;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::FetchConfig;
use crate::error::{FetchError, Result};

/// ModelDB object attribute carrying the zipped model package.
pub const ARCHIVE_ATTRIBUTE_ID: i64 = 23;

/// One ModelDB object: identity plus the decoded package archive.
#[derive(Debug, Clone)]
pub struct ModelObject {
    pub identity: ModelIdentity,
    pub archive: Vec<u8>,
}

#[derive(Debug, Deserialize)]
struct ObjectJson {
    object_id: ModelId,
    #[serde(deserialize_with = "lenient_string")]
    object_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    object_created: String,
    #[serde(default, deserialize_with = "lenient_string")]
    object_ver_date: String,
    #[serde(default)]
    object_attribute_values: Vec<AttributeValue>,
}

#[derive(Debug, Deserialize)]
struct AttributeValue {
    attribute_id: i64,
    #[serde(default)]
    value: serde_json::Value,
}

/// Strings, numbers and null all land as text.
fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// ModelDB + GitHub client with retry on transient failures.
pub struct ModelDbClient {
    config: FetchConfig,
    http: reqwest::Client,
}

impl ModelDbClient {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("modeldb-ci/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Ids of every NEURON model published on ModelDB.
    pub async fn list_model_ids(&self) -> Result<Vec<ModelId>> {
        let response = self.get_with_retry(&self.config.models_url).await?;
        let ids: Vec<ModelId> = response.json().await?;
        debug!(count = ids.len(), "listed ModelDB models");
        Ok(ids)
    }

    /// Fetch one ModelDB object and decode its archive attribute.
    pub async fn fetch_object(&self, id: ModelId) -> Result<ModelObject> {
        let url = self
            .config
            .download_url
            .replace(modeldb_core::config::MODEL_ID_PLACEHOLDER, &id.to_string());
        let response = self.get_with_retry(&url).await?;
        let object: ObjectJson = serde_json::from_slice(&response.bytes().await?)?;

        let content = object
            .object_attribute_values
            .iter()
            .find(|attr| attr.attribute_id == ARCHIVE_ATTRIBUTE_ID)
            .and_then(|attr| attr.value.get("file_content"))
            .and_then(|content| content.as_str())
            .ok_or(FetchError::MissingArchive(id))?;
        let cleaned: String = content.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let archive = base64::engine::general_purpose::STANDARD.decode(cleaned)?;

        Ok(ModelObject {
            identity: ModelIdentity::new(
                object.object_id,
                object.object_name,
                object.object_created,
                object.object_ver_date,
            ),
            archive,
        })
    }

    /// Zipball URL of the model's GitHub mirror for `source`.
    pub fn github_zipball_url(&self, id: ModelId, source: &GithubSource) -> Result<String> {
        if let GithubSource::Ref(name) = source {
            if name.contains("..") || name.starts_with('/') || name.chars().any(char::is_whitespace) {
                return Err(FetchError::InvalidGithubRef {
                    model_id: id,
                    reason: format!("unusable ref {name:?}"),
                });
            }
        }
        Ok(format!(
            "{}/{}/zipball{}",
            self.config.github_url,
            id,
            source.zipball_suffix()
        ))
    }

    pub async fn fetch_github_zipball(&self, id: ModelId, source: &GithubSource) -> Result<Vec<u8>> {
        let url = self.github_zipball_url(id, source)?;
        let response = self.get_with_retry(&url).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// GET with exponential backoff on retryable failures.
    async fn get_with_retry(&self, url: &str) -> Result<reqwest::Response> {
        let mut retries = 0;
        loop {
            match self.get_once(url).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && retries < self.config.max_retries => {
                    retries += 1;
                    let backoff = self.config.backoff(retries);
                    warn!(
                        url = %url,
                        error = %e,
                        retry = retries,
                        max_retries = self.config.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        "retrying request"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_once(&self, url: &str) -> Result<reqwest::Response> {
        let response = self.http.get(url).send().await?;
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
