//! HTTP refresh fetches against the production backend.
//!
//! Every request is cache-busted: `Cache-Control: no-cache`, `Pragma:
//! no-cache` and a `_t` millisecond query parameter. Responses use the
//! backend's `{success, data, message}` envelope.
//!
//! | Identity | Endpoint |
//! |---|---|
//! | `Line` | `GET /api/display/tv?code=&factory=&index=` |
//! | `Team`, `Factory` | `GET /api/production/data?factory=&line=&team=` |
//! | `Center` | `GET /api/display/center-tv?factory=&line=` |

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use linewatch_common::{Identity, LineType, Snapshot, detect_line_type, lenient};

use crate::errors::FetchError;
use crate::wire::flatten_metrics;

const DEFAULT_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl BackendConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Result of a successful fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Data(Snapshot),
    /// The backend answered but has nothing for this identity.
    Empty,
}

/// One entry of the production-line directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineEntry {
    #[serde(deserialize_with = "lenient::text")]
    pub code: String,
    #[serde(rename = "nhaMay", default, deserialize_with = "lenient::text")]
    pub factory: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub line: String,
    #[serde(rename = "to", default, deserialize_with = "lenient::text")]
    pub team: String,
    #[serde(rename = "percentagePPH", default, deserialize_with = "lenient::text")]
    pub pph_pct: String,
    #[serde(rename = "percentageHT", default, deserialize_with = "lenient::text")]
    pub completion_pct: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub rft: String,
    #[serde(rename = "lineType", default)]
    pub line_type: Option<LineType>,
}

impl LineEntry {
    /// Declared type, else inferred from the code.
    pub fn kind(&self) -> LineType {
        self.line_type.unwrap_or_else(|| detect_line_type(&self.code))
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    lines: Option<Vec<LineEntry>>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

fn default_success() -> bool {
    true
}

impl Envelope {
    fn into_data(self) -> Result<Value, FetchError> {
        if !self.success {
            return Err(FetchError::Backend(
                self.message
                    .or(self.error)
                    .unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(self.data)
    }
}

/// The record inside `data`, if there is one. Arrays yield their first
/// element.
fn record_of(data: Value) -> Option<Value> {
    match data {
        Value::Object(obj) if !obj.is_empty() => Some(Value::Object(obj)),
        Value::Array(items) => items.into_iter().find(|v| v.as_object().is_some_and(|o| !o.is_empty())),
        _ => None,
    }
}

fn query_for(identity: &Identity) -> (&'static str, Vec<(&'static str, String)>) {
    match identity {
        Identity::Line {
            code,
            factory,
            index,
        } => {
            let mut q = vec![("code", code.clone())];
            if let Some(f) = factory {
                q.push(("factory", f.clone()));
            }
            if let Some(i) = index {
                q.push(("index", i.to_string()));
            }
            ("/api/display/tv", q)
        }
        Identity::Team {
            factory,
            line,
            team,
        } => (
            "/api/production/data",
            vec![
                ("factory", factory.clone()),
                ("line", line.clone()),
                ("team", team.clone()),
            ],
        ),
        Identity::Center { factory, line } => (
            "/api/display/center-tv",
            vec![("factory", factory.clone()), ("line", line.clone())],
        ),
        Identity::Factory { factory } => {
            ("/api/production/data", vec![("factory", factory.clone())])
        }
    }
}

#[derive(Clone)]
pub struct BackendClient {
    config: BackendConfig,
    http: reqwest::Client,
}

impl BackendClient {
    pub fn new(config: BackendConfig) -> Result<Self, FetchError> {
        if !(config.base_url.starts_with("http://") || config.base_url.starts_with("https://")) {
            return Err(FetchError::InvalidUrl(config.base_url));
        }
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("linewatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| FetchError::Transport {
                url: config.base_url.clone(),
                source,
            })?;
        Ok(Self { config, http })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, FetchError> {
        let url = format!("{}{}", self.config.base_url, path);
        let cache_buster = chrono::Utc::now().timestamp_millis().to_string();
        debug!(%url, "fetching");

        let resp = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .header("Cache-Control", "no-cache")
            .header("Pragma", "no-cache")
            .query(query)
            .query(&[("_t", cache_buster)])
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            warn!(%url, status = status.as_u16(), "backend returned an error status");
            return Err(FetchError::Status {
                status: status.as_u16(),
                url,
            });
        }
        let body = resp.bytes().await.map_err(|source| FetchError::Transport {
            url: url.clone(),
            source,
        })?;
        serde_json::from_slice(&body).map_err(|source| FetchError::Decode { url, source })
    }

    async fn get_envelope(&self, path: &str, query: &[(&str, String)]) -> Result<Envelope, FetchError> {
        let url = format!("{}{}", self.config.base_url, path);
        let value = self.get_json(path, query).await?;
        serde_json::from_value(value).map_err(|source| FetchError::Decode { url, source })
    }

    /// Full snapshot for `identity`.
    pub async fn fetch_snapshot(&self, identity: &Identity) -> Result<FetchOutcome, FetchError> {
        let (path, query) = query_for(identity);
        let url = format!("{}{}", self.config.base_url, path);
        let data = self.get_envelope(path, &query).await?.into_data()?;
        let Some(record) = record_of(data) else {
            debug!(%identity, "backend has no data");
            return Ok(FetchOutcome::Empty);
        };
        let snapshot: Snapshot = serde_json::from_value(flatten_metrics(&record))
            .map_err(|source| FetchError::Decode { url, source })?;
        Ok(FetchOutcome::Data(snapshot))
    }

    /// Aggregate view of one factory line.
    pub async fn fetch_center(&self, factory: &str, line: &str) -> Result<FetchOutcome, FetchError> {
        let identity = Identity::Center {
            factory: factory.to_string(),
            line: line.to_string(),
        };
        self.fetch_snapshot(&identity).await
    }

    /// Production-line directory. `None` lists every type.
    pub async fn fetch_lines(&self, line_type: Option<LineType>) -> Result<Vec<LineEntry>, FetchError> {
        let kind = line_type.map_or_else(|| "ALL".to_string(), |t| t.to_string());
        let query = [("type", kind), ("includeQSL", "true".to_string())];
        let url = format!("{}/api/display/lines", self.config.base_url);
        let mut envelope = self.get_envelope("/api/display/lines", &query).await?;
        if let Some(lines) = envelope.lines.take() {
            return if envelope.success {
                Ok(lines)
            } else {
                Err(FetchError::Backend(
                    envelope.message.unwrap_or_else(|| "unknown error".to_string()),
                ))
            };
        }
        match envelope.into_data()? {
            Value::Null => Ok(Vec::new()),
            data => {
                let lines = data.get("lines").cloned().unwrap_or(data);
                serde_json::from_value(lines).map_err(|source| FetchError::Decode { url, source })
            }
        }
    }

    /// Raw health document.
    pub async fn health(&self) -> Result<Value, FetchError> {
        self.get_json("/api/production/health", &[]).await
    }
}
