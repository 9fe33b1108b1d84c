//! Timing provider client.
//! POSTs `chrono=<circuit>&p=<unix ms>&s=0&t=init` to the provider URL and turns the raw
//! text answer into a `LiveSnapshot` through a `SnapshotParser`.
//! No retries here: the poller's next tick is the retry.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ProviderConfig;
use crate::snapshot::{Comment, DriverRow, LiveSnapshot, Status};
use crate::source::{SnapshotSource, SourceError};

/// Turns a raw provider body into a snapshot.
pub trait SnapshotParser: Send + Sync {
    fn parse(&self, body: &str, fetched_at: i64) -> Result<LiveSnapshot, SourceError>;
}

// *************** Provider payload types ***************

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawPayload {
    status: Option<String>,
    timestamp: Option<i64>,
    #[serde(alias = "grid", alias = "rows")]
    drivers: Vec<RawDriver>,
    #[serde(alias = "messages")]
    comments: Option<Vec<RawComment>>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawDriver {
    #[serde(alias = "pos", alias = "rank")]
    position: Value,
    #[serde(alias = "no", alias = "number")]
    kart: Value,
    #[serde(alias = "driver", alias = "team")]
    name: Value,
    sectors: Option<Vec<Value>>,
    #[serde(alias = "last", alias = "llp")]
    last_lap: Value,
    #[serde(alias = "best", alias = "blp")]
    best_lap: Value,
    #[serde(alias = "int", alias = "interval")]
    gap: Value,
    #[serde(alias = "lap", alias = "tlp")]
    laps: Value,
    /// Catches per-sector columns such as `s1`, `s2`, `s3`.
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawComment {
    time: Value,
    #[serde(alias = "message", alias = "msg")]
    text: Value,
}

/// Provider cells come as strings or bare numbers; both become the provider's text.
fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

fn sector_columns(extra: &BTreeMap<String, Value>) -> Vec<String> {
    let mut columns: Vec<(u32, &Value)> = extra
        .iter()
        .filter_map(|(key, value)| {
            let idx = key.strip_prefix('s').or_else(|| key.strip_prefix('S'))?;
            idx.parse::<u32>().ok().map(|n| (n, value))
        })
        .collect();
    columns.sort_by_key(|(n, _)| *n);
    columns.into_iter().map(|(_, v)| cell(v)).collect()
}

/// Default parser for the provider's JSON payload. Field names are matched loosely and
/// anything missing is left blank.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSnapshotParser;

impl SnapshotParser for JsonSnapshotParser {
    fn parse(&self, body: &str, fetched_at: i64) -> Result<LiveSnapshot, SourceError> {
        if body.trim().is_empty() {
            return Ok(LiveSnapshot::empty(Status::NoData, fetched_at));
        }

        let raw: RawPayload =
            serde_json::from_str(body).map_err(|e| SourceError::Parse(e.to_string()))?;

        let mut drivers: Vec<DriverRow> = raw
            .drivers
            .iter()
            .enumerate()
            .map(|(idx, d)| {
                let position = cell(&d.position).parse().unwrap_or(idx as u32 + 1);
                let sectors = match &d.sectors {
                    Some(values) => values.iter().map(cell).collect(),
                    None => sector_columns(&d.extra),
                };
                DriverRow {
                    position,
                    kart: cell(&d.kart),
                    name: cell(&d.name),
                    sectors,
                    last_lap: cell(&d.last_lap),
                    best_lap: cell(&d.best_lap),
                    gap: cell(&d.gap),
                    laps: cell(&d.laps),
                }
            })
            .collect();
        drivers.sort_by_key(|d| d.position);

        let status = match raw.status.as_deref() {
            Some(s) => Status::from_provider(s),
            None if drivers.is_empty() => Status::NoData,
            None => Status::Connected,
        };

        let comments = raw.comments.map(|list| {
            list.iter()
                .map(|c| Comment {
                    time: cell(&c.time),
                    text: cell(&c.text),
                })
                .collect()
        });

        Ok(LiveSnapshot {
            status,
            timestamp: raw.timestamp.unwrap_or(fetched_at),
            drivers,
            comments,
        })
    }
}

// *************** HTTP source ***************

/// Form body for one provider request.
pub fn request_form(circuit: &str, timestamp_ms: i64) -> [(&'static str, String); 4] {
    [
        ("chrono", circuit.to_string()),
        ("p", timestamp_ms.to_string()),
        ("s", "0".to_string()),
        ("t", "init".to_string()),
    ]
}

pub struct HttpSource {
    client: Client,
    url: String,
    circuit: String,
    parser: Arc<dyn SnapshotParser>,
}

impl HttpSource {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Self::with_parser(config, Arc::new(JsonSnapshotParser))
    }

    pub fn with_parser(config: &ProviderConfig, parser: Arc<dyn SnapshotParser>) -> Result<Self> {
        if config.url.trim().is_empty() {
            bail!("Timing provider URL is not configured (set provider.url or KARTDASH_PROVIDER_URL)");
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            url: config.url.clone(),
            circuit: config.circuit.clone(),
            parser,
        })
    }

    /// Raw provider body for `circuit`.
    pub async fn fetch_raw(&self, circuit: &str) -> Result<String, SourceError> {
        if circuit.trim().is_empty() {
            return Err(SourceError::Unavailable("no circuit id given".to_string()));
        }
        let form = request_form(circuit, Utc::now().timestamp_millis());
        let response = self.client.post(&self.url).form(&form).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status { status, body });
        }

        let body = response.text().await?;
        debug!("Provider returned {} bytes for circuit {}", body.len(), circuit);
        Ok(body)
    }

    /// One-shot fetch for any circuit on the same provider.
    pub async fn fetch_circuit(&self, circuit: &str) -> Result<LiveSnapshot, SourceError> {
        let body = self.fetch_raw(circuit).await?;
        self.parser.parse(&body, Utc::now().timestamp_millis())
    }
}

#[async_trait]
impl SnapshotSource for HttpSource {
    async fn fetch(&self) -> Result<LiveSnapshot, SourceError> {
        self.fetch_circuit(&self.circuit).await
    }

    fn describe(&self) -> String {
        format!("{} (circuit {})", self.url, self.circuit)
    }
}

// *************** Tests ***************
