//! Client side of the sync wire protocol.

use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration as StdDuration;
use tracing::debug;
use url::Url;

use super::wire::{DownloadResponse, RegisterResponse, StatusResponse, UploadRequest, UploadResponse};
use crate::models::{
  date_key, format_timestamp, parse_date, parse_timestamp, Plan, ValidationError, WorkoutLog,
};

const REQUEST_TIMEOUT: StdDuration = StdDuration::from_secs(30);
const PROBE_TIMEOUT: StdDuration = StdDuration::from_secs(5);

/// ---------------------------------------------------------------------------
/// Error Handling
/// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
  #[error("Server unreachable: {0}")]
  Unreachable(String),

  #[error("HTTP request failed: {0}")]
  Request(#[from] reqwest::Error),

  #[error("Server returned {status}: {body}")]
  Status { status: u16, body: String },

  #[error("Invalid server response: {0}")]
  Protocol(String),

  #[error("Invalid server URL: {0}")]
  Url(#[from] url::ParseError),
}

impl TransportError {
  /// True when the failure means "no connection" rather than a bad exchange
  pub fn is_connectivity(&self) -> bool {
    match self {
      Self::Unreachable(_) => true,
      Self::Request(e) => e.is_connect() || e.is_timeout(),
      _ => false,
    }
  }

  fn from_request(e: reqwest::Error) -> Self {
    if e.is_connect() || e.is_timeout() {
      Self::Unreachable(e.to_string())
    } else {
      Self::Request(e)
    }
  }
}

impl From<ValidationError> for TransportError {
  fn from(e: ValidationError) -> Self {
    Self::Protocol(e.to_string())
  }
}

impl Serialize for TransportError {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    serializer.serialize_str(&self.to_string())
  }
}

/// ---------------------------------------------------------------------------
/// Typed Exchanges
/// ---------------------------------------------------------------------------

/// A parsed download
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadBatch {
  pub plans: BTreeMap<NaiveDate, Plan>,
  pub logs: BTreeMap<NaiveDate, WorkoutLog>,
  /// Next watermark
  pub server_time: DateTime<Utc>,
}

impl DownloadBatch {
  pub fn from_wire(body: &DownloadResponse) -> Result<Self, ValidationError> {
    let mut plans = BTreeMap::new();
    for (raw_date, plan) in &body.plans {
      plans.insert(parse_date("plans", raw_date)?, Plan::from_json(plan)?);
    }
    let mut logs = BTreeMap::new();
    for (raw_date, log) in &body.logs {
      let field = format!("logs.{}", raw_date);
      logs.insert(parse_date(&field, raw_date)?, WorkoutLog::from_json(log, &field)?);
    }
    Ok(Self {
      plans,
      logs,
      server_time: parse_timestamp("serverTime", &body.server_time)?,
    })
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadReceipt {
  pub applied: Vec<NaiveDate>,
  pub server_time: DateTime<Utc>,
}

impl UploadReceipt {
  pub fn from_wire(body: &UploadResponse) -> Result<Self, ValidationError> {
    let applied = body
      .applied_logs
      .iter()
      .map(|d| parse_date("appliedLogs", d))
      .collect::<Result<Vec<_>, _>>()?;
    Ok(Self {
      applied,
      server_time: parse_timestamp("serverTime", &body.server_time)?,
    })
  }
}

/// How a [`SyncAgent`](super::agent::SyncAgent) reaches the server
pub trait SyncTransport: Send + Sync {
  /// Cheap reachability check made before each cycle
  fn is_online(&self) -> impl Future<Output = bool> + Send;

  /// Register (or re-register) `client_id`; returns the id the server uses
  fn register(
    &self,
    client_id: &str,
    client_name: Option<&str>,
  ) -> impl Future<Output = Result<String, TransportError>> + Send;

  fn upload(
    &self,
    client_id: &str,
    logs: &BTreeMap<NaiveDate, WorkoutLog>,
  ) -> impl Future<Output = Result<UploadReceipt, TransportError>> + Send;

  fn download(
    &self,
    client_id: &str,
    since: Option<DateTime<Utc>>,
  ) -> impl Future<Output = Result<DownloadBatch, TransportError>> + Send;
}

/// ---------------------------------------------------------------------------
/// HTTP Transport
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpTransport {
  client: Client,
  base_url: Url,
}

impl HttpTransport {
  pub fn new(base_url: &str) -> Result<Self, TransportError> {
    let mut base_url = Url::parse(base_url)?;
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }
    let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
    Ok(Self { client, base_url })
  }

  fn endpoint(&self, path: &str) -> Result<Url, TransportError> {
    Ok(self.base_url.join(path)?)
  }

  async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, TransportError> {
    let response = request.send().await.map_err(TransportError::from_request)?;
    if !response.status().is_success() {
      let status = response.status().as_u16();
      let body = response.text().await.unwrap_or_default();
      return Err(TransportError::Status { status, body });
    }
    Ok(response)
  }
}

impl SyncTransport for HttpTransport {
  async fn is_online(&self) -> bool {
    let Ok(url) = self.endpoint("api/workout/status") else {
      return false;
    };
    match self.client.get(url).timeout(PROBE_TIMEOUT).send().await {
      Ok(response) => response.status().is_success(),
      Err(e) => {
        debug!("status probe failed: {}", e);
        false
      }
    }
  }

  async fn register(
    &self,
    client_id: &str,
    client_name: Option<&str>,
  ) -> Result<String, TransportError> {
    let mut url = self.endpoint("api/workout/register")?;
    {
      let mut query = url.query_pairs_mut();
      query.append_pair("client_id", client_id);
      if let Some(name) = client_name {
        query.append_pair("client_name", name);
      }
    }
    let response = self.send(self.client.post(url)).await?;
    let body: RegisterResponse = response.json().await?;
    Ok(body.client_id)
  }

  async fn upload(
    &self,
    client_id: &str,
    logs: &BTreeMap<NaiveDate, WorkoutLog>,
  ) -> Result<UploadReceipt, TransportError> {
    let url = self.endpoint("api/workout/sync")?;
    let payload = UploadRequest {
      client_id: client_id.to_string(),
      logs: logs
        .iter()
        .map(|(date, log)| (date_key(*date), log.to_json()))
        .collect(),
    };
    let response = self.send(self.client.post(url).json(&payload)).await?;
    let body: UploadResponse = response.json().await?;
    if !body.success {
      return Err(TransportError::Protocol("server reported upload failure".into()));
    }
    Ok(UploadReceipt::from_wire(&body)?)
  }

  async fn download(
    &self,
    client_id: &str,
    since: Option<DateTime<Utc>>,
  ) -> Result<DownloadBatch, TransportError> {
    let mut url = self.endpoint("api/workout/sync")?;
    {
      let mut query = url.query_pairs_mut();
      query.append_pair("client_id", client_id);
      if let Some(since) = since {
        query.append_pair("last_sync_time", &format_timestamp(since));
      }
    }
    let response = self.send(self.client.get(url)).await?;
    let body: DownloadResponse = response.json().await?;
    Ok(DownloadBatch::from_wire(&body)?)
  }
}

impl HttpTransport {
  /// Server's last accepted upload time
  pub async fn status(&self) -> Result<Option<DateTime<Utc>>, TransportError> {
    let url = self.endpoint("api/workout/status")?;
    let response = self.send(self.client.get(url)).await?;
    let body: StatusResponse = response.json().await?;
    Ok(match body.last_sync_time {
      Some(raw) => Some(parse_timestamp("lastSyncTime", &raw)?),
      None => None,
    })
  }
}
