//! JSON bodies of the sync endpoints, shared by the server and the HTTP client.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// `GET /api/workout/sync`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResponse {
  pub plans: BTreeMap<String, Value>,
  pub logs: BTreeMap<String, Value>,
  pub server_time: String,
}

/// `POST /api/workout/sync` request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
  pub client_id: String,
  #[serde(default)]
  pub logs: BTreeMap<String, Value>,
}

/// `POST /api/workout/sync` response body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
  pub success: bool,
  pub applied_logs: Vec<String>,
  pub server_time: String,
}

/// `POST /api/workout/register`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
  pub status: String,
  pub client_id: String,
  pub server_time: String,
}

/// `GET /api/workout/status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
  pub last_sync_time: Option<String>,
}
