//! Minimal HTTP/1.1 front end for the sync endpoints.
//!
//! One request per connection, JSON in and out, `Connection: close` on every
//! response. Routes:
//!
//! - `GET  /api/workout/sync?client_id=&last_sync_time=`
//! - `POST /api/workout/sync`
//! - `POST /api/workout/register?client_id=&client_name=`
//! - `GET  /api/workout/status`

use serde::Serialize;
use serde_json::{json, Value};
use std::future::Future;
use std::io;
use std::time::Duration as StdDuration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::db::StorageError;
use crate::models::{parse_timestamp, ValidationError};
use crate::sync::wire::UploadRequest;
use crate::sync::{CoordinatorError, SyncCoordinator};

const SYNC_PATH: &str = "/api/workout/sync";
const REGISTER_PATH: &str = "/api/workout/register";
const STATUS_PATH: &str = "/api/workout/status";

const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;
const MAX_HEADERS: usize = 100;
const READ_TIMEOUT: StdDuration = StdDuration::from_secs(30);

/// ---------------------------------------------------------------------------
/// Server Loop
/// ---------------------------------------------------------------------------

/// Serve until the process exits
pub async fn serve(listener: TcpListener, coordinator: SyncCoordinator) -> io::Result<()> {
  serve_until(listener, coordinator, std::future::pending()).await
}

/// Serve until `shutdown` resolves. Connections already accepted finish on
/// their own tasks.
pub async fn serve_until<F>(
  listener: TcpListener,
  coordinator: SyncCoordinator,
  shutdown: F,
) -> io::Result<()>
where
  F: Future<Output = ()>,
{
  info!("sync server listening on {}", listener.local_addr()?);
  tokio::pin!(shutdown);

  loop {
    tokio::select! {
      _ = &mut shutdown => {
        info!("sync server shutting down");
        return Ok(());
      }
      accepted = listener.accept() => {
        let (stream, peer) = match accepted {
          Ok(pair) => pair,
          Err(e) => {
            warn!("accept failed: {}", e);
            continue;
          }
        };
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
          if let Err(e) = handle_connection(stream, &coordinator).await {
            debug!(%peer, "connection closed with error: {}", e);
          }
        });
      }
    }
  }
}

async fn handle_connection(stream: TcpStream, coordinator: &SyncCoordinator) -> io::Result<()> {
  let (read_half, mut write_half) = stream.into_split();
  let mut reader = BufReader::new(read_half);

  let response = match tokio::time::timeout(READ_TIMEOUT, read_request(&mut reader)).await {
    Err(_) => {
      debug!("request read timed out");
      return Ok(());
    }
    Ok(result) => match result? {
      ReadOutcome::Closed => return Ok(()),
      ReadOutcome::Rejected(err) => err.into_response(),
      ReadOutcome::Request(request) => {
        let response = route(&request, coordinator).await;
        info!(
          method = %request.method,
          path = request.url.path(),
          status = response.status,
          "request"
        );
        response
      }
    },
  };

  write_half.write_all(&response.to_bytes()).await?;
  write_half.shutdown().await
}

/// ---------------------------------------------------------------------------
/// Requests & Responses
/// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Request {
  method: String,
  url: Url,
  body: Vec<u8>,
}

impl Request {
  fn query(&self, key: &str) -> Option<String> {
    self
      .url
      .query_pairs()
      .find(|(k, _)| k == key)
      .map(|(_, v)| v.into_owned())
  }
}

#[derive(Debug)]
enum ReadOutcome {
  Request(Request),
  Rejected(ApiError),
  Closed,
}

async fn read_request<R>(reader: &mut R) -> io::Result<ReadOutcome>
where
  R: AsyncBufRead + Unpin,
{
  let mut line = String::new();
  if reader.read_line(&mut line).await? == 0 {
    return Ok(ReadOutcome::Closed);
  }

  let mut parts = line.split_whitespace();
  let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
    return Ok(ReadOutcome::Rejected(ApiError::bad_request("malformed request line")));
  };
  let method = method.to_ascii_uppercase();
  if !target.starts_with('/') {
    return Ok(ReadOutcome::Rejected(ApiError::bad_request("request target must be a path")));
  }
  let url = match Url::parse(&format!("http://localhost{}", target)) {
    Ok(url) => url,
    Err(e) => return Ok(ReadOutcome::Rejected(ApiError::bad_request(e.to_string()))),
  };

  let mut content_length = 0usize;
  let mut header_count = 0;
  loop {
    line.clear();
    if reader.read_line(&mut line).await? == 0 {
      return Ok(ReadOutcome::Rejected(ApiError::bad_request("unexpected end of headers")));
    }
    let header = line.trim_end();
    if header.is_empty() {
      break;
    }
    header_count += 1;
    if header_count > MAX_HEADERS {
      return Ok(ReadOutcome::Rejected(ApiError::bad_request("too many headers")));
    }
    if let Some((name, value)) = header.split_once(':') {
      if name.trim().eq_ignore_ascii_case("content-length") {
        content_length = match value.trim().parse() {
          Ok(n) => n,
          Err(_) => return Ok(ReadOutcome::Rejected(ApiError::bad_request("invalid Content-Length"))),
        };
      }
    }
  }

  if content_length > MAX_BODY_BYTES {
    return Ok(ReadOutcome::Rejected(ApiError::new(
      413,
      "payload_too_large",
      format!("request body exceeds {} bytes", MAX_BODY_BYTES),
    )));
  }
  let mut body = vec![0u8; content_length];
  reader.read_exact(&mut body).await?;

  Ok(ReadOutcome::Request(Request { method, url, body }))
}

#[derive(Debug)]
struct Response {
  status: u16,
  body: Vec<u8>,
}

impl Response {
  fn json<T: Serialize>(body: &T) -> Result<Self, ApiError> {
    let body = serde_json::to_vec(body).map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Self { status: 200, body })
  }

  fn to_bytes(&self) -> Vec<u8> {
    let head = format!(
      "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
      self.status,
      reason_phrase(self.status),
      self.body.len()
    );
    let mut bytes = head.into_bytes();
    bytes.extend_from_slice(&self.body);
    bytes
  }
}

fn reason_phrase(status: u16) -> &'static str {
  match status {
    200 => "OK",
    400 => "Bad Request",
    404 => "Not Found",
    405 => "Method Not Allowed",
    413 => "Payload Too Large",
    422 => "Unprocessable Entity",
    _ => "Internal Server Error",
  }
}

/// ---------------------------------------------------------------------------
/// Error Handling
/// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ApiError {
  status: u16,
  kind: &'static str,
  message: String,
  field: Option<String>,
  value: Option<String>,
}

impl ApiError {
  fn new(status: u16, kind: &'static str, message: impl Into<String>) -> Self {
    Self {
      status,
      kind,
      message: message.into(),
      field: None,
      value: None,
    }
  }

  fn bad_request(message: impl Into<String>) -> Self {
    Self::new(400, "bad_request", message)
  }

  fn unprocessable(message: impl Into<String>) -> Self {
    Self::new(422, "unprocessable", message)
  }

  fn internal(message: impl Into<String>) -> Self {
    Self::new(500, "internal", message)
  }

  fn into_response(self) -> Response {
    let mut error = json!({"kind": self.kind, "message": self.message});
    if let Some(field) = self.field {
      error["field"] = Value::String(field);
    }
    if let Some(value) = self.value {
      error["value"] = Value::String(value);
    }
    let body = json!({"success": false, "error": error});
    Response {
      status: self.status,
      body: body.to_string().into_bytes(),
    }
  }
}

impl From<ValidationError> for ApiError {
  fn from(e: ValidationError) -> Self {
    Self {
      status: 400,
      kind: "validation",
      message: e.to_string(),
      field: Some(e.field),
      value: Some(e.value),
    }
  }
}

impl From<CoordinatorError> for ApiError {
  fn from(e: CoordinatorError) -> Self {
    match e {
      CoordinatorError::Validation(v) | CoordinatorError::Storage(StorageError::Validation(v)) => {
        v.into()
      }
      CoordinatorError::Storage(StorageError::NotFound(what)) => Self::new(404, "not_found", what),
      CoordinatorError::Storage(other) => {
        error!("storage failure: {}", other);
        Self::new(500, "storage", other.to_string())
      }
    }
  }
}

/// ---------------------------------------------------------------------------
/// Routes
/// ---------------------------------------------------------------------------

async fn route(request: &Request, coordinator: &SyncCoordinator) -> Response {
  let path = request.url.path();
  let result = match (request.method.as_str(), path) {
    ("GET", SYNC_PATH) => download(request, coordinator).await,
    ("POST", SYNC_PATH) => upload(request, coordinator).await,
    ("POST", REGISTER_PATH) => register(request, coordinator).await,
    ("GET", STATUS_PATH) => status(coordinator).await,
    (method, SYNC_PATH | REGISTER_PATH | STATUS_PATH) => Err(ApiError::new(
      405,
      "method_not_allowed",
      format!("{} is not allowed on {}", method, path),
    )),
    _ => Err(ApiError::new(404, "not_found", format!("no route for {}", path))),
  };
  result.unwrap_or_else(ApiError::into_response)
}

async fn download(request: &Request, coordinator: &SyncCoordinator) -> Result<Response, ApiError> {
  let client_id = request
    .query("client_id")
    .ok_or_else(|| ApiError::unprocessable("missing query parameter: client_id"))?;
  let since = match request.query("last_sync_time").filter(|s| !s.trim().is_empty()) {
    Some(raw) => Some(parse_timestamp("last_sync_time", &raw)?),
    None => None,
  };
  Response::json(&coordinator.download(&client_id, since).await?)
}

async fn upload(request: &Request, coordinator: &SyncCoordinator) -> Result<Response, ApiError> {
  let payload: UploadRequest = serde_json::from_slice(&request.body)
    .map_err(|e| ApiError::unprocessable(format!("invalid upload body: {}", e)))?;
  Response::json(&coordinator.upload(&payload.client_id, &payload.logs).await?)
}

async fn status(coordinator: &SyncCoordinator) -> Result<Response, ApiError> {
  Response::json(&coordinator.status().await?)
}

async fn register(request: &Request, coordinator: &SyncCoordinator) -> Result<Response, ApiError> {
  let client_id = request.query("client_id");
  let client_name = request.query("client_name");
  Response::json(
    &coordinator
      .register(client_id.as_deref(), client_name.as_deref())
      .await?,
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Storage;
  use crate::models::{date_key, Plan};
  use crate::sync::{HttpTransport, MemoryStore, SyncAgent, SyncOutcome};
  use crate::test_utils::{sample_log_json, sample_plan, setup_test_storage};
  use chrono::Utc;
  use tempfile::TempDir;
  use tokio::sync::oneshot;

  struct TestServer {
    base_url: String,
    storage: Storage,
    shutdown: Option<oneshot::Sender<()>>,
    _dir: TempDir,
  }

  impl TestServer {
    async fn start() -> Self {
      let (storage, dir) = setup_test_storage().await;
      let coordinator = SyncCoordinator::new(storage.reader(), storage.writer(), 30);
      let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
      let base_url = format!("http://{}", listener.local_addr().unwrap());
      let (tx, rx) = oneshot::channel::<()>();
      tokio::spawn(serve_until(listener, coordinator, async move {
        let _ = rx.await;
      }));
      Self {
        base_url,
        storage,
        shutdown: Some(tx),
        _dir: dir,
      }
    }

    fn url(&self, path: &str) -> String {
      format!("{}{}", self.base_url, path)
    }

    async fn stop(mut self) {
      if let Some(tx) = self.shutdown.take() {
        let _ = tx.send(());
      }
      self.storage.close().await;
    }
  }

  #[tokio::test]
  async fn test_read_request_parses_query_and_body() {
    let raw = b"POST /api/workout/sync?client_id=a%20b HTTP/1.1\r\nHost: x\r\nContent-Length: 2\r\n\r\n{}";
    let mut reader = BufReader::new(&raw[..]);
    let ReadOutcome::Request(request) = read_request(&mut reader).await.unwrap() else {
      panic!("expected a request");
    };
    assert_eq!(request.method, "POST");
    assert_eq!(request.url.path(), SYNC_PATH);
    assert_eq!(request.query("client_id").as_deref(), Some("a b"));
    assert_eq!(request.body, b"{}");
  }

  #[tokio::test]
  async fn test_read_request_rejects_oversized_body() {
    let raw = format!("POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n", MAX_BODY_BYTES + 1);
    let mut reader = BufReader::new(raw.as_bytes());
    let outcome = read_request(&mut reader).await.unwrap();
    assert!(matches!(outcome, ReadOutcome::Rejected(ApiError { status: 413, .. })));
  }

  #[tokio::test]
  async fn test_read_request_empty_stream_is_closed() {
    let mut reader = BufReader::new(&b""[..]);
    assert!(matches!(read_request(&mut reader).await.unwrap(), ReadOutcome::Closed));
  }

  #[test]
  fn test_validation_error_body_names_field() {
    let err: ApiError = ValidationError::new("logs.2026-13-01", "2026-13-01", "invalid date").into();
    let response = err.into_response();
    let body: Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(response.status, 400);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"]["kind"], json!("validation"));
    assert_eq!(body["error"]["field"], json!("logs.2026-13-01"));
  }

  #[tokio::test]
  async fn test_endpoints_over_http() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let status: Value = client
      .get(server.url(STATUS_PATH))
      .send()
      .await
      .unwrap()
      .json()
      .await
      .unwrap();
    assert_eq!(status, json!({"lastSyncTime": null}));

    let registered: Value = client
      .post(server.url("/api/workout/register?client_name=Phone"))
      .send()
      .await
      .unwrap()
      .json()
      .await
      .unwrap();
    assert_eq!(registered["status"], json!("ok"));
    let client_id = registered["clientId"].as_str().unwrap().to_string();

    let date = date_key(Utc::now().date_naive());
    let upload = client
      .post(server.url(SYNC_PATH))
      .json(&json!({"clientId": client_id, "logs": {date.clone(): sample_log_json()}}))
      .send()
      .await
      .unwrap();
    assert_eq!(upload.status().as_u16(), 200);
    let upload: Value = upload.json().await.unwrap();
    assert_eq!(upload["appliedLogs"], json!([date]));

    let download: Value = client
      .get(server.url(SYNC_PATH))
      .query(&[("client_id", client_id.as_str())])
      .send()
      .await
      .unwrap()
      .json()
      .await
      .unwrap();
    assert!(download["logs"][&date].is_object());
    assert!(download["serverTime"].is_string());

    let status: Value = client
      .get(server.url(STATUS_PATH))
      .send()
      .await
      .unwrap()
      .json()
      .await
      .unwrap();
    assert_eq!(status["lastSyncTime"], upload["serverTime"]);

    server.stop().await;
  }

  #[tokio::test]
  async fn test_error_statuses() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let missing_id = client.get(server.url(SYNC_PATH)).send().await.unwrap();
    assert_eq!(missing_id.status().as_u16(), 422);

    let bad_date = client
      .post(server.url(SYNC_PATH))
      .json(&json!({"clientId": "abc", "logs": {"02/02/2026": {}}}))
      .send()
      .await
      .unwrap();
    assert_eq!(bad_date.status().as_u16(), 400);
    let body: Value = bad_date.json().await.unwrap();
    assert_eq!(body["error"]["field"], json!("logs.02/02/2026"));

    let bad_watermark = client
      .get(server.url(SYNC_PATH))
      .query(&[("client_id", "abc"), ("last_sync_time", "yesterday")])
      .send()
      .await
      .unwrap();
    assert_eq!(bad_watermark.status().as_u16(), 400);

    let wrong_method = client.delete(server.url(STATUS_PATH)).send().await.unwrap();
    assert_eq!(wrong_method.status().as_u16(), 405);

    let unknown = client.get(server.url("/api/nothing")).send().await.unwrap();
    assert_eq!(unknown.status().as_u16(), 404);

    server.stop().await;
  }

  #[tokio::test]
  async fn test_agent_syncs_through_http() {
    let server = TestServer::start().await;
    let today = Utc::now().date_naive();
    server
      .storage
      .writer()
      .upsert_plan(today, &sample_plan(), "mcp")
      .await
      .unwrap();

    let transport = HttpTransport::new(&server.base_url).unwrap();
    let agent = SyncAgent::open(transport, MemoryStore::new(), Some("Phone".into()))
      .await
      .unwrap();
    let patch = json!({"completed": true}).as_object().cloned().unwrap();
    agent.mutate(today, "ex_1", &patch).await.unwrap();

    let outcome = agent.sync().await.unwrap();
    let SyncOutcome::Completed(report) = outcome else {
      panic!("expected a completed cycle, got {:?}", outcome);
    };
    assert_eq!(report.uploaded, vec![today]);
    assert_eq!(agent.plan(today).await.map(|p: Plan| p.exercises.len()), Some(3));
    assert!(agent.dirty_dates().await.is_empty());

    let client = server.storage.reader().client(agent.client_id()).await.unwrap().unwrap();
    assert_eq!(client.name, "Phone");
    let stored = server.storage.reader().log(today).await.unwrap().unwrap();
    assert_eq!(stored.log.entry("ex_1").unwrap()["completed"], json!(true));

    server.stop().await;
  }
}
