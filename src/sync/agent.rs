//! Client side of log sync.
//!
//! A [`SyncAgent`] owns the device's copy of plans and logs. Local edits land
//! immediately and mark their date dirty; [`SyncAgent::sync`] runs one
//! upload-then-download cycle against the server:
//!
//! ```text
//! Idle -> Uploading -> Downloading -> Merging -> Idle
//!            \-------------\-> Failed
//! ```
//!
//! Only one cycle runs at a time. The state lock is never held across a
//! network call, so edits made while a cycle is in flight are never blocked;
//! they stay dirty and are shielded from the download that cycle merges.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use super::store::{LocalState, LocalStore, StoreError};
use super::transport::{SyncTransport, TransportError};
use crate::models::{utc_now, Plan, ValidationError, WorkoutLog};

/// ---------------------------------------------------------------------------
/// Error Handling
/// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
  #[error(transparent)]
  Transport(#[from] TransportError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Validation(#[from] ValidationError),
}

impl AgentError {
  pub fn is_connectivity(&self) -> bool {
    matches!(self, Self::Transport(e) if e.is_connectivity())
  }
}

impl Serialize for AgentError {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    serializer.serialize_str(&self.to_string())
  }
}

/// ---------------------------------------------------------------------------
/// Status
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
  Idle,
  Uploading,
  Downloading,
  Merging,
  /// Last cycle aborted; cleared when the next one starts
  Failed,
}

/// Coarse status for a sync badge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusIndicator {
  /// Nothing pending
  Green,
  /// Unsynced edits or a failed cycle
  Red,
  /// Server unreachable
  Gray,
}

impl fmt::Display for StatusIndicator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::Green => "green",
      Self::Red => "red",
      Self::Gray => "gray",
    };
    write!(f, "{}", s)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncSnapshot {
  pub phase: SyncPhase,
  pub offline: bool,
  pub dirty_count: usize,
  pub last_server_sync_time: Option<DateTime<Utc>>,
  pub last_error: Option<String>,
}

impl SyncSnapshot {
  fn initial(state: &LocalState) -> Self {
    Self {
      phase: SyncPhase::Idle,
      offline: false,
      dirty_count: state.metadata.dirty_dates.len(),
      last_server_sync_time: state.metadata.last_server_sync_time,
      last_error: None,
    }
  }

  pub fn indicator(&self) -> StatusIndicator {
    if self.offline {
      StatusIndicator::Gray
    } else if self.dirty_count > 0 || self.phase == SyncPhase::Failed {
      StatusIndicator::Red
    } else {
      StatusIndicator::Green
    }
  }
}

/// What a completed cycle did
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
  pub uploaded: Vec<NaiveDate>,
  pub plans_received: usize,
  pub logs_merged: Vec<NaiveDate>,
  /// Downloaded logs not applied because the local copy is dirty
  pub logs_kept_local: Vec<NaiveDate>,
  pub server_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
  Offline,
  AlreadySyncing,
  Completed(SyncReport),
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

/// ---------------------------------------------------------------------------
/// Agent
/// ---------------------------------------------------------------------------

pub struct SyncAgent<T, S> {
  transport: T,
  store: S,
  client_id: String,
  client_name: Option<String>,
  state: Mutex<LocalState>,
  busy: AtomicBool,
  registered: AtomicBool,
  status: watch::Sender<SyncSnapshot>,
}

impl<T: SyncTransport, S: LocalStore> SyncAgent<T, S> {
  /// Load local state from `store` (issuing a client id on first run)
  pub async fn open(transport: T, store: S, client_name: Option<String>) -> Result<Self, AgentError> {
    let state = LocalState::load(&store).await?;
    let client_id = state.client_id().to_string();
    let (status, _) = watch::channel(SyncSnapshot::initial(&state));
    info!(client_id = %client_id, dirty = state.metadata.dirty_dates.len(), "sync agent ready");

    Ok(Self {
      transport,
      store,
      client_id,
      client_name,
      state: Mutex::new(state),
      busy: AtomicBool::new(false),
      registered: AtomicBool::new(false),
      status,
    })
  }

  pub fn client_id(&self) -> &str {
    &self.client_id
  }

  pub fn snapshot(&self) -> SyncSnapshot {
    self.status.borrow().clone()
  }

  /// Change notifications for the status snapshot
  pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
    self.status.subscribe()
  }

  pub async fn plan(&self, date: NaiveDate) -> Option<Plan> {
    self.state.lock().await.plans.get(&date).cloned()
  }

  pub async fn log(&self, date: NaiveDate) -> Option<WorkoutLog> {
    self.state.lock().await.logs.get(&date).cloned()
  }

  pub async fn dirty_dates(&self) -> BTreeSet<NaiveDate> {
    self.state.lock().await.metadata.dirty_dates.clone()
  }

  /// Record a local edit: field-merge `patch` into one result of the log for
  /// `date`, stamp the log, mark the date dirty and persist. Never touches
  /// the network.
  pub async fn mutate(
    &self,
    date: NaiveDate,
    exercise_id: &str,
    patch: &Map<String, Value>,
  ) -> Result<(), AgentError> {
    let mut state = self.state.lock().await;
    let mut log = state.logs.get(&date).cloned().unwrap_or_default();
    log.merge_result(exercise_id, patch)?;
    log.touch(&self.client_id, utc_now());

    let mut next = state.clone();
    next.logs.insert(date, log);
    next.metadata.mark_dirty(date);
    next.save_logs(&self.store).await?;
    *state = next;

    debug!(%date, exercise_id, "local log edit");
    let dirty = state.metadata.dirty_dates.len();
    self.status.send_modify(|s| s.dirty_count = dirty);
    Ok(())
  }

  /// Run one sync cycle
  pub async fn sync(&self) -> Result<SyncOutcome, AgentError> {
    if self
      .busy
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      debug!("sync already in flight");
      return Ok(SyncOutcome::AlreadySyncing);
    }
    let _busy = BusyGuard(&self.busy);

    if !self.transport.is_online().await {
      info!("server unreachable, sync skipped");
      self.status.send_modify(|s| s.offline = true);
      return Ok(SyncOutcome::Offline);
    }
    self.status.send_modify(|s| {
      s.offline = false;
      s.last_error = None;
    });

    match self.run_cycle().await {
      Ok(report) => {
        info!(
          uploaded = report.uploaded.len(),
          plans = report.plans_received,
          logs = report.logs_merged.len(),
          kept_local = report.logs_kept_local.len(),
          "sync complete"
        );
        self.status.send_modify(|s| {
          s.phase = SyncPhase::Idle;
          s.last_server_sync_time = Some(report.server_time);
        });
        Ok(SyncOutcome::Completed(report))
      }
      Err(e) => {
        warn!("sync failed: {}", e);
        let offline = e.is_connectivity();
        let message = e.to_string();
        self.status.send_modify(|s| {
          s.phase = SyncPhase::Failed;
          s.offline = offline;
          s.last_error = Some(message);
        });
        Err(e)
      }
    }
  }

  async fn run_cycle(&self) -> Result<SyncReport, AgentError> {
    self.ensure_registered().await?;

    // Upload
    let pending = self.pending_uploads().await?;
    let mut uploaded = Vec::new();
    if !pending.is_empty() {
      self.set_phase(SyncPhase::Uploading);
      let receipt = self.transport.upload(&self.client_id, &pending).await?;

      let mut state = self.state.lock().await;
      let mut metadata = state.metadata.clone();
      for (date, sent) in &pending {
        // An edit made during the request keeps its date dirty
        if state.logs.get(date) == Some(sent) {
          metadata.dirty_dates.remove(date);
        }
      }
      let next = LocalState {
        metadata,
        ..state.clone()
      };
      next.save_metadata(&self.store).await?;
      *state = next;

      let dirty = state.metadata.dirty_dates.len();
      self.status.send_modify(|s| s.dirty_count = dirty);
      uploaded = receipt.applied;
    }

    // Download
    self.set_phase(SyncPhase::Downloading);
    let since = self.state.lock().await.metadata.last_server_sync_time;
    let batch = self.transport.download(&self.client_id, since).await?;

    // Merge
    self.set_phase(SyncPhase::Merging);
    let mut state = self.state.lock().await;
    let mut next = state.clone();
    let plans_received = batch.plans.len();
    next.plans.extend(batch.plans);

    let mut logs_merged = Vec::new();
    let mut logs_kept_local = Vec::new();
    for (date, log) in batch.logs {
      if next.metadata.is_dirty(date) {
        logs_kept_local.push(date);
      } else {
        next.logs.insert(date, log);
        logs_merged.push(date);
      }
    }
    next.metadata.last_server_sync_time = Some(batch.server_time);
    next.save(&self.store).await?;
    *state = next;

    let dirty = state.metadata.dirty_dates.len();
    self.status.send_modify(|s| s.dirty_count = dirty);

    Ok(SyncReport {
      uploaded,
      plans_received,
      logs_merged,
      logs_kept_local,
      server_time: batch.server_time,
    })
  }

  /// Dirty logs to send. Dirty dates with no log left are dropped.
  async fn pending_uploads(&self) -> Result<BTreeMap<NaiveDate, WorkoutLog>, AgentError> {
    let mut guard = self.state.lock().await;
    let state = &mut *guard;
    let orphaned: Vec<NaiveDate> = state
      .metadata
      .dirty_dates
      .iter()
      .copied()
      .filter(|date| !state.logs.contains_key(date))
      .collect();
    if !orphaned.is_empty() {
      for date in &orphaned {
        state.metadata.dirty_dates.remove(date);
      }
      state.save_metadata(&self.store).await?;
    }

    Ok(
      state
        .metadata
        .dirty_dates
        .iter()
        .filter_map(|date| state.logs.get(date).map(|log| (*date, log.clone())))
        .collect(),
    )
  }

  async fn ensure_registered(&self) -> Result<(), AgentError> {
    if self.registered.load(Ordering::Acquire) {
      return Ok(());
    }
    let id = self
      .transport
      .register(&self.client_id, self.client_name.as_deref())
      .await?;
    if id != self.client_id {
      warn!(local = %self.client_id, server = %id, "server answered with a different client id");
    }
    self.registered.store(true, Ordering::Release);
    Ok(())
  }

  fn set_phase(&self, phase: SyncPhase) {
    self.status.send_modify(|s| s.phase = phase);
  }
}
