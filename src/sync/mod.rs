//! Log sync between devices and the server.
//!
//! The server half ([`SyncCoordinator`]) serves plan/log deltas and stores
//! uploads; the client half ([`SyncAgent`]) keeps a local copy, tracks dirty
//! dates and runs sync cycles through a [`SyncTransport`].

pub mod agent;
pub mod coordinator;
pub mod store;
pub mod transport;
pub mod wire;

pub use agent::{AgentError, StatusIndicator, SyncAgent, SyncOutcome, SyncPhase, SyncReport, SyncSnapshot};
pub use coordinator::{CoordinatorError, SyncCoordinator, DEFAULT_FULL_SYNC_DAYS};
pub use store::{LocalState, LocalStore, MemoryStore, SqliteStore, StoreError};
pub use transport::{DownloadBatch, HttpTransport, SyncTransport, TransportError, UploadReceipt};
