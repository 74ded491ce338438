//! Tracing setup for the `coach` binary.
//!
//! Output always goes to stderr; stdout belongs to the MCP stream.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber at `info`, overridable with `RUST_LOG`
pub fn init() {
  init_with_level("info")
}

pub fn init_with_level(default_level: &str) {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

  // try_init: a second call (tests, embedding) keeps the first subscriber
  let _ = tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().compact().with_writer(std::io::stderr))
    .try_init();
}

/// Route logs through the test harness's captured output
#[cfg(test)]
pub fn init_test() {
  let _ = tracing_subscriber::fmt()
    .with_test_writer()
    .with_env_filter(EnvFilter::new("debug"))
    .try_init();
}
