//! Coach workout tracker backend.
//!
//! Plans are authored through the tools in [`commands`] (served over stdio by
//! [`mcp`]), stored by [`db`], and synced with offline-first clients by
//! [`sync`] over the HTTP front end in [`http`].

pub mod commands;
pub mod config;
pub mod db;
pub mod http;
pub mod logging;
pub mod mcp;
pub mod models;
pub mod sync;
pub mod transform;

#[cfg(test)]
mod test_utils;
