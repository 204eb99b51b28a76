//! Card Lobby Client Library
//!
//! Keeps a client-side mirror of a card-game server's lobby in sync over a
//! persistent connection and derives the per-viewer game list from it.
//!
//! # Features
//!
//! - `metrics_server` - Serve sync metrics over HTTP when `METRICS_PORT` is set (enabled by default)

pub mod client;
pub mod config;
pub mod lobby;
pub mod metrics;
pub mod net;
