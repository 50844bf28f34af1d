//! clinicq - multi-tenant clinic queue service
//!
//! Walk-in queues with live position updates, doctor presence, appointment
//! booking, payment webhooks and a platform admin dashboard. Queue ordering
//! rules live in the `clinicq-core` crate; this crate wires them to HTTP,
//! WebSocket and storage.

// Allow clippy lints that are acceptable for this codebase
#![allow(
    clippy::too_many_arguments,
    clippy::large_enum_variant,
)]

pub mod api;
pub mod auth;
pub mod background;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod password;
pub mod realtime;
pub mod request_context;
pub mod services;
pub mod state;
pub mod workers;

pub use config::Config;
pub use error::{Error, Result};
pub use state::AppState;
