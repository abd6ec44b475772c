//! # Cadence Gateway
//!
//! Small HTTP surface over a running tier engine: health, per-tier stats,
//! manual ticks and ingress for feedback events posted by workers that cannot
//! reach the broker directly.

pub mod routes;
pub mod server;

pub use server::{AppState, build_router, start_server};
