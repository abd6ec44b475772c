//! # Cadence Core
//!
//! Shared types, configuration, errors and the trait seams used by the
//! scheduler, the storage adapters and the gateway.

pub mod config;
pub mod error;
pub mod filter;
pub mod traits;
pub mod types;

pub use config::CadenceConfig;
pub use error::{CadenceError, Result};
pub use filter::{FeedFilter, UrlPattern};
