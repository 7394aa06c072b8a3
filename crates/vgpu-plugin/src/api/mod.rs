//! HTTP API exposing the translated device view and the reservation call
//!
//! # API Endpoints
//!
//! - `GET /api/v1/info` - plugin name, version and vendor
//! - `GET /api/v1/devices` - latest virtual device fingerprint
//! - `GET /api/v1/stats` - latest virtual device statistics
//! - `POST /api/v1/reserve` - resolve virtual device IDs to physical devices
//!
//! A reservation body looks like:
//! ```json
//! { "device_ids": ["GPU-5f3a-0", "GPU-5f3a-1"] }
//! ```

use core::error::Error;

pub mod handlers;
pub mod server;
pub mod storage;

pub use server::ApiServer;
pub use storage::SnapshotStorage;

/// API errors
#[derive(Debug, derive_more::Display)]
pub enum ApiError {
    #[display("Server error: {message}")]
    ServerError { message: String },
}

impl Error for ApiError {}
