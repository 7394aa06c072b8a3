//! Capability interface of the physical device data source

use core::error::Error;
use std::time::Duration;

use api_types::DeviceGroup;
use api_types::StatsSnapshot;
use error_stack::Report;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Errors reported by the physical device source
#[derive(Debug, derive_more::Display)]
pub enum UpstreamError {
    #[display("Failed to initialize device source: {message}")]
    Initialization { message: String },
    #[display("Device discovery failed: {message}")]
    Discovery { message: String },
    #[display("Device statistics collection failed: {message}")]
    Stats { message: String },
}

impl Error for UpstreamError {}

/// One discovery tick: the physical device groups, or the error the source
/// reported for that tick
pub type FingerprintEvent = Result<Vec<DeviceGroup>, Report<UpstreamError>>;

/// One statistics interval
pub type StatsEvent = Result<StatsSnapshot, Report<UpstreamError>>;

/// Streams of physical devices and their statistics.
///
/// Each call returns the receiving end of a stream that runs until the
/// source closes it or `cancellation_token` fires.
pub trait PhysicalDeviceSource: Send + Sync {
    /// Stream device group snapshots.
    ///
    /// # Errors
    ///
    /// - [`UpstreamError::Initialization`] if the stream cannot be started
    fn fingerprint(
        &self,
        cancellation_token: CancellationToken,
    ) -> Result<mpsc::Receiver<FingerprintEvent>, Report<UpstreamError>>;

    /// Stream per-device statistics every `interval`.
    ///
    /// # Errors
    ///
    /// - [`UpstreamError::Initialization`] if the stream cannot be started
    fn stats(
        &self,
        interval: Duration,
        cancellation_token: CancellationToken,
    ) -> Result<mpsc::Receiver<StatsEvent>, Report<UpstreamError>>;
}
