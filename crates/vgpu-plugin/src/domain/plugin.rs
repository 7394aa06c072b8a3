use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use api_types::PluginInfo;
use error_stack::Report;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::fingerprint::FingerprintTranslator;
use super::registry::DeviceRegistry;
use super::reservation::ReservationError;
use super::reservation::ReservationGrant;
use super::reservation::ReservationResolver;
use super::source::FingerprintEvent;
use super::source::PhysicalDeviceSource;
use super::source::StatsEvent;
use super::source::UpstreamError;
use super::stats::StatsTranslator;
use super::DEVICE_API_VERSIONS;
use super::PLUGIN_NAME;
use super::PLUGIN_TYPE;
use super::PLUGIN_VERSION;
use super::VENDOR;

/// Translated streams are unbuffered beyond one event so a slow consumer
/// holds back the translator instead of queueing stale snapshots
const STREAM_CAPACITY: usize = 1;

/// Device plugin exposing `vgpus` virtual devices per physical device of the
/// wrapped source
#[derive(Debug)]
pub struct VgpuPlugin<S> {
    source: Arc<S>,
    registry: Arc<DeviceRegistry>,
    vgpus: NonZeroUsize,
    resolver: ReservationResolver,
}

impl<S: PhysicalDeviceSource> VgpuPlugin<S> {
    pub fn new(source: Arc<S>, vgpus: NonZeroUsize, max_registry_age: Option<Duration>) -> Self {
        let registry = Arc::new(DeviceRegistry::new());
        let resolver = ReservationResolver::new(registry.clone(), max_registry_age);
        Self {
            source,
            registry,
            vgpus,
            resolver,
        }
    }

    pub fn plugin_info(&self) -> PluginInfo {
        PluginInfo {
            name: PLUGIN_NAME.to_string(),
            plugin_type: PLUGIN_TYPE.to_string(),
            api_versions: DEVICE_API_VERSIONS.iter().map(|v| v.to_string()).collect(),
            version: PLUGIN_VERSION.to_string(),
            vendor: VENDOR.to_string(),
        }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn vgpus(&self) -> NonZeroUsize {
        self.vgpus
    }

    /// Resolver sharing this plugin's registry, for callers that reserve
    /// without holding the plugin
    pub fn resolver(&self) -> ReservationResolver {
        self.resolver.clone()
    }

    /// Stream virtual device fingerprints.
    ///
    /// Must be called from within a tokio runtime; the translation runs on a
    /// spawned task until the source stream ends or the token is cancelled.
    ///
    /// # Errors
    ///
    /// - [`UpstreamError`] if the physical fingerprint stream cannot be started
    pub fn fingerprint(
        &self,
        cancellation_token: CancellationToken,
    ) -> Result<mpsc::Receiver<FingerprintEvent>, Report<UpstreamError>> {
        let upstream = self.source.fingerprint(cancellation_token.clone())?;
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        let translator = FingerprintTranslator::new(self.registry.clone(), self.vgpus);
        tokio::spawn(translator.run(upstream, tx, cancellation_token));
        Ok(rx)
    }

    /// Stream virtual device statistics every `interval`.
    ///
    /// # Errors
    ///
    /// - [`UpstreamError`] if the physical stats stream cannot be started
    pub fn stats(
        &self,
        interval: Duration,
        cancellation_token: CancellationToken,
    ) -> Result<mpsc::Receiver<StatsEvent>, Report<UpstreamError>> {
        let upstream = self.source.stats(interval, cancellation_token.clone())?;
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        tokio::spawn(StatsTranslator::new(self.vgpus).run(upstream, tx, cancellation_token));
        Ok(rx)
    }

    /// Resolve reserved virtual devices to the physical devices to expose.
    ///
    /// # Errors
    ///
    /// See [`ReservationResolver::resolve`].
    pub fn reserve<I: AsRef<str>>(
        &self,
        device_ids: &[I],
    ) -> Result<ReservationGrant, Report<ReservationError>> {
        self.resolver.resolve(device_ids)
    }
}
