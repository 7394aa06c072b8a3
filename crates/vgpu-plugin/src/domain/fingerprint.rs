use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

use api_types::Device;
use api_types::DeviceGroup;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::registry::DeviceRegistry;
use super::source::FingerprintEvent;
use super::virtual_id;
use super::VENDOR;

/// Expands physical device fingerprints into virtual ones and publishes the
/// resulting IDs to the registry.
#[derive(Debug, Clone)]
pub struct FingerprintTranslator {
    registry: Arc<DeviceRegistry>,
    vgpus: NonZeroUsize,
}

impl FingerprintTranslator {
    pub fn new(registry: Arc<DeviceRegistry>, vgpus: NonZeroUsize) -> Self {
        Self { registry, vgpus }
    }

    /// Translate events until upstream closes, downstream is dropped or the
    /// token is cancelled. `downstream` is closed on return.
    pub async fn run(
        self,
        mut upstream: mpsc::Receiver<FingerprintEvent>,
        downstream: mpsc::Sender<FingerprintEvent>,
        cancellation_token: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancellation_token.cancelled() => {
                    tracing::debug!("fingerprint translator cancelled");
                    break;
                }
                event = upstream.recv() => match event {
                    Some(event) => event,
                    None => {
                        tracing::debug!("physical fingerprint stream closed");
                        break;
                    }
                },
            };

            let translated = event.map(|groups| self.translate(groups));

            tokio::select! {
                biased;
                _ = cancellation_token.cancelled() => {
                    tracing::debug!("fingerprint translator cancelled while sending");
                    break;
                }
                sent = downstream.send(translated) => {
                    if sent.is_err() {
                        tracing::debug!("virtual fingerprint receiver dropped");
                        break;
                    }
                }
            }
        }
    }

    /// Expand every physical device into its virtual devices and replace the
    /// registry with their IDs. The registry is updated before the result is
    /// returned, so anything that sees the translated groups can reserve them.
    pub fn translate(&self, groups: Vec<DeviceGroup>) -> Vec<DeviceGroup> {
        let mut ids = HashSet::new();

        let groups: Vec<DeviceGroup> = groups
            .into_iter()
            .map(|group| {
                let devices = group
                    .devices
                    .iter()
                    .flat_map(|device| self.virtual_devices(device))
                    .inspect(|device| {
                        ids.insert(device.id.clone());
                    })
                    .collect();

                DeviceGroup {
                    vendor: VENDOR.to_string(),
                    device_type: group.device_type,
                    name: group.name,
                    devices,
                    attributes: group.attributes,
                }
            })
            .collect();

        tracing::debug!(
            groups = groups.len(),
            virtual_devices = ids.len(),
            "translated fingerprint"
        );
        self.registry.replace(ids);
        groups
    }

    fn virtual_devices<'a>(&self, device: &'a Device) -> impl Iterator<Item = Device> + 'a {
        virtual_id::expand(&device.id, self.vgpus).map(move |id| Device {
            id,
            healthy: device.healthy,
            health_description: device.health_description.clone(),
            hw_locality: device.hw_locality.clone(),
        })
    }
}
