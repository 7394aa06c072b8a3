use std::collections::BTreeMap;
use std::num::NonZeroUsize;

use api_types::DeviceGroupStats;
use api_types::StatsSnapshot;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::source::StatsEvent;
use super::virtual_id;
use super::VENDOR;

/// Replicates physical device statistics across their virtual identities.
///
/// Every virtual device reports the full statistics of its physical parent;
/// values are not divided between replicas.
#[derive(Debug, Clone, Copy)]
pub struct StatsTranslator {
    vgpus: NonZeroUsize,
}

impl StatsTranslator {
    pub fn new(vgpus: NonZeroUsize) -> Self {
        Self { vgpus }
    }

    /// Translate events until upstream closes, downstream is dropped or the
    /// token is cancelled. `downstream` is closed on return.
    pub async fn run(
        self,
        mut upstream: mpsc::Receiver<StatsEvent>,
        downstream: mpsc::Sender<StatsEvent>,
        cancellation_token: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancellation_token.cancelled() => break,
                event = upstream.recv() => match event {
                    Some(event) => event,
                    None => {
                        tracing::debug!("physical stats stream closed");
                        break;
                    }
                },
            };

            let translated = event.map(|snapshot| self.translate(snapshot));

            tokio::select! {
                biased;
                _ = cancellation_token.cancelled() => break,
                sent = downstream.send(translated) => {
                    if sent.is_err() {
                        tracing::debug!("virtual stats receiver dropped");
                        break;
                    }
                }
            }
        }
        tracing::debug!("stats translator stopped");
    }

    pub fn translate(&self, snapshot: StatsSnapshot) -> StatsSnapshot {
        let groups = snapshot
            .groups
            .into_iter()
            .map(|group| {
                let mut instance_stats = BTreeMap::new();
                for (physical_id, stats) in &group.instance_stats {
                    for id in virtual_id::expand(physical_id, self.vgpus) {
                        instance_stats.insert(id, stats.clone());
                    }
                }

                DeviceGroupStats {
                    vendor: VENDOR.to_string(),
                    device_type: group.device_type,
                    name: group.name,
                    instance_stats,
                }
            })
            .collect();

        StatsSnapshot {
            groups,
            timestamp: snapshot.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use api_types::AttributeValue;
    use api_types::DeviceStats;
    use api_types::StatValue;
    use chrono::TimeZone;
    use chrono::Utc;
    use error_stack::Report;
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::domain::source::UpstreamError;

    fn stats(utilization: i64) -> DeviceStats {
        DeviceStats {
            summary: StatValue {
                value: AttributeValue::Int(utilization),
                unit: Some("%".to_string()),
                desc: Some("GPU utilization".to_string()),
            },
            stats: BTreeMap::from([(
                "memory_used".to_string(),
                StatValue {
                    value: AttributeValue::Int(2048),
                    unit: Some("MiB".to_string()),
                    desc: None,
                },
            )]),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    fn snapshot() -> StatsSnapshot {
        StatsSnapshot {
            groups: vec![DeviceGroupStats {
                vendor: "nvidia".to_string(),
                device_type: "gpu".to_string(),
                name: "Tesla T4".to_string(),
                instance_stats: BTreeMap::from([
                    ("gpu0".to_string(), stats(40)),
                    ("gpu1".to_string(), stats(90)),
                ]),
            }],
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 1).unwrap(),
        }
    }

    #[test]
    fn replicates_each_record_per_virtual_device() {
        let translator = StatsTranslator::new(NonZeroUsize::new(3).unwrap());
        let translated = translator.translate(snapshot());

        assert_eq!(translated.timestamp, snapshot().timestamp);
        let group = &translated.groups[0];
        assert_eq!(group.vendor, VENDOR);
        assert_eq!(group.name, "Tesla T4");
        assert_eq!(group.instance_stats.len(), 6);
        for i in 0..3 {
            assert_eq!(group.instance_stats[&format!("gpu0-{i}")], stats(40));
            assert_eq!(group.instance_stats[&format!("gpu1-{i}")], stats(90));
        }
    }

    #[test(tokio::test)]
    async fn run_passes_errors_through_and_keeps_going() {
        let translator = StatsTranslator::new(NonZeroUsize::new(2).unwrap());
        let (up_tx, up_rx) = mpsc::channel(1);
        let (down_tx, mut down_rx) = mpsc::channel(1);
        let task = tokio::spawn(translator.run(up_rx, down_tx, CancellationToken::new()));

        up_tx
            .send(Err(Report::new(UpstreamError::Stats {
                message: "device lost".to_string(),
            })))
            .await
            .unwrap();
        let err = down_rx.recv().await.unwrap().unwrap_err();
        assert!(matches!(err.current_context(), UpstreamError::Stats { message } if message == "device lost"));

        up_tx.send(Ok(snapshot())).await.unwrap();
        let translated = down_rx.recv().await.unwrap().unwrap();
        assert_eq!(translated.groups[0].instance_stats.len(), 4);

        drop(up_tx);
        assert!(down_rx.recv().await.is_none());
        task.await.unwrap();
    }

    #[test(tokio::test)]
    async fn cancellation_closes_downstream() {
        let translator = StatsTranslator::new(NonZeroUsize::new(2).unwrap());
        let (_up_tx, up_rx) = mpsc::channel::<StatsEvent>(1);
        let (down_tx, mut down_rx) = mpsc::channel(1);
        let token = CancellationToken::new();
        let task = tokio::spawn(translator.run(up_rx, down_tx, token.clone()));

        token.cancel();
        let closed = tokio::time::timeout(Duration::from_secs(1), down_rx.recv())
            .await
            .unwrap();
        assert!(closed.is_none());
        task.await.unwrap();
    }
}
