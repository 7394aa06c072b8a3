//! Physical device source backed by NVIDIA's NVML library

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use api_types::Attribute;
use api_types::AttributeValue;
use api_types::Device;
use api_types::DeviceGroup;
use api_types::DeviceGroupStats;
use api_types::DeviceLocality;
use api_types::DeviceStats;
use api_types::StatValue;
use api_types::StatsSnapshot;
use chrono::Utc;
use error_stack::Report;
use nvml_wrapper::enum_wrappers::device::TemperatureSensor;
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::Nvml;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::ValidatedConfig;
use crate::domain::FingerprintEvent;
use crate::domain::PhysicalDeviceSource;
use crate::domain::StatsEvent;
use crate::domain::UpstreamError;

const NVIDIA_VENDOR: &str = "nvidia";
const GPU_DEVICE_TYPE: &str = "gpu";
const BYTES_PER_MIB: u64 = 1024 * 1024;

/// One GPU as seen by a discovery pass
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredGpu {
    pub uuid: String,
    pub model: String,
    pub healthy: bool,
    pub health_description: Option<String>,
    pub pci_bus_id: Option<String>,
    pub attributes: BTreeMap<String, Attribute>,
}

/// One GPU's statistics sample
#[derive(Debug, Clone, PartialEq)]
pub struct GpuSample {
    pub uuid: String,
    pub model: String,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    /// `None` when the GPU does not report the metric
    pub utilization_percent: Option<u32>,
    pub temperature_celsius: Option<u32>,
    pub power_usage_milliwatts: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct NvmlDeviceSource {
    nvml: Arc<Nvml>,
    enabled: bool,
    ignored_gpu_ids: BTreeSet<String>,
    fingerprint_period: Duration,
    refresh_after: Option<Duration>,
}

/// Forwards changed discovery results, and unchanged ones once the last
/// forwarded result is `refresh_after` old
#[derive(Debug)]
struct FingerprintFilter {
    last_groups: Option<Vec<DeviceGroup>>,
    last_sent: Option<Instant>,
    refresh_after: Option<Duration>,
}

impl FingerprintFilter {
    fn new(refresh_after: Option<Duration>) -> Self {
        Self {
            last_groups: None,
            last_sent: None,
            refresh_after,
        }
    }

    fn admit(&mut self, groups: &[DeviceGroup], now: Instant) -> bool {
        let unchanged = self.last_groups.as_deref() == Some(groups);
        let refresh_due = match (self.refresh_after, self.last_sent) {
            (Some(after), Some(sent)) => now.saturating_duration_since(sent) >= after,
            _ => false,
        };
        if unchanged && !refresh_due {
            return false;
        }
        self.last_groups = Some(groups.to_vec());
        self.last_sent = Some(now);
        true
    }

    /// Forget the last result so the next success is always forwarded
    fn reset(&mut self) {
        self.last_groups = None;
    }
}

/// Initialize NVML, retrying with an explicit library path for hosts where
/// the default lookup fails
pub fn init_nvml() -> Result<Nvml, Report<UpstreamError>> {
    match Nvml::init() {
        Ok(nvml) => {
            tracing::info!("NVML initialized successfully");
            Ok(nvml)
        }
        Err(_) => {
            tracing::warn!("Standard NVML init failed, trying with explicit library path");
            let nvml = Nvml::builder()
                .lib_path(std::ffi::OsStr::new("libnvidia-ml.so.1"))
                .init()
                .map_err(|e| {
                    Report::new(UpstreamError::Initialization {
                        message: format!("NVML init failed: {e}"),
                    })
                })?;
            tracing::info!("NVML initialized with explicit library path");
            Ok(nvml)
        }
    }
}

impl NvmlDeviceSource {
    pub fn new(nvml: Arc<Nvml>, config: &ValidatedConfig) -> Self {
        Self {
            nvml,
            enabled: config.enabled,
            ignored_gpu_ids: config.ignored_gpu_ids.clone(),
            fingerprint_period: config.fingerprint_period,
            // re-send unchanged groups one poll before the registry would go stale
            refresh_after: config
                .max_registry_age
                .map(|max_age| max_age.saturating_sub(config.fingerprint_period)),
        }
    }

    fn discover(&self) -> Result<Vec<DeviceGroup>, Report<UpstreamError>> {
        let gpus = discover_gpus(&self.nvml).map_err(|e| discovery_error(&e))?;
        Ok(group_by_model(gpus, &self.ignored_gpu_ids))
    }

    fn sample(&self) -> Result<StatsSnapshot, Report<UpstreamError>> {
        let samples = sample_gpus(&self.nvml).map_err(|e| {
            Report::new(UpstreamError::Stats {
                message: e.to_string(),
            })
        })?;
        Ok(stats_by_model(samples, &self.ignored_gpu_ids))
    }
}

impl PhysicalDeviceSource for NvmlDeviceSource {
    fn fingerprint(
        &self,
        cancellation_token: CancellationToken,
    ) -> Result<mpsc::Receiver<FingerprintEvent>, Report<UpstreamError>> {
        let (tx, rx) = mpsc::channel(1);
        let source = self.clone();

        tokio::spawn(async move {
            if !source.enabled {
                tracing::info!("GPU discovery disabled, reporting no devices");
                if tx.send(Ok(Vec::new())).await.is_ok() {
                    cancellation_token.cancelled().await;
                }
                return;
            }

            let mut ticker = tokio::time::interval(source.fingerprint_period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut filter = FingerprintFilter::new(source.refresh_after);

            loop {
                tokio::select! {
                    biased;
                    _ = cancellation_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let event = match source.discover() {
                    Ok(groups) if !filter.admit(&groups, Instant::now()) => continue,
                    Ok(groups) => Ok(groups),
                    Err(e) => {
                        filter.reset();
                        Err(e)
                    }
                };

                tokio::select! {
                    biased;
                    _ = cancellation_token.cancelled() => break,
                    sent = tx.send(event) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("NVML fingerprint stream stopped");
        });

        Ok(rx)
    }

    fn stats(
        &self,
        interval: Duration,
        cancellation_token: CancellationToken,
    ) -> Result<mpsc::Receiver<StatsEvent>, Report<UpstreamError>> {
        if interval.is_zero() {
            return Err(Report::new(UpstreamError::Initialization {
                message: "stats interval must be greater than zero".to_string(),
            }));
        }

        let (tx, rx) = mpsc::channel(1);
        let source = self.clone();

        tokio::spawn(async move {
            if !source.enabled {
                // keep the stream open without samples
                let _tx = tx;
                cancellation_token.cancelled().await;
                return;
            }

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancellation_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let event = source.sample();
                tokio::select! {
                    biased;
                    _ = cancellation_token.cancelled() => break,
                    sent = tx.send(event) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("NVML stats stream stopped");
        });

        Ok(rx)
    }
}

fn discovery_error(e: &NvmlError) -> Report<UpstreamError> {
    Report::new(UpstreamError::Discovery {
        message: e.to_string(),
    })
}

fn discover_gpus(nvml: &Nvml) -> Result<Vec<DiscoveredGpu>, NvmlError> {
    let driver_version = nvml.sys_driver_version().ok();
    let device_count = nvml.device_count()?;
    let mut gpus = Vec::with_capacity(device_count as usize);

    for i in 0..device_count {
        let device = nvml.device_by_index(i)?;
        let uuid = device.uuid()?;
        let model = device.name()?;

        let mut attributes = BTreeMap::new();
        let (healthy, health_description) = match device.memory_info() {
            Ok(memory) => {
                attributes.insert(
                    "memory".to_string(),
                    Attribute::int(bytes_to_mib(memory.total), "MiB"),
                );
                (true, None)
            }
            Err(e) => (false, Some(e.to_string())),
        };
        if let Ok(limit) = device.enforced_power_limit() {
            attributes.insert("power".to_string(), Attribute::int(i64::from(limit / 1000), "W"));
        }
        if let Ok(bar1) = device.bar1_memory_info() {
            attributes.insert(
                "bar1".to_string(),
                Attribute::int(bytes_to_mib(bar1.total), "MiB"),
            );
        }
        if let Some(version) = &driver_version {
            attributes.insert("driver_version".to_string(), Attribute::string(version.clone()));
        }

        tracing::debug!("Found GPU {}: {} ({})", i, uuid, model);
        gpus.push(DiscoveredGpu {
            uuid,
            model,
            healthy,
            health_description,
            pci_bus_id: device.pci_info().ok().map(|pci| pci.bus_id),
            attributes,
        });
    }

    Ok(gpus)
}

fn sample_gpus(nvml: &Nvml) -> Result<Vec<GpuSample>, NvmlError> {
    let device_count = nvml.device_count()?;
    let mut samples = Vec::with_capacity(device_count as usize);

    for i in 0..device_count {
        let device = nvml.device_by_index(i)?;
        let memory = device.memory_info()?;
        samples.push(GpuSample {
            uuid: device.uuid()?,
            model: device.name()?,
            memory_used_bytes: memory.used,
            memory_total_bytes: memory.total,
            utilization_percent: device.utilization_rates().ok().map(|rates| rates.gpu),
            temperature_celsius: device.temperature(TemperatureSensor::Gpu).ok(),
            power_usage_milliwatts: device.power_usage().ok(),
        });
    }

    Ok(samples)
}

/// Build one device group per GPU model, skipping ignored GPUs. Group
/// attributes are taken from the first GPU of the model.
pub fn group_by_model(gpus: Vec<DiscoveredGpu>, ignored: &BTreeSet<String>) -> Vec<DeviceGroup> {
    let mut groups: BTreeMap<String, DeviceGroup> = BTreeMap::new();

    for gpu in gpus.into_iter().filter(|gpu| !ignored.contains(&gpu.uuid)) {
        let group = groups.entry(gpu.model.clone()).or_insert_with(|| DeviceGroup {
            vendor: NVIDIA_VENDOR.to_string(),
            device_type: GPU_DEVICE_TYPE.to_string(),
            name: gpu.model.clone(),
            devices: Vec::new(),
            attributes: gpu.attributes.clone(),
        });
        group.devices.push(Device {
            id: gpu.uuid,
            healthy: gpu.healthy,
            health_description: gpu.health_description,
            hw_locality: gpu.pci_bus_id.map(|pci_bus_id| DeviceLocality { pci_bus_id }),
        });
    }

    groups.into_values().collect()
}

pub fn stats_by_model(samples: Vec<GpuSample>, ignored: &BTreeSet<String>) -> StatsSnapshot {
    let timestamp = Utc::now();
    let mut groups: BTreeMap<String, DeviceGroupStats> = BTreeMap::new();

    for sample in samples.into_iter().filter(|s| !ignored.contains(&s.uuid)) {
        let group = groups
            .entry(sample.model.clone())
            .or_insert_with(|| DeviceGroupStats {
                vendor: NVIDIA_VENDOR.to_string(),
                device_type: GPU_DEVICE_TYPE.to_string(),
                name: sample.model.clone(),
                instance_stats: BTreeMap::new(),
            });

        let memory_used = stat(
            AttributeValue::Int(bytes_to_mib(sample.memory_used_bytes)),
            "MiB",
            "Used framebuffer memory",
        );
        let mut stats = BTreeMap::from([
            ("memory_used".to_string(), memory_used.clone()),
            (
                "memory_total".to_string(),
                stat(
                    AttributeValue::Int(bytes_to_mib(sample.memory_total_bytes)),
                    "MiB",
                    "Total framebuffer memory",
                ),
            ),
        ]);
        if let Some(celsius) = sample.temperature_celsius {
            stats.insert(
                "temperature".to_string(),
                stat(AttributeValue::Int(i64::from(celsius)), "C", "GPU temperature"),
            );
        }
        if let Some(milliwatts) = sample.power_usage_milliwatts {
            stats.insert(
                "power".to_string(),
                stat(
                    AttributeValue::Float(f64::from(milliwatts) / 1000.0),
                    "W",
                    "Power usage",
                ),
            );
        }

        // memory usage stands in for GPUs without utilization counters
        let summary = match sample.utilization_percent {
            Some(percent) => stat(AttributeValue::Int(i64::from(percent)), "%", "GPU utilization"),
            None => memory_used,
        };

        let stats = DeviceStats {
            summary,
            stats,
            timestamp,
        };
        group.instance_stats.insert(sample.uuid, stats);
    }

    StatsSnapshot {
        groups: groups.into_values().collect(),
        timestamp,
    }
}

fn stat(value: AttributeValue, unit: &str, desc: &str) -> StatValue {
    StatValue {
        value,
        unit: Some(unit.to_string()),
        desc: Some(desc.to_string()),
    }
}

fn bytes_to_mib(bytes: u64) -> i64 {
    i64::try_from(bytes / BYTES_PER_MIB).unwrap_or(i64::MAX)
}
