//! Shared device plugin type definitions
//!
//! This crate contains the device, device group, statistics and reservation
//! types exchanged between the physical device source, the vgpu translation
//! core and the scheduler-facing surface.

use std::collections::BTreeMap;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// Typed value of a device group attribute or statistic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum AttributeValue {
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
}

impl std::fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// Group-level attribute, e.g. `memory = 16384 MiB`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub value: AttributeValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl Attribute {
    pub fn int(value: i64, unit: impl Into<String>) -> Self {
        Self {
            value: AttributeValue::Int(value),
            unit: Some(unit.into()),
        }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self {
            value: AttributeValue::String(value.into()),
            unit: None,
        }
    }
}

/// Hardware locality of a device, passed through untouched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceLocality {
    /// PCI bus ID, e.g. "00000000:3B:00.0"
    pub pci_bus_id: String,
}

/// A single schedulable device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Device ID, unique within its vendor/type/name group
    pub id: String,
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hw_locality: Option<DeviceLocality>,
}

/// A vendor/type/name tagged collection of devices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceGroup {
    pub vendor: String,
    pub device_type: String,
    pub name: String,
    pub devices: Vec<Device>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Attribute>,
}

/// A single statistic sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatValue {
    pub value: AttributeValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
}

/// Statistics of one device instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStats {
    /// Headline value shown by the scheduler, e.g. GPU utilization
    pub summary: StatValue,
    #[serde(default)]
    pub stats: BTreeMap<String, StatValue>,
    pub timestamp: DateTime<Utc>,
}

/// Statistics of all device instances of a group, keyed by device ID
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceGroupStats {
    pub vendor: String,
    pub device_type: String,
    pub name: String,
    pub instance_stats: BTreeMap<String, DeviceStats>,
}

/// One statistics collection interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub groups: Vec<DeviceGroupStats>,
    pub timestamp: DateTime<Utc>,
}

/// A host path mounted into the workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub task_path: String,
    pub host_path: String,
    pub read_only: bool,
}

/// A device node exposed to the workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSpec {
    pub task_path: String,
    pub host_path: String,
    pub cgroup_permissions: String,
}

/// Instructions for the task runtime on how to expose reserved devices
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerReservation {
    #[serde(default)]
    pub envs: BTreeMap<String, String>,
    #[serde(default)]
    pub mounts: Vec<Mount>,
    #[serde(default)]
    pub devices: Vec<DeviceSpec>,
}

/// Identity of the plugin as reported to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    /// Kind of host plugin, always `device` here
    pub plugin_type: String,
    /// Device plugin API versions the plugin speaks
    pub api_versions: Vec<String>,
    pub version: String,
    pub vendor: String,
}

/// Request body of the reservation API
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReserveRequest {
    pub device_ids: Vec<String>,
}

/// Successful reservation: backing physical devices and runtime instructions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveResponse {
    pub physical_ids: Vec<String>,
    pub reservation: ContainerReservation,
}

/// Error body returned when a reservation references unknown devices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveRejection {
    pub message: String,
    #[serde(default)]
    pub missing: Vec<String>,
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn attribute_value_display() {
        assert_eq!(AttributeValue::Int(16384).to_string(), "16384");
        assert_eq!(AttributeValue::Bool(true).to_string(), "true");
        assert_eq!(
            AttributeValue::String("535.104.05".to_string()).to_string(),
            "535.104.05"
        );
    }

    #[test]
    fn device_omits_empty_optionals() {
        let device = Device {
            id: "GPU-1234".to_string(),
            healthy: true,
            health_description: None,
            hw_locality: None,
        };

        let json = serde_json::to_value(&device).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "id": "GPU-1234", "healthy": true })
        );
    }

    #[test]
    fn attribute_is_tagged_by_kind() {
        let attr = Attribute::int(16384, "MiB");
        let json = serde_json::to_value(&attr).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "value": { "kind": "int", "value": 16384 }, "unit": "MiB" })
        );

        let back: Attribute = serde_json::from_value(json).unwrap();
        assert_eq!(back, attr);
    }

    #[test]
    fn reservation_defaults_are_empty() {
        let reservation: ContainerReservation = serde_json::from_str("{}").unwrap();
        assert_eq!(reservation, ContainerReservation::default());
    }
}
