use core::error::Error;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use api_types::ContainerReservation;
use error_stack::Report;

use super::registry::DeviceRegistry;
use super::virtual_id;
use super::virtual_id::VirtualIdError;

/// Environment variable the NVIDIA container runtime reads to decide which
/// GPUs a task can see
pub const NVIDIA_VISIBLE_DEVICES: &str = "NVIDIA_VISIBLE_DEVICES";

#[derive(Debug, derive_more::Display)]
pub enum ReservationError {
    /// Requested IDs are not in the registry, typically because the device
    /// vanished between scheduling and reservation
    #[display("unknown device IDs: {}", ids.join(","))]
    UnknownDevices { ids: Vec<String> },
    #[display("malformed virtual device ID: {id:?}")]
    MalformedId { id: String },
    #[display("device registry is stale: last updated {age:?} ago, limit {max_age:?}")]
    StaleRegistry { age: Duration, max_age: Duration },
}

impl Error for ReservationError {}

/// Physical devices backing a reservation and how to expose them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationGrant {
    pub physical_ids: BTreeSet<String>,
    pub reservation: ContainerReservation,
}

/// Resolves reserved virtual devices to their physical devices.
///
/// Only reads the registry; it never waits for a fingerprint tick.
#[derive(Debug, Clone)]
pub struct ReservationResolver {
    registry: Arc<DeviceRegistry>,
    max_registry_age: Option<Duration>,
}

impl ReservationResolver {
    pub fn new(registry: Arc<DeviceRegistry>, max_registry_age: Option<Duration>) -> Self {
        Self {
            registry,
            max_registry_age,
        }
    }

    /// Validate and resolve a reservation request.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::UnknownDevices`] if any ID is not currently registered
    /// - [`ReservationError::StaleRegistry`] if a maximum registry age is
    ///   configured and the last fingerprint is older than it
    /// - [`ReservationError::MalformedId`] if a registered ID does not decode
    pub fn resolve<S: AsRef<str>>(
        &self,
        virtual_ids: &[S],
    ) -> Result<ReservationGrant, Report<ReservationError>> {
        if virtual_ids.is_empty() {
            return Ok(ReservationGrant::default());
        }

        let missing = self.registry.contains_all(virtual_ids);
        if !missing.is_empty() {
            return Err(Report::new(ReservationError::UnknownDevices { ids: missing }));
        }

        if let (Some(max_age), Some(age)) = (self.max_registry_age, self.registry.age()) {
            if age > max_age {
                return Err(Report::new(ReservationError::StaleRegistry { age, max_age }));
            }
        }

        let physical_ids = virtual_id::group_by_physical(virtual_ids).map_err(|report| {
            let VirtualIdError::Malformed { id } = report.current_context();
            let id = id.clone();
            report.change_context(ReservationError::MalformedId { id })
        })?;

        let visible = physical_ids.iter().map(String::as_str).collect::<Vec<_>>().join(",");
        let reservation = ContainerReservation {
            envs: BTreeMap::from([(NVIDIA_VISIBLE_DEVICES.to_string(), visible)]),
            ..Default::default()
        };

        Ok(ReservationGrant {
            physical_ids,
            reservation,
        })
    }
}
