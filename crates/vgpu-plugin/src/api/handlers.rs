use api_types::DeviceGroup;
use api_types::PluginInfo;
use api_types::ReserveRejection;
use api_types::ReserveRequest;
use api_types::ReserveResponse;
use api_types::StatsSnapshot;
use poem::handler;
use poem::http::StatusCode;
use poem::web::Data;
use poem::web::Json;
use poem::IntoResponse;
use poem::Response;
use tracing::info;
use tracing::warn;

use super::storage::SnapshotStorage;
use crate::domain::ReservationError;
use crate::domain::ReservationResolver;

#[handler]
pub async fn get_info(info: Data<&PluginInfo>) -> Json<PluginInfo> {
    Json(info.0.clone())
}

/// Latest virtual device fingerprint
#[handler]
pub async fn get_devices(
    storage: Data<&SnapshotStorage>,
) -> poem::Result<Json<Vec<DeviceGroup>>> {
    storage
        .fingerprint()
        .await
        .map(|snapshot| Json(snapshot.groups))
        .ok_or_else(|| {
            poem::Error::from_string("no fingerprint received yet", StatusCode::NOT_FOUND)
        })
}

/// Latest virtual device statistics
#[handler]
pub async fn get_stats(storage: Data<&SnapshotStorage>) -> poem::Result<Json<StatsSnapshot>> {
    storage.stats().await.map(Json).ok_or_else(|| {
        poem::Error::from_string("no statistics received yet", StatusCode::NOT_FOUND)
    })
}

/// Resolve reserved virtual devices to the physical devices to expose
#[handler]
pub async fn reserve(
    resolver: Data<&ReservationResolver>,
    Json(request): Json<ReserveRequest>,
) -> Response {
    match resolver.resolve(&request.device_ids) {
        Ok(grant) => {
            info!(
                device_ids = ?request.device_ids,
                physical_ids = ?grant.physical_ids,
                "Reserved devices"
            );
            Json(ReserveResponse {
                physical_ids: grant.physical_ids.into_iter().collect(),
                reservation: grant.reservation,
            })
            .into_response()
        }
        Err(report) => {
            let error = report.current_context();
            let (status, missing) = match error {
                ReservationError::UnknownDevices { ids } => (StatusCode::CONFLICT, ids.clone()),
                ReservationError::MalformedId { .. } => (StatusCode::BAD_REQUEST, Vec::new()),
                ReservationError::StaleRegistry { .. } => {
                    (StatusCode::SERVICE_UNAVAILABLE, Vec::new())
                }
            };
            warn!(device_ids = ?request.device_ids, "Reservation rejected: {report:?}");
            (
                status,
                Json(ReserveRejection {
                    message: error.to_string(),
                    missing,
                }),
            )
                .into_response()
        }
    }
}
