use api_types::PluginInfo;
use error_stack::Report;
use poem::get;
use poem::listener::TcpListener;
use poem::middleware::Tracing;
use poem::post;
use poem::Endpoint;
use poem::EndpointExt;
use poem::Route;
use poem::Server;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;

use super::handlers::get_devices;
use super::handlers::get_info;
use super::handlers::get_stats;
use super::handlers::reserve;
use super::storage::SnapshotStorage;
use super::ApiError;
use crate::domain::ReservationResolver;

/// HTTP API server for the translated device view and reservations
pub struct ApiServer {
    listen_addr: String,
    storage: SnapshotStorage,
    resolver: ReservationResolver,
    info: PluginInfo,
}

/// Build the API routes
pub fn routes(
    storage: SnapshotStorage,
    resolver: ReservationResolver,
    info: PluginInfo,
) -> impl Endpoint {
    Route::new()
        .at("/api/v1/info", get(get_info))
        .at("/api/v1/devices", get(get_devices))
        .at("/api/v1/stats", get(get_stats))
        .at("/api/v1/reserve", post(reserve))
        .data(storage)
        .data(resolver)
        .data(info)
        .with(Tracing)
}

impl ApiServer {
    pub fn new(
        listen_addr: String,
        storage: SnapshotStorage,
        resolver: ReservationResolver,
        info: PluginInfo,
    ) -> Self {
        Self {
            listen_addr,
            storage,
            resolver,
            info,
        }
    }

    /// Serve until the token is cancelled
    ///
    /// # Errors
    ///
    /// - [`ApiError::ServerError`] if the server fails to start or bind to the address
    pub async fn run(self, cancellation_token: CancellationToken) -> Result<(), Report<ApiError>> {
        info!("Starting HTTP API server on {}", self.listen_addr);

        let app = routes(self.storage, self.resolver, self.info);
        let server = Server::new(TcpListener::bind(&self.listen_addr));

        tokio::select! {
            result = server.run(app) => {
                match result {
                    Ok(()) => {
                        info!("API server stopped normally");
                        Ok(())
                    }
                    Err(e) => {
                        error!("API server failed: {e}");
                        Err(Report::new(ApiError::ServerError {
                            message: format!("Server failed: {e}"),
                        }))
                    }
                }
            }
            _ = cancellation_token.cancelled() => {
                info!("API server shutdown requested");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use api_types::Device;
    use api_types::DeviceGroup;
    use poem::http::StatusCode;
    use poem::test::TestClient;
    use serde_json::json;
    use test_log::test;

    use super::*;
    use crate::domain::DeviceRegistry;

    fn test_client(ids: &[&str]) -> (TestClient<impl Endpoint>, SnapshotStorage) {
        test_client_with_max_age(ids, None)
    }

    fn test_client_with_max_age(
        ids: &[&str],
        max_registry_age: Option<Duration>,
    ) -> (TestClient<impl Endpoint>, SnapshotStorage) {
        let registry = Arc::new(DeviceRegistry::new());
        registry.replace(ids.iter().map(|s| s.to_string()).collect::<HashSet<_>>());
        let storage = SnapshotStorage::new();
        let info = PluginInfo {
            name: "nvidia-vgpu".to_string(),
            plugin_type: "device".to_string(),
            api_versions: vec!["v0.1.0".to_string()],
            version: "v0.1.0".to_string(),
            vendor: "letmutx".to_string(),
        };
        let endpoint = routes(
            storage.clone(),
            ReservationResolver::new(registry, max_registry_age),
            info,
        );
        (TestClient::new(endpoint), storage)
    }

    #[test(tokio::test)]
    async fn reserve_returns_grant() {
        let (client, _) = test_client(&["gpu0-0", "gpu0-1"]);
        let resp = client
            .post("/api/v1/reserve")
            .body_json(&json!({ "device_ids": ["gpu0-0", "gpu0-1"] }))
            .send()
            .await;

        resp.assert_status_is_ok();
        resp.assert_json(json!({
            "physical_ids": ["gpu0"],
            "reservation": {
                "envs": { "NVIDIA_VISIBLE_DEVICES": "gpu0" },
                "mounts": [],
                "devices": []
            }
        }))
        .await;
    }

    #[test(tokio::test)]
    async fn reserve_unknown_device_is_conflict() {
        let (client, _) = test_client(&["gpu0-0"]);
        let resp = client
            .post("/api/v1/reserve")
            .body_json(&json!({ "device_ids": ["gpu0-0", "gpu9-1"] }))
            .send()
            .await;

        resp.assert_status(StatusCode::CONFLICT);
        resp.assert_json(json!({
            "message": "unknown device IDs: gpu9-1",
            "missing": ["gpu9-1"]
        }))
        .await;
    }

    #[test(tokio::test)]
    async fn reserve_malformed_id_is_bad_request() {
        let (client, _) = test_client(&["bogus"]);
        let resp = client
            .post("/api/v1/reserve")
            .body_json(&json!({ "device_ids": ["bogus"] }))
            .send()
            .await;

        resp.assert_status(StatusCode::BAD_REQUEST);
        resp.assert_json(json!({
            "message": "malformed virtual device ID: \"bogus\"",
            "missing": []
        }))
        .await;
    }

    #[test(tokio::test)]
    async fn reserve_on_stale_registry_is_unavailable() {
        let (client, _) = test_client_with_max_age(&["gpu0-0"], Some(Duration::from_millis(1)));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let resp = client
            .post("/api/v1/reserve")
            .body_json(&json!({ "device_ids": ["gpu0-0"] }))
            .send()
            .await;
        resp.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test(tokio::test)]
    async fn empty_reservation_is_ok() {
        let (client, _) = test_client(&[]);
        let resp = client
            .post("/api/v1/reserve")
            .body_json(&json!({ "device_ids": [] }))
            .send()
            .await;

        resp.assert_status_is_ok();
        resp.assert_json(json!({
            "physical_ids": [],
            "reservation": { "envs": {}, "mounts": [], "devices": [] }
        }))
        .await;
    }

    #[test(tokio::test)]
    async fn devices_not_found_before_first_fingerprint() {
        let (client, storage) = test_client(&[]);
        client
            .get("/api/v1/devices")
            .send()
            .await
            .assert_status(StatusCode::NOT_FOUND);

        storage
            .update_fingerprint(vec![DeviceGroup {
                vendor: "letmutx".to_string(),
                device_type: "gpu".to_string(),
                name: "Tesla T4".to_string(),
                devices: vec![Device {
                    id: "gpu0-0".to_string(),
                    healthy: true,
                    health_description: None,
                    hw_locality: None,
                }],
                attributes: Default::default(),
            }])
            .await;

        let resp = client.get("/api/v1/devices").send().await;
        resp.assert_status_is_ok();
        resp.assert_json(json!([{
            "vendor": "letmutx",
            "device_type": "gpu",
            "name": "Tesla T4",
            "devices": [{ "id": "gpu0-0", "healthy": true }],
            "attributes": {}
        }]))
        .await;
    }

    #[test(tokio::test)]
    async fn info_reports_plugin_identity() {
        let (client, _) = test_client(&[]);
        let resp = client.get("/api/v1/info").send().await;
        resp.assert_status_is_ok();
        resp.assert_json(json!({
            "name": "nvidia-vgpu",
            "plugin_type": "device",
            "api_versions": ["v0.1.0"],
            "version": "v0.1.0",
            "vendor": "letmutx"
        }))
        .await;
    }
}
