use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{StatusCode, Url, header};
use serde::Deserialize;
use tracing::debug;

use fleetlog_core::SyncError;
use fleetlog_core::models::Snapshot;
use fleetlog_core::remote::{RemoteDocument, WritePrecondition};
use fleetlog_core::sync::RemoteReplicaStore;

/// Body of a `412 Precondition Failed` from the replica server.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConflictBody {
    current_updated_at_millis: Option<i64>,
}

/// Remote replica store backed by `fleetlog serve`.
pub struct HttpRemoteStore {
    client: reqwest::Client,
    base_url: Option<Url>,
    api_key: Option<String>,
}

impl HttpRemoteStore {
    pub fn new(base_url: Option<&str>, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("fleetlog/{}", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(10))
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        let base_url = base_url
            .map(|url| Url::parse(url).with_context(|| format!("Invalid remote URL: {url}")))
            .transpose()?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn replica_url(&self, user_id: &str) -> Result<Url, SyncError> {
        let mut url = self
            .base_url
            .clone()
            .ok_or_else(|| SyncError::ConfigurationMissing("remote URL not set".to_string()))?;
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                SyncError::ConfigurationMissing("remote URL cannot hold a path".to_string())
            })?;
            segments
                .pop_if_empty()
                .extend(["v1", "replicas", user_id]);
        }
        Ok(url)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

fn unavailable(err: &reqwest::Error) -> SyncError {
    SyncError::RemoteUnavailable(err.to_string())
}

fn unexpected_status(status: StatusCode) -> SyncError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::AuthRequired,
        _ => SyncError::RemoteUnavailable(format!("replica server returned {status}")),
    }
}

#[async_trait]
impl RemoteReplicaStore for HttpRemoteStore {
    fn ensure_configured(&self) -> Result<(), SyncError> {
        if self.base_url.is_none() {
            return Err(SyncError::ConfigurationMissing(
                "set FLEETLOG_REMOTE_URL or the remote_url file".to_string(),
            ));
        }
        Ok(())
    }

    async fn read(&self, user_id: &str) -> Result<Option<Snapshot>, SyncError> {
        let url = self.replica_url(user_id)?;
        let response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(|e| unavailable(&e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(unexpected_status(status));
        }

        let document: RemoteDocument = response.json().await.map_err(|e| {
            SyncError::RemoteUnavailable(format!("unreadable replica document: {e}"))
        })?;
        debug!(
            user = %user_id,
            schema_version = document.schema_version,
            updated_at = document.updated_at_millis,
            "fetched remote replica"
        );
        Ok(Some(document.into_snapshot()))
    }

    async fn write(
        &self,
        user_id: &str,
        snapshot: &Snapshot,
        precondition: WritePrecondition,
    ) -> Result<(), SyncError> {
        let url = self.replica_url(user_id)?;
        let mut request = self
            .authorized(self.client.put(url))
            .json(&RemoteDocument::from_snapshot(snapshot));
        request = match precondition {
            WritePrecondition::Any => request,
            WritePrecondition::Absent => request.header(header::IF_NONE_MATCH, "*"),
            WritePrecondition::UpdatedAt(millis) => {
                request.header(header::IF_MATCH, millis.to_string())
            }
        };

        let response = request.send().await.map_err(|e| unavailable(&e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::PRECONDITION_FAILED {
            let actual = response
                .json::<ConflictBody>()
                .await
                .ok()
                .and_then(|body| body.current_updated_at_millis);
            return Err(SyncError::RemoteConflict {
                expected: precondition.expected(),
                actual,
            });
        }
        Err(unexpected_status(status))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use fleetlog_core::FleetService;
    use fleetlog_core::documents::DocumentStore;
    use fleetlog_core::legacy::JsonLegacyStore;
    use fleetlog_core::models::{NewFuelRecord, NewOdometerRecord, Vehicle, VehicleType};
    use fleetlog_core::sync::{IdentityProvider, SyncEngine, SyncOutcome};

    async fn spawn_server(api_key: Option<&str>) -> String {
        let app = crate::server::router(
            DocumentStore::open_in_memory().unwrap(),
            api_key.map(str::to_string),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn snapshot(updated_at: i64, name: &str) -> Snapshot {
        Snapshot {
            vehicles: vec![Vehicle {
                id: 1,
                name: name.to_string(),
                vehicle_type: VehicleType::Car,
            }],
            updated_at_millis: updated_at,
            ..Snapshot::default()
        }
    }

    struct Fixed(&'static str);

    impl IdentityProvider for Fixed {
        fn current_user_id(&self) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn read_missing_replica_is_none() {
        let url = spawn_server(None).await;
        let store = HttpRemoteStore::new(Some(&url), None).unwrap();
        assert!(store.read("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn write_then_read_roundtrip() {
        let url = spawn_server(Some("key")).await;
        let store = HttpRemoteStore::new(Some(&url), Some("key".to_string())).unwrap();

        store
            .write("u1", &snapshot(100, "Civic"), WritePrecondition::Absent)
            .await
            .unwrap();
        let read = store.read("u1").await.unwrap().unwrap();
        assert!(read.equivalent(&snapshot(100, "Civic")));
        assert_eq!(read.updated_at_millis, 100);
    }

    #[tokio::test]
    async fn stale_precondition_is_a_conflict() {
        let url = spawn_server(None).await;
        let store = HttpRemoteStore::new(Some(&url), None).unwrap();
        store
            .write("u1", &snapshot(100, "A"), WritePrecondition::Any)
            .await
            .unwrap();

        let err = store
            .write("u1", &snapshot(200, "B"), WritePrecondition::Absent)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::RemoteConflict {
                expected: None,
                actual: Some(100)
            }
        ));

        let err = store
            .write("u1", &snapshot(200, "B"), WritePrecondition::UpdatedAt(99))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::RemoteConflict {
                expected: Some(99),
                actual: Some(100)
            }
        ));

        store
            .write("u1", &snapshot(200, "B"), WritePrecondition::UpdatedAt(100))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn wrong_api_key_requires_auth() {
        let url = spawn_server(Some("right")).await;
        let store = HttpRemoteStore::new(Some(&url), Some("wrong".to_string())).unwrap();
        assert!(matches!(
            store.read("u1").await,
            Err(SyncError::AuthRequired)
        ));
    }

    #[tokio::test]
    async fn unconfigured_store_reports_missing_url() {
        let store = HttpRemoteStore::new(None, None).unwrap();
        assert!(matches!(
            store.ensure_configured(),
            Err(SyncError::ConfigurationMissing(_))
        ));
        assert!(matches!(
            store.read("u1").await,
            Err(SyncError::ConfigurationMissing(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let store = HttpRemoteStore::new(Some(&format!("http://{addr}")), None).unwrap();
        let err = store.read("u1").await.unwrap_err();
        assert!(matches!(err, SyncError::RemoteUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn replica_url_escapes_user_id_and_keeps_base_path() {
        let store = HttpRemoteStore::new(Some("http://host:8080/fleet/"), None).unwrap();
        let url = store.replica_url("a b").unwrap();
        assert_eq!(url.as_str(), "http://host:8080/fleet/v1/replicas/a%20b");
    }

    #[tokio::test]
    async fn two_devices_converge_through_server() {
        let url = spawn_server(Some("key")).await;
        let legacy = JsonLegacyStore::from_json("{}").unwrap();
        let phone = FleetService::open_in_memory(&legacy).unwrap();
        let laptop = FleetService::open_in_memory(&legacy).unwrap();

        let engine_for = |service: &FleetService| {
            SyncEngine::new(
                Arc::new(service.clone()),
                Arc::new(HttpRemoteStore::new(Some(&url), Some("key".to_string())).unwrap()),
                Arc::new(Fixed("driver")),
            )
        };

        phone
            .add_odometer(
                &NewOdometerRecord {
                    vehicle_id: 1,
                    date_epoch_day: 20_000,
                    odometer_km: 1500.0,
                },
                20_000,
            )
            .unwrap();

        let report = engine_for(&phone).sync_now().await.unwrap();
        assert_eq!(report.outcome, SyncOutcome::FirstBackupCreated);

        let report = engine_for(&laptop).sync_now().await.unwrap();
        assert!(report.local_written);
        assert_eq!(laptop.list_odometer_records().unwrap().len(), 1);

        let report = engine_for(&laptop).sync_now().await.unwrap();
        assert_eq!(report.outcome, SyncOutcome::AlreadySynchronized);
    }

    #[tokio::test]
    async fn full_precision_refuel_settles_after_one_sync() {
        let url = spawn_server(None).await;
        let svc = FleetService::open_in_memory(&JsonLegacyStore::from_json("{}").unwrap()).unwrap();
        svc.add_fuel(
            &NewFuelRecord {
                vehicle_id: 1,
                date_epoch_day: 20_000,
                odometer_km: 1_500.0,
                liters: 94.825_827_996_868_51,
                price_per_liter: 0.300_000_000_000_000_04,
            },
            20_000,
        )
        .unwrap();
        let engine = SyncEngine::new(
            Arc::new(svc.clone()),
            Arc::new(HttpRemoteStore::new(Some(&url), None).unwrap()),
            Arc::new(Fixed("driver")),
        );

        let report = engine.sync_now().await.unwrap();
        assert_eq!(report.outcome, SyncOutcome::FirstBackupCreated);
        let report = engine.sync_now().await.unwrap();
        assert_eq!(report.outcome, SyncOutcome::AlreadySynchronized);
        assert!(!report.remote_written);
    }
}
