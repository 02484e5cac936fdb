use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};

use actix_web::{HttpResponse, Responder, get, web};
use rusqlite::Connection;
use serde::Serialize;

use crate::adapters::db;
use crate::domain::engine::{CycleOutput, MetricValue};

/// Latest successful cycle, as exposed over HTTP.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedMetrics {
    pub updated_at: String,
    pub values: BTreeMap<String, MetricValue>,
    pub calculated_keys: Vec<String>,
}

impl PublishedMetrics {
    pub fn from_output(output: CycleOutput, updated_at: String) -> Self {
        Self {
            updated_at,
            values: output.values,
            calculated_keys: output.calculated_keys,
        }
    }
}

pub type SharedMetrics = Arc<RwLock<Option<PublishedMetrics>>>;

#[derive(Clone)]
pub struct ApiState {
    pub latest: SharedMetrics,
    pub connection: Arc<Mutex<Connection>>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsDbResponse {
    pub schema_version: u32,
    pub snapshot_updated_at: Option<String>,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(get_latest_metrics_endpoint)
        .service(get_db_diagnostics_endpoint);
}

#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[get("/metrics/latest")]
async fn get_latest_metrics_endpoint(state: web::Data<ApiState>) -> impl Responder {
    let latest = match state.latest.read() {
        Ok(guard) => guard.clone(),
        Err(_) => {
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "metrics lock poisoned"
            }));
        }
    };

    match latest {
        Some(metrics) => HttpResponse::Ok().json(metrics),
        None => HttpResponse::NoContent().finish(),
    }
}

#[get("/diagnostics/db")]
async fn get_db_diagnostics_endpoint(state: web::Data<ApiState>) -> impl Responder {
    let connection = match state.connection.lock() {
        Ok(guard) => guard,
        Err(_) => {
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "database lock poisoned"
            }));
        }
    };

    let schema_version = match db::schema_version(&connection) {
        Ok(value) => value,
        Err(error) => return db_error_response(error),
    };
    let snapshot_updated_at = match db::snapshot_updated_at(&connection) {
        Ok(value) => value,
        Err(error) => return db_error_response(error),
    };

    HttpResponse::Ok().json(DiagnosticsDbResponse {
        schema_version,
        snapshot_updated_at,
    })
}

fn db_error_response(error: db::DbError) -> HttpResponse {
    tracing::error!(error = %error, "diagnostics query failed");
    HttpResponse::InternalServerError().json(serde_json::json!({
        "error": "database operation failed"
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex, RwLock};

    use actix_web::{App, test, web};

    use super::{ApiState, PublishedMetrics, configure_routes};
    use crate::adapters::db::{open_connection, run_migrations, save_snapshot};
    use crate::domain::engine::{CycleOutput, EngineState};

    fn test_state(with_snapshot: bool) -> ApiState {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let db_path = dir.path().join("api.sqlite");
        std::mem::forget(dir);

        let mut connection =
            open_connection(db_path.to_string_lossy().as_ref()).expect("db should open");
        run_migrations(&mut connection).expect("migrations should succeed");

        if with_snapshot {
            save_snapshot(
                &connection,
                &EngineState::default(),
                "2026-03-01T10:00:05.000Z",
            )
            .expect("save should succeed");
        }

        ApiState {
            latest: Arc::new(RwLock::new(None)),
            connection: Arc::new(Mutex::new(connection)),
        }
    }

    #[actix_web::test]
    async fn health_endpoint_reports_ok() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_state(false)))
                .configure(configure_routes),
        )
        .await;

        let response =
            test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;

        assert!(response.status().is_success());
    }

    #[actix_web::test]
    async fn latest_metrics_returns_no_content_before_first_cycle() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_state(false)))
                .configure(configure_routes),
        )
        .await;

        let response = test::call_service(
            &app,
            test::TestRequest::get().uri("/metrics/latest").to_request(),
        )
        .await;

        assert_eq!(response.status(), actix_web::http::StatusCode::NO_CONTENT);
    }

    #[actix_web::test]
    async fn latest_metrics_returns_published_cycle() {
        let state = test_state(false);
        {
            let mut guard = state.latest.write().expect("metrics lock should be available");
            let mut output = CycleOutput::default();
            output
                .values
                .insert("grid_power".to_string(), super::MetricValue::Number(1200.0));
            output.calculated_keys.push("grid_in_energy_daily".to_string());
            *guard = Some(PublishedMetrics::from_output(
                output,
                "2026-03-01T10:00:05.000Z".to_string(),
            ));
        }

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let response = test::call_service(
            &app,
            test::TestRequest::get().uri("/metrics/latest").to_request(),
        )
        .await;
        assert!(response.status().is_success());

        let body: serde_json::Value = test::read_body_json(response).await;
        assert_eq!(body["updatedAt"], "2026-03-01T10:00:05.000Z");
        assert_eq!(body["values"]["grid_power"], 1200.0);
        assert_eq!(body["calculatedKeys"][0], "grid_in_energy_daily");
    }

    #[actix_web::test]
    async fn db_diagnostics_reports_schema_and_snapshot_age() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_state(true)))
                .configure(configure_routes),
        )
        .await;

        let response = test::call_service(
            &app,
            test::TestRequest::get().uri("/diagnostics/db").to_request(),
        )
        .await;
        assert!(response.status().is_success());

        let body: serde_json::Value = test::read_body_json(response).await;
        assert_eq!(body["schemaVersion"], 1);
        assert_eq!(body["snapshotUpdatedAt"], "2026-03-01T10:00:05.000Z");
    }
}
