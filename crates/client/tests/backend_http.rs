// Path: crates/client/tests/backend_http.rs

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use auditchain_api::store::BackendStore;
use auditchain_client::HttpBackendStore;
use auditchain_types::config::BackendConfig;
use auditchain_types::error::StoreError;
use auditchain_types::report::ReportId;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

#[derive(Default)]
struct Reports {
    rows: Mutex<HashMap<String, Value>>,
    fail_certify: Mutex<bool>,
}

type Shared = Arc<Reports>;

async fn list(State(db): State<Shared>) -> Json<Value> {
    let rows = db.rows.lock().unwrap();
    let mut out: Vec<Value> = rows
        .values()
        .map(|r| {
            json!({
                "id": r["id"],
                "filename": r["filename"],
                "timestamp": r["timestamp"],
                "quality_score": r["quality_score"],
                "is_certified": r["is_certified"],
            })
        })
        .collect();
    out.sort_by(|a, b| b["timestamp"].as_str().cmp(&a["timestamp"].as_str()));
    Json(Value::Array(out))
}

async fn show(State(db): State<Shared>, Path(id): Path<String>) -> Response {
    match db.rows.lock().unwrap().get(&id) {
        Some(row) => Json(row.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, "no such report").into_response(),
    }
}

async fn remove(State(db): State<Shared>, Path(id): Path<String>) -> Response {
    match db.rows.lock().unwrap().remove(&id) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn certify(State(db): State<Shared>, Path(id): Path<String>) -> Response {
    if *db.fail_certify.lock().unwrap() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "database is locked").into_response();
    }
    match db.rows.lock().unwrap().get_mut(&id) {
        Some(row) => {
            row["is_certified"] = json!(true);
            Json(json!({ "status": "ok" })).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn spawn_backend() -> (String, Shared) {
    let db: Shared = Arc::new(Reports::default());
    {
        let mut rows = db.rows.lock().unwrap();
        rows.insert(
            "r-1".into(),
            json!({
                "id": "r-1",
                "filename": "q1.csv",
                "timestamp": "2025-01-02T10:00:00",
                "report_hash_preview": "0xabc123",
                "quality_score": 91.5,
                "is_certified": false
            }),
        );
        rows.insert(
            "r-2".into(),
            json!({
                "id": "r-2",
                "filename": "q2.xlsx",
                "timestamp": "2025-03-04T08:30:00",
                "report_hash": "0xdef456",
                "analysis": { "quality_analysis": { "score": 70 } },
                "is_certified": true
            }),
        );
    }
    let app = Router::new()
        .route("/reports", get(list))
        .route("/reports/:id", get(show).delete(remove))
        .route("/reports/:id/certify", post(certify))
        .with_state(db.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    // Trailing slash is tolerated.
    (format!("http://{}/", addr), db)
}

fn store_for(base_url: String) -> HttpBackendStore {
    HttpBackendStore::new(&BackendConfig {
        base_url,
        ..BackendConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn lists_reports_newest_first() {
    let (url, _db) = spawn_backend().await;
    let store = store_for(url);
    let reports = store.list_reports().await.unwrap();
    let ids: Vec<_> = reports.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["r-2", "r-1"]);
    assert!(reports.iter().all(|r| r.content_fingerprint.is_none()));
}

#[tokio::test]
async fn fetches_full_report_with_legacy_fields() {
    let (url, _db) = spawn_backend().await;
    let store = store_for(url);
    let report = store.get_report(&ReportId::from("r-2")).await.unwrap();
    assert_eq!(report.content_fingerprint.unwrap().as_str(), "0xdef456");
    assert_eq!(report.quality_score, 70.0);
    assert!(report.is_certified);
}

#[tokio::test]
async fn certify_sets_flag_and_is_idempotent() {
    let (url, db) = spawn_backend().await;
    let store = store_for(url);
    let id = ReportId::from("r-1");
    store.update_certification_flag(&id).await.unwrap();
    store.update_certification_flag(&id).await.unwrap();
    assert_eq!(db.rows.lock().unwrap()["r-1"]["is_certified"], json!(true));
}

#[tokio::test]
async fn missing_report_maps_to_not_found() {
    let (url, _db) = spawn_backend().await;
    let store = store_for(url);
    let id = ReportId::from("nope");
    assert_eq!(
        store.get_report(&id).await.unwrap_err(),
        StoreError::NotFound(id.clone())
    );
    assert_eq!(
        store.delete_report(&id).await.unwrap_err(),
        StoreError::NotFound(id)
    );
}

#[tokio::test]
async fn server_errors_carry_status_and_body() {
    let (url, db) = spawn_backend().await;
    *db.fail_certify.lock().unwrap() = true;
    let store = store_for(url);
    let err = store
        .update_certification_flag(&ReportId::from("r-1"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        StoreError::Status {
            status: 500,
            body: "database is locked".into()
        }
    );
}

#[tokio::test]
async fn delete_removes_report() {
    let (url, db) = spawn_backend().await;
    let store = store_for(url);
    store.delete_report(&ReportId::from("r-1")).await.unwrap();
    assert!(!db.rows.lock().unwrap().contains_key("r-1"));
}

#[tokio::test]
async fn unreachable_backend_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let store = store_for(format!("http://{}", addr));
    assert!(matches!(
        store.list_reports().await,
        Err(StoreError::Transport(_))
    ));
}
