use axum::body::Body;
use axum::http::{Request, StatusCode};
use daybook::api::{self, AppState};
use daybook::db::init_db;
use daybook::engine::BusinessClock;
use daybook::{Ledger, LedgerSettings, Repository, SqliteRateProvider};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

/// 2024-03-10 12:00 at UTC+8.
const MIDDAY: i64 = 1_710_043_200_000;

async fn setup_test_app() -> (axum::Router, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();

    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));
    let rates = Arc::new(SqliteRateProvider::new(repo.clone()));
    let ledger = Ledger::new(
        repo,
        rates.clone(),
        BusinessClock::default(),
        LedgerSettings::default(),
    );

    (
        api::create_router(AppState::new(Arc::new(ledger), rates)),
        temp_dir,
    )
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn configure_g1(app: &axum::Router) {
    let (status, _) = send(
        app,
        "PUT",
        "/v1/groups/g1/config",
        Some(json!({
            "feeRate": "2",
            "inRate": "62.5",
            "outRate": "62.4",
            "handlingFee": "5",
            "isOpen": true
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_health_and_ready() {
    let (app, _temp) = setup_test_app().await;

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(&app, "GET", "/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn test_record_and_read_summary() {
    let (app, _temp) = setup_test_app().await;
    configure_g1(&app).await;

    let (status, tx) = send(
        &app,
        "POST",
        "/v1/transactions",
        Some(json!({
            "kind": "inbound",
            "groupId": "g1",
            "groupName": "Desk One",
            "localAmount": "1000000",
            "occurredAtMs": MIDDAY,
            "externalRef": "1000000",
            "operator": "alice"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(tx["businessDate"], "2024-03-10");
    assert_eq!(tx["usdtAmount"], "16000");
    assert_eq!(tx["exchangeRate"], "62.5");
    assert_eq!(tx["buyRate"], "16300");
    assert_eq!(tx["displayRef"], "a1");

    let (status, summary) = send(&app, "GET", "/v1/summaries/2024-03-10", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["totals"]["incomingUsdt"], "16000");
    assert_eq!(summary["totals"]["shouldIssued"], "15680");
    assert_eq!(summary["groups"][0]["groupName"], "Desk One");

    let (status, row) = send(&app, "GET", "/v1/summaries/2024-03-10/groups/g1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(row["profit"], "320");

    let (status, list) = send(
        &app,
        "GET",
        "/v1/summaries?startDate=2024-03-01&endDate=2024-03-31",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (status, txs) = send(&app, "GET", "/v1/transactions?groupId=g1&date=2024-03-10", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(txs.as_array().unwrap().len(), 1);
    assert_eq!(txs[0]["operator"], "alice");
}

#[tokio::test]
async fn test_cancel_by_id_and_by_ref() {
    let (app, _temp) = setup_test_app().await;
    configure_g1(&app).await;

    let (_, first) = send(
        &app,
        "POST",
        "/v1/transactions",
        Some(json!({"kind": "dispatch", "groupId": "g1", "usdtAmount": "100", "occurredAtMs": MIDDAY})),
    )
    .await;
    let id = first["id"].as_i64().unwrap();
    let (status, cancelled) = send(&app, "DELETE", &format!("/v1/transactions/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["id"], id);

    let (status, row) = send(&app, "GET", "/v1/summaries/2024-03-10/groups/g1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(row["outgoingCount"], 0);
    assert_eq!(row["outgoingUsdt"], "0");

    let (status, _) = send(&app, "DELETE", &format!("/v1/transactions/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // No occurredAtMs: lands in today's window, where reference lookups search.
    let (status, _) = send(
        &app,
        "POST",
        "/v1/transactions",
        Some(json!({"kind": "dispatch", "groupId": "g1", "usdtAmount": "5", "externalRef": "1999999"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, cancelled) = send(&app, "DELETE", "/v1/groups/g1/refs/b1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["externalRef"], 1_999_999);

    let (status, _) = send(&app, "DELETE", "/v1/groups/g1/refs/B1", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_validation_errors_are_bad_requests() {
    let (app, _temp) = setup_test_app().await;

    // g1 has no inbound rate yet.
    let (status, body) = send(
        &app,
        "POST",
        "/v1/transactions",
        Some(json!({"kind": "inbound", "groupId": "g1", "localAmount": "1000"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("exchange rate"));

    let (status, _) = send(
        &app,
        "POST",
        "/v1/transactions",
        Some(json!({"kind": "dispatch", "groupId": "g1", "usdtAmount": "0"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "GET",
        "/v1/summaries?startDate=2024-03-31&endDate=2024-03-01",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        "/v1/summaries/rebuild",
        Some(json!({"startDate": "2020-01-01", "endDate": "2024-12-31"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        "/v1/transactions",
        Some(json!({"kind": "dispatch", "groupId": "g1", "usdtAmount": "5", "occurredAtMs": 9_000_000_000_000_000_000_i64})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "GET", "/v1/summaries/2024-3-1", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "GET", "/v1/summaries/2024-03-01", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_global_rates_and_rebuild() {
    let (app, _temp) = setup_test_app().await;
    configure_g1(&app).await;

    let (status, rate) = send(&app, "GET", "/v1/rates/buyRate", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(rate["value"].is_null());

    let (status, _) = send(&app, "PUT", "/v1/rates/buyRate", Some(json!({"value": "0"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&app, "PUT", "/v1/rates/midRate", Some(json!({"value": "1"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, rate) = send(&app, "PUT", "/v1/rates/buyRate", Some(json!({"value": "16400"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rate["value"], "16400");

    let (_, tx) = send(
        &app,
        "POST",
        "/v1/transactions",
        Some(json!({"kind": "proxy_payout", "groupId": "g1", "localAmount": "312000", "occurredAtMs": MIDDAY})),
    )
    .await;
    assert_eq!(tx["buyRate"], "16400");
    assert_eq!(tx["usdtAmount"], "5005");

    let (status, report) = send(
        &app,
        "POST",
        "/v1/summaries/rebuild",
        Some(json!({"startDate": "2024-03-10", "endDate": "2024-03-10"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["transactionsFolded"], 1);
}

#[tokio::test]
async fn test_bulk_delete_handshake() {
    let (app, _temp) = setup_test_app().await;

    let (status, body) = send(
        &app,
        "POST",
        "/v1/groups/g1/bulk-delete/confirm",
        Some(json!({"userId": "alice"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "noRequest");

    send(
        &app,
        "POST",
        "/v1/transactions",
        Some(json!({"kind": "dispatch", "groupId": "g1", "usdtAmount": "5"})),
    )
    .await;

    let (status, body) = send(
        &app,
        "POST",
        "/v1/groups/g1/bulk-delete",
        Some(json!({"userId": "alice"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["deadlineMs"].as_i64().unwrap() > 0);

    let (status, body) = send(
        &app,
        "POST",
        "/v1/groups/g1/bulk-delete/confirm",
        Some(json!({"userId": "alice"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "confirmed");
    assert_eq!(body["deleted"], 1);
}
