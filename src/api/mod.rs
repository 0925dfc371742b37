pub mod groups;
pub mod health;
pub mod rates;
pub mod summaries;
pub mod transactions;

use crate::domain::{BusinessDate, Decimal};
use crate::error::AppError;
use crate::ledger::Ledger;
use crate::rates::SqliteRateProvider;
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub rates: Arc<SqliteRateProvider>,
}

impl AppState {
    pub fn new(ledger: Arc<Ledger>, rates: Arc<SqliteRateProvider>) -> Self {
        Self { ledger, rates }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route(
            "/v1/transactions",
            post(transactions::record_transaction).get(transactions::list_transactions),
        )
        .route("/v1/transactions/:id", delete(transactions::cancel_by_id))
        .route(
            "/v1/groups/:group_id/refs/:display_ref",
            delete(transactions::cancel_by_ref),
        )
        .route("/v1/today", get(summaries::get_today))
        .route("/v1/summaries", get(summaries::list_summaries))
        .route("/v1/summaries/rebuild", post(summaries::rebuild))
        .route("/v1/summaries/:date", get(summaries::get_summary))
        .route(
            "/v1/summaries/:date/groups/:group_id",
            get(summaries::get_group_summary),
        )
        .route(
            "/v1/rates/:name",
            get(rates::get_rate).put(rates::put_rate),
        )
        .route(
            "/v1/groups/:group_id/config",
            get(groups::get_config).put(groups::put_config),
        )
        .route(
            "/v1/groups/:group_id/bulk-delete",
            post(groups::request_bulk_delete),
        )
        .route(
            "/v1/groups/:group_id/bulk-delete/confirm",
            post(groups::confirm_bulk_delete),
        )
        .layer(cors)
        .with_state(state)
}

fn parse_decimal(field: &str, raw: &str) -> Result<Decimal, AppError> {
    Decimal::from_str_canonical(raw)
        .map_err(|_| AppError::BadRequest(format!("{} is not a decimal number: {:?}", field, raw)))
}

fn parse_date(field: &str, raw: &str) -> Result<BusinessDate, AppError> {
    raw.parse::<BusinessDate>()
        .map_err(|e| AppError::BadRequest(format!("{}: {}", field, e)))
}
