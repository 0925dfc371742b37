use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use super::{parse_decimal, AppState};
use crate::domain::GlobalRate;
use crate::error::AppError;
use crate::rates::RateProvider;

#[derive(Debug, Deserialize)]
pub struct RateBody {
    pub value: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateResponse {
    pub name: String,
    /// `None` when the rate has never been set.
    pub value: Option<String>,
}

fn parse_rate(name: &str) -> Result<GlobalRate, AppError> {
    name.parse::<GlobalRate>().map_err(AppError::NotFound)
}

pub async fn get_rate(
    Path(name): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<RateResponse>, AppError> {
    let rate = parse_rate(&name)?;
    let value = state.rates.global_rate(rate).await?;
    Ok(Json(RateResponse {
        name: rate.key().to_string(),
        value: value.map(|v| v.to_canonical_string()),
    }))
}

pub async fn put_rate(
    Path(name): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<RateBody>,
) -> Result<Json<RateResponse>, AppError> {
    let rate = parse_rate(&name)?;
    let value = parse_decimal("value", &body.value)?;
    state.rates.set_global_rate(rate, value).await?;
    Ok(Json(RateResponse {
        name: rate.key().to_string(),
        value: Some(value.to_canonical_string()),
    }))
}
