use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use super::{parse_decimal, AppState};
use crate::domain::{GroupConfig, GroupId};
use crate::error::AppError;
use crate::ledger::BulkDeleteOutcome;
use crate::rates::RateProvider;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupConfigBody {
    pub fee_rate: String,
    pub in_rate: String,
    pub out_rate: String,
    pub handling_fee: String,
    #[serde(default)]
    pub is_open: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupConfigDto {
    pub group_id: String,
    pub fee_rate: String,
    pub in_rate: String,
    pub out_rate: String,
    pub handling_fee: String,
    pub is_open: bool,
}

impl From<GroupConfig> for GroupConfigDto {
    fn from(config: GroupConfig) -> Self {
        Self {
            group_id: config.group_id.0,
            fee_rate: config.fee_rate.to_canonical_string(),
            in_rate: config.in_rate.to_canonical_string(),
            out_rate: config.out_rate.to_canonical_string(),
            handling_fee: config.handling_fee.to_canonical_string(),
            is_open: config.is_open,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDeleteBody {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDeleteRequested {
    pub deadline_ms: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDeleteResponse {
    /// `confirmed`, `expired` or `noRequest`.
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<u64>,
}

impl From<BulkDeleteOutcome> for BulkDeleteResponse {
    fn from(outcome: BulkDeleteOutcome) -> Self {
        match outcome {
            BulkDeleteOutcome::Confirmed { deleted } => Self {
                outcome: "confirmed",
                deleted: Some(deleted),
            },
            BulkDeleteOutcome::Expired => Self {
                outcome: "expired",
                deleted: None,
            },
            BulkDeleteOutcome::NoRequest => Self {
                outcome: "noRequest",
                deleted: None,
            },
        }
    }
}

pub async fn get_config(
    Path(group_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<GroupConfigDto>, AppError> {
    let config = state.rates.group_config(&GroupId::new(group_id)).await?;
    Ok(Json(config.into()))
}

pub async fn put_config(
    Path(group_id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<GroupConfigBody>,
) -> Result<Json<GroupConfigDto>, AppError> {
    let config = GroupConfig {
        group_id: GroupId::new(group_id),
        fee_rate: parse_decimal("feeRate", &body.fee_rate)?,
        in_rate: parse_decimal("inRate", &body.in_rate)?,
        out_rate: parse_decimal("outRate", &body.out_rate)?,
        handling_fee: parse_decimal("handlingFee", &body.handling_fee)?,
        is_open: body.is_open,
    };
    state.rates.set_group_config(&config).await?;
    Ok(Json(config.into()))
}

pub async fn request_bulk_delete(
    Path(group_id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<BulkDeleteBody>,
) -> Result<Json<BulkDeleteRequested>, AppError> {
    if body.user_id.trim().is_empty() {
        return Err(AppError::BadRequest("userId must not be empty".to_string()));
    }
    let deadline = state
        .ledger
        .request_bulk_delete(GroupId::new(group_id), &body.user_id);
    Ok(Json(BulkDeleteRequested {
        deadline_ms: deadline.as_ms(),
    }))
}

pub async fn confirm_bulk_delete(
    Path(group_id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<BulkDeleteBody>,
) -> Result<Json<BulkDeleteResponse>, AppError> {
    let outcome = state
        .ledger
        .confirm_bulk_delete(GroupId::new(group_id), &body.user_id)
        .await?;
    Ok(Json(outcome.into()))
}
