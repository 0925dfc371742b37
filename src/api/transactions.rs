use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use super::{parse_date, parse_decimal, AppState};
use crate::domain::{GroupId, RecordAmount, RecordRequest, TimeMs, Transaction, TransactionKind};
use crate::engine::sequence;
use crate::error::AppError;
use crate::ledger::CancelTarget;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordTransactionBody {
    pub kind: TransactionKind,
    pub group_id: String,
    pub group_name: Option<String>,
    /// Inbound and proxy payout.
    pub local_amount: Option<String>,
    /// Dispatch.
    pub usdt_amount: Option<String>,
    pub occurred_at_ms: Option<i64>,
    /// Raw message reference, or its compact display form.
    pub external_ref: Option<String>,
    pub operator: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTransactionsQuery {
    pub group_id: String,
    /// Defaults to today's business date.
    pub date: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDto {
    pub id: i64,
    pub kind: TransactionKind,
    pub group_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    pub business_date: String,
    pub occurred_at_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_amount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usdt_amount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange_rate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee_rate_percent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handling_fee: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buy_rate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sell_rate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<i64>,
    /// `externalRef` in compact form, e.g. `a1` for 1000000.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl From<Transaction> for TransactionDto {
    fn from(tx: Transaction) -> Self {
        let display_ref = tx
            .external_ref
            .and_then(|r| u64::try_from(r).ok())
            .and_then(|r| sequence::encode(r).ok());
        Self {
            id: tx.id,
            kind: tx.kind,
            group_id: tx.group_id.0,
            group_name: tx.group_name,
            business_date: tx.business_date.as_key(),
            occurred_at_ms: tx.occurred_at.as_ms(),
            local_amount: tx.local_amount.map(|d| d.to_canonical_string()),
            usdt_amount: tx.usdt_amount.map(|d| d.to_canonical_string()),
            exchange_rate: tx.exchange_rate.map(|d| d.to_canonical_string()),
            fee_rate_percent: tx.fee_rate_percent.map(|d| d.to_canonical_string()),
            handling_fee: tx.handling_fee.map(|d| d.to_canonical_string()),
            buy_rate: tx.buy_rate.map(|d| d.to_canonical_string()),
            sell_rate: tx.sell_rate.map(|d| d.to_canonical_string()),
            external_ref: tx.external_ref,
            display_ref,
            operator: tx.operator,
            note: tx.note,
        }
    }
}

pub async fn record_transaction(
    State(state): State<AppState>,
    Json(body): Json<RecordTransactionBody>,
) -> Result<(StatusCode, Json<TransactionDto>), AppError> {
    let request = into_record_request(body)?;
    let stored = state.ledger.record_transaction(request).await?;
    Ok((StatusCode::CREATED, Json(stored.into())))
}

pub async fn list_transactions(
    Query(params): Query<ListTransactionsQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<TransactionDto>>, AppError> {
    let date = match params.date.as_deref() {
        Some(raw) => parse_date("date", raw)?,
        None => state.ledger.today_key()?,
    };
    let txs = state
        .ledger
        .list_group_transactions(&GroupId::new(params.group_id), date)
        .await?;
    Ok(Json(txs.into_iter().map(TransactionDto::from).collect()))
}

pub async fn cancel_by_id(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<TransactionDto>, AppError> {
    let cancelled = state.ledger.cancel_transaction(CancelTarget::Id(id)).await?;
    Ok(Json(cancelled.into()))
}

/// Cancel the newest transaction in today's window carrying the reference.
pub async fn cancel_by_ref(
    Path((group_id, display_ref)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<TransactionDto>, AppError> {
    let external_ref = parse_external_ref(&display_ref)?;
    let cancelled = state
        .ledger
        .cancel_transaction(CancelTarget::ExternalRef {
            group_id: GroupId::new(group_id),
            external_ref,
        })
        .await?;
    Ok(Json(cancelled.into()))
}

fn into_record_request(body: RecordTransactionBody) -> Result<RecordRequest, AppError> {
    let amount = match body.kind {
        TransactionKind::Inbound => RecordAmount::Inbound {
            local_amount: required_decimal("localAmount", body.local_amount.as_deref())?,
        },
        TransactionKind::ProxyPayout => RecordAmount::ProxyPayout {
            local_amount: required_decimal("localAmount", body.local_amount.as_deref())?,
        },
        TransactionKind::Dispatch => RecordAmount::Dispatch {
            usdt_amount: required_decimal("usdtAmount", body.usdt_amount.as_deref())?,
        },
    };

    let mut request = RecordRequest::new(GroupId::new(body.group_id), amount);
    request.group_name = body.group_name;
    request.occurred_at = body.occurred_at_ms.map(TimeMs::new);
    request.external_ref = body
        .external_ref
        .as_deref()
        .map(parse_external_ref)
        .transpose()?;
    request.operator = body.operator;
    request.note = body.note;
    Ok(request)
}

fn required_decimal(field: &str, raw: Option<&str>) -> Result<crate::domain::Decimal, AppError> {
    let raw = raw.ok_or_else(|| AppError::BadRequest(format!("{} is required", field)))?;
    parse_decimal(field, raw)
}

fn parse_external_ref(raw: &str) -> Result<i64, AppError> {
    let value = sequence::decode(raw).map_err(|e| AppError::BadRequest(e.to_string()))?;
    i64::try_from(value)
        .map_err(|_| AppError::BadRequest(format!("reference out of range: {}", raw)))
}
