use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use super::{parse_date, AppState};
use crate::domain::{
    AggregateSums, DailySummary, DailyTotals, DerivedFigures, GroupDailyAggregate, GroupId,
};
use crate::error::AppError;
use crate::ledger::RebuildReport;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummariesQuery {
    pub start_date: String,
    pub end_date: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildBody {
    pub start_date: String,
    pub end_date: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TodayResponse {
    pub business_date: String,
    pub window_start_ms: i64,
    pub window_end_ms: i64,
}

/// Sums and derived figures of one aggregate row, decimals as strings.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FiguresDto {
    pub incoming_count: i64,
    pub incoming_amount: String,
    pub incoming_usdt: String,
    pub actual_incoming_usdt: String,
    pub sell_usdt: String,
    pub sell_profit: String,
    pub outgoing_count: i64,
    pub outgoing_usdt: String,
    pub payout_count: i64,
    pub payout_amount: String,
    pub payout_fees: String,
    pub payout_usdt: String,
    pub payout_commission: String,
    pub should_issued: String,
    pub pending_usdt: String,
    pub wallet: String,
    pub profit: String,
}

impl FiguresDto {
    fn new(sums: &AggregateSums, derived: &DerivedFigures) -> Self {
        Self {
            incoming_count: sums.incoming_count,
            incoming_amount: sums.incoming_amount.to_canonical_string(),
            incoming_usdt: sums.incoming_usdt.to_canonical_string(),
            actual_incoming_usdt: sums.actual_incoming_usdt.to_canonical_string(),
            sell_usdt: sums.sell_usdt.to_canonical_string(),
            sell_profit: sums.sell_profit.to_canonical_string(),
            outgoing_count: sums.outgoing_count,
            outgoing_usdt: sums.outgoing_usdt.to_canonical_string(),
            payout_count: sums.payout_count,
            payout_amount: sums.payout_amount.to_canonical_string(),
            payout_fees: sums.payout_fees.to_canonical_string(),
            payout_usdt: sums.payout_usdt.to_canonical_string(),
            payout_commission: sums.payout_commission.to_canonical_string(),
            should_issued: derived.should_issued.to_canonical_string(),
            pending_usdt: derived.pending_usdt.to_canonical_string(),
            wallet: derived.wallet.to_canonical_string(),
            profit: derived.profit.to_canonical_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupAggregateDto {
    pub business_date: String,
    pub group_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(flatten)]
    pub figures: FiguresDto,
    pub version: i64,
}

impl From<GroupDailyAggregate> for GroupAggregateDto {
    fn from(row: GroupDailyAggregate) -> Self {
        Self {
            business_date: row.business_date.as_key(),
            group_id: row.group_id.0,
            group_name: row.group_name,
            figures: FiguresDto::new(&row.sums, &row.derived),
            version: row.version,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyTotalsDto {
    pub business_date: String,
    #[serde(flatten)]
    pub figures: FiguresDto,
    pub version: i64,
}

impl From<DailyTotals> for DailyTotalsDto {
    fn from(row: DailyTotals) -> Self {
        Self {
            business_date: row.business_date.as_key(),
            figures: FiguresDto::new(&row.sums, &row.derived),
            version: row.version,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryDto {
    pub business_date: String,
    pub totals: DailyTotalsDto,
    pub groups: Vec<GroupAggregateDto>,
}

impl From<DailySummary> for SummaryDto {
    fn from(summary: DailySummary) -> Self {
        Self {
            business_date: summary.totals.business_date.as_key(),
            totals: summary.totals.into(),
            groups: summary.groups.into_iter().map(Into::into).collect(),
        }
    }
}

pub async fn get_today(State(state): State<AppState>) -> Result<Json<TodayResponse>, AppError> {
    let date = state.ledger.today_key()?;
    let window = state.ledger.window_for(date);
    Ok(Json(TodayResponse {
        business_date: date.as_key(),
        window_start_ms: window.start.as_ms(),
        window_end_ms: window.end.as_ms(),
    }))
}

pub async fn list_summaries(
    Query(params): Query<SummariesQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<SummaryDto>>, AppError> {
    let start = parse_date("startDate", &params.start_date)?;
    let end = parse_date("endDate", &params.end_date)?;
    let summaries = state.ledger.list_summaries(start, end).await?;
    Ok(Json(summaries.into_iter().map(SummaryDto::from).collect()))
}

pub async fn get_summary(
    Path(date): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<SummaryDto>, AppError> {
    let date = parse_date("date", &date)?;
    let summary = state
        .ledger
        .list_summaries(date, date)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::NotFound(format!("no aggregates for {}", date)))?;
    Ok(Json(summary.into()))
}

pub async fn get_group_summary(
    Path((date, group_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<GroupAggregateDto>, AppError> {
    let date = parse_date("date", &date)?;
    let group_id = GroupId::new(group_id);
    let row = state
        .ledger
        .get_group_aggregate(date, &group_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no aggregate for {} on {}", group_id, date)))?;
    Ok(Json(row.into()))
}

pub async fn rebuild(
    State(state): State<AppState>,
    Json(body): Json<RebuildBody>,
) -> Result<Json<RebuildReport>, AppError> {
    let start = parse_date("startDate", &body.start_date)?;
    let end = parse_date("endDate", &body.end_date)?;
    let report = state.ledger.rebuild_range(start, end).await?;
    Ok(Json(report))
}
