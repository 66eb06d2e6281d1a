use super::ApiState;
use crate::error::ApiError;
use crate::models::{
    ApiKey, IndexObservation, IndexType, MarketSummary, MovementType, PriceRecord, Security,
    SecurityType, TopMover,
};
use crate::storage::{
    IndexFilter, MarketStore, PriceQuery, PriceStore, SecurityFilter, SecurityStore,
};
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Extension, Json,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

type ApiResult<T> = Result<Json<T>, ApiError>;

const MAX_LIMIT: usize = 1000;

fn check_limit(limit: usize) -> Result<usize, ApiError> {
    if (1..=MAX_LIMIT).contains(&limit) {
        Ok(limit)
    } else {
        Err(ApiError::BadRequest(format!("limit must be between 1 and {}", MAX_LIMIT)))
    }
}

fn parse_param<T>(value: Option<&str>) -> Result<Option<T>, ApiError>
where
    T: std::str::FromStr<Err = String>,
{
    value
        .filter(|v| !v.is_empty())
        .map(|v| v.parse::<T>().map_err(ApiError::BadRequest))
        .transpose()
}

// ── System ────────────────────────────────────────────────────────────────────

pub async fn root() -> impl IntoResponse {
    Json(json!({
        "name": "ZSE Market Data API",
        "version": env!("CARGO_PKG_VERSION"),
        "auth": "Send your key in the X-API-Key header",
        "endpoints": [
            "/api/v1/securities",
            "/api/v1/securities/{symbol}",
            "/api/v1/securities/{symbol}/prices",
            "/api/v1/securities/{symbol}/latest",
            "/api/v1/market/summary",
            "/api/v1/market/movers",
            "/api/v1/market/indices",
            "/api/v1/account/usage",
        ],
    }))
}

pub async fn health_check(State(state): State<Arc<ApiState>>) -> ApiResult<Value> {
    state
        .with_repo(|repo| repo.ping())
        .await
        .map_err(|e| ApiError::Unavailable(format!("Database unavailable: {}", e)))?;

    Ok(Json(json!({
        "status": "healthy",
        "database": "connected",
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

// ── Securities ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SecuritiesParams {
    pub security_type: Option<String>,
    pub sector: Option<String>,
    pub active_only: Option<bool>,
}

pub async fn list_securities(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<SecuritiesParams>,
) -> ApiResult<Vec<Security>> {
    let filter = SecurityFilter {
        security_type: parse_param::<SecurityType>(params.security_type.as_deref())?,
        sector: params.sector.filter(|s| !s.is_empty()),
        active_only: params.active_only.unwrap_or(true),
    };
    let securities = state.query(move |s| s.list_securities(&filter)).await?;
    Ok(Json(securities))
}

pub async fn get_security(
    State(state): State<Arc<ApiState>>,
    Path(symbol): Path<String>,
) -> ApiResult<Security> {
    let symbol = symbol.to_uppercase();
    let lookup = symbol.clone();
    state
        .query(move |s| s.get_security(&lookup))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Security {} not found", symbol)))
}

// ── Prices ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PricesParams {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub limit: Option<usize>,
}

pub async fn get_prices(
    State(state): State<Arc<ApiState>>,
    Path(symbol): Path<String>,
    Query(params): Query<PricesParams>,
) -> ApiResult<Vec<PriceRecord>> {
    let symbol = symbol.to_uppercase();
    let query = PriceQuery {
        start_date: params.start_date,
        end_date: params.end_date,
        limit: check_limit(params.limit.unwrap_or(30))?,
    };

    let lookup = symbol.clone();
    let prices = state.query(move |s| s.price_history(&lookup, &query)).await?;
    if prices.is_empty() {
        return Err(ApiError::NotFound(format!("No price data found for {}", symbol)));
    }
    Ok(Json(prices))
}

pub async fn get_latest_price(
    State(state): State<Arc<ApiState>>,
    Path(symbol): Path<String>,
) -> ApiResult<PriceRecord> {
    let symbol = symbol.to_uppercase();
    let lookup = symbol.clone();
    state
        .query(move |s| s.latest_price(&lookup))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No price data found for {}", symbol)))
}

// ── Market ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SummaryParams {
    pub trade_date: Option<NaiveDate>,
}

pub async fn get_market_summary(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<SummaryParams>,
) -> ApiResult<MarketSummary> {
    state
        .query(move |s| s.market_summary(params.trade_date))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("No market data available".to_string()))
}

#[derive(Debug, Deserialize)]
pub struct MoversParams {
    #[serde(rename = "type")]
    pub movement: Option<String>,
    pub limit: Option<usize>,
}

pub async fn get_top_movers(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<MoversParams>,
) -> ApiResult<Vec<TopMover>> {
    let wanted: &[MovementType] = match params.movement.as_deref().unwrap_or("both") {
        "gainers" => &[MovementType::Gainer],
        "losers" => &[MovementType::Loser],
        "both" => &[MovementType::Gainer, MovementType::Loser],
        other => {
            return Err(ApiError::BadRequest(format!(
                "Invalid type '{}'. Choose from: gainers, losers, both",
                other
            )))
        }
    };
    let limit = check_limit(params.limit.unwrap_or(5))?;

    let wanted = wanted.to_vec();
    let movers = state
        .query(move |s| {
            let mut out = Vec::new();
            for movement in wanted {
                out.extend(s.top_movers(movement, limit)?);
            }
            Ok(out)
        })
        .await?;
    Ok(Json(movers))
}

#[derive(Debug, Deserialize)]
pub struct IndicesParams {
    pub index_type: Option<String>,
    pub trade_date: Option<NaiveDate>,
}

pub async fn get_market_indices(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<IndicesParams>,
) -> ApiResult<Vec<IndexObservation>> {
    let filter = IndexFilter {
        index_type: parse_param::<IndexType>(params.index_type.as_deref())?,
        trade_date: params.trade_date,
    };
    let indices = state.query(move |s| s.list_indices(&filter)).await?;
    Ok(Json(indices))
}

// ── Account ───────────────────────────────────────────────────────────────────

/// Usage as of (and including) this request.
pub async fn get_account_usage(Extension(key): Extension<ApiKey>) -> Json<Value> {
    Json(json!({
        "key_prefix": key.key_prefix,
        "user_email": key.user_email,
        "tier": key.tier,
        "requests_today": key.requests_today,
        "daily_limit": key.daily_limit,
        "remaining_today": (key.daily_limit - key.requests_today).max(0),
        "requests_month": key.requests_month,
        "monthly_limit": key.monthly_limit,
        "remaining_month": (key.monthly_limit - key.requests_month).max(0),
        "created_at": key.created_at,
        "last_used_at": key.last_used_at,
    }))
}
