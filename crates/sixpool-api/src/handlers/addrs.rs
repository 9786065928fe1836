//! Lease API handlers.
//!
//! Capacity misses and spawn failures come back as `success: false`
//! bodies, never as HTTP errors; 400 is reserved for rejected input and
//! 5xx for bugs.

use std::collections::BTreeMap;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use tracing::warn;

use sixpool_models::api::default_dbname;
use sixpool_models::{
    is_valid_dbname, parse_addr, CheckResponse, ChecksResponse, FlushResponse, PickResponse,
    PicksResponse, ReportAck, ReportRequest, ReportsRequest, SaveResponse, SpawnManyResponse,
    SpawnResponse,
};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SpawnsQuery {
    num: Option<usize>,
}

#[derive(Deserialize)]
pub struct PickQuery {
    dbname: Option<String>,
}

#[derive(Deserialize)]
pub struct PicksQuery {
    dbname: Option<String>,
    num: Option<usize>,
}

#[derive(Deserialize)]
pub struct CheckQuery {
    addr: String,
}

#[derive(Deserialize)]
pub struct ChecksQuery {
    /// Comma-separated address literals.
    addrs: String,
}

#[derive(Deserialize)]
pub struct StatsQuery {
    dbname: Option<String>,
}

#[derive(Deserialize)]
pub struct FlushQuery {
    dbname: Option<String>,
}

fn validate_num(num: Option<usize>) -> ApiResult<usize> {
    let num = num.unwrap_or(1);
    if (1..=100).contains(&num) {
        Ok(num)
    } else {
        Err(ApiError::bad_request(format!(
            "num must be between 1 and 100, got {num}"
        )))
    }
}

fn validate_dbname(dbname: Option<String>) -> ApiResult<String> {
    let dbname = dbname.unwrap_or_else(default_dbname);
    if is_valid_dbname(&dbname) {
        Ok(dbname)
    } else {
        Err(ApiError::bad_request(format!("invalid dbname: {dbname:?}")))
    }
}

fn validate_addr(addr: &str) -> ApiResult<()> {
    parse_addr(addr)
        .map(|_| ())
        .map_err(|e| ApiError::bad_request(e.to_string()))
}

/// `GET /spawn` - verify one new address into the global pool.
pub async fn spawn(State(state): State<AppState>) -> Json<SpawnResponse> {
    let addr = state.pool.spawn_one().await;
    let success = addr.is_some();
    Json(SpawnResponse {
        success,
        addr,
        reason: (!success).then(|| {
            "all reachability checks failed for the candidate; \
             the uplink may be down"
                .to_string()
        }),
    })
}

/// `GET /spawns?num=N` - verify up to N new addresses.
pub async fn spawns(
    State(state): State<AppState>,
    Query(query): Query<SpawnsQuery>,
) -> ApiResult<Json<SpawnManyResponse>> {
    let num = validate_num(query.num)?;
    let (addrs, stopped) = state.pool.spawn_many(num).await;
    Ok(Json(SpawnManyResponse {
        success: !addrs.is_empty(),
        addrs,
        stopped,
    }))
}

/// `GET /pick?dbname=X` - lease one idle address from a mirror.
pub async fn pick(
    State(state): State<AppState>,
    Query(query): Query<PickQuery>,
) -> ApiResult<Json<PickResponse>> {
    let dbname = validate_dbname(query.dbname)?;
    let addr = state.pool.pick(&dbname);
    Ok(Json(PickResponse {
        success: addr.is_some(),
        addr,
        dbname,
    }))
}

/// `GET /picks?dbname=X&num=N` - lease up to N idle addresses.
pub async fn picks(
    State(state): State<AppState>,
    Query(query): Query<PicksQuery>,
) -> ApiResult<Json<PicksResponse>> {
    let dbname = validate_dbname(query.dbname)?;
    let num = validate_num(query.num)?;
    let addrs = state.pool.pick_many(&dbname, num);
    Ok(Json(PicksResponse {
        success: !addrs.is_empty(),
        addrs,
        dbname,
    }))
}

/// `GET /check?addr=A` - probe one address's reachability.
pub async fn check(
    State(state): State<AppState>,
    Query(query): Query<CheckQuery>,
) -> ApiResult<Json<CheckResponse>> {
    validate_addr(&query.addr)?;
    let usable = state.pool.check_addr(&query.addr).await;
    Ok(Json(CheckResponse {
        success: true,
        addr: query.addr,
        usable,
    }))
}

/// `GET /checks?addrs=A,B,C` - probe several addresses.
pub async fn checks(
    State(state): State<AppState>,
    Query(query): Query<ChecksQuery>,
) -> ApiResult<Json<ChecksResponse>> {
    let addrs: Vec<String> = query
        .addrs
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if addrs.is_empty() {
        return Err(ApiError::bad_request("addrs must name at least one address"));
    }
    for addr in &addrs {
        validate_addr(addr)?;
    }

    let mut results = BTreeMap::new();
    for addr in addrs {
        let usable = state.pool.check_addr(&addr).await;
        results.insert(addr, usable);
    }
    Ok(Json(ChecksResponse {
        success: true,
        results,
    }))
}

/// `POST /report` - return one address with a status.
pub async fn report(
    State(state): State<AppState>,
    Json(body): Json<ReportRequest>,
) -> ApiResult<Json<ReportAck>> {
    let dbname = validate_dbname(Some(body.dbname))?;
    validate_addr(&body.report_info.addr)?;
    state.pool.report(&dbname, &body.report_info);
    Ok(Json(ReportAck {
        success: true,
        dbname,
    }))
}

/// `POST /reports` - return several addresses at once.
pub async fn reports(
    State(state): State<AppState>,
    Json(body): Json<ReportsRequest>,
) -> ApiResult<Json<ReportAck>> {
    let dbname = validate_dbname(Some(body.dbname))?;
    for info in &body.report_infos {
        validate_addr(&info.addr)?;
    }
    state.pool.report_many(&dbname, &body.report_infos);
    Ok(Json(ReportAck {
        success: true,
        dbname,
    }))
}

/// `GET /stats` - global stats, or one mirror's stats with `dbname`.
pub async fn stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let value = match query.dbname {
        Some(dbname) => {
            let dbname = validate_dbname(Some(dbname))?;
            serde_json::to_value(state.pool.mirror_stats(&dbname))
        }
        None => serde_json::to_value(state.pool.global_stats()),
    }
    .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(value))
}

/// `POST /save` - persist the global pool and every mirror.
pub async fn save(State(state): State<AppState>) -> Json<SaveResponse> {
    let success = match state.pool.save_all().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "save failed");
            false
        }
    };
    Json(SaveResponse { success })
}

/// `POST /flush` - empty every store, or one mirror with `dbname`.
pub async fn flush(
    State(state): State<AppState>,
    Query(query): Query<FlushQuery>,
) -> ApiResult<Json<FlushResponse>> {
    let dbname = match query.dbname {
        Some(dbname) => Some(validate_dbname(Some(dbname))?),
        None => None,
    };
    let success = match state.pool.flush(dbname.as_deref()) {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "flush failed");
            false
        }
    };
    Ok(Json(FlushResponse { success, dbname }))
}
