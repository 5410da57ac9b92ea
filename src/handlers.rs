use crate::config::Config;
use crate::counts::CountCache;
use crate::errors::AppError;
use crate::models::{
    ApplicationResponse, Country, CountryQueryParam, CreateApplicationRequest, ListQueryParams,
    Pagination, Status, UpdateApplicationRequest,
};
use crate::notifier::{status_notification, BroadcastNotifier, Notifier};
use crate::queue::JobQueue;
use crate::store::{ApplicationStore, NewApplication};
use crate::strategies::CountryStrategy;
use crate::webhook::WebhookIngestor;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use bigdecimal::BigDecimal;
use serde_json::json;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

pub const PER_PAGE: i64 = 30;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: ApplicationStore,
    pub queue: JobQueue,
    pub notifier: Arc<BroadcastNotifier>,
    pub ingestor: WebhookIngestor,
    pub count_cache: CountCache,
}

/// The /api/v1 surface. Rate limiting and body limits are layered on top
/// of this router; /health lives outside it so probes bypass both.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/v1/credit_applications",
            get(list_applications).post(create_application),
        )
        .route(
            "/api/v1/credit_applications/:id",
            get(show_application)
                .patch(update_application)
                .delete(destroy_application),
        )
        .route(
            "/api/v1/credit_applications/:id/events",
            get(list_application_events),
        )
        .route("/api/v1/webhooks/banking_data", post(receive_banking_data))
        .route(
            "/api/v1/analytics/credit_applications/by_status",
            get(analytics_by_status),
        )
        .with_state(state)
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

// ============ Credit applications ============

async fn create_application(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateApplicationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = current_user_id(&headers)?;

    let mut errors = Vec::new();

    let country = match req.country.as_deref() {
        None => {
            errors.push("country is required".to_string());
            None
        }
        Some(value) => match Country::parse(value) {
            Ok(c) => Some(c),
            Err(e) => {
                errors.push(e.to_string());
                None
            }
        },
    };

    let full_name = req.full_name.as_deref().unwrap_or("").trim().to_string();
    if full_name.is_empty() {
        errors.push("full_name is required".to_string());
    }

    let requested_amount = match req.requested_amount {
        None => {
            errors.push("requested_amount is required".to_string());
            None
        }
        Some(amount) if amount <= 0.0 => {
            errors.push("requested_amount must be greater than zero".to_string());
            None
        }
        Some(amount) => match BigDecimal::from_str(&amount.to_string()) {
            Ok(d) => Some(d),
            Err(_) => {
                errors.push("requested_amount is not a valid amount".to_string());
                None
            }
        },
    };

    let status = match req.status.as_deref() {
        None => Some(Status::Pending),
        Some(value) => match Status::parse(value) {
            Ok(s) => Some(s),
            Err(e) => {
                errors.push(e.to_string());
                None
            }
        },
    };

    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    // All four are Some once errors is empty.
    let (Some(country), Some(requested_amount), Some(status)) =
        (country, requested_amount, status)
    else {
        return Err(AppError::InternalError(
            "application validation produced no value".to_string(),
        ));
    };

    let app = state
        .store
        .create(&NewApplication {
            country,
            full_name,
            requested_amount,
            status,
            user_id,
            document: req.identity_document,
        })
        .await?;

    let strategy = CountryStrategy::for_country(country);
    let process_result = strategy.process(&app, &state.queue).await?;

    state
        .count_cache
        .invalidate(country.as_str(), &[app.status.as_str()])
        .await;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "credit_application": ApplicationResponse::from_application(&app),
            "process_result": process_result,
        })),
    ))
}

async fn list_applications(
    State(state): State<AppState>,
    Query(params): Query<ListQueryParams>,
) -> Result<impl IntoResponse, AppError> {
    let country = match params.country.as_deref() {
        Some(value) => Some(Country::parse(value)?),
        None => None,
    };
    let status = match params.status.as_deref() {
        Some(value) => Some(Status::parse(value)?),
        None => None,
    };
    let page = params.page.unwrap_or(1).max(1);

    let country_str = country.map(|c| c.as_str());
    let status_str = status.map(|s| s.as_str());

    let apps = state
        .store
        .list(country_str, status_str, page, PER_PAGE)
        .await?;

    let total_count = match state.count_cache.get(country_str, status_str).await {
        Some(count) => count,
        None => {
            let count = state.store.count(country_str, status_str).await?;
            state.count_cache.insert(country_str, status_str, count).await;
            count
        }
    };

    let responses: Vec<ApplicationResponse> = apps
        .iter()
        .map(ApplicationResponse::from_application)
        .collect();

    Ok(Json(json!({
        "credit_applications": responses,
        "pagination": Pagination {
            page,
            per_page: PER_PAGE,
            total_count,
            total_pages: (total_count + PER_PAGE - 1) / PER_PAGE,
        },
    })))
}

async fn show_application(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<CountryQueryParam>,
) -> Result<impl IntoResponse, AppError> {
    let country = required_country(&params)?;
    let app = state.store.fetch(id, country).await?;
    Ok(Json(json!({
        "credit_application": ApplicationResponse::from_application(&app)
    })))
}

async fn update_application(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<CountryQueryParam>,
    Json(req): Json<UpdateApplicationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let country = required_country(&params)?;
    let status = Status::parse(&req.status)?;

    if let Some(change) = state.store.update_status(id, country, status).await? {
        state
            .notifier
            .notify(change.user_id, status_notification(id, &change.new_status));
        state
            .count_cache
            .invalidate(
                country.as_str(),
                &[change.old_status.as_str(), change.new_status.as_str()],
            )
            .await;
    }

    let app = state.store.fetch(id, country).await?;
    Ok(Json(json!({
        "credit_application": ApplicationResponse::from_application(&app)
    })))
}

async fn destroy_application(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<CountryQueryParam>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&state.config, &headers)?;
    let country = required_country(&params)?;

    let app = state.store.fetch(id, country).await?;
    state.store.delete(id, country).await?;
    state
        .count_cache
        .invalidate(country.as_str(), &[app.status.as_str()])
        .await;

    Ok(StatusCode::NO_CONTENT)
}

async fn list_application_events(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<CountryQueryParam>,
) -> Result<impl IntoResponse, AppError> {
    let country = required_country(&params)?;
    // 404 for an unknown application rather than an empty event list.
    state.store.fetch(id, country).await?;
    let events = state.store.list_events(id, country).await?;
    Ok(Json(json!({ "events": events })))
}

// ============ Webhooks ============

async fn receive_banking_data(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state.ingestor.ingest(&payload).await?;
    Ok(Json(json!({
        "message": "Banking data received",
        "credit_application_id": outcome.application_id,
        "country": outcome.country,
    })))
}

// ============ Analytics ============

async fn analytics_by_status(
    State(state): State<AppState>,
    Query(params): Query<CountryQueryParam>,
) -> Result<impl IntoResponse, AppError> {
    let countries: Vec<Country> = match params.country.as_deref() {
        Some(value) => vec![Country::parse_code_or_name(value)?],
        None => Country::ALL.to_vec(),
    };

    // Zero-filled histogram: every (country, status) cell is present even
    // when no application matches it.
    let mut data: BTreeMap<&str, BTreeMap<&str, i64>> = countries
        .iter()
        .map(|c| {
            (
                c.analytic_code(),
                Status::ALL.iter().map(|s| (s.as_str(), 0)).collect(),
            )
        })
        .collect();

    for (country, status, count) in state.store.status_counts(&countries).await? {
        let code = Country::parse(&country)?.analytic_code();
        if let Some(cell) = data
            .get_mut(code)
            .and_then(|statuses| statuses.get_mut(status.as_str()))
        {
            *cell = count;
        }
    }

    Ok(Json(json!({ "data": data })))
}

// ============ Helpers ============

/// Identifies the acting user from the X-User-Id header set by the edge
/// authentication layer.
fn current_user_id(headers: &HeaderMap) -> Result<i64, AppError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| {
            AppError::Validation(vec![
                "X-User-Id header is required and must be numeric".to_string()
            ])
        })
}

fn required_country(params: &CountryQueryParam) -> Result<Country, AppError> {
    match params.country.as_deref() {
        Some(value) => Country::parse(value),
        None => Err(AppError::BadRequest(
            "country query parameter is required".to_string(),
        )),
    }
}

/// Gates destructive operations on the configured admin token. When no
/// token is configured the gate is open; startup already warned about it.
fn require_admin(config: &Config, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = config.admin_token.as_deref() else {
        return Ok(());
    };
    let provided = headers
        .get("x-admin-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err(AppError::Forbidden("invalid admin token".to_string()))
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
