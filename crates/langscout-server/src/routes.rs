use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use langscout_core::error::AppError;
use langscout_core::models::{BatchLookup, Domain, NewProxy, ProxyCredentials, ProxyScheme};
use langscout_core::results::BatchStatus;
use langscout_core::submit_batch;
use langscout_core::traits::{BatchStore, DomainStore, ProxyRegistry};
use langscout_core::work_queue::WorkQueue;

use crate::auth::require_api_key;
use crate::dto::{
    AddProxiesRequest, AddProxiesResponse, BatchPendingResponse, BatchResultResponse,
    DomainListResponse, DomainResponse, EchoResponse, HealthResponse, PageQuery, ProxyInput,
    ProxyListResponse, ProxyResponse, SubmitBatchRequest, SubmitBatchResponse,
};
use crate::error::{ApiError, not_found};
use crate::openapi::ApiDoc;
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 500;

/// Build the full router with all routes and middleware.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/v1/batches", post(submit))
        .route("/v1/batches/{code}", get(get_batch))
        .route("/v1/domains", get(list_domains))
        .route("/v1/domains/{id}", get(get_domain))
        .route("/v1/domains/{id}", delete(delete_domain))
        .route("/v1/proxies", get(list_proxies))
        .route("/v1/proxies", post(add_proxies))
        .route("/v1/proxies/{id}", delete(delete_proxy))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    let public = Router::new()
        .route("/health", get(health))
        .route("/echo", post(echo))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    public.merge(api).with_state(state)
}

fn page(query: &PageQuery) -> (usize, usize) {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    (limit, query.offset.unwrap_or(0))
}

fn ready_response(code: String, domains: Vec<Domain>) -> axum::response::Response {
    let body = BatchResultResponse {
        code,
        domains: domains.into_iter().map(DomainResponse::from).collect(),
    };
    (StatusCode::OK, axum::Json(body)).into_response()
}

fn pending_response(
    code: String,
    collected: Option<usize>,
    expected: Option<usize>,
) -> axum::response::Response {
    let body = BatchPendingResponse {
        code,
        collected,
        expected,
    };
    (StatusCode::ACCEPTED, axum::Json(body)).into_response()
}

// ---------------------------------------------------------------------------
// Batches
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/batches",
    request_body = SubmitBatchRequest,
    responses(
        (status = 202, description = "Batch accepted", body = SubmitBatchResponse),
        (status = 400, description = "Bad request", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "batches"
)]
pub async fn submit(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<SubmitBatchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let receipt = submit_batch(
        &state.db.domain_repo(),
        &state.db.batch_repo(),
        &state.tracker,
        &state.notifier,
        &body.hosts,
        body.callback.as_deref(),
    )
    .await?;

    let response = SubmitBatchResponse {
        code: receipt.code,
        expected: receipt.expected,
        created: receipt.created,
    };

    Ok((StatusCode::ACCEPTED, axum::Json(response)))
}

#[utoipa::path(
    get,
    path = "/v1/batches/{code}",
    params(
        ("code" = String, Path, description = "Batch code returned on submission")
    ),
    responses(
        (status = 200, description = "Every domain has been visited", body = BatchResultResponse),
        (status = 202, description = "Visits still outstanding", body = BatchPendingResponse),
        (status = 404, description = "Unknown or expired batch", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "batches"
)]
pub async fn get_batch(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.tracker.get(&code) {
        BatchStatus::Ready(ids) => {
            let domains = state.db.domain_repo().get_domains(&ids).await?;
            Ok(ready_response(code, domains))
        }
        BatchStatus::NotReady {
            collected,
            expected,
        } => Ok(pending_response(code, Some(collected), Some(expected))),
        // Not tracked in memory, e.g. after a restart.
        BatchStatus::NotFound => match state.db.batch_repo().lookup_batch(&code).await? {
            BatchLookup::Ready(domains) => Ok(ready_response(code, domains)),
            BatchLookup::NotReady => Ok(pending_response(code, None, None)),
            BatchLookup::NotFound => Ok(not_found(format!("Batch not found: {code}"))),
        },
    }
}

// ---------------------------------------------------------------------------
// Domains
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/v1/domains",
    params(PageQuery),
    responses(
        (status = 200, description = "Domains ordered by id", body = DomainListResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "domains"
)]
pub async fn list_domains(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (limit, offset) = page(&query);
    let domains = state.db.domain_repo().list_domains(limit, offset).await?;
    let total = domains.len();

    let response = DomainListResponse {
        domains: domains.into_iter().map(DomainResponse::from).collect(),
        total,
    };

    Ok(axum::Json(response))
}

#[utoipa::path(
    get,
    path = "/v1/domains/{id}",
    params(
        ("id" = i64, Path, description = "Domain ID")
    ),
    responses(
        (status = 200, description = "Domain details", body = DomainResponse),
        (status = 404, description = "Not found", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "domains"
)]
pub async fn get_domain(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    match state.db.domain_repo().get_domain(id).await? {
        Some(domain) => Ok(axum::Json(DomainResponse::from(domain)).into_response()),
        None => Ok(not_found(format!("Domain not found: {id}"))),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/domains/{id}",
    params(
        ("id" = i64, Path, description = "Domain ID")
    ),
    responses(
        (status = 204, description = "Domain deleted"),
        (status = 404, description = "Not found", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "domains"
)]
pub async fn delete_domain(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = state.db.domain_repo();
    repo.dequeue(id).await?;

    if repo.delete_domain(id).await? {
        tracing::info!(domain_id = id, "Domain deleted");
        Ok(StatusCode::NO_CONTENT.into_response())
    } else {
        Ok(not_found(format!("Domain not found: {id}")))
    }
}

// ---------------------------------------------------------------------------
// Proxies
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/v1/proxies",
    params(PageQuery),
    responses(
        (status = 200, description = "Registered proxies", body = ProxyListResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "proxies"
)]
pub async fn list_proxies(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (limit, offset) = page(&query);
    let proxies = state.db.proxy_repo().list_proxies(limit, offset).await?;
    let total = proxies.len();

    let response = ProxyListResponse {
        proxies: proxies.into_iter().map(ProxyResponse::from).collect(),
        total,
    };

    Ok(axum::Json(response))
}

fn to_new_proxy(input: ProxyInput) -> Result<NewProxy, AppError> {
    let scheme: ProxyScheme = input.scheme.parse().map_err(AppError::ValidationError)?;
    let credentials = input.username.map(|username| ProxyCredentials {
        username,
        password: input.password.unwrap_or_default(),
    });
    Ok(NewProxy {
        endpoint: input.endpoint.trim().to_string(),
        scheme,
        credentials,
    })
}

#[utoipa::path(
    post,
    path = "/v1/proxies",
    request_body = AddProxiesRequest,
    responses(
        (status = 201, description = "Proxies stored and pool reloaded", body = AddProxiesResponse),
        (status = 400, description = "Bad request", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "proxies"
)]
pub async fn add_proxies(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<AddProxiesRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let proxies = body
        .proxies
        .into_iter()
        .map(to_new_proxy)
        .collect::<Result<Vec<_>, _>>()?;
    if proxies.is_empty() {
        return Err(AppError::ValidationError("empty proxy list".into()).into());
    }

    let repo = state.db.proxy_repo();
    let inserted = repo.add_proxies(&proxies).await?;
    let pool_size = state.proxy_pool.refresh_from(&repo).await?;

    let response = AddProxiesResponse {
        inserted,
        pool_size,
    };

    Ok((StatusCode::CREATED, axum::Json(response)))
}

#[utoipa::path(
    delete,
    path = "/v1/proxies/{id}",
    params(
        ("id" = i64, Path, description = "Proxy ID")
    ),
    responses(
        (status = 204, description = "Proxy deleted"),
        (status = 404, description = "Not found", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "proxies"
)]
pub async fn delete_proxy(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = state.db.proxy_repo();
    if !repo.delete_proxy(id).await? {
        return Ok(not_found(format!("Proxy not found: {id}")));
    }
    state.proxy_pool.refresh_from(&repo).await?;

    Ok(StatusCode::NO_CONTENT.into_response())
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/echo",
    responses(
        (status = 200, description = "Body logged", body = EchoResponse),
    ),
    tag = "system"
)]
pub async fn echo(axum::Json(body): axum::Json<serde_json::Value>) -> impl IntoResponse {
    tracing::info!(payload = %body, "Echo received");
    axum::Json(EchoResponse { received: true })
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is unhealthy", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let db_status = match state.db.health_check().await {
        Ok(()) => "ok",
        Err(_) => "error",
    };

    let status = if db_status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if db_status == "ok" {
            "healthy"
        } else {
            "unhealthy"
        }
        .to_string(),
        database: db_status.to_string(),
        pool: state.proxy_pool.stats().into(),
        live_batches: state.tracker.len(),
    };

    (status, axum::Json(response))
}
