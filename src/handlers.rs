use crate::auth::{ApiTokenAuth, ClientIp, UserAuth};
use crate::config::Config;
use crate::dispatch::DispatchWorker;
use crate::errors::AppError;
use crate::ingestion::{ingest_api_lead, ingest_bulk, record_integration_attempt};
use crate::models::*;
use crate::rate_limiter::{RateLimitKey, RateLimiter};
use crate::store::CrmStore;
use crate::validation::validate_api_lead;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use moka::future::Cache;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const LEADS_RATE_ENDPOINT: &str = "leads";
pub const BULK_RATE_ENDPOINT: &str = "leads_bulk";
pub const SEND_RATE_ENDPOINT: &str = "messages_send";

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Relational store behind every component.
    pub store: Arc<dyn CrmStore>,
    /// Application configuration.
    pub config: Config,
    /// Sends messages through the gateway and records them.
    pub worker: DispatchWorker,
    /// API token hash -> owner. Entries expire after `auth_cache_ttl_secs`.
    pub api_token_cache: Cache<String, ApiTokenOwner>,
    /// Profile id -> profile, for JWT callers.
    pub profile_cache: Cache<Uuid, Profile>,
}

impl AppState {
    pub fn new(store: Arc<dyn CrmStore>, config: Config, worker: DispatchWorker) -> Self {
        let ttl = Duration::from_secs(config.auth_cache_ttl_secs);
        Self {
            store,
            worker,
            api_token_cache: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(10_000)
                .build(),
            profile_cache: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(10_000)
                .build(),
            config,
        }
    }

    fn rate_limiter(&self) -> RateLimiter<'_> {
        RateLimiter::new(self.store.as_ref())
    }
}

/// Health check endpoint.
///
/// Returns the service status and version. Not rate limited.
pub async fn health() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "rust-campaign-api",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// Parses a JSON body, turning syntax and shape errors into a 400.
pub(crate) fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, AppError> {
    serde_json::from_slice(body).map_err(|e| AppError::validation(format!("Invalid JSON body: {}", e)))
}

/// POST /leads
///
/// Single-lead ingestion for external integrations.
///
/// # Arguments
///
/// * `ip` - Caller address; the rate-limit identifier. Rejected tokens count
///   against it too.
/// * `headers` - Must carry `Authorization: Bearer <api token>`.
/// * `body` - An [`ApiLeadRequest`].
///
/// # Returns
///
/// * 201 `{success, lead_id}`, or 400/401/409/429. Every attempt is audited in
///   `integration_logs`.
pub async fn create_lead(
    State(state): State<Arc<AppState>>,
    ip: ClientIp,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<LeadCreatedResponse>), AppError> {
    let payload: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);

    let caller = match ApiTokenAuth::authenticate(&state, &headers).await {
        Ok(caller) => caller,
        Err(e) => {
            let e = match enforce_lead_limit(&state, &ip).await {
                Err(limited) => limited,
                Ok(()) => e,
            };
            record_integration_attempt(state.store.as_ref(), None, payload, Err(&e)).await;
            return Err(e);
        }
    };

    let outcome = create_lead_inner(&state, caller, &ip, &body).await;
    record_integration_attempt(
        state.store.as_ref(),
        Some(caller),
        payload,
        outcome.as_ref().map(|id| *id),
    )
    .await;

    let lead_id = outcome?;
    Ok((
        StatusCode::CREATED,
        Json(LeadCreatedResponse {
            success: true,
            lead_id,
        }),
    ))
}

async fn create_lead_inner(
    state: &AppState,
    caller: ApiTokenAuth,
    ip: &ClientIp,
    body: &[u8],
) -> Result<Uuid, AppError> {
    let request: ApiLeadRequest = parse_json(body)?;
    let validated = validate_api_lead(caller.tenant_id, &request)?;
    enforce_lead_limit(state, ip).await?;
    ingest_api_lead(state.store.as_ref(), caller, validated).await
}

async fn enforce_lead_limit(state: &AppState, ip: &ClientIp) -> Result<(), AppError> {
    state
        .rate_limiter()
        .enforce(
            RateLimitKey {
                identifier: &ip.0,
                endpoint: LEADS_RATE_ENDPOINT,
            },
            state.config.rate_limits.lead_api,
        )
        .await
}

/// POST /leads/bulk
///
/// Imports up to 100 leads for the signed-in user and, with `auto_prospect`,
/// schedules a campaign for the ones created.
pub async fn bulk_import(
    State(state): State<Arc<AppState>>,
    user: UserAuth,
    body: Bytes,
) -> Result<Json<BulkImportResponse>, AppError> {
    state
        .rate_limiter()
        .enforce(
            RateLimitKey {
                identifier: &user.user_id.to_string(),
                endpoint: BULK_RATE_ENDPOINT,
            },
            state.config.rate_limits.bulk_import,
        )
        .await?;

    let request: BulkImportRequest = parse_json(&body)?;
    tracing::info!(
        "Bulk import of {} lead(s) by user {}",
        request.leads.len(),
        user.user_id
    );

    let response = ingest_bulk(state.store.as_ref(), user, &request).await?;
    Ok(Json(response))
}

/// POST /messages/send
///
/// Ad-hoc send outside any campaign. Gateway failures surface as 502.
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    user: UserAuth,
    body: Bytes,
) -> Result<Json<SendMessageResponse>, AppError> {
    state
        .rate_limiter()
        .enforce(
            RateLimitKey {
                identifier: &user.user_id.to_string(),
                endpoint: SEND_RATE_ENDPOINT,
            },
            state.config.rate_limits.message_send,
        )
        .await?;

    let request: SendMessageRequest = parse_json(&body)?;
    let response = state.worker.send_adhoc(user.tenant_id, &request).await?;
    Ok(Json(response))
}
