use crate::errors::AppError;
use crate::handlers::{parse_json, AppState};
use crate::inbound::InboundCorrelator;
use crate::webhook_models::{GatewayEvent, WebhookResponse};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;

/// Gateway message webhook.
///
/// Receives message events from the WhatsApp gateway and hands them to the
/// [`InboundCorrelator`]. Any parseable event is acknowledged with 200, even
/// when it is ignored or matches no lead, so the gateway does not redeliver it.
///
/// Authentication: when `WEBHOOK_SECRET` is set, the `X-Webhook-Token` header
/// must match it.
pub async fn gateway_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookResponse>), AppError> {
    validate_webhook_secret(&state, &headers)?;

    let event: GatewayEvent = parse_json(&body)?;
    tracing::debug!("Received gateway webhook event '{}'", event.event);

    let outcome = InboundCorrelator::new(state.store.as_ref())
        .handle(&event)
        .await?;

    if let crate::inbound::InboundOutcome::Ignored(reason) = &outcome {
        tracing::debug!("Gateway event ignored: {}", reason);
    }

    Ok((
        StatusCode::OK,
        Json(WebhookResponse {
            success: true,
            message: outcome.response_message().to_string(),
        }),
    ))
}

/// Validate webhook secret from X-Webhook-Token header
fn validate_webhook_secret(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    // No secret configured: accept (a warning is logged at startup)
    let Some(ref expected_secret) = state.config.webhook_secret else {
        return Ok(());
    };

    let token = headers
        .get("x-webhook-token")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing X-Webhook-Token header".to_string()))?;

    if !constant_time_compare(token, expected_secret) {
        tracing::warn!("Invalid webhook token received");
        return Err(AppError::Unauthorized("Invalid webhook token".to_string()));
    }

    Ok(())
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.as_bytes()
        .iter()
        .zip(b.as_bytes().iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
