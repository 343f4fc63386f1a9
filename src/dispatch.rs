//! Executes one send: sanitize, call the gateway, record the outcome.
//!
//! The gateway receives the plain-text body; the persisted `Message` carries
//! the HTML-encoded copy. Campaign rows arrive here already claimed
//! (`scheduled` -> `sending`), so a row is never sent twice.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::errors::{AppError, ResultExt};
use crate::gateway_client::{mask_phone, MessagingGatewayClient};
use crate::models::{
    DueMessage, Message, MessageDirection, NewMessage, SendMessageRequest, SendMessageResponse,
};
use crate::sanitize;
use crate::store::CrmStore;
use crate::validation::normalize_phone;

pub const MEDIA_TYPES: [&str; 4] = ["image", "video", "audio", "document"];

/// A body ready for transmission and storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Digits-only recipient.
    pub phone: String,
    /// Exactly what the gateway receives.
    pub text: String,
    /// HTML-encoded copy for the `messages` table.
    pub stored_body: String,
}

/// Normalizes the recipient and sanitizes the body.
pub fn prepare_outbound(phone: &str, body: &str) -> Result<OutboundMessage, AppError> {
    let digits = normalize_phone(phone);
    if !(8..=15).contains(&digits.len()) {
        return Err(AppError::invalid_field(
            "phone",
            "must contain between 8 and 15 digits",
        ));
    }
    sanitize::check_message_content("message", body)?;

    Ok(OutboundMessage {
        phone: digits,
        text: body.to_string(),
        stored_body: sanitize::html_encode(body),
    })
}

/// Turns a stored (encoded) template into the plain text for one lead.
///
/// Supports `{{nome}}`/`{{name}}` and `{{empresa}}`/`{{company}}`.
pub fn render_template(stored_template: &str, lead_name: &str, company: Option<&str>) -> String {
    let company = company.unwrap_or("");
    sanitize::html_decode(stored_template)
        .replace("{{nome}}", lead_name)
        .replace("{{name}}", lead_name)
        .replace("{{empresa}}", company)
        .replace("{{company}}", company)
}

/// Result of dispatching one campaign message.
#[derive(Debug)]
pub enum DispatchOutcome {
    Sent(Message),
    Failed(String),
}

#[derive(Clone)]
pub struct DispatchWorker {
    store: Arc<dyn CrmStore>,
    gateway: MessagingGatewayClient,
}

impl DispatchWorker {
    pub fn new(store: Arc<dyn CrmStore>, gateway: MessagingGatewayClient) -> Self {
        Self { store, gateway }
    }

    /// Sends one claimed campaign message. Failures are recorded on the row,
    /// never retried.
    pub async fn dispatch(&self, due: DueMessage) -> Result<DispatchOutcome, AppError> {
        let text = render_template(&due.template, &due.lead_name, due.company.as_deref());

        let outbound = match prepare_outbound(&due.phone, &text) {
            Ok(o) => o,
            Err(e) => return self.record_failure(&due, e).await,
        };

        let result = match self.gateway.send_text(&outbound.phone, &outbound.text).await {
            Ok(r) => r,
            Err(e) => return self.record_failure(&due, e).await,
        };

        let message = NewMessage {
            tenant_id: due.tenant_id,
            lead_id: Some(due.lead_id),
            campaign_id: Some(due.campaign_id),
            phone: outbound.phone,
            body: outbound.stored_body,
            direction: MessageDirection::Sent,
            external_id: result.external_id,
            status: "sent".to_string(),
            media_url: None,
            media_type: None,
        };

        let stored = self
            .store
            .complete_dispatch(due.message_id, &message, Utc::now())
            .await
            .with_context(|| format!("recording send of campaign message {}", due.message_id))?;

        tracing::info!(
            "Campaign {} message {} sent to {}",
            due.campaign_id,
            due.message_id,
            mask_phone(&stored.phone)
        );
        Ok(DispatchOutcome::Sent(stored))
    }

    async fn record_failure(
        &self,
        due: &DueMessage,
        error: AppError,
    ) -> Result<DispatchOutcome, AppError> {
        let reason = error.to_string();
        tracing::error!(
            "Campaign {} message {} failed: {}",
            due.campaign_id,
            due.message_id,
            reason
        );
        self.store
            .fail_dispatch(due.message_id, &reason)
            .await
            .with_context(|| format!("recording failure of campaign message {}", due.message_id))?;
        Ok(DispatchOutcome::Failed(reason))
    }

    /// Ad-hoc send outside any campaign. Gateway failures go back to the caller.
    pub async fn send_adhoc(
        &self,
        tenant_id: Uuid,
        request: &SendMessageRequest,
    ) -> Result<SendMessageResponse, AppError> {
        let phone = request
            .phone
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| AppError::invalid_field("phone", "is required"))?;
        let body = request
            .message
            .as_deref()
            .ok_or_else(|| AppError::invalid_field("message", "is required"))?;

        let outbound = prepare_outbound(phone, body)?;
        let media = validate_media(request.media_url.as_deref(), request.media_type.as_deref())?;

        if let Some(lead_id) = request.lead_id {
            self.store
                .find_lead(tenant_id, lead_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Lead {} not found", lead_id)))?;
        }

        let result = match &media {
            Some((url, media_type)) => {
                self.gateway
                    .send_media(&outbound.phone, url, media_type, &outbound.text)
                    .await?
            }
            None => self.gateway.send_text(&outbound.phone, &outbound.text).await?,
        };

        let message = NewMessage {
            tenant_id,
            lead_id: request.lead_id,
            campaign_id: None,
            phone: outbound.phone,
            body: outbound.stored_body,
            direction: MessageDirection::Sent,
            external_id: result.external_id,
            status: "sent".to_string(),
            media_url: media.as_ref().map(|(url, _)| url.clone()),
            media_type: media.map(|(_, t)| t),
        };

        let stored = self.store.insert_message(&message).await?.ok_or_else(|| {
            AppError::InternalError("Gateway returned an already recorded message id".to_string())
        })?;

        Ok(SendMessageResponse {
            success: true,
            message: stored,
            gateway_response: result.raw,
        })
    }
}

/// Both or neither of `media_url` and `media_type`; the url must be http(s).
fn validate_media(
    media_url: Option<&str>,
    media_type: Option<&str>,
) -> Result<Option<(String, String)>, AppError> {
    let media_url = media_url.map(str::trim).filter(|u| !u.is_empty());
    let media_type = media_type.map(str::trim).filter(|t| !t.is_empty());

    match (media_url, media_type) {
        (None, None) => Ok(None),
        (Some(_), None) => Err(AppError::invalid_field(
            "media_type",
            "is required when media_url is set",
        )),
        (None, Some(_)) => Err(AppError::invalid_field(
            "media_url",
            "is required when media_type is set",
        )),
        (Some(raw_url), Some(media_type)) => {
            let parsed = url::Url::parse(raw_url)
                .map_err(|_| AppError::invalid_field("media_url", "must be a valid URL"))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(AppError::invalid_field("media_url", "must use http or https"));
            }
            let media_type = media_type.to_lowercase();
            if !MEDIA_TYPES.contains(&media_type.as_str()) {
                return Err(AppError::invalid_field(
                    "media_type",
                    format!("must be one of {}", MEDIA_TYPES.join(", ")),
                ));
            }
            Ok(Some((parsed.to_string(), media_type)))
        }
    }
}
