use crate::errors::AppError;
use serde_json::{json, Value};
use std::time::Duration;

/// Name reported to callers when the gateway fails.
pub const GATEWAY_SERVICE: &str = "WhatsApp gateway";

/// Result of a successful send.
#[derive(Debug, Clone)]
pub struct GatewaySendResult {
    /// Gateway message id, used to correlate later webhook events.
    pub external_id: Option<String>,
    /// Raw JSON returned by the gateway.
    pub raw: Value,
}

/// Client for the WhatsApp messaging gateway.
///
/// Messages are sent as plain text; callers never pass HTML-encoded bodies.
#[derive(Clone)]
pub struct MessagingGatewayClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    instance: String,
}

impl MessagingGatewayClient {
    /// Creates a new `MessagingGatewayClient`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The base URL of the gateway API.
    /// * `api_key` - The gateway API key, sent in the `apikey` header.
    /// * `instance` - The gateway instance (connected phone) to send from.
    pub fn new(base_url: String, api_key: String, instance: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::ExternalService {
                service: GATEWAY_SERVICE.to_string(),
                detail: format!("Failed to create gateway client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            instance,
        })
    }

    /// Sends a text message.
    ///
    /// # Arguments
    ///
    /// * `phone` - Recipient, digits only.
    /// * `text` - Plain-text body.
    pub async fn send_text(&self, phone: &str, text: &str) -> Result<GatewaySendResult, AppError> {
        let url = format!("{}/message/sendText/{}", self.base_url, self.instance);
        tracing::info!("Sending text message to {} via gateway", mask_phone(phone));

        let body = json!({
            "number": phone,
            "text": text,
        });

        self.post(&url, &body).await
    }

    /// Sends a media message with an optional caption.
    pub async fn send_media(
        &self,
        phone: &str,
        media_url: &str,
        media_type: &str,
        caption: &str,
    ) -> Result<GatewaySendResult, AppError> {
        let url = format!("{}/message/sendMedia/{}", self.base_url, self.instance);
        tracing::info!(
            "Sending {} message to {} via gateway",
            media_type,
            mask_phone(phone)
        );

        let body = json!({
            "number": phone,
            "mediatype": media_type,
            "media": media_url,
            "caption": caption,
        });

        self.post(&url, &body).await
    }

    async fn post(&self, url: &str, body: &Value) -> Result<GatewaySendResult, AppError> {
        let response = self
            .client
            .post(url)
            .header("apikey", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::ExternalService {
                service: GATEWAY_SERVICE.to_string(),
                detail: format!("request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalService {
                service: GATEWAY_SERVICE.to_string(),
                detail: format!("gateway returned {}: {}", status, error_text),
            });
        }

        let raw: Value = response.json().await.map_err(|e| AppError::ExternalService {
            service: GATEWAY_SERVICE.to_string(),
            detail: format!("failed to parse gateway response: {}", e),
        })?;

        let external_id = extract_message_id(&raw);
        if external_id.is_none() {
            tracing::warn!("Gateway response without message id: {:?}", raw);
        }

        Ok(GatewaySendResult { external_id, raw })
    }
}

/// Pulls the message id from the places the gateway is known to put it.
fn extract_message_id(raw: &Value) -> Option<String> {
    raw.get("key")
        .and_then(|k| k.get("id"))
        .or_else(|| raw.get("messageId"))
        .or_else(|| raw.get("id"))
        .and_then(|id| match id {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

/// Keeps the last four digits for logs.
pub fn mask_phone(phone: &str) -> String {
    let count = phone.chars().count();
    if count <= 4 {
        return "****".to_string();
    }
    let tail: String = phone.chars().skip(count - 4).collect();
    format!("****{}", tail)
}
