//! Correlates gateway webhook events with leads and campaigns.

use crate::errors::AppError;
use crate::gateway_client::mask_phone;
use crate::models::{MessageDirection, NewMessage};
use crate::sanitize;
use crate::store::CrmStore;
use crate::webhook_models::GatewayEvent;

/// Fewest sender digits worth a suffix lookup. Shorter strings would match
/// the tail of unrelated leads.
pub const MIN_SENDER_DIGITS: usize = 8;

/// What the correlator did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Not a new message, an echo of our own send, a group chat, or malformed.
    Ignored(&'static str),
    /// No lead has this phone.
    LeadNotFound,
    /// The tenant already has this external message id.
    AlreadyRecorded,
    /// Message stored; `campaign_id` is the campaign credited with the reply.
    Recorded {
        lead_id: uuid::Uuid,
        campaign_id: Option<uuid::Uuid>,
    },
}

impl InboundOutcome {
    /// Message returned to the gateway.
    pub fn response_message(&self) -> &'static str {
        match self {
            InboundOutcome::Ignored(_) => "Evento ignorado",
            InboundOutcome::LeadNotFound => "Lead não encontrado",
            InboundOutcome::AlreadyRecorded => "Mensagem já registrada",
            InboundOutcome::Recorded { .. } => "Mensagem registrada",
        }
    }
}

pub struct InboundCorrelator<'a> {
    store: &'a dyn CrmStore,
}

impl<'a> InboundCorrelator<'a> {
    pub fn new(store: &'a dyn CrmStore) -> Self {
        Self { store }
    }

    pub async fn handle(&self, event: &GatewayEvent) -> Result<InboundOutcome, AppError> {
        if !event.is_new_message() {
            return Ok(InboundOutcome::Ignored("not a new message"));
        }
        let Some(data) = event.message_data() else {
            return Ok(InboundOutcome::Ignored("missing data"));
        };
        if data.key.from_me {
            return Ok(InboundOutcome::Ignored("self-originated"));
        }
        if data.key.is_group() {
            return Ok(InboundOutcome::Ignored("group chat"));
        }

        let phone = data.key.sender_digits();
        if phone.is_empty() {
            return Ok(InboundOutcome::Ignored("no sender phone"));
        }
        if phone.len() < MIN_SENDER_DIGITS {
            tracing::warn!(
                "Ignoring inbound message with {}-digit sender {}",
                phone.len(),
                mask_phone(&phone)
            );
            return Ok(InboundOutcome::Ignored("sender phone too short"));
        }
        tracing::debug!(
            "Inbound message from {} ({}) on instance {}",
            mask_phone(&phone),
            data.push_name.as_deref().unwrap_or("unnamed"),
            event.instance.as_deref().unwrap_or("unknown")
        );

        let Some(lead) = self.store.find_lead_by_phone_suffix(&phone).await? else {
            tracing::info!("Inbound message from unknown phone {}", mask_phone(&phone));
            return Ok(InboundOutcome::LeadNotFound);
        };

        let text = data
            .message
            .as_ref()
            .map(|m| m.text())
            .unwrap_or_else(|| crate::webhook_models::MEDIA_PLACEHOLDER.to_string());

        let message = NewMessage {
            tenant_id: lead.tenant_id,
            lead_id: Some(lead.id),
            campaign_id: None,
            phone,
            body: sanitize::html_encode(&text),
            direction: MessageDirection::Received,
            external_id: data.key.id.clone(),
            status: "received".to_string(),
            media_url: None,
            media_type: None,
        };

        if self.store.insert_message(&message).await?.is_none() {
            tracing::info!(
                "Inbound message {:?} already recorded, skipping",
                data.key.id
            );
            return Ok(InboundOutcome::AlreadyRecorded);
        }

        let campaign_id = self.store.increment_campaign_response(lead.id).await?;
        tracing::info!(
            "Inbound message recorded for lead {} (campaign {:?})",
            lead.id,
            campaign_id
        );

        Ok(InboundOutcome::Recorded {
            lead_id: lead.id,
            campaign_id,
        })
    }
}
