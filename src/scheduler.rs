//! Turns an accepted batch of leads plus a template into a staggered send plan.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{Campaign, NewCampaign, PlannedSend};
use crate::sanitize;
use crate::store::CrmStore;

pub const DEFAULT_DELAY_SECS: i64 = 30;
pub const MIN_DELAY_SECS: i64 = 1;
pub const MAX_DELAY_SECS: i64 = 3600;
pub const MAX_CAMPAIGN_NAME_CHARS: usize = 200;

/// What the scheduler needs to create a campaign.
#[derive(Debug, Clone)]
pub struct CampaignRequest {
    pub tenant_id: Uuid,
    pub created_by: Uuid,
    pub name: Option<String>,
    /// Raw template as submitted.
    pub template: String,
    pub delay_secs: i64,
    /// Accepted leads in batch order.
    pub lead_ids: Vec<Uuid>,
}

/// `scheduled_at[i] = now + i * delay`, first message due immediately.
pub fn build_send_plan(lead_ids: &[Uuid], now: DateTime<Utc>, delay_secs: i64) -> Vec<PlannedSend> {
    lead_ids
        .iter()
        .enumerate()
        .map(|(i, lead_id)| PlannedSend {
            lead_id: *lead_id,
            scheduled_at: now + Duration::seconds(delay_secs * i as i64),
        })
        .collect()
}

/// Name used when the caller gives none, e.g. `Campanha 19/10/2026 14:05`.
pub fn default_campaign_name(now: DateTime<Utc>) -> String {
    format!("Campanha {}", now.format("%d/%m/%Y %H:%M"))
}

/// Resolves and bounds the requested delay.
pub fn resolve_delay(requested: Option<i64>) -> Result<i64, AppError> {
    let delay = requested.unwrap_or(DEFAULT_DELAY_SECS);
    if !(MIN_DELAY_SECS..=MAX_DELAY_SECS).contains(&delay) {
        return Err(AppError::invalid_field(
            "delay_seconds",
            format!(
                "must be between {} and {} seconds",
                MIN_DELAY_SECS, MAX_DELAY_SECS
            ),
        ));
    }
    Ok(delay)
}

pub struct CampaignScheduler<'a> {
    store: &'a dyn CrmStore,
}

impl<'a> CampaignScheduler<'a> {
    pub fn new(store: &'a dyn CrmStore) -> Self {
        Self { store }
    }

    /// Creates the campaign and one scheduled message per lead.
    ///
    /// Only the HTML-encoded template is persisted.
    pub async fn schedule(&self, request: CampaignRequest) -> Result<Campaign, AppError> {
        let template = sanitize::sanitize_for_storage("message_template", &request.template)?;
        if request.lead_ids.is_empty() {
            return Err(AppError::validation("Campaign has no leads to message"));
        }

        let now = Utc::now();
        let name = request
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(|n| n.chars().take(MAX_CAMPAIGN_NAME_CHARS).collect::<String>())
            .unwrap_or_else(|| default_campaign_name(now));

        let plan = build_send_plan(&request.lead_ids, now, request.delay_secs);
        let campaign = NewCampaign {
            id: Uuid::new_v4(),
            tenant_id: request.tenant_id,
            name,
            message_template: template,
            delay_seconds: request.delay_secs as i32,
            created_by: request.created_by,
            created_at: now,
        };

        let created = self.store.create_campaign(&campaign, &plan).await?;
        tracing::info!(
            "Campaign {} scheduled: {} messages, {}s apart",
            created.id,
            plan.len(),
            request.delay_secs
        );
        Ok(created)
    }
}
