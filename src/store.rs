//! Storage seam for the campaign pipeline.
//!
//! Every component talks to the relational store through [`CrmStore`]. The
//! production implementation is [`crate::db_storage::PgStore`]; each method
//! that combines a check with a write is atomic in that implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{
    ApiTokenOwner, Campaign, DueMessage, IntegrationLogEntry, LeadRef, Message, NewCampaign,
    NewLead, NewMessage, PlannedSend, Profile,
};
use crate::rate_limiter::RateLimitDecision;

/// Result of a conditional lead insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadInsert {
    Created(Uuid),
    /// A lead with the same phone or email already exists in the tenant.
    Duplicate(Uuid),
}

#[async_trait]
pub trait CrmStore: Send + Sync {
    // ---- rate limiting ----

    /// Counts entries for `identifier`/`endpoint` inside the trailing window,
    /// decides, and records a new entry when allowed, as one atomic step.
    async fn admit_request(
        &self,
        identifier: &str,
        endpoint: &str,
        max_requests: u32,
        window_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision, AppError>;

    /// Deletes rate-limit entries older than `before`. Returns rows removed.
    async fn prune_rate_limit_log(&self, before: DateTime<Utc>) -> Result<u64, AppError>;

    // ---- auth collaborators ----

    async fn find_api_token(&self, token_hash: &str) -> Result<Option<ApiTokenOwner>, AppError>;

    async fn find_profile(&self, user_id: Uuid) -> Result<Option<Profile>, AppError>;

    /// True when `user_id` is an active profile of `tenant_id`.
    async fn is_active_member(&self, tenant_id: Uuid, user_id: Uuid) -> Result<bool, AppError>;

    // ---- leads ----

    /// Finds a lead in the tenant matching the phone, or the email when given.
    async fn find_duplicate_lead(
        &self,
        tenant_id: Uuid,
        phone: &str,
        email: Option<&str>,
    ) -> Result<Option<Uuid>, AppError>;

    /// Inserts unless the tenant already has the phone or email.
    async fn insert_lead(&self, lead: &NewLead) -> Result<LeadInsert, AppError>;

    /// Looks up a lead by id within the tenant.
    async fn find_lead(&self, tenant_id: Uuid, lead_id: Uuid) -> Result<Option<LeadRef>, AppError>;

    /// Exact phone match, or stored phone ending with `phone_digits`.
    async fn find_lead_by_phone_suffix(
        &self,
        phone_digits: &str,
    ) -> Result<Option<LeadRef>, AppError>;

    // ---- campaigns ----

    /// Creates the campaign and all its messages in one transaction.
    async fn create_campaign(
        &self,
        campaign: &NewCampaign,
        plan: &[PlannedSend],
    ) -> Result<Campaign, AppError>;

    /// Claims up to `limit` due rows, moving them `scheduled` -> `sending`.
    async fn claim_due_messages(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DueMessage>, AppError>;

    /// Records a successful send: inserts the message, marks the row `sent`.
    async fn complete_dispatch(
        &self,
        campaign_message_id: Uuid,
        message: &NewMessage,
        sent_at: DateTime<Utc>,
    ) -> Result<Message, AppError>;

    /// Marks a claimed row `failed`.
    async fn fail_dispatch(&self, campaign_message_id: Uuid, error: &str) -> Result<(), AppError>;

    /// Adds one response to the campaign that most recently messaged the lead.
    async fn increment_campaign_response(&self, lead_id: Uuid) -> Result<Option<Uuid>, AppError>;

    // ---- messages & audit ----

    /// Appends a message. Returns `None` when the tenant already has the
    /// external id.
    async fn insert_message(&self, message: &NewMessage) -> Result<Option<Message>, AppError>;

    async fn insert_integration_log(&self, entry: &IntegrationLogEntry) -> Result<(), AppError>;
}
