use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ============ Database Models ============

/// A tenant-scoped contact.
///
/// Unique per tenant on `phone`, and on `email` when present.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Lead {
    /// Unique identifier for the lead.
    pub id: Uuid,
    /// Owning tenant.
    pub tenant_id: Uuid,
    /// Contact name.
    pub name: String,
    /// Phone number, digits only. This is the dedup key.
    pub phone: String,
    /// Lowercased email address.
    pub email: Option<String>,
    /// Company name.
    pub company: Option<String>,
    /// Where the lead came from (e.g. "api", "csv").
    pub source: String,
    /// Sales lifecycle status, owned by the sales workflow.
    pub status: String,
    /// Assigned owner (profile id).
    pub assigned_to: Option<Uuid>,
    /// Estimated deal value.
    pub estimated_value: Option<BigDecimal>,
    /// Timestamp of creation.
    pub created_at: DateTime<Utc>,
    /// Timestamp of last update.
    pub updated_at: DateTime<Utc>,
}

/// Lead fields accepted by ingestion, already validated and normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLead {
    pub tenant_id: Uuid,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub company: Option<String>,
    pub source: String,
    pub assigned_to: Option<Uuid>,
    pub estimated_value: Option<BigDecimal>,
}

/// Minimal lead reference used by inbound correlation.
#[derive(Debug, Clone, FromRow, PartialEq, Eq)]
pub struct LeadRef {
    pub id: Uuid,
    pub tenant_id: Uuid,
}

/// A named batch send.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    /// HTML-encoded template of record. The raw template is never stored.
    pub message_template: String,
    pub status: String,
    pub total_leads: i32,
    pub responded_count: i32,
    pub delay_seconds: i32,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub message_template: String,
    pub delay_seconds: i32,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// One scheduled unit of work owned by a campaign.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CampaignMessage {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub lead_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub status: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A planned send produced by the scheduler, before persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedSend {
    pub lead_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
}

/// A campaign message claimed for dispatch, joined with what the worker needs.
#[derive(Debug, Clone, FromRow)]
pub struct DueMessage {
    pub message_id: Uuid,
    pub campaign_id: Uuid,
    pub tenant_id: Uuid,
    pub lead_id: Uuid,
    pub lead_name: String,
    pub phone: String,
    pub company: Option<String>,
    /// Campaign template as stored (HTML-encoded).
    pub template: String,
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageDirection {
    Sent,
    Received,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageDirection::Sent => "sent",
            MessageDirection::Received => "received",
        }
    }
}

/// Persisted send/receive record. Append-only.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub lead_id: Option<Uuid>,
    pub campaign_id: Option<Uuid>,
    pub phone: String,
    /// HTML-encoded body.
    pub body: String,
    pub direction: String,
    pub external_id: Option<String>,
    pub status: String,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub tenant_id: Uuid,
    pub lead_id: Option<Uuid>,
    pub campaign_id: Option<Uuid>,
    pub phone: String,
    pub body: String,
    pub direction: MessageDirection,
    pub external_id: Option<String>,
    pub status: String,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
}

/// Active user profile, resolved from a JWT subject.
#[derive(Debug, Clone, FromRow, PartialEq, Eq)]
pub struct Profile {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub is_active: bool,
}

/// Owner of an external API token.
#[derive(Debug, Clone, FromRow, PartialEq, Eq)]
pub struct ApiTokenOwner {
    pub id: Uuid,
    pub tenant_id: Uuid,
}

/// Audit record of one externally-triggered ingestion attempt.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrationLogEntry {
    pub tenant_id: Option<Uuid>,
    pub api_token_id: Option<Uuid>,
    pub endpoint: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub error: Option<String>,
    pub lead_id: Option<Uuid>,
}

// ============ Request/Response Models ============

/// Body of `POST /leads`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ApiLeadRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub source: Option<String>,
    pub estimated_value: Option<f64>,
    pub assigned_to: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LeadCreatedResponse {
    pub success: bool,
    pub lead_id: Uuid,
}

/// One row of a bulk import.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BulkLeadRow {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
    pub source: Option<String>,
}

/// Body of `POST /leads/bulk`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BulkImportRequest {
    pub leads: Vec<BulkLeadRow>,
    #[serde(default)]
    pub auto_prospect: bool,
    pub message_template: Option<String>,
    pub campaign_name: Option<String>,
    pub delay_seconds: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BulkImportResults {
    pub success: usize,
    pub duplicates: usize,
    pub errors: usize,
    pub error_details: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkImportResponse {
    pub success: bool,
    pub results: BulkImportResults,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign_warning: Option<String>,
}

/// Body of `POST /messages/send`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SendMessageRequest {
    pub lead_id: Option<Uuid>,
    pub phone: Option<String>,
    pub message: Option<String>,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub success: bool,
    pub message: Message,
    pub gateway_response: serde_json::Value,
}
