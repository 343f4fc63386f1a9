//! Shared fixtures: an in-memory store with the same semantics as Postgres,
//! a test configuration and request helpers.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::Value;
use uuid::Uuid;

use rust_campaign_api::api::build_router;
use rust_campaign_api::auth::{hash_api_token, JwtClaims};
use rust_campaign_api::config::{Config, DispatchSettings, RateLimitSettings};
use rust_campaign_api::dispatch::DispatchWorker;
use rust_campaign_api::errors::AppError;
use rust_campaign_api::gateway_client::MessagingGatewayClient;
use rust_campaign_api::handlers::AppState;
use rust_campaign_api::models::{
    ApiTokenOwner, Campaign, CampaignMessage, DueMessage, IntegrationLogEntry, Lead, LeadRef,
    Message, NewCampaign, NewLead, NewMessage, PlannedSend, Profile,
};
use rust_campaign_api::rate_limiter::{evaluate_window, RateLimitDecision};
use rust_campaign_api::store::{CrmStore, LeadInsert};

pub const JWT_SECRET: &str = "test-jwt-secret";

#[derive(Default)]
struct Tables {
    rate_limit_log: Vec<(String, String, DateTime<Utc>)>,
    api_tokens: Vec<(String, ApiTokenOwner)>,
    profiles: Vec<Profile>,
    leads: Vec<Lead>,
    campaigns: Vec<Campaign>,
    campaign_messages: Vec<CampaignMessage>,
    messages: Vec<Message>,
    integration_logs: Vec<IntegrationLogEntry>,
}

/// `CrmStore` over in-process tables. Each method holds the lock for its
/// whole body, which gives the same atomicity as the Postgres transactions.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    /// When set, `admit_request` returns a database error.
    pub fail_rate_limiter: AtomicBool,
    /// When set, `create_campaign` returns a database error.
    pub fail_campaigns: AtomicBool,
    /// When set, `insert_lead` returns a database error.
    pub fail_lead_inserts: AtomicBool,
    /// When set, `complete_dispatch` returns a database error.
    pub fail_dispatch_writes: AtomicBool,
}

fn storage_error() -> AppError {
    AppError::DatabaseError(sqlx::Error::PoolTimedOut)
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_api_token(&self, raw_token: &str, tenant_id: Uuid) -> ApiTokenOwner {
        let owner = ApiTokenOwner {
            id: Uuid::new_v4(),
            tenant_id,
        };
        self.tables
            .lock()
            .unwrap()
            .api_tokens
            .push((hash_api_token(raw_token), owner.clone()));
        owner
    }

    pub fn add_profile(&self, tenant_id: Uuid, is_active: bool) -> Profile {
        let profile = Profile {
            id: Uuid::new_v4(),
            tenant_id,
            is_active,
        };
        self.tables.lock().unwrap().profiles.push(profile.clone());
        profile
    }

    pub fn seed_lead(&self, tenant_id: Uuid, name: &str, phone: &str) -> Uuid {
        let now = Utc::now();
        let id = Uuid::new_v4();
        self.tables.lock().unwrap().leads.push(Lead {
            id,
            tenant_id,
            name: name.to_string(),
            phone: phone.to_string(),
            email: None,
            company: Some("ACME".to_string()),
            source: "seed".to_string(),
            status: "novo".to_string(),
            assigned_to: None,
            estimated_value: None,
            created_at: now,
            updated_at: now,
        });
        id
    }

    /// Inserts a campaign with one already-sent message for `lead_id`.
    pub fn seed_sent_campaign(&self, tenant_id: Uuid, lead_id: Uuid, sent_at: DateTime<Utc>) -> Uuid {
        let campaign_id = Uuid::new_v4();
        let mut t = self.tables.lock().unwrap();
        t.campaigns.push(Campaign {
            id: campaign_id,
            tenant_id,
            name: "seeded".to_string(),
            message_template: "Oi".to_string(),
            status: "completed".to_string(),
            total_leads: 1,
            responded_count: 0,
            delay_seconds: 30,
            created_by: Uuid::new_v4(),
            created_at: sent_at,
            updated_at: sent_at,
        });
        t.campaign_messages.push(CampaignMessage {
            id: Uuid::new_v4(),
            campaign_id,
            lead_id,
            scheduled_at: sent_at,
            status: "sent".to_string(),
            sent_at: Some(sent_at),
            error_message: None,
            created_at: sent_at,
        });
        campaign_id
    }

    /// Moves every campaign message of `campaign_id` to `at`.
    pub fn reschedule_campaign(&self, campaign_id: Uuid, at: DateTime<Utc>) {
        let mut t = self.tables.lock().unwrap();
        for cm in t.campaign_messages.iter_mut().filter(|cm| cm.campaign_id == campaign_id) {
            cm.scheduled_at = at;
        }
    }

    pub fn leads(&self) -> Vec<Lead> {
        self.tables.lock().unwrap().leads.clone()
    }

    pub fn campaigns(&self) -> Vec<Campaign> {
        self.tables.lock().unwrap().campaigns.clone()
    }

    pub fn campaign(&self, id: Uuid) -> Option<Campaign> {
        self.campaigns().into_iter().find(|c| c.id == id)
    }

    pub fn campaign_messages(&self, campaign_id: Uuid) -> Vec<CampaignMessage> {
        let mut rows: Vec<_> = self
            .tables
            .lock()
            .unwrap()
            .campaign_messages
            .iter()
            .filter(|cm| cm.campaign_id == campaign_id)
            .cloned()
            .collect();
        rows.sort_by_key(|cm| cm.scheduled_at);
        rows
    }

    pub fn messages(&self) -> Vec<Message> {
        self.tables.lock().unwrap().messages.clone()
    }

    pub fn integration_logs(&self) -> Vec<IntegrationLogEntry> {
        self.tables.lock().unwrap().integration_logs.clone()
    }

    pub fn rate_limit_entries(&self) -> usize {
        self.tables.lock().unwrap().rate_limit_log.len()
    }

    fn duplicate_in(t: &Tables, tenant_id: Uuid, phone: &str, email: Option<&str>) -> Option<Uuid> {
        let email = email.map(str::to_lowercase);
        t.leads
            .iter()
            .filter(|l| l.tenant_id == tenant_id)
            .find(|l| {
                l.phone == phone
                    || (email.is_some() && l.email.as_ref().map(|e| e.to_lowercase()) == email)
            })
            .map(|l| l.id)
    }

    fn insert_message_in(t: &mut Tables, message: &NewMessage) -> Option<Message> {
        if let Some(external_id) = &message.external_id {
            let taken = t.messages.iter().any(|m| {
                m.tenant_id == message.tenant_id && m.external_id.as_ref() == Some(external_id)
            });
            if taken {
                return None;
            }
        }
        let stored = Message {
            id: Uuid::new_v4(),
            tenant_id: message.tenant_id,
            lead_id: message.lead_id,
            campaign_id: message.campaign_id,
            phone: message.phone.clone(),
            body: message.body.clone(),
            direction: message.direction.as_str().to_string(),
            external_id: message.external_id.clone(),
            status: message.status.clone(),
            media_url: message.media_url.clone(),
            media_type: message.media_type.clone(),
            created_at: Utc::now(),
        };
        t.messages.push(stored.clone());
        Some(stored)
    }

    fn finalize_in(t: &mut Tables, campaign_message_id: Uuid) {
        let Some(campaign_id) = t
            .campaign_messages
            .iter()
            .find(|cm| cm.id == campaign_message_id)
            .map(|cm| cm.campaign_id)
        else {
            return;
        };
        let pending = t
            .campaign_messages
            .iter()
            .any(|cm| cm.campaign_id == campaign_id && matches!(cm.status.as_str(), "scheduled" | "sending"));
        if !pending {
            if let Some(c) = t.campaigns.iter_mut().find(|c| c.id == campaign_id) {
                c.status = "completed".to_string();
                c.updated_at = Utc::now();
            }
        }
    }
}

#[async_trait]
impl CrmStore for MemoryStore {
    async fn admit_request(
        &self,
        identifier: &str,
        endpoint: &str,
        max_requests: u32,
        window_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision, AppError> {
        if self.fail_rate_limiter.load(Ordering::SeqCst) {
            return Err(storage_error());
        }
        let mut t = self.tables.lock().unwrap();
        let window_start = now - Duration::seconds(window_secs as i64);
        let in_window: Vec<DateTime<Utc>> = t
            .rate_limit_log
            .iter()
            .filter(|(i, e, at)| i == identifier && e == endpoint && *at >= window_start)
            .map(|(_, _, at)| *at)
            .collect();
        let decision = evaluate_window(
            in_window.len() as u64,
            in_window.iter().min().copied(),
            now,
            max_requests,
            window_secs,
        );
        if decision.allowed {
            t.rate_limit_log
                .push((identifier.to_string(), endpoint.to_string(), now));
        }
        Ok(decision)
    }

    async fn prune_rate_limit_log(&self, before: DateTime<Utc>) -> Result<u64, AppError> {
        let mut t = self.tables.lock().unwrap();
        let len = t.rate_limit_log.len();
        t.rate_limit_log.retain(|(_, _, at)| *at >= before);
        Ok((len - t.rate_limit_log.len()) as u64)
    }

    async fn find_api_token(&self, token_hash: &str) -> Result<Option<ApiTokenOwner>, AppError> {
        let t = self.tables.lock().unwrap();
        Ok(t.api_tokens
            .iter()
            .find(|(hash, _)| hash == token_hash)
            .map(|(_, owner)| owner.clone()))
    }

    async fn find_profile(&self, user_id: Uuid) -> Result<Option<Profile>, AppError> {
        let t = self.tables.lock().unwrap();
        Ok(t.profiles.iter().find(|p| p.id == user_id).cloned())
    }

    async fn is_active_member(&self, tenant_id: Uuid, user_id: Uuid) -> Result<bool, AppError> {
        let t = self.tables.lock().unwrap();
        Ok(t.profiles
            .iter()
            .any(|p| p.id == user_id && p.tenant_id == tenant_id && p.is_active))
    }

    async fn find_duplicate_lead(
        &self,
        tenant_id: Uuid,
        phone: &str,
        email: Option<&str>,
    ) -> Result<Option<Uuid>, AppError> {
        let t = self.tables.lock().unwrap();
        Ok(Self::duplicate_in(&t, tenant_id, phone, email))
    }

    async fn insert_lead(&self, lead: &NewLead) -> Result<LeadInsert, AppError> {
        if self.fail_lead_inserts.load(Ordering::SeqCst) {
            return Err(storage_error());
        }
        let mut t = self.tables.lock().unwrap();
        if let Some(existing) = Self::duplicate_in(&t, lead.tenant_id, &lead.phone, lead.email.as_deref()) {
            return Ok(LeadInsert::Duplicate(existing));
        }
        let now = Utc::now();
        let id = Uuid::new_v4();
        t.leads.push(Lead {
            id,
            tenant_id: lead.tenant_id,
            name: lead.name.clone(),
            phone: lead.phone.clone(),
            email: lead.email.clone(),
            company: lead.company.clone(),
            source: lead.source.clone(),
            status: "novo".to_string(),
            assigned_to: lead.assigned_to,
            estimated_value: lead.estimated_value.clone(),
            created_at: now,
            updated_at: now,
        });
        Ok(LeadInsert::Created(id))
    }

    async fn find_lead(&self, tenant_id: Uuid, lead_id: Uuid) -> Result<Option<LeadRef>, AppError> {
        let t = self.tables.lock().unwrap();
        Ok(t.leads
            .iter()
            .find(|l| l.id == lead_id && l.tenant_id == tenant_id)
            .map(|l| LeadRef {
                id: l.id,
                tenant_id: l.tenant_id,
            }))
    }

    async fn find_lead_by_phone_suffix(
        &self,
        phone_digits: &str,
    ) -> Result<Option<LeadRef>, AppError> {
        let t = self.tables.lock().unwrap();
        let mut matches: Vec<&Lead> = t
            .leads
            .iter()
            .filter(|l| l.phone == phone_digits || l.phone.ends_with(phone_digits))
            .collect();
        matches.sort_by(|a, b| {
            (b.phone == phone_digits)
                .cmp(&(a.phone == phone_digits))
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(matches.first().map(|l| LeadRef {
            id: l.id,
            tenant_id: l.tenant_id,
        }))
    }

    async fn create_campaign(
        &self,
        campaign: &NewCampaign,
        plan: &[PlannedSend],
    ) -> Result<Campaign, AppError> {
        if self.fail_campaigns.load(Ordering::SeqCst) {
            return Err(storage_error());
        }
        let mut t = self.tables.lock().unwrap();
        let created = Campaign {
            id: campaign.id,
            tenant_id: campaign.tenant_id,
            name: campaign.name.clone(),
            message_template: campaign.message_template.clone(),
            status: "scheduled".to_string(),
            total_leads: plan.len() as i32,
            responded_count: 0,
            delay_seconds: campaign.delay_seconds,
            created_by: campaign.created_by,
            created_at: campaign.created_at,
            updated_at: campaign.created_at,
        };
        t.campaigns.push(created.clone());
        for send in plan {
            t.campaign_messages.push(CampaignMessage {
                id: Uuid::new_v4(),
                campaign_id: campaign.id,
                lead_id: send.lead_id,
                scheduled_at: send.scheduled_at,
                status: "scheduled".to_string(),
                sent_at: None,
                error_message: None,
                created_at: campaign.created_at,
            });
        }
        Ok(created)
    }

    async fn claim_due_messages(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DueMessage>, AppError> {
        let mut t = self.tables.lock().unwrap();
        let Tables {
            leads,
            campaigns,
            campaign_messages,
            ..
        } = &mut *t;

        for cm in campaign_messages.iter_mut() {
            if cm.status == "scheduled"
                && cm.scheduled_at <= now
                && !leads.iter().any(|l| l.id == cm.lead_id)
            {
                cm.status = "failed".to_string();
                cm.error_message = Some("lead not found".to_string());
            }
        }

        let mut due: Vec<&mut CampaignMessage> = campaign_messages
            .iter_mut()
            .filter(|cm| cm.status == "scheduled" && cm.scheduled_at <= now)
            .collect();
        due.sort_by_key(|cm| cm.scheduled_at);
        due.truncate(limit.max(0) as usize);

        let mut claimed = Vec::new();
        for cm in due {
            let (Some(campaign), Some(lead)) = (
                campaigns.iter_mut().find(|c| c.id == cm.campaign_id),
                leads.iter().find(|l| l.id == cm.lead_id),
            ) else {
                continue;
            };
            cm.status = "sending".to_string();
            if campaign.status == "scheduled" {
                campaign.status = "sending".to_string();
            }
            claimed.push(DueMessage {
                message_id: cm.id,
                campaign_id: cm.campaign_id,
                tenant_id: campaign.tenant_id,
                lead_id: cm.lead_id,
                lead_name: lead.name.clone(),
                phone: lead.phone.clone(),
                company: lead.company.clone(),
                template: campaign.message_template.clone(),
                scheduled_at: cm.scheduled_at,
            });
        }
        Ok(claimed)
    }

    async fn complete_dispatch(
        &self,
        campaign_message_id: Uuid,
        message: &NewMessage,
        sent_at: DateTime<Utc>,
    ) -> Result<Message, AppError> {
        if self.fail_dispatch_writes.load(Ordering::SeqCst) {
            return Err(storage_error());
        }
        let mut t = self.tables.lock().unwrap();
        let stored = match Self::insert_message_in(&mut t, message) {
            Some(m) => m,
            None => t
                .messages
                .iter()
                .find(|m| m.tenant_id == message.tenant_id && m.external_id == message.external_id)
                .cloned()
                .ok_or_else(storage_error)?,
        };
        if let Some(cm) = t
            .campaign_messages
            .iter_mut()
            .find(|cm| cm.id == campaign_message_id && cm.status == "sending")
        {
            cm.status = "sent".to_string();
            cm.sent_at = Some(sent_at);
            cm.error_message = None;
        }
        Self::finalize_in(&mut t, campaign_message_id);
        Ok(stored)
    }

    async fn fail_dispatch(&self, campaign_message_id: Uuid, error: &str) -> Result<(), AppError> {
        let mut t = self.tables.lock().unwrap();
        if let Some(cm) = t
            .campaign_messages
            .iter_mut()
            .find(|cm| cm.id == campaign_message_id && cm.status == "sending")
        {
            cm.status = "failed".to_string();
            cm.error_message = Some(error.to_string());
        }
        Self::finalize_in(&mut t, campaign_message_id);
        Ok(())
    }

    async fn increment_campaign_response(&self, lead_id: Uuid) -> Result<Option<Uuid>, AppError> {
        let mut t = self.tables.lock().unwrap();
        let latest = t
            .campaign_messages
            .iter()
            .filter(|cm| cm.lead_id == lead_id && cm.status == "sent")
            .max_by_key(|cm| cm.sent_at)
            .map(|cm| cm.campaign_id);
        let Some(campaign_id) = latest else {
            return Ok(None);
        };
        if let Some(c) = t.campaigns.iter_mut().find(|c| c.id == campaign_id) {
            c.responded_count += 1;
            c.updated_at = Utc::now();
            return Ok(Some(campaign_id));
        }
        Ok(None)
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<Option<Message>, AppError> {
        let mut t = self.tables.lock().unwrap();
        Ok(Self::insert_message_in(&mut t, message))
    }

    async fn insert_integration_log(&self, entry: &IntegrationLogEntry) -> Result<(), AppError> {
        self.tables
            .lock()
            .unwrap()
            .integration_logs
            .push(entry.clone());
        Ok(())
    }
}

pub fn test_config(gateway_base_url: &str) -> Config {
    Config {
        database_url: "postgresql://test".to_string(),
        port: 0,
        gateway_base_url: gateway_base_url.to_string(),
        gateway_api_key: "gateway-key".to_string(),
        gateway_instance: "main".to_string(),
        jwt_secret: JWT_SECRET.to_string(),
        webhook_secret: None,
        rate_limits: RateLimitSettings::default(),
        dispatch: DispatchSettings {
            poll_interval_secs: 1,
            batch_size: 50,
            concurrency: 4,
        },
        request_timeout_secs: 30,
        auth_cache_ttl_secs: 300,
    }
}

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub state: Arc<AppState>,
    pub router: Router,
    pub worker: DispatchWorker,
}

pub fn spawn_app(gateway_base_url: &str) -> TestApp {
    spawn_app_with(test_config(gateway_base_url))
}

pub fn spawn_app_with(config: Config) -> TestApp {
    let store = MemoryStore::new();
    let dyn_store: Arc<dyn CrmStore> = store.clone();
    let gateway = MessagingGatewayClient::new(
        config.gateway_base_url.clone(),
        config.gateway_api_key.clone(),
        config.gateway_instance.clone(),
    )
    .unwrap();
    let worker = DispatchWorker::new(dyn_store.clone(), gateway);
    let state = Arc::new(AppState::new(dyn_store, config, worker.clone()));
    let router = build_router(state.clone());
    TestApp {
        store,
        state,
        router,
        worker,
    }
}

pub fn user_token(user_id: Uuid) -> String {
    let now = Utc::now().timestamp();
    let claims = JwtClaims {
        sub: user_id.to_string(),
        exp: (now + 3600) as usize,
        iat: Some(now as usize),
        email: Some("vendas@example.com".to_string()),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

pub fn post_json(uri: &str, bearer: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", "203.0.113.10");
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub async fn read_json(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}
