use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::errors::AppError;
use crate::inbound::MIN_SENDER_DIGITS;
use crate::models::{
    ApiTokenOwner, Campaign, DueMessage, IntegrationLogEntry, LeadRef, Message, NewCampaign,
    NewLead, NewMessage, PlannedSend, Profile,
};
use crate::rate_limiter::{evaluate_window, RateLimitDecision, MAX_WINDOW_SECS};
use crate::store::{CrmStore, LeadInsert};

const MESSAGE_COLUMNS: &str = "id, tenant_id, lead_id, campaign_id, phone, body, direction, \
     external_id, status, media_url, media_type, created_at";

/// Postgres-backed [`CrmStore`].
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, AppError> {
        self.pool.begin().await.map_err(AppError::DatabaseError)
    }

    /// Flips the campaign to `completed` once none of its rows are pending.
    async fn finalize_campaign(
        tx: &mut Transaction<'_, Postgres>,
        campaign_message_id: Uuid,
    ) -> Result<(), AppError> {
        let completed = sqlx::query_as::<_, (Uuid,)>(
            r#"
            UPDATE campaigns c
            SET status = 'completed', updated_at = now()
            WHERE c.id = (SELECT campaign_id FROM campaign_messages WHERE id = $1)
              AND c.status <> 'completed'
              AND NOT EXISTS (
                  SELECT 1 FROM campaign_messages cm
                  WHERE cm.campaign_id = c.id AND cm.status IN ('scheduled', 'sending')
              )
            RETURNING c.id
            "#,
        )
        .bind(campaign_message_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(AppError::DatabaseError)?;

        if let Some((campaign_id,)) = completed {
            tracing::info!("✅ Campaign {} completed", campaign_id);
        }
        Ok(())
    }
}

#[async_trait]
impl CrmStore for PgStore {
    async fn admit_request(
        &self,
        identifier: &str,
        endpoint: &str,
        max_requests: u32,
        window_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision, AppError> {
        let mut tx = self.begin().await?;

        // Serializes concurrent checks on the same key until commit.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1 || ':' || $2))")
            .bind(identifier)
            .bind(endpoint)
            .execute(&mut *tx)
            .await
            .map_err(AppError::DatabaseError)?;

        let window_start = now - Duration::seconds(window_secs.min(MAX_WINDOW_SECS) as i64);
        let (count, oldest): (i64, Option<DateTime<Utc>>) = sqlx::query_as(
            r#"
            SELECT COUNT(*), MIN(created_at)
            FROM rate_limit_log
            WHERE identifier = $1 AND endpoint = $2 AND created_at >= $3
            "#,
        )
        .bind(identifier)
        .bind(endpoint)
        .bind(window_start)
        .fetch_one(&mut *tx)
        .await
        .map_err(AppError::DatabaseError)?;

        let decision = evaluate_window(count.max(0) as u64, oldest, now, max_requests, window_secs);

        if decision.allowed {
            sqlx::query(
                "INSERT INTO rate_limit_log (identifier, endpoint, created_at) VALUES ($1, $2, $3)",
            )
            .bind(identifier)
            .bind(endpoint)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(AppError::DatabaseError)?;
        }

        tx.commit().await.map_err(AppError::DatabaseError)?;
        Ok(decision)
    }

    async fn prune_rate_limit_log(&self, before: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM rate_limit_log WHERE created_at < $1")
            .bind(before)
            .execute(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        Ok(result.rows_affected())
    }

    async fn find_api_token(&self, token_hash: &str) -> Result<Option<ApiTokenOwner>, AppError> {
        sqlx::query_as::<_, ApiTokenOwner>(
            "SELECT id, tenant_id FROM api_tokens WHERE token_hash = $1 AND is_active = true",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::DatabaseError)
    }

    async fn find_profile(&self, user_id: Uuid) -> Result<Option<Profile>, AppError> {
        sqlx::query_as::<_, Profile>("SELECT id, tenant_id, is_active FROM profiles WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::DatabaseError)
    }

    async fn is_active_member(&self, tenant_id: Uuid, user_id: Uuid) -> Result<bool, AppError> {
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM profiles WHERE id = $1 AND tenant_id = $2 AND is_active = true
            )
            "#,
        )
        .bind(user_id)
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;
        Ok(exists)
    }

    async fn find_duplicate_lead(
        &self,
        tenant_id: Uuid,
        phone: &str,
        email: Option<&str>,
    ) -> Result<Option<Uuid>, AppError> {
        let found = sqlx::query_as::<_, (Uuid,)>(
            r#"
            SELECT id FROM leads
            WHERE tenant_id = $1
              AND (phone = $2 OR ($3::text IS NOT NULL AND lower(email) = lower($3)))
            ORDER BY created_at
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .bind(phone)
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;
        Ok(found.map(|(id,)| id))
    }

    async fn insert_lead(&self, lead: &NewLead) -> Result<LeadInsert, AppError> {
        // Conflicts on either unique index (phone, lower(email)) are absorbed.
        let inserted = sqlx::query_as::<_, (Uuid,)>(
            r#"
            INSERT INTO leads (
                id, tenant_id, name, phone, email, company, source,
                assigned_to, estimated_value
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(lead.tenant_id)
        .bind(&lead.name)
        .bind(&lead.phone)
        .bind(&lead.email)
        .bind(&lead.company)
        .bind(&lead.source)
        .bind(lead.assigned_to)
        .bind(&lead.estimated_value)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        if let Some((id,)) = inserted {
            return Ok(LeadInsert::Created(id));
        }

        let existing = self
            .find_duplicate_lead(lead.tenant_id, &lead.phone, lead.email.as_deref())
            .await?
            .ok_or_else(|| {
                AppError::InternalError("Lead insert conflicted but no match found".to_string())
            })?;
        Ok(LeadInsert::Duplicate(existing))
    }

    async fn find_lead(&self, tenant_id: Uuid, lead_id: Uuid) -> Result<Option<LeadRef>, AppError> {
        sqlx::query_as::<_, LeadRef>("SELECT id, tenant_id FROM leads WHERE id = $1 AND tenant_id = $2")
            .bind(lead_id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::DatabaseError)
    }

    async fn find_lead_by_phone_suffix(
        &self,
        phone_digits: &str,
    ) -> Result<Option<LeadRef>, AppError> {
        if phone_digits.len() < MIN_SENDER_DIGITS {
            return Ok(None);
        }
        sqlx::query_as::<_, LeadRef>(
            r#"
            SELECT id, tenant_id FROM leads
            WHERE phone = $1 OR phone LIKE '%' || $1
            ORDER BY (phone = $1) DESC, created_at DESC
            LIMIT 1
            "#,
        )
        .bind(phone_digits)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::DatabaseError)
    }

    async fn create_campaign(
        &self,
        campaign: &NewCampaign,
        plan: &[PlannedSend],
    ) -> Result<Campaign, AppError> {
        let mut tx = self.begin().await?;

        let created = sqlx::query_as::<_, Campaign>(
            r#"
            INSERT INTO campaigns (
                id, tenant_id, name, message_template, status, total_leads,
                responded_count, delay_seconds, created_by, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, 'scheduled', $5, 0, $6, $7, $8, $8)
            RETURNING id, tenant_id, name, message_template, status, total_leads,
                      responded_count, delay_seconds, created_by, created_at, updated_at
            "#,
        )
        .bind(campaign.id)
        .bind(campaign.tenant_id)
        .bind(&campaign.name)
        .bind(&campaign.message_template)
        .bind(plan.len() as i32)
        .bind(campaign.delay_seconds)
        .bind(campaign.created_by)
        .bind(campaign.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(AppError::DatabaseError)?;

        let ids: Vec<Uuid> = plan.iter().map(|_| Uuid::new_v4()).collect();
        let lead_ids: Vec<Uuid> = plan.iter().map(|p| p.lead_id).collect();
        let scheduled: Vec<DateTime<Utc>> = plan.iter().map(|p| p.scheduled_at).collect();

        sqlx::query(
            r#"
            INSERT INTO campaign_messages (id, campaign_id, lead_id, scheduled_at, status)
            SELECT id, $1, lead_id, scheduled_at, 'scheduled'
            FROM UNNEST($2::uuid[], $3::uuid[], $4::timestamptz[])
                 AS t(id, lead_id, scheduled_at)
            "#,
        )
        .bind(campaign.id)
        .bind(&ids)
        .bind(&lead_ids)
        .bind(&scheduled)
        .execute(&mut *tx)
        .await
        .map_err(AppError::DatabaseError)?;

        tx.commit().await.map_err(AppError::DatabaseError)?;

        tracing::info!(
            "📣 Campaign {} scheduled with {} message(s)",
            created.id,
            plan.len()
        );
        Ok(created)
    }

    async fn claim_due_messages(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DueMessage>, AppError> {
        let mut tx = self.begin().await?;

        // Rows whose lead was deleted can never be sent.
        let orphaned = sqlx::query(
            r#"
            UPDATE campaign_messages cm
            SET status = 'failed', error_message = 'lead not found'
            WHERE cm.status = 'scheduled' AND cm.scheduled_at <= $1
              AND NOT EXISTS (SELECT 1 FROM leads l WHERE l.id = cm.lead_id)
            "#,
        )
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(AppError::DatabaseError)?;
        if orphaned.rows_affected() > 0 {
            tracing::warn!(
                "Marked {} campaign message(s) failed: lead not found",
                orphaned.rows_affected()
            );
        }

        let claimed = sqlx::query_as::<_, DueMessage>(
            r#"
            WITH due AS (
                SELECT cm.id
                FROM campaign_messages cm
                WHERE cm.status = 'scheduled' AND cm.scheduled_at <= $1
                ORDER BY cm.scheduled_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE campaign_messages cm
            SET status = 'sending'
            FROM due, campaigns c, leads l
            WHERE cm.id = due.id AND c.id = cm.campaign_id AND l.id = cm.lead_id
            RETURNING cm.id AS message_id, cm.campaign_id, c.tenant_id, cm.lead_id,
                      l.name AS lead_name, l.phone, l.company,
                      c.message_template AS template, cm.scheduled_at
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await
        .map_err(AppError::DatabaseError)?;

        if !claimed.is_empty() {
            let mut campaign_ids: Vec<Uuid> = claimed.iter().map(|m| m.campaign_id).collect();
            campaign_ids.sort();
            campaign_ids.dedup();

            sqlx::query(
                r#"
                UPDATE campaigns SET status = 'sending', updated_at = now()
                WHERE id = ANY($1) AND status = 'scheduled'
                "#,
            )
            .bind(&campaign_ids)
            .execute(&mut *tx)
            .await
            .map_err(AppError::DatabaseError)?;
        }

        tx.commit().await.map_err(AppError::DatabaseError)?;

        let mut claimed = claimed;
        claimed.sort_by_key(|m| m.scheduled_at);
        Ok(claimed)
    }

    async fn complete_dispatch(
        &self,
        campaign_message_id: Uuid,
        message: &NewMessage,
        sent_at: DateTime<Utc>,
    ) -> Result<Message, AppError> {
        let mut tx = self.begin().await?;

        let stored = insert_message_returning(&mut tx, message).await?;
        let stored = match stored {
            Some(m) => m,
            None => {
                // Gateway reused an id we already hold; keep the existing row.
                sqlx::query_as::<_, Message>(&format!(
                    "SELECT {} FROM messages WHERE tenant_id = $1 AND external_id = $2",
                    MESSAGE_COLUMNS
                ))
                .bind(message.tenant_id)
                .bind(&message.external_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(AppError::DatabaseError)?
            }
        };

        sqlx::query(
            r#"
            UPDATE campaign_messages
            SET status = 'sent', sent_at = $2, error_message = NULL
            WHERE id = $1 AND status = 'sending'
            "#,
        )
        .bind(campaign_message_id)
        .bind(sent_at)
        .execute(&mut *tx)
        .await
        .map_err(AppError::DatabaseError)?;

        Self::finalize_campaign(&mut tx, campaign_message_id).await?;

        tx.commit().await.map_err(AppError::DatabaseError)?;
        Ok(stored)
    }

    async fn fail_dispatch(&self, campaign_message_id: Uuid, error: &str) -> Result<(), AppError> {
        let mut tx = self.begin().await?;

        sqlx::query(
            r#"
            UPDATE campaign_messages
            SET status = 'failed', error_message = $2
            WHERE id = $1 AND status = 'sending'
            "#,
        )
        .bind(campaign_message_id)
        .bind(error)
        .execute(&mut *tx)
        .await
        .map_err(AppError::DatabaseError)?;

        Self::finalize_campaign(&mut tx, campaign_message_id).await?;

        tx.commit().await.map_err(AppError::DatabaseError)?;
        Ok(())
    }

    async fn increment_campaign_response(&self, lead_id: Uuid) -> Result<Option<Uuid>, AppError> {
        let updated = sqlx::query_as::<_, (Uuid,)>(
            r#"
            UPDATE campaigns
            SET responded_count = responded_count + 1, updated_at = now()
            WHERE id = (
                SELECT campaign_id FROM campaign_messages
                WHERE lead_id = $1 AND status = 'sent'
                ORDER BY sent_at DESC
                LIMIT 1
            )
            RETURNING id
            "#,
        )
        .bind(lead_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;
        Ok(updated.map(|(id,)| id))
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<Option<Message>, AppError> {
        let mut tx = self.begin().await?;
        let stored = insert_message_returning(&mut tx, message).await?;
        tx.commit().await.map_err(AppError::DatabaseError)?;
        Ok(stored)
    }

    async fn insert_integration_log(&self, entry: &IntegrationLogEntry) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO integration_logs (
                id, tenant_id, api_token_id, endpoint, payload, status, error, lead_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entry.tenant_id)
        .bind(entry.api_token_id)
        .bind(&entry.endpoint)
        .bind(&entry.payload)
        .bind(&entry.status)
        .bind(&entry.error)
        .bind(entry.lead_id)
        .execute(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;
        Ok(())
    }
}

/// Inserts a message; `None` when the tenant already has its external id.
async fn insert_message_returning(
    tx: &mut Transaction<'_, Postgres>,
    message: &NewMessage,
) -> Result<Option<Message>, AppError> {
    sqlx::query_as::<_, Message>(&format!(
        r#"
        INSERT INTO messages (
            id, tenant_id, lead_id, campaign_id, phone, body, direction,
            external_id, status, media_url, media_type
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (tenant_id, external_id) DO NOTHING
        RETURNING {}
        "#,
        MESSAGE_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(message.tenant_id)
    .bind(message.lead_id)
    .bind(message.campaign_id)
    .bind(&message.phone)
    .bind(&message.body)
    .bind(message.direction.as_str())
    .bind(&message.external_id)
    .bind(&message.status)
    .bind(&message.media_url)
    .bind(&message.media_type)
    .fetch_optional(&mut **tx)
    .await
    .map_err(AppError::DatabaseError)
}
