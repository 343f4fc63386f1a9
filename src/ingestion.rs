//! Lead ingestion workflows: single API submission and bulk import.
//!
//! Both paths validate before touching the lead table and go through the
//! [`DeduplicationGate`]. Bulk imports may schedule a campaign for the leads
//! they created.

use serde_json::Value;
use uuid::Uuid;

use crate::auth::{ApiTokenAuth, UserAuth};
use crate::dedup::{DedupOutcome, DeduplicationGate};
use crate::errors::AppError;
use crate::models::{BulkImportRequest, BulkImportResponse, BulkImportResults, IntegrationLogEntry};
use crate::sanitize;
use crate::scheduler::{resolve_delay, CampaignRequest, CampaignScheduler};
use crate::store::CrmStore;
use crate::validation::{validate_bulk_batch, validate_bulk_row, ValidatedLead};

pub const LEADS_ENDPOINT: &str = "/leads";

/// Stores one validated lead for an API-token caller.
///
/// The handler validates and applies the rate-limit gate first.
pub async fn ingest_api_lead(
    store: &dyn CrmStore,
    caller: ApiTokenAuth,
    validated: ValidatedLead,
) -> Result<Uuid, AppError> {
    let mut lead = validated.lead;

    if let Some(candidate) = validated.assignee_candidate {
        if store.is_active_member(caller.tenant_id, candidate).await? {
            lead.assigned_to = Some(candidate);
        } else {
            tracing::debug!(
                "Dropping assignee {} not active in tenant {}",
                candidate,
                caller.tenant_id
            );
        }
    }

    let lead_id = DeduplicationGate::new(store).admit_single(&lead).await?;
    tracing::info!(
        "Lead {} created via API token {} (tenant {})",
        lead_id,
        caller.token_id,
        caller.tenant_id
    );
    Ok(lead_id)
}

/// Records one integration attempt. Audit failures are logged, never raised.
pub async fn record_integration_attempt(
    store: &dyn CrmStore,
    caller: Option<ApiTokenAuth>,
    payload: Value,
    outcome: Result<Uuid, &AppError>,
) {
    let (status, error, lead_id) = match outcome {
        Ok(id) => ("success", None, Some(id)),
        Err(e) => {
            let status = match e.root() {
                AppError::Duplicate { .. } => "duplicate",
                AppError::RateLimited { .. } => "rate_limited",
                AppError::Unauthorized(_) => "unauthorized",
                AppError::Validation { .. } => "validation_error",
                _ => "error",
            };
            let lead_id = match e.root() {
                AppError::Duplicate { existing_id, .. } => Some(*existing_id),
                _ => None,
            };
            (status, Some(e.to_string()), lead_id)
        }
    };

    let entry = IntegrationLogEntry {
        tenant_id: caller.map(|c| c.tenant_id),
        api_token_id: caller.map(|c| c.token_id),
        endpoint: LEADS_ENDPOINT.to_string(),
        payload,
        status: status.to_string(),
        error,
        lead_id,
    };

    if let Err(e) = store.insert_integration_log(&entry).await {
        tracing::error!("Failed to write integration log: {}", e);
    }
}

/// Imports a batch row by row, then optionally schedules a campaign.
///
/// Batch-level problems (size, campaign parameters) fail before any row is
/// stored. Row-level problems are counted and the batch continues.
pub async fn ingest_bulk(
    store: &dyn CrmStore,
    user: UserAuth,
    request: &BulkImportRequest,
) -> Result<BulkImportResponse, AppError> {
    validate_bulk_batch(&request.leads)?;

    let campaign_params = if request.auto_prospect {
        let template = request
            .message_template
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                AppError::invalid_field("message_template", "is required when auto_prospect is set")
            })?;
        sanitize::check_message_content("message_template", template)?;
        Some((template.to_string(), resolve_delay(request.delay_seconds)?))
    } else {
        None
    };

    let gate = DeduplicationGate::new(store);
    let mut results = BulkImportResults::default();
    let mut created = Vec::new();

    for (index, row) in request.leads.iter().enumerate() {
        let line = index + 1;
        let lead = match validate_bulk_row(user.tenant_id, row, Some(user.user_id)) {
            Ok(lead) => lead,
            Err(reason) => {
                results.errors += 1;
                results.error_details.push(format!("Linha {}: {}", line, reason));
                continue;
            }
        };

        match gate.admit(&lead).await {
            Ok(DedupOutcome::Created(id)) => {
                results.success += 1;
                created.push(id);
            }
            Ok(DedupOutcome::Duplicate(_)) => results.duplicates += 1,
            Err(e) => {
                tracing::error!("Bulk import row {} failed: {}", line, e);
                results.errors += 1;
                results
                    .error_details
                    .push(format!("Linha {}: {}", line, e.public_message()));
            }
        }
    }

    tracing::info!(
        "Bulk import for tenant {}: {} created, {} duplicates, {} errors",
        user.tenant_id,
        results.success,
        results.duplicates,
        results.errors
    );

    let mut response = BulkImportResponse {
        success: true,
        results,
        campaign_id: None,
        campaign_warning: None,
    };

    let Some((template, delay_secs)) = campaign_params else {
        return Ok(response);
    };
    if created.is_empty() {
        tracing::info!("Bulk import created no leads; skipping campaign");
        return Ok(response);
    }

    let campaign_request = CampaignRequest {
        tenant_id: user.tenant_id,
        created_by: user.user_id,
        name: request.campaign_name.clone(),
        template,
        delay_secs,
        lead_ids: created,
    };

    match CampaignScheduler::new(store).schedule(campaign_request).await {
        Ok(campaign) => response.campaign_id = Some(campaign.id),
        Err(e) => {
            // Leads are already stored; the caller must learn the campaign did not start.
            tracing::error!(
                "Campaign creation failed after bulk import for tenant {}: {}",
                user.tenant_id,
                e
            );
            response.campaign_warning =
                Some(format!("Campaign was not created: {}", e.public_message()));
        }
    }

    Ok(response)
}
