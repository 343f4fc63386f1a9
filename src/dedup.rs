//! Rejects or merges leads already known to a tenant.
//!
//! The dedup key is the digits-only phone, or the lowercased email when
//! present. A pre-insert lookup answers the common case; the conditional
//! insert catches concurrent submissions of the same contact.

use uuid::Uuid;

use crate::errors::AppError;
use crate::models::NewLead;
use crate::store::{CrmStore, LeadInsert};

/// What happened to a submitted lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    Created(Uuid),
    Duplicate(Uuid),
}

pub struct DeduplicationGate<'a> {
    store: &'a dyn CrmStore,
}

impl<'a> DeduplicationGate<'a> {
    pub fn new(store: &'a dyn CrmStore) -> Self {
        Self { store }
    }

    /// Stores the lead unless the tenant already knows its phone or email.
    pub async fn admit(&self, lead: &NewLead) -> Result<DedupOutcome, AppError> {
        if let Some(existing) = self
            .store
            .find_duplicate_lead(lead.tenant_id, &lead.phone, lead.email.as_deref())
            .await?
        {
            tracing::debug!(
                "Duplicate lead for tenant {}: existing {}",
                lead.tenant_id,
                existing
            );
            return Ok(DedupOutcome::Duplicate(existing));
        }

        match self.store.insert_lead(lead).await? {
            LeadInsert::Created(id) => Ok(DedupOutcome::Created(id)),
            LeadInsert::Duplicate(existing) => {
                tracing::info!(
                    "Lead insert lost a race to {} in tenant {}",
                    existing,
                    lead.tenant_id
                );
                Ok(DedupOutcome::Duplicate(existing))
            }
        }
    }

    /// Single-submission path: a duplicate is a 409 carrying the existing id.
    pub async fn admit_single(&self, lead: &NewLead) -> Result<Uuid, AppError> {
        match self.admit(lead).await? {
            DedupOutcome::Created(id) => Ok(id),
            DedupOutcome::Duplicate(existing_id) => Err(AppError::Duplicate {
                message: "Lead already exists".to_string(),
                existing_id,
            }),
        }
    }
}
