//! Schema validation and normalization for lead submissions.
//!
//! Two shapes are accepted: a single lead from the external API, and bulk rows
//! from CSV/JSON imports. Validation never touches storage; callers resolve the
//! optional assignee separately.

use std::str::FromStr;
use std::sync::LazyLock;

use bigdecimal::BigDecimal;
use regex::Regex;
use uuid::Uuid;

use crate::errors::{AppError, FieldError};
use crate::models::{ApiLeadRequest, BulkLeadRow, NewLead};

pub const MAX_NAME_CHARS: usize = 200;
pub const MAX_EMAIL_CHARS: usize = 254;
pub const MAX_COMPANY_CHARS: usize = 200;
pub const MAX_SOURCE_CHARS: usize = 100;
pub const MAX_BULK_ROWS: usize = 100;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$",
    )
    .expect("email regex is valid")
});

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[1-9]\d{1,14}$").expect("phone regex is valid"));

/// Strips every non-digit character. The result is the dedup key.
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Checks an address has the usual `local@domain.tld` shape.
pub fn is_valid_email(email: &str) -> bool {
    email.len() <= MAX_EMAIL_CHARS && EMAIL_RE.is_match(email)
}

/// E.164-ish check: optional `+`, then 2-15 digits not starting with zero.
///
/// Spaces, dashes, dots and parentheses are tolerated as formatting.
pub fn is_valid_phone(raw: &str) -> bool {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();
    PHONE_RE.is_match(&cleaned)
}

/// Trims an optional string, mapping blank values to `None`.
fn clean_optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn check_len(
    errors: &mut Vec<FieldError>,
    field: &str,
    value: Option<&String>,
    max: usize,
) {
    if let Some(v) = value {
        if v.chars().count() > max {
            errors.push(FieldError::new(
                field,
                format!("must be at most {} characters", max),
            ));
        }
    }
}

fn validate_name(errors: &mut Vec<FieldError>, name: Option<&str>) -> Option<String> {
    match clean_optional(name) {
        None => {
            errors.push(FieldError::new("name", "is required"));
            None
        }
        Some(n) if n.chars().count() > MAX_NAME_CHARS => {
            errors.push(FieldError::new(
                "name",
                format!("must be between 1 and {} characters", MAX_NAME_CHARS),
            ));
            None
        }
        Some(n) => Some(n),
    }
}

fn validate_email(errors: &mut Vec<FieldError>, email: Option<&str>) -> Option<String> {
    let email = clean_optional(email)?.to_lowercase();
    if is_valid_email(&email) {
        Some(email)
    } else {
        errors.push(FieldError::new("email", "must be a valid email address"));
        None
    }
}

fn validate_phone(errors: &mut Vec<FieldError>, phone: Option<&str>) -> Option<String> {
    match clean_optional(phone) {
        None => {
            errors.push(FieldError::new("phone", "is required"));
            None
        }
        Some(p) if !is_valid_phone(&p) => {
            errors.push(FieldError::new(
                "phone",
                "must be in international format (+ and 2-15 digits)",
            ));
            None
        }
        Some(p) => Some(normalize_phone(&p)),
    }
}

/// A single API lead that passed validation.
///
/// `assigned_to` is only a candidate: it still has to resolve to an active
/// profile in the tenant, or be dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedLead {
    pub lead: NewLead,
    pub assignee_candidate: Option<Uuid>,
}

/// Validates a `POST /leads` body, collecting every field error.
pub fn validate_api_lead(
    tenant_id: Uuid,
    request: &ApiLeadRequest,
) -> Result<ValidatedLead, AppError> {
    let mut errors = Vec::new();

    let name = validate_name(&mut errors, request.name.as_deref());
    let email = validate_email(&mut errors, request.email.as_deref());
    let phone = validate_phone(&mut errors, request.phone.as_deref());

    let company = clean_optional(request.company.as_deref());
    check_len(&mut errors, "company", company.as_ref(), MAX_COMPANY_CHARS);
    let source = clean_optional(request.source.as_deref());
    check_len(&mut errors, "source", source.as_ref(), MAX_SOURCE_CHARS);

    let estimated_value = match request.estimated_value {
        None => None,
        Some(v) if !v.is_finite() || v < 0.0 => {
            errors.push(FieldError::new(
                "estimated_value",
                "must be a non-negative number",
            ));
            None
        }
        Some(v) => BigDecimal::from_str(&format!("{:.2}", v)).ok(),
    };

    // Unparseable ids are dropped the same way unknown ones are.
    let assignee_candidate = clean_optional(request.assigned_to.as_deref())
        .and_then(|id| Uuid::parse_str(&id).ok());

    if !errors.is_empty() {
        return Err(AppError::Validation {
            message: "Invalid lead data".to_string(),
            details: errors,
        });
    }

    match (name, phone) {
        (Some(name), Some(phone)) => Ok(ValidatedLead {
            lead: NewLead {
                tenant_id,
                name,
                phone,
                email,
                company,
                source: source.unwrap_or_else(|| "api".to_string()),
                assigned_to: None,
                estimated_value,
            },
            assignee_candidate,
        }),
        _ => Err(AppError::validation("Invalid lead data")),
    }
}

/// Checks batch-level constraints before any row is looked at.
pub fn validate_bulk_batch(rows: &[BulkLeadRow]) -> Result<(), AppError> {
    if rows.is_empty() {
        return Err(AppError::invalid_field("leads", "must contain at least one lead"));
    }
    if rows.len() > MAX_BULK_ROWS {
        return Err(AppError::invalid_field(
            "leads",
            format!("must contain at most {} leads", MAX_BULK_ROWS),
        ));
    }
    Ok(())
}

/// Validates one bulk row. The error string is what ends up in `error_details`.
pub fn validate_bulk_row(
    tenant_id: Uuid,
    row: &BulkLeadRow,
    assigned_to: Option<Uuid>,
) -> Result<NewLead, String> {
    let mut errors = Vec::new();

    let name = validate_name(&mut errors, row.name.as_deref());
    let phone = validate_phone(&mut errors, row.phone.as_deref());
    let email = validate_email(&mut errors, row.email.as_deref());
    let company = clean_optional(row.company.as_deref());
    check_len(&mut errors, "company", company.as_ref(), MAX_COMPANY_CHARS);
    let source = clean_optional(row.source.as_deref());
    check_len(&mut errors, "source", source.as_ref(), MAX_SOURCE_CHARS);

    match (name, phone) {
        (Some(name), Some(phone)) if errors.is_empty() => Ok(NewLead {
            tenant_id,
            name,
            phone,
            email,
            company,
            source: source.unwrap_or_else(|| "import".to_string()),
            assigned_to,
            estimated_value: None,
        }),
        _ => Err(errors
            .iter()
            .map(|e| format!("{} {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join(", ")),
    }
}
