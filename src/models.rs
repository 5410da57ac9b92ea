use crate::errors::AppError;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

// ============ Countries ============

/// Supported countries. This is a closed set: adding a country means adding
/// a strategy implementation, not configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Country {
    Mexico,
    Portugal,
}

impl Country {
    pub const ALL: [Country; 2] = [Country::Mexico, Country::Portugal];

    /// Lower-case country name, the primary-storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Country::Mexico => "mexico",
            Country::Portugal => "portugal",
        }
    }

    /// Two-letter analytic code, used only for aggregate reporting.
    pub fn analytic_code(&self) -> &'static str {
        match self {
            Country::Mexico => "MX",
            Country::Portugal => "PT",
        }
    }

    /// Parses a lower-cased country name. An unrecognized country is a fatal
    /// configuration error naming the offender and the valid set.
    pub fn parse(value: &str) -> Result<Country, AppError> {
        match value.trim().to_lowercase().as_str() {
            "mexico" => Ok(Country::Mexico),
            "portugal" => Ok(Country::Portugal),
            other => Err(AppError::Configuration(format!(
                "No strategy found for country: {}. Available countries: {}",
                other,
                Country::ALL
                    .iter()
                    .map(|c| c.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    /// Resolves either an analytic code ("MX") or a full name ("mexico").
    pub fn parse_code_or_name(value: &str) -> Result<Country, AppError> {
        match value.trim().to_uppercase().as_str() {
            "MX" => Ok(Country::Mexico),
            "PT" => Ok(Country::Portugal),
            _ => Country::parse(value),
        }
    }
}

impl std::fmt::Display for Country {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============ Status ============

/// Application status. The workflow engine only automates the two
/// country_validated / country_invalidated transitions; everything else is
/// set by an authorized caller and accepted as long as it is a member of
/// the enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Preapproved,
    ManualRequired,
    CountryValidated,
    CountryInvalidated,
    InReview,
    Approved,
    Rejected,
    Expired,
    Cancelled,
}

impl Status {
    pub const ALL: [Status; 10] = [
        Status::Pending,
        Status::Preapproved,
        Status::ManualRequired,
        Status::CountryValidated,
        Status::CountryInvalidated,
        Status::InReview,
        Status::Approved,
        Status::Rejected,
        Status::Expired,
        Status::Cancelled,
    ];

    /// Wire-visible status string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Preapproved => "preapproved",
            Status::ManualRequired => "manual_required",
            Status::CountryValidated => "country_validated",
            Status::CountryInvalidated => "country_invalidated",
            Status::InReview => "in_review",
            Status::Approved => "approved",
            Status::Rejected => "rejected",
            Status::Expired => "expired",
            Status::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Result<Status, AppError> {
        Status::ALL
            .iter()
            .copied()
            .find(|s| s.as_str() == value)
            .ok_or_else(|| {
                AppError::Validation(vec![format!("status '{}' is not a valid status", value)])
            })
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============ Database Models ============

/// A single rule outcome inside `validation_result`. Keyed by `name` within
/// one application: upsert semantics, entries are never removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationEntry {
    /// Rule identifier, e.g. "requested_amount_vs_monthly_income".
    pub name: String,
    /// Outcome of the most recent evaluation of that rule.
    pub result: bool,
}

/// The central entity: a credit application, stored partitioned by country
/// with a composite (id, country) key.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CreditApplication {
    /// Numeric identifier, unique together with `country`.
    pub id: i64,
    /// Lower-case country name; always a member of the supported set.
    pub country: String,
    /// Applicant's declared full name.
    pub full_name: String,
    /// Requested loan amount, always > 0.
    pub requested_amount: BigDecimal,
    /// Date the application was filed.
    pub application_date: NaiveDate,
    /// Current workflow status, always a member of the status enum.
    pub status: String,
    /// Monthly income reported by banking data; absent until data arrives.
    pub monthly_income: Option<BigDecimal>,
    /// Full banking payload, stored verbatim.
    pub banking_data: Option<serde_json::Value>,
    /// Ordered per-rule results, upserted by rule name.
    pub validation_result: Json<Vec<ValidationEntry>>,
    /// Attached identity document filename, if any.
    pub identity_document_filename: Option<String>,
    /// Attached identity document raw bytes, if any.
    #[serde(skip_serializing, default)]
    pub identity_document_content: Option<Vec<u8>>,
    /// Owning user (the creator); applications have exactly one owner.
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CreditApplication {
    pub fn country_enum(&self) -> Result<Country, AppError> {
        Country::parse(&self.country)
    }
}

/// Immutable audit row produced by the storage-level change-capture trigger.
/// The workflow engine never writes these directly.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CreditApplicationEvent {
    pub id: i64,
    pub credit_application_id: i64,
    pub country: String,
    /// One of "created", "updated", "deleted".
    pub event_type: String,
    /// Full snapshot for created/deleted; changed-field diff for updated.
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ============ Notifications ============

/// Ephemeral status-change notification delivered to the owner's stream.
/// Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub type_: String,
    pub credit_application_id: i64,
    pub status: String,
    pub message: String,
}

// ============ API Request/Response Models ============

/// Identity document upload: filename plus decoded textual content.
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentUpload {
    pub filename: String,
    pub content: String,
}

/// Request payload for creating a credit application.
#[derive(Debug, Deserialize)]
pub struct CreateApplicationRequest {
    pub country: Option<String>,
    pub full_name: Option<String>,
    pub requested_amount: Option<f64>,
    pub status: Option<String>,
    pub identity_document: Option<DocumentUpload>,
}

/// Status-only update performed by an authorized actor.
#[derive(Debug, Deserialize)]
pub struct UpdateApplicationRequest {
    pub status: String,
}

/// Result of running a country strategy against a new application. The
/// strategy's only side effect is scheduling background jobs.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessResult {
    pub success: bool,
    pub country: String,
    pub message: String,
}

/// Query parameters for the application listing.
#[derive(Debug, Deserialize)]
pub struct ListQueryParams {
    pub country: Option<String>,
    pub status: Option<String>,
    pub page: Option<i64>,
}

/// Composite-key lookup parameters (the id arrives in the path).
#[derive(Debug, Deserialize)]
pub struct CountryQueryParam {
    pub country: Option<String>,
}

/// Pagination envelope for listings.
#[derive(Debug, Serialize)]
pub struct Pagination {
    pub page: i64,
    pub per_page: i64,
    pub total_count: i64,
    pub total_pages: i64,
}

/// Serialized application returned by the HTTP surface.
#[derive(Debug, Serialize)]
pub struct ApplicationResponse {
    pub id: i64,
    pub country: String,
    pub full_name: String,
    pub requested_amount: f64,
    pub status: String,
    pub application_date: String,
    pub monthly_income: Option<f64>,
    pub validation_result: Vec<ValidationEntry>,
    pub identity_document_filename: Option<String>,
}

impl ApplicationResponse {
    pub fn from_application(app: &CreditApplication) -> Self {
        use bigdecimal::ToPrimitive;

        Self {
            id: app.id,
            country: app.country.clone(),
            full_name: app.full_name.clone(),
            requested_amount: app.requested_amount.to_f64().unwrap_or(0.0),
            status: app.status.clone(),
            application_date: app.application_date.format("%Y-%m-%d").to_string(),
            monthly_income: app
                .monthly_income
                .as_ref()
                .and_then(bigdecimal::ToPrimitive::to_f64),
            validation_result: app.validation_result.0.clone(),
            identity_document_filename: app.identity_document_filename.clone(),
        }
    }
}
