use crate::errors::{AppError, ResultExt};
use crate::models::{Country, CreditApplication};
use crate::simulator::extract_monthly_income;
use crate::store::ApplicationStore;
use crate::strategies::CountryStrategy;
use crate::validation::ValidationRunner;
use serde_json::Value;

/// Outcome of a successful webhook ingest.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IngestOutcome {
    pub application_id: i64,
    pub country: String,
}

/// Ingests banking-data payloads pushed by external providers.
///
/// Providers are sloppy about shape: payloads may arrive wrapped in
/// single-element arrays and reference ids may be numbers or numeric
/// strings. Resolution tries the explicit reference first, then falls back
/// to matching the reported name against declared full names.
#[derive(Clone)]
pub struct WebhookIngestor {
    store: ApplicationStore,
    runner: ValidationRunner,
}

impl WebhookIngestor {
    pub fn new(store: ApplicationStore, runner: ValidationRunner) -> Self {
        Self { store, runner }
    }

    pub async fn ingest(&self, payload: &Value) -> Result<IngestOutcome, AppError> {
        let payload = unwrap_scalar(payload);

        let country_field = field_str(payload, "country").ok_or_else(|| {
            AppError::Validation(vec!["payload is missing a country".to_string()])
        })?;
        let country = Country::parse_code_or_name(country_field)
            .map_err(|e| AppError::Validation(vec![e.to_string()]))?;

        let app = self.resolve(payload, country).await?.ok_or_else(|| {
            AppError::Validation(vec![format!(
                "no credit application matches this payload for {}",
                country
            )])
        })?;

        let income = extract_monthly_income(payload);
        self.store
            .store_banking_data(app.id, country, payload, income.as_ref())
            .await
            .context("persisting webhook banking data")?;
        tracing::info!(
            "Ingested banking data for application {}/{}",
            app.id,
            country
        );

        // The banking data is durable at this point; a validation fault
        // surfaces as a structured failure and the provider may redeliver,
        // which is safe because the whole ingest is idempotent.
        let strategy = CountryStrategy::for_country(country);
        strategy
            .on_banking_data_received(app.id, &self.runner)
            .await
            .context("post-ingest validation")?;

        Ok(IngestOutcome {
            application_id: app.id,
            country: country.as_str().to_string(),
        })
    }

    /// Reference id first, declared-name fallback second.
    async fn resolve(
        &self,
        payload: &Value,
        country: Country,
    ) -> Result<Option<CreditApplication>, AppError> {
        if let Some(id) = reference_id(payload) {
            if let Some(app) = self.store.find(id, country).await? {
                return Ok(Some(app));
            }
        }

        let name = field_str(payload, "name").unwrap_or("");
        let lastname = field_str(payload, "lastname").unwrap_or("");
        if name.trim().is_empty() || lastname.trim().is_empty() {
            return Ok(None);
        }
        self.store
            .find_by_full_name(&format!("{} {}", name, lastname), country)
            .await
    }
}

/// Unwraps single-element array wrappers some providers add around the
/// payload object.
fn unwrap_scalar(payload: &Value) -> &Value {
    let mut current = payload;
    while let Value::Array(items) = current {
        if items.len() != 1 {
            break;
        }
        current = &items[0];
    }
    current
}

/// Reads a string field, tolerating a single-element array wrapper around
/// the value itself.
fn field_str<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.get(key).map(unwrap_scalar).and_then(|v| v.as_str())
}

/// Accepts the reference id as a JSON number or a numeric string, wrapped
/// or not.
fn reference_id(payload: &Value) -> Option<i64> {
    match payload.get("reference_id").map(unwrap_scalar) {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}
