use crate::errors::AppError;
use crate::models::{Country, CreditApplication};
use crate::store::ApplicationStore;
use crate::strategies::{CountryStrategy, DeliveryMode};
use crate::validation::ValidationRunner;
use bigdecimal::BigDecimal;
use chrono::Datelike;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{json, Value};
use std::str::FromStr;

const LOAN_TYPES: [&str; 3] = ["personal", "car", "mortgage"];
// Weighted towards verified, matching the upstream provider's sandbox.
const ACCOUNT_STATUSES: [&str; 3] = ["verified", "pending", "verified"];

/// Stands in for the third-party banking data provider. Generates a
/// realistic payload for an application and delivers it either straight
/// into storage or through the public webhook endpoint, depending on the
/// country's delivery mode.
#[derive(Clone)]
pub struct BankingSimulator {
    store: ApplicationStore,
    runner: ValidationRunner,
    http: reqwest::Client,
    webhook_base_url: String,
}

impl BankingSimulator {
    pub fn new(
        store: ApplicationStore,
        runner: ValidationRunner,
        http: reqwest::Client,
        webhook_base_url: String,
    ) -> Self {
        Self {
            store,
            runner,
            http,
            webhook_base_url,
        }
    }

    /// Produces and delivers banking data for one application.
    pub async fn run(&self, application_id: i64, country: Country) -> Result<(), AppError> {
        let app = self.store.fetch(application_id, country).await?;
        let strategy = CountryStrategy::for_country(country);
        let payload = generate_banking_data(&app, country);

        match strategy.delivery_mode() {
            DeliveryMode::Direct => {
                let income = extract_monthly_income(&payload);
                self.store
                    .store_banking_data(application_id, country, &payload, income.as_ref())
                    .await?;
                tracing::info!(
                    "Stored simulated banking data for application {}/{}",
                    application_id,
                    country
                );
                strategy
                    .on_banking_data_received(application_id, &self.runner)
                    .await?;
            }
            DeliveryMode::OutOfBand => {
                post_banking_data(&self.http, &self.webhook_base_url, &payload).await?;
                tracing::info!(
                    "Posted simulated banking data for application {}/{} to webhook",
                    application_id,
                    country
                );
            }
        }
        Ok(())
    }
}

/// Sends the payload through the public webhook endpoint, exercising the
/// same path a real provider would.
pub async fn post_banking_data(
    client: &reqwest::Client,
    base_url: &str,
    payload: &Value,
) -> Result<(), AppError> {
    let url = format!(
        "{}/api/v1/webhooks/banking_data",
        base_url.trim_end_matches('/')
    );
    let response = client.post(&url).json(payload).send().await?;
    if !response.status().is_success() {
        return Err(AppError::ExternalApiError(format!(
            "Webhook delivery to {} failed with status {}",
            url,
            response.status()
        )));
    }
    Ok(())
}

/// Builds a full simulated provider payload for the application. Pure apart
/// from randomness; delivery is a separate concern.
pub fn generate_banking_data(app: &CreditApplication, country: Country) -> Value {
    let mut rng = rand::thread_rng();

    let mut parts = app.full_name.split_whitespace();
    let name = parts.next().unwrap_or("").to_string();
    let lastname = parts.collect::<Vec<_>>().join(" ");

    let income = round2(rng.gen_range(2000.0..=5000.0));
    let average_expense = round2(income * 0.6);
    let savings_rate = round2(rng.gen_range(0.2..=0.5));

    let year = chrono::Utc::now().year();
    let loan_count = rng.gen_range(0..=2);
    let loans: Vec<Value> = (0..loan_count)
        .map(|_| {
            let amount = round2(rng.gen_range(1000.0..=20000.0));
            let remaining = round2(amount * rng.gen_range(0.1..=0.9));
            json!({
                "id": format!("LO-{}-{:04}", year, rng.gen_range(0..10000)),
                "type": LOAN_TYPES.choose(&mut rng).copied().unwrap_or("personal"),
                "amount": amount,
                "remaining_balance": remaining,
                "monthly_payment": round2(remaining / 12.0),
                "status": "active",
            })
        })
        .collect();

    let email = format!(
        "{}.{}@example.com",
        name.to_lowercase(),
        lastname.to_lowercase().replace(' ', ".")
    );

    json!({
        "reference_id": app.id,
        // Provider payloads carry the country name; analytic codes stay a
        // reporting concern.
        "country": country.as_str(),
        "date": chrono::Utc::now().to_rfc3339(),
        "name": name,
        "lastname": lastname,
        "customer_id": format!("CUS-{:06}", rng.gen_range(0..1_000_000)),
        "monthly_data": {
            "income": income,
            "average_expense": average_expense,
            "savings_rate": savings_rate,
        },
        "active_loans": loans,
        "account_status": ACCOUNT_STATUSES.choose(&mut rng).copied().unwrap_or("verified"),
        "contact": {
            "email": email,
            "phone": generate_phone(country, &mut rng),
        },
    })
}

fn generate_phone(country: Country, rng: &mut impl Rng) -> String {
    match country {
        Country::Mexico => {
            let digits: String = (0..10).map(|_| rng.gen_range(0..10).to_string()).collect();
            format!("+52 {}", digits)
        }
        Country::Portugal => {
            let digits: String = (0..8).map(|_| rng.gen_range(0..10).to_string()).collect();
            format!("+351 9{}", digits)
        }
    }
}

/// Pulls monthly_data.income out of a provider payload, preserving decimal
/// precision by going through the number's textual form.
pub fn extract_monthly_income(payload: &Value) -> Option<BigDecimal> {
    payload
        .get("monthly_data")
        .and_then(|m| m.get("income"))
        .and_then(|v| match v {
            Value::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
            Value::String(s) => BigDecimal::from_str(s).ok(),
            _ => None,
        })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
