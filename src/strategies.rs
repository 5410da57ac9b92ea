use crate::errors::AppError;
use crate::models::{Country, CreditApplication, ProcessResult};
use crate::queue::{JobKind, JobQueue};
use crate::rules::{RuleName, RuleParams};
use crate::validation::ValidationRunner;
use bigdecimal::BigDecimal;
use std::str::FromStr;

/// How simulated banking data reaches an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// The simulator writes banking data straight into storage.
    Direct,
    /// The simulator POSTs the payload to the public webhook endpoint,
    /// exercising the full inbound path.
    OutOfBand,
}

/// Country-specific workflow strategy. One variant per supported country;
/// dispatch is a match, so a missing arm for a new country fails at compile
/// time rather than at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountryStrategy {
    Mexico,
    Portugal,
}

impl CountryStrategy {
    pub fn for_country(country: Country) -> CountryStrategy {
        match country {
            Country::Mexico => CountryStrategy::Mexico,
            Country::Portugal => CountryStrategy::Portugal,
        }
    }

    pub fn country(&self) -> Country {
        match self {
            CountryStrategy::Mexico => Country::Mexico,
            CountryStrategy::Portugal => Country::Portugal,
        }
    }

    /// The full rule set this country evaluates on a full validation run.
    pub fn rule_set(&self) -> &'static [RuleName] {
        match self {
            CountryStrategy::Mexico => &[
                RuleName::IdentityDocumentFormat,
                RuleName::IdentityDocumentFullname,
                RuleName::RequestedAmountVsMonthlyIncome,
            ],
            CountryStrategy::Portugal => &[
                RuleName::IdentityDocumentFormat,
                RuleName::RequestedAmountVsMonthlyIncome,
            ],
        }
    }

    /// Country constants fed into rule evaluation.
    pub fn rule_params(&self) -> RuleParams {
        let income_ratio = match BigDecimal::from_str("0.3") {
            Ok(ratio) => ratio,
            // "0.3" is a literal; parsing it cannot fail.
            Err(_) => BigDecimal::from(0),
        };
        match self {
            CountryStrategy::Mexico => RuleParams {
                document_marker: "CURP",
                income_ratio,
            },
            CountryStrategy::Portugal => RuleParams {
                document_marker: "NIF",
                income_ratio,
            },
        }
    }

    pub fn delivery_mode(&self) -> DeliveryMode {
        match self {
            CountryStrategy::Mexico => DeliveryMode::OutOfBand,
            CountryStrategy::Portugal => DeliveryMode::Direct,
        }
    }

    /// Kicks off the country's intake pipeline for a freshly created
    /// application. The only side effect is scheduling background jobs;
    /// nothing here touches the application row.
    pub async fn process(
        &self,
        app: &CreditApplication,
        queue: &JobQueue,
    ) -> Result<ProcessResult, AppError> {
        let country = self.country();
        match self {
            CountryStrategy::Mexico => {
                queue
                    .enqueue(JobKind::ValidationRun, app.id, country, None)
                    .await?;
                queue
                    .enqueue(JobKind::BankingSimulation, app.id, country, None)
                    .await?;
            }
            CountryStrategy::Portugal => {
                queue
                    .enqueue(
                        JobKind::ValidationRun,
                        app.id,
                        country,
                        Some(vec![RuleName::IdentityDocumentFormat.as_str().to_string()]),
                    )
                    .await?;
                queue
                    .enqueue(JobKind::BankingSimulation, app.id, country, None)
                    .await?;
            }
        }
        tracing::info!(
            "Scheduled {} intake pipeline for application {}",
            country,
            app.id
        );
        Ok(ProcessResult {
            success: true,
            country: country.as_str().to_string(),
            message: format!("Credit application queued for {} processing", country),
        })
    }

    /// Follow-up validation once banking data has been persisted for an
    /// application. The two trigger points are intentionally asymmetric:
    /// Mexico is fed by the webhook, Portugal by the simulator's direct
    /// write, and each reacts with a different run.
    pub async fn on_banking_data_received(
        &self,
        application_id: i64,
        runner: &ValidationRunner,
    ) -> Result<(), AppError> {
        let country = self.country();
        match self {
            // Re-run the full rule set now that income and identity data
            // are available; the outcome drives the application status.
            CountryStrategy::Mexico => {
                runner.run(application_id, country, None).await?;
            }
            // Only the income rule depends on banking data here, and a
            // partial run never drives status.
            CountryStrategy::Portugal => {
                let rules = [RuleName::RequestedAmountVsMonthlyIncome.as_str().to_string()];
                runner.run(application_id, country, Some(&rules[..])).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategies_resolve_from_country() {
        assert_eq!(
            CountryStrategy::for_country(Country::Mexico),
            CountryStrategy::Mexico
        );
        assert_eq!(
            CountryStrategy::for_country(Country::Portugal),
            CountryStrategy::Portugal
        );
    }

    #[test]
    fn mexico_runs_the_full_rule_set() {
        let rules = CountryStrategy::Mexico.rule_set();
        assert_eq!(
            rules,
            &[
                RuleName::IdentityDocumentFormat,
                RuleName::IdentityDocumentFullname,
                RuleName::RequestedAmountVsMonthlyIncome,
            ]
        );
    }

    #[test]
    fn portugal_skips_the_fullname_rule() {
        let rules = CountryStrategy::Portugal.rule_set();
        assert!(!rules.contains(&RuleName::IdentityDocumentFullname));
        assert_eq!(rules.len(), 2);
    }

    #[test]
    fn delivery_modes_differ_by_country() {
        assert_eq!(
            CountryStrategy::Mexico.delivery_mode(),
            DeliveryMode::OutOfBand
        );
        assert_eq!(
            CountryStrategy::Portugal.delivery_mode(),
            DeliveryMode::Direct
        );
    }

    #[test]
    fn markers_differ_by_country() {
        assert_eq!(CountryStrategy::Mexico.rule_params().document_marker, "CURP");
        assert_eq!(
            CountryStrategy::Portugal.rule_params().document_marker,
            "NIF"
        );
    }
}
