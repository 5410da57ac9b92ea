use crate::counts::CountCache;
use crate::errors::AppError;
use crate::models::{Country, Status, ValidationEntry};
use crate::notifier::{status_notification, Notifier};
use crate::rules::{satisfied_by, RuleName};
use crate::store::ApplicationStore;
use crate::strategies::CountryStrategy;
use std::sync::Arc;

/// Executes validation runs against an application.
///
/// A run evaluates each requested rule against the freshest persisted state
/// and upserts its outcome into validation_result. Full runs (no explicit
/// rule subset) additionally derive the application status from the
/// aggregate outcome; partial runs only record results.
#[derive(Clone)]
pub struct ValidationRunner {
    store: ApplicationStore,
    notifier: Arc<dyn Notifier>,
    counts: CountCache,
}

impl ValidationRunner {
    pub fn new(store: ApplicationStore, notifier: Arc<dyn Notifier>, counts: CountCache) -> Self {
        Self {
            store,
            notifier,
            counts,
        }
    }

    /// Runs the rules for one application. `rule_names` of None means the
    /// country's full rule set; a subset names specific rules, where an
    /// unknown name is skipped with a warning rather than failing the run.
    pub async fn run(
        &self,
        application_id: i64,
        country: Country,
        rule_names: Option<&[String]>,
    ) -> Result<Vec<ValidationEntry>, AppError> {
        let strategy = CountryStrategy::for_country(country);
        let params = strategy.rule_params();

        let rules: Vec<RuleName> = match rule_names {
            None => strategy.rule_set().to_vec(),
            Some(names) => names
                .iter()
                .filter_map(|name| {
                    let rule = RuleName::parse(name);
                    if rule.is_none() {
                        tracing::warn!(
                            "Skipping unknown rule '{}' for application {}/{}",
                            name,
                            application_id,
                            country
                        );
                    }
                    rule
                })
                .collect(),
        };

        let mut entries = self.store.fetch(application_id, country).await?.validation_result.0;

        for rule in &rules {
            // Reload before each rule so a rule sees data (banking payload,
            // income) that landed while the run was in progress.
            let app = self.store.fetch(application_id, country).await?;
            let result = satisfied_by(*rule, &app, &params);
            tracing::debug!(
                "Rule {} for application {}/{}: {}",
                rule,
                application_id,
                country,
                result
            );
            entries = self
                .store
                .upsert_validation_entry(application_id, country, rule.as_str(), result)
                .await?;
        }

        if rule_names.is_none() {
            self.settle_status(application_id, country, strategy, &entries)
                .await?;
        }

        Ok(entries)
    }

    /// Derives country_validated / country_invalidated from the aggregate
    /// rule outcomes after a full run, and broadcasts the change to the
    /// owner. A rewrite to the same status broadcasts nothing.
    async fn settle_status(
        &self,
        application_id: i64,
        country: Country,
        strategy: CountryStrategy,
        entries: &[ValidationEntry],
    ) -> Result<(), AppError> {
        let all_passed = strategy.rule_set().iter().all(|rule| {
            entries
                .iter()
                .any(|e| e.name == rule.as_str() && e.result)
        });
        let status = if all_passed {
            Status::CountryValidated
        } else {
            Status::CountryInvalidated
        };

        if let Some(change) = self
            .store
            .update_status(application_id, country, status)
            .await?
        {
            tracing::info!(
                "Application {}/{} moved {} -> {}",
                application_id,
                country,
                change.old_status,
                change.new_status
            );
            self.notifier.notify(
                change.user_id,
                status_notification(application_id, &change.new_status),
            );
            self.counts
                .invalidate(
                    country.as_str(),
                    &[change.old_status.as_str(), change.new_status.as_str()],
                )
                .await;
        }
        Ok(())
    }
}
