use crate::errors::AppError;
use crate::models::Country;
use crate::queue::{Job, JobKind, JobQueue};
use crate::simulator::BankingSimulator;
use crate::validation::ValidationRunner;
use std::time::Duration;

/// Background worker: polls the job queue and executes claimed jobs.
///
/// Multiple workers can run against the same queue; the claim query keeps
/// them from double-processing. Delivery is at-least-once, so both job
/// handlers are idempotent.
pub struct Worker {
    queue: JobQueue,
    runner: ValidationRunner,
    simulator: BankingSimulator,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        queue: JobQueue,
        runner: ValidationRunner,
        simulator: BankingSimulator,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            runner,
            simulator,
            poll_interval,
        }
    }

    /// Runs forever. Queue-level errors (claim or bookkeeping failures) are
    /// logged and absorbed with a poll-interval pause so a flaky database
    /// cannot spin the loop.
    pub async fn run(self) {
        tracing::info!(
            "Worker started, polling every {}ms",
            self.poll_interval.as_millis()
        );
        loop {
            match self.queue.claim_next().await {
                Ok(Some(job)) => {
                    self.execute(job).await;
                }
                Ok(None) => {
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(e) => {
                    tracing::error!("Failed to claim next job: {}", e);
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    async fn execute(&self, job: Job) {
        let result = match Country::parse(&job.country) {
            Ok(country) => match job.kind {
                JobKind::ValidationRun => self
                    .runner
                    .run(job.application_id, country, job.rule_names.as_deref())
                    .await
                    .map(|_| ()),
                JobKind::BankingSimulation => {
                    self.simulator.run(job.application_id, country).await
                }
            },
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                if let Err(e) = self.queue.complete(job.id).await {
                    tracing::error!("Failed to mark job {} completed: {}", job.id, e);
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Job {} ({}) for application {}/{} failed: {}",
                    job.id,
                    job.kind.as_str(),
                    job.application_id,
                    job.country,
                    e
                );
                // Configuration faults are fatal; retrying cannot fix them.
                let record = if is_fatal(&e) {
                    self.queue.fail_permanent(&job, &e.to_string()).await
                } else {
                    self.queue.fail(&job, &e.to_string()).await
                };
                if let Err(e) = record {
                    tracing::error!("Failed to record failure for job {}: {}", job.id, e);
                }
            }
        }
    }
}

/// Whether an error can never be fixed by re-running the job.
pub fn is_fatal(error: &AppError) -> bool {
    matches!(error, AppError::Configuration(_))
}
