use serde::Deserialize;

/// Runtime configuration, loaded once at startup from the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Base URL the banking-data simulator posts its webhook callback to.
    /// Defaults to this same service so the loop closes locally.
    pub webhook_base_url: String,
    /// Token gating admin-only operations (application deletion). When not
    /// configured the gate is skipped, which is only acceptable in dev.
    pub admin_token: Option<String>,
    /// Polling interval for the background job worker, in milliseconds.
    pub worker_poll_interval_ms: u64,
    /// Maximum delivery attempts for a queued job before it is parked as failed.
    pub job_max_attempts: i32,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?;

        let config = Self {
            database_url: std::env::var("DB_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DB_URL or DATABASE_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DB_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port,
            webhook_base_url: std::env::var("WEBHOOK_BASE_URL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(|url| {
                    if !url.starts_with("http://") && !url.starts_with("https://") {
                        anyhow::bail!("WEBHOOK_BASE_URL must start with http:// or https://");
                    }
                    Ok(url.trim_end_matches('/').to_string())
                })
                .transpose()?
                .unwrap_or_else(|| format!("http://localhost:{}", port)),
            admin_token: std::env::var("ADMIN_TOKEN")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            worker_poll_interval_ms: std::env::var("WORKER_POLL_INTERVAL_MS")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("WORKER_POLL_INTERVAL_MS must be a number"))?,
            job_max_attempts: std::env::var("JOB_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("JOB_MAX_ATTEMPTS must be a number"))?,
        };

        if config.admin_token.is_none() {
            tracing::warn!("ADMIN_TOKEN not configured; admin gate is disabled");
        }

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::debug!("Webhook base URL: {}", config.webhook_base_url);
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}
