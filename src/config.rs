/// Limit applied by the sliding-window rate limiter to one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub max_requests: u32,
    pub window_secs: u64,
}

/// Per-endpoint rate limits.
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    /// `POST /leads`, keyed by client IP.
    pub lead_api: RateLimitRule,
    /// `POST /leads/bulk`, keyed by user id.
    pub bulk_import: RateLimitRule,
    /// `POST /messages/send`, keyed by user id.
    pub message_send: RateLimitRule,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            lead_api: RateLimitRule {
                max_requests: 60,
                window_secs: 60,
            },
            bulk_import: RateLimitRule {
                max_requests: 10,
                window_secs: 60,
            },
            message_send: RateLimitRule {
                max_requests: 30,
                window_secs: 60,
            },
        }
    }
}

/// Settings for the background dispatch poller.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub poll_interval_secs: u64,
    pub batch_size: i64,
    pub concurrency: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            batch_size: 50,
            concurrency: 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub gateway_base_url: String,
    pub gateway_api_key: String,
    pub gateway_instance: String,
    pub jwt_secret: String,
    pub webhook_secret: Option<String>,
    pub rate_limits: RateLimitSettings,
    pub dispatch: DispatchSettings,
    pub request_timeout_secs: u64,
    pub auth_cache_ttl_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = RateLimitSettings::default();
        let dispatch_defaults = DispatchSettings::default();

        let config = Self {
            database_url: std::env::var("DATABASE_URL")
                .or_else(|_| std::env::var("DB_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DATABASE_URL or DB_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DATABASE_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            gateway_base_url: std::env::var("GATEWAY_BASE_URL")
                .map_err(|_| anyhow::anyhow!("GATEWAY_BASE_URL environment variable required"))
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("GATEWAY_BASE_URL cannot be empty");
                    }
                    if !url.starts_with("http://") && !url.starts_with("https://") {
                        anyhow::bail!("GATEWAY_BASE_URL must start with http:// or https://");
                    }
                    Ok(url.trim_end_matches('/').to_string())
                })?,
            gateway_api_key: required_non_empty("GATEWAY_API_KEY")?,
            gateway_instance: required_non_empty("GATEWAY_INSTANCE")?,
            jwt_secret: required_non_empty("JWT_SECRET")?,
            webhook_secret: std::env::var("WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            rate_limits: RateLimitSettings {
                lead_api: RateLimitRule {
                    max_requests: parse_or("LEAD_API_RATE_LIMIT", defaults.lead_api.max_requests)?,
                    window_secs: parse_or(
                        "LEAD_API_RATE_WINDOW_SECS",
                        defaults.lead_api.window_secs,
                    )?,
                },
                bulk_import: RateLimitRule {
                    max_requests: parse_or("BULK_RATE_LIMIT", defaults.bulk_import.max_requests)?,
                    window_secs: parse_or(
                        "BULK_RATE_WINDOW_SECS",
                        defaults.bulk_import.window_secs,
                    )?,
                },
                message_send: RateLimitRule {
                    max_requests: parse_or("SEND_RATE_LIMIT", defaults.message_send.max_requests)?,
                    window_secs: parse_or(
                        "SEND_RATE_WINDOW_SECS",
                        defaults.message_send.window_secs,
                    )?,
                },
            },
            dispatch: DispatchSettings {
                poll_interval_secs: parse_or(
                    "DISPATCH_POLL_INTERVAL_SECS",
                    dispatch_defaults.poll_interval_secs,
                )?,
                batch_size: parse_or("DISPATCH_BATCH_SIZE", dispatch_defaults.batch_size)?,
                concurrency: parse_or("DISPATCH_CONCURRENCY", dispatch_defaults.concurrency)?,
            },
            request_timeout_secs: parse_or("REQUEST_TIMEOUT_SECS", 30)?,
            auth_cache_ttl_secs: parse_or("AUTH_CACHE_TTL_SECS", 300)?,
        };

        if config.dispatch.concurrency == 0 {
            anyhow::bail!("DISPATCH_CONCURRENCY must be at least 1");
        }
        if config.dispatch.batch_size <= 0 {
            anyhow::bail!("DISPATCH_BATCH_SIZE must be positive");
        }

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::debug!(
            "Gateway: {} (instance {})",
            config.gateway_base_url,
            config.gateway_instance
        );
        if config.webhook_secret.is_none() {
            tracing::warn!("WEBHOOK_SECRET not set: inbound webhooks are accepted unauthenticated");
        }
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}

fn required_non_empty(name: &str) -> anyhow::Result<String> {
    let value = std::env::var(name)
        .map_err(|_| anyhow::anyhow!("{} environment variable required", name))?;
    if value.trim().is_empty() {
        anyhow::bail!("{} cannot be empty", name);
    }
    Ok(value)
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a valid number", name)),
        _ => Ok(default),
    }
}
