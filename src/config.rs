use {
    crate::domain::{
        approval::PolicyConfig, error::PipelineError, money::MoneyAmount,
        pricing::MembershipRates, transaction::Environment,
    },
    std::{env, time::Duration},
};

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub policy: PolicyConfig,
    pub rates: MembershipRates,
    /// `None` runs the service on in-memory stores.
    pub database_url: Option<String>,
    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub content_store_url: Option<String>,
    pub content_store_token: Option<String>,
    pub membership_api_url: Option<String>,
    pub directory_sync_url: Option<String>,
    pub notification_url: Option<String>,
    /// Bearer for internal service-to-service calls.
    pub service_token: Option<String>,
    pub allowed_redirect_hosts: Vec<String>,
    pub orphan_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, PipelineError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PipelineError> {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let environment = match var("APP_ENV").as_deref() {
            Some("production") => Environment::Production,
            _ => Environment::Development,
        };
        let manual_approval = var("MANUAL_APPROVAL")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);

        let price = |key: &str, default: MoneyAmount| -> Result<MoneyAmount, PipelineError> {
            match var(key) {
                Some(raw) => MoneyAmount::parse_decimal(&raw)
                    .map_err(|e| PipelineError::Validation(format!("{key}: {e}"))),
                None => Ok(default),
            }
        };
        let defaults = MembershipRates::default();
        let rates = MembershipRates {
            committee: price("COMMITTEE_PRICE", defaults.committee)?,
            standard: price("STANDARD_PRICE", defaults.standard)?,
        };

        let port = match var("PORT") {
            Some(raw) => raw
                .parse()
                .map_err(|_| PipelineError::Validation(format!("PORT: invalid port {raw:?}")))?,
            None => 3000,
        };

        let orphan_timeout_secs = var("ORPHAN_TIMEOUT_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(3600);

        Ok(Self {
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            policy: PolicyConfig {
                environment,
                manual_approval,
            },
            rates,
            database_url: var("DATABASE_URL"),
            stripe_secret_key: var("STRIPE_SECRET_KEY"),
            stripe_webhook_secret: var("STRIPE_WEBHOOK_SECRET"),
            content_store_url: var("CONTENT_STORE_URL"),
            content_store_token: var("CONTENT_STORE_TOKEN"),
            membership_api_url: var("MEMBERSHIP_API_URL"),
            directory_sync_url: var("DIRECTORY_SYNC_URL"),
            notification_url: var("NOTIFICATION_URL"),
            service_token: var("SERVICE_TOKEN"),
            allowed_redirect_hosts: var("ALLOWED_REDIRECT_HOSTS")
                .map(|raw| {
                    raw.split(',')
                        .map(|h| h.trim().to_ascii_lowercase())
                        .filter(|h| !h.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            orphan_timeout: Duration::from_secs(orphan_timeout_secs),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
