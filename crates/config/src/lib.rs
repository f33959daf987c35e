use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub max_connections: usize,
    pub tls_enabled: bool,
    pub tls_accept_invalid_certs: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("DATABASE_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("DATABASE_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(5432),
            database: std::env::var("DATABASE_NAME").unwrap_or_else(|_| "storytime".to_string()),
            username: std::env::var("DATABASE_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: std::env::var("DATABASE_PASSWORD").unwrap_or_else(|_| "postgres".to_string()),
            max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(10),
            tls_enabled: std::env::var("DATABASE_TLS_ENABLED")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            tls_accept_invalid_certs: std::env::var("DATABASE_TLS_ACCEPT_INVALID_CERTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("SERVER_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
        }
    }
}

/// Billing provider webhook settings. The webhook secret is shared with the
/// provider; events with a bad or stale signature are rejected before any
/// processing.
#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    pub webhook_secret: String,
    /// Maximum allowed age of a signed webhook, in seconds.
    pub signature_tolerance_secs: i64,
    /// Janitor floor: processed-event retention may never be shorter than
    /// the provider's maximum redelivery window.
    pub min_retention_days: i64,
    /// Shared secret for internal (janitor) routes.
    pub internal_token: String,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            webhook_secret: std::env::var("BILLING_WEBHOOK_SECRET").unwrap_or_default(),
            signature_tolerance_secs: std::env::var("BILLING_SIGNATURE_TOLERANCE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
            min_retention_days: std::env::var("BILLING_MIN_RETENTION_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            internal_token: std::env::var("INTERNAL_API_TOKEN").unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorConfig {
    pub api_key: String,
    pub base_url: String,
    pub text_model: String,
    pub image_model: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            api_key: std::env::var("GENERATOR_API_KEY").unwrap_or_default(),
            base_url: std::env::var("GENERATOR_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            text_model: std::env::var("GENERATOR_TEXT_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            image_model: std::env::var("GENERATOR_IMAGE_MODEL")
                .unwrap_or_else(|_| "dall-e-3".to_string()),
        }
    }
}

/// Plan catalog and ledger policy knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct PlansConfig {
    pub free_quota: u32,
    pub pro_quota: u32,
    pub premium_quota: u32,
    /// Whether purchased add-on credits survive a period rollover.
    pub add_on_carryover: bool,
    /// Consumption priority: "base_first" (default) or "add_on_first".
    pub consumption_order: String,
    /// Free accounts have no provider billing period; they cycle on a fixed
    /// window measured from the last reset.
    pub free_cycle_days: i64,
}

impl Default for PlansConfig {
    fn default() -> Self {
        Self {
            free_quota: std::env::var("PLAN_FREE_QUOTA")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
            pro_quota: std::env::var("PLAN_PRO_QUOTA")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            premium_quota: std::env::var("PLAN_PREMIUM_QUOTA")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            add_on_carryover: std::env::var("PLAN_ADD_ON_CARRYOVER")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),
            consumption_order: std::env::var("PLAN_CONSUMPTION_ORDER")
                .unwrap_or_else(|_| "base_first".to_string()),
            free_cycle_days: std::env::var("PLAN_FREE_CYCLE_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub billing: BillingConfig,
    pub generator: GeneratorConfig,
    pub plans: PlansConfig,
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plans_config_shape() {
        let plans = PlansConfig {
            free_quota: 1,
            pro_quota: 10,
            premium_quota: 30,
            add_on_carryover: true,
            consumption_order: "base_first".to_string(),
            free_cycle_days: 30,
        };
        assert_eq!(plans.free_quota, 1);
        assert!(plans.add_on_carryover);
    }

    #[test]
    fn test_billing_config_shape() {
        let billing = BillingConfig {
            webhook_secret: String::new(),
            signature_tolerance_secs: 300,
            min_retention_days: 30,
            internal_token: String::new(),
        };
        assert_eq!(billing.signature_tolerance_secs, 300);
        assert_eq!(billing.min_retention_days, 30);
    }
}
