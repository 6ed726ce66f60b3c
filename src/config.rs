use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::Path;
use tracing::info;
use validator::Validate;

const CONFIG_DIR: &str = "config";
const DEFAULT_ENV: &str = "development";
const DEFAULT_LOG_LEVEL: &str = "info";

/// Application configuration, loaded from `config/` files layered with
/// `APP__`-prefixed environment variables.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment (development / production / test)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB connect timeout (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    /// Frontend base URL used to build post-payment redirect URLs
    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,

    /// ISO currency code used on orders
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Pricing: flat tax rate (percent) applied when no variant-level rate exists
    #[serde(default = "default_flat_tax_rate")]
    pub flat_tax_rate: Decimal,

    /// Pricing: flat shipping fee below the free-shipping threshold
    #[serde(default = "default_shipping_flat_fee")]
    pub shipping_flat_fee: Decimal,

    /// Pricing: orders at or above this subtotal ship free
    #[serde(default = "default_free_shipping_threshold")]
    pub free_shipping_threshold: Decimal,

    /// Buyer state code that selects the split (intra-state) tax breakdown
    #[serde(default = "default_home_state")]
    pub home_state: String,

    /// Carrier platform settings
    pub carrier: CarrierConfig,
}

/// Credentials and endpoints for the external carrier platform.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CarrierConfig {
    /// Base URL of the carrier REST API
    pub base_url: String,

    /// Checkout-session endpoint URL
    pub checkout_url: String,

    /// API key header value for checkout-session calls
    pub api_key: String,

    /// Shared secret for HMAC request signing
    #[validate(length(min = 16))]
    pub api_secret: String,

    /// Account credentials for bearer-token login
    pub email: String,
    pub password: String,

    /// Outbound request timeout (seconds)
    #[serde(default = "default_carrier_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_frontend_url() -> String {
    "http://localhost:3000".to_string()
}
fn default_currency() -> String {
    "INR".to_string()
}
fn default_flat_tax_rate() -> Decimal {
    Decimal::from(18)
}
fn default_shipping_flat_fee() -> Decimal {
    Decimal::from(50)
}
fn default_free_shipping_threshold() -> Decimal {
    Decimal::from(1000)
}
fn default_home_state() -> String {
    "MH".to_string()
}
fn default_carrier_timeout_secs() -> u64 {
    8
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

/// Loads configuration from `config/` files and `APP__`-prefixed
/// environment variables (double underscore as separator, so
/// `APP__CARRIER__API_KEY` maps to `carrier.api_key`).
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("carrier.base_url", "https://api.carrier.example/v1")?
        .set_default(
            "carrier.checkout_url",
            "https://checkout.carrier.example/api/v1/access-token/checkout",
        )?
        .set_default("carrier.api_key", "")?
        .set_default("carrier.api_secret", "")?
        .set_default("carrier.email", "")?
        .set_default("carrier.password", "")?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    config.try_deserialize()
}

/// Initializes the global tracing subscriber.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::try_new(filter_directive).unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init()
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_config() -> AppConfig {
        AppConfig {
            database_url: "sqlite::memory:".into(),
            host: default_host(),
            port: default_port(),
            environment: "test".into(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: true,
            db_max_connections: 1,
            db_min_connections: 1,
            db_connect_timeout_secs: 5,
            frontend_url: default_frontend_url(),
            currency: default_currency(),
            flat_tax_rate: default_flat_tax_rate(),
            shipping_flat_fee: default_shipping_flat_fee(),
            free_shipping_threshold: default_free_shipping_threshold(),
            home_state: default_home_state(),
            carrier: CarrierConfig {
                base_url: "http://localhost:9999".into(),
                checkout_url: "http://localhost:9999/checkout".into(),
                api_key: "test-key".into(),
                api_secret: "test-secret-test-secret".into(),
                email: "test@example.com".into(),
                password: "password".into(),
                timeout_secs: 2,
            },
        }
    }

    #[test]
    fn pricing_defaults() {
        let cfg = test_config();
        assert_eq!(cfg.flat_tax_rate, dec!(18));
        assert_eq!(cfg.shipping_flat_fee, dec!(50));
        assert_eq!(cfg.free_shipping_threshold, dec!(1000));
        assert_eq!(cfg.currency, "INR");
    }

    #[test]
    fn environment_detection() {
        let mut cfg = test_config();
        assert!(!cfg.is_production());
        cfg.environment = "Production".into();
        assert!(cfg.is_production());
    }
}
