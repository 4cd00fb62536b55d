use bigdecimal::BigDecimal;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::str::FromStr;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub gateway_base_url: String,
    pub gateway_webhook_secret: String,
    pub meeting_base_url: String,
    pub notify_base_url: String,
    pub cors_allowed_origins: Option<String>,
    pub policy: BookingPolicy,
}

/// Booking and lifecycle knobs. Defaults match the production deployment;
/// every field can be overridden from the environment.
#[derive(Debug, Deserialize, Clone)]
pub struct BookingPolicy {
    pub min_booking_hours: i64,
    pub max_booking_days: i64,
    pub min_duration_minutes: u32,
    pub max_duration_minutes: u32,
    pub cancellation_deadline_hours: i64,
    pub bank_transfer_deadline_hours: i64,
    pub expire_grace_hours: i64,
    pub auto_complete_hours: i64,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            min_booking_hours: 2,
            max_booking_days: 30,
            min_duration_minutes: 30,
            max_duration_minutes: 180,
            cancellation_deadline_hours: 12,
            bank_transfer_deadline_hours: 24,
            expire_grace_hours: 1,
            auto_complete_hours: 12,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        dotenv().ok();

        let server_port = env::var("SERVER_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let gateway_base_url = env::var("GATEWAY_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:9200".to_string());

        let gateway_webhook_secret =
            env::var("GATEWAY_WEBHOOK_SECRET").unwrap_or_else(|_| "dev-webhook-secret".to_string());

        let meeting_base_url = env::var("MEETING_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:9201".to_string());

        let notify_base_url = env::var("NOTIFY_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:9202".to_string());

        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS").ok();

        Ok(Config {
            server_port,
            database_url,
            gateway_base_url,
            gateway_webhook_secret,
            meeting_base_url,
            notify_base_url,
            cors_allowed_origins,
            policy: BookingPolicy::from_env(),
        })
    }
}

impl BookingPolicy {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            min_booking_hours: env_i64("MIN_BOOKING_HOURS", defaults.min_booking_hours),
            max_booking_days: env_i64("MAX_BOOKING_DAYS", defaults.max_booking_days),
            min_duration_minutes: defaults.min_duration_minutes,
            max_duration_minutes: defaults.max_duration_minutes,
            cancellation_deadline_hours: env_i64(
                "CANCELLATION_DEADLINE_HOURS",
                defaults.cancellation_deadline_hours,
            ),
            bank_transfer_deadline_hours: env_i64(
                "BANK_TRANSFER_DEADLINE_HOURS",
                defaults.bank_transfer_deadline_hours,
            ),
            expire_grace_hours: env_i64("EXPIRE_GRACE_HOURS", defaults.expire_grace_hours),
            auto_complete_hours: env_i64("AUTO_COMPLETE_HOURS", defaults.auto_complete_hours),
        }
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Parses a decimal amount from the environment, falling back on defaults.
/// Amounts are never floats anywhere in this service.
pub fn parse_decimal(value: &str) -> anyhow::Result<BigDecimal> {
    BigDecimal::from_str(value).map_err(|e| anyhow::anyhow!("invalid decimal {value:?}: {e}"))
}
