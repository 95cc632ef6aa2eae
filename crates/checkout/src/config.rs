//! Checkout configuration loaded from environment variables.

/// Process-start configuration; no runtime mutation.
///
/// Reads from environment variables:
/// - `DATABASE_URL` — Postgres connection string
///   (default: `"postgres://localhost/commerce"`)
/// - `HOLD_TTL_SECS` — how long an unpaid hold lives (default: `900`)
/// - `SWEEP_INTERVAL_SECS` — sweeper cadence (default: `30`)
/// - `ORPHAN_GRACE_SECS` — extra grace before reclaiming a hold with no
///   persisted order (default: `60`)
/// - `WEBHOOK_SECRET` — HMAC key shared with the payment provider
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    pub database_url: String,
    pub hold_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub orphan_grace_secs: u64,
    pub webhook_secret: String,
}

impl CheckoutConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/commerce".to_string()),
            hold_ttl_secs: env_u64("HOLD_TTL_SECS", 900),
            sweep_interval_secs: env_u64("SWEEP_INTERVAL_SECS", 30),
            orphan_grace_secs: env_u64("ORPHAN_GRACE_SECS", 60),
            webhook_secret: std::env::var("WEBHOOK_SECRET").unwrap_or_default(),
        }
    }

    /// Hold time-to-live as a chrono duration.
    pub fn hold_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.hold_ttl_secs as i64)
    }

    /// Sweeper cadence as a std duration.
    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }

    /// Orphaned-hold grace period as a chrono duration.
    pub fn orphan_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.orphan_grace_secs as i64)
    }
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/commerce".to_string(),
            hold_ttl_secs: 900,
            sweep_interval_secs: 30,
            orphan_grace_secs: 60,
            webhook_secret: String::new(),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
