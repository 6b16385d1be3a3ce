use std::env;
use std::time::Duration;

/// One year.
const MAX_INVITE_TTL_HOURS: i64 = 24 * 365;

fn parse_invite_ttl_hours(raw: Option<String>) -> anyhow::Result<i64> {
    let hours: i64 = raw.as_deref().unwrap_or("168").trim().parse()?; // 7 days
    if !(1..=MAX_INVITE_TTL_HOURS).contains(&hours) {
        anyhow::bail!(
            "INVITE_TTL_HOURS must be between 1 and {}, got {}",
            MAX_INVITE_TTL_HOURS,
            hours
        );
    }
    Ok(hours)
}

#[derive(Debug, Clone)]
pub struct Config {
    /// When unset the server runs on the in-memory store.
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub port: u16,
    pub invite_ttl_hours: i64,
    pub invite_base_url: Option<String>,
    pub presence_timeout_secs: u64,
    pub presence_sweep_interval_secs: u64,
    pub channel_buffer_size: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            jwt_secret: env::var("JWT_SECRET")
                .map_err(|_| anyhow::anyhow!("JWT_SECRET must be set"))?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            invite_ttl_hours: parse_invite_ttl_hours(env::var("INVITE_TTL_HOURS").ok())?,
            invite_base_url: env::var("INVITE_BASE_URL").ok(),
            presence_timeout_secs: env::var("PRESENCE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
            presence_sweep_interval_secs: env::var("PRESENCE_SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            channel_buffer_size: env::var("CHANNEL_BUFFER_SIZE")
                .unwrap_or_else(|_| "256".to_string())
                .parse()?,
        })
    }

    pub fn presence_timeout(&self) -> Duration {
        Duration::from_secs(self.presence_timeout_secs)
    }

    pub fn presence_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.presence_sweep_interval_secs.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            jwt_secret: "dev-secret".to_string(),
            port: 3000,
            invite_ttl_hours: 168,
            invite_base_url: None,
            presence_timeout_secs: 30,
            presence_sweep_interval_secs: 5,
            channel_buffer_size: 256,
        }
    }
}
