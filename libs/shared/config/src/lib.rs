use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

const DEFAULT_ICE_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
    "stun:stun2.l.google.com:19302",
];

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub ice_server_urls: Vec<String>,
    pub call_negotiation_timeout_secs: u64,
    pub signal_poll_interval_ms: u64,
    pub signal_fetch_limit: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            ice_server_urls: env::var("ICE_SERVER_URLS")
                .map(|raw| parse_url_list(&raw))
                .ok()
                .filter(|urls| !urls.is_empty())
                .unwrap_or_else(|| {
                    warn!("ICE_SERVER_URLS not set, using default STUN servers");
                    default_ice_servers()
                }),
            call_negotiation_timeout_secs: parse_or_default("CALL_NEGOTIATION_TIMEOUT_SECS", 60),
            signal_poll_interval_ms: parse_or_default("SIGNAL_POLL_INTERVAL_MS", 1000),
            signal_fetch_limit: parse_or_default("SIGNAL_FETCH_LIMIT", 50),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_secs(self.call_negotiation_timeout_secs)
    }

    pub fn signal_poll_interval(&self) -> Duration {
        Duration::from_millis(self.signal_poll_interval_ms)
    }
}

pub fn default_ice_servers() -> Vec<String> {
    DEFAULT_ICE_SERVERS.iter().map(|s| s.to_string()).collect()
}

fn parse_url_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_or_default<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
