/// Runtime configuration, loaded once from the environment at startup.
///
/// Every knob accepts a `DRAFTFLOW_`-prefixed variable with an unprefixed
/// fallback, so the same env file works for local runs and deployments.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub worker_id: String,
    pub lease_seconds: i64,
    pub api_addr: Option<String>,
    pub migrate_on_startup: bool,

    // Job Factory gates
    pub autopilot_enabled: bool,
    pub max_jobs_per_hour: i64,
    pub max_running_jobs: i64,

    // Pipeline defaults
    pub topic_count: usize,
    pub default_word_count: i32,
    pub allowed_collections: Vec<String>,
    pub blocked_collections: Vec<String>,

    // Worker loop cadence
    pub poll_interval_ms: u64,
    pub reap_interval_ms: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL is missing"))?;

        let worker_id = env_or_fallback("DRAFTFLOW_WORKER_ID", "WORKER_ID")
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "worker-1".to_string());

        let lease_seconds = env_or_fallback("DRAFTFLOW_LEASE_SECONDS", "LEASE_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(120);

        let api_addr = env_or_fallback("DRAFTFLOW_API_ADDR", "API_ADDR")
            .and_then(|s| normalize_optional_addr(&s));

        let migrate_on_startup = env_bool("DRAFTFLOW_MIGRATE_ON_STARTUP").unwrap_or(false);

        let autopilot_enabled = env_bool("DRAFTFLOW_AUTOPILOT_ENABLED").unwrap_or(true);

        let max_jobs_per_hour = env_or_fallback("DRAFTFLOW_MAX_JOBS_PER_HOUR", "MAX_JOBS_PER_HOUR")
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        let max_running_jobs = env_or_fallback("DRAFTFLOW_MAX_RUNNING_JOBS", "MAX_RUNNING_JOBS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(3);

        let topic_count = env_or_fallback("DRAFTFLOW_TOPIC_COUNT", "TOPIC_COUNT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        let default_word_count =
            env_or_fallback("DRAFTFLOW_DEFAULT_WORD_COUNT", "DEFAULT_WORD_COUNT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(1200);

        let allowed_collections =
            env_or_fallback("DRAFTFLOW_ALLOWED_COLLECTIONS", "ALLOWED_COLLECTIONS")
                .map(|s| parse_list(&s))
                .unwrap_or_default();

        let blocked_collections =
            env_or_fallback("DRAFTFLOW_BLOCKED_COLLECTIONS", "BLOCKED_COLLECTIONS")
                .map(|s| parse_list(&s))
                .unwrap_or_default();

        let poll_interval_ms = env_or_fallback("DRAFTFLOW_POLL_INTERVAL_MS", "POLL_INTERVAL_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(250);

        let reap_interval_ms = env_or_fallback("DRAFTFLOW_REAP_INTERVAL_MS", "REAP_INTERVAL_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(5_000);

        Ok(Self {
            database_url,
            worker_id,
            lease_seconds,
            api_addr,
            migrate_on_startup,
            autopilot_enabled,
            max_jobs_per_hour,
            max_running_jobs,
            topic_count,
            default_word_count,
            allowed_collections,
            blocked_collections,
            poll_interval_ms,
            reap_interval_ms,
        })
    }
}

fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var(fallback).ok().filter(|s| !s.trim().is_empty()))
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn normalize_optional_addr(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if matches!(v.to_lowercase().as_str(), "0" | "off" | "false" | "none") {
        return None;
    }
    Some(v.to_string())
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
