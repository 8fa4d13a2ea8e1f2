//! Application configuration parsed from environment variables

use std::env;

/// How the AI adapter is consulted for classification and resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiMode {
    /// AI is required; failures surface instead of falling back
    Full,
    /// AI is bypassed; rule-based fallback always used
    Fallback,
    /// AI when confident, rules otherwise
    Smart,
}

impl AiMode {
    pub fn parse(s: &str) -> Result<AiMode, String> {
        match s {
            "full" => Ok(AiMode::Full),
            "fallback" => Ok(AiMode::Fallback),
            "smart" => Ok(AiMode::Smart),
            other => Err(format!("AI_MODE must be full|fallback|smart, got '{other}'")),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AiMode::Full => "full",
            AiMode::Fallback => "fallback",
            AiMode::Smart => "smart",
        }
    }
}

/// Application configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub app_env: String,
    pub host: String,
    pub port: u16,

    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,

    pub ai_provider_base_url: String,
    pub ai_api_key: Option<String>,
    pub ai_model: String,
    pub ai_timeout_seconds: u64,
    pub ai_retry_max_attempts: u32,
    pub ai_min_confidence: f64,
    pub ai_max_daily_tokens: u64,
    pub ai_mode: AiMode,

    pub max_resolution_attempts: i32,
    pub max_request_body_bytes: usize,

    pub prompts_dir: String,
    pub replay_interval_seconds: u64,
    pub followup_queue_capacity: usize,
    pub ingest_rate_limit_per_minute: usize,
    pub dlq_cleanup_days: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set".to_string())?;

        let redis_url =
            env::var("REDIS_URL").map_err(|_| "REDIS_URL must be set".to_string())?;

        let jwt_secret = env::var("JWT_SECRET")
            .unwrap_or_else(|_| "change-me-please-and-keep-long-random".to_string());

        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 = env::var("PORT")
            .unwrap_or_else(|_| "8087".to_string())
            .parse()
            .map_err(|_| "PORT must be a valid u16".to_string())?;

        let ai_provider_base_url = env::var("AI_PROVIDER_BASE_URL")
            .unwrap_or_else(|_| "https://openrouter.ai/api/v1".to_string());
        let ai_api_key = env::var("AI_API_KEY").ok().filter(|s| !s.is_empty());
        let ai_model = env::var("AI_MODEL")
            .unwrap_or_else(|_| "google/gemini-2.0-flash-exp:free".to_string());

        let ai_timeout_seconds = parse_or("AI_TIMEOUT_SECONDS", 3u64)?;
        let ai_retry_max_attempts = parse_or("AI_RETRY_MAX_ATTEMPTS", 2u32)?;
        let ai_min_confidence = parse_or("AI_MIN_CONFIDENCE", 0.55f64)?;
        let ai_max_daily_tokens = parse_or("AI_MAX_DAILY_TOKENS", 200_000u64)?;

        let ai_mode = match env::var("AI_MODE") {
            Ok(raw) => AiMode::parse(&raw)?,
            Err(_) => AiMode::Smart,
        };

        let max_resolution_attempts = parse_or("OCTUP_MAX_RESOLUTION_ATTEMPTS", 2i32)?;
        let max_request_body_bytes = parse_or("MAX_REQUEST_BODY_BYTES", 1_048_576usize)?;

        let prompts_dir = env::var("PROMPTS_DIR").unwrap_or_else(|_| "prompts".to_string());
        let replay_interval_seconds = parse_or("REPLAY_INTERVAL_SECONDS", 60u64)?;
        let followup_queue_capacity = parse_or("FOLLOWUP_QUEUE_CAPACITY", 10_000usize)?;
        let ingest_rate_limit_per_minute = parse_or("INGEST_RATE_LIMIT_PER_MINUTE", 1_000usize)?;
        let dlq_cleanup_days = parse_or("DLQ_CLEANUP_DAYS", 30i64)?;

        Ok(Config {
            app_env,
            host,
            port,
            database_url,
            redis_url,
            jwt_secret,
            ai_provider_base_url,
            ai_api_key,
            ai_model,
            ai_timeout_seconds,
            ai_retry_max_attempts,
            ai_min_confidence,
            ai_max_daily_tokens,
            ai_mode,
            max_resolution_attempts,
            max_request_body_bytes,
            prompts_dir,
            replay_interval_seconds,
            followup_queue_capacity,
            ingest_rate_limit_per_minute,
            dlq_cleanup_days,
        })
    }

    /// AI is considered configured when a key is present and the base URL is
    /// not explicitly disabled.
    pub fn ai_enabled(&self) -> bool {
        self.ai_api_key.is_some() && self.ai_provider_base_url != "disabled"
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, String> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| format!("{key} has an invalid value: '{raw}'")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ai_mode_parses_known_values() {
        assert_eq!(AiMode::parse("full").unwrap(), AiMode::Full);
        assert_eq!(AiMode::parse("fallback").unwrap(), AiMode::Fallback);
        assert_eq!(AiMode::parse("smart").unwrap(), AiMode::Smart);
        assert!(AiMode::parse("FULL").is_err());
        assert!(AiMode::parse("auto").is_err());
    }
}
