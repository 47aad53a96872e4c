use std::env;

use super::types::{BackoffSettings, ConfigError, Environment};

const DEFAULT_CORS_ORIGINS: &[&str] =
    &["http://localhost:5173", "http://localhost:3000", "http://localhost:8080"];

pub(super) fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

pub(super) fn env_or_default(key: &str, default: &str) -> String {
    env_optional(key).unwrap_or_else(|| default.to_string())
}

pub(super) fn parse_u16(field: &'static str, value: String) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidValue { field, value })
}

pub(super) fn parse_u32(field: &'static str, value: String) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidValue { field, value })
}

pub(super) fn parse_u64(field: &'static str, value: String) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidValue { field, value })
}

pub(super) fn parse_usize(field: &'static str, value: String) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidValue { field, value })
}

pub(super) fn parse_f64(field: &'static str, value: String) -> Result<f64, ConfigError> {
    match value.parse::<f64>() {
        Ok(parsed) if parsed.is_finite() => Ok(parsed),
        _ => Err(ConfigError::InvalidValue { field, value }),
    }
}

/// Reads `<PREFIX>_RETRY_ATTEMPTS`, `<PREFIX>_RETRY_DELAY_MS` and `<PREFIX>_RETRY_MULTIPLIER`.
pub(super) fn parse_backoff(
    fields: [&'static str; 3],
    defaults: BackoffSettings,
) -> Result<BackoffSettings, ConfigError> {
    let [attempts_key, delay_key, multiplier_key] = fields;

    let max_attempts = match env_optional(attempts_key) {
        Some(value) => parse_u32(attempts_key, value)?,
        None => defaults.max_attempts,
    };
    let initial_delay_ms = match env_optional(delay_key) {
        Some(value) => parse_u64(delay_key, value)?,
        None => defaults.initial_delay_ms,
    };
    let multiplier = match env_optional(multiplier_key) {
        Some(value) => parse_f64(multiplier_key, value)?,
        None => defaults.multiplier,
    };

    if max_attempts == 0 {
        return Err(ConfigError::InvalidValue { field: attempts_key, value: "0".to_string() });
    }
    if multiplier < 1.0 {
        return Err(ConfigError::InvalidValue {
            field: multiplier_key,
            value: multiplier.to_string(),
        });
    }

    Ok(BackoffSettings { max_attempts, initial_delay_ms, multiplier })
}

pub(super) fn parse_cors_origins(value: Option<String>) -> Result<Vec<String>, ConfigError> {
    let Some(raw) = value else {
        return Ok(default_cors_origins());
    };

    if raw.trim().is_empty() {
        return Ok(default_cors_origins());
    }

    if raw.trim_start().starts_with('[') {
        let parsed: Vec<String> =
            serde_json::from_str(&raw).map_err(|_| ConfigError::InvalidCors(raw.clone()))?;
        if parsed.is_empty() {
            return Ok(default_cors_origins());
        }
        return Ok(parsed);
    }

    let items: Vec<String> = raw
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect();

    if items.is_empty() {
        return Ok(default_cors_origins());
    }

    Ok(items)
}

pub(super) fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON")
}

pub(super) fn parse_environment(value: Option<String>) -> Environment {
    match value.as_deref().map(|item| item.to_lowercase()) {
        Some(ref val) if val == "production" || val == "prod" => Environment::Production,
        Some(ref val) if val == "staging" => Environment::Staging,
        Some(ref val) if val == "test" || val == "testing" => Environment::Test,
        _ => Environment::Development,
    }
}

fn default_cors_origins() -> Vec<String> {
    DEFAULT_CORS_ORIGINS.iter().map(|item| item.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cors_origins_json() {
        let raw = "[\"http://a\",\"http://b\"]".to_string();
        let parsed = parse_cors_origins(Some(raw)).expect("cors json");
        assert_eq!(parsed, vec!["http://a".to_string(), "http://b".to_string()]);
    }

    #[test]
    fn parse_cors_origins_csv() {
        let raw = "http://a, http://b".to_string();
        let parsed = parse_cors_origins(Some(raw)).expect("cors csv");
        assert_eq!(parsed, vec!["http://a".to_string(), "http://b".to_string()]);
    }

    #[test]
    fn parse_cors_origins_defaults_on_empty() {
        let parsed = parse_cors_origins(Some(" ".to_string())).expect("cors empty");
        assert_eq!(parsed, default_cors_origins());
    }

    #[test]
    fn parse_bool_variants() {
        assert!(parse_bool("1"));
        assert!(parse_bool("yes"));
        assert!(parse_bool("on"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("0"));
    }

    #[test]
    fn parse_environment_variants() {
        assert_eq!(parse_environment(Some("prod".to_string())), Environment::Production);
        assert_eq!(parse_environment(Some("staging".to_string())), Environment::Staging);
        assert_eq!(parse_environment(Some("testing".to_string())), Environment::Test);
        assert_eq!(parse_environment(None), Environment::Development);
    }

    #[test]
    fn parse_f64_rejects_non_finite() {
        assert!(parse_f64("X", "NaN".to_string()).is_err());
        assert!(parse_f64("X", "inf".to_string()).is_err());
        assert_eq!(parse_f64("X", "2.5".to_string()).expect("float"), 2.5);
    }

    #[test]
    fn parse_backoff_uses_defaults_when_unset() {
        let defaults = BackoffSettings { max_attempts: 4, initial_delay_ms: 250, multiplier: 3.0 };
        let parsed = parse_backoff(
            [
                "BANDSCORE_TEST_UNSET_RETRY_ATTEMPTS",
                "BANDSCORE_TEST_UNSET_RETRY_DELAY_MS",
                "BANDSCORE_TEST_UNSET_RETRY_MULTIPLIER",
            ],
            defaults,
        )
        .expect("backoff");
        assert_eq!(parsed.max_attempts, 4);
        assert_eq!(parsed.initial_delay_ms, 250);
        assert_eq!(parsed.multiplier, 3.0);
    }
}
