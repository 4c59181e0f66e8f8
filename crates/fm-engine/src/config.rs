use std::env;
use std::str::FromStr;
use std::time::Duration;

use fm_infra::retry::RetryPolicy;

use crate::{Error, Result};

/// Retry budgets and boot pacing for one engine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub discovery: RetryPolicy,
    pub connect: RetryPolicy,
    /// Pause between machines in the dependency phase.
    pub boot_delay: Option<Duration>,
    pub default_script: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            discovery: RetryPolicy::new(5, Duration::from_millis(2000)),
            connect: RetryPolicy::new(6, Duration::from_millis(5000)),
            boot_delay: None,
            default_script: "default".into(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Ok(Self {
            discovery: RetryPolicy::new(
                parse_or("FORMATION_DISCOVERY_ATTEMPTS", defaults.discovery.attempts)?,
                Duration::from_millis(parse_or("FORMATION_DISCOVERY_BACKOFF_MS", 2000)?),
            ),
            connect: RetryPolicy::new(
                parse_or("FORMATION_CONNECT_ATTEMPTS", defaults.connect.attempts)?,
                Duration::from_millis(parse_or("FORMATION_CONNECT_BACKOFF_MS", 5000)?),
            ),
            boot_delay: parse_opt::<u64>("FORMATION_BOOT_DELAY_MS")?.map(Duration::from_millis),
            default_script: env::var("FORMATION_DEFAULT_SCRIPT")
                .unwrap_or(defaults.default_script),
        })
    }
}

fn parse_opt<T: FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{key} must be a non-negative integer, got {raw:?}"))),
        _ => Ok(None),
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    Ok(parse_opt(key)?.unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_budgets() {
        let config = EngineConfig::default();
        assert_eq!(config.discovery.attempts, 5);
        assert_eq!(config.connect, RetryPolicy::new(6, Duration::from_secs(5)));
        assert_eq!(config.boot_delay, None);
        assert_eq!(config.default_script, "default");
    }

    #[test]
    fn unset_optional_parses_to_none() {
        let parsed: Option<u64> = parse_opt("FORMATION_TEST_SURELY_UNSET_VAR").unwrap();
        assert_eq!(parsed, None);
    }
}
