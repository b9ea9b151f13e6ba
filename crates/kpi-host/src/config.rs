use std::time::Duration;

use crate::error::{HostError, HostResult};

pub const EVAL_TIMEOUT_ENV: &str = "KPI_EVAL_TIMEOUT_MS";
pub const MAX_CONCURRENT_ENV: &str = "KPI_MAX_CONCURRENT_EVALUATIONS";
pub const CHANNEL_CAPACITY_ENV: &str = "KPI_CHANNEL_CAPACITY";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitConfig {
    /// Upper bound for evaluating one definition against one snapshot.
    pub evaluation_timeout: Duration,
    /// Evaluations in flight across all requests of a unit. Also caps the check requests a
    /// unit works on at once.
    pub max_concurrent_evaluations: usize,
    /// Capacity of the request and result queues.
    pub channel_capacity: usize,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            evaluation_timeout: Duration::from_secs(5),
            max_concurrent_evaluations: 64,
            channel_capacity: 1024,
        }
    }
}

impl UnitConfig {
    /// Defaults overridden by `KPI_*` environment variables.
    pub fn from_env() -> HostResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> HostResult<Self> {
        let mut config = Self::default();
        if let Some(ms) = parse_positive(EVAL_TIMEOUT_ENV, lookup(EVAL_TIMEOUT_ENV))? {
            config.evaluation_timeout = Duration::from_millis(ms as u64);
        }
        if let Some(max) = parse_positive(MAX_CONCURRENT_ENV, lookup(MAX_CONCURRENT_ENV))? {
            config.max_concurrent_evaluations = max;
        }
        if let Some(capacity) = parse_positive(CHANNEL_CAPACITY_ENV, lookup(CHANNEL_CAPACITY_ENV))? {
            config.channel_capacity = capacity;
        }
        Ok(config)
    }
}

fn parse_positive(key: &'static str, raw: Option<String>) -> HostResult<Option<usize>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let value = raw
        .trim()
        .parse::<usize>()
        .map_err(|err| HostError::Config {
            key,
            value: raw.clone(),
            reason: err.to_string(),
        })?;
    if value == 0 {
        return Err(HostError::Config {
            key,
            value: raw,
            reason: "must be greater than zero".into(),
        });
    }
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn absent_variables_keep_defaults() {
        assert_eq!(
            UnitConfig::from_lookup(lookup(&[])).unwrap(),
            UnitConfig::default()
        );
    }

    #[test]
    fn variables_override_defaults() {
        let config = UnitConfig::from_lookup(lookup(&[
            (EVAL_TIMEOUT_ENV, "250"),
            (MAX_CONCURRENT_ENV, "8"),
            (CHANNEL_CAPACITY_ENV, " 16 "),
        ]))
        .unwrap();
        assert_eq!(config.evaluation_timeout, Duration::from_millis(250));
        assert_eq!(config.max_concurrent_evaluations, 8);
        assert_eq!(config.channel_capacity, 16);
    }

    #[test]
    fn malformed_or_zero_values_are_rejected() {
        assert!(matches!(
            UnitConfig::from_lookup(lookup(&[(EVAL_TIMEOUT_ENV, "soon")])),
            Err(HostError::Config { key: EVAL_TIMEOUT_ENV, .. })
        ));
        assert!(matches!(
            UnitConfig::from_lookup(lookup(&[(MAX_CONCURRENT_ENV, "0")])),
            Err(HostError::Config { key: MAX_CONCURRENT_ENV, .. })
        ));
    }
}
