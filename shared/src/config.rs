use crate::{Error, Result, TtlMs};
use std::time::Duration;
use tracing::warn;

/// Construction parameters for an expiring map.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MapConfig {
    /// Added to "now" at write time to compute an entry's expiry
    pub ttl: Duration,
    /// Period between background reclamation passes
    pub sweep_interval: Duration,
}

impl MapConfig {
    const DEFAULT_TTL_MS: u64 = 60_000;

    /// Creates a config whose sweep interval equals the TTL
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sweep_interval: ttl,
        }
    }

    pub fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }

    /// Rejects zero durations; a zero sweep interval would spin the sweeper.
    pub fn validate(&self) -> Result<()> {
        if self.ttl.is_zero() {
            return Err(Error::InvalidConfig("ttl must be greater than zero".into()));
        }
        if self.sweep_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "sweep interval must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Reads `MCACHE_TTL_MS` and `MCACHE_SWEEP_INTERVAL_MS` from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`MapConfig::from_env`] but resolves variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let ttl = read_ms(&lookup, "MCACHE_TTL_MS").unwrap_or(TtlMs(Self::DEFAULT_TTL_MS));
        let sweep_interval = read_ms(&lookup, "MCACHE_SWEEP_INTERVAL_MS").unwrap_or(ttl);

        Self {
            ttl: ttl.into(),
            sweep_interval: sweep_interval.into(),
        }
    }
}

fn read_ms<F>(lookup: &F, name: &str) -> Option<TtlMs>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)?;
    match raw.trim().parse::<u64>() {
        Ok(0) => {
            warn!("{} must be greater than zero, using default", name);
            None
        }
        Ok(ms) => Some(TtlMs(ms)),
        Err(_) => {
            warn!("{} is not a valid number of milliseconds ({:?}), using default", name, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn test_sweep_interval_defaults_to_ttl() {
        let config = MapConfig::new(Duration::from_millis(250));
        assert_eq!(config.sweep_interval, Duration::from_millis(250));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_durations() {
        let config = MapConfig::new(Duration::ZERO);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = MapConfig::new(Duration::from_secs(1)).with_sweep_interval(Duration::ZERO);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_from_lookup_defaults() {
        let config = MapConfig::from_lookup(lookup_from(&[]));
        assert_eq!(config.ttl, Duration::from_secs(60));
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_from_lookup_reads_both_values() {
        let config = MapConfig::from_lookup(lookup_from(&[
            ("MCACHE_TTL_MS", "100"),
            ("MCACHE_SWEEP_INTERVAL_MS", "50"),
        ]));
        assert_eq!(config.ttl, Duration::from_millis(100));
        assert_eq!(config.sweep_interval, Duration::from_millis(50));
    }

    #[test]
    fn test_from_lookup_sweep_follows_ttl() {
        let config = MapConfig::from_lookup(lookup_from(&[("MCACHE_TTL_MS", "1500")]));
        assert_eq!(config.sweep_interval, Duration::from_millis(1500));
    }

    #[test]
    fn test_from_lookup_falls_back_on_garbage() {
        let config = MapConfig::from_lookup(lookup_from(&[
            ("MCACHE_TTL_MS", "soon"),
            ("MCACHE_SWEEP_INTERVAL_MS", "0"),
        ]));
        assert_eq!(config.ttl, Duration::from_secs(60));
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
    }
}
