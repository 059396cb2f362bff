use std::time::Duration;

use serde::Deserialize;

/// Controls whether reads push a cached entry's hard expiration forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpirationBehavior {
    /// The TTL is fixed when the value is stored; reads never extend it.
    DoNotExtend,
    /// Every successful read restarts the TTL from the time of the read.
    ExtendOnRead,
}

/// Fine-tuning for one cached method.
///
/// The configuration layer resolves overrides (method level over service
/// level over global defaults) before a call reaches the cache; the cache
/// only ever sees the final merged policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CachingPolicy {
    /// Whether results of this method are cached at all.
    pub enabled: bool,

    /// Hard TTL: how long a stored value may be served.
    #[serde(with = "humantime_serde")]
    pub absolute_expiration: Duration,

    /// Soft TTL: how long until a read triggers a background refresh.
    #[serde(with = "humantime_serde")]
    pub refresh_time: Duration,

    /// Cooldown before another refresh attempt after a failed one.
    #[serde(with = "humantime_serde")]
    pub failed_refresh_delay: Duration,

    /// Whether reads extend the TTL.
    pub expiration_behavior: ExpirationBehavior,
}

impl Default for CachingPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            absolute_expiration: Duration::from_secs(6 * 60 * 60),
            refresh_time: Duration::from_secs(60),
            failed_refresh_delay: Duration::from_secs(1),
            expiration_behavior: ExpirationBehavior::DoNotExtend,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_from_yaml() {
        let yaml = r#"
            absolute_expiration: 30m
            refresh_time: 15s
            expiration_behavior: extend_on_read
        "#;
        let policy: CachingPolicy = serde_yaml::from_str(yaml).unwrap();

        assert!(policy.enabled);
        assert_eq!(policy.absolute_expiration, Duration::from_secs(30 * 60));
        assert_eq!(policy.refresh_time, Duration::from_secs(15));
        assert_eq!(policy.failed_refresh_delay, Duration::from_secs(1));
        assert_eq!(policy.expiration_behavior, ExpirationBehavior::ExtendOnRead);
    }
}
