use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hint passed to the backing store about how reluctantly an entry should be evicted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    BelowNormal,
    #[default]
    Normal,
    AboveNormal,
    High,
    NotRemovable,
}

impl Priority {
    /// Number of times an entry with this priority is passed over before a store may evict it.
    ///
    /// [`None`] means the entry is never evicted for capacity reasons.
    pub fn survival_passes(self) -> Option<u8> {
        match self {
            Priority::Low | Priority::BelowNormal => Some(0),
            Priority::Normal => Some(1),
            Priority::AboveNormal => Some(2),
            Priority::High => Some(3),
            Priority::NotRemovable => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("base expiration must be greater than zero")]
    ZeroBaseExpiration,
    #[error("extra expiration window must be greater than zero")]
    ZeroExtraExpirationWindow,
}

/// Expiration settings of one [`crate::StampedeCache`].
///
/// An entry is fresh for `base_expiration` after it was computed. It then stays in the store for
/// another `extra_expiration_window`, serving stale reads while a single caller recomputes it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// How long a computed value is considered fresh.
    #[serde(with = "humantime_serde")]
    pub base_expiration: Duration,

    /// How far the hard expiration lies beyond the soft one, and how much it is extended each
    /// time a stale entry is detected.
    #[serde(with = "humantime_serde")]
    pub extra_expiration_window: Duration,

    /// Priority hint forwarded on every insert.
    pub priority: Priority,
}

impl Config {
    pub const DEFAULT_BASE_EXPIRATION: Duration = Duration::from_secs(60);
    pub const DEFAULT_EXTRA_EXPIRATION_WINDOW: Duration = Duration::from_secs(10);

    pub fn from_secs(base_expiration: u64, extra_expiration_window: u64) -> Self {
        Self {
            base_expiration: Duration::from_secs(base_expiration),
            extra_expiration_window: Duration::from_secs(extra_expiration_window),
            ..Default::default()
        }
    }

    pub fn with_base_expiration(mut self, base_expiration: Duration) -> Self {
        self.base_expiration = base_expiration;
        self
    }

    pub fn with_extra_expiration_window(mut self, extra_expiration_window: Duration) -> Self {
        self.extra_expiration_window = extra_expiration_window;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_expiration.is_zero() {
            return Err(ConfigError::ZeroBaseExpiration);
        }
        if self.extra_expiration_window.is_zero() {
            return Err(ConfigError::ZeroExtraExpirationWindow);
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_expiration: Self::DEFAULT_BASE_EXPIRATION,
            extra_expiration_window: Self::DEFAULT_EXTRA_EXPIRATION_WINDOW,
            priority: Priority::Normal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_defaults_to_sixty_and_ten_seconds() {
        // when
        let config = Config::default();

        // then
        assert_eq!(config.base_expiration, Duration::from_secs(60));
        assert_eq!(config.extra_expiration_window, Duration::from_secs(10));
        assert_eq!(config.priority, Priority::Normal);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn it_deserializes_human_readable_durations() {
        // given
        let yaml = r#"
            base_expiration: 2m
            extra_expiration_window: 15s
            priority: above_normal
        "#;

        // when
        let config: Config = serde_yaml::from_str(yaml).unwrap();

        // then
        assert_eq!(config.base_expiration, Duration::from_secs(120));
        assert_eq!(config.extra_expiration_window, Duration::from_secs(15));
        assert_eq!(config.priority, Priority::AboveNormal);
    }

    #[test]
    fn it_fills_missing_fields_with_defaults() {
        // when
        let config: Config = serde_yaml::from_str("priority: high").unwrap();

        // then
        assert_eq!(config, Config::default().with_priority(Priority::High));
    }

    #[test]
    fn it_rejects_zero_durations() {
        // given
        let zero_base = Config::from_secs(0, 10);
        let zero_window = Config::from_secs(60, 0);

        // then
        assert_eq!(zero_base.validate(), Err(ConfigError::ZeroBaseExpiration));
        assert_eq!(
            zero_window.validate(),
            Err(ConfigError::ZeroExtraExpirationWindow)
        );
    }

    #[test]
    fn it_grants_more_passes_to_higher_priorities() {
        assert_eq!(Priority::Low.survival_passes(), Some(0));
        assert_eq!(Priority::Normal.survival_passes(), Some(1));
        assert_eq!(Priority::High.survival_passes(), Some(3));
        assert_eq!(Priority::NotRemovable.survival_passes(), None);
    }
}
