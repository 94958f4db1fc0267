//! Timing knobs for the simulated channel and store.

use std::time::Duration;

use codereview_core::FileId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
    #[error("{0} must be at least 1")]
    EmptyRange(&'static str),
    #[error("jitter ({jitter:?}) exceeds the base latency ({base:?}) of {name}")]
    JitterTooLarge {
        name: &'static str,
        base: Duration,
        jitter: Duration,
    },
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
}

/// Channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Delay between `connect` and the `Connect` event
    pub connect_delay: Duration,
    /// Round-trip delay before a sent event is echoed
    pub send_delay: Duration,
    /// Interval between synthetic peer cursor moves
    pub cursor_interval: Duration,
    /// File the synthetic cursors wander in
    pub synthetic_file_id: FileId,
    /// Synthetic lines are drawn from `1..=max_line`
    pub max_line: u32,
    /// Synthetic columns are drawn from `1..=max_column`
    pub max_column: u32,
    /// Minimum spacing between local cursor broadcasts (30fps)
    pub cursor_broadcast_interval: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            connect_delay: Duration::from_millis(500),
            send_delay: Duration::from_millis(50),
            cursor_interval: Duration::from_millis(2000),
            synthetic_file_id: FileId(1),
            max_line: 100,
            max_column: 80,
            cursor_broadcast_interval: Duration::from_millis(33),
        }
    }
}

impl ChannelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cursor_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("cursor_interval"));
        }
        if self.max_line == 0 {
            return Err(ConfigError::EmptyRange("max_line"));
        }
        if self.max_column == 0 {
            return Err(ConfigError::EmptyRange("max_column"));
        }
        Ok(())
    }
}

/// Comment store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Latency of fetch operations
    pub fetch_latency: Duration,
    /// Latency of add/update/delete/resolve
    pub mutation_latency: Duration,
    /// Latency of reaction changes
    pub reaction_latency: Duration,
    /// Each latency is randomized within `base ± jitter` (zero = fixed)
    pub jitter: Duration,
    /// First id handed out by `add_comment`
    pub first_comment_id: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            fetch_latency: Duration::from_millis(300),
            mutation_latency: Duration::from_millis(200),
            reaction_latency: Duration::from_millis(100),
            jitter: Duration::ZERO,
            first_comment_id: 100,
        }
    }
}

impl StoreConfig {
    /// Config for testing: no simulated latency.
    pub fn for_testing() -> Self {
        Self {
            fetch_latency: Duration::ZERO,
            mutation_latency: Duration::ZERO,
            reaction_latency: Duration::ZERO,
            jitter: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, base) in [
            ("fetch_latency", self.fetch_latency),
            ("mutation_latency", self.mutation_latency),
            ("reaction_latency", self.reaction_latency),
        ] {
            if self.jitter > base {
                return Err(ConfigError::JitterTooLarge {
                    name,
                    base,
                    jitter: self.jitter,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_defaults() {
        let config = ChannelConfig::default();
        assert_eq!(config.connect_delay, Duration::from_millis(500));
        assert_eq!(config.send_delay, Duration::from_millis(50));
        assert_eq!(config.cursor_interval, Duration::from_secs(2));
        assert_eq!(config.synthetic_file_id, FileId(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_channel_rejects_zero_interval() {
        let config = ChannelConfig {
            cursor_interval: Duration::ZERO,
            ..ChannelConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroInterval("cursor_interval"))
        );
    }

    #[test]
    fn test_channel_rejects_empty_ranges() {
        let config = ChannelConfig {
            max_column: 0,
            ..ChannelConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::EmptyRange("max_column")));
    }

    #[test]
    fn test_store_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.fetch_latency, Duration::from_millis(300));
        assert_eq!(config.mutation_latency, Duration::from_millis(200));
        assert_eq!(config.reaction_latency, Duration::from_millis(100));
        assert_eq!(config.first_comment_id, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_store_rejects_oversized_jitter() {
        let config = StoreConfig {
            jitter: Duration::from_millis(150),
            ..StoreConfig::default()
        };
        // Reaction latency is only 100ms.
        assert!(matches!(
            config.validate(),
            Err(ConfigError::JitterTooLarge { name: "reaction_latency", .. })
        ));
    }

    #[test]
    fn test_store_for_testing_has_no_latency() {
        let config = StoreConfig::for_testing();
        assert!(config.fetch_latency.is_zero());
        assert!(config.validate().is_ok());
    }
}
