//! Runtime settings, overlaid from `CODEREVIEW_*` environment variables.
//!
//! | Variable                        | Default | Meaning                      |
//! |---------------------------------|---------|------------------------------|
//! | `CODEREVIEW_ROOM`               | `pr-1`  | Room to join                 |
//! | `CODEREVIEW_CONNECT_DELAY_MS`   | 500     | Simulated connect round trip |
//! | `CODEREVIEW_SEND_DELAY_MS`      | 50      | Simulated send round trip    |
//! | `CODEREVIEW_CURSOR_INTERVAL_MS` | 2000    | Synthetic cursor period      |
//! | `CODEREVIEW_STORE_LATENCY_MS`   | 300     | Base store latency           |
//! | `CODEREVIEW_RUN_SECS`           | 5       | How long to watch the room   |

use std::str::FromStr;
use std::time::Duration;

use codereview_collab::{ChannelConfig, ConfigError, StoreConfig};

#[derive(Debug, Clone)]
pub struct Settings {
    pub room: String,
    pub channel: ChannelConfig,
    pub store: StoreConfig,
    pub run_for: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            room: "pr-1".to_string(),
            channel: ChannelConfig::default(),
            store: StoreConfig::default(),
            run_for: Duration::from_secs(5),
        }
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup (for testing).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut settings = Self::default();
        let millis = |key: &str| -> Result<Option<Duration>, ConfigError> {
            lookup(key)
                .map(|v| parse::<u64>(key, &v).map(Duration::from_millis))
                .transpose()
        };

        if let Some(room) = lookup("CODEREVIEW_ROOM").filter(|r| !r.trim().is_empty()) {
            settings.room = room;
        }
        if let Some(d) = millis("CODEREVIEW_CONNECT_DELAY_MS")? {
            settings.channel.connect_delay = d;
        }
        if let Some(d) = millis("CODEREVIEW_SEND_DELAY_MS")? {
            settings.channel.send_delay = d;
        }
        if let Some(d) = millis("CODEREVIEW_CURSOR_INTERVAL_MS")? {
            settings.channel.cursor_interval = d;
        }
        if let Some(d) = millis("CODEREVIEW_STORE_LATENCY_MS")? {
            // Keep the default ratios: fetch 3, mutate 2, react 1.
            settings.store.fetch_latency = d;
            settings.store.mutation_latency = d * 2 / 3;
            settings.store.reaction_latency = d / 3;
        }
        if let Some(v) = lookup("CODEREVIEW_RUN_SECS") {
            settings.run_for = Duration::from_secs(parse("CODEREVIEW_RUN_SECS", &v)?);
        }

        settings.channel.validate()?;
        settings.store.validate()?;
        Ok(settings)
    }
}
