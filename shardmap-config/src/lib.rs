//! Configuration for the shard map client.

pub mod cache;
pub mod endpoint;
pub mod error;
pub mod retry;

pub use cache::CacheOptions;
pub use endpoint::{GsmEndpoint, GsmProtocol};
pub use error::Error;
pub use retry::RetryOptions;

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

/// Root configuration, usually loaded from `shardmap.toml`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ShardMapConfig {
    /// Where the global shard map lives.
    #[serde(default)]
    pub gsm: GsmEndpoint,

    /// Retry behavior for store round trips.
    #[serde(default)]
    pub retry: RetryOptions,

    /// Mapping cache behavior.
    #[serde(default)]
    pub cache: CacheOptions,
}

impl ShardMapConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|err| Error::Io(path.display().to_string(), err))?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        info!("loaded shard map config from \"{}\"", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.retry.validate()?;
        self.cache.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_serializable() {
        let config = ShardMapConfig::default();
        toml::to_string(&config).unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn test_load_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[gsm]
server = "gsm.internal"
port = 1433
database = "shard_map_manager"
protocol = "tcp"

[retry]
max_attempts = 7
base_delay_ms = 20
max_delay_ms = 500

[cache]
ttl_ms = 60000
"#
        )
        .unwrap();

        let config = ShardMapConfig::load(file.path()).unwrap();
        assert_eq!(config.gsm.server, "gsm.internal");
        assert_eq!(config.gsm.protocol, GsmProtocol::Tcp);
        assert_eq!(config.retry.max_attempts, 7);
        assert_eq!(config.retry.base_delay().as_millis(), 20);
        assert_eq!(config.cache.ttl().as_secs(), 60);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let result: Result<ShardMapConfig, _> = toml::from_str("unheard_of = true");
        assert!(result.is_err());
    }
}
