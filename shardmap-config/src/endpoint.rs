//! GSM endpoint.

use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GsmProtocol {
    /// Whatever the driver picks.
    #[default]
    Default,
    Tcp,
}

impl FromStr for GsmProtocol {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "default" => Self::Default,
            "tcp" => Self::Tcp,
            _ => return Err(()),
        })
    }
}

/// Where the global shard map database lives.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct GsmEndpoint {
    #[serde(default)]
    pub server: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default)]
    pub protocol: GsmProtocol,
}

fn default_port() -> u16 {
    1433
}

fn default_database() -> String {
    "shard_map_manager".into()
}

impl Default for GsmEndpoint {
    fn default() -> Self {
        Self {
            server: String::new(),
            port: default_port(),
            database: default_database(),
            protocol: GsmProtocol::Default,
        }
    }
}

impl Display for GsmEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}/{}", self.server, self.port, self.database)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_protocol_parse() {
        assert_eq!("tcp".parse::<GsmProtocol>().unwrap(), GsmProtocol::Tcp);
        assert_eq!("TCP".parse::<GsmProtocol>().unwrap(), GsmProtocol::Tcp);
        assert!("carrier-pigeon".parse::<GsmProtocol>().is_err());
    }

    #[test]
    fn test_defaults() {
        let endpoint = GsmEndpoint::default();
        assert_eq!(endpoint.port, 1433);
        assert_eq!(endpoint.database, "shard_map_manager");
    }
}
