//! Shard location.

use std::fmt::Display;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Protocol used to reach a shard database.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// Whatever the driver picks.
    #[default]
    Default,
    Tcp,
}

impl Protocol {
    fn prefix(&self) -> &'static str {
        match self {
            Self::Default => "",
            Self::Tcp => "tcp:",
        }
    }
}

/// Network location of a shard database.
///
/// Server and database compare case-insensitively; two locations that
/// differ only in case refer to the same shard.
#[derive(Serialize, Deserialize, Debug, Clone, Eq)]
pub struct ShardLocation {
    pub protocol: Protocol,
    pub server: String,
    pub port: u16,
    pub database: String,
}

impl ShardLocation {
    pub fn new(server: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            protocol: Protocol::Default,
            server: server.into(),
            port: 0,
            database: database.into(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    #[cfg(test)]
    pub fn new_test(n: usize) -> Self {
        Self::new(format!("srv{}", n), format!("db{}", n))
    }
}

impl PartialEq for ShardLocation {
    fn eq(&self, other: &Self) -> bool {
        self.protocol == other.protocol
            && self.port == other.port
            && self.server.eq_ignore_ascii_case(&other.server)
            && self.database.eq_ignore_ascii_case(&other.database)
    }
}

impl Hash for ShardLocation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.protocol.hash(state);
        self.port.hash(state);
        self.server.to_ascii_lowercase().hash(state);
        self.database.to_ascii_lowercase().hash(state);
    }
}

impl Display for ShardLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.protocol.prefix(), self.server)?;
        if self.port != 0 {
            write!(f, ":{}", self.port)?;
        }
        write!(f, "/{}", self.database)
    }
}

impl FromStr for ShardLocation {
    type Err = String;

    // "tcp:server:port/database", protocol and port optional.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (protocol, rest) = match s.strip_prefix("tcp:") {
            Some(rest) => (Protocol::Tcp, rest),
            None => (Protocol::Default, s),
        };

        let (addr, database) = rest
            .split_once('/')
            .ok_or_else(|| format!("shard location \"{}\" is missing a database", s))?;
        if database.is_empty() {
            return Err(format!("shard location \"{}\" is missing a database", s));
        }

        let (server, port) = match addr.rsplit_once(':') {
            Some((server, port)) => (
                server,
                port.parse::<u16>()
                    .map_err(|_| format!("invalid port in shard location \"{}\"", s))?,
            ),
            None => (addr, 0),
        };
        if server.is_empty() {
            return Err(format!("shard location \"{}\" is missing a server", s));
        }

        Ok(Self {
            protocol,
            server: server.into(),
            port,
            database: database.into(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_case_insensitive_identity() {
        let a = ShardLocation::new("Server-One", "Tenants");
        let b = ShardLocation::new("server-one", "tenants");
        assert_eq!(a, b);

        use std::collections::hash_map::DefaultHasher;
        let hash = |loc: &ShardLocation| {
            let mut hasher = DefaultHasher::new();
            loc.hash(&mut hasher);
            hasher.finish()
        };
        assert_eq!(hash(&a), hash(&b));
    }

    #[test]
    fn test_port_distinguishes() {
        let a = ShardLocation::new("srv", "db").with_port(1433);
        let b = ShardLocation::new("srv", "db").with_port(1434);
        assert_ne!(a, b);
    }

    #[test]
    fn test_parse_round_trip() {
        let loc: ShardLocation = "tcp:srv1:1433/db1".parse().unwrap();
        assert_eq!(loc.protocol, Protocol::Tcp);
        assert_eq!(loc.server, "srv1");
        assert_eq!(loc.port, 1433);
        assert_eq!(loc.database, "db1");
        assert_eq!(loc.to_string(), "tcp:srv1:1433/db1");

        let loc: ShardLocation = "srv2/db2".parse().unwrap();
        assert_eq!(loc.protocol, Protocol::Default);
        assert_eq!(loc.port, 0);
        assert_eq!(loc.to_string(), "srv2/db2");
    }

    #[test]
    fn test_parse_errors() {
        assert!("".parse::<ShardLocation>().is_err());
        assert!("srv-only".parse::<ShardLocation>().is_err());
        assert!("srv:notaport/db".parse::<ShardLocation>().is_err());
        assert!("/db".parse::<ShardLocation>().is_err());
    }
}
