//! Worker and query identities.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identity of a cluster worker process.
///
/// The control port receives work units, the data port carries exchange
/// traffic between fragments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    pub control_port: u16,
    pub data_port: u16,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, control_port: u16, data_port: u16) -> Self {
        Self {
            address: address.into(),
            control_port,
            data_port,
        }
    }

    pub fn host(&self) -> &str {
        &self.address
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.address, self.control_port, self.data_port)
    }
}

/// Parses `host:control:data`, or `host:port` when one port serves both.
impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        let parse_port = |p: &str| {
            p.parse::<u16>()
                .map_err(|e| Error::invalid_endpoint(s, format!("bad port '{}': {}", p, e)))
        };
        match parts.as_slice() {
            [host, port] if !host.is_empty() => {
                let port = parse_port(port)?;
                Ok(Endpoint::new(*host, port, port))
            }
            [host, control, data] if !host.is_empty() => Ok(Endpoint::new(
                *host,
                parse_port(control)?,
                parse_port(data)?,
            )),
            _ => Err(Error::invalid_endpoint(
                s,
                "expected host:port or host:control_port:data_port",
            )),
        }
    }
}

/// Identifier of one submitted query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryId(pub Uuid);

impl QueryId {
    pub fn new() -> Self {
        QueryId(Uuid::new_v4())
    }
}

impl Default for QueryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_part_address() {
        let endpoint: Endpoint = "10.0.0.7:31010:31012".parse().unwrap();
        assert_eq!(endpoint, Endpoint::new("10.0.0.7", 31010, 31012));
        assert_eq!(endpoint.to_string(), "10.0.0.7:31010:31012");
    }

    #[test]
    fn single_port_serves_control_and_data() {
        let endpoint: Endpoint = "worker-2:50051".parse().unwrap();
        assert_eq!(endpoint.control_port, 50051);
        assert_eq!(endpoint.data_port, 50051);
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!("worker".parse::<Endpoint>().is_err());
        assert!(":50051".parse::<Endpoint>().is_err());
        assert!("worker:notaport".parse::<Endpoint>().is_err());
        assert!("a:1:2:3".parse::<Endpoint>().is_err());
    }

    #[test]
    fn endpoints_order_by_host_then_ports() {
        let mut endpoints = vec![
            Endpoint::new("b", 1, 1),
            Endpoint::new("a", 2, 2),
            Endpoint::new("a", 1, 1),
        ];
        endpoints.sort();
        assert_eq!(endpoints[0], Endpoint::new("a", 1, 1));
        assert_eq!(endpoints[2].host(), "b");
    }

    #[test]
    fn query_ids_are_unique() {
        assert_ne!(QueryId::new(), QueryId::new());
    }
}
