use std::fmt::{Debug, Display};
use std::net::{SocketAddr, ToSocketAddrs};
use std::ops::Deref;

use serde::{Deserialize, Serialize};

/// A listen address given as `host:port` in the config and resolved once at load time.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ListenEndpoint(pub SocketAddr);

impl ListenEndpoint {
    pub fn resolve(value: &str) -> Result<Self, String> {
        value
            .to_socket_addrs()
            .map_err(|e| format!("failed to resolve {value} into a TCP endpoint: {e:?}"))?
            .next()
            .map(Self)
            .ok_or_else(|| format!("failed to resolve {value} into a TCP endpoint"))
    }
}

impl Deref for ListenEndpoint {
    type Target = SocketAddr;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<SocketAddr> for ListenEndpoint {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl<'de> Deserialize<'de> for ListenEndpoint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let v: String = Deserialize::deserialize::<D>(deserializer)?;
        Self::resolve(&v).map_err(serde::de::Error::custom)
    }
}

impl Serialize for ListenEndpoint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.to_string().serialize(serializer)
    }
}

impl Debug for ListenEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl Display for ListenEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_literal_address() {
        let endpoint = ListenEndpoint::resolve("127.0.0.1:2222").unwrap();
        assert_eq!(endpoint.port(), 2222);
        assert!(endpoint.ip().is_loopback());
    }

    #[test]
    fn test_resolve_rejects_missing_port() {
        assert!(ListenEndpoint::resolve("127.0.0.1").is_err());
    }
}
