//! ICE server descriptions and gathering policy
//!
//! Connections receive their relay/reflexive servers automatically from the
//! cluster. A filter callback gets the collection before gathering starts and
//! may remove entries the scenario under test must not use.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Candidate gathering policy of a connection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IceGatherPolicy {
    /// Host, reflexive and relay candidates
    All,
    /// Everything except local host candidates
    NoHost,
    /// Relay candidates only
    Relay,
}

impl fmt::Display for IceGatherPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IceGatherPolicy::All => write!(f, "All"),
            IceGatherPolicy::NoHost => write!(f, "NoHost"),
            IceGatherPolicy::Relay => write!(f, "Relay"),
        }
    }
}

/// URL scheme of an ICE server
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceScheme {
    Stun,
    Turn,
    Turns,
}

/// Transport used to reach an ICE server
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceTransport {
    Udp,
    Tcp,
}

/// A single STUN/TURN server, e.g. `turns:turn.example.com:443?transport=tcp`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub url: String,
    pub scheme: IceScheme,
    pub host: String,
    pub port: u16,
    pub transport: IceTransport,
}

impl IceServer {
    /// Parse a `stun:`, `turn:` or `turns:` URL
    pub fn parse(url: &str) -> Option<Self> {
        let (scheme, rest) = url.split_once(':')?;
        let scheme = match scheme.to_lowercase().as_str() {
            "stun" => IceScheme::Stun,
            "turn" => IceScheme::Turn,
            "turns" => IceScheme::Turns,
            _ => return None,
        };

        let (address, query) = match rest.split_once('?') {
            Some((address, query)) => (address, Some(query)),
            None => (rest, None),
        };

        let default_port = if scheme == IceScheme::Turns { 443 } else { 3478 };
        let (host, port) = match address.rsplit_once(':') {
            Some((host, port)) => (host, port.parse().ok()?),
            None => (address, default_port),
        };
        if host.is_empty() {
            return None;
        }

        let transport = query
            .and_then(|q| {
                q.split('&')
                    .filter_map(|pair| pair.split_once('='))
                    .find(|(key, _)| key.eq_ignore_ascii_case("transport"))
                    .map(|(_, value)| value.to_lowercase())
            })
            .map(|value| {
                if value == "tcp" {
                    IceTransport::Tcp
                } else {
                    IceTransport::Udp
                }
            })
            .unwrap_or(if scheme == IceScheme::Turns {
                IceTransport::Tcp
            } else {
                IceTransport::Udp
            });

        Some(Self {
            url: url.to_string(),
            scheme,
            host: host.to_string(),
            port,
            transport,
        })
    }
}

impl fmt::Display for IceServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Mutable set of automatically discovered ICE servers
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IceServerCollection {
    servers: Vec<IceServer>,
}

impl IceServerCollection {
    pub fn new(servers: Vec<IceServer>) -> Self {
        Self { servers }
    }

    pub fn values(&self) -> &[IceServer] {
        &self.servers
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Keep only the servers matching `keep`, returning the removed ones
    pub fn retain(&mut self, mut keep: impl FnMut(&IceServer) -> bool) -> Vec<IceServer> {
        let (kept, removed) = self.servers.drain(..).partition(|s| keep(s));
        self.servers = kept;
        removed
    }
}

/// Callback invoked with the discovered ICE servers before gathering
pub type IceServerFilter = Box<dyn Fn(&mut IceServerCollection) + Send + Sync>;
