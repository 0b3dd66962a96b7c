//! Network-path scenarios
//!
//! The scan matrix runs these in a fixed order against one media server.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::session::{IceGatherPolicy, IceScheme, IceServer, IceTransport};

/// One network-path configuration under test
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    /// Local host candidates only
    Host,
    /// Server-reflexive candidates via STUN
    Stun,
    /// TURN relay over UDP
    TurnUdp,
    /// TURN relay over TCP
    TurnTcp,
    /// TURN relay over TLS
    Turns,
}

impl Scenario {
    /// All scenarios in matrix order
    pub fn all() -> Vec<Scenario> {
        vec![
            Scenario::Host,
            Scenario::Stun,
            Scenario::TurnUdp,
            Scenario::TurnTcp,
            Scenario::Turns,
        ]
    }

    /// Position in the matrix (1-5)
    pub fn number(&self) -> u8 {
        match self {
            Scenario::Host => 1,
            Scenario::Stun => 2,
            Scenario::TurnUdp => 3,
            Scenario::TurnTcp => 4,
            Scenario::Turns => 5,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Scenario::Host => "Host",
            Scenario::Stun => "STUN",
            Scenario::TurnUdp => "TURN/UDP",
            Scenario::TurnTcp => "TURN/TCP",
            Scenario::Turns => "TURNS",
        }
    }

    pub fn slug(&self) -> &'static str {
        match self {
            Scenario::Host => "host",
            Scenario::Stun => "stun",
            Scenario::TurnUdp => "turn-udp",
            Scenario::TurnTcp => "turn-tcp",
            Scenario::Turns => "turns",
        }
    }

    pub fn gather_policy(&self) -> IceGatherPolicy {
        match self {
            Scenario::Host => IceGatherPolicy::All,
            Scenario::Stun => IceGatherPolicy::NoHost,
            Scenario::TurnUdp | Scenario::TurnTcp | Scenario::Turns => IceGatherPolicy::Relay,
        }
    }

    /// Whether `server` may stay in the gathered set for this scenario
    pub fn is_compatible(&self, server: &IceServer) -> bool {
        match self {
            Scenario::Host => false,
            Scenario::Stun => server.scheme == IceScheme::Stun,
            Scenario::TurnUdp => {
                server.scheme == IceScheme::Turn && server.transport == IceTransport::Udp
            }
            Scenario::TurnTcp => {
                server.scheme == IceScheme::Turn && server.transport == IceTransport::Tcp
            }
            Scenario::Turns => server.scheme == IceScheme::Turns,
        }
    }

    pub fn uses_tls(&self) -> bool {
        matches!(self, Scenario::Turns)
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "host" => Ok(Scenario::Host),
            "stun" => Ok(Scenario::Stun),
            "turn-udp" | "turnudp" | "udp" => Ok(Scenario::TurnUdp),
            "turn-tcp" | "turntcp" | "tcp" => Ok(Scenario::TurnTcp),
            "turns" | "turn-tls" | "tls" => Ok(Scenario::Turns),
            other => Err(format!(
                "unknown scenario '{other}' (expected host, stun, turn-udp, turn-tcp or turns)"
            )),
        }
    }
}
