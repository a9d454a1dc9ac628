//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Which of a mirror's two endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointId {
    /// Primary endpoint, carries the command link when dialed
    A,
    /// Secondary endpoint, the target side
    B,
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointId::A => write!(f, "A"),
            EndpointId::B => write!(f, "B"),
        }
    }
}

/// Whether an endpoint accepts or initiates connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointRole {
    /// Bind and accept on a local port
    Listener,
    /// Connect out to `host:port`
    Dialer,
}

impl fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointRole::Listener => write!(f, "listener"),
            EndpointRole::Dialer => write!(f, "dialer"),
        }
    }
}

/// A classified endpoint address
///
/// An address made only of digits is a local port to listen on; anything
/// else must be `host:port` and is dialed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Address as configured
    pub address: String,
    /// Resolved role
    pub role: EndpointRole,
}

impl Endpoint {
    /// Classify an address
    pub fn parse(address: &str) -> Result<Self, ConfigError> {
        let address = address.trim();
        let invalid = |reason: &str| ConfigError::InvalidEndpoint {
            address: address.to_string(),
            reason: reason.to_string(),
        };

        if address.is_empty() {
            return Err(invalid("empty address"));
        }

        if address.bytes().all(|b| b.is_ascii_digit()) {
            address
                .parse::<u16>()
                .map_err(|_| invalid("port out of range"))?;
            return Ok(Self {
                address: address.to_string(),
                role: EndpointRole::Listener,
            });
        }

        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| invalid("expected a port or host:port"))?;
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        port.parse::<u16>().map_err(|_| invalid("bad port"))?;

        Ok(Self {
            address: address.to_string(),
            role: EndpointRole::Dialer,
        })
    }

    /// Whether this endpoint listens
    pub fn is_listener(&self) -> bool {
        self.role == EndpointRole::Listener
    }

    /// Wildcard bind address for a listener, `None` for a dialer
    pub fn bind_address(&self) -> Option<String> {
        match self.role {
            EndpointRole::Listener => Some(format!("0.0.0.0:{}", self.address)),
            EndpointRole::Dialer => None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.address, self.role)
    }
}

/// The one leg of a pivot session wrapped in a secure session
///
/// The client mirror talks securely towards endpoint A (its command-link
/// peer) and raw towards its target on B. The other mirror is the mirror
/// image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecuredLeg {
    /// Leg A is secured, leg B is raw
    EndpointA,
    /// Leg B is secured, leg A is raw
    EndpointB,
}

impl SecuredLeg {
    /// Map the `client` flag to the secured leg
    pub fn from_client_flag(client: bool) -> Self {
        if client {
            SecuredLeg::EndpointA
        } else {
            SecuredLeg::EndpointB
        }
    }

    /// Whether the given endpoint's leg is secured
    pub fn is_secured(&self, endpoint: EndpointId) -> bool {
        matches!(
            (self, endpoint),
            (SecuredLeg::EndpointA, EndpointId::A) | (SecuredLeg::EndpointB, EndpointId::B)
        )
    }
}

/// Transport protocol of a mirror
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Stream sockets
    #[default]
    Tcp,
}

impl FromStr for Protocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            other => Err(ConfigError::UnsupportedProtocol(other.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
        }
    }
}

/// Lifecycle of a mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MirrorState {
    /// Created, nothing started
    Init,
    /// Endpoints classified and listeners started
    RoleResolved,
    /// Command link dialed (only when endpoint A is a dialer)
    CommandLinkEstablished,
    /// Dispatch loop running
    Serving,
    /// Exit requested, closing links
    Draining,
    /// Fully stopped
    Closed,
}

impl fmt::Display for MirrorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirrorState::Init => write!(f, "init"),
            MirrorState::RoleResolved => write!(f, "role-resolved"),
            MirrorState::CommandLinkEstablished => write!(f, "command-link-established"),
            MirrorState::Serving => write!(f, "serving"),
            MirrorState::Draining => write!(f, "draining"),
            MirrorState::Closed => write!(f, "closed"),
        }
    }
}
