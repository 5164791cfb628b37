//! Synthesized failure responses for the edge proxy.
//!
//! Clients pinging a host the proxy cannot serve get a status response that
//! renders as an error in the server list; clients trying to log in get a
//! login disconnect with the same reason.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::packet::Packet;
use crate::protocol::game::{login_disconnect, status_response};

const PREFIX: &str = "§8[§7Wired§8] §c";

/// Why the proxy could not serve a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Backend dial failed
    Offline,
    /// No route for the requested host
    NotFound,
    /// The client's handshake could not be parsed
    NetworkFailure,
}

impl FailureKind {
    /// Version name shown in the server list
    pub fn version_name(self) -> &'static str {
        match self {
            Self::Offline => "§4Offline",
            Self::NotFound => "§4Not found",
            Self::NetworkFailure => "§4Failure",
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Self::Offline => "Server is offline",
            Self::NotFound => "Route not found",
            Self::NetworkFailure => "Network failure",
        }
    }

    /// Reason with the colored brand prefix
    pub fn message(self) -> String {
        format!("{PREFIX}{}", self.reason())
    }

    pub fn status_json(self) -> StatusJson {
        StatusJson {
            version: StatusVersion {
                name: self.version_name().to_string(),
                protocol: 0,
            },
            players: StatusPlayers { max: 0, online: 0 },
            description: StatusDescription {
                text: self.message(),
            },
        }
    }

    /// Status response packet for this failure
    pub fn status_packet(self) -> Packet {
        let json = serde_json::to_string(&self.status_json()).unwrap_or_else(|e| {
            warn!(kind = ?self, error = %e, "Failed to serialize status response, sending empty object");
            String::from("{}")
        });
        status_response(&json)
    }

    /// Login disconnect packet for this failure
    pub fn disconnect_packet(self) -> Packet {
        login_disconnect(&self.message())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusJson {
    pub version: StatusVersion,
    pub players: StatusPlayers,
    pub description: StatusDescription,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusVersion {
    pub name: String,
    pub protocol: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPlayers {
    pub max: u32,
    pub online: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusDescription {
    pub text: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::core::varint::get_string;

    #[test]
    fn not_found_status_json() {
        let packet = FailureKind::NotFound.status_packet();
        assert_eq!(packet.id, 0);
        let mut payload = packet.payload.clone();
        let json: serde_json::Value =
            serde_json::from_str(&get_string(&mut payload).unwrap()).unwrap();

        assert_eq!(json["version"]["name"], "§4Not found");
        assert_eq!(json["version"]["protocol"], 0);
        assert_eq!(json["players"]["max"], 0);
        assert_eq!(json["players"]["online"], 0);
        assert_eq!(json["description"]["text"], "§8[§7Wired§8] §cRoute not found");
    }

    #[test]
    fn status_packet_carries_full_body() {
        for kind in [FailureKind::Offline, FailureKind::NotFound, FailureKind::NetworkFailure] {
            let mut payload = kind.status_packet().payload.clone();
            let body: StatusJson = serde_json::from_str(&get_string(&mut payload).unwrap()).unwrap();
            assert_eq!(body, kind.status_json());
        }
    }

    #[test]
    fn messages() {
        assert_eq!(FailureKind::Offline.message(), "§8[§7Wired§8] §cServer is offline");
        assert_eq!(FailureKind::NetworkFailure.version_name(), "§4Failure");
    }
}
