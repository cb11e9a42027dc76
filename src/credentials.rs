//! SIP registrar credentials and endpoint status.
//!
//! `Credentials` is handed to an [`crate::endpoint::Endpoint`] at
//! construction and is immutable for its lifetime; the refresh loop
//! replaces credentials by constructing a new endpoint rather than mutating
//! one in place (spec §3).
//!
//! # Examples
//!
//! ```rust
//! use doorvoip::credentials::Credentials;
//!
//! let creds = Credentials::new("217.0.0.1", 9740, "D100000", "test", "127.0.0.1", 60266);
//! assert_eq!(creds.registrar_uri(), "sip:217.0.0.1:9740");
//! ```

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::error::{VoipError, VoipResult};

/// The SIP port this endpoint always binds locally to (spec §6).
pub const LOCAL_SIP_PORT: u16 = 60266;

/// Credentials for registering with a single SIP server on behalf of one
/// subscriber account.
///
/// `Deserialize` lets a [`crate::refresh::SipAccountSource`] parse these
/// straight out of the host's account-service JSON response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// SIP registrar host or IP address.
    pub address: String,
    /// SIP registrar port.
    pub port: u16,
    /// Digest auth username, also used as the registering `From` user part.
    pub username: String,
    /// Digest auth password.
    pub password: String,
    /// Local IP to bind the signalling socket to.
    pub local_ip: String,
    /// Local UDP port to bind the signalling socket to (fixed to
    /// [`LOCAL_SIP_PORT`] outside of tests).
    pub local_port: u16,
}

impl Credentials {
    /// Build a new set of credentials, rejecting empty identity fields.
    pub fn new(
        address: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
        local_ip: impl Into<String>,
        local_port: u16,
    ) -> Self {
        Credentials {
            address: address.into(),
            port,
            username: username.into(),
            password: password.into(),
            local_ip: local_ip.into(),
            local_port,
        }
    }

    /// Validate the fields that would otherwise fail obscurely deep inside
    /// the registration handshake.
    pub fn validate(&self) -> VoipResult<()> {
        if self.username.is_empty() || self.address.is_empty() {
            return Err(VoipError::RequestError {
                reason: "credentials must have a non-empty address and username".into(),
            });
        }
        if self.local_port == 0 {
            return Err(VoipError::RequestError {
                reason: "local_port must be nonzero".into(),
            });
        }
        Ok(())
    }

    /// The registrar's SIP URI, as used in the digest `uri=` parameter and
    /// the REGISTER request line (`sip:<addr>:<port>`).
    pub fn registrar_uri(&self) -> String {
        format!("sip:{}:{}", self.address, self.port)
    }

    /// Resolve the registrar's socket address. The registrar is always
    /// addressed by the literal `address`/`port` pair; no DNS SRV/NAPTR
    /// resolution is performed (out of scope, spec §1).
    pub fn server_addr(&self) -> VoipResult<SocketAddr> {
        format!("{}:{}", self.address, self.port)
            .parse()
            .map_err(|e| VoipError::connection(format!("invalid registrar address: {e}")))
    }

    /// Local socket address to bind the signalling socket to.
    pub fn local_addr(&self) -> VoipResult<SocketAddr> {
        format!("{}:{}", self.local_ip, self.local_port)
            .parse()
            .map_err(|e| VoipError::connection(format!("invalid local address: {e}")))
    }

    /// Whether `other` differs in any field the refresh loop treats as
    /// significant (spec §4.7: `sip_address`, `sip_port`, `sip_login`,
    /// `sip_password`).
    pub fn changed_from(&self, other: &Credentials) -> bool {
        self.address != other.address
            || self.port != other.port
            || self.username != other.username
            || self.password != other.password
    }
}

/// Lifecycle status of a [`crate::endpoint::Endpoint`] (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointStatus {
    /// Never started, or fully stopped.
    Inactive,
    /// A REGISTER handshake is in flight.
    Registering,
    /// The last REGISTER succeeded and the re-register timer is armed.
    Registered,
    /// A deregistration handshake is in flight.
    Deregistering,
    /// The endpoint hit an unrecoverable registration error; a retry is
    /// scheduled after the standard 5s back-off (spec §4.4.1 step 4).
    Failed,
}

impl EndpointStatus {
    /// Whether signalling traffic for calls can be routed in this state.
    pub fn is_registered(&self) -> bool {
        matches!(self, EndpointStatus::Registered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials::new("217.0.0.1", 9740, "D100000", "test", "127.0.0.1", LOCAL_SIP_PORT)
    }

    #[test]
    fn registrar_uri_matches_spec_form() {
        assert_eq!(creds().registrar_uri(), "sip:217.0.0.1:9740");
    }

    #[test]
    fn validate_rejects_empty_username() {
        let mut c = creds();
        c.username.clear();
        assert!(c.validate().is_err());
    }

    #[test]
    fn changed_from_detects_password_rotation() {
        let a = creds();
        let mut b = creds();
        b.password = "rotated".into();
        assert!(a.changed_from(&b));
        assert!(!a.changed_from(&a.clone()));
    }
}
