//! Error types for the intercom VoIP endpoint.
//!
//! Errors are categorized to match the recovery strategy a caller should
//! apply: some are transient (retry), some mean the credentials or request
//! were rejected outright, and some mean the caller asked for an operation
//! the current state doesn't allow.
//!
//! # Examples
//!
//! ```rust
//! use doorvoip::error::VoipError;
//!
//! let err = VoipError::InvalidState { expected: "ringing", actual: "ended" };
//! assert_eq!(err.category(), "state");
//! assert!(!err.is_recoverable());
//! ```

/// Result type used throughout the crate.
pub type VoipResult<T> = Result<T, VoipError>;

/// Everything that can go wrong while registering, placing media, or
/// parsing wire data.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VoipError {
    /// A socket operation or DNS lookup failed, or the REST transport the
    /// refresh loop depends on could not reach the server.
    #[error("connection error: {reason}")]
    ConnectionError {
        /// Human-readable detail, e.g. the underlying `io::Error` message.
        reason: String,
    },

    /// The REST layer returned 404, or a SIP target (call, RTP client) was
    /// referenced that doesn't exist.
    #[error("not found: {reason}")]
    NotFoundError {
        /// What wasn't found.
        reason: String,
    },

    /// REST 401, or the SIP server rejected our registration credentials.
    #[error("unauthorized: {reason}")]
    UnauthorizedError {
        /// Detail from the server, if any.
        reason: String,
    },

    /// REST >= 400 that isn't 401/404, or a SIP `InvalidAccountInfo`
    /// condition (any REGISTER response other than `200 OK` that wasn't
    /// otherwise recognized, including `407 Proxy Authentication Required`
    /// which this endpoint does not attempt to satisfy).
    #[error("request error: {reason}")]
    RequestError {
        /// Detail from the server, if any.
        reason: String,
    },

    /// An operation was requested that the current state doesn't allow,
    /// e.g. `Call::answer()` on a call that isn't `ringing`.
    #[error("invalid state: expected {expected}, was {actual}")]
    InvalidState {
        /// The state the operation required.
        expected: &'static str,
        /// The state the object was actually in.
        actual: &'static str,
    },

    /// A SIP datagram could not be parsed.
    #[error("SIP parse error: {reason}")]
    SipParseError {
        /// Where parsing failed.
        reason: String,
    },

    /// `Endpoint::start` was called while the endpoint was already running.
    #[error("SIP endpoint already started")]
    SipAlreadyStarted,

    /// A registration transaction exceeded its timeout, or the bounded
    /// retry-on-5xx loop (see design notes) was exhausted.
    #[error("SIP registration timed out")]
    SipTimeout,

    /// An SDP offer's media port counts were inconsistent with its
    /// connection line count (spec §4.5: `audio_ports/|audio_lines| ==
    /// connections` must hold, or the count must be zero).
    #[error("invalid SDP media range: {reason}")]
    InvalidRange {
        /// Detail about which media line/count disagreed.
        reason: String,
    },
}

impl VoipError {
    /// Broad category, useful for metrics/logging without matching on the
    /// full enum.
    ///
    /// ```rust
    /// use doorvoip::error::VoipError;
    /// assert_eq!(VoipError::SipTimeout.category(), "timeout");
    /// ```
    pub fn category(&self) -> &'static str {
        match self {
            VoipError::ConnectionError { .. } => "connection",
            VoipError::NotFoundError { .. } => "not_found",
            VoipError::UnauthorizedError { .. } => "auth",
            VoipError::RequestError { .. } => "request",
            VoipError::InvalidState { .. } => "state",
            VoipError::SipParseError { .. } => "parse",
            VoipError::SipAlreadyStarted => "state",
            VoipError::SipTimeout => "timeout",
            VoipError::InvalidRange { .. } => "media",
        }
    }

    /// Whether retrying the same operation later has a chance of
    /// succeeding without any other change (connection hiccups, timeouts).
    /// Authentication and state errors are not recoverable by retrying.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            VoipError::ConnectionError { .. } | VoipError::SipTimeout
        )
    }

    pub(crate) fn connection(reason: impl Into<String>) -> Self {
        VoipError::ConnectionError { reason: reason.into() }
    }

    pub(crate) fn parse(reason: impl Into<String>) -> Self {
        VoipError::SipParseError { reason: reason.into() }
    }
}

impl From<std::io::Error> for VoipError {
    fn from(e: std::io::Error) -> Self {
        VoipError::connection(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorizes_known_kinds() {
        assert_eq!(VoipError::NotFoundError { reason: "x".into() }.category(), "not_found");
        assert_eq!(VoipError::UnauthorizedError { reason: "x".into() }.category(), "auth");
        assert_eq!(VoipError::SipAlreadyStarted.category(), "state");
    }

    #[test]
    fn only_transport_and_timeout_are_recoverable() {
        assert!(VoipError::ConnectionError { reason: "x".into() }.is_recoverable());
        assert!(VoipError::SipTimeout.is_recoverable());
        assert!(!VoipError::UnauthorizedError { reason: "x".into() }.is_recoverable());
        assert!(!VoipError::InvalidState { expected: "a", actual: "b" }.is_recoverable());
    }

    #[test]
    fn io_error_converts_to_connection_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: VoipError = io_err.into();
        assert_eq!(err.category(), "connection");
    }
}
