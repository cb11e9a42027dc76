//! SIP message codec: wire format <-> structured [`message::SipMessage`].
//!
//! Grounded in spec §4.1. Headers with multiple independent sub-fields
//! (`Via`, `From`/`To`, `CSeq`, the two auth headers) get typed
//! representations; anything else falls into the free-form overflow map on
//! [`headers::Headers`] rather than being dropped.

pub mod headers;
pub mod message;
pub mod sdp;

pub use headers::{AuthParams, CSeq, FromTo, Headers, Via};
pub use message::{ParseError, Request, Response, SipMessage};
pub use sdp::SessionDescription;
