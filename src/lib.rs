//! # doorvoip
//!
//! A minimal SIP/RTP core for a single-line intercom endpoint: register
//! with a SIP registrar, answer inbound calls, and exchange G.711 audio
//! over RTP.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use doorvoip::credentials::Credentials;
//! use doorvoip::coordinator::Coordinator;
//! use doorvoip::observer::NullObserver;
//!
//! # async fn run() -> doorvoip::error::VoipResult<()> {
//! let credentials = Credentials::new("sip.example.com", 5060, "1000", "secret", "0.0.0.0", 60266);
//! let coordinator = Coordinator::new(credentials, "192.0.2.10".into(), false, Arc::new(NullObserver), false);
//! coordinator.start().await?;
//! # Ok(())
//! # }
//! ```
//!
//! The crate is organized around the control flow described in its
//! component design: a [`refresh::RefreshLoop`] resolves credentials and
//! hands them to a [`coordinator::Coordinator`], which starts a SIP
//! [`endpoint::Endpoint`]; inbound `INVITE`s become [`call::Call`]s, each
//! driving one or more [`rtp::RtpClient`]s until `BYE`/`CANCEL` or local
//! hangup.

pub mod call;
pub mod coordinator;
pub mod credentials;
pub mod endpoint;
pub mod error;
pub mod observer;
pub mod refresh;
pub mod rtp;
pub mod sip;

pub use call::Call;
pub use coordinator::Coordinator;
pub use credentials::Credentials;
pub use endpoint::Endpoint;
pub use error::{VoipError, VoipResult};
pub use observer::CoreObserver;
