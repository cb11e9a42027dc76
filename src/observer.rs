//! Observer contract consumed by the host integration (spec §6).
//!
//! The host is a thin layer over this core: it registers one
//! [`CoreObserver`] and receives call-state transitions, endpoint status
//! changes, and bounded diagnostic traces. There is no event bus or
//! filtering here — just direct callbacks, dispatched synchronously or
//! scheduled on the host loop depending on how the
//! [`crate::coordinator::Coordinator`] was constructed.

use async_trait::async_trait;

use crate::call::Call;
use crate::credentials::EndpointStatus;

/// How a [`CoreObserver::on_trace`] call should fold into the
/// accumulated [`crate::coordinator::Diagnostics`] entry for its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceOp {
    /// Bump a named counter by one.
    Increment,
    /// Push `msg` onto a bounded ring buffer for this key.
    Append,
}

/// Observer of core state, implemented by the host integration.
///
/// Default method bodies do nothing, so a host can implement only the
/// callbacks it cares about.
#[async_trait]
pub trait CoreObserver: Send + Sync {
    /// Invoked on every ringing/answered/ended transition of a call.
    async fn on_call(&self, call: &Call) {
        let _ = call;
    }

    /// Invoked on every endpoint status change.
    async fn on_sip_status(&self, status: EndpointStatus) {
        let _ = status;
    }

    /// Invoked for diagnostic accumulation: `key` names a counter or ring
    /// buffer, `msg`/`args` describe the event, `op` says how to fold it
    /// in (spec §6, §9 "explicit Diagnostics struct... do not expose
    /// internal task handles").
    async fn on_trace(&self, key: &'static str, msg: &str, args: &[&str], op: TraceOp) {
        let _ = (key, msg, args, op);
    }
}

/// An observer that does nothing, for tests and hosts that only want
/// diagnostics via [`crate::coordinator::Coordinator::diagnostics`].
#[derive(Debug, Default)]
pub struct NullObserver;

#[async_trait]
impl CoreObserver for NullObserver {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_observer_accepts_every_callback_without_panicking() {
        let obs = NullObserver;
        obs.on_sip_status(EndpointStatus::Registered).await;
        obs.on_trace("sip_sent", "REGISTER", &[], TraceOp::Increment).await;
    }
}
