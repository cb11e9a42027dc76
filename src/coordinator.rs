//! VoIP Coordinator: owns the [`Endpoint`] and the live [`Call`] table,
//! assigns ports and session ids, and dispatches call-state events to
//! observers (spec §4.6).

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::call::{Call, RTP_PORT_RANGE};
use crate::credentials::{Credentials, EndpointStatus};
use crate::endpoint::Endpoint;
use crate::error::VoipResult;
use crate::observer::{CoreObserver, TraceOp};
use crate::sip::message::Request;

const CALL_REAP_AFTER: Duration = Duration::from_secs(1800);
const RING_BUFFER_CAP: usize = 20;

/// Counters and bounded ring buffers replacing the reflective
/// per-field diagnostics dump of the source (spec §9, §4.6).
#[derive(Default)]
pub struct Diagnostics {
    pub sip_sent: AtomicU64,
    pub sip_received: AtomicU64,
    pub rtp_sent: AtomicU64,
    pub rtp_received: AtomicU64,
    pub ping_sent: AtomicU64,
    pub ping_failed: AtomicU64,
    recent: Mutex<HashMap<&'static str, VecDeque<String>>>,
}

impl Diagnostics {
    fn counter(&self, key: &'static str) -> Option<&AtomicU64> {
        match key {
            "sip_sent" => Some(&self.sip_sent),
            "sip_received" => Some(&self.sip_received),
            "rtp_sent" => Some(&self.rtp_sent),
            "rtp_received" => Some(&self.rtp_received),
            "ping_sent" => Some(&self.ping_sent),
            "ping_failed" => Some(&self.ping_failed),
            _ => None,
        }
    }

    pub async fn record(&self, key: &'static str, msg: &str, op: TraceOp) {
        match op {
            TraceOp::Increment => {
                if let Some(counter) = self.counter(key) {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }
            TraceOp::Append => {
                let mut recent = self.recent.lock().await;
                let ring = recent.entry(key).or_default();
                if ring.len() >= RING_BUFFER_CAP {
                    ring.pop_front();
                }
                ring.push_back(msg.to_string());
            }
        }
    }

    pub async fn recent(&self, key: &str) -> Vec<String> {
        self.recent.lock().await.get(key).map(|r| r.iter().cloned().collect()).unwrap_or_default()
    }
}

/// Forwards every callback to the host's observer, folding `on_trace`
/// calls into a [`Diagnostics`] along the way. This is the one path by
/// which counters and ring buffers are ever updated — `endpoint` and
/// `rtp::client` only ever see this wrapper, never `self.diagnostics`
/// directly.
struct DiagnosticsObserver {
    inner: Arc<dyn CoreObserver>,
    diagnostics: Arc<Diagnostics>,
}

#[async_trait]
impl CoreObserver for DiagnosticsObserver {
    async fn on_call(&self, call: &Call) {
        self.inner.on_call(call).await;
    }

    async fn on_sip_status(&self, status: EndpointStatus) {
        self.inner.on_sip_status(status).await;
    }

    async fn on_trace(&self, key: &'static str, msg: &str, args: &[&str], op: TraceOp) {
        self.diagnostics.record(key, msg, op).await;
        self.inner.on_trace(key, msg, args, op).await;
    }
}

/// Owns one [`Endpoint`] and its live calls.
///
/// The call table and port/session-id pools are [`DashMap`]/[`DashSet`]
/// rather than a `Mutex`-wrapped `HashMap`: every entry is touched from a
/// short, independent critical section (insert on INVITE, remove on
/// BYE/CANCEL, lookup per inbound message) with no need to hold a lock
/// across an `.await`, which is exactly DashMap's sweet spot (grounded in
/// `call-engine`'s `active_calls: DashMap<SessionId, CallInfo>`).
pub struct Coordinator {
    endpoint: Arc<Endpoint>,
    inbound_rx: Mutex<Option<tokio::sync::mpsc::UnboundedReceiver<(Request, SocketAddr)>>>,
    calls: DashMap<String, Arc<Call>>,
    used_ports: DashSet<u16>,
    used_session_ids: DashSet<u32>,
    local_ip: String,
    include_video: bool,
    observer: Arc<dyn CoreObserver>,
    synchronous: bool,
    diagnostics: Arc<Diagnostics>,
    dispatch_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Coordinator {
    pub fn new(credentials: Credentials, local_ip: String, include_video: bool, observer: Arc<dyn CoreObserver>, synchronous: bool) -> Arc<Coordinator> {
        let diagnostics = Arc::new(Diagnostics::default());
        let observer: Arc<dyn CoreObserver> = Arc::new(DiagnosticsObserver { inner: observer, diagnostics: diagnostics.clone() });
        let (endpoint, inbound_rx) = Endpoint::new(credentials, observer.clone());
        Arc::new(Coordinator {
            endpoint: Arc::new(endpoint),
            inbound_rx: Mutex::new(Some(inbound_rx)),
            calls: DashMap::new(),
            used_ports: DashSet::new(),
            used_session_ids: DashSet::new(),
            local_ip,
            include_video,
            observer,
            synchronous,
            diagnostics,
            dispatch_task: Mutex::new(None),
        })
    }

    pub fn diagnostics(&self) -> Arc<Diagnostics> {
        self.diagnostics.clone()
    }

    pub async fn status(&self) -> EndpointStatus {
        self.endpoint.status().await
    }

    pub fn is_internet_connected(&self) -> bool {
        self.endpoint.is_internet_connected()
    }

    pub async fn call(&self, call_id: &str) -> Option<Arc<Call>> {
        self.calls.get(call_id).map(|e| e.value().clone())
    }

    pub async fn active_call_count(&self) -> usize {
        self.calls.len()
    }

    /// Start the SIP endpoint and the inbound-message dispatch loop.
    pub async fn start(self: &Arc<Self>) -> VoipResult<()> {
        self.endpoint.start().await?;
        self.notify_status().await;
        self.spawn_dispatch_loop().await;
        Ok(())
    }

    /// Stop the endpoint and force-end every live call (spec §4.6).
    pub async fn stop(&self) {
        if let Some(task) = self.dispatch_task.lock().await.take() {
            task.abort();
        }
        self.endpoint.stop(false).await;
        let calls: Vec<_> = self.calls.iter().map(|e| e.value().clone()).collect();
        self.calls.clear();
        join_all(calls.iter().map(|call| call.mark_ended())).await;
        for call in &calls {
            self.observer.on_call(call).await;
        }
        self.notify_status().await;
    }

    /// `stop` then `start`, retrying up to `retry` times spaced by
    /// `sleep` (spec §4.6 `safe_start`).
    pub async fn safe_start(self: &Arc<Self>, retry: u32, sleep: Duration) -> VoipResult<()> {
        let mut attempt = 0;
        loop {
            self.stop().await;
            match self.start().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < retry => {
                    warn!(error = %e, attempt, "safe_start attempt failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(sleep).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn spawn_dispatch_loop(self: &Arc<Self>) {
        let Some(mut rx) = self.inbound_rx.lock().await.take() else { return };
        let coordinator = self.clone();
        let task = tokio::spawn(async move {
            while let Some((req, from)) = rx.recv().await {
                coordinator.clone().handle_request(req, from).await;
            }
        });
        *self.dispatch_task.lock().await = Some(task);
    }

    async fn handle_request(self: Arc<Self>, req: Request, from: SocketAddr) {
        self.observer.on_trace("sip_received", &req.method, &[], TraceOp::Increment).await;
        self.observer.on_trace("sip_received", &req.method, &[], TraceOp::Append).await;
        match req.method.as_str() {
            "INVITE" => self.handle_invite(req, from).await,
            "ACK" => self.handle_ack(req).await,
            "BYE" | "CANCEL" => self.handle_terminate(req).await,
            _ => {}
        }
    }

    async fn handle_invite(self: Arc<Self>, req: Request, from: SocketAddr) {
        let call_id = req.headers.call_id.clone().unwrap_or_default();
        if let Some(call) = self.call(&call_id).await {
            if call.state().await == crate::call::CallState::Ringing {
                return; // duplicate INVITE retransmit
            }
            if let Err(e) = call.renegotiate(&req).await {
                warn!(call_id, error = %e, "renegotiate failed");
            }
            return;
        }

        let session_id = self.allocate_session_id().await;
        let local_ip = self.local_ip.clone();
        let include_video = self.include_video;
        let endpoint = self.endpoint.clone();

        let used_ports = &self.used_ports;
        let observer = self.observer.clone();
        let call = Call::from_invite(req, from, endpoint, session_id, local_ip, include_video, observer, || loop {
            let port = RTP_PORT_RANGE.start + (rand::random::<u16>() % (RTP_PORT_RANGE.end - RTP_PORT_RANGE.start));
            if used_ports.insert(port) {
                return port;
            }
        });

        let call = match call {
            Ok(call) => Arc::new(call),
            Err(e) => {
                warn!(call_id, error = %e, "INVITE SDP rejected, call left un-plumbed");
                return;
            }
        };

        self.calls.insert(call_id.clone(), call.clone());
        self.schedule_reap(call_id, call.clone());
        self.dispatch_call_event(&call).await;
    }

    async fn handle_ack(self: Arc<Self>, req: Request) {
        let call_id = req.headers.call_id.clone().unwrap_or_default();
        if let Some(call) = self.call(&call_id).await {
            let was_ringing = call.state().await == crate::call::CallState::Ringing;
            call.acknowledge().await;
            if was_ringing && call.state().await == crate::call::CallState::Answered {
                self.dispatch_call_event(&call).await;
            }
        }
    }

    async fn handle_terminate(self: Arc<Self>, req: Request) {
        let call_id = req.headers.call_id.clone().unwrap_or_default();
        if let Some((_, call)) = self.calls.remove(&call_id) {
            call.mark_ended().await;
            self.release_ports(&call).await;
            self.dispatch_call_event(&call).await;
        }
    }

    async fn dispatch_call_event(&self, call: &Arc<Call>) {
        if self.synchronous {
            self.observer.on_call(call).await;
        } else {
            let observer = self.observer.clone();
            let call = call.clone();
            tokio::spawn(async move {
                observer.on_call(&call).await;
            });
        }
    }

    async fn notify_status(&self) {
        let status = self.endpoint.status().await;
        self.observer.on_sip_status(status).await;
    }

    async fn allocate_session_id(&self) -> u32 {
        loop {
            let id = 1 + rand::random::<u32>() % 100_000;
            if self.used_session_ids.insert(id) {
                return id;
            }
        }
    }

    async fn release_ports(&self, call: &Call) {
        for port in call.local_ports().await {
            self.used_ports.remove(&port);
        }
    }

    fn schedule_reap(self: &Arc<Self>, call_id: String, call: Arc<Call>) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(CALL_REAP_AFTER).await;
            if coordinator.call(&call_id).await.is_some() {
                info!(call_id, "reaping call with no BYE observed");
                call.mark_ended().await;
                coordinator.calls.remove(&call_id);
                coordinator.release_ports(&call).await;
                coordinator.dispatch_call_event(&call).await;
            }
        });
    }
}
