//! SIP Endpoint: registration state machine, digest auth, keepalive, and
//! inbound dispatch (spec §4.4).
//!
//! All socket I/O for signalling is serialized through one task (the
//! receive loop spawned by [`Endpoint::start`]); the registration
//! handshake borrows that task's output via a per-transaction response
//! channel instead of reading the socket itself, per the design note in
//! §9 ("maps to a state machine owned by one task").

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::credentials::{Credentials, EndpointStatus};
use crate::error::{VoipError, VoipResult};
use crate::observer::{CoreObserver, TraceOp};
use crate::rtp::RtpPayloadType;
use crate::sip::headers::{AuthParams, CSeq, FromTo, Headers, Via};
use crate::sip::message::{Request, Response, SipMessage};
use crate::sip::sdp::{Connection, MediaDescription, MediaType, Origin, SessionDescription, Timing};

const REGISTER_TIMEOUT: Duration = Duration::from_secs(10);
const REGISTER_RETRY_BACKOFF: Duration = Duration::from_secs(5);
const MAX_REGISTER_ATTEMPTS: u32 = 20;
const REGISTER_EXPIRES: u32 = 3600;
const RE_REGISTER_MARGIN: u32 = 10;
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);
const KEEPALIVE_BYTES: &[u8] = b"0d0a0d0a";
const MAX_DATAGRAM: usize = 8192;

const ANSWER_ALLOW: &str = "INVITE, ACK, CANCEL, OPTIONS, BYE, REFER, NOTIFY, MESSAGE, SUBSCRIBE, INFO, PRACK, UPDATE";
const USER_AGENT: &str = "Unknown (belle-sip/4.4.0)";

/// A fully negotiated media line, handed to [`Endpoint::answer`] by the
/// call layer.
pub struct AnswerMedia {
    pub media_type: MediaType,
    pub port: u16,
    pub codecs: Vec<(u8, RtpPayloadType)>,
}

/// The registration/signalling endpoint for one set of [`Credentials`].
pub struct Endpoint {
    credentials: Credentials,
    status: Mutex<EndpointStatus>,
    register_call_id: String,
    register_tag: Mutex<Option<String>>,
    register_cseq: AtomicU32,
    bye_cseq: AtomicU32,
    instance_id: Uuid,
    tag_pool: Mutex<HashSet<String>>,
    local_tags: Mutex<HashMap<String, String>>,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    pending_response: Mutex<Option<mpsc::UnboundedSender<Response>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    internet_connected: AtomicBool,
    inbound_tx: mpsc::UnboundedSender<(Request, std::net::SocketAddr)>,
    observer: Arc<dyn CoreObserver>,
}

impl Endpoint {
    /// Construct a new, unstarted endpoint. Returns the endpoint and the
    /// receiver side of its inbound-request channel: every `INVITE`,
    /// `ACK`, `CANCEL`, and `BYE` is forwarded here after the Endpoint's
    /// own automatic responses (100/180/200/487) have been sent.
    pub fn new(credentials: Credentials, observer: Arc<dyn CoreObserver>) -> (Endpoint, mpsc::UnboundedReceiver<(Request, std::net::SocketAddr)>) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let register_call_id = format!("{:032x}@{}:{}", rand::random::<u128>(), credentials.address, credentials.port);
        let endpoint = Endpoint {
            credentials,
            status: Mutex::new(EndpointStatus::Inactive),
            register_call_id,
            register_tag: Mutex::new(None),
            register_cseq: AtomicU32::new(1),
            bye_cseq: AtomicU32::new(1),
            instance_id: Uuid::new_v4(),
            tag_pool: Mutex::new(HashSet::new()),
            local_tags: Mutex::new(HashMap::new()),
            socket: Mutex::new(None),
            pending_response: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            internet_connected: AtomicBool::new(true),
            inbound_tx,
            observer,
        };
        (endpoint, inbound_rx)
    }

    pub async fn status(&self) -> EndpointStatus {
        *self.status.lock().await
    }

    pub fn is_internet_connected(&self) -> bool {
        self.internet_connected.load(Ordering::SeqCst)
    }

    /// Run the registration state machine to completion (spec §4.4.1).
    pub async fn start(self: &Arc<Self>) -> VoipResult<()> {
        {
            let status = self.status.lock().await;
            if matches!(*status, EndpointStatus::Registering | EndpointStatus::Registered) {
                return Err(VoipError::SipAlreadyStarted);
            }
        }

        self.ensure_socket().await?;
        self.ensure_receive_loop();
        *self.status.lock().await = EndpointStatus::Registering;

        match self.register().await {
            Ok(()) => {
                *self.status.lock().await = EndpointStatus::Registered;
                self.arm_re_register_timer();
                self.spawn_keepalive();
                info!(address = %self.credentials.address, "SIP registration succeeded");
                Ok(())
            }
            Err(e) => {
                *self.status.lock().await = EndpointStatus::Failed;
                warn!(error = %e, "SIP registration failed");
                Err(e)
            }
        }
    }

    /// Clear all owned tasks after the 1 s quiescence window and drop the
    /// socket, optionally keeping it (`force`) for an immediate restart
    /// (spec §4.4.1 "safe re-register").
    pub async fn stop(&self, force: bool) {
        *self.status.lock().await = EndpointStatus::Deregistering;
        if self.status().await != EndpointStatus::Inactive {
            if let Err(e) = self.deregister().await {
                debug!(error = %e, "deregister during stop did not complete cleanly");
            }
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        let mut tasks = self.tasks.lock().await;
        for t in tasks.drain(..) {
            t.abort();
        }
        if !force {
            *self.socket.lock().await = None;
        }
        *self.status.lock().await = EndpointStatus::Inactive;
    }

    async fn ensure_socket(&self) -> VoipResult<()> {
        let mut guard = self.socket.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        let addr = self.credentials.local_addr()?;
        let socket = UdpSocket::bind(addr).await?;
        *guard = Some(Arc::new(socket));
        Ok(())
    }

    fn ensure_receive_loop(self: &Arc<Self>) {
        let endpoint = self.clone();
        let task = tokio::spawn(async move {
            endpoint.receive_loop().await;
        });
        // Fire and forget: stored so `stop` can abort it; pushed
        // synchronously is not possible from a non-async fn, so this
        // spawns a tiny helper to register it.
        let endpoint2 = self.clone();
        tokio::spawn(async move {
            endpoint2.tasks.lock().await.push(task);
        });
    }

    async fn receive_loop(self: Arc<Self>) {
        let socket = match self.socket.lock().await.clone() {
            Some(s) => s,
            None => return,
        };
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            if self.status().await == EndpointStatus::Inactive {
                return;
            }
            let (n, from) = match socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "SIP receive error");
                    continue;
                }
            };
            let datagram = &buf[..n];
            if datagram == b"\0\0\0\0" || datagram == b"\r\n" {
                continue;
            }

            let msg = match SipMessage::parse(datagram) {
                Ok(m) => m,
                Err(e) => {
                    debug!(error = %e, from = %from, "dropped unparseable SIP datagram");
                    continue;
                }
            };

            match msg {
                SipMessage::Response(resp) => {
                    let mut pending = self.pending_response.lock().await;
                    if let Some(tx) = pending.as_ref() {
                        let _ = tx.send(resp);
                    } else {
                        trace!(status = resp.status, "ignoring unsolicited SIP response");
                    }
                    let _ = &mut pending;
                }
                SipMessage::Request(req) => self.dispatch_request(req, from).await,
            }
        }
    }

    async fn dispatch_request(&self, req: Request, from: std::net::SocketAddr) {
        match req.method.as_str() {
            "INVITE" => {
                self.reply(&req, 100, from).await;
                self.reply(&req, 180, from).await;
                let _ = self.inbound_tx.send((req, from));
            }
            "CANCEL" => {
                self.reply(&req, 200, from).await;
                self.reply(&req, 487, from).await;
                let _ = self.inbound_tx.send((req, from));
            }
            "BYE" => {
                self.reply(&req, 200, from).await;
                let _ = self.inbound_tx.send((req, from));
            }
            "ACK" => {
                let _ = self.inbound_tx.send((req, from));
            }
            other => {
                debug!(method = other, "ignoring unsupported inbound SIP method");
            }
        }
    }

    async fn reply(&self, req: &Request, status: u32, to: std::net::SocketAddr) {
        let resp = self.default_payload(req, status).await;
        self.send_message(&SipMessage::Response(resp), to).await;
    }

    async fn send_message(&self, msg: &SipMessage, to: std::net::SocketAddr) {
        let Some(socket) = self.socket.lock().await.clone() else { return };
        match socket.send_to(&msg.to_bytes(), to).await {
            Ok(_) => {
                let summary = match msg {
                    SipMessage::Request(r) => r.method.clone(),
                    SipMessage::Response(r) => r.status.to_string(),
                };
                self.observer.on_trace("sip_sent", &summary, &[], TraceOp::Increment).await;
                self.observer.on_trace("sip_sent", &summary, &[], TraceOp::Append).await;
            }
            Err(e) => warn!(error = %e, "failed to send SIP message"),
        }
    }

    /// Reuses the incoming Via/From/To/Call-ID/CSeq with a fresh status
    /// line, assigning a local `To` tag the first time this Call-ID needs
    /// one (spec §4.1, §4.4.5).
    pub async fn default_payload(&self, req: &Request, status: u32) -> Response {
        let mut headers = Headers::default();
        headers.via = req.headers.via.clone();
        headers.from = req.headers.from.clone();
        let call_id = req.headers.call_id.clone();
        let local_tag = match &call_id {
            Some(id) => Some(self.local_tag_for(id).await),
            None => None,
        };
        headers.to = req.headers.to.clone().map(|to| match local_tag {
            Some(tag) => to.with_tag(tag),
            None => to,
        });
        headers.call_id = call_id;
        headers.cseq = req.headers.cseq.clone();
        headers.max_forwards = Some(70);
        headers.user_agent = Some(USER_AGENT.to_string());
        Response { status, reason: String::new(), headers, body: None }
    }

    async fn local_tag_for(&self, call_id: &str) -> String {
        let mut cache = self.local_tags.lock().await;
        if let Some(tag) = cache.get(call_id) {
            return tag.clone();
        }
        let tag = self.generate_tag().await;
        cache.insert(call_id.to_string(), tag.clone());
        tag
    }

    async fn generate_tag(&self) -> String {
        let mut pool = self.tag_pool.lock().await;
        loop {
            let candidate = format!("{:x}", md5::compute(rand::random::<u32>().to_le_bytes()));
            let candidate = candidate[..9].to_string();
            if pool.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    fn new_branch() -> String {
        format!("z9hG4bK{:08x}", rand::random::<u32>())
    }

    fn next_register_cseq(&self) -> u32 {
        self.register_cseq.fetch_add(1, Ordering::SeqCst)
    }

    async fn register_tag(&self) -> String {
        let mut guard = self.register_tag.lock().await;
        if let Some(tag) = guard.as_ref() {
            return tag.clone();
        }
        let tag = self.generate_tag().await;
        *guard = Some(tag.clone());
        tag
    }

    fn build_register_request(&self, cseq: u32, tag: &str, expires: u32, auth: Option<&AuthParams>) -> Request {
        let mut headers = Headers::default();
        headers.via.push(Via {
            transport: "SIP/2.0/UDP".to_string(),
            address: self.credentials.local_ip.clone(),
            port: self.credentials.local_port,
            params: vec![("branch".to_string(), Some(Self::new_branch()))],
        });
        let local_uri = format!("{}:{}", self.credentials.local_ip, self.credentials.local_port);
        headers.from = Some(FromTo {
            raw: String::new(),
            tag: Some(tag.to_string()),
            caller: None,
            number: self.credentials.username.clone(),
            host: format!("{}:{}", self.credentials.address, self.credentials.port),
        });
        headers.to = Some(FromTo {
            raw: String::new(),
            tag: None,
            caller: None,
            number: self.credentials.username.clone(),
            host: format!("{}:{}", self.credentials.address, self.credentials.port),
        });
        headers.call_id = Some(self.register_call_id.clone());
        headers.cseq = Some(CSeq { check: cseq, method: "REGISTER".to_string() });
        headers.max_forwards = Some(70);
        headers.user_agent = Some(USER_AGENT.to_string());
        headers.supported = vec!["replaces".to_string(), "outbound".to_string(), "gruu".to_string()];
        headers.contact = Some(format!(
            "<sip:{}@{};transport=udp>;+sip.instance=\"<urn:uuid:{}>\"",
            self.credentials.username, local_uri, self.instance_id
        ));
        headers.expires = Some(expires);
        headers.extra.push(("Accept".to_string(), "application/sdp".to_string()));
        headers.extra.push(("Accept".to_string(), "text/plain".to_string()));
        headers.extra.push(("Accept".to_string(), "application/vnd.gsma.rcs-ft-http+xml".to_string()));
        if let Some(auth) = auth {
            headers.authorization = Some(auth.clone());
        }

        Request { method: "REGISTER".to_string(), uri: self.credentials.registrar_uri(), headers, body: None }
    }

    fn build_authorization(&self, challenge: &AuthParams, uri: &str) -> VoipResult<AuthParams> {
        let realm = challenge.get("realm").ok_or_else(|| VoipError::UnauthorizedError { reason: "missing realm".into() })?;
        let nonce = challenge.get("nonce").ok_or_else(|| VoipError::UnauthorizedError { reason: "missing nonce".into() })?;
        let response = digest_response(&self.credentials.username, realm, &self.credentials.password, nonce, "REGISTER", uri);

        let mut params = std::collections::BTreeMap::new();
        params.insert("username".to_string(), self.credentials.username.clone());
        params.insert("realm".to_string(), realm.to_string());
        params.insert("nonce".to_string(), nonce.to_string());
        params.insert("uri".to_string(), uri.to_string());
        params.insert("response".to_string(), response);
        params.insert("algorithm".to_string(), "MD5".to_string());
        Ok(AuthParams { params })
    }

    async fn register_transaction(&self, request: &Request) -> VoipResult<Response> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        *self.pending_response.lock().await = Some(tx);
        self.send_message(&SipMessage::Request(request.clone()), self.credentials.server_addr()?).await;

        let deadline = Instant::now() + REGISTER_TIMEOUT;
        let result = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break Err(VoipError::SipTimeout);
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(resp)) if resp.status == 100 => continue,
                Ok(Some(resp)) => break Ok(resp),
                Ok(None) => break Err(VoipError::connection("response channel closed")),
                Err(_) => break Err(VoipError::SipTimeout),
            }
        };
        *self.pending_response.lock().await = None;
        result
    }

    /// Registration handshake (spec §4.4.1, steps 2-6).
    async fn register(&self) -> VoipResult<()> {
        let tag = self.register_tag().await;
        let uri = self.credentials.registrar_uri();
        let mut auth: Option<AuthParams> = None;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            if attempts > MAX_REGISTER_ATTEMPTS {
                return Err(VoipError::SipTimeout);
            }
            let cseq = self.next_register_cseq();
            let request = self.build_register_request(cseq, &tag, REGISTER_EXPIRES, auth.as_ref());
            let response = self.register_transaction(&request).await?;

            match response.status {
                400 => return Err(VoipError::InvalidState { expected: "401 or 200", actual: "400" }),
                401 => {
                    let challenge = response
                        .headers
                        .www_authenticate
                        .clone()
                        .ok_or_else(|| VoipError::UnauthorizedError { reason: "401 without WWW-Authenticate".into() })?;
                    auth = Some(self.build_authorization(&challenge, &uri)?);
                    continue;
                }
                407 => return Err(VoipError::RequestError { reason: "proxy authentication required".into() }),
                200 => return Ok(()),
                s if s >= 500 => {
                    tokio::time::sleep(REGISTER_RETRY_BACKOFF).await;
                    continue;
                }
                other => return Err(VoipError::RequestError { reason: format!("unexpected REGISTER response {other}") }),
            }
        }
    }

    async fn deregister(&self) -> VoipResult<()> {
        let tag = self.register_tag().await;
        let cseq = self.next_register_cseq();
        let request = self.build_register_request(cseq, &tag, 0, None);
        match self.register_transaction(&request).await {
            Ok(resp) if resp.status == 200 || resp.status >= 500 => Ok(()),
            Ok(resp) => Err(VoipError::RequestError { reason: format!("DEREGISTER failed with {}", resp.status) }),
            Err(e) => Err(e),
        }
    }

    fn arm_re_register_timer(self: &Arc<Self>) {
        let endpoint = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs((REGISTER_EXPIRES - RE_REGISTER_MARGIN) as u64)).await;
            *endpoint.status.lock().await = EndpointStatus::Deregistering;
            loop {
                match endpoint.register().await {
                    Ok(()) => {
                        *endpoint.status.lock().await = EndpointStatus::Registered;
                        endpoint.arm_re_register_timer();
                        return;
                    }
                    Err(e) => {
                        warn!(error = %e, "re-registration failed, retrying in 5s");
                        *endpoint.status.lock().await = EndpointStatus::Failed;
                        tokio::time::sleep(REGISTER_RETRY_BACKOFF).await;
                    }
                }
            }
        });
        let endpoint2 = self.clone();
        tokio::spawn(async move {
            endpoint2.tasks.lock().await.push(task);
        });
    }

    fn spawn_keepalive(self: &Arc<Self>) {
        let endpoint = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
            loop {
                ticker.tick().await;
                if endpoint.status().await == EndpointStatus::Inactive {
                    return;
                }
                let Some(socket) = endpoint.socket.lock().await.clone() else { return };
                let addr = match endpoint.credentials.server_addr() {
                    Ok(a) => a,
                    Err(_) => return,
                };
                match socket.send_to(KEEPALIVE_BYTES, addr).await {
                    Ok(_) => {
                        endpoint.internet_connected.store(true, Ordering::SeqCst);
                        endpoint.observer.on_trace("ping_sent", "keepalive", &[], TraceOp::Increment).await;
                    }
                    Err(e) => {
                        warn!(error = %e, "keepalive send failed");
                        endpoint.internet_connected.store(false, Ordering::SeqCst);
                        endpoint.observer.on_trace("ping_failed", &e.to_string(), &[], TraceOp::Increment).await;
                    }
                }
            }
        });
        let endpoint2 = self.clone();
        tokio::spawn(async move {
            endpoint2.tasks.lock().await.push(task);
        });
    }

    /// Build and send a `200 OK` answer to `invite` with the negotiated
    /// media (spec §4.4.5).
    pub async fn answer(&self, invite: &Request, session_id: u32, local_ip: &str, media: &[AnswerMedia], remote: std::net::SocketAddr) -> VoipResult<()> {
        let mut resp = self.default_payload(invite, 200).await;
        let to_raw = resp.headers.to.as_ref().map(|t| format!("{}@{}", t.number, t.host)).unwrap_or_default();
        resp.headers.contact = Some(format!(
            "<sip:{to_raw}>;expires=3600;+sip.instance=\"<urn:uuid:{}>\"",
            self.instance_id
        ));
        resp.headers.allow = ANSWER_ALLOW.split(", ").map(str::to_string).collect();
        resp.headers.content_type = Some("application/sdp".to_string());
        resp.body = Some(build_answer_sdp(session_id, local_ip, &self.credentials.username, media));
        self.send_message(&SipMessage::Response(resp), remote).await;
        Ok(())
    }

    /// Send `603 Decline` for `invite` (spec §4.4.5).
    pub async fn decline(&self, invite: &Request, remote: std::net::SocketAddr) {
        let resp = self.default_payload(invite, 603).await;
        self.send_message(&SipMessage::Response(resp), remote).await;
    }

    /// Send a `BYE` for the dialog established by `invite` (spec §4.4.5).
    pub async fn hangup(&self, invite: &Request, remote: std::net::SocketAddr) {
        let Some(to) = invite.headers.to.clone() else { return };
        let Some(from) = invite.headers.from.clone() else { return };
        let call_id = invite.headers.call_id.clone().unwrap_or_default();
        let local_tag = self.local_tag_for(&call_id).await;

        let mut headers = Headers::default();
        headers.via.push(Via {
            transport: "SIP/2.0/UDP".to_string(),
            address: self.credentials.local_ip.clone(),
            port: self.credentials.local_port,
            params: vec![("branch".to_string(), Some(Self::new_branch()))],
        });
        headers.from = Some(to.with_tag(local_tag));
        headers.to = Some(from);
        headers.call_id = Some(call_id);
        headers.cseq = Some(CSeq { check: self.bye_cseq.fetch_add(1, Ordering::SeqCst), method: "BYE".to_string() });
        headers.max_forwards = Some(70);
        headers.user_agent = Some(USER_AGENT.to_string());

        let request = Request { method: "BYE".to_string(), uri: invite.uri.clone(), headers, body: None };
        self.send_message(&SipMessage::Request(request), remote).await;
    }
}

/// `response = MD5(MD5(user:realm:password) : nonce : MD5(method:uri))`
/// (spec §4.4.1, §8).
pub fn digest_response(user: &str, realm: &str, password: &str, nonce: &str, method: &str, uri: &str) -> String {
    let ha1 = format!("{:x}", md5::compute(format!("{user}:{realm}:{password}")));
    let ha2 = format!("{:x}", md5::compute(format!("{method}:{uri}")));
    format!("{:x}", md5::compute(format!("{ha1}:{nonce}:{ha2}")))
}

fn build_answer_sdp(session_id: u32, local_ip: &str, user: &str, media: &[AnswerMedia]) -> SessionDescription {
    let mut sdp = SessionDescription {
        version: 0,
        origin: Origin {
            username: user.to_string(),
            session_id: session_id.to_string(),
            session_version: (session_id + 2).to_string(),
            network_type: "IN".to_string(),
            address_type: "IP4".to_string(),
            address: local_ip.to_string(),
        },
        session_name: "Talk".to_string(),
        connections: vec![Connection::unicast("IN", "IP4", local_ip)],
        timing: Timing::default(),
        media: Vec::new(),
        free_attributes: Default::default(),
    };

    for m in media {
        let mut line = MediaDescription::new(m.media_type, m.port, "RTP/AVP");
        for (id, codec) in &m.codecs {
            let rtpmap = match codec {
                RtpPayloadType::Pcma | RtpPayloadType::Pcmu => None,
                RtpPayloadType::H264 => Some("H264/90000".to_string()),
                RtpPayloadType::Event => Some("telephone-event/8000".to_string()),
                RtpPayloadType::Unknown(_) => None,
            };
            let fmtp = matches!(codec, RtpPayloadType::H264)
                .then(|| "profile-level-id=42801F; packetization-mode=1".to_string());
            line.add_codec(*id, rtpmap, fmtp);
        }
        sdp.media.push(line);
    }
    sdp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NullObserver;

    #[test]
    fn digest_matches_the_documented_formula() {
        let got = digest_response("D100000", "test-1", "test", "003af036", "REGISTER", "sip:217.0.0.1:9740");
        let ha1 = format!("{:x}", md5::compute("D100000:test-1:test"));
        let ha2 = format!("{:x}", md5::compute("REGISTER:sip:217.0.0.1:9740"));
        let expected = format!("{:x}", md5::compute(format!("{ha1}:003af036:{ha2}")));
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn generate_tag_never_repeats() {
        let (endpoint, _rx) = Endpoint::new(Credentials::new("217.0.0.1", 9740, "D100000", "test", "127.0.0.1", 0), Arc::new(NullObserver));
        let a = endpoint.generate_tag().await;
        let b = endpoint.generate_tag().await;
        assert_ne!(a, b);
        assert_eq!(a.len(), 9);
    }

    #[tokio::test]
    async fn local_tag_is_cached_per_call_id() {
        let (endpoint, _rx) = Endpoint::new(Credentials::new("217.0.0.1", 9740, "D100000", "test", "127.0.0.1", 0), Arc::new(NullObserver));
        let a = endpoint.local_tag_for("call-1").await;
        let b = endpoint.local_tag_for("call-1").await;
        let c = endpoint.local_tag_for("call-2").await;
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
