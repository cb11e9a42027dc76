//! End-to-end scenarios driving a [`Coordinator`] over real localhost UDP
//! sockets against a hand-rolled fake registrar.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use doorvoip::call::CallState;
use doorvoip::coordinator::Coordinator;
use doorvoip::credentials::{Credentials, EndpointStatus};
use doorvoip::observer::CoreObserver;
use doorvoip::sip::headers::{AuthParams, CSeq, FromTo, Headers};
use doorvoip::sip::message::{Request, Response, SipMessage};
use doorvoip::sip::sdp::{Connection, MediaDescription, MediaType, Origin, SessionDescription, Timing};
use doorvoip::Call;

/// A minimal fake registrar: answers REGISTER with a configurable sequence
/// of statuses and can send arbitrary datagrams of its own to a peer.
struct FakeRegistrar {
    socket: UdpSocket,
}

impl FakeRegistrar {
    async fn bind(addr: &str) -> FakeRegistrar {
        FakeRegistrar { socket: UdpSocket::bind(addr).await.unwrap() }
    }

    fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr().unwrap()
    }

    async fn recv_request(&self) -> (Request, SocketAddr) {
        let mut buf = vec![0u8; 8192];
        let (n, from) = self.socket.recv_from(&mut buf).await.unwrap();
        match SipMessage::parse(&buf[..n]).unwrap() {
            SipMessage::Request(r) => (r, from),
            SipMessage::Response(_) => panic!("expected a request"),
        }
    }

    async fn reply(&self, to: SocketAddr, req: &Request, status: u32, www_authenticate: Option<AuthParams>) {
        let mut headers = Headers::default();
        headers.via = req.headers.via.clone();
        headers.from = req.headers.from.clone();
        headers.to = req.headers.to.clone().map(|t| t.with_tag("srv-tag"));
        headers.call_id = req.headers.call_id.clone();
        headers.cseq = req.headers.cseq.clone();
        headers.www_authenticate = www_authenticate;
        let resp = Response { status, reason: String::new(), headers, body: None };
        self.socket.send_to(&SipMessage::Response(resp).to_bytes(), to).await.unwrap();
    }

    async fn send_request(&self, to: SocketAddr, req: &Request) {
        self.socket.send_to(&SipMessage::Request(req.clone()).to_bytes(), to).await.unwrap();
    }
}

#[derive(Default)]
struct RecordingObserver {
    calls: Mutex<Vec<(String, CallState)>>,
}

#[async_trait]
impl CoreObserver for RecordingObserver {
    async fn on_call(&self, call: &Call) {
        self.calls.lock().await.push((call.call_id().to_string(), call.state().await));
    }
}

fn invite_with_sdp(call_id: &str, audio_port: u16, video_port: Option<u16>) -> Request {
    let mut sdp = SessionDescription {
        version: 0,
        origin: Origin {
            username: "D100000".into(),
            session_id: "1234".into(),
            session_version: "1236".into(),
            network_type: "IN".into(),
            address_type: "IP4".into(),
            address: "127.0.0.1".into(),
        },
        session_name: "Talk".into(),
        connections: vec![Connection::unicast("IN", "IP4", "127.0.0.1")],
        timing: Timing::default(),
        media: Vec::new(),
        free_attributes: Default::default(),
    };
    let mut audio = MediaDescription::new(MediaType::Audio, audio_port, "RTP/AVP");
    audio.add_codec(8, None, None);
    audio.add_codec(101, Some("telephone-event/8000".into()), None);
    sdp.media.push(audio);
    if let Some(port) = video_port {
        let mut video = MediaDescription::new(MediaType::Video, port, "RTP/AVP");
        video.add_codec(99, Some("H264/90000".into()), None);
        sdp.media.push(video);
    }

    let mut headers = Headers::default();
    headers.via.push(doorvoip::sip::Via { transport: "SIP/2.0/UDP".into(), address: "217.0.0.1".into(), port: 9740, params: vec![] });
    headers.from = Some(FromTo { raw: String::new(), tag: Some("caller-tag".into()), caller: None, number: "5550100".into(), host: "217.0.0.1:9740".into() });
    headers.to = Some(FromTo { raw: String::new(), tag: None, caller: None, number: "D100000".into(), host: "127.0.0.1:60266".into() });
    headers.call_id = Some(call_id.to_string());
    headers.cseq = Some(CSeq { check: 1, method: "INVITE".into() });

    Request { method: "INVITE".into(), uri: "sip:D100000@127.0.0.1:60266".into(), headers, body: Some(sdp) }
}

/// S1: registration happy path. The registrar challenges REGISTER #1 with
/// `401`, accepts REGISTER #2 with `200 OK`.
#[tokio::test]
async fn registration_happy_path_reaches_registered() {
    let registrar = FakeRegistrar::bind("127.0.0.1:0").await;
    let registrar_addr = registrar.local_addr();

    let credentials = Credentials::new(registrar_addr.ip().to_string(), registrar_addr.port(), "D100000", "test", "127.0.0.1", 0);
    let coordinator = Coordinator::new(credentials, "127.0.0.1".into(), false, Arc::new(RecordingObserver::default()), true);

    let server = tokio::spawn(async move {
        let (req1, from) = registrar.recv_request().await;
        assert_eq!(req1.headers.cseq.as_ref().unwrap().check, 1);
        let mut challenge = AuthParams::default();
        challenge.params.insert("realm".into(), "test-1".into());
        challenge.params.insert("nonce".into(), "003af036".into());
        registrar.reply(from, &req1, 401, Some(challenge)).await;

        let (req2, from2) = registrar.recv_request().await;
        assert_eq!(req2.headers.cseq.as_ref().unwrap().check, 2);
        assert!(req2.headers.authorization.is_some());
        registrar.reply(from2, &req2, 200, None).await;
    });

    coordinator.start().await.unwrap();
    server.await.unwrap();
    assert_eq!(coordinator.status().await, EndpointStatus::Registered);
}

/// S3: a `400 Bad Request` on the first REGISTER surfaces as `InvalidState`
/// and leaves the endpoint `failed`.
#[tokio::test]
async fn bad_request_on_first_register_fails_the_endpoint() {
    let registrar = FakeRegistrar::bind("127.0.0.1:0").await;
    let registrar_addr = registrar.local_addr();

    let credentials = Credentials::new(registrar_addr.ip().to_string(), registrar_addr.port(), "D100000", "test", "127.0.0.1", 0);
    let coordinator = Coordinator::new(credentials, "127.0.0.1".into(), false, Arc::new(RecordingObserver::default()), true);

    let server = tokio::spawn(async move {
        let (req, from) = registrar.recv_request().await;
        registrar.reply(from, &req, 400, None).await;
    });

    let err = coordinator.start().await.unwrap_err();
    server.await.unwrap();
    assert_eq!(err.category(), "state");
    assert_eq!(coordinator.status().await, EndpointStatus::Failed);
}

/// S4: an inbound INVITE becomes a ringing Call with the SDP's codec
/// association, and `answer()` moves it to `answered` once ACK arrives.
#[tokio::test]
async fn inbound_invite_rings_then_answers() {
    let registrar = FakeRegistrar::bind("127.0.0.1:0").await;
    let registrar_addr = registrar.local_addr();
    let credentials = Credentials::new(registrar_addr.ip().to_string(), registrar_addr.port(), "D100000", "test", "127.0.0.1", 0);
    let observer = Arc::new(RecordingObserver::default());
    let coordinator = Coordinator::new(credentials, "127.0.0.1".into(), false, observer.clone(), true);

    let server = tokio::spawn(async move {
        let (req, from) = registrar.recv_request().await;
        registrar.reply(from, &req, 200, None).await;
        (registrar, from)
    });
    coordinator.start().await.unwrap();
    let (registrar, endpoint_addr) = server.await.unwrap();

    let call_id = "42707deb5c366d722cf1ae041d97ac1d@217.0.0.1:9740";
    let invite = invite_with_sdp(call_id, 40564, Some(40378));
    registrar.send_request(endpoint_addr, &invite).await;

    // 100 Trying, 180 Ringing are sent automatically by the endpoint.
    for _ in 0..2 {
        let mut buf = vec![0u8; 2048];
        registrar.socket.recv_from(&mut buf).await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    let call = coordinator.call(call_id).await.expect("call should be tracked");
    assert_eq!(call.state().await, CallState::Ringing);
    assert_eq!(call.local_ports().await.len(), 2);

    call.answer().await.unwrap();
    let mut buf = vec![0u8; 4096];
    let (n, _) = registrar.socket.recv_from(&mut buf).await.unwrap();
    let resp = SipMessage::parse(&buf[..n]).unwrap();
    assert_eq!(resp.as_response().unwrap().status, 200);

    let mut ack = invite.clone();
    ack.method = "ACK".into();
    registrar.send_request(endpoint_addr, &ack).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(call.state().await, CallState::Answered);
}

/// S5: a CANCEL before ACK ends the call and removes it from the
/// coordinator's table.
#[tokio::test]
async fn cancel_before_answer_ends_the_call() {
    let registrar = FakeRegistrar::bind("127.0.0.1:0").await;
    let registrar_addr = registrar.local_addr();
    let credentials = Credentials::new(registrar_addr.ip().to_string(), registrar_addr.port(), "D100000", "test", "127.0.0.1", 0);
    let coordinator = Coordinator::new(credentials, "127.0.0.1".into(), false, Arc::new(RecordingObserver::default()), true);

    let server = tokio::spawn(async move {
        let (req, from) = registrar.recv_request().await;
        registrar.reply(from, &req, 200, None).await;
        (registrar, from)
    });
    coordinator.start().await.unwrap();
    let (registrar, endpoint_addr) = server.await.unwrap();

    let call_id = "cancel-test@217.0.0.1:9740";
    let invite = invite_with_sdp(call_id, 40566, None);
    registrar.send_request(endpoint_addr, &invite).await;
    for _ in 0..2 {
        let mut buf = vec![0u8; 2048];
        registrar.socket.recv_from(&mut buf).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(coordinator.call(call_id).await.is_some());

    let mut cancel = invite.clone();
    cancel.method = "CANCEL".into();
    registrar.send_request(endpoint_addr, &cancel).await;

    for expected in [200, 487] {
        let mut buf = vec![0u8; 2048];
        let (n, _) = registrar.socket.recv_from(&mut buf).await.unwrap();
        let resp = SipMessage::parse(&buf[..n]).unwrap();
        assert_eq!(resp.as_response().unwrap().status, expected);
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(coordinator.call(call_id).await.is_none());
}
