//! A single SIP dialog's negotiated media and lifecycle state (spec §4.5).
//!
//! A `Call` is created from an inbound `INVITE`'s SDP offer, owns the
//! [`RtpClient`]s it negotiates, and is driven by the
//! [`crate::coordinator::Coordinator`] as SIP events arrive on the wire.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::endpoint::{AnswerMedia, Endpoint};
use crate::error::{VoipError, VoipResult};
use crate::observer::CoreObserver;
use crate::rtp::client::{RtpClient, RtpClientConfig};
use crate::rtp::RtpPayloadType;
use crate::sip::message::Request;
use crate::sip::sdp::{MediaType, SessionDescription, TransmitMode};

const RE_ANSWER_DELAY: std::time::Duration = std::time::Duration::from_secs(2);
pub const RTP_PORT_RANGE: std::ops::Range<u16> = 10_000..20_000;

/// Lifecycle state of a [`Call`] (spec §3: "a monotonic walk through
/// {ringing → answered? → ended}; ended is terminal").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Reserved for a future outbound-call path; never reached by the
    /// inbound-only flow this endpoint implements.
    Dialing,
    Ringing,
    Answered,
    Ended,
}

/// One negotiated media line: the local port this endpoint listens on,
/// and the codecs both sides agreed to for it.
struct MediaLine {
    media_type: MediaType,
    local_port: u16,
    codecs: Vec<(u8, RtpPayloadType)>,
    client: Option<Arc<RtpClient>>,
}

/// A single SIP dialog and the media it carries.
pub struct Call {
    call_id: String,
    state: Mutex<CallState>,
    session_id: u32,
    local_ip: String,
    remote: SocketAddr,
    invite: Mutex<Request>,
    media: Mutex<Vec<MediaLine>>,
    endpoint: Arc<Endpoint>,
    include_video: bool,
    started: AtomicBool,
    re_answer_task: Mutex<Option<JoinHandle<()>>>,
}

impl Call {
    /// Build a `Call` from an inbound `INVITE`'s SDP offer (spec §4.5
    /// creation). `allocate_port` must return a port unique across every
    /// live [`Call`], per the Coordinator's port pool.
    pub fn from_invite(
        invite: Request,
        remote: SocketAddr,
        endpoint: Arc<Endpoint>,
        session_id: u32,
        local_ip: String,
        include_video: bool,
        observer: Arc<dyn CoreObserver>,
        mut allocate_port: impl FnMut() -> u16,
    ) -> VoipResult<Call> {
        let sdp = invite.body.clone().ok_or_else(|| VoipError::InvalidRange { reason: "INVITE has no SDP body".into() })?;
        validate_media_counts(&sdp)?;

        let mut media = Vec::new();
        for m in &sdp.media {
            let codecs = recognized_codecs(m);
            let create_client = m.media_type == MediaType::Audio || (m.media_type == MediaType::Video && include_video);
            let local_port = allocate_port();

            let client = if create_client && !codecs.is_empty() {
                let out_ip = sdp.connections.first().map(|c| c.address.clone()).unwrap_or_else(|| remote.ip().to_string());
                let config = RtpClientConfig {
                    codec_assoc: codecs.clone(),
                    in_ip: local_ip.clone(),
                    in_port: local_port,
                    out_ip,
                    out_port: m.port,
                    dtmf_handler: None,
                    observer: observer.clone(),
                };
                Some(Arc::new(RtpClient::new(config)?))
            } else {
                None
            };

            media.push(MediaLine { media_type: m.media_type, local_port, codecs, client });
        }

        Ok(Call {
            call_id: invite.headers.call_id.clone().unwrap_or_default(),
            state: Mutex::new(CallState::Ringing),
            session_id,
            local_ip,
            remote,
            invite: Mutex::new(invite),
            media: Mutex::new(media),
            endpoint,
            include_video,
            started: AtomicBool::new(false),
            re_answer_task: Mutex::new(None),
        })
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    pub async fn state(&self) -> CallState {
        *self.state.lock().await
    }

    /// Local ports assigned to this call's media lines (spec §3, §4.6
    /// port-uniqueness bookkeeping).
    pub async fn local_ports(&self) -> Vec<u16> {
        self.media.lock().await.iter().map(|m| m.local_port).collect()
    }

    /// Send `200 OK` with the negotiated SDP and start each audio
    /// [`RtpClient`] (spec §4.5 `answer`).
    pub async fn answer(self: &Arc<Self>) -> VoipResult<()> {
        {
            let state = self.state.lock().await;
            if *state != CallState::Ringing {
                return Err(VoipError::InvalidState { expected: "ringing", actual: state_name(*state) });
            }
        }

        if self.started.swap(true, Ordering::SeqCst) {
            self.stop_rtp_clients().await;
        }
        self.start_rtp_clients().await?;

        let invite = self.invite.lock().await.clone();
        let answer_media = self.answer_media().await;
        self.endpoint.answer(&invite, self.session_id, &self.local_ip, &answer_media, self.remote).await?;

        self.schedule_re_answer();
        Ok(())
    }

    /// Invoked once the `ACK` for this dialog arrives.
    pub async fn acknowledge(&self) {
        let mut state = self.state.lock().await;
        if *state == CallState::Ringing {
            *state = CallState::Answered;
            if let Some(task) = self.re_answer_task.lock().await.take() {
                task.abort();
            }
            info!(call_id = %self.call_id, "call answered");
        }
    }

    pub async fn decline(&self) -> VoipResult<()> {
        let mut state = self.state.lock().await;
        if *state != CallState::Ringing {
            return Err(VoipError::InvalidState { expected: "ringing", actual: state_name(*state) });
        }
        let invite = self.invite.lock().await.clone();
        self.endpoint.decline(&invite, self.remote).await;
        *state = CallState::Ended;
        Ok(())
    }

    pub async fn hangup(&self) -> VoipResult<()> {
        {
            let state = self.state.lock().await;
            if *state != CallState::Answered {
                return Err(VoipError::InvalidState { expected: "answered", actual: state_name(*state) });
            }
        }
        self.stop_rtp_clients().await;
        let invite = self.invite.lock().await.clone();
        self.endpoint.hangup(&invite, self.remote).await;
        *self.state.lock().await = CallState::Ended;
        Ok(())
    }

    /// Force-end without signalling, used by the Coordinator on remote
    /// `BYE`/`CANCEL` (spec §4.6) where the acknowledging response has
    /// already been sent by the Endpoint's automatic dispatch.
    pub async fn mark_ended(&self) {
        self.stop_rtp_clients().await;
        *self.state.lock().await = CallState::Ended;
        if let Some(task) = self.re_answer_task.lock().await.take() {
            task.abort();
        }
    }

    pub async fn write_audio(&self, data: &[u8]) -> VoipResult<()> {
        let client = self.first_audio_client().await?;
        client.write(data).await;
        Ok(())
    }

    pub async fn read_audio(&self, length: usize, blocking: bool) -> VoipResult<Vec<u8>> {
        let client = self.first_audio_client().await?;
        Ok(client.read(length, blocking).await)
    }

    /// Re-`INVITE` with updated SDP: regenerate the media map and retarget
    /// each existing [`RtpClient`]'s remote address (spec §4.5
    /// `renegotiate`).
    pub async fn renegotiate(&self, msg: &Request) -> VoipResult<()> {
        let sdp = msg.body.clone().ok_or_else(|| VoipError::InvalidRange { reason: "re-INVITE has no SDP body".into() })?;
        validate_media_counts(&sdp)?;

        let out_ip = sdp.connections.first().map(|c| c.address.clone());
        let media = self.media.lock().await;
        for (line, m) in media.iter().zip(sdp.media.iter()) {
            if let (Some(client), Some(ip)) = (&line.client, &out_ip) {
                client.set_out_addr(ip, m.port).await?;
            }
        }
        *self.invite.lock().await = msg.clone();
        Ok(())
    }

    async fn first_audio_client(&self) -> VoipResult<Arc<RtpClient>> {
        let state = self.state.lock().await;
        if *state != CallState::Answered {
            return Err(VoipError::InvalidState { expected: "answered", actual: state_name(*state) });
        }
        drop(state);
        self.media
            .lock()
            .await
            .iter()
            .find_map(|m| m.client.clone().filter(|c| c.is_audio()))
            .ok_or_else(|| VoipError::NotFoundError { reason: "no audio RTP client negotiated".into() })
    }

    async fn start_rtp_clients(&self) -> VoipResult<()> {
        for line in self.media.lock().await.iter() {
            if let Some(client) = &line.client {
                if client.is_audio() {
                    client.start().await?;
                }
            }
        }
        Ok(())
    }

    async fn stop_rtp_clients(&self) {
        for line in self.media.lock().await.iter() {
            if let Some(client) = &line.client {
                client.stop().await;
            }
        }
    }

    async fn answer_media(&self) -> Vec<AnswerMedia> {
        self.media
            .lock()
            .await
            .iter()
            .map(|m| AnswerMedia { media_type: m.media_type, port: m.local_port, codecs: m.codecs.clone() })
            .collect()
    }

    fn schedule_re_answer(self: &Arc<Self>) {
        let call = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(RE_ANSWER_DELAY).await;
            if call.state().await == CallState::Ringing {
                warn!(call_id = %call.call_id, "no ACK received, retransmitting 200 OK");
                let _ = call.answer().await;
            }
        });
        let call2 = self.clone();
        tokio::spawn(async move {
            *call2.re_answer_task.lock().await = Some(task);
        });
    }
}

fn state_name(state: CallState) -> &'static str {
    match state {
        CallState::Dialing => "dialing",
        CallState::Ringing => "ringing",
        CallState::Answered => "answered",
        CallState::Ended => "ended",
    }
}

/// spec §4.5: `audio_ports/|audio_lines| == connections ∨ audio_ports == 0`
/// (and the same rule for video).
fn validate_media_counts(sdp: &SessionDescription) -> VoipResult<()> {
    let connections = sdp.connection_count();
    check_kind(sdp, MediaType::Audio, connections)?;
    check_kind(sdp, MediaType::Video, connections)?;
    Ok(())
}

fn check_kind(sdp: &SessionDescription, kind: MediaType, connections: u32) -> VoipResult<()> {
    let lines: Vec<_> = sdp.media_of(kind).collect();
    if lines.is_empty() {
        return Ok(());
    }
    let ports: u32 = lines.iter().map(|m| m.port_count.unwrap_or(1)).sum();
    if ports == 0 {
        return Ok(());
    }
    if ports / lines.len() as u32 != connections {
        return Err(VoipError::InvalidRange {
            reason: format!("{kind} ports ({ports}) inconsistent with {} connection(s) across {} line(s)", connections, lines.len()),
        });
    }
    Ok(())
}

fn recognized_codecs(m: &crate::sip::sdp::MediaDescription) -> Vec<(u8, RtpPayloadType)> {
    m.methods
        .iter()
        .filter_map(|&id| {
            let by_id = RtpPayloadType::from_id(id);
            let recognized = matches!(by_id, RtpPayloadType::Pcmu | RtpPayloadType::Pcma | RtpPayloadType::H264 | RtpPayloadType::Event);
            if recognized {
                return Some((id, by_id));
            }
            m.attributes
                .get(&id)
                .and_then(|a| a.rtpmap.as_deref())
                .and_then(RtpPayloadType::from_rtpmap_name)
                .map(|codec| (id, codec))
        })
        .collect()
}

impl Call {
    /// Whether this call still carries `a=sendrecv` (default) rather than
    /// one of the one-directional/inactive transmit modes (spec §3 "send
    /// mode (default sendrecv)").
    pub async fn is_bidirectional(&self) -> bool {
        let invite = self.invite.lock().await;
        invite
            .body
            .as_ref()
            .and_then(|sdp| sdp.media.first())
            .map(|m| m.transmit_mode == TransmitMode::SendRecv)
            .unwrap_or(true)
    }

    pub fn carries_video(&self) -> bool {
        self.include_video
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credentials;
    use crate::observer::NullObserver;
    use crate::sip::headers::{CSeq, FromTo, Headers};
    use crate::sip::sdp::{Connection, MediaDescription, Origin, Timing};

    fn sample_invite() -> Request {
        let mut sdp = SessionDescription {
            version: 0,
            origin: Origin {
                username: "D100000".into(),
                session_id: "1234".into(),
                session_version: "1236".into(),
                network_type: "IN".into(),
                address_type: "IP4".into(),
                address: "192.168.1.50".into(),
            },
            session_name: "Talk".into(),
            connections: vec![Connection::unicast("IN", "IP4", "192.168.1.50")],
            timing: Timing::default(),
            media: Vec::new(),
            free_attributes: Default::default(),
        };
        let mut audio = MediaDescription::new(MediaType::Audio, 40564, "RTP/AVP");
        audio.add_codec(8, None, None);
        audio.add_codec(101, Some("telephone-event/8000".into()), None);
        sdp.media.push(audio);

        let mut headers = Headers::default();
        headers.call_id = Some("42707deb5c366d722cf1ae041d97ac1d@217.0.0.1:9740".into());
        headers.from = Some(FromTo { raw: String::new(), tag: Some("abc".into()), caller: None, number: "5550100".into(), host: "217.0.0.1:9740".into() });
        headers.to = Some(FromTo { raw: String::new(), tag: None, caller: None, number: "D100000".into(), host: "217.0.0.1:9740".into() });
        headers.cseq = Some(CSeq { check: 1, method: "INVITE".into() });

        Request { method: "INVITE".into(), uri: "sip:D100000@217.0.0.1:9740".into(), headers, body: Some(sdp) }
    }

    fn endpoint() -> Arc<Endpoint> {
        let (endpoint, _rx) = Endpoint::new(Credentials::new("217.0.0.1", 9740, "D100000", "test", "127.0.0.1", 0), Arc::new(NullObserver));
        Arc::new(endpoint)
    }

    #[tokio::test]
    async fn creation_assigns_one_port_per_media_line_and_starts_ringing() {
        let mut next_port = 10000u16;
        let call = Call::from_invite(
            sample_invite(),
            "1.2.3.4:5060".parse().unwrap(),
            endpoint(),
            42,
            "127.0.0.1".into(),
            false,
            Arc::new(NullObserver),
            || {
                next_port += 1;
                next_port
            },
        )
        .unwrap();

        assert_eq!(call.state().await, CallState::Ringing);
        assert_eq!(call.local_ports().await.len(), 1);
        assert_eq!(call.call_id(), "42707deb5c366d722cf1ae041d97ac1d@217.0.0.1:9740");
    }

    #[tokio::test]
    async fn write_audio_requires_answered_state() {
        let call = Arc::new(
            Call::from_invite(sample_invite(), "1.2.3.4:5060".parse().unwrap(), endpoint(), 1, "127.0.0.1".into(), false, Arc::new(NullObserver), || {
                10001
            })
            .unwrap(),
        );
        let err = call.write_audio(&[1, 2, 3]).await.unwrap_err();
        assert_eq!(err.category(), "state");
    }

    #[tokio::test]
    async fn decline_requires_ringing_and_terminates_the_call() {
        let call = Arc::new(
            Call::from_invite(sample_invite(), "1.2.3.4:5060".parse().unwrap(), endpoint(), 1, "127.0.0.1".into(), false, Arc::new(NullObserver), || {
                10002
            })
            .unwrap(),
        );
        call.decline().await.unwrap();
        assert_eq!(call.state().await, CallState::Ended);
        assert!(call.decline().await.is_err());
    }
}
