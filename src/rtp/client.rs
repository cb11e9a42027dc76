//! One RTP stream: a socket plus a receive task and a transmit task
//! cooperating over an inbound/outbound jitter buffer pair (spec §4.3).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::VoipResult;
use crate::observer::{CoreObserver, TraceOp};
use crate::rtp::buffer::PacketManager;
use crate::rtp::codec;
use crate::rtp::packet::RtpPacket;
use crate::rtp::{RtpPayloadType, PHONE_EVENT_KEYS};

const SAMPLE_RATE_HZ: u32 = 8000;
const FRAME_SAMPLES: usize = 160;
const FRAME_PERIOD: Duration = Duration::from_millis(1000 * FRAME_SAMPLES as u64 / SAMPLE_RATE_HZ as u64);
const MAX_DATAGRAM: usize = 1500;

/// A callback invoked when a DTMF/telephone-event key arrives with the
/// marker bit set (spec §4.3).
pub type DtmfHandler = Arc<dyn Fn(char) + Send + Sync>;

/// Construction parameters for [`RtpClient::new`] (spec §4.3 contract).
pub struct RtpClientConfig {
    pub codec_assoc: Vec<(u8, RtpPayloadType)>,
    pub in_ip: String,
    pub in_port: u16,
    pub out_ip: String,
    pub out_port: u16,
    pub dtmf_handler: Option<DtmfHandler>,
    pub observer: Arc<dyn CoreObserver>,
}

/// One audio or video RTP stream.
pub struct RtpClient {
    codec_assoc: Vec<(u8, RtpPayloadType)>,
    in_addr: SocketAddr,
    out_addr: Arc<Mutex<SocketAddr>>,
    ssrc: u32,
    inbound: Arc<Mutex<PacketManager>>,
    outbound: Arc<Mutex<PacketManager>>,
    started: Arc<AtomicBool>,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    dtmf_handler: Option<DtmfHandler>,
    observer: Arc<dyn CoreObserver>,
}

impl RtpClient {
    pub fn new(config: RtpClientConfig) -> VoipResult<RtpClient> {
        let in_addr = format!("{}:{}", config.in_ip, config.in_port)
            .parse()
            .map_err(|e| crate::error::VoipError::connection(format!("bad in_addr: {e}")))?;
        let out_addr = format!("{}:{}", config.out_ip, config.out_port)
            .parse()
            .map_err(|e| crate::error::VoipError::connection(format!("bad out_addr: {e}")))?;

        Ok(RtpClient {
            codec_assoc: config.codec_assoc,
            in_addr,
            out_addr: Arc::new(Mutex::new(out_addr)),
            ssrc: rand::random::<u16>() as u32,
            inbound: Arc::new(Mutex::new(PacketManager::new())),
            outbound: Arc::new(Mutex::new(PacketManager::new())),
            started: Arc::new(AtomicBool::new(false)),
            socket: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            dtmf_handler: config.dtmf_handler,
            observer: config.observer,
        })
    }

    /// The codec this client prefers to transmit with: the first entry in
    /// `codec_assoc` (spec §4.3 — PCMA/PCMU usually win by SDP ordering).
    pub fn preference(&self) -> Option<RtpPayloadType> {
        self.codec_assoc.first().map(|(_, p)| *p)
    }

    pub fn is_audio(&self) -> bool {
        self.preference().map(RtpPayloadType::is_audio).unwrap_or(false)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Update the remote peer address (spec §4.5 `renegotiate`).
    pub async fn set_out_addr(&self, out_ip: &str, out_port: u16) -> VoipResult<()> {
        let addr: SocketAddr = format!("{out_ip}:{out_port}")
            .parse()
            .map_err(|e| crate::error::VoipError::connection(format!("bad out_addr: {e}")))?;
        *self.out_addr.lock().await = addr;
        Ok(())
    }

    /// Bind the socket, mark started, and spawn the receive/transmit
    /// tasks. Calling `start` again after `stop` rebinds cleanly.
    pub async fn start(&self) -> VoipResult<()> {
        let socket = UdpSocket::bind(self.in_addr).await?;
        let socket = Arc::new(socket);
        *self.socket.lock().await = Some(socket.clone());
        self.started.store(true, Ordering::SeqCst);

        let preference = self.preference();
        let codec_assoc = self.codec_assoc.clone();
        let dtmf_handler = self.dtmf_handler.clone();
        let inbound = self.inbound.clone();
        let started = self.started.clone();
        let rx_socket = socket.clone();
        let rx_observer = self.observer.clone();
        let rx_task = tokio::spawn(async move {
            receive_loop(rx_socket, codec_assoc, inbound, dtmf_handler, started, rx_observer).await;
        });

        let outbound = self.outbound.clone();
        let out_addr = self.out_addr.clone();
        let started_tx = self.started.clone();
        let ssrc = self.ssrc;
        let tx_socket = socket;
        let tx_observer = self.observer.clone();
        let tx_task = tokio::spawn(async move {
            transmit_loop(tx_socket, out_addr, outbound, preference, ssrc, started_tx, tx_observer).await;
        });

        let mut tasks = self.tasks.lock().await;
        tasks.push(rx_task);
        tasks.push(tx_task);
        Ok(())
    }

    /// Clear the started flag, allow a 1s drain, then abort tasks and
    /// drop the socket (spec §4.3, §5).
    pub async fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        *self.socket.lock().await = None;
    }

    /// Append `data` to the outbound stream.
    pub async fn write(&self, data: &[u8]) {
        self.outbound.lock().await.write_sequential(data);
    }

    /// Read exactly `length` bytes from the inbound stream. When
    /// `blocking` is set and the frame returned is pure silence, wait 10ms
    /// and retry as long as the client remains started (spec §4.3).
    pub async fn read(&self, length: usize, blocking: bool) -> Vec<u8> {
        loop {
            let frame = self.inbound.lock().await.read(length);
            if !blocking || !PacketManager::is_silence(&frame) || !self.is_started() {
                return frame;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    codec_assoc: Vec<(u8, RtpPayloadType)>,
    inbound: Arc<Mutex<PacketManager>>,
    dtmf_handler: Option<DtmfHandler>,
    started: Arc<AtomicBool>,
    observer: Arc<dyn CoreObserver>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    while started.load(Ordering::SeqCst) {
        let (n, _from) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "rtp receive error");
                continue;
            }
        };
        observer.on_trace("rtp_received", &format!("{n} bytes"), &[], TraceOp::Increment).await;
        let Some(pkt) = RtpPacket::parse(&buf[..n]) else {
            trace!("dropped unparseable RTP datagram");
            continue;
        };

        let payload_type = codec_assoc
            .iter()
            .find(|(id, _)| *id == pkt.payload_type)
            .map(|(_, p)| *p)
            .unwrap_or(RtpPayloadType::Unknown(pkt.payload_type));

        match payload_type {
            RtpPayloadType::Pcma => {
                let linear: Vec<u8> = pkt.payload.iter().map(|&b| codec::alaw_to_linear8(b)).collect();
                inbound.lock().await.write(pkt.timestamp, &linear);
            }
            RtpPayloadType::Pcmu => {
                let linear: Vec<u8> = pkt.payload.iter().map(|&b| codec::ulaw_to_linear8(b)).collect();
                inbound.lock().await.write(pkt.timestamp, &linear);
            }
            RtpPayloadType::Event if pkt.marker => {
                if let (Some(handler), Some(&code)) = (&dtmf_handler, pkt.payload.first()) {
                    if let Some(&key) = PHONE_EVENT_KEYS.get(code as usize) {
                        handler(key);
                    }
                }
            }
            _ => {
                debug!(payload_type = pkt.payload_type, "discarding unsupported RTP payload type");
            }
        }
    }
}

async fn transmit_loop(
    socket: Arc<UdpSocket>,
    out_addr: Arc<Mutex<SocketAddr>>,
    outbound: Arc<Mutex<PacketManager>>,
    preference: Option<RtpPayloadType>,
    ssrc: u32,
    started: Arc<AtomicBool>,
    observer: Arc<dyn CoreObserver>,
) {
    let Some(preference) = preference else { return };
    if !preference.is_audio() {
        return;
    }

    let sequence = AtomicU16::new(0);
    let timestamp = AtomicU32::new(0);
    let mut first = true;
    let mut ticker = tokio::time::interval(FRAME_PERIOD);

    while started.load(Ordering::SeqCst) {
        ticker.tick().await;
        let frame = outbound.lock().await.read(FRAME_SAMPLES);
        let encoded: Vec<u8> = match preference {
            RtpPayloadType::Pcma => frame.iter().map(|&b| codec::linear8_to_alaw(b)).collect(),
            RtpPayloadType::Pcmu => frame.iter().map(|&b| codec::linear8_to_ulaw(b)).collect(),
            _ => frame,
        };

        let pkt = RtpPacket {
            version: 2,
            padding: false,
            marker: first,
            payload_type: preference.id(),
            sequence: sequence.fetch_add(1, Ordering::SeqCst),
            timestamp: timestamp.fetch_add(encoded.len() as u32, Ordering::SeqCst),
            ssrc,
            csrc: vec![],
            payload: encoded,
        };
        first = false;

        let addr = *out_addr.lock().await;
        let sent_bytes = pkt.to_bytes();
        match socket.send_to(&sent_bytes, addr).await {
            Ok(n) => observer.on_trace("rtp_sent", &format!("{n} bytes"), &[], TraceOp::Increment).await,
            Err(e) => {
                // Spec §4.3: socket errors are suppressed here; they surface
                // only via sink/source exhaustion visible at higher layers.
                trace!(error = %e, "rtp send suppressed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NullObserver;

    #[tokio::test]
    async fn preference_is_the_first_codec_in_association_order() {
        let client = RtpClient::new(RtpClientConfig {
            codec_assoc: vec![(8, RtpPayloadType::Pcma), (101, RtpPayloadType::Event)],
            in_ip: "127.0.0.1".into(),
            in_port: 0,
            out_ip: "127.0.0.1".into(),
            out_port: 12345,
            dtmf_handler: None,
            observer: Arc::new(NullObserver),
        })
        .unwrap();
        assert_eq!(client.preference(), Some(RtpPayloadType::Pcma));
        assert!(client.is_audio());
    }

    #[tokio::test]
    async fn write_then_read_round_trips_through_outbound_buffer() {
        let client = RtpClient::new(RtpClientConfig {
            codec_assoc: vec![(8, RtpPayloadType::Pcma)],
            in_ip: "127.0.0.1".into(),
            in_port: 0,
            out_ip: "127.0.0.1".into(),
            out_port: 1,
            dtmf_handler: None,
            observer: Arc::new(NullObserver),
        })
        .unwrap();
        client.write(&[1, 2, 3, 4]).await;
        let frame = client.outbound.lock().await.read(4);
        assert_eq!(frame, vec![1, 2, 3, 4]);
    }
}
