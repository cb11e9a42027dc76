//! SDP session description, parsed only when `Content-Type:
//! application/sdp` (spec §4.1).

use std::collections::BTreeMap;
use std::fmt;

/// `o=` origin line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub username: String,
    pub session_id: String,
    pub session_version: String,
    pub network_type: String,
    pub address_type: String,
    pub address: String,
}

/// One `c=` connection line. IPv6 uses the `address/count` form (no ttl);
/// IPv4 multicast uses `address/ttl/count`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub network_type: String,
    pub address_type: String,
    pub address: String,
    pub ttl: Option<u8>,
    pub address_count: u32,
}

impl Connection {
    pub fn unicast(network_type: &str, address_type: &str, address: &str) -> Connection {
        Connection {
            network_type: network_type.to_string(),
            address_type: address_type.to_string(),
            address: address.to_string(),
            ttl: None,
            address_count: 1,
        }
    }
}

/// `t=` timing line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timing {
    pub start: u64,
    pub stop: u64,
}

/// The kind of media carried on an `m=` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Audio,
    Video,
    Other,
}

impl MediaType {
    pub fn parse(s: &str) -> MediaType {
        match s {
            "audio" => MediaType::Audio,
            "video" => MediaType::Video,
            _ => MediaType::Other,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MediaType::Audio => "audio",
            MediaType::Video => "video",
            MediaType::Other => "application",
        })
    }
}

/// How a media stream may flow, from `a=sendrecv`/`sendonly`/`recvonly`/
/// `inactive`. Default is `SendRecv` (spec §3 Call attributes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransmitMode {
    #[default]
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

impl TransmitMode {
    fn parse(attr: &str) -> Option<TransmitMode> {
        match attr {
            "sendrecv" => Some(TransmitMode::SendRecv),
            "sendonly" => Some(TransmitMode::SendOnly),
            "recvonly" => Some(TransmitMode::RecvOnly),
            "inactive" => Some(TransmitMode::Inactive),
            _ => None,
        }
    }

    fn as_attr(&self) -> &'static str {
        match self {
            TransmitMode::SendRecv => "sendrecv",
            TransmitMode::SendOnly => "sendonly",
            TransmitMode::RecvOnly => "recvonly",
            TransmitMode::Inactive => "inactive",
        }
    }
}

/// `a=rtpmap:<id> <name>/<freq>[/<enc>]` and `a=fmtp:<id> <settings>` for a
/// single codec id within one `m=` line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodecAttrs {
    pub rtpmap: Option<String>,
    pub fmtp: Option<String>,
}

/// Returns the RFC 3551 static payload name for a well-known numeric
/// payload type, or `None` for a dynamic/unrecognized id.
pub fn static_payload_name(id: u8) -> Option<&'static str> {
    match id {
        0 => Some("PCMU"),
        8 => Some("PCMA"),
        99 => Some("H264"),
        101 => Some("telephone-event"),
        _ => None,
    }
}

/// One `m=` line plus its associated `a=rtpmap`/`a=fmtp` attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescription {
    pub media_type: MediaType,
    pub port: u16,
    pub port_count: Option<u32>,
    pub protocol: String,
    /// Codec ids listed on the `m=` line, in order.
    pub methods: Vec<u8>,
    /// Per-codec-id attribute bucket; every id in `methods` has an entry
    /// (spec invariant: every `m` references ids present in its
    /// attributes), even if both fields are `None`.
    pub attributes: BTreeMap<u8, CodecAttrs>,
    pub transmit_mode: TransmitMode,
    /// Free-form `a=attr[:value]` lines not otherwise recognized.
    pub free_attributes: BTreeMap<String, String>,
}

impl MediaDescription {
    pub fn new(media_type: MediaType, port: u16, protocol: &str) -> MediaDescription {
        MediaDescription {
            media_type,
            port,
            port_count: None,
            protocol: protocol.to_string(),
            methods: Vec::new(),
            attributes: BTreeMap::new(),
            transmit_mode: TransmitMode::default(),
            free_attributes: BTreeMap::new(),
        }
    }

    pub fn add_codec(&mut self, id: u8, rtpmap: Option<String>, fmtp: Option<String>) {
        self.methods.push(id);
        self.attributes.insert(id, CodecAttrs { rtpmap, fmtp });
    }
}

/// A full SDP body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub version: u32,
    pub origin: Origin,
    pub session_name: String,
    pub connections: Vec<Connection>,
    pub timing: Timing,
    pub media: Vec<MediaDescription>,
    pub free_attributes: BTreeMap<String, String>,
}

impl SessionDescription {
    /// Total address count across all session-level `c=` lines (spec
    /// §4.5: `connections = sum(address_count)`).
    pub fn connection_count(&self) -> u32 {
        self.connections.iter().map(|c| c.address_count).sum()
    }

    pub fn media_of(&self, kind: MediaType) -> impl Iterator<Item = &MediaDescription> {
        self.media.iter().filter(move |m| m.media_type == kind)
    }

    pub fn port_sum(&self, kind: MediaType) -> u32 {
        self.media_of(kind).map(|m| m.port as u32).sum()
    }

    pub fn parse(body: &str) -> Result<SessionDescription, String> {
        let mut version = 0u32;
        let mut origin = None;
        let mut session_name = String::new();
        let mut connections = Vec::new();
        let mut timing = Timing::default();
        let mut media: Vec<MediaDescription> = Vec::new();
        let mut free_attributes = BTreeMap::new();

        for line in body.lines() {
            let line = line.trim_end_matches('\r');
            if line.len() < 2 || line.as_bytes()[1] != b'=' {
                continue;
            }
            let (tag, value) = (line.as_bytes()[0], line[2..].trim());
            match tag {
                b'v' => version = value.parse().unwrap_or(0),
                b'o' => {
                    let f: Vec<&str> = value.split_whitespace().collect();
                    if f.len() >= 6 {
                        origin = Some(Origin {
                            username: f[0].to_string(),
                            session_id: f[1].to_string(),
                            session_version: f[2].to_string(),
                            network_type: f[3].to_string(),
                            address_type: f[4].to_string(),
                            address: f[5].to_string(),
                        });
                    }
                }
                b's' => session_name = value.to_string(),
                b'c' => {
                    if let Some(conn) = parse_connection(value) {
                        match media.last_mut() {
                            Some(m) => {
                                // connection line scoped to this media, stored on the session
                                // list regardless since this system has no per-media c= use.
                                let _ = m;
                                connections.push(conn);
                            }
                            None => connections.push(conn),
                        }
                    }
                }
                b't' => {
                    let f: Vec<&str> = value.split_whitespace().collect();
                    if f.len() >= 2 {
                        timing = Timing {
                            start: f[0].parse().unwrap_or(0),
                            stop: f[1].parse().unwrap_or(0),
                        };
                    }
                }
                b'm' => {
                    if let Some(md) = parse_media_line(value) {
                        media.push(md);
                    }
                }
                b'a' => {
                    parse_attribute_line(value, media.last_mut(), &mut free_attributes);
                }
                _ => {}
            }
        }

        let origin = origin.ok_or("missing o= line")?;
        Ok(SessionDescription { version, origin, session_name, connections, timing, media, free_attributes })
    }

    pub fn to_body_string(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("v={}\r\n", self.version));
        out.push_str(&format!(
            "o={} {} {} {} {} {}\r\n",
            self.origin.username,
            self.origin.session_id,
            self.origin.session_version,
            self.origin.network_type,
            self.origin.address_type,
            self.origin.address
        ));
        out.push_str(&format!("s={}\r\n", if self.session_name.is_empty() { "-" } else { &self.session_name }));
        for c in &self.connections {
            out.push_str(&format!("c={}\r\n", format_connection(c)));
        }
        out.push_str(&format!("t={} {}\r\n", self.timing.start, self.timing.stop));
        for (k, v) in &self.free_attributes {
            out.push_str(&format!("a={k}:{v}\r\n"));
        }
        for m in &self.media {
            let port = match m.port_count {
                Some(c) => format!("{}/{}", m.port, c),
                None => m.port.to_string(),
            };
            let codecs = m.methods.iter().map(u8::to_string).collect::<Vec<_>>().join(" ");
            out.push_str(&format!("m={} {} {} {}\r\n", m.media_type, port, m.protocol, codecs));
            out.push_str(&format!("a={}\r\n", m.transmit_mode.as_attr()));
            for id in &m.methods {
                if let Some(attrs) = m.attributes.get(id) {
                    if let Some(rtpmap) = &attrs.rtpmap {
                        out.push_str(&format!("a=rtpmap:{id} {rtpmap}\r\n"));
                    }
                    if let Some(fmtp) = &attrs.fmtp {
                        out.push_str(&format!("a=fmtp:{id} {fmtp}\r\n"));
                    }
                }
            }
            for (k, v) in &m.free_attributes {
                out.push_str(&format!("a={k}:{v}\r\n"));
            }
        }
        out
    }
}

fn parse_connection(value: &str) -> Option<Connection> {
    let f: Vec<&str> = value.split_whitespace().collect();
    if f.len() < 3 {
        return None;
    }
    let addr_parts: Vec<&str> = f[2].split('/').collect();
    let address = addr_parts[0].to_string();
    let (ttl, address_count) = if f[1] == "IP6" {
        match addr_parts.len() {
            2 => (None, addr_parts[1].parse().unwrap_or(1)),
            _ => (None, 1),
        }
    } else {
        match addr_parts.len() {
            3 => (addr_parts[1].parse().ok(), addr_parts[2].parse().unwrap_or(1)),
            2 => (addr_parts[1].parse().ok(), 1),
            _ => (None, 1),
        }
    };
    Some(Connection {
        network_type: f[0].to_string(),
        address_type: f[1].to_string(),
        address,
        ttl,
        address_count,
    })
}

fn format_connection(c: &Connection) -> String {
    let mut address = c.address.clone();
    if let Some(ttl) = c.ttl {
        address.push_str(&format!("/{ttl}"));
    }
    if c.address_count > 1 {
        address.push_str(&format!("/{}", c.address_count));
    }
    format!("{} {} {}", c.network_type, c.address_type, address)
}

fn parse_media_line(value: &str) -> Option<MediaDescription> {
    let mut tokens = value.split_whitespace();
    let media_type = MediaType::parse(tokens.next()?);
    let port_field = tokens.next()?;
    let (port, port_count) = match port_field.split_once('/') {
        Some((p, c)) => (p.parse().ok()?, c.parse().ok()),
        None => (port_field.parse().ok()?, None),
    };
    let protocol = tokens.next()?.to_string();
    let mut md = MediaDescription::new(media_type, port, &protocol);
    md.port_count = port_count;
    for codec in tokens {
        if let Ok(id) = codec.parse::<u8>() {
            md.add_codec(id, None, None);
        }
    }
    Some(md)
}

fn parse_attribute_line(
    value: &str,
    media: Option<&mut MediaDescription>,
    session_free: &mut BTreeMap<String, String>,
) {
    let (attr, rest) = match value.split_once(':') {
        Some((a, r)) => (a, Some(r)),
        None => (value, None),
    };

    if let Some(mode) = TransmitMode::parse(attr) {
        if let Some(m) = media {
            m.transmit_mode = mode;
        }
        return;
    }

    match (attr, rest, media) {
        ("rtpmap", Some(rest), Some(m)) => {
            if let Some((id, name)) = rest.split_once(' ') {
                if let Ok(id) = id.parse::<u8>() {
                    m.attributes.entry(id).or_default().rtpmap = Some(name.trim().to_string());
                }
            }
        }
        ("fmtp", Some(rest), Some(m)) => {
            if let Some((id, settings)) = rest.split_once(' ') {
                if let Ok(id) = id.parse::<u8>() {
                    m.attributes.entry(id).or_default().fmtp = Some(settings.trim().to_string());
                }
            }
        }
        (attr, rest, Some(m)) => {
            m.free_attributes.insert(attr.to_string(), rest.unwrap_or("").to_string());
        }
        (attr, rest, None) => {
            session_free.insert(attr.to_string(), rest.unwrap_or("").to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "v=0\r\n\
o=D100000 1234 1236 IN IP4 192.168.1.50\r\n\
s=Talk\r\n\
c=IN IP4 192.168.1.50\r\n\
t=0 0\r\n\
m=audio 40564 RTP/AVP 8 101\r\n\
a=sendrecv\r\n\
a=rtpmap:101 telephone-event/8000\r\n\
m=video 40378 RTP/AVP 99\r\n\
a=rtpmap:99 H264/90000\r\n\
a=fmtp:99 profile-level-id=42801F; packetization-mode=1\r\n";

    #[test]
    fn parses_media_lines_and_codec_ids() {
        let sdp = SessionDescription::parse(SAMPLE).unwrap();
        assert_eq!(sdp.connection_count(), 1);
        assert_eq!(sdp.media.len(), 2);
        assert_eq!(sdp.media[0].methods, vec![8, 101]);
        assert_eq!(sdp.media[0].attributes[&101].rtpmap.as_deref(), Some("telephone-event/8000"));
        assert_eq!(sdp.media[1].attributes[&99].fmtp.as_deref(), Some("profile-level-id=42801F; packetization-mode=1"));
    }

    #[test]
    fn audio_port_sum_matches_connections() {
        let sdp = SessionDescription::parse(SAMPLE).unwrap();
        assert_eq!(sdp.port_sum(MediaType::Audio), 40564);
        assert_eq!(sdp.connection_count(), 1);
    }

    #[test]
    fn serializes_and_reparses_to_the_same_structure() {
        let sdp = SessionDescription::parse(SAMPLE).unwrap();
        let body = sdp.to_body_string();
        let reparsed = SessionDescription::parse(&body).unwrap();
        assert_eq!(sdp.media.len(), reparsed.media.len());
        assert_eq!(sdp.media[0].methods, reparsed.media[0].methods);
        assert_eq!(sdp.connection_count(), reparsed.connection_count());
    }
}
