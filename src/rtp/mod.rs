//! RTP packet manager, wire codec, and per-stream client (spec §4.2–§4.3).

pub mod buffer;
pub mod client;
pub mod codec;
pub mod packet;

pub use buffer::PacketManager;
pub use client::RtpClient;
pub use packet::RtpPacket;

/// RFC 4733 telephone-event key labels, indexed by the event code carried
/// in the first payload byte (spec §4.3: "invokes the dtmf handler with
/// the key label at index `payload[0]`").
pub const PHONE_EVENT_KEYS: [char; 16] =
    ['1', '2', '3', 'A', '4', '5', '6', 'B', '7', '8', '9', 'C', '*', '0', '#', 'D'];

/// The well-known RTP payload types this endpoint negotiates (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RtpPayloadType {
    Pcmu,
    Pcma,
    H264,
    Event,
    /// Any other numeric payload type id, tolerated on receive and logged,
    /// never selected as the transmit preference (spec §4.3).
    Unknown(u8),
}

impl RtpPayloadType {
    pub fn id(&self) -> u8 {
        match self {
            RtpPayloadType::Pcmu => 0,
            RtpPayloadType::Pcma => 8,
            RtpPayloadType::H264 => 99,
            RtpPayloadType::Event => 101,
            RtpPayloadType::Unknown(id) => *id,
        }
    }

    pub fn from_id(id: u8) -> RtpPayloadType {
        match id {
            0 => RtpPayloadType::Pcmu,
            8 => RtpPayloadType::Pcma,
            99 => RtpPayloadType::H264,
            101 => RtpPayloadType::Event,
            other => RtpPayloadType::Unknown(other),
        }
    }

    /// Match by `rtpmap` name when the payload-type id is not a well-known
    /// static number (spec §4.5: "Falls back to matching by `rtpmap` name
    /// when the payload-type id is not a well-known number").
    pub fn from_rtpmap_name(name: &str) -> Option<RtpPayloadType> {
        let name = name.split('/').next().unwrap_or(name);
        match name.to_ascii_uppercase().as_str() {
            "PCMU" => Some(RtpPayloadType::Pcmu),
            "PCMA" => Some(RtpPayloadType::Pcma),
            "H264" => Some(RtpPayloadType::H264),
            "TELEPHONE-EVENT" => Some(RtpPayloadType::Event),
            _ => None,
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, RtpPayloadType::Pcmu | RtpPayloadType::Pcma)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognized_static_ids_round_trip() {
        for id in [0u8, 8, 99, 101] {
            assert_eq!(RtpPayloadType::from_id(id).id(), id);
        }
    }

    #[test]
    fn unknown_id_falls_back_by_rtpmap_name() {
        assert_eq!(RtpPayloadType::from_rtpmap_name("PCMA/8000"), Some(RtpPayloadType::Pcma));
        assert_eq!(RtpPayloadType::from_rtpmap_name("opus/48000/2"), None);
    }
}
