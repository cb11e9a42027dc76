//! Parsing and serializing a single SIP datagram (spec §4.1).

use std::fmt;

use crate::sip::headers::Headers;
use crate::sip::sdp::SessionDescription;

/// A request line plus its headers and optional SDP body.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub uri: String,
    pub headers: Headers,
    pub body: Option<SessionDescription>,
}

/// A status line plus its headers and optional SDP body.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u32,
    pub reason: String,
    pub headers: Headers,
    pub body: Option<SessionDescription>,
}

/// A parsed SIP datagram: either a request or a response.
#[derive(Debug, Clone)]
pub enum SipMessage {
    Request(Request),
    Response(Response),
}

/// Datagram failed to parse as SIP (spec §7 `SipParseError`).
#[derive(Debug, Clone, thiserror::Error)]
#[error("SIP parse error: {0}")]
pub struct ParseError(pub String);

impl SipMessage {
    pub fn headers(&self) -> &Headers {
        match self {
            SipMessage::Request(r) => &r.headers,
            SipMessage::Response(r) => &r.headers,
        }
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        match self {
            SipMessage::Request(r) => &mut r.headers,
            SipMessage::Response(r) => &mut r.headers,
        }
    }

    pub fn body(&self) -> Option<&SessionDescription> {
        match self {
            SipMessage::Request(r) => r.body.as_ref(),
            SipMessage::Response(r) => r.body.as_ref(),
        }
    }

    pub fn as_request(&self) -> Option<&Request> {
        match self {
            SipMessage::Request(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_response(&self) -> Option<&Response> {
        match self {
            SipMessage::Response(r) => Some(r),
            _ => None,
        }
    }

    pub fn call_id(&self) -> Option<&str> {
        self.headers().call_id.as_deref()
    }

    /// Parse a raw UDP datagram. Splits headers from the body at the first
    /// blank line; a missing blank line is treated as an empty body.
    pub fn parse(datagram: &[u8]) -> Result<SipMessage, ParseError> {
        let text = std::str::from_utf8(datagram)
            .map_err(|e| ParseError(format!("non-utf8 datagram: {e}")))?;

        let (head, body) = match text.find("\r\n\r\n") {
            Some(idx) => (&text[..idx], &text[idx + 4..]),
            None => (text, ""),
        };

        let mut lines = head.split("\r\n");
        let heading = lines.next().ok_or_else(|| ParseError("empty datagram".into()))?;

        let mut headers = Headers::default();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            match line.split_once(": ") {
                Some((name, value)) => headers.set(name, value),
                None => return Err(ParseError(format!("malformed header line: {line:?}"))),
            }
        }

        if headers.get_extra("content-encoding").is_some() {
            return Err(ParseError("Content-Encoding not supported".into()));
        }

        let sdp_body = if headers
            .content_type
            .as_deref()
            .map(|ct| ct.eq_ignore_ascii_case("application/sdp"))
            .unwrap_or(false)
            && !body.is_empty()
        {
            Some(SessionDescription::parse(body).map_err(ParseError)?)
        } else {
            None
        };

        if heading.starts_with("SIP/2.0 ") {
            let rest = &heading[8..];
            let (code, phrase) = rest.split_once(' ').unwrap_or((rest, ""));
            let status: u32 = code
                .parse()
                .map_err(|_| ParseError(format!("bad status code: {code:?}")))?;
            return Ok(SipMessage::Response(Response {
                status,
                reason: phrase.to_string(),
                headers,
                body: sdp_body,
            }));
        }

        let tokens: Vec<&str> = heading.split_whitespace().collect();
        if tokens.len() == 3 && tokens[2] == "SIP/2.0" {
            return Ok(SipMessage::Request(Request {
                method: tokens[0].to_string(),
                uri: tokens[1].to_string(),
                headers,
                body: sdp_body,
            }));
        }

        Err(ParseError(format!("unrecognized heading: {heading:?}")))
    }

    /// Serialize back to wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let (heading, headers, body) = match self {
            SipMessage::Request(r) => (format!("{} {} SIP/2.0", r.method, r.uri), &r.headers, &r.body),
            SipMessage::Response(r) => {
                let phrase = if r.reason.is_empty() { default_reason(r.status) } else { r.reason.as_str() };
                (format!("SIP/2.0 {} {}", r.status, phrase), &r.headers, &r.body)
            }
        };

        let body_str = body.as_ref().map(SessionDescription::to_body_string).unwrap_or_default();
        let mut out = String::new();
        out.push_str(&heading);
        out.push_str("\r\n");

        for via in &headers.via {
            out.push_str(&format!("Via: {via}\r\n"));
        }
        if let Some(from) = &headers.from {
            out.push_str(&format!("From: {}\r\n", from.to_header_value()));
        }
        if let Some(to) = &headers.to {
            out.push_str(&format!("To: {}\r\n", to.to_header_value()));
        }
        if let Some(call_id) = &headers.call_id {
            out.push_str(&format!("Call-ID: {call_id}\r\n"));
        }
        if let Some(cseq) = &headers.cseq {
            out.push_str(&format!("CSeq: {cseq}\r\n"));
        }
        if let Some(mf) = headers.max_forwards {
            out.push_str(&format!("Max-Forwards: {mf}\r\n"));
        }
        if let Some(ua) = &headers.user_agent {
            out.push_str(&format!("User-Agent: {ua}\r\n"));
        }
        if let Some(contact) = &headers.contact {
            out.push_str(&format!("Contact: {contact}\r\n"));
        }
        if let Some(auth) = &headers.www_authenticate {
            out.push_str(&format!("WWW-Authenticate: {}\r\n", auth.to_header_value()));
        }
        if let Some(auth) = &headers.authorization {
            out.push_str(&format!("Authorization: {}\r\n", auth.to_header_value()));
        }
        if !headers.allow.is_empty() {
            out.push_str(&format!("Allow: {}\r\n", headers.allow.join(", ")));
        }
        if !headers.supported.is_empty() {
            out.push_str(&format!("Supported: {}\r\n", headers.supported.join(", ")));
        }
        if let Some(expires) = headers.expires {
            out.push_str(&format!("Expires: {expires}\r\n"));
        }
        for (k, v) in &headers.extra {
            out.push_str(&format!("{k}: {v}\r\n"));
        }
        if !body_str.is_empty() {
            out.push_str("Content-Type: application/sdp\r\n");
            out.push_str(&format!("Content-Length: {}\r\n", body_str.len()));
        } else {
            out.push_str("Content-Length: 0\r\n");
        }
        out.push_str("\r\n");
        out.push_str(&body_str);
        out.into_bytes()
    }
}

fn default_reason(status: u32) -> &'static str {
    match status {
        100 => "Trying",
        180 => "Ringing",
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        407 => "Proxy Authentication Required",
        487 => "Request Terminated",
        500 => "Server Internal Error",
        603 => "Decline",
        _ => "Unknown",
    }
}

impl fmt::Display for SipMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SipMessage::Request(r) => write!(f, "{} {}", r.method, r.uri),
            SipMessage::Response(r) => write!(f, "{} {}", r.status, r.reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTER: &[u8] = b"REGISTER sip:217.0.0.1:9740 SIP/2.0\r\n\
Via: SIP/2.0/UDP 127.0.0.1:60266;branch=z9hG4bK1\r\n\
From: <sip:D100000@217.0.0.1:9740>;tag=abc\r\n\
To: <sip:D100000@217.0.0.1:9740>\r\n\
Call-ID: 42707deb5c366d722cf1ae041d97ac1d@217.0.0.1:9740\r\n\
CSeq: 1 REGISTER\r\n\
Max-Forwards: 70\r\n\
Content-Length: 0\r\n\
\r\n";

    #[test]
    fn parses_request_heading_and_headers() {
        let msg = SipMessage::parse(REGISTER).unwrap();
        let req = msg.as_request().unwrap();
        assert_eq!(req.method, "REGISTER");
        assert_eq!(req.uri, "sip:217.0.0.1:9740");
        assert_eq!(req.headers.cseq.as_ref().unwrap().check, 1);
        assert_eq!(msg.call_id(), Some("42707deb5c366d722cf1ae041d97ac1d@217.0.0.1:9740"));
    }

    #[test]
    fn parses_response_heading_with_status_and_phrase() {
        let msg = SipMessage::parse(b"SIP/2.0 401 Unauthorized\r\nCall-ID: x\r\nContent-Length: 0\r\n\r\n").unwrap();
        let resp = msg.as_response().unwrap();
        assert_eq!(resp.status, 401);
        assert_eq!(resp.reason, "Unauthorized");
    }

    #[test]
    fn rejects_unrecognized_heading() {
        let err = SipMessage::parse(b"GARBAGE\r\n\r\n").unwrap_err();
        assert!(err.0.contains("unrecognized heading"));
    }

    #[test]
    fn rejects_content_encoding() {
        let datagram = b"SIP/2.0 200 OK\r\nCall-ID: x\r\nContent-Encoding: gzip\r\nContent-Length: 0\r\n\r\n";
        assert!(SipMessage::parse(datagram).is_err());
    }

    #[test]
    fn roundtrips_a_register_request() {
        let msg = SipMessage::parse(REGISTER).unwrap();
        let bytes = msg.to_bytes();
        let reparsed = SipMessage::parse(&bytes).unwrap();
        assert_eq!(msg.to_string(), reparsed.to_string());
        assert_eq!(msg.call_id(), reparsed.call_id());
    }
}
