//! Structured representations of the SIP headers this endpoint cares about.
//!
//! Unrecognized headers are preserved verbatim in
//! [`Headers::extra`] rather than dropped, per the free-form overflow map
//! called for in the design notes (spec §9).

use std::collections::BTreeMap;
use std::fmt;

use crate::credentials::LOCAL_SIP_PORT;

/// One hop of a `Via` header.
///
/// ```rust
/// use doorvoip::sip::Via;
///
/// let via = Via::parse("SIP/2.0/UDP 217.0.0.1:9740;branch=z9hG4bK1234").unwrap();
/// assert_eq!(via.address, "217.0.0.1");
/// assert_eq!(via.port, 9740);
/// assert_eq!(via.branch().unwrap(), "z9hG4bK1234");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Via {
    /// e.g. `SIP/2.0/UDP`.
    pub transport: String,
    pub address: String,
    pub port: u16,
    /// Other `k=v` / bare-token parameters in the order encountered.
    /// Bare tokens map to `None`.
    pub params: Vec<(String, Option<String>)>,
}

impl Via {
    pub fn parse(raw: &str) -> Option<Via> {
        let mut parts = raw.split(';').map(str::trim);
        let head = parts.next()?;
        let mut head_tokens = head.split_whitespace();
        let transport = head_tokens.next()?.to_string();
        let hostport = head_tokens.next()?;
        let (address, port) = match hostport.rsplit_once(':') {
            Some((a, p)) => (a.to_string(), p.parse().unwrap_or(LOCAL_SIP_PORT)),
            None => (hostport.to_string(), LOCAL_SIP_PORT),
        };
        let mut params = Vec::new();
        for frag in parts {
            if frag.is_empty() {
                continue;
            }
            match frag.split_once('=') {
                Some((k, v)) => params.push((k.trim().to_string(), Some(v.trim().to_string()))),
                None => params.push((frag.to_string(), None)),
            }
        }
        Some(Via { transport, address, port, params })
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn branch(&self) -> Option<&str> {
        self.param("branch")
    }

    pub fn received(&self) -> Option<&str> {
        self.param("received")
    }

    pub fn rport(&self) -> Option<&str> {
        self.param("rport")
    }

    pub fn set_param(&mut self, key: &str, value: Option<String>) {
        if let Some(entry) = self.params.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
            entry.1 = value;
        } else {
            self.params.push((key.to_string(), value));
        }
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}:{}", self.transport, self.address, self.port)?;
        for (k, v) in &self.params {
            match v {
                Some(v) => write!(f, ";{k}={v}")?,
                None => write!(f, ";{k}")?,
            }
        }
        Ok(())
    }
}

/// A parsed `From`/`To` header: `"Display Name" <sip:number@host>;tag=...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FromTo {
    /// The header value as received, minus the `;tag=` suffix.
    pub raw: String,
    pub tag: Option<String>,
    pub caller: Option<String>,
    pub number: String,
    pub host: String,
}

impl FromTo {
    pub fn parse(value: &str) -> FromTo {
        let (body, tag) = match value.split_once(";tag=") {
            Some((b, t)) => (b.trim(), Some(t.trim().trim_matches('"').to_string())),
            None => (value.trim(), None),
        };

        let mut caller = None;
        let uri_part = if let Some(lt) = body.find('<') {
            let display = body[..lt].trim().trim_matches('"');
            if !display.is_empty() {
                caller = Some(display.to_string());
            }
            body[lt + 1..].trim_end_matches('>').trim()
        } else {
            body
        };

        let (number, host) = match uri_part.strip_prefix("sip:").unwrap_or(uri_part).split_once('@') {
            Some((n, h)) => (n.to_string(), h.to_string()),
            None => (String::new(), uri_part.to_string()),
        };

        FromTo { raw: body.to_string(), tag, caller, number, host }
    }

    pub fn to_header_value(&self) -> String {
        let mut out = match &self.caller {
            Some(c) => format!("\"{c}\" <sip:{}@{}>", self.number, self.host),
            None => format!("<sip:{}@{}>", self.number, self.host),
        };
        if let Some(tag) = &self.tag {
            out.push_str(&format!(";tag={tag}"));
        }
        out
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

/// `CSeq: <n> <METHOD>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CSeq {
    pub check: u32,
    pub method: String,
}

impl CSeq {
    pub fn parse(value: &str) -> Option<CSeq> {
        let mut it = value.split_whitespace();
        let check: u32 = it.next()?.parse().ok()?;
        let method = it.next()?.to_string();
        Some(CSeq { check, method })
    }
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.check, self.method)
    }
}

/// `WWW-Authenticate`/`Authorization` digest parameters (spec §4.1: drop
/// leading `Digest`, split at `", "`, each piece `k=v` with quotes
/// stripped).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthParams {
    pub params: BTreeMap<String, String>,
}

impl AuthParams {
    pub fn parse(value: &str) -> AuthParams {
        let body = value.trim().strip_prefix("Digest").unwrap_or(value).trim();
        let mut params = BTreeMap::new();
        for piece in body.split(", ") {
            if let Some((k, v)) = piece.trim().split_once('=') {
                params.insert(k.trim().to_string(), v.trim().trim_matches('"').to_string());
            }
        }
        AuthParams { params }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn to_header_value(&self) -> String {
        let body = self
            .params
            .iter()
            .map(|(k, v)| {
                if k == "algorithm" || k == "nc" {
                    format!("{k}={v}")
                } else {
                    format!("{k}=\"{v}\"")
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("Digest {body}")
    }
}

/// All headers recognized on a [`crate::sip::SipMessage`], with an overflow
/// map for everything else.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    /// Most recent hop first (spec §3).
    pub via: Vec<Via>,
    pub from: Option<FromTo>,
    pub to: Option<FromTo>,
    pub call_id: Option<String>,
    pub cseq: Option<CSeq>,
    pub contact: Option<String>,
    pub content_type: Option<String>,
    pub content_length: Option<usize>,
    pub www_authenticate: Option<AuthParams>,
    pub authorization: Option<AuthParams>,
    pub allow: Vec<String>,
    pub supported: Vec<String>,
    pub max_forwards: Option<u32>,
    pub user_agent: Option<String>,
    pub expires: Option<u32>,
    /// Unrecognized headers, in the order they were encountered.
    pub extra: Vec<(String, String)>,
}

impl Headers {
    pub fn set(&mut self, name: &str, value: &str) {
        match name.to_ascii_lowercase().as_str() {
            "via" | "v" => self.via.extend(Via::parse(value)),
            "from" | "f" => self.from = Some(FromTo::parse(value)),
            "to" | "t" => self.to = Some(FromTo::parse(value)),
            "call-id" | "i" => self.call_id = Some(value.to_string()),
            "cseq" => self.cseq = CSeq::parse(value),
            "contact" | "m" => self.contact = Some(value.to_string()),
            "content-type" | "c" => self.content_type = Some(value.to_string()),
            "content-length" | "l" => self.content_length = value.trim().parse().ok(),
            "www-authenticate" => self.www_authenticate = Some(AuthParams::parse(value)),
            "authorization" => self.authorization = Some(AuthParams::parse(value)),
            "allow" => self.allow = split_csv(value),
            "supported" | "k" => self.supported = split_csv(value),
            "max-forwards" => self.max_forwards = value.trim().parse().ok(),
            "user-agent" => self.user_agent = Some(value.to_string()),
            "expires" => self.expires = value.trim().parse().ok(),
            _ => self.extra.push((name.to_string(), value.to_string())),
        }
    }

    pub fn get_extra(&self, name: &str) -> Option<&str> {
        self.extra
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn via_parses_transport_address_port_and_branch() {
        let via = Via::parse("SIP/2.0/UDP 217.0.0.1:9740;branch=z9hG4bK1234;rport").unwrap();
        assert_eq!(via.transport, "SIP/2.0/UDP");
        assert_eq!(via.address, "217.0.0.1");
        assert_eq!(via.port, 9740);
        assert_eq!(via.branch(), Some("z9hG4bK1234"));
        assert_eq!(via.rport(), None);
        assert!(via.params.iter().any(|(k, v)| k == "rport" && v.is_none()));
    }

    #[test]
    fn via_defaults_port_when_absent() {
        let via = Via::parse("SIP/2.0/UDP 217.0.0.1;branch=z9hG4bK1").unwrap();
        assert_eq!(via.port, LOCAL_SIP_PORT);
    }

    #[test]
    fn from_to_parses_bracket_form_with_tag() {
        let ft = FromTo::parse("\"Door\" <sip:D100000@217.0.0.1:9740>;tag=abc123");
        assert_eq!(ft.number, "D100000");
        assert_eq!(ft.host, "217.0.0.1:9740");
        assert_eq!(ft.tag.as_deref(), Some("abc123"));
        assert_eq!(ft.caller.as_deref(), Some("Door"));
    }

    #[test]
    fn from_to_roundtrips_through_header_value() {
        let ft = FromTo::parse("<sip:D100000@217.0.0.1:9740>").with_tag("t1");
        assert_eq!(ft.to_header_value(), "<sip:D100000@217.0.0.1:9740>;tag=t1");
    }

    #[test]
    fn cseq_parses_number_and_method() {
        let cseq = CSeq::parse("1 REGISTER").unwrap();
        assert_eq!(cseq.check, 1);
        assert_eq!(cseq.method, "REGISTER");
    }

    #[test]
    fn auth_params_strips_digest_prefix_and_quotes() {
        let auth = AuthParams::parse("Digest realm=\"test-1\", nonce=\"003af036\", algorithm=MD5");
        assert_eq!(auth.get("realm"), Some("test-1"));
        assert_eq!(auth.get("nonce"), Some("003af036"));
        assert_eq!(auth.get("algorithm"), Some("MD5"));
    }

    #[test]
    fn headers_accumulate_multiple_via_but_overwrite_single_occurrence() {
        let mut h = Headers::default();
        h.set("Via", "SIP/2.0/UDP a:1;branch=b1");
        h.set("Via", "SIP/2.0/UDP b:2;branch=b2");
        h.set("Call-ID", "first@x");
        h.set("Call-ID", "second@x");
        assert_eq!(h.via.len(), 2);
        assert_eq!(h.via[0].address, "a");
        assert_eq!(h.call_id.as_deref(), Some("second@x"));
    }

    #[test]
    fn headers_keep_unrecognized_in_extra() {
        let mut h = Headers::default();
        h.set("X-Custom", "value");
        assert_eq!(h.get_extra("x-custom"), Some("value"));
    }
}
