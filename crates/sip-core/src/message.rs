//! SIP message classification and header extraction
//!
//! A received datagram is classified from its first line and then queried by
//! header name. Extraction is bounded: every owned accessor enforces
//! [`MAX_HEADER_VALUE`] and returns an error instead of truncating.

use std::fmt;

use crate::error::{Error, Result};

/// Upper bound on any single extracted header value.
pub const MAX_HEADER_VALUE: usize = 256;

/// SIP methods understood by the endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Register,
    Invite,
    Ack,
    Bye,
    Cancel,
    Options,
}

impl Method {
    /// Parse a method token, case-sensitive as on the wire
    pub fn parse(token: &str) -> Option<Method> {
        match token {
            "REGISTER" => Some(Method::Register),
            "INVITE" => Some(Method::Invite),
            "ACK" => Some(Method::Ack),
            "BYE" => Some(Method::Bye),
            "CANCEL" => Some(Method::Cancel),
            "OPTIONS" => Some(Method::Options),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Register => "REGISTER",
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the first line of a datagram says it is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// A request with a method this endpoint knows
    Request(Method),
    /// A request with an unrecognized method (answered 501 upstream)
    UnknownRequest,
    /// A response with its status code
    Response(u16),
}

/// A parsed view over a raw SIP datagram
///
/// Borrows the datagram text; all queries scan the header section (up to the
/// first empty line). Header name matching is case-insensitive.
#[derive(Debug, Clone)]
pub struct SipMessage<'a> {
    text: &'a str,
    kind: MessageKind,
}

impl<'a> SipMessage<'a> {
    /// Classify a datagram from its first line
    pub fn parse(text: &'a str) -> Result<SipMessage<'a>> {
        let first_line = text.lines().next().unwrap_or("").trim_end_matches('\r');

        let kind = if let Some(rest) = first_line.strip_prefix("SIP/2.0 ") {
            let code_str = rest.split_whitespace().next().unwrap_or("");
            let code = code_str.parse::<u16>().map_err(|_| Error::InvalidField {
                field: "status code",
                value: code_str.to_string(),
            })?;
            MessageKind::Response(code)
        } else if first_line.ends_with(" SIP/2.0") {
            let token = first_line.split_whitespace().next().unwrap_or("");
            match Method::parse(token) {
                Some(method) => MessageKind::Request(method),
                None => MessageKind::UnknownRequest,
            }
        } else {
            return Err(Error::NotSip);
        };

        Ok(SipMessage { text, kind })
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn is_response(&self) -> bool {
        matches!(self.kind, MessageKind::Response(_))
    }

    pub fn status_code(&self) -> Option<u16> {
        match self.kind {
            MessageKind::Response(code) => Some(code),
            _ => None,
        }
    }

    /// The raw datagram text this message was parsed from
    pub fn text(&self) -> &'a str {
        self.text
    }

    /// Raw value of the first header with the given name, up to end of line
    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.header_lines(name).next()
    }

    /// All values for a header that may repeat (Via, Record-Route)
    pub fn headers_all(&self, name: &str) -> Vec<&'a str> {
        self.header_lines(name).collect()
    }

    /// Bounded owned copy of a header value; errors if absent or oversized
    pub fn header_required(&self, name: &'static str) -> Result<String> {
        let value = self.header(name).ok_or(Error::MissingHeader { name })?;
        bounded(name, value)
    }

    /// Bounded URI extracted from a header value
    ///
    /// Strips a display name and angle brackets when present, otherwise cuts
    /// the value at the first parameter separator. `From: "Bob" <sip:b@h>;tag=x`
    /// and `Call-ID: abc@host` both come out as the bare value.
    pub fn header_uri(&self, name: &'static str) -> Result<String> {
        let value = self.header(name).ok_or(Error::MissingHeader { name })?;
        let uri = match value.find('<') {
            Some(lt) => {
                let after = &value[lt + 1..];
                after.split('>').next().unwrap_or(after)
            }
            None => value.split(';').next().unwrap_or(value),
        };
        bounded(name, uri.trim())
    }

    /// A `name=value` parameter of a header, e.g. the From tag
    pub fn header_param(&self, name: &str, param: &str) -> Option<String> {
        let value = self.header(name)?;
        let needle = format!("{param}=");
        let start = value.find(&needle)? + needle.len();
        let rest = &value[start..];
        let end = rest
            .find(|c| matches!(c, ';' | '>' | '"' | ',' | ' '))
            .unwrap_or(rest.len());
        if end == 0 {
            return None;
        }
        Some(rest[..end].to_string())
    }

    /// CSeq sequence number and method token
    pub fn cseq(&self) -> Result<(u32, String)> {
        let value = self.header("CSeq").ok_or(Error::MissingHeader { name: "CSeq" })?;
        let mut parts = value.split_whitespace();
        let number = parts.next().unwrap_or("");
        let seq = number.parse::<u32>().map_err(|_| Error::InvalidField {
            field: "CSeq",
            value: number.to_string(),
        })?;
        let method = parts.next().unwrap_or("").to_string();
        Ok((seq, method))
    }

    /// Expires header value in seconds, if present and numeric
    pub fn expires(&self) -> Option<u32> {
        self.header("Expires")?.trim().parse().ok()
    }

    /// First Via line, as sent by the nearest hop
    pub fn first_via(&self) -> Option<&'a str> {
        self.header("Via")
    }

    /// Message body, after the blank line separating it from the headers
    pub fn body(&self) -> Option<&'a str> {
        let idx = self.text.find("\r\n\r\n")?;
        let body = &self.text[idx + 4..];
        if body.is_empty() {
            None
        } else {
            Some(body)
        }
    }

    fn header_lines(&self, name: &str) -> impl Iterator<Item = &'a str> + '_ {
        let name = name.to_string();
        self.text
            .lines()
            .take_while(|line| !line.trim_end_matches('\r').is_empty())
            .filter_map(move |line| {
                let line = line.trim_end_matches('\r');
                let (head, value) = line.split_once(':')?;
                if head.trim().eq_ignore_ascii_case(&name) {
                    Some(value.trim())
                } else {
                    None
                }
            })
    }
}

/// Truncate a header value at its `;tag=` parameter, keeping the URI part
///
/// Responses echo the request's From/To with the tag re-attached separately,
/// so the stored value must not already carry one.
pub fn strip_tag(value: &str) -> &str {
    match value.find(";tag=") {
        Some(idx) => &value[..idx],
        None => value,
    }
}

fn bounded(name: &'static str, value: &str) -> Result<String> {
    if value.len() > MAX_HEADER_VALUE {
        return Err(Error::HeaderTooLong {
            name,
            len: value.len(),
            max: MAX_HEADER_VALUE,
        });
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVITE: &str = "INVITE sip:100@10.0.0.2 SIP/2.0\r\n\
        Via: SIP/2.0/UDP 10.0.0.5:5060;branch=z9hG4bK776asdhds\r\n\
        Via: SIP/2.0/UDP 10.0.0.9:5060;branch=z9hG4bK887\r\n\
        From: \"Alice\" <sip:alice@10.0.0.5>;tag=1928301774\r\n\
        To: <sip:100@10.0.0.2>\r\n\
        Call-ID: a84b4c76e66710@10.0.0.5\r\n\
        CSeq: 314159 INVITE\r\n\
        Contact: <sip:alice@10.0.0.5:5060>\r\n\
        Content-Length: 0\r\n\
        \r\n";

    #[test]
    fn classifies_request_and_response() {
        let msg = SipMessage::parse(INVITE).unwrap();
        assert_eq!(msg.kind(), MessageKind::Request(Method::Invite));

        let msg = SipMessage::parse("SIP/2.0 200 OK\r\nCSeq: 1 REGISTER\r\n\r\n").unwrap();
        assert_eq!(msg.kind(), MessageKind::Response(200));
        assert_eq!(msg.status_code(), Some(200));
    }

    #[test]
    fn unknown_method_is_flagged() {
        let msg = SipMessage::parse("SUBSCRIBE sip:x SIP/2.0\r\n\r\n").unwrap();
        assert_eq!(msg.kind(), MessageKind::UnknownRequest);
    }

    #[test]
    fn garbage_is_rejected() {
        assert_eq!(SipMessage::parse("hello world").unwrap_err(), Error::NotSip);
    }

    #[test]
    fn extracts_headers_case_insensitively() {
        let msg = SipMessage::parse(INVITE).unwrap();
        assert_eq!(msg.header("call-id"), Some("a84b4c76e66710@10.0.0.5"));
        assert_eq!(
            msg.header_uri("From").unwrap(),
            "sip:alice@10.0.0.5"
        );
        assert_eq!(msg.header_param("From", "tag").unwrap(), "1928301774");
        assert_eq!(msg.header_param("To", "tag"), None);
    }

    #[test]
    fn collects_repeated_via_headers() {
        let msg = SipMessage::parse(INVITE).unwrap();
        let vias = msg.headers_all("Via");
        assert_eq!(vias.len(), 2);
        assert!(vias[0].contains("z9hG4bK776asdhds"));
    }

    #[test]
    fn parses_cseq() {
        let msg = SipMessage::parse(INVITE).unwrap();
        assert_eq!(msg.cseq().unwrap(), (314159, "INVITE".to_string()));
    }

    #[test]
    fn missing_header_is_an_error() {
        let msg = SipMessage::parse(INVITE).unwrap();
        assert!(matches!(
            msg.header_required("Record-Route"),
            Err(Error::MissingHeader { name: "Record-Route" })
        ));
    }

    #[test]
    fn oversized_header_is_rejected_not_truncated() {
        let long = format!(
            "INVITE sip:x SIP/2.0\r\nSubject: {}\r\n\r\n",
            "x".repeat(MAX_HEADER_VALUE + 1)
        );
        let msg = SipMessage::parse(&long).unwrap();
        assert!(matches!(
            msg.header_required("Subject"),
            Err(Error::HeaderTooLong { .. })
        ));
    }

    #[test]
    fn strips_tag_parameter() {
        assert_eq!(strip_tag("<sip:a@b>;tag=99"), "<sip:a@b>");
        assert_eq!(strip_tag("<sip:a@b>"), "<sip:a@b>");
    }

    #[test]
    fn body_follows_blank_line() {
        let with_body = "INVITE sip:x SIP/2.0\r\nContent-Length: 5\r\n\r\nv=0\r\n";
        let msg = SipMessage::parse(with_body).unwrap();
        assert_eq!(msg.body(), Some("v=0\r\n"));

        let msg = SipMessage::parse(INVITE).unwrap();
        assert_eq!(msg.body(), None);
    }
}
