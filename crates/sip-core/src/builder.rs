//! CRLF construction of SIP requests and responses
//!
//! Replaces by-hand buffer formatting with builders that own the header
//! ordering and always finish with a correct Content-Length. URIs passed to
//! [`RequestBuilder::from`]/[`to`] are angle-bracketed unless already
//! enclosed, so callers can hand over either form.

use std::fmt::Write as _;

use crate::message::Method;

/// Reason phrase for the status codes this endpoint emits
pub fn default_reason(code: u16) -> &'static str {
    match code {
        100 => "Trying",
        180 => "Ringing",
        200 => "OK",
        400 => "Bad Request",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        481 => "Call/Transaction Does Not Exist",
        487 => "Request Terminated",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

fn bracketed(uri: &str) -> String {
    if uri.contains('<') {
        uri.to_string()
    } else {
        format!("<{uri}>")
    }
}

#[derive(Debug, Clone, Default)]
struct HeaderBlock {
    lines: Vec<String>,
    body: Option<(String, String)>,
}

impl HeaderBlock {
    fn push(&mut self, name: &str, value: &str) {
        self.lines.push(format!("{name}: {value}"));
    }

    fn render(&self, first_line: &str) -> String {
        let mut out = String::with_capacity(512);
        let _ = write!(out, "{first_line}\r\n");
        for line in &self.lines {
            let _ = write!(out, "{line}\r\n");
        }
        match &self.body {
            Some((content_type, body)) => {
                let _ = write!(out, "Content-Type: {content_type}\r\n");
                let _ = write!(out, "Content-Length: {}\r\n\r\n{body}", body.len());
            }
            None => out.push_str("Content-Length: 0\r\n\r\n"),
        }
        out
    }
}

/// Builder for outgoing SIP requests
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    method: Method,
    uri: String,
    headers: HeaderBlock,
}

impl RequestBuilder {
    pub fn new(method: Method, uri: &str) -> Self {
        Self {
            method,
            uri: uri.to_string(),
            headers: HeaderBlock::default(),
        }
    }

    /// Add a Via for the local endpoint with a fresh branch
    pub fn via(mut self, host: &str, port: u16, branch: &str) -> Self {
        self.headers.push(
            "Via",
            &format!("SIP/2.0/UDP {host}:{port};branch={branch};rport"),
        );
        self
    }

    pub fn max_forwards(mut self, hops: u8) -> Self {
        self.headers.push("Max-Forwards", &hops.to_string());
        self
    }

    pub fn from(mut self, uri: &str, tag: &str) -> Self {
        self.headers
            .push("From", &format!("{};tag={tag}", bracketed(uri)));
        self
    }

    pub fn to(mut self, uri: &str, tag: Option<&str>) -> Self {
        let value = match tag {
            Some(tag) => format!("{};tag={tag}", bracketed(uri)),
            None => bracketed(uri),
        };
        self.headers.push("To", &value);
        self
    }

    pub fn call_id(mut self, call_id: &str) -> Self {
        self.headers.push("Call-ID", call_id);
        self
    }

    pub fn cseq(mut self, seq: u32, method: Method) -> Self {
        self.headers.push("CSeq", &format!("{seq} {method}"));
        self
    }

    pub fn contact(mut self, uri: &str) -> Self {
        self.headers.push("Contact", &bracketed(uri));
        self
    }

    pub fn user_agent(mut self, agent: &str) -> Self {
        self.headers.push("User-Agent", agent);
        self
    }

    pub fn expires(mut self, seconds: u32) -> Self {
        self.headers.push("Expires", &seconds.to_string());
        self
    }

    /// Raw header escape hatch (Authorization and the like)
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push(name, value);
        self
    }

    pub fn body(mut self, content_type: &str, body: &str) -> Self {
        self.headers.body = Some((content_type.to_string(), body.to_string()));
        self
    }

    pub fn build(self) -> String {
        let first = format!("{} {} SIP/2.0", self.method, self.uri);
        self.headers.render(&first)
    }
}

/// Builder for responses to received requests
///
/// Via, From, To and Record-Route are echoed from the request by the caller;
/// this builder only assembles the lines in order.
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    code: u16,
    reason: &'static str,
    headers: HeaderBlock,
}

impl ResponseBuilder {
    pub fn new(code: u16) -> Self {
        Self {
            code,
            reason: default_reason(code),
            headers: HeaderBlock::default(),
        }
    }

    /// Echo a Via line verbatim (already carrying received/rport params)
    pub fn via_raw(mut self, value: &str) -> Self {
        self.headers.push("Via", value);
        self
    }

    pub fn from_raw(mut self, value: &str, tag: Option<&str>) -> Self {
        let value = match tag {
            Some(tag) => format!("{value};tag={tag}"),
            None => value.to_string(),
        };
        self.headers.push("From", &value);
        self
    }

    pub fn to_raw(mut self, value: &str, tag: Option<&str>) -> Self {
        let value = match tag {
            Some(tag) => format!("{value};tag={tag}"),
            None => value.to_string(),
        };
        self.headers.push("To", &value);
        self
    }

    pub fn call_id(mut self, call_id: &str) -> Self {
        self.headers.push("Call-ID", call_id);
        self
    }

    /// CSeq echoed with the method token from the request
    pub fn cseq_raw(mut self, seq: u32, method: &str) -> Self {
        self.headers.push("CSeq", &format!("{seq} {method}"));
        self
    }

    pub fn record_route(mut self, value: &str) -> Self {
        self.headers.push("Record-Route", value);
        self
    }

    pub fn contact(mut self, uri: &str) -> Self {
        self.headers.push("Contact", &bracketed(uri));
        self
    }

    pub fn user_agent(mut self, agent: &str) -> Self {
        self.headers.push("User-Agent", agent);
        self
    }

    pub fn body(mut self, content_type: &str, body: &str) -> Self {
        self.headers.body = Some((content_type.to_string(), body.to_string()));
        self
    }

    pub fn build(self) -> String {
        let first = format!("SIP/2.0 {} {}", self.code, self.reason);
        self.headers.render(&first)
    }
}
