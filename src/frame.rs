//! Wire frame: an HTTP/1-style text frame carrying control headers plus a
//! request or response payload (§3 "Frame", §6 "Wire framing").

use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Control header names, kept as constants so subsystems never typo a
/// header key (§6 table).
pub mod headers {
    pub const OP_CODE: &str = "Op-Code";
    pub const FROM_HOST: &str = "From-Host";
    pub const FROM_ID: &str = "From-ID";
    pub const FROM_VERSION: &str = "From-Version";
    pub const MSG_ID: &str = "Msg-ID";
    pub const QUEUE: &str = "Queue";
    pub const FRAGMENT_INDEX: &str = "Fragment-Index";
    pub const FRAGMENT_MAX: &str = "Fragment-Max";
    pub const TIME_BUDGET: &str = "Time-Budget";
    pub const CALL_DEPTH: &str = "Call-Depth";
    pub const CLOCK_SHIFT: &str = "Clock-Shift";
    pub const BAGGAGE_PREFIX: &str = "Baggage-";
    pub const ACTOR_PREFIX: &str = "Actor-";
}

/// The opcode carried on response-direction frames. Request frames omit it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Ack,
    Response,
    Error,
}

impl OpCode {
    pub fn as_str(self) -> &'static str {
        match self {
            OpCode::Ack => "ack",
            OpCode::Response => "response",
            OpCode::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ack" => Some(OpCode::Ack),
            "response" => Some(OpCode::Response),
            "error" => Some(OpCode::Error),
            _ => None,
        }
    }
}

/// First line of a request frame: `METHOD URL` (the analogue of an
/// HTTP/1.1 request-line, without the trailing `HTTP/1.1`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub url: String,
}

/// A reconstructed or in-flight frame: control headers, optional
/// request-line, optional status code, and an opaque body (§9 "dynamic
/// payload reflection" is explicitly not modeled at this layer — bodies
/// are bytes, schemas live in generated stubs above the core).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub request_line: Option<RequestLine>,
    pub status: Option<u16>,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new_request(method: &str, url: &str) -> Self {
        Self {
            request_line: Some(RequestLine {
                method: method.to_string(),
                url: url.to_string(),
            }),
            status: None,
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    pub fn new_response(status: u16) -> Self {
        Self {
            request_line: None,
            status: Some(status),
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }

    pub fn op_code(&self) -> Option<OpCode> {
        self.header(headers::OP_CODE).and_then(OpCode::parse)
    }

    pub fn fragment_index(&self) -> Option<u32> {
        self.header(headers::FRAGMENT_INDEX).and_then(|v| v.parse().ok())
    }

    pub fn fragment_max(&self) -> Option<u32> {
        self.header(headers::FRAGMENT_MAX).and_then(|v| v.parse().ok())
    }

    pub fn time_budget_ms(&self) -> Option<u64> {
        self.header(headers::TIME_BUDGET).and_then(|v| v.parse().ok())
    }

    pub fn call_depth(&self) -> u8 {
        self.header(headers::CALL_DEPTH)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn baggage(&self) -> BTreeMap<String, String> {
        self.headers
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(headers::BAGGAGE_PREFIX)
                    .map(|name| (name.to_string(), v.clone()))
            })
            .collect()
    }

    /// Serializes the frame to the HTTP/1-style byte stream described in §6.
    pub fn encode(&self) -> Vec<u8> {
        let mut head = String::new();
        if let Some(rl) = &self.request_line {
            let _ = writeln!(head, "{} {}\r", rl.method, rl.url);
        } else if let Some(status) = self.status {
            let _ = writeln!(head, "{status}\r");
        }
        for (k, v) in &self.headers {
            let _ = writeln!(head, "{k}: {v}\r");
        }
        head.push_str("\r\n");
        let mut out = head.into_bytes();
        out.extend_from_slice(&self.body);
        out
    }

    /// Parses a byte stream produced by [`Frame::encode`].
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let separator = find_header_terminator(bytes)?;
        let head = std::str::from_utf8(&bytes[..separator]).ok()?;
        let body = bytes[separator + 4..].to_vec();

        let mut lines = head.split("\r\n");
        let first_line = lines.next()?.trim_end_matches('\r');

        let mut request_line = None;
        let mut status = None;
        if let Some((method, url)) = first_line.split_once(' ') {
            if method.chars().all(|c| c.is_ascii_uppercase()) && !method.is_empty() {
                request_line = Some(RequestLine {
                    method: method.to_string(),
                    url: url.to_string(),
                });
            }
        }
        if request_line.is_none() {
            status = first_line.parse().ok();
        }

        let mut headers = BTreeMap::new();
        for line in lines {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            if let Some((k, v)) = line.split_once(": ") {
                headers.insert(k.to_string(), v.to_string());
            }
        }

        Some(Frame {
            request_line,
            status,
            headers,
            body,
        })
    }
}

fn find_header_terminator(bytes: &[u8]) -> Option<usize> {
    bytes.windows(4).position(|w| w == b"\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trips_request() {
        let mut frame = Frame::new_request("POST", "https://beta/echo");
        frame.set_header(headers::MSG_ID, "abc");
        frame.body = b"Hello".to_vec();

        let bytes = frame.encode();
        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(decoded.request_line.unwrap().method, "POST");
        assert_eq!(decoded.header(headers::MSG_ID), Some("abc"));
        assert_eq!(decoded.body, b"Hello");
    }

    #[test]
    fn encode_decode_round_trips_response() {
        let mut frame = Frame::new_response(200);
        frame.set_header(headers::OP_CODE, OpCode::Response.as_str());
        frame.body = b"ok".to_vec();

        let bytes = frame.encode();
        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(decoded.status, Some(200));
        assert_eq!(decoded.op_code(), Some(OpCode::Response));
    }

    #[test]
    fn baggage_headers_are_extracted_by_prefix() {
        let mut frame = Frame::new_request("GET", "/x");
        frame.set_header("Baggage-Tenant", "acme");
        frame.set_header(headers::MSG_ID, "1");
        let baggage = frame.baggage();
        assert_eq!(baggage.get("Tenant"), Some(&"acme".to_string()));
        assert_eq!(baggage.len(), 1);
    }
}
