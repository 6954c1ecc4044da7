//! services/app/src/adapters/stomp.rs
//!
//! A minimal STOMP 1.2 frame codec: just enough of the protocol for the
//! realtime client (CONNECT, SUBSCRIBE, UNSUBSCRIBE, SEND, DISCONNECT out;
//! CONNECTED, MESSAGE, RECEIPT, ERROR in).

use marketplace_core::PortError;

const NUL: char = '\0';

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame has no command line")]
    MissingCommand,
    #[error("header line without a colon: {0}")]
    BadHeader(String),
    #[error("invalid escape sequence in header: {0}")]
    BadEscape(String),
    #[error("frame is not NUL terminated")]
    Unterminated,
}

impl From<FrameError> for PortError {
    fn from(err: FrameError) -> Self {
        PortError::Protocol(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header; STOMP says repeated headers lose to the first.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    // CONNECT and CONNECTED frames carry their headers unescaped.
    fn escapes_headers(command: &str) -> bool {
        command != "CONNECT" && command != "CONNECTED"
    }

    pub fn encode(&self) -> String {
        let escape = Self::escapes_headers(&self.command);
        let mut out = String::with_capacity(self.command.len() + self.body.len() + 64);
        out.push_str(&self.command);
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push(NUL);
        out
    }

    /// Decodes every frame in `input`. Heart-beat end-of-lines between frames
    /// are skipped; an input made only of heart-beats yields no frames.
    pub fn decode_all(input: &str) -> Result<Vec<Frame>, FrameError> {
        let mut frames = Vec::new();
        let mut rest = input;
        loop {
            rest = rest.trim_start_matches(['\n', '\r']);
            if rest.is_empty() {
                return Ok(frames);
            }
            let (frame, remaining) = decode_one(rest)?;
            frames.push(frame);
            rest = remaining;
        }
    }
}

fn decode_one(input: &str) -> Result<(Frame, &str), FrameError> {
    let (command, mut rest) = split_line(input).ok_or(FrameError::MissingCommand)?;
    if command.is_empty() {
        return Err(FrameError::MissingCommand);
    }
    let escape = Frame::escapes_headers(command);

    let mut headers = Vec::new();
    loop {
        let (line, remaining) = split_line(rest).ok_or(FrameError::Unterminated)?;
        rest = remaining;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FrameError::BadHeader(line.to_string()))?;
        if escape {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let declared = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .and_then(|(_, value)| value.trim().parse::<usize>().ok());

    let body_end = match declared {
        Some(len) if rest.len() > len && rest.is_char_boundary(len) && rest[len..].starts_with(NUL) => len,
        _ => rest.find(NUL).ok_or(FrameError::Unterminated)?,
    };
    let body = rest[..body_end].to_string();
    let remaining = &rest[body_end + NUL.len_utf8()..];

    Ok((
        Frame {
            command: command.to_string(),
            headers,
            body,
        },
        remaining,
    ))
}

fn split_line(input: &str) -> Option<(&str, &str)> {
    let end = input.find('\n')?;
    let line = input[..end].strip_suffix('\r').unwrap_or(&input[..end]);
    Some((line, &input[end + 1..]))
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::BadEscape(raw.to_string())),
        }
    }
    Ok(out)
}
