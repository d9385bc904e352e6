use bytes::{Bytes, BytesMut};
use http::Method;
use tracing::trace;

use super::types::{
    Header, Headers, HttpVersion, Limits, ParseError, ParseErrorKind, ResponseHead, StatusLine,
};

const CRLF: &[u8] = b"\r\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseEvent {
    Head(ResponseHead),
    Body(Bytes),
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    AwaitingStatusLine,
    AwaitingHeaders,
    StreamingBody,
    Complete,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyMode {
    ContentLength { remaining: usize },
    CloseDelimited,
}

/// Incremental HTTP/1.1 response parser.
///
/// Bytes are pushed as they arrive from the socket. The head is buffered
/// until its terminating empty line; body bytes are handed back as slices of
/// the pushed buffers without copying. Events for one response always come
/// out as `Head`, any number of `Body`, then `Complete`.
#[derive(Debug)]
pub struct ResponseStreamParser {
    state: ParserState,
    buffer: BytesMut,
    limits: Limits,
    head_request: bool,
    offset: usize,
    head_start: usize,
    line: Option<StatusLine>,
    headers: Vec<Header>,
    body: BodyMode,
    error: Option<ParseError>,
}

impl Default for ResponseStreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseStreamParser {
    pub fn new() -> Self {
        Self::with_limits(Limits::default())
    }

    pub fn with_limits(limits: Limits) -> Self {
        Self {
            state: ParserState::AwaitingStatusLine,
            buffer: BytesMut::new(),
            limits,
            head_request: false,
            offset: 0,
            head_start: 0,
            line: None,
            headers: Vec::new(),
            body: BodyMode::CloseDelimited,
            error: None,
        }
    }

    /// Parser for the response to a request sent with `method`. Responses to
    /// `HEAD` never carry a body.
    pub fn for_request(method: &Method, limits: Limits) -> Self {
        let mut parser = Self::with_limits(limits);
        parser.head_request = *method == Method::HEAD;
        parser
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == ParserState::Complete
    }

    pub fn push(&mut self, bytes: Bytes) -> Result<Vec<ResponseEvent>, ParseError> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }

        let mut events = Vec::new();
        match self.state {
            ParserState::Complete | ParserState::Error => return Ok(events),
            ParserState::StreamingBody => {
                self.consume_body(bytes, &mut events);
                return Ok(events);
            }
            ParserState::AwaitingStatusLine | ParserState::AwaitingHeaders => {}
        }

        self.buffer.extend_from_slice(&bytes);
        match self.advance(&mut events) {
            Ok(()) => Ok(events),
            Err(error) => Err(self.fail(error)),
        }
    }

    /// Signals that the peer closed the connection.
    pub fn finish(&mut self) -> Result<Vec<ResponseEvent>, ParseError> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }

        let mut events = Vec::new();
        match (self.state, self.body) {
            (ParserState::Complete, _) => Ok(events),
            (ParserState::StreamingBody, BodyMode::CloseDelimited) => {
                self.complete(&mut events);
                Ok(events)
            }
            _ => Err(self.fail(ParseError {
                kind: ParseErrorKind::UnexpectedEof,
                offset: self.offset + self.buffer.len(),
            })),
        }
    }

    fn fail(&mut self, error: ParseError) -> ParseError {
        trace!(%error, "response parser failed");
        self.state = ParserState::Error;
        self.buffer.clear();
        self.error = Some(error.clone());
        error
    }

    fn advance(&mut self, events: &mut Vec<ResponseEvent>) -> Result<(), ParseError> {
        loop {
            match self.state {
                ParserState::AwaitingStatusLine => {
                    let Some(end) = self.find_line_end()? else {
                        return Ok(());
                    };
                    let raw = self.buffer.split_to(end + CRLF.len());
                    self.line = Some(parse_status_line(&raw[..end], self.offset)?);
                    self.offset += raw.len();
                    self.state = ParserState::AwaitingHeaders;
                }
                ParserState::AwaitingHeaders => {
                    let Some(end) = self.find_line_end()? else {
                        return Ok(());
                    };
                    let raw = self.buffer.split_to(end + CRLF.len());
                    let line_offset = self.offset;
                    self.offset += raw.len();
                    if end == 0 {
                        self.finish_head(events)?;
                    } else {
                        self.push_header_line(&raw[..end], line_offset)?;
                    }
                }
                ParserState::StreamingBody => {
                    if !self.buffer.is_empty() {
                        let rest = self.buffer.split().freeze();
                        self.consume_body(rest, events);
                    }
                    return Ok(());
                }
                ParserState::Complete | ParserState::Error => {
                    self.buffer.clear();
                    return Ok(());
                }
            }
        }
    }

    fn find_line_end(&self) -> Result<Option<usize>, ParseError> {
        let found = twoway::find_bytes(&self.buffer, CRLF);
        let scanned = found.unwrap_or(self.buffer.len());
        if self.offset - self.head_start + scanned > self.limits.max_header_bytes {
            return Err(ParseError {
                kind: ParseErrorKind::HeaderTooLarge,
                offset: self.head_start + self.limits.max_header_bytes,
            });
        }
        Ok(found)
    }

    fn push_header_line(&mut self, raw: &[u8], offset: usize) -> Result<(), ParseError> {
        let malformed = ParseError {
            kind: ParseErrorKind::MalformedHeader,
            offset,
        };

        if raw[0] == b' ' || raw[0] == b'\t' {
            let previous = self.headers.last_mut().ok_or(malformed)?;
            let continuation = String::from_utf8_lossy(raw);
            previous.value.push(' ');
            previous.value.push_str(continuation.trim());
            trace!(name = %previous.name, "joined folded header line");
            return Ok(());
        }

        let colon = raw
            .iter()
            .position(|byte| *byte == b':')
            .ok_or_else(|| malformed.clone())?;
        let name = &raw[..colon];
        if name.is_empty() || !name.iter().all(|byte| is_token_byte(*byte)) {
            return Err(malformed);
        }

        self.headers.push(Header {
            name: String::from_utf8_lossy(name).into_owned(),
            value: String::from_utf8_lossy(&raw[colon + 1..])
                .trim_matches(|c| c == ' ' || c == '\t')
                .to_string(),
        });
        Ok(())
    }

    fn finish_head(&mut self, events: &mut Vec<ResponseEvent>) -> Result<(), ParseError> {
        let headers = Headers::from(std::mem::take(&mut self.headers));
        let Some(line) = self.line.take() else {
            return Err(ParseError {
                kind: ParseErrorKind::MalformedStatusLine,
                offset: self.head_start,
            });
        };
        let head_offset = self.head_start;
        self.head_start = self.offset;

        let status_code = line.status_code;
        if (100..200).contains(&status_code) && status_code != 101 {
            trace!(status_code, "discarding interim response");
            self.state = ParserState::AwaitingStatusLine;
            return Ok(());
        }

        let encodings = headers.get_all("transfer-encoding");
        if !encodings.is_empty() {
            let joined = encodings.join(", ");
            let identity_only = joined
                .split(',')
                .all(|coding| coding.trim().eq_ignore_ascii_case("identity"));
            if !identity_only {
                return Err(ParseError {
                    kind: ParseErrorKind::UnsupportedEncoding(joined),
                    offset: head_offset,
                });
            }
        }

        let no_body = self.head_request || matches!(status_code, 101 | 204 | 304);
        let content_length = if no_body {
            None
        } else {
            parse_content_length(&headers, head_offset)?
        };

        trace!(status_code, ?content_length, no_body, "response head parsed");
        events.push(ResponseEvent::Head(ResponseHead { line, headers }));

        match content_length {
            _ if no_body => self.complete(events),
            Some(0) => self.complete(events),
            Some(length) => {
                self.body = BodyMode::ContentLength { remaining: length };
                self.state = ParserState::StreamingBody;
            }
            None => {
                self.body = BodyMode::CloseDelimited;
                self.state = ParserState::StreamingBody;
            }
        }
        Ok(())
    }

    fn consume_body(&mut self, bytes: Bytes, events: &mut Vec<ResponseEvent>) {
        match &mut self.body {
            BodyMode::ContentLength { remaining } => {
                let take = bytes.len().min(*remaining);
                *remaining -= take;
                let done = *remaining == 0;
                self.offset += take;
                if take > 0 {
                    events.push(ResponseEvent::Body(bytes.slice(..take)));
                }
                if done {
                    if bytes.len() > take {
                        trace!(extra = bytes.len() - take, "ignoring bytes after body");
                    }
                    self.complete(events);
                }
            }
            BodyMode::CloseDelimited => {
                self.offset += bytes.len();
                if !bytes.is_empty() {
                    events.push(ResponseEvent::Body(bytes));
                }
            }
        }
    }

    fn complete(&mut self, events: &mut Vec<ResponseEvent>) {
        self.state = ParserState::Complete;
        self.buffer.clear();
        events.push(ResponseEvent::Complete);
    }
}

fn parse_status_line(raw: &[u8], offset: usize) -> Result<StatusLine, ParseError> {
    let malformed = || ParseError {
        kind: ParseErrorKind::MalformedStatusLine,
        offset,
    };

    let text = String::from_utf8_lossy(raw);
    let rest = text.strip_prefix("HTTP/").ok_or_else(malformed)?;
    let (version_raw, rest) = rest.split_once(' ').ok_or_else(malformed)?;
    let version_bytes = version_raw.as_bytes();
    if version_bytes.len() != 3
        || !version_bytes[0].is_ascii_digit()
        || version_bytes[1] != b'.'
        || !version_bytes[2].is_ascii_digit()
    {
        return Err(malformed());
    }

    let (code_raw, reason) = rest.split_once(' ').unwrap_or((rest, ""));
    if code_raw.len() != 3 || !code_raw.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(malformed());
    }
    let status_code = code_raw.parse::<u16>().map_err(|_| malformed())?;

    let version = match version_raw {
        "1.0" => HttpVersion::Http10,
        "1.1" => HttpVersion::Http11,
        other => HttpVersion::Other(format!("HTTP/{other}")),
    };

    Ok(StatusLine {
        version,
        status_code,
        reason: reason.to_string(),
    })
}

fn parse_content_length(headers: &Headers, offset: usize) -> Result<Option<usize>, ParseError> {
    let invalid = ParseError {
        kind: ParseErrorKind::InvalidContentLength,
        offset,
    };

    let mut length = None;
    for value in headers.get_all("content-length") {
        for item in value.split(',') {
            let item = item.trim();
            if item.is_empty() || !item.bytes().all(|byte| byte.is_ascii_digit()) {
                return Err(invalid);
            }
            let parsed = item.parse::<usize>().map_err(|_| invalid.clone())?;
            match length {
                Some(existing) if existing != parsed => return Err(invalid),
                _ => length = Some(parsed),
            }
        }
    }
    Ok(length)
}

fn is_token_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&byte)
}
