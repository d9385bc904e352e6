use thiserror::Error;

use super::request::Request;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot serialize request: {kind}")]
pub struct WriteError {
    pub kind: WriteErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteErrorKind {
    #[error("body supplied without a content-length header")]
    MissingContentLength,
    #[error("content-length {declared} does not match body length {actual}")]
    ContentLengthMismatch { declared: String, actual: usize },
    #[error("invalid header {0:?}")]
    InvalidHeader(String),
    #[error("invalid request target {0:?}")]
    InvalidTarget(String),
}

impl From<WriteErrorKind> for WriteError {
    fn from(kind: WriteErrorKind) -> Self {
        Self { kind }
    }
}

/// Serializes `request` as an HTTP/1.1 message.
///
/// Headers are written in insertion order. A body is only accepted together
/// with an explicit `Content-Length` header matching its length; chunked
/// framing is never produced.
pub fn serialize_request(request: &Request) -> Result<Vec<u8>, WriteError> {
    validate_target(&request.path)?;
    for header in &request.headers {
        validate_header(&header.name, &header.value)?;
    }
    if let Some(body) = &request.body {
        let declared = request
            .headers
            .get("content-length")
            .ok_or(WriteErrorKind::MissingContentLength)?;
        if declared.trim().parse::<usize>().ok() != Some(body.len()) {
            return Err(WriteErrorKind::ContentLengthMismatch {
                declared: declared.to_string(),
                actual: body.len(),
            }
            .into());
        }
    }

    let body_len = request.body.as_ref().map_or(0, |body| body.len());
    let mut bytes = Vec::with_capacity(256 + body_len);
    bytes.extend_from_slice(request.method.as_str().as_bytes());
    bytes.push(b' ');
    bytes.extend_from_slice(request.path.as_bytes());
    bytes.extend_from_slice(b" HTTP/1.1\r\n");
    for header in &request.headers {
        bytes.extend_from_slice(header.name.as_bytes());
        bytes.extend_from_slice(b": ");
        bytes.extend_from_slice(header.value.as_bytes());
        bytes.extend_from_slice(b"\r\n");
    }
    bytes.extend_from_slice(b"\r\n");
    if let Some(body) = &request.body {
        bytes.extend_from_slice(body);
    }
    Ok(bytes)
}

fn validate_target(path: &str) -> Result<(), WriteError> {
    if path.is_empty()
        || path
            .bytes()
            .any(|byte| byte.is_ascii_whitespace() || byte.is_ascii_control())
    {
        return Err(WriteErrorKind::InvalidTarget(path.to_string()).into());
    }
    Ok(())
}

fn validate_header(name: &str, value: &str) -> Result<(), WriteError> {
    let bad_name = name.is_empty()
        || name
            .bytes()
            .any(|byte| byte == b':' || byte.is_ascii_whitespace() || byte.is_ascii_control());
    let bad_value = value.bytes().any(|byte| byte == b'\r' || byte == b'\n');
    if bad_name || bad_value {
        return Err(WriteErrorKind::InvalidHeader(name.to_string()).into());
    }
    Ok(())
}
