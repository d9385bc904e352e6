mod http1;
#[cfg(test)]
mod headers_test;

pub use http1::{
    Header, Headers, HttpVersion, Limits, ParseError, ParseErrorKind, ParserState, Request,
    RequestBuilder, ResponseEvent, ResponseHead, ResponseStreamParser, StatusLine, WriteError,
    WriteErrorKind, serialize_request,
};

pub use http::Method;
