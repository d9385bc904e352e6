mod request;
mod stream;
mod types;
mod writer;

pub use request::{Request, RequestBuilder};
pub use stream::{ParserState, ResponseEvent, ResponseStreamParser};
pub use types::{
    Header, Headers, HttpVersion, Limits, ParseError, ParseErrorKind, ResponseHead, StatusLine,
};
pub use writer::{WriteError, WriteErrorKind, serialize_request};
