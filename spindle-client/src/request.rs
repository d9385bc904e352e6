use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use bytes::Bytes;
use http::Method;
use spindle_net::{Headers, Request, serialize_request};
use spindle_reactor::Connection;
use tracing::debug;

use crate::client::{Client, ErrorHandler};
use crate::error::ClientError;
use crate::exchange::Exchange;
use crate::response::ClientResponse;

/// A request that has not been sent yet. Nothing touches the network until
/// [`ClientRequest::send`].
pub struct ClientRequest {
    client: Client,
    method: Method,
    path: String,
    headers: Headers,
    body: Option<Bytes>,
    on_error: Option<ErrorHandler>,
}

impl ClientRequest {
    pub(crate) fn new(client: Client, method: Method, path: String) -> Self {
        Self {
            client,
            method,
            path,
            headers: Headers::new(),
            body: None,
            on_error: None,
        }
    }

    /// Appends a header. A `Host` header set here replaces the automatic one.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    /// Sets the body. A matching `Content-Length` header must be supplied too.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Error callback for this request only, replacing the client's default.
    pub fn exception_handler(mut self, handler: impl FnMut(ClientError) + 'static) -> Self {
        let handler: ErrorHandler = Rc::new(RefCell::new(handler));
        self.on_error = Some(handler);
        self
    }

    /// Opens a connection, writes the request and streams the response.
    ///
    /// `on_response` fires once, when the head has arrived. Every failure is
    /// reported exactly once through the error callback, and never from
    /// inside this call.
    pub fn send(self, on_response: impl FnOnce(ClientResponse) + 'static) {
        let ClientRequest {
            client,
            method,
            path,
            headers,
            body,
            on_error,
        } = self;
        let on_error = on_error.or_else(|| client.default_error_handler());
        let config = client.config();

        let mut builder = Request::builder(method, path);
        if !headers.contains("host") {
            builder = builder.header("Host", config.host_header());
        }
        for header in &headers {
            builder = builder.header(header.name.clone(), header.value.clone());
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }
        let request = builder.build();

        let bytes = match serialize_request(&request) {
            Ok(bytes) => bytes,
            Err(error) => {
                debug!(%error, "request rejected before sending");
                client.report_later(on_error, error.into());
                return;
            }
        };

        let (host, port) = (config.host.clone(), config.port);
        let exchange = Exchange::new(
            &request.method,
            client.limits(),
            Box::new(on_response),
            on_error.clone(),
        );
        let connection = Connection::new(client.reactor(), exchange);
        if let Err(error) = connection.connect(&host, port) {
            client.report_later(on_error, ClientError::from_transport(error, &host, port));
            return;
        }
        if let Err(error) = connection.write(&bytes) {
            connection.abort();
            client.report_later(on_error, ClientError::from_transport(error, &host, port));
            return;
        }
        debug!(method = %request.method, path = %request.path, %host, port, "request queued");
    }
}

impl fmt::Debug for ClientRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("headers", &self.headers)
            .field("body", &self.body.as_ref().map(Bytes::len))
            .finish()
    }
}
