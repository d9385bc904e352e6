use bytes::Bytes;
use http::Method;
use spindle_net::{Limits, ResponseEvent, ResponseStreamParser};
use spindle_reactor::{Connection, TransportError, TransportHandler};
use tracing::{debug, trace};

use crate::client::{ErrorHandler, report};
use crate::error::ClientError;
use crate::response::ClientResponse;

pub(crate) type ResponseHandler = Box<dyn FnOnce(ClientResponse)>;

/// One request/response cycle on its own connection. Feeds socket bytes to
/// the parser and fans parser events out to the caller's callbacks.
pub(crate) struct Exchange {
    parser: ResponseStreamParser,
    on_response: Option<ResponseHandler>,
    on_error: Option<ErrorHandler>,
    response: Option<ClientResponse>,
    finished: bool,
}

impl Exchange {
    pub(crate) fn new(
        method: &Method,
        limits: Limits,
        on_response: ResponseHandler,
        on_error: Option<ErrorHandler>,
    ) -> Self {
        Self {
            parser: ResponseStreamParser::for_request(method, limits),
            on_response: Some(on_response),
            on_error,
            response: None,
            finished: false,
        }
    }

    fn cancelled(&self) -> bool {
        self.response
            .as_ref()
            .is_some_and(ClientResponse::is_cancelled)
    }

    fn dispatch(&mut self, connection: &Connection, events: Vec<ResponseEvent>) {
        for event in events {
            if self.finished {
                return;
            }
            if self.cancelled() {
                self.release();
                return;
            }
            match event {
                ResponseEvent::Head(head) => {
                    debug!(status = head.line.status_code, "response head received");
                    let response = ClientResponse::new(head, connection.downgrade());
                    self.response = Some(response.clone());
                    if let Some(on_response) = self.on_response.take() {
                        on_response(response);
                    }
                }
                ResponseEvent::Body(chunk) => {
                    if let Some(response) = &self.response {
                        trace!(bytes = chunk.len(), "body chunk");
                        response.emit_data(chunk);
                    }
                }
                ResponseEvent::Complete => {
                    debug!("response complete");
                    self.finished = true;
                    connection.close();
                    let response = self.response.take();
                    self.release();
                    if let Some(response) = response {
                        response.emit_end();
                    }
                }
            }
        }
        if self.cancelled() {
            self.release();
        }
    }

    fn fail(&mut self, connection: &Connection, error: ClientError) {
        if self.finished || self.cancelled() {
            return;
        }
        debug!(%error, "exchange failed");
        self.finished = true;
        connection.abort();
        let on_error = self.on_error.take();
        self.release();
        report(on_error.as_ref(), error);
    }

    // Drops every caller callback once nothing more can be delivered.
    fn release(&mut self) {
        self.finished = true;
        self.on_response = None;
        self.on_error = None;
        if let Some(response) = self.response.take() {
            response.release();
        }
    }
}

impl TransportHandler for Exchange {
    fn on_data(&mut self, connection: &Connection, data: Bytes) {
        if self.finished {
            return;
        }
        match self.parser.push(data) {
            Ok(events) => self.dispatch(connection, events),
            Err(error) => self.fail(connection, error.into()),
        }
    }

    fn on_closed(&mut self, connection: &Connection) {
        if self.finished {
            return;
        }
        match self.parser.finish() {
            Ok(events) => self.dispatch(connection, events),
            Err(error) => self.fail(connection, error.into()),
        }
    }

    fn on_error(&mut self, connection: &Connection, error: TransportError) {
        let error = ClientError::from_transport(error, &connection.host(), connection.port());
        self.fail(connection, error);
    }
}
