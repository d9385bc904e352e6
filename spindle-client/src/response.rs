use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use bytes::Bytes;
use spindle_net::{Headers, HttpVersion, ResponseHead};
use spindle_reactor::WeakConnection;
use tracing::trace;

type DataHandler = Box<dyn FnMut(Bytes)>;
type EndHandler = Box<dyn FnOnce()>;

/// A response whose head has arrived. Body bytes are not kept here; they
/// stream to the data handler as they are read.
#[derive(Clone)]
pub struct ClientResponse {
    inner: Rc<ResponseInner>,
}

struct ResponseInner {
    head: ResponseHead,
    connection: WeakConnection,
    cancelled: Cell<bool>,
    released: Cell<bool>,
    handlers: RefCell<Handlers>,
}

#[derive(Default)]
struct Handlers {
    data: Option<DataHandler>,
    end: Option<EndHandler>,
}

impl ClientResponse {
    pub(crate) fn new(head: ResponseHead, connection: WeakConnection) -> Self {
        Self {
            inner: Rc::new(ResponseInner {
                head,
                connection,
                cancelled: Cell::new(false),
                released: Cell::new(false),
                handlers: RefCell::new(Handlers::default()),
            }),
        }
    }

    pub fn status_code(&self) -> u16 {
        self.inner.head.line.status_code
    }

    pub fn status_message(&self) -> &str {
        &self.inner.head.line.reason
    }

    pub fn version(&self) -> &HttpVersion {
        &self.inner.head.line.version
    }

    pub fn headers(&self) -> &Headers {
        &self.inner.head.headers
    }

    /// Subscribes to body chunks.
    ///
    /// Only chunks read after registration are delivered; earlier ones are
    /// not replayed. Registering from inside the response callback is the one
    /// ordering that never misses data, since no chunk can be dispatched
    /// before that callback returns.
    pub fn data_handler(&self, handler: impl FnMut(Bytes) + 'static) -> &Self {
        if !self.inner.released.get() {
            self.inner.handlers.borrow_mut().data = Some(Box::new(handler));
        }
        self
    }

    /// Called once after the last chunk.
    pub fn end_handler(&self, handler: impl FnOnce() + 'static) -> &Self {
        if !self.inner.released.get() {
            self.inner.handlers.borrow_mut().end = Some(Box::new(handler));
        }
        self
    }

    /// Cancels the exchange. No data, end or error callback fires afterwards.
    pub fn close(&self) {
        if self.inner.cancelled.replace(true) {
            return;
        }
        if let Some(connection) = self.inner.connection.upgrade() {
            connection.close();
        }
        self.release();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.inner.cancelled.get()
    }

    pub(crate) fn emit_data(&self, chunk: Bytes) {
        let handler = self.inner.handlers.borrow_mut().data.take();
        let Some(mut handler) = handler else {
            trace!(bytes = chunk.len(), "no data handler; chunk dropped");
            return;
        };
        handler(chunk);

        let mut handlers = self.inner.handlers.borrow_mut();
        if handlers.data.is_none() && !self.inner.released.get() {
            handlers.data = Some(handler);
        }
    }

    pub(crate) fn emit_end(&self) {
        let end = self.inner.handlers.borrow_mut().end.take();
        self.release();
        if let Some(end) = end {
            end();
        }
    }

    // Drops the caller's callbacks so the exchange holds nothing past its end.
    pub(crate) fn release(&self) {
        self.inner.released.set(true);
        let handlers = std::mem::take(&mut *self.inner.handlers.borrow_mut());
        drop(handlers);
    }
}

impl fmt::Debug for ClientResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientResponse")
            .field("status_code", &self.status_code())
            .field("headers", self.headers())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
