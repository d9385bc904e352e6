use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use http::Method;
use spindle_net::Limits;
use spindle_reactor::LoopHandle;
use tracing::{error, warn};

use crate::config::{ClientConfig, ConfigError};
use crate::error::ClientError;
use crate::request::ClientRequest;
use crate::response::ClientResponse;

pub(crate) type ErrorHandler = Rc<RefCell<dyn FnMut(ClientError)>>;

/// HTTP/1.1 client bound to one host and port.
///
/// Every request opens its own connection, which is closed once the response
/// completes or fails. Callbacks run on the event loop the client was created
/// with.
#[derive(Clone)]
pub struct Client {
    inner: Rc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    reactor: LoopHandle,
    limits: Cell<Limits>,
    exception_handler: RefCell<Option<ErrorHandler>>,
}

impl Client {
    pub fn new(reactor: &LoopHandle, config: ClientConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Rc::new(ClientInner {
                config,
                reactor: reactor.clone(),
                limits: Cell::new(Limits::default()),
                exception_handler: RefCell::new(None),
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn limits(&self) -> Limits {
        self.inner.limits.get()
    }

    /// Parser limits applied to responses of requests sent after this call.
    pub fn set_limits(&self, limits: Limits) -> &Self {
        self.inner.limits.set(limits);
        self
    }

    /// Error callback for requests that do not register their own. Without
    /// one, errors are only logged.
    pub fn exception_handler(&self, handler: impl FnMut(ClientError) + 'static) -> &Self {
        let handler: ErrorHandler = Rc::new(RefCell::new(handler));
        *self.inner.exception_handler.borrow_mut() = Some(handler);
        self
    }

    pub fn request(&self, method: Method, path: impl Into<String>) -> ClientRequest {
        ClientRequest::new(self.clone(), method, path.into())
    }

    /// Sends `GET path` and calls `on_response` once the response head has
    /// arrived. Register a data handler from inside `on_response` to see
    /// every body chunk.
    pub fn get_now(
        &self,
        path: impl Into<String>,
        on_response: impl FnOnce(ClientResponse) + 'static,
    ) {
        self.request(Method::GET, path).send(on_response);
    }

    pub(crate) fn reactor(&self) -> &LoopHandle {
        &self.inner.reactor
    }

    pub(crate) fn default_error_handler(&self) -> Option<ErrorHandler> {
        self.inner.exception_handler.borrow().clone()
    }

    // Errors raised while a request is being sent reach the callback on the
    // next loop turn, never from inside `send`.
    pub(crate) fn report_later(&self, handler: Option<ErrorHandler>, error: ClientError) {
        self.inner.reactor.defer(move || report(handler.as_ref(), error));
    }
}

pub(crate) fn report(handler: Option<&ErrorHandler>, error: ClientError) {
    let Some(handler) = handler else {
        error!(%error, "request failed with no error handler registered");
        return;
    };
    match handler.try_borrow_mut() {
        Ok(mut handler) => (&mut *handler)(error),
        Err(_) => warn!(%error, "error handler re-entered; error dropped"),
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .field("limits", &self.inner.limits.get())
            .finish()
    }
}
