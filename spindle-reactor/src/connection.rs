use std::cell::RefCell;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, ToSocketAddrs};
use std::rc::{Rc, Weak};

use bytes::{Buf, Bytes, BytesMut};
use mio::net::TcpStream;
use mio::{Interest, Token};
use tracing::{debug, trace, warn};

use crate::error::TransportError;
use crate::event_loop::{LoopHandle, Readiness};

const READ_CHUNK: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    Failed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed)
    }
}

/// Receives events for one [`Connection`].
///
/// Methods are called from inside the event loop, never re-entrantly. Closing
/// the connection from any of them stops further delivery.
pub trait TransportHandler {
    fn on_connected(&mut self, _connection: &Connection) {}

    fn on_data(&mut self, connection: &Connection, data: Bytes);

    /// The peer closed its side; the connection is already `Closed`.
    fn on_closed(&mut self, _connection: &Connection) {}

    /// Called at most once; the connection is already `Failed`.
    fn on_error(&mut self, connection: &Connection, error: TransportError);
}

/// One outbound TCP connection driven by an event loop.
///
/// While registered, the loop's source table owns the connection; it is
/// released when the connection reaches `Closed` or `Failed`.
#[derive(Clone)]
pub struct Connection {
    shared: Rc<Shared>,
}

#[derive(Clone)]
pub struct WeakConnection {
    shared: Weak<Shared>,
}

struct Shared {
    reactor: LoopHandle,
    core: RefCell<Core>,
    handler: RefCell<Box<dyn TransportHandler>>,
}

struct Core {
    state: ConnectionState,
    host: String,
    port: u16,
    stream: Option<TcpStream>,
    token: Option<Token>,
    outbound: BytesMut,
    inbound: BytesMut,
    write_interest: bool,
}

enum Notice {
    Data(Bytes),
    Eof,
    Drained,
    Error(io::Error),
}

impl Connection {
    pub fn new(reactor: &LoopHandle, handler: impl TransportHandler + 'static) -> Self {
        Self {
            shared: Rc::new(Shared {
                reactor: reactor.clone(),
                core: RefCell::new(Core {
                    state: ConnectionState::Idle,
                    host: String::new(),
                    port: 0,
                    stream: None,
                    token: None,
                    outbound: BytesMut::new(),
                    inbound: BytesMut::new(),
                    write_interest: false,
                }),
                handler: RefCell::new(Box::new(handler)),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.core.borrow().state
    }

    pub fn host(&self) -> String {
        self.shared.core.borrow().host.clone()
    }

    pub fn port(&self) -> u16 {
        self.shared.core.borrow().port
    }

    pub fn downgrade(&self) -> WeakConnection {
        WeakConnection {
            shared: Rc::downgrade(&self.shared),
        }
    }

    /// Starts a non-blocking connect. Name resolution happens here and blocks.
    ///
    /// Failures before the socket is registered are returned directly and
    /// leave the connection `Failed`; later failures go to
    /// [`TransportHandler::on_error`].
    pub fn connect(&self, host: &str, port: u16) -> Result<(), TransportError> {
        {
            let mut core = self.shared.core.borrow_mut();
            if core.state != ConnectionState::Idle {
                return Err(TransportError::InvalidState(core.state));
            }
            core.host = host.to_string();
            core.port = port;
        }

        match self.open_socket(host, port) {
            Ok(()) => Ok(()),
            Err(source) => {
                debug!(host, port, %source, "connect failed");
                self.teardown(ConnectionState::Failed);
                Err(TransportError::Connect {
                    host: host.to_string(),
                    port,
                    source,
                })
            }
        }
    }

    fn open_socket(&self, host: &str, port: u16) -> io::Result<()> {
        let addr = (host, port).to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
        })?;
        let mut stream = TcpStream::connect(addr)?;
        let owner = self.clone();
        let token = self.shared.reactor.register(
            &mut stream,
            Interest::READABLE | Interest::WRITABLE,
            move |readiness| owner.on_ready(readiness),
        )?;

        let mut core = self.shared.core.borrow_mut();
        core.stream = Some(stream);
        core.token = Some(token);
        core.write_interest = true;
        core.state = ConnectionState::Connecting;
        debug!(host, port, %addr, "connecting");
        Ok(())
    }

    /// Queues `data`. Bytes written before the connection opens are sent once
    /// it does; partial writes are retried on the next writability event.
    pub fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut core = self.shared.core.borrow_mut();
        match core.state {
            ConnectionState::Idle | ConnectionState::Connecting => {
                core.outbound.extend_from_slice(data);
                Ok(())
            }
            ConnectionState::Open => {
                core.outbound.extend_from_slice(data);
                let result = core
                    .flush()
                    .and_then(|()| core.sync_interest(&self.shared.reactor));
                drop(core);
                if let Err(err) = result {
                    self.fail_later(TransportError::Io(err));
                }
                Ok(())
            }
            state => Err(TransportError::InvalidState(state)),
        }
    }

    /// Closes the connection after pending writes drain. No handler method is
    /// called as a result, and closing twice is a no-op.
    pub fn close(&self) {
        let mut core = self.shared.core.borrow_mut();
        match core.state {
            ConnectionState::Idle => core.state = ConnectionState::Closed,
            ConnectionState::Connecting => {
                drop(core);
                self.teardown(ConnectionState::Closed);
            }
            ConnectionState::Open => {
                let flushed = core.flush();
                match flushed {
                    Ok(()) if core.outbound.is_empty() => {
                        drop(core);
                        self.teardown(ConnectionState::Closed);
                    }
                    Ok(()) => {
                        core.state = ConnectionState::Closing;
                        let pending = core.outbound.len();
                        let result = core.sync_interest(&self.shared.reactor);
                        drop(core);
                        debug!(pending, "closing once pending writes drain");
                        if result.is_err() {
                            self.teardown(ConnectionState::Failed);
                        }
                    }
                    Err(err) => {
                        drop(core);
                        debug!(%err, "flush on close failed");
                        self.teardown(ConnectionState::Failed);
                    }
                }
            }
            ConnectionState::Closing | ConnectionState::Closed | ConnectionState::Failed => {}
        }
    }

    /// Drops the connection immediately, discarding pending writes. The
    /// handler is not notified.
    pub fn abort(&self) {
        if !self.state().is_terminal() {
            self.teardown(ConnectionState::Failed);
        }
    }

    fn on_ready(&self, readiness: Readiness) {
        if self.state() == ConnectionState::Connecting {
            if !(readiness.writable || readiness.error || readiness.write_closed) {
                return;
            }
            match self.finish_connect() {
                Ok(false) => return,
                Ok(true) => {
                    self.shared.core.borrow_mut().state = ConnectionState::Open;
                    debug!(host = %self.host(), port = self.port(), "connected");
                    self.with_handler(|handler, connection| handler.on_connected(connection));
                }
                Err(source) => {
                    let error = TransportError::Connect {
                        host: self.host(),
                        port: self.port(),
                        source,
                    };
                    self.fail(error);
                    return;
                }
            }
        }

        let notices = self.drive_io(readiness);
        self.deliver(notices);
    }

    fn finish_connect(&self) -> io::Result<bool> {
        let core = self.shared.core.borrow();
        let Some(stream) = core.stream.as_ref() else {
            return Ok(false);
        };
        if let Some(err) = stream.take_error()? {
            return Err(err);
        }
        match stream.peer_addr() {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn drive_io(&self, readiness: Readiness) -> Vec<Notice> {
        let mut notices = Vec::new();
        let mut core = self.shared.core.borrow_mut();
        let core = &mut *core;
        if !matches!(core.state, ConnectionState::Open | ConnectionState::Closing) {
            return notices;
        }

        if readiness.error {
            if let Some(stream) = core.stream.as_ref() {
                match stream.take_error() {
                    Ok(Some(err)) | Err(err) => {
                        notices.push(Notice::Error(err));
                        return notices;
                    }
                    Ok(None) => {}
                }
            }
        }

        if let Err(err) = core
            .flush()
            .and_then(|()| core.sync_interest(&self.shared.reactor))
        {
            notices.push(Notice::Error(err));
            return notices;
        }
        if core.state == ConnectionState::Closing {
            if core.outbound.is_empty() {
                notices.push(Notice::Drained);
            }
            return notices;
        }

        if readiness.readable || readiness.read_closed {
            let (eof, error) = core.fill_inbound();
            if !core.inbound.is_empty() {
                notices.push(Notice::Data(core.inbound.split().freeze()));
            }
            if let Some(err) = error {
                notices.push(Notice::Error(err));
            } else if eof {
                notices.push(Notice::Eof);
            }
        }
        notices
    }

    fn deliver(&self, notices: Vec<Notice>) {
        for notice in notices {
            match notice {
                Notice::Data(data) => {
                    if self.state() == ConnectionState::Open {
                        trace!(bytes = data.len(), "data received");
                        self.with_handler(|handler, connection| handler.on_data(connection, data));
                    }
                }
                Notice::Eof => match self.state() {
                    ConnectionState::Open => {
                        debug!("peer closed connection");
                        self.teardown(ConnectionState::Closed);
                        self.with_handler(|handler, connection| handler.on_closed(connection));
                    }
                    ConnectionState::Closing => self.teardown(ConnectionState::Closed),
                    _ => {}
                },
                Notice::Drained => {
                    if self.state() == ConnectionState::Closing {
                        self.teardown(ConnectionState::Closed);
                    }
                }
                Notice::Error(err) => self.fail(TransportError::Io(err)),
            }
        }
    }

    fn fail(&self, error: TransportError) {
        let state = self.state();
        if state.is_terminal() {
            return;
        }
        self.teardown(ConnectionState::Failed);
        if matches!(state, ConnectionState::Connecting | ConnectionState::Open) {
            warn!(%error, "connection failed");
            self.with_handler(|handler, connection| handler.on_error(connection, error));
        }
    }

    // Used where the handler may already be running further up the stack.
    fn fail_later(&self, error: TransportError) {
        let state = self.state();
        if state.is_terminal() {
            return;
        }
        self.teardown(ConnectionState::Failed);
        if matches!(state, ConnectionState::Connecting | ConnectionState::Open) {
            warn!(%error, "connection failed");
            let connection = self.clone();
            self.shared.reactor.defer(move || {
                connection.with_handler(|handler, connection| handler.on_error(connection, error));
            });
        }
    }

    fn teardown(&self, state: ConnectionState) {
        let (stream, token) = {
            let mut core = self.shared.core.borrow_mut();
            core.state = state;
            core.outbound.clear();
            core.inbound.clear();
            (core.stream.take(), core.token.take())
        };

        if let Some(mut stream) = stream {
            if let Some(token) = token {
                if let Err(err) = self.shared.reactor.deregister(&mut stream, token) {
                    trace!(%err, "deregister failed");
                }
            }
            if state == ConnectionState::Closed {
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
        debug!(?state, "connection released");
    }

    fn with_handler(&self, deliver: impl FnOnce(&mut dyn TransportHandler, &Connection)) {
        match self.shared.handler.try_borrow_mut() {
            Ok(mut handler) => deliver(&mut **handler, self),
            Err(_) => warn!("transport handler re-entered; event dropped"),
        }
    }
}

impl Core {
    fn flush(&mut self) -> io::Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };
        while !self.outbound.is_empty() {
            match stream.write(&self.outbound) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(written) => {
                    trace!(written, "wrote bytes");
                    self.outbound.advance(written);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn fill_inbound(&mut self) -> (bool, Option<io::Error>) {
        let Some(stream) = self.stream.as_mut() else {
            return (false, None);
        };
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => return (true, None),
                Ok(read) => self.inbound.extend_from_slice(&chunk[..read]),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return (false, None),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return (false, Some(err)),
            }
        }
    }

    fn sync_interest(&mut self, reactor: &LoopHandle) -> io::Result<()> {
        let want_write = !self.outbound.is_empty();
        if want_write == self.write_interest {
            return Ok(());
        }
        let (Some(stream), Some(token)) = (self.stream.as_mut(), self.token) else {
            return Ok(());
        };
        let interest = if want_write {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        reactor.reregister(stream, token, interest)?;
        self.write_interest = want_write;
        Ok(())
    }
}

impl WeakConnection {
    pub fn upgrade(&self) -> Option<Connection> {
        self.shared.upgrade().map(|shared| Connection { shared })
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.shared.core.borrow();
        f.debug_struct("Connection")
            .field("state", &core.state)
            .field("host", &core.host)
            .field("port", &core.port)
            .finish()
    }
}

impl fmt::Debug for WeakConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakConnection").finish_non_exhaustive()
    }
}
