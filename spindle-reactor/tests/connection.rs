use std::cell::RefCell;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::rc::Rc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use assert_matches::assert_matches;
use bytes::Bytes;
use spindle_reactor::{Connection, ConnectionState, EventLoop, TransportError, TransportHandler};

#[derive(Debug)]
enum Seen {
    Connected,
    Data(Vec<u8>),
    Closed,
    Error(TransportError),
}

type Log = Rc<RefCell<Vec<Seen>>>;

struct Recorder {
    log: Log,
    close_on_connect: bool,
    close_on_data: bool,
    payload: Option<Vec<u8>>,
}

impl Recorder {
    fn new(log: &Log) -> Self {
        Self {
            log: Rc::clone(log),
            close_on_connect: false,
            close_on_data: false,
            payload: None,
        }
    }
}

impl TransportHandler for Recorder {
    fn on_connected(&mut self, connection: &Connection) {
        self.log.borrow_mut().push(Seen::Connected);
        if let Some(payload) = self.payload.take() {
            connection.write(&payload).unwrap();
        }
        if self.close_on_connect {
            connection.close();
            connection.close();
        }
    }

    fn on_data(&mut self, connection: &Connection, data: Bytes) {
        self.log.borrow_mut().push(Seen::Data(data.to_vec()));
        if self.close_on_data {
            connection.close();
        }
    }

    fn on_closed(&mut self, _connection: &Connection) {
        self.log.borrow_mut().push(Seen::Closed);
    }

    fn on_error(&mut self, _connection: &Connection, error: TransportError) {
        self.log.borrow_mut().push(Seen::Error(error));
    }
}

fn serve_once<F>(script: F) -> (SocketAddr, JoinHandle<Vec<u8>>)
where
    F: FnOnce(&mut TcpStream) -> Vec<u8> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        script(&mut stream)
    });
    (addr, server)
}

fn read_head(stream: &mut TcpStream) -> Vec<u8> {
    let mut received = Vec::new();
    let mut buf = [0u8; 1024];
    while !received.windows(4).any(|window| window == b"\r\n\r\n") {
        let read = stream.read(&mut buf).unwrap();
        if read == 0 {
            break;
        }
        received.extend_from_slice(&buf[..read]);
    }
    received
}

fn received_bytes(log: &Log) -> Vec<u8> {
    log.borrow()
        .iter()
        .filter_map(|seen| match seen {
            Seen::Data(data) => Some(data.clone()),
            _ => None,
        })
        .flatten()
        .collect()
}

#[test]
fn writes_queued_bytes_and_reads_until_peer_close() {
    let (addr, server) = serve_once(|stream| {
        let received = read_head(stream);
        stream.write_all(b"pong").unwrap();
        received
    });

    let mut event_loop = EventLoop::new().unwrap();
    let log = Log::default();
    let connection = Connection::new(&event_loop.handle(), Recorder::new(&log));
    connection.connect("127.0.0.1", addr.port()).unwrap();
    assert_eq!(connection.state(), ConnectionState::Connecting);
    connection.write(b"ping\r\n\r\n").unwrap();

    event_loop.run().unwrap();

    assert_eq!(server.join().unwrap(), b"ping\r\n\r\n");
    assert_matches!(log.borrow().first(), Some(Seen::Connected));
    assert_matches!(log.borrow().last(), Some(Seen::Closed));
    assert_eq!(received_bytes(&log), b"pong");
    assert_eq!(connection.state(), ConnectionState::Closed);
}

#[test]
fn refused_connection_is_reported_once() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let mut event_loop = EventLoop::new().unwrap();
    let log = Log::default();
    let connection = Connection::new(&event_loop.handle(), Recorder::new(&log));

    match connection.connect("127.0.0.1", port) {
        Err(error) => assert_matches!(error, TransportError::Connect { .. }),
        Ok(()) => {
            event_loop.run().unwrap();
            let log = log.borrow();
            assert_eq!(log.len(), 1);
            assert_matches!(&log[0], Seen::Error(TransportError::Connect { port: p, .. }) if *p == port);
        }
    }
    assert_eq!(connection.state(), ConnectionState::Failed);
}

#[test]
fn closing_twice_fires_nothing() {
    let (addr, server) = serve_once(|stream| {
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).unwrap();
        rest
    });

    let mut event_loop = EventLoop::new().unwrap();
    let log = Log::default();
    let mut recorder = Recorder::new(&log);
    recorder.close_on_connect = true;
    let connection = Connection::new(&event_loop.handle(), recorder);
    connection.connect("127.0.0.1", addr.port()).unwrap();

    event_loop.run().unwrap();
    connection.close();

    assert!(server.join().unwrap().is_empty());
    assert_eq!(log.borrow().len(), 1);
    assert_matches!(log.borrow()[0], Seen::Connected);
    assert_eq!(connection.state(), ConnectionState::Closed);
}

#[test]
fn closing_inside_on_data_stops_delivery() {
    let (addr, server) = serve_once(|stream| {
        stream.set_nodelay(true).unwrap();
        stream.write_all(b"first").unwrap();
        thread::sleep(Duration::from_millis(100));
        let _ = stream.write_all(b"second");
        Vec::new()
    });

    let mut event_loop = EventLoop::new().unwrap();
    let log = Log::default();
    let mut recorder = Recorder::new(&log);
    recorder.close_on_data = true;
    let connection = Connection::new(&event_loop.handle(), recorder);
    connection.connect("127.0.0.1", addr.port()).unwrap();

    event_loop.run().unwrap();
    server.join().unwrap();

    assert_eq!(received_bytes(&log), b"first");
    assert!(!log.borrow().iter().any(|seen| matches!(seen, Seen::Closed | Seen::Error(_))));
}

#[test]
fn close_drains_pending_writes_first() {
    const PAYLOAD: usize = 4 * 1024 * 1024;

    let (addr, server) = serve_once(|stream| {
        let mut received = Vec::new();
        stream.read_to_end(&mut received).unwrap();
        received
    });

    let mut event_loop = EventLoop::new().unwrap();
    let log = Log::default();
    let mut recorder = Recorder::new(&log);
    recorder.payload = Some(vec![b'x'; PAYLOAD]);
    recorder.close_on_connect = true;
    let connection = Connection::new(&event_loop.handle(), recorder);
    connection.connect("127.0.0.1", addr.port()).unwrap();

    event_loop.run().unwrap();

    assert_eq!(server.join().unwrap().len(), PAYLOAD);
    assert_eq!(connection.state(), ConnectionState::Closed);
    assert_eq!(log.borrow().len(), 1);
}

#[test]
fn write_after_close_is_rejected() {
    let event_loop = EventLoop::new().unwrap();
    let log = Log::default();
    let connection = Connection::new(&event_loop.handle(), Recorder::new(&log));
    connection.close();

    assert_matches!(
        connection.write(b"late"),
        Err(TransportError::InvalidState(ConnectionState::Closed))
    );
    assert_matches!(
        connection.connect("127.0.0.1", 80),
        Err(TransportError::InvalidState(ConnectionState::Closed))
    );
}
