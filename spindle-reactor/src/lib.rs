mod connection;
mod error;
mod event_loop;
#[cfg(test)]
mod event_loop_test;

pub use connection::{Connection, ConnectionState, TransportHandler, WeakConnection};
pub use error::TransportError;
pub use event_loop::{EventLoop, LoopHandle, Readiness};

pub use mio::{Interest, Token};
