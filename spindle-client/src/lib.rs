mod client;
mod config;
mod error;
mod exchange;
mod request;
mod response;

pub use client::Client;
pub use config::{ClientConfig, ConfigError};
pub use error::ClientError;
pub use request::ClientRequest;
pub use response::ClientResponse;
pub use spindle_net::{Headers, HttpVersion, Limits, Method};
pub use spindle_reactor::{EventLoop, LoopHandle};
