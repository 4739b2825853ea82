pub mod common;
pub mod config;
pub mod rate_limit;
pub mod event;
pub mod diagnostic;
pub mod intake;
pub mod buffer;
pub mod transport;
pub mod formatter;
pub mod worker;
pub mod handler;

pub use common::{Error, ErrorKind, Result};
pub use config::{HandlerConfig, Tunables};
pub use event::Event;
pub use handler::Handler;
