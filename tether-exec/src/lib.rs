//! Command execution over an interactive terminal channel.
//!
//! The remote side is a raw terminal stream with no message boundaries and
//! no exit-status signalling. [`Executor`] turns it into a sequential
//! "run this command, get exit code + output" primitive by framing every
//! command with a unique completion marker (see [`framing`]).

mod error;
pub mod executor;
pub mod framing;
pub mod registry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;
pub mod websocket;

pub use error::ExecError;
pub use executor::{Executor, ExecutorSettings, Lifecycle};
pub use registry::ExecutorRegistry;
pub use transport::{Channel, ChannelPeer, Connector};
pub use websocket::WebSocketConnector;
