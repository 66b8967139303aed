//! Connection-level plumbing: stream ids, response dispatch and the router.

mod connection;
mod dispatch;
mod stream_id;

pub use connection::{Connection, ConnectionConfig, ErrorReceiver, ExhaustionPolicy, QueryResponse};
pub use dispatch::{DispatchTable, ResponseReceiver, ResponseSender};
pub use stream_id::StreamIdMultiplexer;
