//! Stream-id multiplexing for CQL native protocol connections.
//!
//! A CQL connection carries many requests at once. Every request frame is
//! tagged with a stream id, and the server tags its response with the same id.
//! This crate hands out those ids ([`StreamIdMultiplexer`]), matches response
//! frames with the requests awaiting them ([`DispatchTable`]), and ties both to
//! an async byte stream ([`Connection`]).
//!
//! Frames themselves are built and parsed by the `cql-wire` crate.

pub mod errors;
pub mod network;

pub(crate) mod utils;

pub use network::{
    Connection, ConnectionConfig, DispatchTable, ExhaustionPolicy, StreamIdMultiplexer,
};
