//! Defines CQL native protocol frames and the requests a client sends in them.
//!
//! The crate is purely about bytes: it turns typed requests into
//! [`RequestFrame`](frame::RequestFrame)s, and reads the header of inbound
//! response frames. Correlating responses with requests on a shared
//! connection is left to a higher layer.

pub mod frame;

pub use crate::frame::types::Consistency;
pub use crate::frame::ProtocolVersion;
