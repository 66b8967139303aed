//! CQL protocol-level representation of a `PREPARE` request.

use std::borrow::Cow;
use std::num::TryFromIntError;

use thiserror::Error;

use crate::frame::frame_errors::CqlRequestSerializationError;

use crate::{
    frame::request::{RequestOpcode, SerializableRequest},
    frame::types,
    frame::ProtocolVersion,
};

/// CQL protocol-level representation of an `PREPARE` request,
/// used to prepare a single statement for further execution.
///
/// The body is just the statement text. An empty statement is encoded as a
/// zero-length long string; whether it is valid CQL is for the server to decide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepare<'a> {
    /// CQL statement string to prepare.
    pub query: Cow<'a, str>,
}

impl<'a> Prepare<'a> {
    pub fn new(query: impl Into<Cow<'a, str>>) -> Self {
        Self {
            query: query.into(),
        }
    }
}

impl SerializableRequest for Prepare<'_> {
    const OPCODE: RequestOpcode = RequestOpcode::Prepare;

    fn serialize(
        &self,
        _version: ProtocolVersion,
        buf: &mut Vec<u8>,
    ) -> Result<(), CqlRequestSerializationError> {
        types::write_long_string(&self.query, buf)
            .map_err(PrepareSerializationError::StatementStringSerialization)?;
        Ok(())
    }
}

/// An error type returned when serialization of PREPARE request fails.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum PrepareSerializationError {
    /// Failed to serialize the CQL statement string.
    #[error("Failed to serialize statement contents: {0}")]
    StatementStringSerialization(TryFromIntError),
}

#[cfg(test)]
mod tests {
    use super::Prepare;
    use crate::frame::request::SerializableRequest;
    use crate::frame::ProtocolVersion;

    #[test]
    fn empty_statement_is_a_zero_length_long_string() {
        let body = Prepare::new("").to_bytes(ProtocolVersion::V4).unwrap();
        assert_eq!(body, [0, 0, 0, 0]);
    }

    #[test]
    fn body_is_independent_of_version() {
        let prepare = Prepare::new("SELECT * FROM t");
        let v1 = prepare.to_bytes(ProtocolVersion::V1).unwrap();
        let v4 = prepare.to_bytes(ProtocolVersion::V4).unwrap();
        assert_eq!(v1, v4);
        assert_eq!(&v1[..4], &[0, 0, 0, 15]);
    }
}
