//! CQL protocol-level representation of a `EXECUTE` request.

use std::num::TryFromIntError;

use crate::frame::frame_errors::CqlRequestSerializationError;
use crate::frame::ProtocolVersion;
use bytes::Bytes;
use thiserror::Error;

use crate::{
    frame::request::{query, RequestOpcode, SerializableRequest},
    frame::types,
};

use super::query::{QueryParameters, QueryParametersSerializationError};

/// CQL protocol-level representation of an `EXECUTE` request,
/// used to execute a single prepared statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execute<'a> {
    /// ID of the prepared statement to execute.
    pub id: Bytes,

    /// Various parameters controlling the execution of the statement.
    pub parameters: query::QueryParameters<'a>,
}

impl Execute<'_> {
    pub fn new(id: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            parameters: QueryParameters::default(),
        }
    }
}

impl SerializableRequest for Execute<'_> {
    const OPCODE: RequestOpcode = RequestOpcode::Execute;

    fn serialize(
        &self,
        version: ProtocolVersion,
        buf: &mut Vec<u8>,
    ) -> Result<(), CqlRequestSerializationError> {
        // Serializing statement id
        types::write_short_bytes(&self.id[..], buf)
            .map_err(ExecuteSerializationError::StatementIdSerialization)?;

        // Serializing params
        if version == ProtocolVersion::V1 {
            self.parameters
                .serialize_v1(true, buf)
                .map_err(ExecuteSerializationError::QueryParametersSerialization)?;
        } else {
            self.parameters
                .serialize(version, buf)
                .map_err(ExecuteSerializationError::QueryParametersSerialization)?;
        }
        Ok(())
    }
}

/// An error type returned when serialization of EXECUTE request fails.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum ExecuteSerializationError {
    /// Failed to serialize query parameters.
    #[error("Malformed query parameters: {0}")]
    QueryParametersSerialization(QueryParametersSerializationError),

    /// Failed to serialize prepared statement id.
    #[error("Malformed statement id: {0}")]
    StatementIdSerialization(TryFromIntError),
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::Execute;
    use crate::frame::request::SerializableRequest;
    use crate::frame::types::{self, Consistency, RawValue};
    use crate::frame::value::SerializedValues;
    use crate::frame::ProtocolVersion;

    fn execute_with_values() -> Execute<'static> {
        let mut values = SerializedValues::new();
        values.add_value(RawValue::Value(&[0, 0, 0, 42])).unwrap();
        let mut execute = Execute::new(vec![2, 4, 5, 2]);
        execute.parameters.consistency = Consistency::One;
        execute.parameters.values = Cow::Owned(values);
        execute
    }

    #[test]
    fn v1_puts_values_before_consistency() {
        let buf = execute_with_values().to_bytes(ProtocolVersion::V1).unwrap();
        let mut rd = &buf[..];
        assert_eq!(types::read_short_bytes(&mut rd).unwrap(), &[2, 4, 5, 2]);
        assert_eq!(types::read_short(&mut rd).unwrap(), 1);
        assert_eq!(types::read_bytes(&mut rd).unwrap(), &[0, 0, 0, 42]);
        assert_eq!(types::read_consistency(&mut rd).unwrap(), Consistency::One);
        assert!(rd.is_empty());
    }

    #[test]
    fn v2_puts_consistency_and_flags_first() {
        let buf = execute_with_values().to_bytes(ProtocolVersion::V2).unwrap();
        let mut rd = &buf[..];
        assert_eq!(types::read_short_bytes(&mut rd).unwrap(), &[2, 4, 5, 2]);
        assert_eq!(types::read_consistency(&mut rd).unwrap(), Consistency::One);
        assert_eq!(types::read_byte(&mut rd).unwrap(), 0x01);
        assert_eq!(types::read_short(&mut rd).unwrap(), 1);
        assert_eq!(types::read_bytes(&mut rd).unwrap(), &[0, 0, 0, 42]);
        assert!(rd.is_empty());
    }

    #[test]
    fn oversized_id_is_rejected() {
        let execute = Execute::new(vec![0u8; u16::MAX as usize + 1]);
        assert!(execute.to_bytes(ProtocolVersion::V4).is_err());
    }
}
