//! CQL protocol-level representation of a `BATCH` request.

use std::borrow::Cow;
use std::num::TryFromIntError;

use bytes::{BufMut, Bytes};
use thiserror::Error;

use crate::frame::frame_errors::CqlRequestSerializationError;
use crate::frame::value::SerializedValues;
use crate::frame::{ProtocolVersion, TryFromPrimitiveError};

use crate::frame::{
    request::{ensure_available_since_v2, RequestOpcode, SerializableRequest},
    types::{self, Consistency, SerialConsistency},
};

// Batch flags
const FLAG_WITH_SERIAL_CONSISTENCY: u8 = 0x10;
const FLAG_WITH_DEFAULT_TIMESTAMP: u8 = 0x20;

/// The type of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum BatchType {
    /// Atomic batch, written to the batchlog first.
    #[default]
    Logged = 0,
    /// Non-atomic batch.
    Unlogged = 1,
    /// Batch of counter updates.
    Counter = 2,
}

impl TryFrom<u8> for BatchType {
    type Error = TryFromPrimitiveError<u8>;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Logged),
            1 => Ok(Self::Unlogged),
            2 => Ok(Self::Counter),
            _ => Err(TryFromPrimitiveError {
                enum_name: "BatchType",
                primitive: value,
            }),
        }
    }
}

/// A single statement of a batch: either CQL text or the id of a prepared statement.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum BatchStatement<'a> {
    /// An unprepared statement.
    Query {
        /// Statement text.
        text: Cow<'a, str>,
    },
    /// A previously prepared statement.
    Prepared {
        /// Id returned by the server in RESULT::Prepared.
        id: Bytes,
    },
}

impl BatchStatement<'_> {
    fn serialize(&self, buf: &mut impl BufMut) -> Result<(), BatchSerializationError> {
        match self {
            Self::Query { text } => {
                buf.put_u8(0);
                types::write_long_string(text, buf)
                    .map_err(BatchSerializationError::StatementStringSerialization)?;
            }
            Self::Prepared { id } => {
                buf.put_u8(1);
                types::write_short_bytes(id, buf)
                    .map_err(BatchSerializationError::StatementIdSerialization)?;
            }
        }

        Ok(())
    }
}

/// CQL protocol-level representation of a `BATCH` request,
/// used to execute a batch of (prepared, unprepared, or mix of both) statements.
///
/// `values` holds one list per statement, in the same order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<'b> {
    pub batch_type: BatchType,
    pub statements: Vec<BatchStatement<'b>>,
    pub values: Vec<Cow<'b, SerializedValues>>,
    pub consistency: Consistency,
    pub serial_consistency: Option<SerialConsistency>,
    pub timestamp: Option<i64>,
}

impl<'b> Batch<'b> {
    /// An empty batch of the given type.
    pub fn new(batch_type: BatchType) -> Self {
        Self {
            batch_type,
            statements: Vec::new(),
            values: Vec::new(),
            consistency: Consistency::default(),
            serial_consistency: None,
            timestamp: None,
        }
    }

    /// Appends a statement together with its bound values.
    pub fn append_statement(
        &mut self,
        statement: BatchStatement<'b>,
        values: impl Into<Cow<'b, SerializedValues>>,
    ) {
        self.statements.push(statement);
        self.values.push(values.into());
    }
}

impl SerializableRequest for Batch<'_> {
    const OPCODE: RequestOpcode = RequestOpcode::Batch;

    fn serialize(
        &self,
        version: ProtocolVersion,
        buf: &mut Vec<u8>,
    ) -> Result<(), CqlRequestSerializationError> {
        ensure_available_since_v2(Self::OPCODE.kind(), version)?;
        self.serialize_body(version, buf)?;
        Ok(())
    }
}

impl Batch<'_> {
    fn serialize_body(
        &self,
        version: ProtocolVersion,
        buf: &mut impl BufMut,
    ) -> Result<(), BatchSerializationError> {
        if version < ProtocolVersion::V3 {
            if self.serial_consistency.is_some() {
                return Err(BatchSerializationError::FeatureNotSupported {
                    feature: "serial consistency",
                    version,
                });
            }
            if self.timestamp.is_some() {
                return Err(BatchSerializationError::FeatureNotSupported {
                    feature: "default timestamp",
                    version,
                });
            }
        }

        if self.values.len() != self.statements.len() {
            return Err(BatchSerializationError::ValuesAndStatementsLengthMismatch {
                n_value_lists: self.values.len(),
                n_statements: self.statements.len(),
            });
        }

        // Serializing type of batch
        buf.put_u8(self.batch_type as u8);

        // Serializing queries
        types::write_short(
            self.statements
                .len()
                .try_into()
                .map_err(BatchSerializationError::StatementsCount)?,
            buf,
        );

        for (statement, values) in self.statements.iter().zip(self.values.iter()) {
            // Names for values in batches are not supported by servers.
            if values.has_names() {
                return Err(BatchSerializationError::NamedValues);
            }
            if values.has_unset() && version < ProtocolVersion::V4 {
                return Err(BatchSerializationError::FeatureNotSupported {
                    feature: "unset values",
                    version,
                });
            }
            statement.serialize(buf)?;
            values.write_to_request(buf);
        }

        // Serializing consistency
        types::write_consistency(self.consistency, buf);

        if version < ProtocolVersion::V3 {
            return Ok(());
        }

        // Serializing flags
        let mut flags = 0;
        if self.serial_consistency.is_some() {
            flags |= FLAG_WITH_SERIAL_CONSISTENCY;
        }
        if self.timestamp.is_some() {
            flags |= FLAG_WITH_DEFAULT_TIMESTAMP;
        }

        buf.put_u8(flags);

        if let Some(serial_consistency) = self.serial_consistency {
            types::write_serial_consistency(serial_consistency, buf);
        }
        if let Some(timestamp) = self.timestamp {
            types::write_long(timestamp, buf);
        }

        Ok(())
    }
}

/// An error type returned when serialization of BATCH request fails.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum BatchSerializationError {
    /// Maximum number of batch statements exceeded.
    #[error("Too many statements in the batch: {0}")]
    StatementsCount(TryFromIntError),

    /// Number of value lists does not match the number of statements.
    #[error(
        "Length of provided values must be equal to number of batch statements \
        (got {n_value_lists} values, {n_statements} statements)"
    )]
    ValuesAndStatementsLengthMismatch {
        /// Number of value lists.
        n_value_lists: usize,
        /// Number of statements.
        n_statements: usize,
    },

    /// Failed to serialize a CQL statement string.
    #[error("Failed to serialize batch statement contents: {0}")]
    StatementStringSerialization(TryFromIntError),

    /// Failed to serialize a prepared statement id.
    #[error("Malformed prepared statement id: {0}")]
    StatementIdSerialization(TryFromIntError),

    /// Batch statements cannot bind values by name.
    #[error("Named values are not allowed in batch statements")]
    NamedValues,

    /// The parameter cannot be expressed in the protocol version in use.
    #[error("{feature} is not supported in protocol {version}")]
    FeatureNotSupported {
        /// Human readable name of the rejected parameter.
        feature: &'static str,
        /// Protocol version the request was being serialized for.
        version: ProtocolVersion,
    },
}
