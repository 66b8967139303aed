//! CQL protocol-level representation of a `QUERY` request.

use std::borrow::Cow;
use std::num::TryFromIntError;

use crate::frame::frame_errors::CqlRequestSerializationError;
use crate::frame::value::SerializedValues;
use crate::frame::ProtocolVersion;
use bytes::{BufMut, Bytes};
use thiserror::Error;

use crate::{
    frame::request::{RequestOpcode, SerializableRequest},
    frame::types::{self, Consistency, SerialConsistency},
};

// Query flags
const FLAG_VALUES: u8 = 0x01;
const FLAG_SKIP_METADATA: u8 = 0x02;
const FLAG_PAGE_SIZE: u8 = 0x04;
const FLAG_WITH_PAGING_STATE: u8 = 0x08;
const FLAG_WITH_SERIAL_CONSISTENCY: u8 = 0x10;
const FLAG_WITH_DEFAULT_TIMESTAMP: u8 = 0x20;
const FLAG_WITH_NAMES_FOR_VALUES: u8 = 0x40;

/// CQL protocol-level representation of an `QUERY` request,
/// used to execute a single unprepared statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query<'q> {
    /// CQL statement string to execute.
    pub contents: Cow<'q, str>,

    /// Various parameters controlling the execution of the statement.
    pub parameters: QueryParameters<'q>,
}

impl<'q> Query<'q> {
    /// A query with default parameters (LOCAL_QUORUM, no values, no paging).
    pub fn new(contents: impl Into<Cow<'q, str>>) -> Self {
        Self {
            contents: contents.into(),
            parameters: QueryParameters::default(),
        }
    }
}

impl SerializableRequest for Query<'_> {
    const OPCODE: RequestOpcode = RequestOpcode::Query;

    fn serialize(
        &self,
        version: ProtocolVersion,
        buf: &mut Vec<u8>,
    ) -> Result<(), CqlRequestSerializationError> {
        types::write_long_string(&self.contents, buf)
            .map_err(QuerySerializationError::StatementStringSerialization)?;

        if version == ProtocolVersion::V1 {
            // v1 QUERY carries no bound values, only the consistency.
            self.parameters
                .serialize_v1(false, buf)
                .map_err(QuerySerializationError::QueryParametersSerialization)?;
        } else {
            self.parameters
                .serialize(version, buf)
                .map_err(QuerySerializationError::QueryParametersSerialization)?;
        }
        Ok(())
    }
}

/// Parameters shared by QUERY and EXECUTE requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParameters<'a> {
    pub consistency: Consistency,
    pub serial_consistency: Option<SerialConsistency>,
    pub timestamp: Option<i64>,
    pub page_size: Option<i32>,
    pub paging_state: Option<Bytes>,
    pub skip_metadata: bool,
    pub values: Cow<'a, SerializedValues>,
}

impl Default for QueryParameters<'_> {
    fn default() -> Self {
        Self {
            consistency: Default::default(),
            serial_consistency: None,
            timestamp: None,
            page_size: None,
            paging_state: None,
            skip_metadata: false,
            values: Cow::Borrowed(SerializedValues::EMPTY),
        }
    }
}

impl QueryParameters<'_> {
    /// Serializes `[consistency][flags]...` as laid out by protocol v2 and later.
    pub fn serialize(
        &self,
        version: ProtocolVersion,
        buf: &mut impl BufMut,
    ) -> Result<(), QueryParametersSerializationError> {
        let require = |since: ProtocolVersion, feature: &'static str| {
            if version < since {
                Err(QueryParametersSerializationError::FeatureNotSupported { feature, version })
            } else {
                Ok(())
            }
        };

        require(ProtocolVersion::V2, "query flags")?;
        if self.timestamp.is_some() {
            require(ProtocolVersion::V3, "default timestamp")?;
        }
        if self.values.has_names() {
            require(ProtocolVersion::V3, "named values")?;
        }
        if self.values.has_unset() {
            require(ProtocolVersion::V4, "unset values")?;
        }

        types::write_consistency(self.consistency, buf);

        let mut flags = 0;
        if !self.values.is_empty() {
            flags |= FLAG_VALUES;
        }

        if self.skip_metadata {
            flags |= FLAG_SKIP_METADATA;
        }

        if self.page_size.is_some() {
            flags |= FLAG_PAGE_SIZE;
        }

        if self.paging_state.is_some() {
            flags |= FLAG_WITH_PAGING_STATE;
        }

        if self.serial_consistency.is_some() {
            flags |= FLAG_WITH_SERIAL_CONSISTENCY;
        }

        if self.timestamp.is_some() {
            flags |= FLAG_WITH_DEFAULT_TIMESTAMP;
        }

        if self.values.has_names() {
            flags |= FLAG_WITH_NAMES_FOR_VALUES;
        }

        buf.put_u8(flags);

        if !self.values.is_empty() {
            self.values.write_to_request(buf);
        }

        if let Some(page_size) = self.page_size {
            types::write_int(page_size, buf);
        }

        if let Some(paging_state) = &self.paging_state {
            types::write_bytes(paging_state, buf)
                .map_err(QueryParametersSerializationError::PagingStateSerialization)?;
        }

        if let Some(serial_consistency) = self.serial_consistency {
            types::write_serial_consistency(serial_consistency, buf);
        }

        if let Some(timestamp) = self.timestamp {
            types::write_long(timestamp, buf);
        }

        Ok(())
    }

    /// Serializes the v1 tail: optionally `[short n][value]*`, then `[consistency]`.
    ///
    /// Protocol v1 has no flags byte, so every parameter apart from the
    /// consistency (and, for EXECUTE, positional values) is rejected.
    pub(crate) fn serialize_v1(
        &self,
        with_values: bool,
        buf: &mut impl BufMut,
    ) -> Result<(), QueryParametersSerializationError> {
        let unsupported = |feature: &'static str| {
            QueryParametersSerializationError::FeatureNotSupported {
                feature,
                version: ProtocolVersion::V1,
            }
        };

        if self.serial_consistency.is_some() {
            return Err(unsupported("serial consistency"));
        }
        if self.timestamp.is_some() {
            return Err(unsupported("default timestamp"));
        }
        if self.page_size.is_some() || self.paging_state.is_some() {
            return Err(unsupported("paging"));
        }
        if self.skip_metadata {
            return Err(unsupported("skip metadata"));
        }
        if self.values.has_names() {
            return Err(unsupported("named values"));
        }
        if self.values.has_unset() {
            return Err(unsupported("unset values"));
        }

        if with_values {
            self.values.write_to_request(buf);
        } else if !self.values.is_empty() {
            return Err(unsupported("bound values in QUERY"));
        }

        types::write_consistency(self.consistency, buf);
        Ok(())
    }
}

/// An error type returned when serialization of QUERY request fails.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum QuerySerializationError {
    /// Failed to serialize query parameters.
    #[error("Invalid query parameters: {0}")]
    QueryParametersSerialization(QueryParametersSerializationError),

    /// Failed to serialize the CQL statement string.
    #[error("Failed to serialize a statement content: {0}")]
    StatementStringSerialization(TryFromIntError),
}

/// An error type returned when serialization of query parameters fails.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum QueryParametersSerializationError {
    /// Failed to serialize paging state.
    #[error("Malformed paging state: {0}")]
    PagingStateSerialization(TryFromIntError),

    /// The parameter cannot be expressed in the protocol version in use.
    #[error("{feature} is not supported in protocol {version}")]
    FeatureNotSupported {
        /// Human readable name of the rejected parameter.
        feature: &'static str,
        /// Protocol version the request was being serialized for.
        version: ProtocolVersion,
    },
}
