//! CQL protocol-level representation of a `STARTUP` request.

use thiserror::Error;

use crate::frame::frame_errors::CqlRequestSerializationError;
use crate::frame::{Compression, ProtocolVersion};

use std::{borrow::Cow, collections::BTreeMap, num::TryFromIntError};

use crate::{
    frame::request::{options, RequestOpcode, SerializableRequest},
    frame::types,
};

/// The CQL protocol-level representation of an `STARTUP` request,
/// used to finalise connection negotiation phase and establish the CQL connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Startup<'a> {
    /// The protocol options that were suggested by the server and accepted by the client.
    pub options: BTreeMap<Cow<'a, str>, Cow<'a, str>>,
}

impl Startup<'_> {
    /// Options identifying this crate, with the given body compression.
    pub fn with_default_options(compression: Option<Compression>) -> Self {
        let mut startup_options: BTreeMap<Cow<'_, str>, Cow<'_, str>> = BTreeMap::new();
        startup_options.insert(
            Cow::Borrowed(options::CQL_VERSION),
            Cow::Borrowed(options::DEFAULT_CQL_VERSION),
        );
        startup_options.insert(
            Cow::Borrowed(options::DRIVER_NAME),
            Cow::Borrowed(options::DEFAULT_DRIVER_NAME),
        );
        startup_options.insert(
            Cow::Borrowed(options::DRIVER_VERSION),
            Cow::Borrowed(options::DEFAULT_DRIVER_VERSION),
        );
        if let Some(compression) = compression {
            startup_options.insert(
                Cow::Borrowed(options::COMPRESSION),
                Cow::Owned(compression.to_string()),
            );
        }
        Self {
            options: startup_options,
        }
    }
}

impl SerializableRequest for Startup<'_> {
    const OPCODE: RequestOpcode = RequestOpcode::Startup;

    fn serialize(
        &self,
        _version: ProtocolVersion,
        buf: &mut Vec<u8>,
    ) -> Result<(), CqlRequestSerializationError> {
        if !self.options.contains_key(options::CQL_VERSION) {
            return Err(StartupSerializationError::MissingCqlVersion.into());
        }
        types::write_string_map(&self.options, buf)
            .map_err(StartupSerializationError::OptionsSerialization)?;
        Ok(())
    }
}

/// An error type returned when serialization of STARTUP request fails.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum StartupSerializationError {
    /// Failed to serialize startup options.
    #[error("Malformed startup options: {0}")]
    OptionsSerialization(TryFromIntError),

    /// The mandatory CQL_VERSION option is absent.
    #[error("Startup options must contain CQL_VERSION")]
    MissingCqlVersion,
}
