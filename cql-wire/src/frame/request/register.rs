//! CQL protocol-level representation of a `REGISTER` request.

use std::num::TryFromIntError;

use thiserror::Error;

use crate::frame::frame_errors::CqlRequestSerializationError;
use crate::frame::ProtocolVersion;

use crate::frame::{
    request::{RequestOpcode, SerializableRequest},
    server_event_type::EventType,
    types,
};

/// The CQL protocol-level representation of an `REGISTER` request,
/// used to subscribe for server events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Register {
    /// A list of event types to register for.
    pub event_types_to_register_for: Vec<EventType>,
}

impl SerializableRequest for Register {
    const OPCODE: RequestOpcode = RequestOpcode::Register;

    fn serialize(
        &self,
        _version: ProtocolVersion,
        buf: &mut Vec<u8>,
    ) -> Result<(), CqlRequestSerializationError> {
        let event_types_list = self
            .event_types_to_register_for
            .iter()
            .map(|event| event.to_string())
            .collect::<Vec<_>>();

        types::write_string_list(&event_types_list, buf)
            .map_err(RegisterSerializationError::EventTypesSerialization)?;
        Ok(())
    }
}

/// An error type returned when serialization of REGISTER request fails.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum RegisterSerializationError {
    /// Failed to serialize event types list.
    #[error("Failed to serialize event types list: {0}")]
    EventTypesSerialization(TryFromIntError),
}

#[cfg(test)]
mod tests {
    use super::Register;
    use crate::frame::request::SerializableRequest;
    use crate::frame::server_event_type::EventType;
    use crate::frame::{types, ProtocolVersion};

    #[test]
    fn event_types_are_a_string_list() {
        let register = Register {
            event_types_to_register_for: vec![EventType::TopologyChange, EventType::SchemaChange],
        };
        let buf = register.to_bytes(ProtocolVersion::V1).unwrap();
        assert_eq!(
            types::read_string_list(&mut &buf[..]).unwrap(),
            vec!["TOPOLOGY_CHANGE".to_owned(), "SCHEMA_CHANGE".to_owned()]
        );
    }
}
