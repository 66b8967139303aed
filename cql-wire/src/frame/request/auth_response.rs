//! CQL protocol-level representation of an `AUTH_RESPONSE` request.

use std::num::TryFromIntError;

use thiserror::Error;

use crate::frame::frame_errors::CqlRequestSerializationError;
use crate::frame::request::{ensure_available_since_v2, RequestOpcode, SerializableRequest};
use crate::frame::types::write_bytes_opt;
use crate::frame::ProtocolVersion;

/// The CQL protocol-level representation of an `AUTH_RESPONSE` request,
/// carrying the client's answer to an authentication challenge.
///
/// Protocol v1 authenticates with a CREDENTIALS message instead, so this
/// request only exists from v2 on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResponse {
    /// Opaque authenticator token. `None` is sent as a null `[bytes]`.
    pub response: Option<Vec<u8>>,
}

impl SerializableRequest for AuthResponse {
    const OPCODE: RequestOpcode = RequestOpcode::AuthResponse;

    fn serialize(
        &self,
        version: ProtocolVersion,
        buf: &mut Vec<u8>,
    ) -> Result<(), CqlRequestSerializationError> {
        ensure_available_since_v2(Self::OPCODE.kind(), version)?;
        write_bytes_opt(self.response.as_ref(), buf)
            .map_err(AuthResponseSerializationError::ResponseSerialization)?;
        Ok(())
    }
}

/// An error type returned when serialization of AUTH_RESPONSE request fails.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum AuthResponseSerializationError {
    /// Maximum response's body length exceeded.
    #[error("AUTH_RESPONSE body bytes length too big: {0}")]
    ResponseSerialization(TryFromIntError),
}
