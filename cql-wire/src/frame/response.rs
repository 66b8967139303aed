//! Inbound frames: response opcodes and the raw response frame.
//!
//! Decoding response bodies is left to the caller; this module only
//! identifies what kind of response a frame holds.

use bytes::Bytes;

use super::frame_errors::FrameBodyExtensionsParseError;
use super::{parse_response_body_extensions, Compression, FrameParams, ResponseBodyWithExtensions};
use super::TryFromPrimitiveError;

/// Opcode of a response, used to identify the response type in a CQL frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ResponseOpcode {
    Error = 0x00,
    Ready = 0x02,
    Authenticate = 0x03,
    Supported = 0x06,
    Result = 0x08,
    Event = 0x0C,
    AuthChallenge = 0x0E,
    AuthSuccess = 0x10,
}

impl TryFrom<u8> for ResponseOpcode {
    type Error = TryFromPrimitiveError<u8>;

    fn try_from(value: u8) -> Result<Self, TryFromPrimitiveError<u8>> {
        match value {
            0x00 => Ok(Self::Error),
            0x02 => Ok(Self::Ready),
            0x03 => Ok(Self::Authenticate),
            0x06 => Ok(Self::Supported),
            0x08 => Ok(Self::Result),
            0x0C => Ok(Self::Event),
            0x0E => Ok(Self::AuthChallenge),
            0x10 => Ok(Self::AuthSuccess),
            _ => Err(TryFromPrimitiveError {
                enum_name: "ResponseOpcode",
                primitive: value,
            }),
        }
    }
}

/// A frame sent by the server, with its header parsed and its body untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub params: FrameParams,
    pub opcode: ResponseOpcode,
    pub body: Bytes,
}

impl ResponseFrame {
    /// Stream the response answers, or `-1` for server events.
    pub fn stream(&self) -> i16 {
        self.params.stream
    }

    /// Strips the optional prefix (tracing id, warnings, custom payload) off the body,
    /// decompressing it first if the compression flag is set.
    pub fn into_body_with_extensions(
        self,
        compression: Option<Compression>,
    ) -> Result<ResponseBodyWithExtensions, FrameBodyExtensionsParseError> {
        parse_response_body_extensions(self.params.flags, compression, self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::ResponseOpcode;

    #[test]
    fn opcodes_from_byte() {
        assert_eq!(ResponseOpcode::try_from(0x08).unwrap(), ResponseOpcode::Result);
        assert_eq!(ResponseOpcode::try_from(0x10).unwrap(), ResponseOpcode::AuthSuccess);
        // Request opcodes never come back from the server.
        assert!(ResponseOpcode::try_from(0x09).is_err());
    }
}
