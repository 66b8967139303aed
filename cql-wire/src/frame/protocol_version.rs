use std::fmt;

use super::TryFromPrimitiveError;

/// Revision of the CQL native protocol a frame is encoded with.
///
/// The version decides the layout of the frame header (the stream field is one
/// byte wide up to v2 and two bytes wide from v3 on) and the layout of several
/// request bodies.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ProtocolVersion {
    /// Native protocol v1.
    V1 = 0x01,
    /// Native protocol v2.
    V2 = 0x02,
    /// Native protocol v3.
    V3 = 0x03,
    /// Native protocol v4.
    V4 = 0x04,
}

impl ProtocolVersion {
    /// The newest version this crate can encode.
    pub const LATEST: ProtocolVersion = ProtocolVersion::V4;

    /// Raw version byte, as it appears in a request header.
    #[inline]
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Whether the stream field of the header is two bytes wide.
    #[inline]
    pub fn has_long_stream_ids(self) -> bool {
        self >= ProtocolVersion::V3
    }

    /// Width of the stream field in the frame header, in bytes.
    #[inline]
    pub fn stream_id_width(self) -> usize {
        if self.has_long_stream_ids() {
            2
        } else {
            1
        }
    }

    /// Size of the whole frame header, in bytes.
    #[inline]
    pub fn header_size(self) -> usize {
        // version + flags + stream + opcode + length
        1 + 1 + self.stream_id_width() + 1 + 4
    }

    /// Number of stream ids a client may use concurrently on one connection.
    ///
    /// Legal ids are `0..max_stream_count()`; negative ids are reserved
    /// for frames initiated by the server.
    #[inline]
    pub fn max_stream_count(self) -> usize {
        if self.has_long_stream_ids() {
            i16::MAX as usize + 1
        } else {
            i8::MAX as usize + 1
        }
    }

    /// Whether `stream` may be used by a client request in this version.
    #[inline]
    pub fn is_valid_request_stream(self, stream: i16) -> bool {
        stream >= 0 && (stream as usize) < self.max_stream_count()
    }
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = TryFromPrimitiveError<u8>;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::V1),
            0x02 => Ok(Self::V2),
            0x03 => Ok(Self::V3),
            0x04 => Ok(Self::V4),
            _ => Err(TryFromPrimitiveError {
                enum_name: "ProtocolVersion",
                primitive: value,
            }),
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.as_byte())
    }
}

#[cfg(test)]
mod tests {
    use super::ProtocolVersion;

    #[test]
    fn stream_field_width_follows_version() {
        assert_eq!(ProtocolVersion::V1.header_size(), 8);
        assert_eq!(ProtocolVersion::V2.header_size(), 8);
        assert_eq!(ProtocolVersion::V3.header_size(), 9);
        assert_eq!(ProtocolVersion::V4.header_size(), 9);

        assert_eq!(ProtocolVersion::V2.max_stream_count(), 128);
        assert_eq!(ProtocolVersion::V4.max_stream_count(), 32768);
    }

    #[test]
    fn request_stream_range() {
        assert!(ProtocolVersion::V2.is_valid_request_stream(0));
        assert!(ProtocolVersion::V2.is_valid_request_stream(127));
        assert!(!ProtocolVersion::V2.is_valid_request_stream(128));
        assert!(!ProtocolVersion::V2.is_valid_request_stream(-1));
        assert!(ProtocolVersion::V3.is_valid_request_stream(i16::MAX));
    }

    #[test]
    fn unknown_versions_are_rejected() {
        for v in [0u8, 5, 0x84, 0xff] {
            assert!(ProtocolVersion::try_from(v).is_err());
        }
        assert_eq!(ProtocolVersion::try_from(3).unwrap(), ProtocolVersion::V3);
    }
}
