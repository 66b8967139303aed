//! Append-only builder of request frames.
//!
//! The writer is two-phase: the header fields are recorded first, the body is
//! accumulated next, and the header (with the now known body length) is put in
//! front of the body only when the writer is finished.

use std::num::TryFromIntError;

use bytes::BufMut;

use super::frame_errors::FrameSerializationError;
use super::request::RequestOpcode;
use super::{compress_append, types, Compression, FrameParams, ProtocolVersion, RequestFrame};
use super::FLAG_COMPRESSION;

#[derive(Debug, Clone, Copy)]
struct PendingHeader {
    version: ProtocolVersion,
    flags: u8,
    stream: i16,
    opcode: RequestOpcode,
}

/// Builds a single [`RequestFrame`].
///
/// All integers are written big-endian. [`finish`](FrameWriter::finish) consumes
/// the writer, so a frame can be finalized at most once.
#[derive(Debug, Default)]
pub struct FrameWriter {
    header: Option<PendingHeader>,
    body: Vec<u8>,
}

impl FrameWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the header of the frame.
    ///
    /// Fails if `stream` does not fit into the stream field of `version`
    /// (one byte for v1/v2, two bytes for v3/v4). Calling it again replaces
    /// the previously recorded header.
    pub fn write_frame_header(
        &mut self,
        version: ProtocolVersion,
        flags: u8,
        stream: i16,
        opcode: RequestOpcode,
    ) -> Result<(), FrameSerializationError> {
        if !version.has_long_stream_ids() && i8::try_from(stream).is_err() {
            return Err(FrameSerializationError::StreamIdOutOfRange { stream, version });
        }
        self.header = Some(PendingHeader {
            version,
            flags,
            stream,
            opcode,
        });
        Ok(())
    }

    /// Body accumulated so far, for request serializers to append to.
    pub fn body_mut(&mut self) -> &mut Vec<u8> {
        &mut self.body
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    pub fn write_byte(&mut self, v: u8) {
        types::write_byte(v, &mut self.body);
    }

    pub fn write_short(&mut self, v: u16) {
        types::write_short(v, &mut self.body);
    }

    pub fn write_int(&mut self, v: i32) {
        types::write_int(v, &mut self.body);
    }

    pub fn write_long(&mut self, v: i64) {
        types::write_long(v, &mut self.body);
    }

    /// `[string]`: u16 byte length followed by UTF-8 bytes.
    pub fn write_short_string(&mut self, v: &str) -> Result<(), TryFromIntError> {
        types::write_string(v, &mut self.body)
    }

    /// `[long string]`: i32 byte length followed by UTF-8 bytes.
    pub fn write_long_string(&mut self, v: &str) -> Result<(), TryFromIntError> {
        types::write_long_string(v, &mut self.body)
    }

    /// Like [`write_long_string`](Self::write_long_string), with `None` written as length -1.
    pub fn write_long_string_opt(&mut self, v: Option<&str>) -> Result<(), TryFromIntError> {
        types::write_long_string_opt(v, &mut self.body)
    }

    /// Finalizes the frame without compression.
    pub fn finish(self) -> Result<RequestFrame, FrameSerializationError> {
        self.finish_with_compression(None)
    }

    /// Finalizes the frame, compressing the body if `compression` is given.
    pub fn finish_with_compression(
        self,
        compression: Option<Compression>,
    ) -> Result<RequestFrame, FrameSerializationError> {
        let header = self.header.ok_or(FrameSerializationError::InvalidState)?;
        let header_size = header.version.header_size();
        let mut flags = header.flags;

        let mut data = Vec::with_capacity(header_size + self.body.len());
        data.resize(header_size, 0);
        match compression {
            Some(compression) => {
                flags |= FLAG_COMPRESSION;
                compress_append(&self.body, compression, &mut data)?;
            }
            None => data.extend_from_slice(&self.body),
        }

        let body_len = data.len() - header_size;
        let length = u32::try_from(body_len)
            .ok()
            .filter(|len| *len <= i32::MAX as u32)
            .ok_or(FrameSerializationError::BodyTooLarge(body_len))?;

        let mut head = &mut data[..header_size];
        head.put_u8(header.version.as_byte());
        head.put_u8(flags);
        if header.version.has_long_stream_ids() {
            head.put_i16(header.stream);
        } else {
            // Range was checked in write_frame_header.
            head.put_i8(header.stream as i8);
        }
        head.put_u8(header.opcode as u8);
        head.put_u32(length);

        Ok(RequestFrame::new(
            FrameParams {
                version: header.version.as_byte(),
                flags,
                stream: header.stream,
            },
            header.opcode,
            header_size,
            data,
        ))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::FrameWriter;
    use crate::frame::frame_errors::FrameSerializationError;
    use crate::frame::request::RequestOpcode;
    use crate::frame::ProtocolVersion;

    #[test]
    fn primitives_are_big_endian() {
        let mut writer = FrameWriter::new();
        writer
            .write_frame_header(ProtocolVersion::V4, 0, 1, RequestOpcode::Options)
            .unwrap();
        writer.write_byte(0xab);
        writer.write_short(0x0102);
        writer.write_int(-2);
        writer.write_long(0x0102030405060708);
        writer.write_short_string("ab").unwrap();
        writer.write_long_string_opt(None).unwrap();

        let frame = writer.finish().unwrap();
        assert_eq!(
            frame.body(),
            &[
                0xab, 0x01, 0x02, 0xff, 0xff, 0xff, 0xfe, 1, 2, 3, 4, 5, 6, 7, 8, 0, 2, b'a', b'b',
                0xff, 0xff, 0xff, 0xff
            ]
        );
    }

    #[test]
    fn length_field_matches_body() {
        let mut writer = FrameWriter::new();
        writer
            .write_frame_header(ProtocolVersion::V3, 0, 0x0102, RequestOpcode::Prepare)
            .unwrap();
        writer.write_long_string("SELECT * FROM t").unwrap();
        assert_eq!(writer.body_len(), 19);

        let frame = writer.finish().unwrap();
        assert_eq!(
            frame.header(),
            &[0x03, 0x00, 0x01, 0x02, 0x09, 0x00, 0x00, 0x00, 0x13]
        );
        assert_eq!(frame.get_data().len(), 9 + 19);
    }

    #[test]
    fn short_header_for_old_versions() {
        let mut writer = FrameWriter::new();
        writer
            .write_frame_header(ProtocolVersion::V1, 0, -1, RequestOpcode::Options)
            .unwrap();
        let frame = writer.finish().unwrap();
        assert_eq!(frame.get_data(), &[0x01, 0x00, 0xff, 0x05, 0, 0, 0, 0]);
        assert_eq!(frame.params().stream, -1);
    }

    #[test]
    fn stream_must_fit_one_byte_on_v2() {
        let mut writer = FrameWriter::new();
        assert_matches!(
            writer.write_frame_header(ProtocolVersion::V2, 0, 300, RequestOpcode::Query),
            Err(FrameSerializationError::StreamIdOutOfRange {
                stream: 300,
                version: ProtocolVersion::V2
            })
        );
    }

    #[test]
    fn finishing_without_header_fails() {
        let mut writer = FrameWriter::new();
        writer.write_int(1);
        assert_matches!(writer.finish(), Err(FrameSerializationError::InvalidState));
    }
}
