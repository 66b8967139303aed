pub mod frame_errors;
mod protocol_version;
pub mod request;
pub mod response;
pub mod server_event_type;
pub mod types;
pub mod value;
pub mod writer;

pub use protocol_version::ProtocolVersion;

use bytes::{Buf, BufMut, Bytes};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

use std::collections::HashMap;
use std::fmt::Display;

use frame_errors::{
    FrameBodyExtensionsParseError, FrameHeaderParseError, FrameSerializationError,
};
use request::RequestOpcode;
use response::{ResponseFrame, ResponseOpcode};

// Frame flags
pub const FLAG_COMPRESSION: u8 = 0x01;
pub const FLAG_TRACING: u8 = 0x02;
pub const FLAG_CUSTOM_PAYLOAD: u8 = 0x04;
pub const FLAG_WARNING: u8 = 0x08;

// Direction bit of the version byte, set on frames sent by the server.
const RESPONSE_DIRECTION: u8 = 0x80;

/// Largest body a frame may carry, compressed or not (256 MiB).
pub const MAX_FRAME_BODY_SIZE: usize = 256 * 1024 * 1024;

/// The wire protocol compression algorithm.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Compression {
    /// LZ4 compression algorithm.
    Lz4,
    /// Snappy compression algorithm.
    Snappy,
}

impl Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compression::Lz4 => f.write_str("lz4"),
            Compression::Snappy => f.write_str("snappy"),
        }
    }
}

// Parts of the frame header which are not determined by the request/response type.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameParams {
    pub version: u8,
    pub flags: u8,
    pub stream: i16,
}

impl Default for FrameParams {
    fn default() -> Self {
        Self {
            version: ProtocolVersion::LATEST.as_byte(),
            flags: 0x00,
            stream: 0,
        }
    }
}

/// A fully encoded request frame: header followed by body.
///
/// Built once by [`FrameWriter`](writer::FrameWriter) and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    params: FrameParams,
    opcode: RequestOpcode,
    header_size: usize,
    data: Vec<u8>,
}

impl RequestFrame {
    pub(crate) fn new(
        params: FrameParams,
        opcode: RequestOpcode,
        header_size: usize,
        data: Vec<u8>,
    ) -> Self {
        Self {
            params,
            opcode,
            header_size,
            data,
        }
    }

    pub fn params(&self) -> FrameParams {
        self.params
    }

    pub fn opcode(&self) -> RequestOpcode {
        self.opcode
    }

    pub fn header(&self) -> &[u8] {
        &self.data[..self.header_size]
    }

    /// Body as it goes on the wire (compressed, if compression was requested).
    pub fn body(&self) -> &[u8] {
        &self.data[self.header_size..]
    }

    /// The whole frame, ready to be written to the transport.
    pub fn get_data(&self) -> &[u8] {
        &self.data[..]
    }

    pub fn into_bytes(self) -> Bytes {
        self.data.into()
    }
}

/// Reads one frame sent by the server.
///
/// The header size depends on the version, so the version byte is read on its
/// own first.
pub async fn read_response_frame(
    reader: &mut (impl AsyncRead + Unpin),
) -> Result<ResponseFrame, FrameHeaderParseError> {
    let raw_version = reader
        .read_u8()
        .await
        .map_err(FrameHeaderParseError::HeaderIoError)?;
    if raw_version & RESPONSE_DIRECTION != RESPONSE_DIRECTION {
        return Err(FrameHeaderParseError::FrameFromClient);
    }
    let version_number = raw_version & !RESPONSE_DIRECTION;
    let version = ProtocolVersion::try_from(version_number)
        .map_err(|_| FrameHeaderParseError::VersionNotSupported(version_number))?;

    let mut raw_header = [0u8; 8];
    let raw_header = &mut raw_header[..version.header_size() - 1];
    reader
        .read_exact(raw_header)
        .await
        .map_err(FrameHeaderParseError::HeaderIoError)?;

    let mut buf = &raw_header[..];

    let flags = buf.get_u8();
    let stream = if version.has_long_stream_ids() {
        buf.get_i16()
    } else {
        buf.get_i8() as i16
    };

    let params = FrameParams {
        version: raw_version,
        flags,
        stream,
    };

    let opcode = ResponseOpcode::try_from(buf.get_u8())?;

    let length = buf.get_u32() as usize;
    if length > MAX_FRAME_BODY_SIZE {
        return Err(FrameHeaderParseError::FrameTooLarge {
            length,
            max: MAX_FRAME_BODY_SIZE,
        });
    }

    let mut raw_body = Vec::with_capacity(length).limit(length);
    while raw_body.has_remaining_mut() {
        let read = reader.read_buf(&mut raw_body).await;
        let n = read.map_err(|err| {
            FrameHeaderParseError::BodyChunkIoError(raw_body.remaining_mut(), err)
        })?;
        if n == 0 {
            // EOF, too early
            return Err(FrameHeaderParseError::ConnectionClosed(
                raw_body.remaining_mut(),
                length,
            ));
        }
    }

    Ok(ResponseFrame {
        params,
        opcode,
        body: raw_body.into_inner().into(),
    })
}

/// A response body with the optional flag-controlled prefix split off.
#[derive(Debug)]
pub struct ResponseBodyWithExtensions {
    pub trace_id: Option<Uuid>,
    pub warnings: Vec<String>,
    pub body: Bytes,
    pub custom_payload: Option<HashMap<String, Bytes>>,
}

pub fn parse_response_body_extensions(
    flags: u8,
    compression: Option<Compression>,
    mut body: Bytes,
) -> Result<ResponseBodyWithExtensions, FrameBodyExtensionsParseError> {
    if flags & FLAG_COMPRESSION != 0 {
        if let Some(compression) = compression {
            body = decompress(&body, compression)?.into();
        } else {
            return Err(FrameBodyExtensionsParseError::NoCompressionNegotiated);
        }
    }

    let trace_id = if flags & FLAG_TRACING != 0 {
        let buf = &mut &*body;
        let trace_id =
            types::read_uuid(buf).map_err(FrameBodyExtensionsParseError::TraceIdParse)?;
        body.advance(16);
        Some(trace_id)
    } else {
        None
    };

    let warnings = if flags & FLAG_WARNING != 0 {
        let body_len = body.len();
        let buf = &mut &*body;
        let warnings = types::read_string_list(buf)
            .map_err(FrameBodyExtensionsParseError::WarningsListParse)?;
        let buf_len = buf.len();
        body.advance(body_len - buf_len);
        warnings
    } else {
        Vec::new()
    };

    let custom_payload = if flags & FLAG_CUSTOM_PAYLOAD != 0 {
        let body_len = body.len();
        let buf = &mut &*body;
        let payload_map = types::read_bytes_map(buf)
            .map_err(FrameBodyExtensionsParseError::CustomPayloadMapParse)?;
        let buf_len = buf.len();
        body.advance(body_len - buf_len);
        Some(payload_map)
    } else {
        None
    };

    Ok(ResponseBodyWithExtensions {
        trace_id,
        warnings,
        body,
        custom_payload,
    })
}

pub(crate) fn compress_append(
    uncomp_body: &[u8],
    compression: Compression,
    out: &mut Vec<u8>,
) -> Result<(), FrameSerializationError> {
    match compression {
        Compression::Lz4 => {
            let uncomp_len = u32::try_from(uncomp_body.len())
                .map_err(|_| FrameSerializationError::BodyTooLarge(uncomp_body.len()))?;
            let tmp = lz4_flex::compress(uncomp_body);
            out.reserve_exact(std::mem::size_of::<u32>() + tmp.len());
            out.put_u32(uncomp_len);
            out.extend_from_slice(&tmp[..]);
            Ok(())
        }
        Compression::Snappy => {
            let old_size = out.len();
            out.resize(old_size + snap::raw::max_compress_len(uncomp_body.len()), 0);
            let compressed_size = snap::raw::Encoder::new()
                .compress(uncomp_body, &mut out[old_size..])
                .map_err(|_| FrameSerializationError::FrameCompression)?;
            out.truncate(old_size + compressed_size);
            Ok(())
        }
    }
}

fn decompress(
    mut comp_body: &[u8],
    compression: Compression,
) -> Result<Vec<u8>, FrameBodyExtensionsParseError> {
    match compression {
        Compression::Lz4 => {
            if comp_body.len() < std::mem::size_of::<u32>() {
                return Err(FrameBodyExtensionsParseError::FrameDecompression);
            }
            let uncomp_len = comp_body.get_u32() as usize;
            if uncomp_len > MAX_FRAME_BODY_SIZE {
                return Err(FrameBodyExtensionsParseError::DecompressedBodyTooLarge(uncomp_len));
            }
            lz4_flex::decompress(comp_body, uncomp_len)
                .map_err(|_| FrameBodyExtensionsParseError::FrameDecompression)
        }
        Compression::Snappy => {
            let uncomp_len = snap::raw::decompress_len(comp_body)
                .map_err(|_| FrameBodyExtensionsParseError::FrameDecompression)?;
            if uncomp_len > MAX_FRAME_BODY_SIZE {
                return Err(FrameBodyExtensionsParseError::DecompressedBodyTooLarge(uncomp_len));
            }
            snap::raw::Decoder::new()
                .decompress_vec(comp_body)
                .map_err(|_| FrameBodyExtensionsParseError::FrameDecompression)
        }
    }
}

/// An error type for parsing an enum value from a primitive.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("No discrimant in enum `{enum_name}` matches the value `{primitive:?}`")]
pub struct TryFromPrimitiveError<T: Copy + std::fmt::Debug> {
    pub(crate) enum_name: &'static str,
    pub(crate) primitive: T,
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;
    use bytes::Bytes;

    use super::*;

    #[test]
    fn test_lz4_compress() {
        let mut out = Vec::from(&b"Hello"[..]);
        let uncomp_body = b", World!";
        let compression = Compression::Lz4;
        let expect = vec![
            72, 101, 108, 108, 111, 0, 0, 0, 8, 128, 44, 32, 87, 111, 114, 108, 100, 33,
        ];

        compress_append(uncomp_body, compression, &mut out).unwrap();
        assert_eq!(expect, out);
    }

    #[test]
    fn test_decompress_inverts_compress() {
        let uncomp_body = "Hello, World!".repeat(100);
        for compression in [Compression::Lz4, Compression::Snappy] {
            let mut comp_body = Vec::new();
            compress_append(uncomp_body.as_bytes(), compression, &mut comp_body).unwrap();
            assert!(comp_body.len() < uncomp_body.len());
            let result = decompress(&comp_body[..], compression).unwrap();
            assert_eq!(uncomp_body.as_bytes(), result);
        }
    }

    #[test]
    fn truncated_lz4_body_is_rejected() {
        assert_matches!(
            decompress(&[0, 0], Compression::Lz4),
            Err(FrameBodyExtensionsParseError::FrameDecompression)
        );
    }

    #[test]
    fn oversized_decompressed_length_is_rejected() {
        // 512 MiB announced, no data behind it.
        let lz4_body = [0x20, 0, 0, 0, 0];
        assert_matches!(
            decompress(&lz4_body, Compression::Lz4),
            Err(FrameBodyExtensionsParseError::DecompressedBodyTooLarge(0x2000_0000))
        );

        let snappy_body = [0x80, 0x80, 0x80, 0x80, 0x02];
        assert_matches!(
            decompress(&snappy_body, Compression::Snappy),
            Err(FrameBodyExtensionsParseError::DecompressedBodyTooLarge(0x2000_0000))
        );
    }

    #[tokio::test]
    async fn reads_v4_response() {
        let mut raw: Vec<u8> = vec![0x84, 0x00, 0x01, 0x02, 0x08, 0x00, 0x00, 0x00, 0x04];
        raw.extend_from_slice(&[0, 0, 0, 1]);
        raw.extend_from_slice(&[0x84, 0x00, 0x00, 0x03, 0x02, 0, 0, 0, 0]);
        let mut reader = &raw[..];

        let frame = read_response_frame(&mut reader).await.unwrap();
        assert_eq!(frame.params.version, 0x84);
        assert_eq!(frame.stream(), 0x0102);
        assert_eq!(frame.opcode, ResponseOpcode::Result);
        assert_eq!(&frame.body[..], &[0, 0, 0, 1]);

        let frame = read_response_frame(&mut reader).await.unwrap();
        assert_eq!(frame.stream(), 3);
        assert_eq!(frame.opcode, ResponseOpcode::Ready);
        assert!(frame.body.is_empty());
    }

    #[tokio::test]
    async fn reads_v2_event_with_one_byte_stream() {
        let raw = [0x82, 0x00, 0xff, 0x0c, 0, 0, 0, 2, 0xaa, 0xbb];
        let frame = read_response_frame(&mut &raw[..]).await.unwrap();
        assert_eq!(frame.stream(), -1);
        assert_eq!(frame.opcode, ResponseOpcode::Event);
        assert_eq!(&frame.body[..], &[0xaa, 0xbb]);
    }

    #[tokio::test]
    async fn rejects_malformed_headers() {
        let from_client = [0x04, 0x00, 0x00, 0x01, 0x02, 0, 0, 0, 0];
        assert_matches!(
            read_response_frame(&mut &from_client[..]).await,
            Err(FrameHeaderParseError::FrameFromClient)
        );

        let v5 = [0x85, 0x00, 0x00, 0x01, 0x02, 0, 0, 0, 0];
        assert_matches!(
            read_response_frame(&mut &v5[..]).await,
            Err(FrameHeaderParseError::VersionNotSupported(5))
        );

        let bad_opcode = [0x84, 0x00, 0x00, 0x01, 0x09, 0, 0, 0, 0];
        assert_matches!(
            read_response_frame(&mut &bad_opcode[..]).await,
            Err(FrameHeaderParseError::UnknownResponseOpcode(_))
        );

        let truncated = [0x84, 0x00, 0x00, 0x01, 0x08, 0, 0, 0, 4, 1, 2];
        assert_matches!(
            read_response_frame(&mut &truncated[..]).await,
            Err(FrameHeaderParseError::ConnectionClosed(2, 4))
        );
    }

    #[tokio::test]
    async fn rejects_oversized_body_length() {
        let huge = [0x84, 0x00, 0x00, 0x01, 0x08, 0xff, 0xff, 0xff, 0xff, 1, 2];
        assert_matches!(
            read_response_frame(&mut &huge[..]).await,
            Err(FrameHeaderParseError::FrameTooLarge { length: 0xffff_ffff, max })
                if max == MAX_FRAME_BODY_SIZE
        );

        let just_over = (MAX_FRAME_BODY_SIZE as u32 + 1).to_be_bytes();
        let mut header = vec![0x82, 0x00, 0x01, 0x08];
        header.extend_from_slice(&just_over);
        assert_matches!(
            read_response_frame(&mut &header[..]).await,
            Err(FrameHeaderParseError::FrameTooLarge { .. })
        );
    }

    #[test]
    fn body_extensions_are_split_off() {
        let trace_id = Uuid::from_u128(0x0102_0304);
        let mut body = Vec::new();
        body.extend_from_slice(trace_id.as_bytes());
        types::write_string_list(&["careful"], &mut body).unwrap();
        body.extend_from_slice(&[0, 0, 0, 2]);

        let parsed = parse_response_body_extensions(
            FLAG_TRACING | FLAG_WARNING,
            None,
            Bytes::from(body),
        )
        .unwrap();
        assert_eq!(parsed.trace_id, Some(trace_id));
        assert_eq!(parsed.warnings, vec!["careful".to_owned()]);
        assert_eq!(&parsed.body[..], &[0, 0, 0, 2]);
        assert!(parsed.custom_payload.is_none());

        assert_matches!(
            parse_response_body_extensions(FLAG_COMPRESSION, None, Bytes::new()),
            Err(FrameBodyExtensionsParseError::NoCompressionNegotiated)
        );
    }
}
