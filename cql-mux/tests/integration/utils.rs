use cql_wire::ProtocolVersion;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

pub(crate) fn setup_tracing() {
    let _ = tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(tracing_subscriber::fmt::TestWriter::new())
        .try_init();
}

/// A request frame as seen by the server.
#[derive(Debug)]
pub(crate) struct ReceivedRequest {
    pub(crate) stream: i16,
    pub(crate) opcode: u8,
    pub(crate) body: Vec<u8>,
}

/// Server side of an in-memory connection.
pub(crate) struct FakeServer {
    stream: DuplexStream,
    version: ProtocolVersion,
}

impl FakeServer {
    pub(crate) fn new(stream: DuplexStream, version: ProtocolVersion) -> Self {
        Self { stream, version }
    }

    pub(crate) async fn read_request(&mut self) -> ReceivedRequest {
        let mut header = vec![0u8; self.version.header_size()];
        self.stream.read_exact(&mut header).await.unwrap();
        assert_eq!(header[0], self.version.as_byte(), "request direction bit set");

        let (stream, rest) = if self.version.has_long_stream_ids() {
            (i16::from_be_bytes([header[2], header[3]]), &header[4..])
        } else {
            (header[2] as i8 as i16, &header[3..])
        };
        let opcode = rest[0];
        let len = u32::from_be_bytes([rest[1], rest[2], rest[3], rest[4]]) as usize;

        let mut body = vec![0u8; len];
        self.stream.read_exact(&mut body).await.unwrap();
        ReceivedRequest {
            stream,
            opcode,
            body,
        }
    }

    pub(crate) async fn respond(&mut self, stream: i16, opcode: u8, flags: u8, body: &[u8]) {
        let mut frame = vec![0x80 | self.version.as_byte(), flags];
        if self.version.has_long_stream_ids() {
            frame.extend_from_slice(&stream.to_be_bytes());
        } else {
            frame.push(stream as i8 as u8);
        }
        frame.push(opcode);
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(body);
        self.stream.write_all(&frame).await.unwrap();
    }

    pub(crate) async fn send_raw(&mut self, data: &[u8]) {
        self.stream.write_all(data).await.unwrap();
    }

    pub(crate) fn into_inner(self) -> DuplexStream {
        self.stream
    }
}

pub(crate) const OPCODE_READY: u8 = 0x02;
pub(crate) const OPCODE_RESULT: u8 = 0x08;
pub(crate) const OPCODE_EVENT: u8 = 0x0C;
