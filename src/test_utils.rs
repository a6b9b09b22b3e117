//! In-memory transport and codec for exercising sessions without a server.
//!
//! This module backs the crate's own tests and benches and is public so
//! applications can drive their session logic the same way. Nothing here
//! is meant for production traffic: the codec is a minimal little-endian
//! layout with none of the evolution guarantees a real wire format needs.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Result, SessionError};
use crate::transport::{MessageSink, MessageStream};
use crate::types::{FrameEnvelope, PayloadKind, ResultBatch, ResultItem, ResultStatus, Welcome};
use crate::wire::{ServerMessage, WireCodec};

const TAG_FRAME: u8 = 0x01;
const TAG_WELCOME: u8 = 0x02;
const TAG_RESULT: u8 = 0x03;

/// Little-endian test codec for the session control protocol.
#[derive(Debug, Default, Clone, Copy)]
pub struct TestCodec;

impl TestCodec {
    /// Encode a welcome message as the server would.
    pub fn encode_welcome(&self, welcome: &Welcome) -> Vec<u8> {
        let mut buf = vec![TAG_WELCOME];
        put_u32(&mut buf, welcome.sources_consumed.len() as u32);
        for source in &welcome.sources_consumed {
            put_str(&mut buf, source);
        }
        put_u32(&mut buf, welcome.tokens_per_source);
        buf
    }

    /// Encode a result batch as the server would.
    pub fn encode_result(&self, batch: &ResultBatch) -> Vec<u8> {
        let mut buf = vec![TAG_RESULT];
        put_str(&mut buf, &batch.source_name);
        put_u64(&mut buf, batch.frame_seq);
        put_u64(&mut buf, batch.update_count);
        buf.push(batch.return_token as u8);
        buf.push(status_byte(batch.status));
        put_u32(&mut buf, batch.results.len() as u32);
        for item in &batch.results {
            put_str(&mut buf, &item.engine_name);
            buf.push(kind_byte(item.kind));
            put_bytes(&mut buf, &item.payload);
        }
        buf
    }

    /// Decode a client frame as the server would.
    pub fn decode_frame(&self, message: &[u8]) -> Result<FrameEnvelope> {
        let mut reader = Reader::new(message, "client frame");
        if reader.u8()? != TAG_FRAME {
            return Err(SessionError::codec("client frame", "unexpected tag"));
        }
        let source_name = reader.string()?;
        let sequence_id = reader.u64()?;
        let payload: Arc<[u8]> = reader.bytes()?.into();
        let extras = if reader.u8()? == 1 {
            Some(Arc::<[u8]>::from(reader.bytes()?))
        } else {
            None
        };
        Ok(FrameEnvelope { source_name, sequence_id, payload, extras, created_at: Instant::now() })
    }
}

impl WireCodec for TestCodec {
    fn encode_frame(&self, envelope: &FrameEnvelope) -> Result<Vec<u8>> {
        let mut buf = vec![TAG_FRAME];
        put_str(&mut buf, &envelope.source_name);
        put_u64(&mut buf, envelope.sequence_id);
        put_bytes(&mut buf, &envelope.payload);
        match &envelope.extras {
            Some(extras) => {
                buf.push(1);
                put_bytes(&mut buf, extras);
            }
            None => buf.push(0),
        }
        Ok(buf)
    }

    fn decode_server_message(&self, message: &[u8]) -> Result<ServerMessage> {
        let mut reader = Reader::new(message, "server message");
        match reader.u8()? {
            TAG_WELCOME => {
                let count = reader.u32()?;
                let mut sources_consumed = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    sources_consumed.push(reader.string()?);
                }
                let tokens_per_source = reader.u32()?;
                Ok(ServerMessage::Welcome(Welcome { sources_consumed, tokens_per_source }))
            }
            TAG_RESULT => {
                let source_name = reader.string()?;
                let frame_seq = reader.u64()?;
                let update_count = reader.u64()?;
                let return_token = reader.u8()? == 1;
                let status = status_from_byte(reader.u8()?);
                let count = reader.u32()?;
                let mut results = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    results.push(ResultItem {
                        engine_name: reader.string()?,
                        kind: kind_from_byte(reader.u8()?),
                        payload: reader.bytes()?.into(),
                    });
                }
                Ok(ServerMessage::Result(ResultBatch {
                    source_name,
                    frame_seq,
                    update_count,
                    return_token,
                    status,
                    results,
                }))
            }
            tag => Err(SessionError::codec("server message", format!("unknown tag {tag:#04x}"))),
        }
    }
}

/// The server side of an in-memory connection.
pub struct ServerEnd {
    from_client: mpsc::UnboundedReceiver<Vec<u8>>,
    to_client: Option<mpsc::UnboundedSender<Vec<u8>>>,
    codec: TestCodec,
}

impl ServerEnd {
    /// Send the handshake declaring consumed sources.
    pub fn send_welcome(&self, sources: &[&str], tokens_per_source: u32) {
        let welcome = Welcome {
            sources_consumed: sources.iter().map(|s| s.to_string()).collect(),
            tokens_per_source,
        };
        self.send_raw(self.codec.encode_welcome(&welcome));
    }

    /// Send a result batch.
    pub fn send_result(&self, batch: &ResultBatch) {
        self.send_raw(self.codec.encode_result(batch));
    }

    /// Acknowledge a frame with a minimal successful batch.
    pub fn ack(&self, source: &str, frame_seq: u64, update_count: u64) {
        self.send_result(&result_batch(source, frame_seq, update_count));
    }

    /// Send raw bytes, e.g. a deliberately malformed message.
    pub fn send_raw(&self, bytes: Vec<u8>) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(bytes);
        }
    }

    /// Receive and decode the next client frame.
    pub async fn recv_frame(&mut self) -> Option<FrameEnvelope> {
        let bytes = self.from_client.recv().await?;
        Some(self.codec.decode_frame(&bytes).expect("client sent undecodable frame"))
    }

    /// Decode a client frame if one has already arrived.
    pub fn try_recv_frame(&mut self) -> Option<FrameEnvelope> {
        let bytes = self.from_client.try_recv().ok()?;
        Some(self.codec.decode_frame(&bytes).expect("client sent undecodable frame"))
    }

    /// Drop the connection as a server crash or network failure would.
    pub fn disconnect(&mut self) {
        self.to_client = None;
    }
}

/// Build a successful single-result batch for tests.
pub fn result_batch(source: &str, frame_seq: u64, update_count: u64) -> ResultBatch {
    ResultBatch {
        source_name: source.to_string(),
        frame_seq,
        update_count,
        return_token: true,
        status: ResultStatus::Success,
        results: vec![ResultItem {
            engine_name: "test-engine".to_string(),
            kind: PayloadKind::Text,
            payload: b"ok".as_slice().into(),
        }],
    }
}

struct ChannelSink {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

#[async_trait]
impl MessageSink for ChannelSink {
    async fn send(&mut self, message: Vec<u8>) -> Result<()> {
        match &self.tx {
            Some(tx) => {
                tx.send(message).map_err(|_| SessionError::send_failed("connection dropped"))
            }
            None => Err(SessionError::send_failed("sink closed")),
        }
    }

    async fn close(&mut self) {
        self.tx = None;
    }
}

struct ChannelStream {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait]
impl MessageStream for ChannelStream {
    async fn next_message(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

/// A sink whose sends always fail, for send-failure paths.
pub struct FailingSink;

#[async_trait]
impl MessageSink for FailingSink {
    async fn send(&mut self, _message: Vec<u8>) -> Result<()> {
        Err(SessionError::send_failed("sink refused message"))
    }

    async fn close(&mut self) {}
}

/// Create a connected in-memory transport: the client's sink/stream pair
/// plus the matching [`ServerEnd`].
pub fn transport_pair() -> (Box<dyn MessageSink>, Box<dyn MessageStream>, ServerEnd) {
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let (server_tx, client_rx) = mpsc::unbounded_channel();
    (
        Box::new(ChannelSink { tx: Some(client_tx) }),
        Box::new(ChannelStream { rx: client_rx }),
        ServerEnd { from_client: server_rx, to_client: Some(server_tx), codec: TestCodec },
    )
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_u64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    put_u32(buf, bytes.len() as u32);
    buf.extend_from_slice(bytes);
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    put_bytes(buf, s.as_bytes());
}

fn status_byte(status: ResultStatus) -> u8 {
    match status {
        ResultStatus::Success => 0,
        ResultStatus::NoEngineForSource => 1,
        ResultStatus::WrongInputFormat => 2,
        ResultStatus::EngineError => 3,
        ResultStatus::Unknown => 4,
    }
}

fn status_from_byte(byte: u8) -> ResultStatus {
    match byte {
        0 => ResultStatus::Success,
        1 => ResultStatus::NoEngineForSource,
        2 => ResultStatus::WrongInputFormat,
        3 => ResultStatus::EngineError,
        _ => ResultStatus::Unknown,
    }
}

fn kind_byte(kind: PayloadKind) -> u8 {
    match kind {
        PayloadKind::Image => 0,
        PayloadKind::Text => 1,
        PayloadKind::Other => 2,
    }
}

fn kind_from_byte(byte: u8) -> PayloadKind {
    match byte {
        0 => PayloadKind::Image,
        1 => PayloadKind::Text,
        _ => PayloadKind::Other,
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    at: usize,
    context: &'static str,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8], context: &'static str) -> Self {
        Self { bytes, at: 0, context }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .at
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| SessionError::codec(self.context, "truncated message"))?;
        let slice = &self.bytes[self.at..end];
        self.at = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().expect("4 bytes")))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().expect("8 bytes")))
    }

    fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn string(&mut self) -> Result<String> {
        let bytes = self.bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| SessionError::codec(self.context, "invalid utf-8"))
    }
}
