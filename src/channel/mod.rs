//! Framed Message Channel
//!
//! The loopback TCP link between this tool and the LabVIEW side. All traffic
//! is length-prefixed frames:
//!
//! ```text
//! [ 4 bytes: total length, big endian ][ 4 bytes: ASCII type tag ][ payload ]
//! ```
//!
//! The total length counts the type tag plus payload, excluding the length
//! field itself. The LabVIEW side reads into a fixed 1KB buffer, so payloads
//! are capped at [`MAX_PAYLOAD`] and the protocol has no fragmentation.
//!
//! 수신 경로는 상대가 잘못된 프레임을 보내도 에러를 던지지 않고 RDER
//! 메시지로 합성해 돌려줍니다. 스트림 동기화가 깨진 상태이므로 RDER 이후에는
//! 더 읽지 않아야 합니다.

pub mod port;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::borrow::Cow;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Maximum payload bytes per frame. Matches the fixed receive buffer on the
/// LabVIEW side.
pub const MAX_PAYLOAD: usize = 1024;

/// Type tag length on the wire.
const TAG_LEN: usize = 4;

/// 채널 통신 오류 타입
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("No free port available in the dynamic range")]
    NoFreePort,

    #[error("Listener error: {0}")]
    Listener(String),

    #[error("Timed out waiting for the application to connect")]
    ConnectTimeout,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Payload of {0} bytes exceeds the {MAX_PAYLOAD} byte frame limit")]
    PayloadTooLarge(usize),

    #[error("Failed to send message: {0}")]
    Write(String),

    #[error("Exit code payload is not a valid integer: \"{0}\"")]
    InvalidExitCode(String),
}

// ─── Messages ────────────────────────────────────────────────

/// Frame type tags exchanged with the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageKind {
    /// Host output to relay to stdout.
    Outp,
    /// Host output to relay to stderr.
    Serr,
    /// Terminal message, payload carries the exit code in decimal ASCII.
    Exit,
    /// Read error. Synthesized locally, never sent by the host.
    Rder,
    /// Argument vector for the host, tab joined.
    Args,
    /// Working directory for the host.
    Ccwd,
    /// Sentinel, not produced by real traffic.
    #[default]
    Noop,
    /// Any tag outside the known set, carried through for diagnostics.
    Unknown([u8; TAG_LEN]),
}

impl MessageKind {
    pub fn tag(&self) -> [u8; TAG_LEN] {
        match self {
            Self::Outp => *b"OUTP",
            Self::Serr => *b"SERR",
            Self::Exit => *b"EXIT",
            Self::Rder => *b"RDER",
            Self::Args => *b"ARGS",
            Self::Ccwd => *b"CCWD",
            Self::Noop => *b"NOOP",
            Self::Unknown(tag) => *tag,
        }
    }

    pub fn from_tag(tag: [u8; TAG_LEN]) -> Self {
        match &tag {
            b"OUTP" => Self::Outp,
            b"SERR" => Self::Serr,
            b"EXIT" => Self::Exit,
            b"RDER" => Self::Rder,
            b"ARGS" => Self::Args,
            b"CCWD" => Self::Ccwd,
            b"NOOP" => Self::Noop,
            _ => Self::Unknown(tag),
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = self.tag();
        write!(f, "{}", String::from_utf8_lossy(&tag))
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(kind: MessageKind, payload: Vec<u8>) -> Self {
        Self { kind, payload }
    }

    /// 수신 실패를 데이터로 보고하는 RDER 메시지 합성
    fn read_error(diagnostic: String) -> Self {
        Self {
            kind: MessageKind::Rder,
            payload: diagnostic.into_bytes(),
        }
    }

    /// Payload as text. The protocol is ASCII, so lossy decoding only
    /// matters for hostile peers.
    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Parses an EXIT payload as a base-10 signed integer.
pub fn extract_exit_code(payload: &[u8]) -> Result<i32, ChannelError> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| ChannelError::InvalidExitCode(String::from_utf8_lossy(payload).into_owned()))?;
    text.parse::<i32>()
        .map_err(|_| ChannelError::InvalidExitCode(text.to_string()))
}

/// Encodes one frame. Fails when the payload exceeds [`MAX_PAYLOAD`].
pub fn encode_frame(kind: MessageKind, payload: &[u8]) -> Result<Vec<u8>, ChannelError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(ChannelError::PayloadTooLarge(payload.len()));
    }

    let total_len = TAG_LEN + payload.len();
    let mut frame = Vec::with_capacity(4 + total_len);
    WriteBytesExt::write_u32::<BigEndian>(&mut frame, total_len as u32)
        .map_err(|e| ChannelError::Write(format!("Failed to write frame length: {}", e)))?;
    frame.extend_from_slice(&kind.tag());
    frame.extend_from_slice(payload);
    Ok(frame)
}

// ─── Host Channel ────────────────────────────────────────────

/// The loopback listener plus, once accepted, the single host connection.
///
/// 리스너는 첫 연결을 수락하는 순간 닫혀 두 번째 클라이언트는 받지 않습니다.
/// 읽기와 쓰기는 각각 단일 호출자를 가정합니다.
pub struct HostChannel {
    listener: Option<TcpListener>,
    stream: Option<TcpStream>,
    port: u16,
}

impl HostChannel {
    /// Allocates a dynamic port and starts listening on loopback.
    pub async fn bind() -> Result<Self, ChannelError> {
        let (listener, port) = port::bind_dynamic().await?;
        tracing::info!("Waiting for connection on port {}", port);
        Ok(Self {
            listener: Some(listener),
            stream: None,
            port,
        })
    }

    /// The allocated port, for launch arguments and service registration.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Waits for the host to connect. `None` waits forever.
    ///
    /// The listener is dropped after a successful accept, so at most one
    /// client is ever served per channel.
    pub async fn accept(&mut self, timeout: Option<Duration>) -> Result<(), ChannelError> {
        let listener = self.listener.as_ref().ok_or(ChannelError::NotConnected)?;

        let accepted = match timeout {
            Some(limit) => tokio::time::timeout(limit, listener.accept())
                .await
                .map_err(|_| ChannelError::ConnectTimeout)?,
            None => listener.accept().await,
        };

        let (stream, peer) =
            accepted.map_err(|e| ChannelError::Connection(format!("Accept failed: {}", e)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| ChannelError::Connection(format!("Failed to set nodelay: {}", e)))?;

        tracing::info!("Client connected from {}", peer);
        self.stream = Some(stream);
        self.listener = None;
        Ok(())
    }

    /// Reads one frame from the host.
    ///
    /// Never fails: short reads, closed connections and out-of-range lengths
    /// all come back as an RDER message carrying the diagnostic.
    pub async fn read_message(&mut self) -> Message {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return Message::read_error("Not connected".to_string()),
        };

        let mut length_buf = [0u8; 4];
        if let Err(e) = stream.read_exact(&mut length_buf).await {
            return Message::read_error(read_fault(&e));
        }

        let total_len = match ReadBytesExt::read_u32::<BigEndian>(&mut (&length_buf[..])) {
            Ok(len) => len as usize,
            Err(e) => return Message::read_error(format!("Failed to decode frame length: {}", e)),
        };
        if !(TAG_LEN..=TAG_LEN + MAX_PAYLOAD).contains(&total_len) {
            return Message::read_error(format!(
                "Frame length {} outside valid range [{}, {}]",
                total_len,
                TAG_LEN,
                TAG_LEN + MAX_PAYLOAD
            ));
        }

        let mut frame = vec![0u8; total_len];
        if let Err(e) = stream.read_exact(&mut frame).await {
            return Message::read_error(read_fault(&e));
        }

        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&frame[..TAG_LEN]);
        let message = Message {
            kind: MessageKind::from_tag(tag),
            payload: frame.split_off(TAG_LEN),
        };
        tracing::debug!(
            "Received {} message ({} payload bytes)",
            message.kind,
            message.payload.len()
        );
        message
    }

    /// Writes one frame to the host.
    pub async fn write_message(
        &mut self,
        kind: MessageKind,
        payload: &[u8],
    ) -> Result<(), ChannelError> {
        let frame = encode_frame(kind, payload)?;
        let stream = self.stream.as_mut().ok_or(ChannelError::NotConnected)?;
        stream
            .write_all(&frame)
            .await
            .map_err(|e| ChannelError::Write(format!("Failed to send {}: {}", kind, e)))?;
        tracing::debug!("Sent {} message ({} payload bytes)", kind, payload.len());
        Ok(())
    }

    /// The fixed two-message handshake the host expects right after
    /// connecting: ARGS with the tab-joined argument vector, then CCWD with
    /// the working directory.
    pub async fn write_handshake(&mut self, args: &[String], cwd: &Path) -> Result<(), ChannelError> {
        let joined = args.join("\t");
        self.write_message(MessageKind::Args, joined.as_bytes())
            .await?;

        let cwd = cwd.to_string_lossy();
        self.write_message(MessageKind::Ccwd, cwd.as_bytes()).await
    }

    /// Drops the client connection and the listener. Idempotent.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("Client connection closed");
        }
        self.listener.take();
    }
}

impl Drop for HostChannel {
    fn drop(&mut self) {
        self.close();
    }
}

fn read_fault(e: &std::io::Error) -> String {
    match e.kind() {
        std::io::ErrorKind::UnexpectedEof => {
            "Connection closed while reading a frame".to_string()
        }
        _ => format!("Failed to read frame: {}", e),
    }
}

// ─── Tests ───────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tag_roundtrip() {
        let kinds = [
            MessageKind::Outp,
            MessageKind::Serr,
            MessageKind::Exit,
            MessageKind::Rder,
            MessageKind::Args,
            MessageKind::Ccwd,
            MessageKind::Noop,
        ];
        for kind in kinds {
            assert_eq!(MessageKind::from_tag(kind.tag()), kind);
        }
    }

    #[test]
    fn test_unknown_tag_carried_as_data() {
        let kind = MessageKind::from_tag(*b"EXTT");
        assert_eq!(kind, MessageKind::Unknown(*b"EXTT"));
        assert_eq!(kind.to_string(), "EXTT");
    }

    #[test]
    fn test_default_kind_is_noop() {
        assert_eq!(MessageKind::default(), MessageKind::Noop);
    }

    #[test]
    fn test_extract_exit_code_positive() {
        assert_eq!(extract_exit_code(b"4587").unwrap(), 4587);
    }

    #[test]
    fn test_extract_exit_code_negative() {
        assert_eq!(extract_exit_code(b"-4587").unwrap(), -4587);
    }

    #[test]
    fn test_extract_exit_code_zero() {
        assert_eq!(extract_exit_code(b"0").unwrap(), 0);
    }

    #[test]
    fn test_extract_exit_code_malformed() {
        assert!(matches!(
            extract_exit_code(b"1.3"),
            Err(ChannelError::InvalidExitCode(s)) if s == "1.3"
        ));
        assert!(extract_exit_code(b"").is_err());
        assert!(extract_exit_code(b"code").is_err());
    }

    #[test]
    fn test_encode_frame_layout() {
        let frame = encode_frame(MessageKind::Args, b"Test1").unwrap();
        // 길이 필드는 태그 4바이트 + 페이로드, 빅엔디안
        assert_eq!(frame, b"\x00\x00\x00\x09ARGSTest1");
    }

    #[test]
    fn test_encode_frame_tab_joined_arguments() {
        let frame = encode_frame(MessageKind::Args, b"Test1\tTest2").unwrap();
        assert_eq!(frame, b"\x00\x00\x00\x0FARGSTest1\tTest2");
    }

    #[test]
    fn test_encode_frame_empty_payload() {
        let frame = encode_frame(MessageKind::Exit, b"").unwrap();
        assert_eq!(frame, b"\x00\x00\x00\x04EXIT");
    }

    #[test]
    fn test_encode_frame_length_is_payload_plus_tag() {
        for len in [0usize, 1, 512, MAX_PAYLOAD] {
            let payload = vec![b'x'; len];
            let frame = encode_frame(MessageKind::Outp, &payload).unwrap();
            let total = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]);
            assert_eq!(total as usize, 4 + len);
            assert_eq!(frame.len(), 8 + len);
        }
    }

    #[test]
    fn test_encode_frame_rejects_oversized_payload() {
        let payload = vec![b'x'; MAX_PAYLOAD + 1];
        assert!(matches!(
            encode_frame(MessageKind::Outp, &payload),
            Err(ChannelError::PayloadTooLarge(len)) if len == MAX_PAYLOAD + 1
        ));
    }
}
