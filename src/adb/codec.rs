// ADB wire framing: 24-byte little-endian header plus payload.
// Decoding reports InsufficientData until a whole frame is buffered.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const fn tag(name: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*name)
}

pub const A_CNXN: u32 = tag(b"CNXN");
pub const A_OPEN: u32 = tag(b"OPEN");
pub const A_OKAY: u32 = tag(b"OKAY");
pub const A_CLSE: u32 = tag(b"CLSE");
pub const A_WRTE: u32 = tag(b"WRTE");
pub const A_AUTH: u32 = tag(b"AUTH");

pub const KNOWN_COMMANDS: [u32; 6] = [A_CNXN, A_OPEN, A_OKAY, A_CLSE, A_WRTE, A_AUTH];

pub const HEADER_SIZE: usize = 24;
pub const A_VERSION: u32 = 0x0100_0000;
pub const MAX_PAYLOAD: u32 = 4096;
pub const HOST_BANNER: &str = "host::features=shell_v2,cmd,stat_v2\0";
// Upper bound accepted from a peer; devices may advertise up to 1 MiB
const MAX_ACCEPTED_PAYLOAD: u32 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("need {needed} bytes, have {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("magic 0x{magic:08x} does not match command 0x{command:08x}")]
    InvalidMagic { command: u32, magic: u32 },

    #[error("payload checksum mismatch: header 0x{expected:08x}, computed 0x{actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("payload of {length} bytes exceeds limit of {limit}")]
    PayloadTooLarge { length: u32, limit: u32 },

    #[error("unexpected {received} frame while {state}")]
    UnexpectedFrame { received: String, state: String },
}

/// Wrapping sum of the payload bytes.
pub fn checksum(payload: &[u8]) -> u32 {
    payload
        .iter()
        .fold(0u32, |acc, &b| acc.wrapping_add(u32::from(b)))
}

pub fn command_name(command: u32) -> String {
    let bytes = command.to_le_bytes();
    if bytes.iter().all(|b| b.is_ascii_uppercase()) {
        String::from_utf8_lossy(&bytes).into_owned()
    } else {
        format!("0x{command:08x}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdbFrame {
    pub command: u32,
    pub arg0: u32,
    pub arg1: u32,
    pub payload_length: u32,
    pub checksum: u32,
    pub magic: u32,
    pub payload: Vec<u8>,
}

impl AdbFrame {
    pub fn new(command: u32, arg0: u32, arg1: u32, payload: impl Into<Vec<u8>>) -> Self {
        let payload = payload.into();
        Self {
            command,
            arg0,
            arg1,
            payload_length: payload.len() as u32,
            checksum: checksum(&payload),
            magic: command ^ 0xFFFF_FFFF,
            payload,
        }
    }

    /// CNXN frame sent by the host to start the handshake.
    pub fn connect() -> Self {
        Self::new(A_CNXN, A_VERSION, MAX_PAYLOAD, HOST_BANNER.as_bytes())
    }

    /// OPEN frame for a `shell:` service on a new local stream.
    pub fn open_shell(local_id: u32, command: &str) -> Self {
        Self::open(local_id, &format!("shell:{command}"))
    }

    pub fn open(local_id: u32, service: &str) -> Self {
        let mut payload = service.as_bytes().to_vec();
        payload.push(0);
        Self::new(A_OPEN, local_id, 0, payload)
    }

    pub fn okay(local_id: u32, remote_id: u32) -> Self {
        Self::new(A_OKAY, local_id, remote_id, Vec::new())
    }

    pub fn name(&self) -> String {
        command_name(self.command)
    }

    /// Payload as text with any trailing NUL terminators removed.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload)
            .trim_end_matches('\0')
            .to_string()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        for field in [
            self.command,
            self.arg0,
            self.arg1,
            self.payload_length,
            self.checksum,
            self.magic,
        ] {
            buffer.extend_from_slice(&field.to_le_bytes());
        }
        buffer.extend_from_slice(&self.payload);
        buffer
    }

    /// Decode one frame from the front of `data`, returning it together with
    /// the number of bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), CodecError> {
        let header = Header::parse(data)?;
        let total = HEADER_SIZE + header.payload_length as usize;
        if data.len() < total {
            return Err(CodecError::InsufficientData {
                needed: total,
                available: data.len(),
            });
        }
        let frame = header.with_payload(data[HEADER_SIZE..total].to_vec())?;
        Ok((frame, total))
    }
}

struct Header {
    command: u32,
    arg0: u32,
    arg1: u32,
    payload_length: u32,
    checksum: u32,
    magic: u32,
}

impl Header {
    fn parse(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < HEADER_SIZE {
            return Err(CodecError::InsufficientData {
                needed: HEADER_SIZE,
                available: data.len(),
            });
        }
        let word = |i: usize| u32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);
        let header = Header {
            command: word(0),
            arg0: word(4),
            arg1: word(8),
            payload_length: word(12),
            checksum: word(16),
            magic: word(20),
        };
        if header.magic != header.command ^ 0xFFFF_FFFF {
            return Err(CodecError::InvalidMagic {
                command: header.command,
                magic: header.magic,
            });
        }
        if header.payload_length > MAX_ACCEPTED_PAYLOAD {
            return Err(CodecError::PayloadTooLarge {
                length: header.payload_length,
                limit: MAX_ACCEPTED_PAYLOAD,
            });
        }
        Ok(header)
    }

    fn with_payload(self, payload: Vec<u8>) -> Result<AdbFrame, CodecError> {
        // Newer adbd sends a zero checksum once the peer advertises version >= 0x01000001
        let actual = checksum(&payload);
        if self.checksum != 0 && self.checksum != actual {
            return Err(CodecError::ChecksumMismatch {
                expected: self.checksum,
                actual,
            });
        }
        Ok(AdbFrame {
            command: self.command,
            arg0: self.arg0,
            arg1: self.arg1,
            payload_length: self.payload_length,
            checksum: self.checksum,
            magic: self.magic,
            payload,
        })
    }
}

/// Read exactly one frame from an async byte stream.
pub async fn read_frame<R>(reader: &mut R) -> std::io::Result<Result<AdbFrame, CodecError>>
where
    R: AsyncRead + Unpin,
{
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_bytes).await?;
    let header = match Header::parse(&header_bytes) {
        Ok(header) => header,
        Err(e) => return Ok(Err(e)),
    };
    let mut payload = vec![0u8; header.payload_length as usize];
    reader.read_exact(&mut payload).await?;
    Ok(header.with_payload(payload))
}

pub async fn write_frame<W>(writer: &mut W, frame: &AdbFrame) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame.encode()).await?;
    writer.flush().await
}

/// Host side of the CNXN exchange.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HandshakeState {
    #[default]
    Idle,
    AwaitingBanner,
    Established {
        banner: String,
        max_payload: u32,
        auth_requested: bool,
    },
}

impl HandshakeState {
    /// Produce the CNXN frame and move to `AwaitingBanner`.
    pub fn start(&mut self) -> AdbFrame {
        *self = HandshakeState::AwaitingBanner;
        AdbFrame::connect()
    }

    /// Any frame completes the handshake. An AUTH challenge is recorded but
    /// not answered; devices that require key authorization will refuse
    /// later stream opens.
    pub fn on_frame(&mut self, frame: &AdbFrame) -> Result<(), CodecError> {
        if *self != HandshakeState::AwaitingBanner {
            return Err(CodecError::UnexpectedFrame {
                received: frame.name(),
                state: format!("{self:?}"),
            });
        }
        let auth_requested = frame.command == A_AUTH;
        let (banner, max_payload) = if frame.command == A_CNXN {
            (frame.payload_text(), frame.arg1.min(MAX_ACCEPTED_PAYLOAD))
        } else {
            (String::new(), MAX_PAYLOAD)
        };
        *self = HandshakeState::Established {
            banner,
            max_payload,
            auth_requested,
        };
        Ok(())
    }

    pub fn is_established(&self) -> bool {
        matches!(self, HandshakeState::Established { .. })
    }
}
