use std::io::{self, ErrorKind};
use std::{error, fmt};

use byteorder::{ByteOrder, LittleEndian};
use serde::{de, Serialize};

pub const PORT: u16 = 5555;

// Raw JSON with no delimiter is unsafe under partial reads, so every
// frame is a little-endian u32 length followed by that many bytes of
// UTF-8 JSON. One logical message may span several reads.
pub const MAX_FRAME_LEN: u32 = 64 * 1024;

#[derive(Debug)]
pub enum CommunicationError {
    ConnectionClosed,
    Socket(io::Error),
    Serde(serde_json::Error),
    Protocol(String),
}

impl fmt::Display for CommunicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommunicationError::ConnectionClosed => write!(f, "connection closed"),
            CommunicationError::Socket(err) => write!(f, "socket error: {}", err),
            CommunicationError::Serde(err) => write!(f, "malformed record: {}", err),
            CommunicationError::Protocol(message) => write!(f, "protocol error: {}", message),
        }
    }
}

impl error::Error for CommunicationError {}

impl From<io::Error> for CommunicationError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe => CommunicationError::ConnectionClosed,
            _ => CommunicationError::Socket(err),
        }
    }
}

pub fn write_str(writer: &mut impl io::Write, data: &str) -> Result<(), CommunicationError> {
    let len: u32 = data
        .len()
        .try_into()
        .map_err(|_| CommunicationError::Protocol("outgoing frame too long".to_owned()))?;
    if len > MAX_FRAME_LEN {
        return Err(CommunicationError::Protocol(format!(
            "outgoing frame of {} bytes exceeds limit",
            len
        )));
    }
    let mut buf = [0u8; 4];
    LittleEndian::write_u32(&mut buf, len);
    writer.write_all(&buf)?;
    writer.write_all(data.as_bytes())?;
    writer.flush()?;
    Ok(())
}

pub fn read_str(reader: &mut impl io::Read) -> Result<String, CommunicationError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = LittleEndian::read_u32(&len_buf);
    if len > MAX_FRAME_LEN {
        return Err(CommunicationError::Protocol(format!(
            "incoming frame of {} bytes exceeds limit",
            len
        )));
    }
    let mut content_buf = vec![0; len as usize];
    reader.read_exact(&mut content_buf)?;
    String::from_utf8(content_buf)
        .map_err(|_| CommunicationError::Protocol("frame is not valid UTF-8".to_owned()))
}

pub fn write_obj(
    writer: &mut impl io::Write,
    obj: &impl Serialize,
) -> Result<(), CommunicationError> {
    let serialized = serde_json::to_string(obj).map_err(CommunicationError::Serde)?;
    write_str(writer, &serialized)
}

pub fn read_obj<T: de::DeserializeOwned>(
    reader: &mut impl io::Read,
) -> Result<T, CommunicationError> {
    let s = read_str(reader)?;
    serde_json::from_str(&s).map_err(CommunicationError::Serde)
}
