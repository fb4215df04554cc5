//! Wire protocol shared by the game server and its clients.
//!
//! Every message is a one-byte opcode followed by fixed-size fields. There are
//! no delimiters and no length prefixes; both ends must agree on the layout.
//!
//! | Opcode | Direction | Payload |
//! |---|---|---|
//! | `CONNECT` | client → server | 40-byte inbound channel name, 40-byte outbound channel name |
//! | `CONNECT` | server → client | 1 result byte (0 = accepted) |
//! | `DISCONNECT` | client → server | none |
//! | `PLAY` | client → server | 1 command byte |
//! | `BOARD` | server → client | [`BoardHeader`] then `width * height` content bytes |

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const OP_CONNECT: u8 = 1;
pub const OP_DISCONNECT: u8 = 2;
pub const OP_PLAY: u8 = 3;
pub const OP_BOARD: u8 = 4;

/// Fixed length of a channel name field in a CONNECT request.
pub const CHANNEL_NAME_LEN: usize = 40;

/// Size of an encoded [`BoardHeader`]: six little-endian int32 fields.
pub const BOARD_HEADER_LEN: usize = 24;

/// Result byte of an accepted registration.
pub const CONNECT_ACCEPTED: u8 = 0;

/// Upper bound on `width * height` accepted when decoding a snapshot.
pub const MAX_BOARD_CELLS: usize = 1 << 20;

pub const CMD_UP: u8 = b'W';
pub const CMD_LEFT: u8 = b'A';
pub const CMD_DOWN: u8 = b'S';
pub const CMD_RIGHT: u8 = b'D';
pub const CMD_RANDOM: u8 = b'R';
pub const CMD_WAIT: u8 = b'T';
pub const CMD_CHARGE: u8 = b'C';
/// Accepted on the wire but ignored by the player task.
pub const CMD_IGNORED: u8 = b'G';
/// Client-side quit key; never sent to the server.
pub const CMD_QUIT: u8 = b'Q';

/// Display bytes carried in a snapshot.
pub const TILE_WALL: u8 = b'W';
pub const TILE_EMPTY: u8 = b' ';
pub const TILE_PLAYER: u8 = b'P';
pub const TILE_AGENT: u8 = b'M';
pub const TILE_PORTAL: u8 = b'@';
pub const TILE_COLLECTIBLE: u8 = b'.';

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("channel name is empty")]
    EmptyChannelName,
    #[error("channel name is {0} bytes, limit is {CHANNEL_NAME_LEN}")]
    ChannelNameTooLong(usize),
    #[error("channel name is not valid UTF-8")]
    InvalidChannelName,
    #[error("unexpected opcode {0}")]
    UnexpectedOpcode(u8),
    #[error("frame too short: expected {expected} bytes, got {actual}")]
    ShortFrame { expected: usize, actual: usize },
    #[error("invalid board dimensions {width}x{height}")]
    InvalidDimensions { width: i32, height: i32 },
    #[error("header encoding failed: {0}")]
    Encoding(#[from] bincode::Error),
}

/// Fixed header of a BOARD frame. Field order is the wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardHeader {
    pub width: i32,
    pub height: i32,
    pub tempo: i32,
    pub victory: i32,
    pub game_over: i32,
    pub points: i32,
}

impl BoardHeader {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < BOARD_HEADER_LEN {
            return Err(ProtocolError::ShortFrame {
                expected: BOARD_HEADER_LEN,
                actual: bytes.len(),
            });
        }
        Ok(bincode::deserialize(&bytes[..BOARD_HEADER_LEN])?)
    }

    /// Number of content bytes following this header.
    pub fn cell_count(&self) -> Result<usize, ProtocolError> {
        let invalid = ProtocolError::InvalidDimensions {
            width: self.width,
            height: self.height,
        };
        if self.width <= 0 || self.height <= 0 {
            return Err(invalid);
        }
        let count = (self.width as usize)
            .checked_mul(self.height as usize)
            .ok_or(invalid)?;
        if count > MAX_BOARD_CELLS {
            return Err(ProtocolError::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        Ok(count)
    }
}

/// A complete BOARD frame: header plus row-major display bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardSnapshot {
    pub header: BoardHeader,
    pub cells: Vec<u8>,
}

impl BoardSnapshot {
    /// Encodes the frame including its leading opcode.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let expected = self.header.cell_count()?;
        if self.cells.len() != expected {
            return Err(ProtocolError::ShortFrame {
                expected,
                actual: self.cells.len(),
            });
        }
        let mut frame = Vec::with_capacity(1 + BOARD_HEADER_LEN + expected);
        frame.push(OP_BOARD);
        frame.extend_from_slice(&self.header.encode()?);
        frame.extend_from_slice(&self.cells);
        Ok(frame)
    }

    /// Decodes a frame previously produced by [`BoardSnapshot::encode`].
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        match frame.first() {
            Some(&OP_BOARD) => {}
            Some(&other) => return Err(ProtocolError::UnexpectedOpcode(other)),
            None => {
                return Err(ProtocolError::ShortFrame {
                    expected: 1,
                    actual: 0,
                })
            }
        }
        let header = BoardHeader::decode(&frame[1..])?;
        let count = header.cell_count()?;
        let body = &frame[1 + BOARD_HEADER_LEN..];
        if body.len() != count {
            return Err(ProtocolError::ShortFrame {
                expected: count,
                actual: body.len(),
            });
        }
        Ok(Self {
            header,
            cells: body.to_vec(),
        })
    }

    /// Row `y` of the display grid.
    pub fn row(&self, y: usize) -> &[u8] {
        let width = self.header.width.max(0) as usize;
        let start = (y * width).min(self.cells.len());
        let end = (start + width).min(self.cells.len());
        &self.cells[start..end]
    }
}

/// Pads a channel name into its fixed 40-byte field.
pub fn encode_channel_name(name: &str) -> Result<[u8; CHANNEL_NAME_LEN], ProtocolError> {
    let bytes = name.as_bytes();
    if bytes.is_empty() {
        return Err(ProtocolError::EmptyChannelName);
    }
    if bytes.len() > CHANNEL_NAME_LEN {
        return Err(ProtocolError::ChannelNameTooLong(bytes.len()));
    }
    let mut field = [0u8; CHANNEL_NAME_LEN];
    field[..bytes.len()].copy_from_slice(bytes);
    Ok(field)
}

/// Reads a channel name out of its fixed field. The name ends at the first
/// NUL byte or at the end of the field.
pub fn decode_channel_name(field: &[u8; CHANNEL_NAME_LEN]) -> Result<String, ProtocolError> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(CHANNEL_NAME_LEN);
    if end == 0 {
        return Err(ProtocolError::EmptyChannelName);
    }
    std::str::from_utf8(&field[..end])
        .map(str::to_owned)
        .map_err(|_| ProtocolError::InvalidChannelName)
}

/// Full CONNECT request as written to the registration channel.
pub fn encode_connect_request(inbound: &str, outbound: &str) -> Result<Vec<u8>, ProtocolError> {
    let mut frame = Vec::with_capacity(1 + 2 * CHANNEL_NAME_LEN);
    frame.push(OP_CONNECT);
    frame.extend_from_slice(&encode_channel_name(inbound)?);
    frame.extend_from_slice(&encode_channel_name(outbound)?);
    Ok(frame)
}

/// Two-byte registration acknowledgement.
pub fn connect_ack(result: u8) -> [u8; 2] {
    [OP_CONNECT, result]
}
