//! Wire messages exchanged between the two peers.
//!
//! Every message is a short UTF-8 line: a move is `"<row>,<col>"`, a
//! control message starts with [`CONTROL_PREFIX`]. Outbound frames end in
//! `\n`; inbound bytes go through [`LineFramer`], which also accepts a bare
//! payload without a terminator.

use crate::types::BOARD_SIZE;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{instrument, trace};

/// Prefix shared by all control messages.
pub const CONTROL_PREFIX: &str = "NET::";

/// Literal form of a rematch request.
pub const REMATCH_REQUEST: &str = "NET::REQ_REMATCH";

/// Literal form of a rematch acceptance.
pub const REMATCH_ACCEPT: &str = "NET::ACK_REMATCH";

/// Literal form of a rematch refusal.
pub const REMATCH_DECLINE: &str = "NET::DEC_REMATCH";

/// Frame terminator appended to every outbound message.
pub const FRAME_TERMINATOR: u8 = b'\n';

/// Default cap on an unterminated inbound fragment.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64;

/// A protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Message {
    /// Sender placed its mark at (row, col).
    Move {
        /// Row, `0..BOARD_SIZE`.
        row: usize,
        /// Column, `0..BOARD_SIZE`.
        col: usize,
    },
    /// Sender wants another round.
    RematchRequest,
    /// Sender agrees to a rematch.
    RematchAccept,
    /// Sender refuses a rematch.
    RematchDecline,
}

/// Why an inbound payload could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum DecodeError {
    /// Nothing but whitespace.
    #[display("Empty payload")]
    Empty,

    /// Payload is not valid UTF-8.
    #[display("Payload is not valid UTF-8")]
    NotUtf8,

    /// Control prefix followed by an unknown command.
    #[display("Unknown control message: {}", _0)]
    UnknownControl(String),

    /// A move must have exactly two fields.
    #[display("Expected 2 move fields, got {}", _0)]
    FieldCount(usize),

    /// A move field is not a non-negative integer.
    #[display("Move field is not an integer: {:?}", _0)]
    NotAnInteger(String),

    /// A move names a cell off the board.
    #[display("Move ({row}, {col}) is off the board")]
    OutOfRange {
        /// Decoded row.
        row: usize,
        /// Decoded column.
        col: usize,
    },

    /// Unterminated fragment grew past the frame limit.
    #[display("Fragment of {} bytes exceeds the frame limit", _0)]
    TooLong(usize),
}

impl std::error::Error for DecodeError {}

impl Message {
    /// Encodes the message in its literal wire form, without terminator.
    pub fn encode(&self) -> String {
        match self {
            Message::Move { row, col } => format!("{},{}", row, col),
            Message::RematchRequest => REMATCH_REQUEST.to_string(),
            Message::RematchAccept => REMATCH_ACCEPT.to_string(),
            Message::RematchDecline => REMATCH_DECLINE.to_string(),
        }
    }

    /// Encodes the message as a terminated frame ready for the socket.
    pub fn to_frame(&self) -> Vec<u8> {
        let mut frame = self.encode().into_bytes();
        frame.push(FRAME_TERMINATOR);
        frame
    }

    /// Decodes one payload. Surrounding whitespace is ignored.
    #[instrument]
    pub fn decode(payload: &str) -> Result<Self, DecodeError> {
        let payload = payload.trim();
        if payload.is_empty() {
            return Err(DecodeError::Empty);
        }

        if payload.starts_with(CONTROL_PREFIX) {
            return match payload {
                REMATCH_REQUEST => Ok(Message::RematchRequest),
                REMATCH_ACCEPT => Ok(Message::RematchAccept),
                REMATCH_DECLINE => Ok(Message::RematchDecline),
                other => Err(DecodeError::UnknownControl(other.to_string())),
            };
        }

        let fields: Vec<&str> = payload.split(',').collect();
        let [row, col] = fields.as_slice() else {
            return Err(DecodeError::FieldCount(fields.len()));
        };
        let row = parse_coordinate(row)?;
        let col = parse_coordinate(col)?;
        if row >= BOARD_SIZE || col >= BOARD_SIZE {
            return Err(DecodeError::OutOfRange { row, col });
        }
        Ok(Message::Move { row, col })
    }

    /// Returns true for rematch control messages.
    pub fn is_control(&self) -> bool {
        !matches!(self, Message::Move { .. })
    }
}

fn parse_coordinate(field: &str) -> Result<usize, DecodeError> {
    let field = field.trim();
    field
        .parse::<usize>()
        .map_err(|_| DecodeError::NotAnInteger(field.to_string()))
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Message {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

/// Splits an inbound byte stream into messages.
///
/// Complete lines are decoded as they arrive. A trailing fragment with no
/// terminator is decoded on its own when it already forms a valid message,
/// kept for the next read when it could still become one, and reported as
/// malformed otherwise.
#[derive(Debug, Clone)]
pub struct LineFramer {
    pending: Vec<u8>,
    max_len: usize,
}

impl LineFramer {
    /// Creates a framer that gives up on fragments longer than `max_len`.
    pub fn new(max_len: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_len,
        }
    }

    /// Feeds one read's worth of bytes and returns what it completed.
    #[instrument(skip(self, bytes), fields(len = bytes.len(), pending = self.pending.len()))]
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<Message, DecodeError>> {
        self.pending.extend_from_slice(bytes);
        let mut decoded = Vec::new();

        while let Some(end) = self.pending.iter().position(|b| *b == FRAME_TERMINATOR) {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            let line = &line[..line.len() - 1];
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            decoded.push(decode_bytes(line));
        }

        if self.pending.iter().all(u8::is_ascii_whitespace) {
            self.pending.clear();
            return decoded;
        }

        match decode_bytes(&self.pending) {
            Ok(message) => {
                self.pending.clear();
                decoded.push(Ok(message));
            }
            Err(_) if self.pending.len() > self.max_len => {
                decoded.push(Err(DecodeError::TooLong(self.pending.len())));
                self.pending.clear();
            }
            Err(e) if !could_complete(&self.pending) => {
                decoded.push(Err(e));
                self.pending.clear();
            }
            Err(_) => trace!(pending = self.pending.len(), "Holding partial frame"),
        }

        decoded
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

fn decode_bytes(bytes: &[u8]) -> Result<Message, DecodeError> {
    let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::NotUtf8)?;
    Message::decode(text)
}

/// Could more bytes turn this fragment into a valid message?
fn could_complete(fragment: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(fragment) else {
        // A multi-byte character may have been split across reads.
        return fragment.len() < 4;
    };
    let text = text.trim_start();

    let control_prefix = [REMATCH_REQUEST, REMATCH_ACCEPT, REMATCH_DECLINE]
        .iter()
        .any(|literal| literal.starts_with(text));
    let move_prefix = text
        .chars()
        .all(|c| c.is_ascii_digit() || c == ',' || c == ' ')
        && text.matches(',').count() <= 1;

    control_prefix || move_prefix
}
