//! Pure game logic for two-peer tic-tac-toe.
//!
//! # Architecture
//!
//! - **Board**: 3x3 grid with a move counter and win detection
//! - **Protocol**: line-oriented wire messages and an inbound framer
//! - **Match**: turn-taking and rematch state machine, independent of I/O
//! - **Invariants**: properties checked after every match transition
//!
//! Nothing here performs I/O. Outbound messages leave through a
//! [`MessageSink`]; the transport crate supplies the socket-backed one.
//!
//! # Example
//!
//! ```
//! use tttlink_game::{Match, Mark, Message, Mode};
//!
//! let mut game = Match::new();
//! game.begin_as_listener().unwrap();
//! game.on_connected(Mark::X);
//!
//! let mut outbox: Vec<Message> = Vec::new();
//! game.submit_local_move(1, 1, &mut outbox).unwrap();
//! assert_eq!(outbox, vec![Message::Move { row: 1, col: 1 }]);
//! assert_eq!(game.state().mode(), Mode::Active);
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Private module declarations
mod machine;
mod protocol;
mod sink;
mod types;

pub mod invariants;

// Crate-level exports - Board
pub use types::{BOARD_SIZE, Board, Cell, InvalidMove, Mark, Outcome};

// Crate-level exports - Wire protocol
pub use protocol::{
    CONTROL_PREFIX, DEFAULT_MAX_FRAME_LEN, DecodeError, FRAME_TERMINATOR, LineFramer, Message,
    REMATCH_ACCEPT, REMATCH_DECLINE, REMATCH_REQUEST,
};

// Crate-level exports - Outbound seam
pub use sink::{MessageSink, SinkError};

// Crate-level exports - Match state machine
pub use machine::{
    Match, MatchError, MatchEvent, MatchState, Mode, RematchFlags, Role, TurnOwner,
};
