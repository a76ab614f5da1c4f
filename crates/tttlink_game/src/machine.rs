//! Turn-taking and rematch state machine for one match.
//!
//! [`Match`] owns the board and every per-round flag. It never touches a
//! socket: outbound messages go through a [`MessageSink`], and everything
//! the presentation layer needs to redraw is queued as [`MatchEvent`]s for
//! the caller to drain.

use crate::invariants::{InvariantSet, MatchInvariants};
use crate::protocol::Message;
use crate::sink::{MessageSink, SinkError};
use crate::types::{Board, InvalidMove, Mark, Outcome};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

// ─────────────────────────────────────────────────────────────
//  State types
// ─────────────────────────────────────────────────────────────

/// Top-level phase of the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum Mode {
    /// No peer; one process alternates marks.
    Local,
    /// Role chosen, socket not connected yet.
    AwaitingPeer,
    /// Connected and a round is in progress.
    Active,
    /// Round decided (or aborted); rematch negotiation allowed.
    RoundOver,
}

/// Which side may move next in a network round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum TurnOwner {
    /// This process.
    Local,
    /// The peer.
    Remote,
}

/// How this side established the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum Role {
    /// Bound and accepted the peer; plays X.
    Listener,
    /// Dialed out to the peer; plays O.
    Dialer,
}

impl Role {
    /// Mark assigned to this side for the whole connection.
    pub fn mark(self) -> Mark {
        match self {
            Role::Listener => Mark::X,
            Role::Dialer => Mark::O,
        }
    }
}

/// Pending rematch requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RematchFlags {
    /// We sent a request and are waiting for an answer.
    pub requested_by_local: bool,
    /// The peer sent a request we have not answered.
    pub requested_by_remote: bool,
}

impl RematchFlags {
    /// True if either side has a request outstanding.
    pub fn any(&self) -> bool {
        self.requested_by_local || self.requested_by_remote
    }
}

/// Snapshot of the match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchState {
    pub(crate) mode: Mode,
    pub(crate) role: Option<Role>,
    pub(crate) local_mark: Mark,
    pub(crate) remote_mark: Mark,
    pub(crate) turn_owner: TurnOwner,
    pub(crate) outcome: Option<Outcome>,
    pub(crate) rematch: RematchFlags,
    pub(crate) rematch_closed: bool,
    pub(crate) round_starter: Mark,
    pub(crate) round: u32,
    pub(crate) violation: bool,
    pub(crate) board: Board,
}

impl MatchState {
    /// Fresh single-process state.
    fn local() -> Self {
        Self {
            mode: Mode::Local,
            role: None,
            local_mark: Mark::X,
            remote_mark: Mark::O,
            turn_owner: TurnOwner::Local,
            outcome: None,
            rematch: RematchFlags::default(),
            rematch_closed: false,
            round_starter: Mark::X,
            round: 1,
            violation: false,
            board: Board::new(),
        }
    }

    /// Current phase.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Connection role, if a network match was started.
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// Mark played by this side.
    pub fn local_mark(&self) -> Mark {
        self.local_mark
    }

    /// Mark played by the peer.
    pub fn remote_mark(&self) -> Mark {
        self.remote_mark
    }

    /// Who moves next. Only meaningful while [`Mode::Active`].
    pub fn turn_owner(&self) -> TurnOwner {
        self.turn_owner
    }

    /// Outcome of the current round, once decided.
    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    /// Pending rematch requests.
    pub fn rematch(&self) -> RematchFlags {
        self.rematch
    }

    /// True once a rematch was declined on this connection.
    pub fn rematch_closed(&self) -> bool {
        self.rematch_closed
    }

    /// Mark allowed to open the current round.
    pub fn round_starter(&self) -> Mark {
        self.round_starter
    }

    /// 1-based round number on this connection.
    pub fn round(&self) -> u32 {
        self.round
    }

    /// True if the round was aborted by an inconsistent peer move.
    pub fn violation(&self) -> bool {
        self.violation
    }

    /// The board.
    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Mark that moves next.
    ///
    /// In local mode this follows move-count parity; in a network round it
    /// follows the turn owner.
    pub fn mark_to_move(&self) -> Mark {
        match self.mode {
            Mode::Local if self.board.move_count() % 2 == 0 => Mark::X,
            Mode::Local => Mark::O,
            _ => match self.turn_owner {
                TurnOwner::Local => self.local_mark,
                TurnOwner::Remote => self.remote_mark,
            },
        }
    }

    /// True while a network connection backs the match.
    pub fn is_networked(&self) -> bool {
        matches!(self.mode, Mode::Active | Mode::RoundOver)
    }

    /// True if `request_rematch` would currently be accepted.
    pub fn can_request_rematch(&self) -> bool {
        self.mode == Mode::RoundOver && !self.rematch_closed && !self.rematch.any()
    }

    fn turn_owner_for_round(&self) -> TurnOwner {
        if self.local_mark == self.round_starter {
            TurnOwner::Local
        } else {
            TurnOwner::Remote
        }
    }
}

impl Default for MatchState {
    fn default() -> Self {
        Self::local()
    }
}

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchEvent {
    /// The board changed and should be redrawn.
    BoardChanged,
    /// The side to move changed.
    TurnChanged {
        /// Whose turn it is.
        owner: TurnOwner,
        /// Which mark moves.
        mark: Mark,
    },
    /// The round ended. `None` means it was aborted without a result.
    RoundOver(Option<Outcome>),
    /// A human-readable status line.
    Status(String),
    /// The peer asked for a rematch.
    RematchOffered,
    /// The connection is gone and the match is back in local mode.
    Disconnected(String),
    /// The peer sent a move the board refused.
    ProtocolViolation(String),
}

/// Errors returned to the caller of a match operation.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum MatchError {
    /// The board refused the move.
    #[display("{}", _0)]
    InvalidMove(InvalidMove),

    /// It is the peer's turn.
    #[display("It's not your turn")]
    NotYourTurn,

    /// Moves are not accepted in this mode.
    #[display("No round in progress ({})", _0)]
    NotInPlay(Mode),

    /// The round is already decided.
    #[display("The round is over")]
    RoundOver,

    /// A network match is already set up or running.
    #[display("Network session already active ({})", _0)]
    NetworkActive(Mode),

    /// The rematch operation is not allowed right now.
    #[display("Rematch unavailable: {}", _0)]
    RematchUnavailable(&'static str),

    /// The message could not be sent; the match reverted to local mode.
    #[display("{}", _0)]
    Send(SinkError),
}

impl std::error::Error for MatchError {}

impl From<InvalidMove> for MatchError {
    fn from(err: InvalidMove) -> Self {
        MatchError::InvalidMove(err)
    }
}

// ─────────────────────────────────────────────────────────────
//  State machine
// ─────────────────────────────────────────────────────────────

/// The match state machine.
#[derive(Debug, Clone, Default)]
pub struct Match {
    state: MatchState,
    events: Vec<MatchEvent>,
}

impl Match {
    /// Creates a match in local mode with an empty board.
    #[instrument]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> &MatchState {
        &self.state
    }

    /// Takes the events queued since the last call.
    pub fn drain_events(&mut self) -> Vec<MatchEvent> {
        std::mem::take(&mut self.events)
    }

    /// Starts a fresh single-process game, discarding any network state.
    #[instrument(skip(self), fields(mode = %self.state.mode))]
    pub fn start_local(&mut self) {
        self.state = MatchState::local();
        debug!("Started local game");
        self.emit(MatchEvent::BoardChanged);
        self.status("New local game. Player X's turn.");
        self.emit_turn();
        self.check_invariants();
    }

    /// Prepares to host: this side will be the listener and play X.
    ///
    /// # Errors
    ///
    /// Returns [`MatchError::NetworkActive`] unless in local mode.
    #[instrument(skip(self), fields(mode = %self.state.mode))]
    pub fn begin_as_listener(&mut self) -> Result<(), MatchError> {
        self.begin(Role::Listener)
    }

    /// Prepares to join `address`: this side will be the dialer and play O.
    ///
    /// # Errors
    ///
    /// Returns [`MatchError::NetworkActive`] unless in local mode.
    #[instrument(skip(self), fields(mode = %self.state.mode))]
    pub fn begin_as_dialer(&mut self, address: &str) -> Result<(), MatchError> {
        self.begin(Role::Dialer)?;
        debug!(address, "Dialer chosen");
        Ok(())
    }

    fn begin(&mut self, role: Role) -> Result<(), MatchError> {
        if self.state.mode != Mode::Local {
            warn!(mode = %self.state.mode, "Ignoring network start while already networked");
            return Err(MatchError::NetworkActive(self.state.mode));
        }
        self.state = MatchState::local();
        self.state.mode = Mode::AwaitingPeer;
        self.state.role = Some(role);
        info!(%role, "Awaiting peer");
        self.emit(MatchEvent::BoardChanged);
        self.check_invariants();
        Ok(())
    }

    /// The transport connected and assigned this side `local_mark`.
    ///
    /// Round one always opens with X.
    #[instrument(skip(self), fields(mode = %self.state.mode))]
    pub fn on_connected(&mut self, local_mark: Mark) {
        if self.state.mode != Mode::AwaitingPeer {
            warn!(mode = %self.state.mode, "Connection reported outside of setup, ignoring");
            return;
        }
        self.state.local_mark = local_mark;
        self.state.remote_mark = local_mark.opponent();
        self.state.round_starter = Mark::X;
        self.state.round = 1;
        self.state.rematch_closed = false;
        info!(%local_mark, "Network game started");
        self.status(format!("Network game started. You are '{}'.", local_mark));
        self.enter_round();
    }

    /// The transport could not establish the connection.
    #[instrument(skip(self), fields(mode = %self.state.mode))]
    pub fn on_connect_failed(&mut self, reason: &str) {
        if self.state.mode == Mode::Local {
            debug!("Connection failure for an abandoned attempt, ignoring");
            return;
        }
        warn!(reason, "Network setup failed, reverting to local game");
        self.state = MatchState::local();
        self.status(format!("Network error: {}", reason));
        self.emit(MatchEvent::BoardChanged);
        self.emit_turn();
        self.check_invariants();
    }

    /// Plays a move for this side.
    ///
    /// In local mode the mark follows move parity and nothing is sent. In
    /// a network round the move is sent to the peer after it is applied.
    ///
    /// # Errors
    ///
    /// - [`MatchError::NotYourTurn`] if the peer is to move.
    /// - [`MatchError::InvalidMove`] if the board refuses the cell.
    /// - [`MatchError::RoundOver`] / [`MatchError::NotInPlay`] outside a round.
    /// - [`MatchError::Send`] if the peer could not be reached; the match
    ///   has already reverted to local mode when this is returned.
    #[instrument(skip(self, sink), fields(mode = %self.state.mode))]
    pub fn submit_local_move(
        &mut self,
        row: usize,
        col: usize,
        sink: &mut dyn MessageSink,
    ) -> Result<(), MatchError> {
        match self.state.mode {
            Mode::Local => self.play_local(row, col),
            Mode::Active => self.play_networked(row, col, sink),
            Mode::RoundOver => Err(MatchError::RoundOver),
            Mode::AwaitingPeer => Err(MatchError::NotInPlay(self.state.mode)),
        }
    }

    fn play_local(&mut self, row: usize, col: usize) -> Result<(), MatchError> {
        if self.state.outcome.is_some() {
            return Err(MatchError::RoundOver);
        }
        let mark = self.state.mark_to_move();
        self.state.board.apply(row, col, mark)?;
        debug!(row, col, %mark, "Local move applied");
        self.emit(MatchEvent::BoardChanged);

        let outcome = if self.state.board.check_win(mark) {
            Some(Outcome::Win(mark))
        } else if self.state.board.is_full() {
            Some(Outcome::Draw)
        } else {
            None
        };

        match outcome {
            Some(outcome) => {
                self.state.outcome = Some(outcome);
                self.emit(MatchEvent::RoundOver(Some(outcome)));
                self.status(match outcome {
                    Outcome::Win(winner) => format!("Player {} wins!", winner),
                    Outcome::Draw => "It's a draw!".to_string(),
                });
            }
            None => {
                let next = self.state.mark_to_move();
                self.status(format!("Player {}'s turn", next));
                self.emit_turn();
            }
        }
        self.check_invariants();
        Ok(())
    }

    fn play_networked(
        &mut self,
        row: usize,
        col: usize,
        sink: &mut dyn MessageSink,
    ) -> Result<(), MatchError> {
        if self.state.turn_owner != TurnOwner::Local {
            return Err(MatchError::NotYourTurn);
        }
        let mark = self.state.local_mark;
        self.state.board.apply(row, col, mark)?;
        debug!(row, col, %mark, "Local move applied");
        self.emit(MatchEvent::BoardChanged);

        self.send(sink, Message::Move { row, col })?;
        self.settle(mark, TurnOwner::Remote);
        Ok(())
    }

    /// Applies a move the peer sent.
    ///
    /// Moves outside an active round or out of turn are discarded. A move
    /// the board refuses aborts the round with no outcome and raises
    /// [`MatchEvent::ProtocolViolation`].
    #[instrument(skip(self), fields(mode = %self.state.mode))]
    pub fn apply_remote_move(&mut self, row: usize, col: usize) {
        if self.state.mode != Mode::Active {
            warn!(row, col, mode = %self.state.mode, "Discarding remote move outside an active round");
            return;
        }
        if self.state.turn_owner != TurnOwner::Remote {
            warn!(row, col, "Discarding remote move played out of turn");
            self.status("Ignored an out-of-turn move from the opponent.");
            return;
        }

        let mark = self.state.remote_mark;
        match self.state.board.apply(row, col, mark) {
            Ok(()) => {
                debug!(row, col, %mark, "Remote move applied");
                self.emit(MatchEvent::BoardChanged);
                self.settle(mark, TurnOwner::Local);
            }
            Err(e) => {
                warn!(row, col, error = %e, "Peer sent an inconsistent move, aborting round");
                self.state.violation = true;
                self.emit(MatchEvent::ProtocolViolation(format!(
                    "Opponent sent an invalid move: {}",
                    e
                )));
                self.finish_round(None);
            }
        }
    }

    /// Dispatches a decoded message from the peer.
    #[instrument(skip(self, sink), fields(mode = %self.state.mode))]
    pub fn receive(&mut self, message: Message, sink: &mut dyn MessageSink) {
        match message {
            Message::Move { row, col } => self.apply_remote_move(row, col),
            Message::RematchRequest => self.on_rematch_requested(sink),
            Message::RematchAccept => self.on_rematch_accepted(),
            Message::RematchDecline => self.on_rematch_declined(),
        }
    }

    /// Asks the peer for another round.
    ///
    /// If the peer already asked, this accepts their request instead.
    ///
    /// # Errors
    ///
    /// Returns [`MatchError::RematchUnavailable`] outside a finished network
    /// round, after a decline, or while our own request is pending.
    #[instrument(skip(self, sink), fields(mode = %self.state.mode))]
    pub fn request_rematch(&mut self, sink: &mut dyn MessageSink) -> Result<(), MatchError> {
        self.ensure_rematch_window()?;
        if self.state.rematch.requested_by_local {
            return Err(MatchError::RematchUnavailable("a request is already pending"));
        }
        if self.state.rematch.requested_by_remote {
            return self.accept_rematch(sink);
        }
        self.send(sink, Message::RematchRequest)?;
        self.state.rematch.requested_by_local = true;
        self.status("Rematch requested, waiting for opponent...");
        self.check_invariants();
        Ok(())
    }

    /// Accepts the peer's pending rematch request and starts the next round.
    ///
    /// # Errors
    ///
    /// Returns [`MatchError::RematchUnavailable`] if no request is pending.
    #[instrument(skip(self, sink), fields(mode = %self.state.mode))]
    pub fn accept_rematch(&mut self, sink: &mut dyn MessageSink) -> Result<(), MatchError> {
        self.ensure_rematch_window()?;
        if !self.state.rematch.requested_by_remote {
            return Err(MatchError::RematchUnavailable("the opponent has not asked"));
        }
        self.send(sink, Message::RematchAccept)?;
        self.start_new_round();
        Ok(())
    }

    /// Refuses the peer's pending rematch request.
    ///
    /// No further rematch can be arranged on this connection.
    ///
    /// # Errors
    ///
    /// Returns [`MatchError::RematchUnavailable`] if no request is pending.
    #[instrument(skip(self, sink), fields(mode = %self.state.mode))]
    pub fn decline_rematch(&mut self, sink: &mut dyn MessageSink) -> Result<(), MatchError> {
        self.ensure_rematch_window()?;
        if !self.state.rematch.requested_by_remote {
            return Err(MatchError::RematchUnavailable("the opponent has not asked"));
        }
        self.send(sink, Message::RematchDecline)?;
        self.state.rematch.requested_by_remote = false;
        self.state.rematch_closed = true;
        self.status("Rematch declined. Game over.");
        self.check_invariants();
        Ok(())
    }

    /// The connection is gone. The match reverts to a fresh local game.
    #[instrument(skip(self), fields(mode = %self.state.mode))]
    pub fn disconnect(&mut self, reason: &str) {
        if self.state.mode == Mode::Local {
            debug!(reason, "Disconnect while local, ignoring");
            return;
        }
        info!(reason, "Connection lost, reverting to local game");
        self.state = MatchState::local();
        self.emit(MatchEvent::Disconnected(reason.to_string()));
        self.emit(MatchEvent::BoardChanged);
        self.emit_turn();
        self.check_invariants();
    }

    // ─────────────────────────────────────────────────────────
    //  Rematch handling for inbound control messages
    // ─────────────────────────────────────────────────────────

    fn on_rematch_requested(&mut self, sink: &mut dyn MessageSink) {
        if self.state.mode != Mode::RoundOver {
            warn!(mode = %self.state.mode, "Rematch request outside of round over, ignoring");
            return;
        }
        if self.state.rematch_closed {
            info!("Rematch already declined on this connection, refusing again");
            // A failed send has already reverted the match.
            let _ = self.send(sink, Message::RematchDecline);
            return;
        }
        if self.state.rematch.requested_by_local {
            info!("Rematch requests crossed, treating as accepted");
            if self.send(sink, Message::RematchAccept).is_ok() {
                self.start_new_round();
            }
            return;
        }
        self.state.rematch.requested_by_remote = true;
        self.emit(MatchEvent::RematchOffered);
        self.status("Opponent requests a rematch!");
        self.check_invariants();
    }

    fn on_rematch_accepted(&mut self) {
        if self.state.mode != Mode::RoundOver || !self.state.rematch.requested_by_local {
            warn!(mode = %self.state.mode, "Unsolicited rematch acceptance, ignoring");
            return;
        }
        self.status("Rematch accepted!");
        self.start_new_round();
    }

    fn on_rematch_declined(&mut self) {
        if self.state.mode != Mode::RoundOver || !self.state.rematch.requested_by_local {
            warn!(mode = %self.state.mode, "Unsolicited rematch decline, ignoring");
            return;
        }
        self.state.rematch.requested_by_local = false;
        self.state.rematch_closed = true;
        self.status("Opponent declined rematch. Game over.");
        self.check_invariants();
    }

    fn ensure_rematch_window(&self) -> Result<(), MatchError> {
        if self.state.mode != Mode::RoundOver {
            return Err(MatchError::RematchUnavailable("no finished network round"));
        }
        if self.state.rematch_closed {
            return Err(MatchError::RematchUnavailable("a rematch was declined"));
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────
    //  Round transitions
    // ─────────────────────────────────────────────────────────

    /// Begins the next round on the same connection, swapping who opens.
    fn start_new_round(&mut self) {
        self.state.round_starter = self.state.round_starter.opponent();
        self.state.round += 1;
        info!(round = self.state.round, starter = %self.state.round_starter, "Starting new round");
        self.enter_round();
        if self.state.turn_owner == TurnOwner::Local {
            self.status(format!("New round! Your ({}) turn.", self.state.local_mark));
        } else {
            self.status(format!(
                "New round! Waiting for opponent ('{}')'s move...",
                self.state.remote_mark
            ));
        }
    }

    fn enter_round(&mut self) {
        self.state.board.reset();
        self.state.rematch = RematchFlags::default();
        self.state.outcome = None;
        self.state.violation = false;
        self.state.turn_owner = self.state.turn_owner_for_round();
        self.state.mode = Mode::Active;
        self.emit(MatchEvent::BoardChanged);
        self.emit_turn();
        self.check_invariants();
    }

    /// Decides the round after `mark` moved, or hands the turn to `next`.
    fn settle(&mut self, mark: Mark, next: TurnOwner) {
        if self.state.board.check_win(mark) {
            self.finish_round(Some(Outcome::Win(mark)));
        } else if self.state.board.is_full() {
            self.finish_round(Some(Outcome::Draw));
        } else {
            self.state.turn_owner = next;
            match next {
                TurnOwner::Local => {
                    self.status(format!("Your ({}) turn.", self.state.local_mark))
                }
                TurnOwner::Remote => self.status(format!(
                    "Waiting for opponent ('{}')'s move...",
                    self.state.remote_mark
                )),
            }
            self.emit_turn();
            self.check_invariants();
        }
    }

    fn finish_round(&mut self, outcome: Option<Outcome>) {
        self.state.outcome = outcome;
        self.state.mode = Mode::RoundOver;
        info!(?outcome, round = self.state.round, "Round over");
        self.emit(MatchEvent::RoundOver(outcome));
        let message = match outcome {
            Some(Outcome::Win(mark)) if mark == self.state.local_mark => {
                format!("You ({}) win!", mark)
            }
            Some(Outcome::Win(mark)) => format!("Opponent ({}) wins!", mark),
            Some(Outcome::Draw) => "It's a draw!".to_string(),
            None => "Round aborted.".to_string(),
        };
        self.status(message);
        self.check_invariants();
    }

    // ─────────────────────────────────────────────────────────
    //  Helpers
    // ─────────────────────────────────────────────────────────

    /// Sends `message`; on failure the match reverts to local mode.
    fn send(&mut self, sink: &mut dyn MessageSink, message: Message) -> Result<(), MatchError> {
        match sink.send(message) {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(error = %e, outbound = %message, "Failed to send message to peer");
                self.disconnect(&format!("Send error: {}", e.message));
                Err(MatchError::Send(e))
            }
        }
    }

    fn emit(&mut self, event: MatchEvent) {
        self.events.push(event);
    }

    fn status(&mut self, message: impl Into<String>) {
        self.events.push(MatchEvent::Status(message.into()));
    }

    fn emit_turn(&mut self) {
        let owner = match self.state.mode {
            Mode::Local => TurnOwner::Local,
            _ => self.state.turn_owner,
        };
        let mark = self.state.mark_to_move();
        self.events.push(MatchEvent::TurnChanged { owner, mark });
    }

    fn check_invariants(&self) {
        let result = MatchInvariants::check_all(&self.state);
        if let Err(violations) = &result {
            let descriptions = violations
                .iter()
                .map(|v| v.description.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            error!(%descriptions, "Match invariants violated");
        }
        debug_assert!(result.is_ok(), "Match invariants violated");
    }
}
