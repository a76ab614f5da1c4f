//! Round outcome invariant: only a finished round carries a result.

use super::Invariant;
use crate::machine::{MatchState, Mode};

/// Invariant: the outcome agrees with the mode.
///
/// An active round or a pending connection has no outcome. A finished
/// network round has one unless it was aborted by a protocol violation.
/// In local mode any recorded win belongs to the board.
pub struct RoundOutcomeInvariant;

impl Invariant<MatchState> for RoundOutcomeInvariant {
    fn holds(state: &MatchState) -> bool {
        match state.mode() {
            Mode::Active | Mode::AwaitingPeer => state.outcome().is_none(),
            Mode::RoundOver => state.outcome().is_some() != state.violation(),
            Mode::Local => match state.outcome().and_then(|o| o.winner()) {
                Some(mark) => state.board().check_win(mark),
                None => true,
            },
        }
    }

    fn description() -> &'static str {
        "Outcome is set exactly when the round is decided"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Mark, Outcome};

    #[test]
    fn test_active_without_outcome_holds() {
        let mut state = MatchState::default();
        state.mode = Mode::Active;
        assert!(RoundOutcomeInvariant::holds(&state));
    }

    #[test]
    fn test_round_over_needs_outcome_or_violation() {
        let mut state = MatchState::default();
        state.mode = Mode::RoundOver;
        assert!(!RoundOutcomeInvariant::holds(&state));

        state.violation = true;
        assert!(RoundOutcomeInvariant::holds(&state));

        state.outcome = Some(Outcome::Draw);
        assert!(!RoundOutcomeInvariant::holds(&state));
    }

    #[test]
    fn test_local_win_must_be_on_board() {
        let mut state = MatchState::default();
        state.outcome = Some(Outcome::Win(Mark::O));
        assert!(!RoundOutcomeInvariant::holds(&state));
    }
}
