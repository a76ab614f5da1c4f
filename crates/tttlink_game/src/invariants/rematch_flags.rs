//! Rematch flag invariant.

use super::Invariant;
use crate::machine::{MatchState, Mode};

/// Invariant: rematch requests only exist between rounds, never both at
/// once, and never after the rematch was closed.
pub struct RematchFlagsInvariant;

impl Invariant<MatchState> for RematchFlagsInvariant {
    fn holds(state: &MatchState) -> bool {
        let flags = state.rematch();
        if !flags.any() {
            return true;
        }
        state.mode() == Mode::RoundOver
            && !(flags.requested_by_local && flags.requested_by_remote)
            && !state.rematch_closed()
    }

    fn description() -> &'static str {
        "Rematch requests are pending only while the round is over"
    }
}
