//! Move counter invariant: the counter matches the occupied cells.

use super::Invariant;
use crate::machine::MatchState;
use crate::types::Cell;

/// Invariant: the board's move counter equals its number of occupied cells.
pub struct MoveCountInvariant;

impl Invariant<MatchState> for MoveCountInvariant {
    fn holds(state: &MatchState) -> bool {
        let occupied = state
            .board()
            .cells()
            .iter()
            .flatten()
            .filter(|cell| **cell != Cell::Empty)
            .count();
        occupied == state.board().move_count()
    }

    fn description() -> &'static str {
        "Move counter equals the number of occupied cells"
    }
}
