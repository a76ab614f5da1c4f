//! Core domain types for tic-tac-toe.

use serde::{Deserialize, Serialize};
use tracing::instrument;

/// Side length of the board.
pub const BOARD_SIZE: usize = 3;

/// One of the two player symbols.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
)]
pub enum Mark {
    /// Player X (the listener's mark, opens round one).
    X,
    /// Player O (the dialer's mark).
    O,
}

impl Mark {
    /// Returns the other mark.
    pub fn opponent(self) -> Self {
        match self {
            Mark::X => Mark::O,
            Mark::O => Mark::X,
        }
    }
}

/// A cell on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cell {
    /// Empty cell.
    Empty,
    /// Cell occupied by a mark.
    Occupied(Mark),
}

/// A move the board refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum InvalidMove {
    /// Row or column outside `[0, BOARD_SIZE)`.
    #[display("Cell ({row}, {col}) is off the board")]
    OutOfBounds {
        /// Requested row.
        row: usize,
        /// Requested column.
        col: usize,
    },

    /// The cell already holds a mark.
    #[display("Cell ({row}, {col}) is already taken")]
    Occupied {
        /// Requested row.
        row: usize,
        /// Requested column.
        col: usize,
    },
}

impl std::error::Error for InvalidMove {}

/// 3x3 tic-tac-toe board with a move counter.
///
/// The counter always equals the number of occupied cells; `apply` is
/// the only way to fill a cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    cells: [[Cell; BOARD_SIZE]; BOARD_SIZE],
    moves: usize,
}

impl Board {
    /// Creates a new empty board.
    pub fn new() -> Self {
        Self {
            cells: [[Cell::Empty; BOARD_SIZE]; BOARD_SIZE],
            moves: 0,
        }
    }

    /// Gets the cell at (row, col), or `None` when off the board.
    pub fn get(&self, row: usize, col: usize) -> Option<Cell> {
        self.cells.get(row).and_then(|r| r.get(col)).copied()
    }

    /// Returns true if (row, col) is on the board and empty.
    pub fn is_empty(&self, row: usize, col: usize) -> bool {
        matches!(self.get(row, col), Some(Cell::Empty))
    }

    /// Places `mark` at (row, col).
    ///
    /// # Errors
    ///
    /// Returns [`InvalidMove`] if the coordinates are off the board or the
    /// cell is taken. The board is untouched on error.
    #[instrument(skip(self), fields(moves = self.moves))]
    pub fn apply(&mut self, row: usize, col: usize, mark: Mark) -> Result<(), InvalidMove> {
        match self.get(row, col) {
            None => Err(InvalidMove::OutOfBounds { row, col }),
            Some(Cell::Occupied(_)) => Err(InvalidMove::Occupied { row, col }),
            Some(Cell::Empty) => {
                self.cells[row][col] = Cell::Occupied(mark);
                self.moves += 1;
                Ok(())
            }
        }
    }

    /// Returns true if some row, column, or diagonal is entirely `mark`.
    pub fn check_win(&self, mark: Mark) -> bool {
        let owned = |row: usize, col: usize| self.cells[row][col] == Cell::Occupied(mark);

        let any_row = (0..BOARD_SIZE).any(|r| (0..BOARD_SIZE).all(|c| owned(r, c)));
        let any_col = (0..BOARD_SIZE).any(|c| (0..BOARD_SIZE).all(|r| owned(r, c)));
        let diagonal = (0..BOARD_SIZE).all(|i| owned(i, i));
        let anti_diagonal = (0..BOARD_SIZE).all(|i| owned(i, BOARD_SIZE - 1 - i));

        any_row || any_col || diagonal || anti_diagonal
    }

    /// Returns the mark holding a full line, if any.
    pub fn winner(&self) -> Option<Mark> {
        <Mark as strum::IntoEnumIterator>::iter().find(|mark| self.check_win(*mark))
    }

    /// Returns true once every cell is occupied.
    pub fn is_full(&self) -> bool {
        self.moves == BOARD_SIZE * BOARD_SIZE
    }

    /// Number of marks placed since the last reset.
    pub fn move_count(&self) -> usize {
        self.moves
    }

    /// Clears every cell and the move counter.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Returns the cells in row-major order.
    pub fn cells(&self) -> &[[Cell; BOARD_SIZE]; BOARD_SIZE] {
        &self.cells
    }

    /// Formats the board as a human-readable string.
    ///
    /// Empty cells show their 1-9 keypad number.
    pub fn display(&self) -> String {
        let mut result = String::new();
        for (row, cells) in self.cells.iter().enumerate() {
            for (col, cell) in cells.iter().enumerate() {
                let symbol = match cell {
                    Cell::Empty => (row * BOARD_SIZE + col + 1).to_string(),
                    Cell::Occupied(mark) => mark.to_string(),
                };
                result.push_str(&symbol);
                if col < BOARD_SIZE - 1 {
                    result.push('|');
                }
            }
            if row < BOARD_SIZE - 1 {
                result.push_str("\n-+-+-\n");
            }
        }
        result
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

/// How a round ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    /// A mark completed a line.
    Win(Mark),
    /// The board filled with no line completed.
    Draw,
}

impl Outcome {
    /// Returns the winner if there is one.
    pub fn winner(&self) -> Option<Mark> {
        match self {
            Outcome::Win(mark) => Some(*mark),
            Outcome::Draw => None,
        }
    }

    /// Returns true if the round was a draw.
    pub fn is_draw(&self) -> bool {
        matches!(self, Outcome::Draw)
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Win(mark) => write!(f, "Player {} wins", mark),
            Outcome::Draw => write!(f, "Draw"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(board: &mut Board, cells: &[(usize, usize, Mark)]) {
        for &(row, col, mark) in cells {
            board.apply(row, col, mark).expect("legal placement");
        }
    }

    #[test]
    fn test_no_winner_empty_board() {
        let board = Board::new();
        assert!(!board.check_win(Mark::X));
        assert!(!board.check_win(Mark::O));
        assert_eq!(board.winner(), None);
    }

    #[test]
    fn test_every_line_wins() {
        let mut lines: Vec<[(usize, usize); 3]> = Vec::new();
        for i in 0..BOARD_SIZE {
            lines.push([(i, 0), (i, 1), (i, 2)]);
            lines.push([(0, i), (1, i), (2, i)]);
        }
        lines.push([(0, 0), (1, 1), (2, 2)]);
        lines.push([(0, 2), (1, 1), (2, 0)]);
        assert_eq!(lines.len(), 8);

        for line in lines {
            let mut board = Board::new();
            for (row, col) in line {
                board.apply(row, col, Mark::O).unwrap();
            }
            assert!(board.check_win(Mark::O), "line {:?} should win", line);
            assert!(!board.check_win(Mark::X));
        }
    }

    #[test]
    fn test_no_winner_incomplete() {
        let mut board = Board::new();
        fill(&mut board, &[(0, 0, Mark::X), (0, 1, Mark::X), (0, 2, Mark::O)]);
        assert!(!board.check_win(Mark::X));
        assert!(!board.check_win(Mark::O));
    }

    #[test]
    fn test_occupied_cell_rejected_without_mutation() {
        let mut board = Board::new();
        board.apply(1, 1, Mark::X).unwrap();
        let before = board.clone();

        let err = board.apply(1, 1, Mark::O).unwrap_err();
        assert_eq!(err, InvalidMove::Occupied { row: 1, col: 1 });
        assert_eq!(board, before);
        assert_eq!(board.move_count(), 1);
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        let mut board = Board::new();
        assert_eq!(
            board.apply(3, 0, Mark::X),
            Err(InvalidMove::OutOfBounds { row: 3, col: 0 })
        );
        assert_eq!(
            board.apply(0, 7, Mark::X),
            Err(InvalidMove::OutOfBounds { row: 0, col: 7 })
        );
        assert!(!board.is_empty(3, 3));
        assert_eq!(board.move_count(), 0);
    }

    #[test]
    fn test_move_count_tracks_cells_and_reset() {
        let mut board = Board::new();
        fill(&mut board, &[(0, 0, Mark::X), (2, 2, Mark::O), (1, 0, Mark::X)]);
        let occupied = board
            .cells()
            .iter()
            .flatten()
            .filter(|c| **c != Cell::Empty)
            .count();
        assert_eq!(board.move_count(), occupied);

        board.reset();
        assert_eq!(board.move_count(), 0);
        assert!(board.is_empty(0, 0));
        assert_eq!(board, Board::new());
    }

    #[test]
    fn test_full_board_draw() {
        // X O X / X O O / O X X
        let mut board = Board::new();
        fill(
            &mut board,
            &[
                (0, 0, Mark::X),
                (0, 1, Mark::O),
                (0, 2, Mark::X),
                (1, 0, Mark::X),
                (1, 1, Mark::O),
                (1, 2, Mark::O),
                (2, 0, Mark::O),
                (2, 1, Mark::X),
                (2, 2, Mark::X),
            ],
        );
        assert!(board.is_full());
        assert_eq!(board.winner(), None);
    }

    #[test]
    fn test_display_numbers_empty_cells() {
        let mut board = Board::new();
        board.apply(0, 0, Mark::X).unwrap();
        board.apply(1, 1, Mark::O).unwrap();
        assert_eq!(board.display(), "X|2|3\n-+-+-\n4|O|6\n-+-+-\n7|8|9");
    }
}
