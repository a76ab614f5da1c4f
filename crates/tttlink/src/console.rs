//! Line-oriented console front end.

use derive_more::Display;
use std::io::Write;
use std::net::IpAddr;
use tracing::{instrument, warn};
use tttlink_game::{BOARD_SIZE, MatchEvent, MatchState, Mode, TurnOwner};
use tttlink_net::{Command, Presenter};

/// Help text shown at startup and on `help`.
pub const HELP: &str = "\
Commands:
  <1-9>            place your mark on the numbered cell
  <row> <col>      place your mark at row/column 0-2
  local            start a new local game
  host [address]   host a network game (you play X)
  join <address>   join a hosted game (you play O)
  rematch          ask for another round
  accept           accept a rematch request
  decline          decline a rematch request
  help             show this help
  quit             leave";

/// What a typed line asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// A session command.
    Command(Command),
    /// Show the help text.
    Help,
    /// Blank line.
    Empty,
}

/// A line that could not be understood.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum InputError {
    /// First word is not a command.
    #[display("Unknown command '{}'. Type 'help' for a list.", _0)]
    Unknown(String),

    /// Cell coordinates are not valid.
    #[display("'{}' is not a cell. Use 1-9 or '<row> <col>' with 0-2.", _0)]
    BadCell(String),

    /// `join` without an address.
    #[display("Usage: join <address>")]
    MissingHost,

    /// `host` with something that is not an IP address.
    #[display("'{}' is not an IP address", _0)]
    BadAddress(String),
}

impl std::error::Error for InputError {}

/// Parses one typed line.
#[instrument]
pub fn parse_command(line: &str) -> Result<Input, InputError> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((first, rest)) = words.split_first() else {
        return Ok(Input::Empty);
    };

    let command = match first.to_ascii_lowercase().as_str() {
        "help" | "?" => return Ok(Input::Help),
        "quit" | "exit" => Command::Quit,
        "local" | "new" => Command::NewLocalGame,
        "rematch" => Command::RequestRematch,
        "accept" | "yes" => Command::AcceptRematch,
        "decline" | "no" => Command::DeclineRematch,
        "host" => match rest.first() {
            None => Command::Host { bind: None },
            Some(address) => Command::Host {
                bind: Some(
                    address
                        .parse::<IpAddr>()
                        .map_err(|_| InputError::BadAddress(address.to_string()))?,
                ),
            },
        },
        "join" => Command::Join {
            host: rest
                .first()
                .ok_or(InputError::MissingHost)?
                .to_string(),
        },
        word if word.chars().all(|c| c.is_ascii_digit()) => parse_cell(&words, line)?,
        other => return Err(InputError::Unknown(other.to_string())),
    };
    Ok(Input::Command(command))
}

fn parse_cell(words: &[&str], line: &str) -> Result<Command, InputError> {
    let bad = || InputError::BadCell(line.trim().to_string());
    let numbers = words
        .iter()
        .map(|w| w.parse::<usize>().map_err(|_| bad()))
        .collect::<Result<Vec<_>, _>>()?;

    match numbers.as_slice() {
        [cell] if (1..=BOARD_SIZE * BOARD_SIZE).contains(cell) => Ok(Command::CellClicked {
            row: (cell - 1) / BOARD_SIZE,
            col: (cell - 1) % BOARD_SIZE,
        }),
        [row, col] if *row < BOARD_SIZE && *col < BOARD_SIZE => Ok(Command::CellClicked {
            row: *row,
            col: *col,
        }),
        _ => Err(bad()),
    }
}

/// Prints match events as plain text.
#[derive(Debug)]
pub struct ConsolePresenter<W: Write> {
    out: W,
}

impl<W: Write> ConsolePresenter<W> {
    /// Creates a presenter writing to `out`.
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// The underlying writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, text: &str) {
        if let Err(e) = writeln!(self.out, "{}", text).and_then(|_| self.out.flush()) {
            warn!(error = %e, "Console write failed");
        }
    }
}

impl<W: Write> Presenter for ConsolePresenter<W> {
    fn render(&mut self, event: &MatchEvent, state: &MatchState) {
        match event {
            MatchEvent::BoardChanged => {
                let board = state.board().display();
                self.line("");
                self.line(&board);
                self.line("");
            }
            MatchEvent::TurnChanged { owner, mark } => {
                if state.mode() == Mode::Active {
                    let whose = match owner {
                        TurnOwner::Local => "you",
                        TurnOwner::Remote => "opponent",
                    };
                    self.line(&format!("[{} to move: {}]", mark, whose));
                }
            }
            MatchEvent::RoundOver(_) => {
                if state.can_request_rematch() {
                    self.line("Type 'rematch' for another round or 'local' to stop.");
                } else if state.mode() == Mode::Local {
                    self.line("Type 'local' to play again.");
                }
            }
            MatchEvent::Status(message) => self.line(message),
            MatchEvent::RematchOffered => self.line("Type 'accept' or 'decline'."),
            MatchEvent::Disconnected(reason) => {
                self.line(&format!("{} Back to a local game.", reason));
            }
            MatchEvent::ProtocolViolation(message) => {
                self.line(&format!("Warning: {}", message));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(line: &str) -> Command {
        match parse_command(line) {
            Ok(Input::Command(command)) => command,
            other => panic!("{:?} parsed as {:?}", line, other),
        }
    }

    #[test]
    fn test_keypad_cells() {
        assert_eq!(command("1"), Command::CellClicked { row: 0, col: 0 });
        assert_eq!(command("5"), Command::CellClicked { row: 1, col: 1 });
        assert_eq!(command(" 9 "), Command::CellClicked { row: 2, col: 2 });
        assert!(matches!(parse_command("0"), Err(InputError::BadCell(_))));
        assert!(matches!(parse_command("10"), Err(InputError::BadCell(_))));
    }

    #[test]
    fn test_row_col_cells() {
        assert_eq!(command("2 0"), Command::CellClicked { row: 2, col: 0 });
        assert!(matches!(parse_command("3 0"), Err(InputError::BadCell(_))));
        assert!(matches!(parse_command("1 x"), Err(InputError::BadCell(_))));
    }

    #[test]
    fn test_session_commands() {
        assert_eq!(command("host"), Command::Host { bind: None });
        assert_eq!(
            command("host 127.0.0.1"),
            Command::Host {
                bind: Some("127.0.0.1".parse().unwrap())
            }
        );
        assert_eq!(
            command("JOIN 10.0.0.2:4000"),
            Command::Join {
                host: "10.0.0.2:4000".to_string()
            }
        );
        assert_eq!(command("rematch"), Command::RequestRematch);
        assert_eq!(command("accept"), Command::AcceptRematch);
        assert_eq!(command("decline"), Command::DeclineRematch);
        assert_eq!(command("local"), Command::NewLocalGame);
        assert_eq!(command("quit"), Command::Quit);
    }

    #[test]
    fn test_help_empty_and_errors() {
        assert_eq!(parse_command("help"), Ok(Input::Help));
        assert_eq!(parse_command("   "), Ok(Input::Empty));
        assert_eq!(parse_command("join"), Err(InputError::MissingHost));
        assert_eq!(
            parse_command("host nowhere"),
            Err(InputError::BadAddress("nowhere".to_string()))
        );
        assert_eq!(
            parse_command("surrender"),
            Err(InputError::Unknown("surrender".to_string()))
        );
    }

    #[test]
    fn test_presenter_prints_board_and_status() {
        let mut presenter = ConsolePresenter::new(Vec::new());
        let state = MatchState::default();
        presenter.render(&MatchEvent::BoardChanged, &state);
        presenter.render(&MatchEvent::Status("Player X's turn".to_string()), &state);

        let text = String::from_utf8(presenter.into_inner()).unwrap();
        assert!(text.contains("1|2|3"));
        assert!(text.contains("Player X's turn"));
    }
}
