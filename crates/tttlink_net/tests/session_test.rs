//! Two full sessions playing each other over loopback.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tttlink_game::{Mark, MatchEvent, MatchState, Mode, Outcome, TurnOwner};
use tttlink_net::{Command, NetConfig, Presenter, Session};

const WAIT: Duration = Duration::from_secs(5);

/// Forwards every rendered event to the test.
struct ChannelPresenter {
    tx: UnboundedSender<(MatchEvent, MatchState)>,
}

impl Presenter for ChannelPresenter {
    fn render(&mut self, event: &MatchEvent, state: &MatchState) {
        let _ = self.tx.send((event.clone(), state.clone()));
    }
}

/// A running session and the channels to drive and observe it.
struct Player {
    commands: UnboundedSender<Command>,
    rendered: UnboundedReceiver<(MatchEvent, MatchState)>,
    task: JoinHandle<ChannelPresenter>,
}

impl Player {
    fn spawn() -> Self {
        let (tx, rendered) = mpsc::unbounded_channel();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let config = NetConfig::default().with_overrides(Some(0), None);
        let session = Session::new(config, ChannelPresenter { tx });
        let task = tokio::spawn(session.run(command_rx));
        Self {
            commands,
            rendered,
            task,
        }
    }

    fn send(&self, command: Command) {
        self.commands.send(command).unwrap();
    }

    /// Waits for the first rendered event matching `pred` and returns the
    /// state that came with it.
    async fn wait_for(
        &mut self,
        mut pred: impl FnMut(&MatchEvent, &MatchState) -> bool,
    ) -> MatchState {
        loop {
            let (event, state) = tokio::time::timeout(WAIT, self.rendered.recv())
                .await
                .expect("timed out waiting for the session")
                .expect("session ended");
            if pred(&event, &state) {
                return state;
            }
        }
    }

    async fn wait_for_status(&mut self, text: &str) -> MatchState {
        self.wait_for(|event, _| matches!(event, MatchEvent::Status(s) if s.contains(text)))
            .await
    }

    async fn wait_for_mode(&mut self, mode: Mode) -> MatchState {
        self.wait_for(|_, state| state.mode() == mode).await
    }

    async fn wait_for_moves(&mut self, count: usize) -> MatchState {
        self.wait_for(|event, state| {
            *event == MatchEvent::BoardChanged && state.board().move_count() == count
        })
        .await
    }

    async fn quit(self) {
        self.send(Command::Quit);
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("session did not quit")
            .unwrap();
    }
}

/// Starts a host on loopback and a guest joined to it.
async fn connected() -> (Player, Player) {
    let mut host = Player::spawn();
    let mut guest = Player::spawn();

    host.send(Command::Host {
        bind: Some("127.0.0.1".parse().unwrap()),
    });
    let mut listening = None;
    host.wait_for(|event, _| match event {
        MatchEvent::Status(s) => {
            listening = s
                .strip_prefix("Listening on ")
                .and_then(|rest| rest.strip_suffix(". Waiting..."))
                .and_then(|addr| addr.parse::<SocketAddr>().ok());
            listening.is_some()
        }
        _ => false,
    })
    .await;
    let addr = listening.expect("listening address");

    guest.send(Command::Join {
        host: format!("127.0.0.1:{}", addr.port()),
    });
    (host, guest)
}

#[tokio::test]
async fn test_connect_assigns_marks_and_turns() {
    let (mut host, mut guest) = connected().await;

    let host_state = host.wait_for_mode(Mode::Active).await;
    assert_eq!(host_state.local_mark(), Mark::X);
    assert_eq!(host_state.turn_owner(), TurnOwner::Local);

    let guest_state = guest.wait_for_mode(Mode::Active).await;
    assert_eq!(guest_state.local_mark(), Mark::O);
    assert_eq!(guest_state.turn_owner(), TurnOwner::Remote);

    host.quit().await;
    guest.quit().await;
}

#[tokio::test]
async fn test_play_win_and_rematch_swaps_starter() {
    let (mut host, mut guest) = connected().await;
    host.wait_for_mode(Mode::Active).await;
    guest.wait_for_mode(Mode::Active).await;

    // X takes the top row while O plays the middle row.
    let script = [(true, 0, 0), (false, 1, 0), (true, 0, 1), (false, 1, 1), (true, 0, 2)];
    for (count, (host_turn, row, col)) in script.into_iter().enumerate() {
        let mover = if host_turn { &host } else { &guest };
        mover.send(Command::CellClicked { row, col });
        host.wait_for_moves(count + 1).await;
        guest.wait_for_moves(count + 1).await;
    }

    let host_state = host.wait_for_mode(Mode::RoundOver).await;
    let guest_state = guest.wait_for_mode(Mode::RoundOver).await;
    assert_eq!(host_state.outcome(), Some(Outcome::Win(Mark::X)));
    assert_eq!(guest_state.outcome(), Some(Outcome::Win(Mark::X)));
    assert_eq!(host_state.board(), guest_state.board());

    guest.send(Command::RequestRematch);
    host.wait_for(|event, _| *event == MatchEvent::RematchOffered)
        .await;
    host.send(Command::AcceptRematch);

    for player in [&mut host, &mut guest] {
        let state = player.wait_for_mode(Mode::Active).await;
        assert_eq!(state.round(), 2);
        assert_eq!(state.round_starter(), Mark::O);
        assert_eq!(state.board().move_count(), 0);
    }

    // O opens round two.
    guest.send(Command::CellClicked { row: 1, col: 1 });
    let host_state = host.wait_for_moves(1).await;
    assert_eq!(host_state.turn_owner(), TurnOwner::Local);

    host.quit().await;
    guest.quit().await;
}

#[tokio::test]
async fn test_out_of_turn_click_is_reported() {
    let (mut host, mut guest) = connected().await;
    host.wait_for_mode(Mode::Active).await;
    guest.wait_for_mode(Mode::Active).await;

    guest.send(Command::CellClicked { row: 0, col: 0 });
    let state = guest.wait_for_status("not your turn").await;
    assert_eq!(state.board().move_count(), 0);

    host.quit().await;
    guest.quit().await;
}

#[tokio::test]
async fn test_peer_leaving_reverts_to_local() {
    let (mut host, mut guest) = connected().await;
    host.wait_for_mode(Mode::Active).await;
    guest.wait_for_mode(Mode::Active).await;

    host.send(Command::CellClicked { row: 1, col: 1 });
    guest.wait_for_moves(1).await;

    guest.quit().await;

    let state = host
        .wait_for(|event, _| matches!(event, MatchEvent::Disconnected(_)))
        .await;
    assert_eq!(state.mode(), Mode::Local);
    assert_eq!(state.board().move_count(), 0);

    // The board is playable locally again.
    host.send(Command::CellClicked { row: 0, col: 0 });
    let state = host.wait_for_moves(1).await;
    assert_eq!(state.mode(), Mode::Local);

    host.quit().await;
}

#[tokio::test]
async fn test_join_refused_returns_to_local() {
    let port = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port()
    };

    let mut guest = Player::spawn();
    guest.send(Command::Join {
        host: format!("127.0.0.1:{}", port),
    });
    let state = guest.wait_for_status("Network error").await;
    assert_eq!(state.mode(), Mode::Local);

    guest.quit().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_first_move_right_after_connect_on_multi_thread_runtime() {
    for _ in 0..20 {
        let (mut host, mut guest) = connected().await;
        host.wait_for_mode(Mode::Active).await;
        host.send(Command::CellClicked { row: 0, col: 0 });

        let state = host.wait_for_moves(1).await;
        assert_eq!(state.mode(), Mode::Active);
        assert_eq!(state.turn_owner(), TurnOwner::Remote);

        let state = guest.wait_for_moves(1).await;
        assert_eq!(state.mode(), Mode::Active);
        assert_eq!(state.turn_owner(), TurnOwner::Local);

        host.quit().await;
        guest.quit().await;
    }
}
