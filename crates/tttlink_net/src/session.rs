//! Foreground driver tying the match state machine to the transport.
//!
//! A [`Session`] is the only owner of the [`Match`]. It consumes user
//! [`Command`]s and transport [`LinkEvent`]s one at a time from a single
//! `select!` loop and hands every resulting [`MatchEvent`] to a
//! [`Presenter`].

use crate::addr::detect_local_ip;
use crate::config::NetConfig;
use crate::transport::{AttemptId, LinkEvent, Transport, TransportEvent};
use std::net::{IpAddr, SocketAddr};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use tttlink_game::{Match, MatchError, MatchEvent, MatchState, Mode};

/// Renders match events for a human.
pub trait Presenter {
    /// Called once per event, with the state after the event applied.
    fn render(&mut self, event: &MatchEvent, state: &MatchState);
}

/// A user action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// The user picked a cell.
    CellClicked {
        /// Row, 0-based.
        row: usize,
        /// Column, 0-based.
        col: usize,
    },
    /// Host a network match, optionally on a specific local address.
    Host {
        /// Local address to bind instead of the configured or detected one.
        bind: Option<IpAddr>,
    },
    /// Join a match hosted at `host`.
    Join {
        /// Host name or IP of the listener, with an optional `:port`.
        host: String,
    },
    /// Ask the peer for another round.
    RequestRematch,
    /// Accept the peer's rematch request.
    AcceptRematch,
    /// Decline the peer's rematch request.
    DeclineRematch,
    /// Drop any network match and start a fresh local game.
    NewLocalGame,
    /// Leave the program.
    Quit,
}

/// Owns the match, the transport and the presenter.
#[derive(Debug)]
pub struct Session<P: Presenter> {
    game: Match,
    transport: Transport,
    events: mpsc::UnboundedReceiver<LinkEvent>,
    presenter: P,
}

impl<P: Presenter> Session<P> {
    /// Creates a session with a fresh local game.
    #[instrument(skip(config, presenter))]
    pub fn new(config: NetConfig, presenter: P) -> Self {
        let (transport, events) = Transport::new(config);
        Self {
            game: Match::new(),
            transport,
            events,
            presenter,
        }
    }

    /// Current match state.
    pub fn state(&self) -> &MatchState {
        self.game.state()
    }

    /// The presenter.
    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    /// The transport.
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Runs until [`Command::Quit`] arrives or the command channel closes.
    ///
    /// Returns the presenter so callers can inspect what was shown.
    #[instrument(skip_all)]
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) -> P {
        self.game.start_local();
        self.flush();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Quit) | None => {
                        info!("Quitting");
                        break;
                    }
                    Some(command) => {
                        if let Err(e) = self.handle_command(command) {
                            self.report(&e);
                        }
                    }
                },
                Some(link_event) = self.events.recv() => self.handle_transport_event(link_event),
            }
        }

        self.transport.shutdown().await;
        self.presenter
    }

    /// Applies one user command.
    ///
    /// # Errors
    ///
    /// Returns the [`MatchError`] the state machine refused the command
    /// with. The match is left unchanged unless the error is a send
    /// failure, which has already reverted it to local mode.
    #[instrument(skip(self), fields(mode = %self.game.state().mode()))]
    pub fn handle_command(&mut self, command: Command) -> Result<(), MatchError> {
        let result = match command {
            Command::CellClicked { row, col } => {
                self.game.submit_local_move(row, col, &mut self.transport)
            }
            Command::Host { bind } => self.host(bind),
            Command::Join { host } => self.join(host),
            Command::RequestRematch => self.game.request_rematch(&mut self.transport),
            Command::AcceptRematch => self.game.accept_rematch(&mut self.transport),
            Command::DeclineRematch => self.game.decline_rematch(&mut self.transport),
            Command::NewLocalGame => {
                self.transport.stop();
                self.game.start_local();
                Ok(())
            }
            Command::Quit => {
                self.transport.stop();
                Ok(())
            }
        };
        self.flush();
        result
    }

    /// Applies one transport report. Reports from stopped attempts are
    /// dropped.
    #[instrument(skip(self), fields(mode = %self.game.state().mode()))]
    pub fn handle_transport_event(&mut self, link_event: LinkEvent) {
        let LinkEvent { attempt, event } = link_event;
        if !self.transport.is_current(attempt) {
            debug!(attempt, "Dropping event from a stopped attempt");
            return;
        }

        match event {
            TransportEvent::Status(message) => {
                self.presenter
                    .render(&MatchEvent::Status(message), self.game.state());
            }
            TransportEvent::Listening(address) => debug!(%address, "Listener ready"),
            TransportEvent::Connected { role, peer } => {
                info!(%role, %peer, "Peer connected");
                self.game.on_connected(role.mark());
            }
            TransportEvent::ConnectFailed(e) => {
                self.transport.stop();
                self.game.on_connect_failed(&e.reason());
            }
            TransportEvent::Received(message) => self.game.receive(message, &mut self.transport),
            TransportEvent::Disconnected(reason) => {
                self.transport.stop();
                self.game.disconnect(&reason);
            }
        }
        self.flush();
    }

    fn host(&mut self, bind: Option<IpAddr>) -> Result<(), MatchError> {
        self.game.begin_as_listener()?;
        let configured = bind.or(*self.transport.config().bind_address());
        let ip = match configured.map(Ok).unwrap_or_else(detect_local_ip) {
            Ok(ip) => ip,
            Err(e) => {
                warn!(error = %e, "No address to host on");
                self.game.on_connect_failed(&e.reason());
                return Ok(());
            }
        };
        let port = *self.transport.config().port();
        self.start_attempt(|transport| transport.listen(ip, port));
        Ok(())
    }

    fn join(&mut self, target: String) -> Result<(), MatchError> {
        self.game.begin_as_dialer(&target)?;
        let (host, port) = split_host_port(&target, *self.transport.config().port());
        self.start_attempt(|transport| transport.connect(&host, port));
        Ok(())
    }

    fn start_attempt(&mut self, start: impl FnOnce(&mut Transport) -> Option<AttemptId>) {
        match start(&mut self.transport) {
            Some(attempt) => debug!(attempt, "Connection attempt started"),
            None => warn!("A connection attempt is already in flight"),
        }
    }

    /// Hands queued match events to the presenter and drops the transport
    /// once the match no longer needs it.
    fn flush(&mut self) {
        for event in self.game.drain_events() {
            self.presenter.render(&event, self.game.state());
        }
        if self.game.state().mode() == Mode::Local && self.transport.is_running() {
            debug!("Match is local again, stopping transport");
            self.transport.stop();
        }
    }

    fn report(&mut self, error: &MatchError) {
        warn!(%error, "Command refused");
        self.presenter
            .render(&MatchEvent::Status(error.to_string()), self.game.state());
    }
}

/// Splits `host[:port]`, falling back to `default_port`.
fn split_host_port(target: &str, default_port: u16) -> (String, u16) {
    if let Ok(address) = target.parse::<SocketAddr>() {
        return (address.ip().to_string(), address.port());
    }
    match target.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (target.to_string(), default_port),
        },
        _ => (target.to_string(), default_port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tttlink_game::Mark;

    #[derive(Debug, Default)]
    struct Recorder {
        events: Vec<MatchEvent>,
    }

    impl Presenter for Recorder {
        fn render(&mut self, event: &MatchEvent, _state: &MatchState) {
            self.events.push(event.clone());
        }
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("10.0.0.7", 9999), ("10.0.0.7".to_string(), 9999));
        assert_eq!(split_host_port("10.0.0.7:4000", 9999), ("10.0.0.7".to_string(), 4000));
        assert_eq!(split_host_port("gamebox:4000", 9999), ("gamebox".to_string(), 4000));
        assert_eq!(split_host_port("gamebox", 9999), ("gamebox".to_string(), 9999));
        assert_eq!(split_host_port("::1", 9999), ("::1".to_string(), 9999));
        assert_eq!(split_host_port("[::1]:4000", 9999), ("::1".to_string(), 4000));
    }

    #[tokio::test]
    async fn test_local_play_without_network() {
        let mut session = Session::new(NetConfig::default(), Recorder::default());
        session
            .handle_command(Command::CellClicked { row: 0, col: 0 })
            .unwrap();
        session
            .handle_command(Command::CellClicked { row: 1, col: 1 })
            .unwrap();
        assert_eq!(session.state().board().move_count(), 2);
        assert_eq!(session.state().mark_to_move(), Mark::X);
        assert!(!session.transport().is_running());
        assert!(
            session
                .presenter()
                .events
                .contains(&MatchEvent::BoardChanged)
        );
    }

    #[tokio::test]
    async fn test_rematch_refused_in_local_mode() {
        let mut session = Session::new(NetConfig::default(), Recorder::default());
        assert!(matches!(
            session.handle_command(Command::RequestRematch),
            Err(MatchError::RematchUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_events_are_dropped() {
        let mut session = Session::new(NetConfig::default(), Recorder::default());
        session.handle_transport_event(LinkEvent {
            attempt: 42,
            event: TransportEvent::Connected {
                role: tttlink_game::Role::Listener,
                peer: "127.0.0.1:9999".parse().unwrap(),
            },
        });
        assert_eq!(session.state().mode(), Mode::Local);
        assert!(session.presenter().events.is_empty());
    }

    #[tokio::test]
    async fn test_new_local_game_stops_hosting() {
        let config = NetConfig::default().with_overrides(Some(0), None);
        let mut session = Session::new(config, Recorder::default());
        session
            .handle_command(Command::Host {
                bind: Some("127.0.0.1".parse().unwrap()),
            })
            .unwrap();
        assert_eq!(session.state().mode(), Mode::AwaitingPeer);
        assert!(session.transport().is_running());

        session.handle_command(Command::NewLocalGame).unwrap();
        assert_eq!(session.state().mode(), Mode::Local);
        assert!(!session.transport().is_running());
    }
}
