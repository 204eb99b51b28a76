//! Lobby client core
//!
//! [`LobbyClient`] owns the mirror, the session identity and the viewer. It
//! consumes validated inbound messages and answers with [`Effect`]s; it
//! never performs I/O itself. [`ClientRuntime`] pairs it with a
//! [`Frontend`] and the outbound channel and is the state the inbound
//! dispatcher runs handlers against.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::lobby::game::{Game, GameId, RoomKind};
use crate::lobby::mirror::{ApplyOutcome, Mirror};
use crate::lobby::notification::{self, AlertSource, Notification};
use crate::lobby::projection::{self, Projection, RoomCount};
use crate::lobby::session::{Session, TIMEOUT_BANNER};
use crate::lobby::viewer::Viewer;
use crate::metrics::Metrics;
use crate::net::dispatch::{DispatchError, Dispatcher};
use crate::net::protocol::{ClientMessage, CreateGame, InboundMessage, MessageType, MirrorUpdate};
use crate::net::transport::OutboundSender;

/// Envelope type for commands issued locally (not by the server)
pub const LOCAL_COMMAND: &str = "local/command";

/// Something the outside world should do in response to a message
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    PlayAlert(Notification),
    /// Hand the initial state of a started game to the session launcher
    LaunchSession { gameid: GameId, state: Option<Value> },
    ShowBanner(String),
    Send(ClientMessage),
    /// The derived game view must be redrawn
    GamesChanged,
}

/// Lobby state owner
#[derive(Debug)]
pub struct LobbyClient {
    mirror: Mirror,
    session: Session,
    viewer: Viewer,
    lobby_sounds: bool,
    metrics: Arc<Metrics>,
}

impl LobbyClient {
    pub fn new(viewer: Viewer, metrics: Arc<Metrics>) -> Self {
        Self {
            mirror: Mirror::new(),
            session: Session::new(),
            viewer,
            lobby_sounds: true,
            metrics,
        }
    }

    /// Disable or enable alert playback entirely
    pub fn with_lobby_sounds(mut self, enabled: bool) -> Self {
        self.lobby_sounds = enabled;
        self
    }

    /// Validate and handle one inbound payload
    pub fn handle_raw(&mut self, kind: MessageType, data: Value) -> Result<Vec<Effect>, DispatchError> {
        let message = InboundMessage::decode(kind, data).map_err(|e| {
            self.metrics.messages_rejected.fetch_add(1, Ordering::Relaxed);
            e
        })?;
        Ok(self.handle(message))
    }

    /// Handle one validated inbound message
    pub fn handle(&mut self, message: InboundMessage) -> Vec<Effect> {
        match message {
            InboundMessage::GamesList(games) => {
                self.metrics.snapshots_applied.fetch_add(1, Ordering::Relaxed);
                self.apply_update(MirrorUpdate::Snapshot(games), None)
            }
            InboundMessage::GamesDiff(payload) => {
                self.metrics.diffs_applied.fetch_add(1, Ordering::Relaxed);
                self.apply_update(MirrorUpdate::Diff(payload.diff), payload.notification)
            }
            InboundMessage::GamesDiffer(payload) => {
                self.metrics.patch_streams_applied.fetch_add(1, Ordering::Relaxed);
                self.apply_update(MirrorUpdate::PatchStream(payload.diff), payload.notification)
            }
            InboundMessage::LobbySelect(select) => {
                info!(gameid = %select.gameid, started = select.started, "Entered game");
                self.session.select(select.gameid.clone());

                let mut effects = vec![Effect::GamesChanged];
                if select.started {
                    self.metrics.sessions_launched.fetch_add(1, Ordering::Relaxed);
                    effects.push(Effect::LaunchSession {
                        gameid: select.gameid,
                        state: select.state,
                    });
                }
                effects
            }
            InboundMessage::LobbyNotification(alert) => self
                .alert(Some(alert), AlertSource::Lobby)
                .into_iter()
                .collect(),
            InboundMessage::LobbyTimeout(timeout) => {
                if self.session.timeout(&timeout.gameid) {
                    info!(gameid = %timeout.gameid, "Game timed out");
                    self.metrics.session_timeouts.fetch_add(1, Ordering::Relaxed);
                    vec![Effect::ShowBanner(TIMEOUT_BANNER.to_string()), Effect::GamesChanged]
                } else {
                    debug!(gameid = %timeout.gameid, "Ignoring timeout for another game");
                    Vec::new()
                }
            }
        }
    }

    fn apply_update(&mut self, update: MirrorUpdate, alert: Option<Notification>) -> Vec<Effect> {
        let started = Instant::now();
        let outcome = self.mirror.apply(update);
        self.metrics.record_apply_time(started.elapsed());
        self.metrics.record_outcome(&outcome);

        let mut effects = self.outcome_effects(&outcome);
        effects.extend(self.alert(alert, AlertSource::ListDiff));
        effects
    }

    fn outcome_effects(&self, outcome: &ApplyOutcome) -> Vec<Effect> {
        debug!(
            updated = outcome.updated,
            deleted = outcome.deleted,
            dropped = outcome.dropped.len(),
            games = self.mirror.len(),
            "Applied mirror update"
        );

        let mut effects = Vec::new();
        if outcome.resync_needed {
            warn!("Mirror out of sync, requesting full game list");
            effects.push(Effect::Send(ClientMessage::ListGames));
        }
        if outcome.changed() {
            self.metrics
                .set_mirror_size(self.mirror.len(), self.mirror.view(&self.viewer).len());
            effects.push(Effect::GamesChanged);
        }
        effects
    }

    fn alert(&self, alert: Option<Notification>, source: AlertSource) -> Option<Effect> {
        if !self.lobby_sounds {
            return None;
        }
        let sound = notification::trigger(alert.as_ref(), source, &self.session)?;
        self.metrics.alerts_played.fetch_add(1, Ordering::Relaxed);
        Some(Effect::PlayAlert(sound))
    }

    /// Leave the current game: session cleared now, departure notice sent
    /// best-effort
    pub fn leave_game(&mut self) -> Vec<Effect> {
        match self.session.leave() {
            Some(gameid) => {
                info!(gameid = %gameid, "Left game");
                vec![Effect::Send(ClientMessage::Leave { gameid }), Effect::GamesChanged]
            }
            None => Vec::new(),
        }
    }

    /// Replace the viewer's block-list; the view is recomputed
    pub fn set_blocked_users<I, S>(&mut self, users: I) -> Vec<Effect>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.viewer.set_blocked_users(users);
        self.metrics
            .set_mirror_size(self.mirror.len(), self.mirror.view(&self.viewer).len());
        vec![Effect::GamesChanged]
    }

    pub fn dismiss_banner(&mut self) {
        self.session.dismiss_banner();
    }

    /// Visible games in display order
    pub fn view(&self) -> Vec<&Game> {
        self.mirror.view(&self.viewer)
    }

    /// Open/started counts per room over the visible games
    pub fn room_counts(&self) -> BTreeMap<RoomKind, RoomCount> {
        projection::room_counts(self.view())
    }

    pub fn projection(&self) -> Projection<'_> {
        Projection::new(&self.viewer, &self.session)
    }

    /// The game the viewer is in, if it is mirrored
    pub fn current_game(&self) -> Option<&Game> {
        self.session.gameid().and_then(|id| self.mirror.get(id))
    }

    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    /// Run a locally issued command through the action gates
    pub fn execute(&mut self, command: Command) -> Result<Vec<Effect>, CommandError> {
        let send = |message: ClientMessage| -> Result<Vec<Effect>, CommandError> {
            Ok(vec![Effect::Send(message)])
        };

        match command {
            Command::List => send(ClientMessage::ListGames),
            Command::Create { room, title } => {
                if !self.projection().can_create() {
                    return Err(CommandError::NotAllowed("already in a game"));
                }
                send(ClientMessage::Create(CreateGame {
                    title,
                    room,
                    allow_spectator: true,
                    ..Default::default()
                }))
            }
            Command::Join { gameid, password } => {
                let game = self.lookup(&gameid)?;
                if !self.projection().can_join(game) {
                    return Err(CommandError::NotAllowed("cannot join this game"));
                }
                if self.projection().needs_password(game) && password.is_none() {
                    return Err(CommandError::NotAllowed("password required"));
                }
                send(ClientMessage::Join { gameid, password })
            }
            Command::Watch { gameid, password } => {
                let game = self.lookup(&gameid)?;
                if !self.projection().can_watch(game) {
                    return Err(CommandError::NotAllowed("spectators not allowed"));
                }
                send(ClientMessage::Watch { gameid, password })
            }
            Command::Leave => {
                if !self.session.is_active() {
                    return Err(CommandError::NoSession);
                }
                Ok(self.leave_game())
            }
            Command::Start => {
                let game = self.current_game().ok_or(CommandError::NoSession)?;
                if !self.projection().can_start(game) {
                    return Err(CommandError::NotAllowed("only the host can start once both decks are set"));
                }
                send(ClientMessage::Start {
                    gameid: game.gameid.clone(),
                })
            }
            Command::Say { msg } => {
                let gameid = self.session.gameid().ok_or(CommandError::NoSession)?;
                send(ClientMessage::Say {
                    gameid: gameid.to_string(),
                    msg,
                })
            }
            Command::Swap => {
                let game = self.current_game().ok_or(CommandError::NoSession)?;
                if !self.projection().is_host(game) {
                    return Err(CommandError::NotAllowed("only the host can swap sides"));
                }
                send(ClientMessage::SwapSides {
                    gameid: game.gameid.clone(),
                })
            }
            Command::Block { users } => Ok(self.set_blocked_users(users)),
            Command::Dismiss => {
                self.dismiss_banner();
                Ok(Vec::new())
            }
        }
    }

    fn lookup(&self, gameid: &str) -> Result<&Game, CommandError> {
        self.mirror
            .get(gameid)
            .ok_or_else(|| CommandError::UnknownGame(gameid.to_string()))
    }
}

/// Command issued by the local user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum Command {
    List,
    Create { room: RoomKind, title: String },
    Join { gameid: GameId, password: Option<String> },
    Watch { gameid: GameId, password: Option<String> },
    Leave,
    Start,
    Say { msg: String },
    Swap,
    Block { users: Vec<String> },
    Dismiss,
}

impl Command {
    /// Parse a command line such as `join g1 secret` or `say hello there`
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim();
        let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        let mut args = rest.split_whitespace();
        let required = |arg: Option<&str>, what: &str| {
            arg.map(str::to_string)
                .ok_or_else(|| CommandError::Parse(format!("{} expects {}", verb, what)))
        };

        let command = match verb {
            "list" => Command::List,
            "create" => {
                let room = required(args.next(), "a room")?;
                let title = rest[room.len()..].trim();
                if title.is_empty() {
                    return Err(CommandError::Parse("create expects a title".to_string()));
                }
                Command::Create {
                    room: RoomKind::from(room),
                    title: title.to_string(),
                }
            }
            "join" => Command::Join {
                gameid: required(args.next(), "a game id")?,
                password: args.next().map(str::to_string),
            },
            "watch" => Command::Watch {
                gameid: required(args.next(), "a game id")?,
                password: args.next().map(str::to_string),
            },
            "leave" => Command::Leave,
            "start" => Command::Start,
            "say" if !rest.is_empty() => Command::Say {
                msg: rest.to_string(),
            },
            "say" => return Err(CommandError::Parse("say expects a message".to_string())),
            "swap" => Command::Swap,
            "block" => Command::Block {
                users: rest
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            },
            "dismiss" => Command::Dismiss,
            other => return Err(CommandError::Parse(format!("unknown command '{}'", other))),
        };
        Ok(command)
    }
}

/// Local command rejected before reaching the server
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    #[error("Invalid command: {0}")]
    Parse(String),
    #[error("Not allowed: {0}")]
    NotAllowed(&'static str),
    #[error("Not in a game")]
    NoSession,
    #[error("Unknown game {0}")]
    UnknownGame(String),
}

/// Receiver of client effects. Every method defaults to a no-op.
pub trait Frontend {
    fn play_alert(&mut self, _alert: &Notification) {}
    fn launch_session(&mut self, _gameid: &str, _state: Option<&Value>) {}
    fn show_banner(&mut self, _text: &str) {}
    /// Called with the visible games in display order
    fn games_changed(&mut self, _games: &[&Game]) {}
}

/// Frontend that reports effects through `tracing`
#[derive(Debug, Default)]
pub struct LogFrontend;

impl Frontend for LogFrontend {
    fn play_alert(&mut self, alert: &Notification) {
        info!(sound = alert.sound(), "Alert");
    }

    fn launch_session(&mut self, gameid: &str, state: Option<&Value>) {
        info!(gameid = %gameid, has_state = state.is_some(), "Launching game session");
    }

    fn show_banner(&mut self, text: &str) {
        warn!("{}", text);
    }

    fn games_changed(&mut self, games: &[&Game]) {
        info!(visible = games.len(), "Lobby updated");
        for game in games {
            debug!(
                gameid = %game.gameid,
                room = %game.room,
                started = game.started,
                players = game.players.len(),
                "{}",
                game.title
            );
        }
    }
}

/// Client plus the collaborators its effects go to
pub struct ClientRuntime<F> {
    client: LobbyClient,
    frontend: F,
    outbound: OutboundSender,
}

impl<F: Frontend> ClientRuntime<F> {
    pub fn new(client: LobbyClient, frontend: F, outbound: OutboundSender) -> Self {
        Self {
            client,
            frontend,
            outbound,
        }
    }

    pub fn client(&self) -> &LobbyClient {
        &self.client
    }

    pub fn frontend(&self) -> &F {
        &self.frontend
    }

    /// Validate, handle and carry out one inbound payload
    pub fn handle_envelope(&mut self, kind: MessageType, data: Value) -> Result<(), DispatchError> {
        let effects = self.client.handle_raw(kind, data)?;
        self.apply_effects(effects);
        Ok(())
    }

    /// Handle a `local/command` payload
    pub fn handle_command(&mut self, data: Value) -> Result<(), DispatchError> {
        let command: Command = serde_json::from_value(data).map_err(|e| DispatchError::Handler {
            kind: LOCAL_COMMAND.to_string(),
            reason: e.to_string(),
        })?;
        match self.client.execute(command) {
            Ok(effects) => self.apply_effects(effects),
            Err(e) => self.frontend.show_banner(&e.to_string()),
        }
        Ok(())
    }

    pub fn leave_game(&mut self) {
        let effects = self.client.leave_game();
        self.apply_effects(effects);
    }

    pub fn apply_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::PlayAlert(alert) => self.frontend.play_alert(&alert),
                Effect::LaunchSession { gameid, state } => {
                    self.frontend.launch_session(&gameid, state.as_ref())
                }
                Effect::ShowBanner(text) => self.frontend.show_banner(&text),
                Effect::Send(message) => self.outbound.send(message),
                Effect::GamesChanged => {
                    let view = self.client.view();
                    self.frontend.games_changed(&view);
                }
            }
        }
    }
}

/// Route every inbound message type plus local commands to `runtime`
pub fn register_handlers<F>(dispatcher: &mut Dispatcher<ClientRuntime<F>>) -> Result<(), DispatchError>
where
    F: Frontend + 'static,
{
    for kind in MessageType::ALL {
        dispatcher.register(kind.as_str(), move |runtime: &mut ClientRuntime<F>, data| {
            runtime.handle_envelope(kind, data)
        })?;
    }
    dispatcher.register(LOCAL_COMMAND, |runtime: &mut ClientRuntime<F>, data| {
        runtime.handle_command(data)
    })
}
