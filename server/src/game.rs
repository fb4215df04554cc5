//! Per-session game orchestration
//!
//! A session plays the configured levels in order. Each level is one round:
//! - a fresh [`Board`] built from the level, carrying the score forward
//! - one player task reading commands from the client
//! - one task per agent walking its script
//! - one notifier task pushing snapshots to the client
//!
//! All tasks of a round share a [`GameControl`]. The round ends when the
//! player task returns; the orchestrator then marks the round finished,
//! joins the remaining tasks and either loads the next level or ends the
//! session.

use crate::actor::Command;
use crate::board::{Board, MoveOutcome};
use crate::channel::{ChannelReader, ChannelWriter};
use crate::level::LevelSource;
use crate::notify::run_notifier;
use crate::session::{SessionTable, SessionTicket};
use crate::utils::lock;
use log::{debug, info, warn};
use shared::{CMD_IGNORED, OP_DISCONNECT, OP_PLAY};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;

/// How long a round that has ended still waits for the command byte of a
/// PLAY message whose opcode was already read.
const COMMAND_BYTE_TIMEOUT: Duration = Duration::from_millis(100);

/// Lifecycle of one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
    Running,
    Lost,
    LevelCleared,
}

impl RoundState {
    /// Numeric shutdown code: 0 running, 1 lost, 2 level cleared.
    pub fn code(self) -> i32 {
        match self {
            RoundState::Running => 0,
            RoundState::Lost => 1,
            RoundState::LevelCleared => 2,
        }
    }
}

/// Shutdown flag shared by every task of a round
///
/// Only the first transition away from `Running` sticks; later calls to
/// [`GameControl::finish`] are ignored.
#[derive(Debug)]
pub struct GameControl {
    state: Mutex<RoundState>,
    changed: Notify,
}

impl GameControl {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RoundState::Running),
            changed: Notify::new(),
        }
    }

    pub fn state(&self) -> RoundState {
        *lock(&self.state)
    }

    pub fn is_running(&self) -> bool {
        self.state() == RoundState::Running
    }

    /// Ends the round with `outcome`. Returns false if it had already ended.
    pub fn finish(&self, outcome: RoundState) -> bool {
        {
            let mut state = lock(&self.state);
            if *state != RoundState::Running || outcome == RoundState::Running {
                return false;
            }
            *state = outcome;
        }
        self.changed.notify_waiters();
        true
    }

    /// Resolves once the round has ended.
    pub async fn finished(&self) {
        loop {
            let notified = self.changed.notified();
            if !self.is_running() {
                return;
            }
            notified.await;
        }
    }

    /// Sleeps for `duration`, waking early if the round ends. Returns true
    /// when the round is still running afterwards.
    pub async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_running(),
            _ = self.finished() => false,
        }
    }
}

impl Default for GameControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Delay between two move attempts of an actor with the given period.
pub fn tick_interval(tempo_ms: u32, period: u32) -> Duration {
    let millis = u64::from(tempo_ms) * (1 + u64::from(period));
    Duration::from_millis(millis.max(1))
}

/// Why the player task returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerExit {
    ReachedPortal,
    Died,
    /// The client sent DISCONNECT.
    Disconnected,
    /// The inbound channel hit EOF or failed.
    ChannelClosed,
    /// The round was ended by another task.
    Shutdown,
}

/// What the orchestrator needs from one finished round.
struct RoundReport {
    state: RoundState,
    player_exit: Option<PlayerExit>,
    reader: Option<ChannelReader>,
    writer: Option<ChannelWriter>,
    writer_healthy: bool,
}

/// Shared handles every session task needs.
#[derive(Clone)]
pub struct SessionContext {
    pub sessions: Arc<RwLock<SessionTable>>,
    pub levels: Arc<dyn LevelSource>,
    pub input_poll_timeout: Duration,
}

/// Drives one admitted session through its levels, then frees its slot.
pub async fn run_session(
    context: SessionContext,
    ticket: SessionTicket,
    client_id: i32,
    reader: ChannelReader,
    writer: ChannelWriter,
) {
    let mut channels = Some((reader, writer));
    let mut score = 0;
    let mut played = 0;

    for name in context.levels.level_names() {
        let level = match context.levels.load(&name) {
            Ok(level) => level,
            Err(e) => {
                warn!("Client {}: skipping level {}: {}", client_id, name, e);
                continue;
            }
        };
        let Some((reader, writer)) = channels.take() else {
            break;
        };

        info!(
            "Client {} loaded level {} ({}x{}, tempo {} ms, {} agents)",
            client_id,
            level.name,
            level.width,
            level.height,
            level.tempo,
            level.agents.len()
        );
        let board = Arc::new(Board::from_level(&level, score));
        let report = play_round(&context, ticket, Arc::clone(&board), reader, writer).await;
        played += 1;

        if let Some(player) = board.player(0) {
            score = player.score;
        }
        context.sessions.write().await.update_score(&ticket, score);
        info!(
            "Client {} finished level {}: {:?} (score {})",
            client_id, level.name, report.state, score
        );

        let channels_open = report.writer_healthy
            && !matches!(
                report.player_exit,
                None | Some(PlayerExit::Disconnected) | Some(PlayerExit::ChannelClosed)
            );
        if report.state != RoundState::LevelCleared || !channels_open {
            break;
        }
        if let (Some(reader), Some(writer)) = (report.reader, report.writer) {
            channels = Some((reader, writer));
        }
    }

    context.sessions.write().await.release(&ticket);
    drop(channels);
    info!(
        "Client {} session ended after {} level(s) with score {}",
        client_id, played, score
    );
}

async fn play_round(
    context: &SessionContext,
    ticket: SessionTicket,
    board: Arc<Board>,
    reader: ChannelReader,
    writer: ChannelWriter,
) -> RoundReport {
    let control = Arc::new(GameControl::new());

    let notifier = tokio::spawn(run_notifier(
        Arc::clone(&board),
        Arc::clone(&control),
        Arc::clone(&context.sessions),
        ticket,
        writer,
    ));
    let agents: Vec<JoinHandle<()>> = (0..board.agent_count())
        .map(|index| tokio::spawn(run_agent(Arc::clone(&board), Arc::clone(&control), index)))
        .collect();
    let player = tokio::spawn(run_player(
        Arc::clone(&board),
        Arc::clone(&control),
        reader,
        context.input_poll_timeout,
    ));

    let (reader, player_exit) = match player.await {
        Ok((reader, exit)) => (Some(reader), Some(exit)),
        Err(e) => {
            warn!("Player task failed: {}", e);
            (None, None)
        }
    };
    control.finish(RoundState::Lost);

    let (writer, writer_healthy) = match notifier.await {
        Ok((writer, healthy)) => (Some(writer), healthy),
        Err(e) => {
            warn!("Notifier task failed: {}", e);
            (None, false)
        }
    };
    for agent in agents {
        if let Err(e) = agent.await {
            warn!("Agent task failed: {}", e);
        }
    }

    RoundReport {
        state: control.state(),
        player_exit,
        reader,
        writer,
        writer_healthy,
    }
}

/// Reads commands from the client and applies them to the player.
///
/// Hands the reader back so the next level can keep using it.
pub async fn run_player(
    board: Arc<Board>,
    control: Arc<GameControl>,
    mut reader: ChannelReader,
    poll_timeout: Duration,
) -> (ChannelReader, PlayerExit) {
    let period = board.player(0).map_or(0, |player| player.cooldown.period());
    let tick = tick_interval(board.tempo(), period);

    let exit = loop {
        if !control.is_running() {
            break PlayerExit::Shutdown;
        }
        if !board.player(0).is_some_and(|player| player.alive) {
            break PlayerExit::Died;
        }
        if !control.pause(tick).await {
            break PlayerExit::Shutdown;
        }

        let opcode = match tokio::time::timeout(poll_timeout, reader.read_u8()).await {
            Err(_) => continue,
            Ok(Ok(opcode)) => opcode,
            Ok(Err(e)) => break closed_exit(e),
        };

        match opcode {
            OP_DISCONNECT => break PlayerExit::Disconnected,
            OP_PLAY => {
                let command = tokio::select! {
                    byte = reader.read_u8() => byte,
                    _ = control.finished() => {
                        // Consume the command byte so the next round starts
                        // on an opcode
                        let rest =
                            tokio::time::timeout(COMMAND_BYTE_TIMEOUT, reader.read_u8()).await;
                        break match rest {
                            Ok(Err(e)) => closed_exit(e),
                            Ok(Ok(_)) | Err(_) => PlayerExit::Shutdown,
                        };
                    }
                };
                let byte = match command {
                    Ok(byte) => byte,
                    Err(e) => break closed_exit(e),
                };
                if byte == CMD_IGNORED {
                    continue;
                }
                let Some(mut command) = Command::from_byte(byte) else {
                    debug!("Ignoring unknown command byte {:#04x}", byte);
                    continue;
                };

                let outcome = {
                    let _guard = board.state_lock().read().await;
                    board.move_player(0, &mut command)
                };
                match outcome {
                    MoveOutcome::ReachedPortal => {
                        control.finish(RoundState::LevelCleared);
                        break PlayerExit::ReachedPortal;
                    }
                    MoveOutcome::ActorDied => break PlayerExit::Died,
                    MoveOutcome::Valid | MoveOutcome::Invalid => {}
                }
            }
            other => debug!("Ignoring opcode {} on command channel", other),
        }
    };

    debug!("Player task exiting: {:?}", exit);
    (reader, exit)
}

fn closed_exit(error: io::Error) -> PlayerExit {
    if error.kind() != io::ErrorKind::UnexpectedEof {
        warn!("Command channel failed: {}", error);
    }
    PlayerExit::ChannelClosed
}

/// Steps one agent through its script until the round ends.
pub async fn run_agent(board: Arc<Board>, control: Arc<GameControl>, index: usize) {
    let Some(agent) = board.agent(index) else {
        warn!("No agent {} on this board", index);
        return;
    };
    let tick = tick_interval(board.tempo(), agent.cooldown.period());

    while control.pause(tick).await {
        let _guard = board.state_lock().read().await;
        if board.step_agent(index) == MoveOutcome::ActorDied {
            debug!("Agent {} caught the player", index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::Level;
    use tokio::time::timeout;

    fn board(source: &str) -> Arc<Board> {
        Arc::new(Board::from_level(&Level::parse("test", source).unwrap(), 0))
    }

    #[test]
    fn test_first_outcome_wins() {
        let control = GameControl::new();
        assert!(control.is_running());
        assert_eq!(control.state().code(), 0);

        assert!(control.finish(RoundState::LevelCleared));
        assert!(!control.finish(RoundState::Lost));
        assert_eq!(control.state(), RoundState::LevelCleared);
        assert_eq!(control.state().code(), 2);
    }

    #[test]
    fn test_finish_running_is_ignored() {
        let control = GameControl::new();
        assert!(!control.finish(RoundState::Running));
        assert!(control.is_running());
    }

    #[tokio::test]
    async fn test_pause_wakes_on_finish() {
        let control = Arc::new(GameControl::new());
        let sleeper = {
            let control = Arc::clone(&control);
            tokio::spawn(async move { control.pause(Duration::from_secs(30)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        control.finish(RoundState::Lost);

        let still_running = timeout(Duration::from_secs(1), sleeper)
            .await
            .unwrap()
            .unwrap();
        assert!(!still_running);
    }

    #[test]
    fn test_tick_interval() {
        assert_eq!(tick_interval(100, 0), Duration::from_millis(100));
        assert_eq!(tick_interval(100, 2), Duration::from_millis(300));
        assert_eq!(tick_interval(0, 0), Duration::from_millis(1));
    }

    #[tokio::test]
    async fn test_player_reaches_portal() {
        let board = board("tempo 1\ngrid\nP.@\n");
        let control = Arc::new(GameControl::new());
        let reader = tokio_test::io::Builder::new()
            .read(&[OP_PLAY, b'D'])
            .read(&[OP_PLAY, b'G'])
            .read(&[OP_PLAY, b'd'])
            .build();

        let (_, exit) = run_player(
            Arc::clone(&board),
            Arc::clone(&control),
            Box::new(reader),
            Duration::from_millis(50),
        )
        .await;

        assert_eq!(exit, PlayerExit::ReachedPortal);
        assert_eq!(control.state(), RoundState::LevelCleared);
        assert_eq!(board.player(0).unwrap().score, 1);
    }

    #[tokio::test]
    async fn test_player_disconnects() {
        let board = board("tempo 1\ngrid\nP.\n");
        let control = Arc::new(GameControl::new());
        let reader = tokio_test::io::Builder::new()
            .read(&[OP_PLAY, b'?'])
            .read(&[7])
            .read(&[OP_DISCONNECT])
            .build();

        let (_, exit) =
            run_player(board, control, Box::new(reader), Duration::from_millis(50)).await;
        assert_eq!(exit, PlayerExit::Disconnected);
    }

    #[tokio::test]
    async fn test_player_dies_on_agent() {
        let board = board("tempo 1\ngrid\nPM\n");
        let control = Arc::new(GameControl::new());
        let reader = tokio_test::io::Builder::new().read(&[OP_PLAY, b'D']).build();

        let (_, exit) = run_player(
            Arc::clone(&board),
            control,
            Box::new(reader),
            Duration::from_millis(50),
        )
        .await;
        assert_eq!(exit, PlayerExit::Died);
        assert!(!board.player(0).unwrap().alive);
    }

    #[tokio::test]
    async fn test_player_eof_closes_channel() {
        let board = board("tempo 1\ngrid\nP\n");
        let control = Arc::new(GameControl::new());
        let reader = tokio_test::io::Builder::new().build();

        let (_, exit) =
            run_player(board, control, Box::new(reader), Duration::from_millis(50)).await;
        assert_eq!(exit, PlayerExit::ChannelClosed);
    }

    #[tokio::test]
    async fn test_player_observes_shutdown() {
        let board = board("tempo 1\ngrid\nP\n");
        let control = Arc::new(GameControl::new());
        let (client, server) = tokio::io::duplex(64);

        let player = tokio::spawn(run_player(
            board,
            Arc::clone(&control),
            Box::new(server),
            Duration::from_millis(5),
        ));
        tokio::time::sleep(Duration::from_millis(30)).await;
        control.finish(RoundState::Lost);

        let (_, exit) = timeout(Duration::from_secs(1), player)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, PlayerExit::Shutdown);
        drop(client);
    }

    #[tokio::test]
    async fn test_shutdown_completes_pending_play() {
        let board = board("tempo 1\ngrid\nP.\n");
        let control = Arc::new(GameControl::new());
        let reader = tokio_test::io::Builder::new()
            .read(&[OP_PLAY])
            .wait(Duration::from_millis(60))
            .read(&[b'D'])
            .build();

        let player = tokio::spawn(run_player(
            Arc::clone(&board),
            Arc::clone(&control),
            Box::new(reader),
            Duration::from_millis(50),
        ));
        tokio::time::sleep(Duration::from_millis(20)).await;
        control.finish(RoundState::Lost);

        let (mut reader, exit) = timeout(Duration::from_secs(1), player)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, PlayerExit::Shutdown);
        // The command byte was consumed but not applied
        assert_eq!(board.player(0).unwrap().score, 0);
        let next = reader.read_u8().await.unwrap_err();
        assert_eq!(next.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_agent_follows_script_until_shutdown() {
        let board = board("tempo 1\nagent 0 D\ngrid\nP\nM   \n");
        let control = Arc::new(GameControl::new());

        let agent = tokio::spawn(run_agent(Arc::clone(&board), Arc::clone(&control), 0));
        tokio::time::sleep(Duration::from_millis(100)).await;
        control.finish(RoundState::Lost);
        timeout(Duration::from_secs(1), agent).await.unwrap().unwrap();

        let agent = board.agent(0).unwrap();
        assert_eq!(agent.position, crate::actor::Position::new(3, 1));
        assert!(agent.moves >= 3);
    }

    #[tokio::test]
    async fn test_unknown_agent_task_exits() {
        let board = board("tempo 1\nagent 0 D\ngrid\nP\nM   \n");
        let control = Arc::new(GameControl::new());

        let agent = tokio::spawn(run_agent(board, Arc::clone(&control), 3));
        timeout(Duration::from_secs(1), agent).await.unwrap().unwrap();
        assert!(control.is_running());
    }
}
