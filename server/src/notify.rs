//! Snapshot pushing and victory/loss detection for a running round.

use crate::board::Board;
use crate::channel::ChannelWriter;
use crate::game::{GameControl, RoundState};
use crate::session::{SessionTable, SessionTicket};
use log::{debug, warn};
use shared::{BoardSnapshot, ProtocolError};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

/// Round verdict derived from one look at the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub points: u32,
    pub victory: bool,
    pub game_over: bool,
}

impl Verdict {
    /// The outcome this verdict ends the round with, if any. Victory wins
    /// over a simultaneous death.
    pub fn outcome(&self) -> Option<RoundState> {
        if self.victory {
            Some(RoundState::LevelCleared)
        } else if self.game_over {
            Some(RoundState::Lost)
        } else {
            None
        }
    }
}

/// Judges the board. The caller holds the board's state lock.
///
/// A level is won when the player stands on a portal, or when it started with
/// collectibles and none are left.
pub fn judge(board: &Board) -> Verdict {
    let (points, alive) = board
        .player(0)
        .map_or((0, false), |player| (player.score, player.alive));
    let cleared = board.initial_collectibles() > 0 && board.collectibles_remaining() == 0;
    Verdict {
        points,
        victory: board.player_on_portal() || cleared,
        game_over: !alive,
    }
}

async fn send(writer: &mut ChannelWriter, snapshot: &BoardSnapshot) -> io::Result<()> {
    let frame = snapshot
        .encode()
        .map_err(|e: ProtocolError| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&frame).await?;
    writer.flush().await
}

/// Pushes snapshots on every tempo tick until the round ends.
///
/// The first snapshot goes out immediately with both flags clear. When the
/// round ends, one more snapshot carries the outcome unless the last one
/// already did. Returns the writer and whether it is still usable.
pub async fn run_notifier(
    board: Arc<Board>,
    control: Arc<GameControl>,
    sessions: Arc<RwLock<SessionTable>>,
    ticket: SessionTicket,
    mut writer: ChannelWriter,
) -> (ChannelWriter, bool) {
    let tempo = Duration::from_millis(u64::from(board.tempo()).max(1));

    let initial = {
        let _guard = board.state_lock().read().await;
        let points = board.player(0).map_or(0, |player| player.score);
        board.snapshot(false, false, points)
    };
    if let Err(e) = send(&mut writer, &initial).await {
        warn!("Failed to send initial snapshot: {}", e);
        control.finish(RoundState::Lost);
        return (writer, false);
    }

    let mut outcome_reported = false;
    while control.pause(tempo).await {
        let (snapshot, verdict) = {
            let _guard = board.state_lock().read().await;
            let verdict = judge(&board);
            let snapshot = board.snapshot(verdict.victory, verdict.game_over, verdict.points);
            (snapshot, verdict)
        };
        sessions.write().await.update_score(&ticket, verdict.points);

        if let Err(e) = send(&mut writer, &snapshot).await {
            warn!("Failed to send snapshot: {}", e);
            control.finish(RoundState::Lost);
            return (writer, false);
        }

        if let Some(outcome) = verdict.outcome() {
            if control.finish(outcome) {
                debug!("Round ended by notifier: {:?}", outcome);
            }
            outcome_reported = control.state() == outcome;
        }
    }

    if !outcome_reported {
        let state = control.state();
        let snapshot = {
            let _guard = board.state_lock().read().await;
            let points = board.player(0).map_or(0, |player| player.score);
            board.snapshot(
                state == RoundState::LevelCleared,
                state == RoundState::Lost,
                points,
            )
        };
        sessions.write().await.update_score(&ticket, snapshot.header.points as u32);
        if let Err(e) = send(&mut writer, &snapshot).await {
            debug!("Failed to send final snapshot: {}", e);
            return (writer, false);
        }
    }

    (writer, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{Action, Command, Direction};
    use crate::level::Level;
    use shared::{BOARD_HEADER_LEN, OP_BOARD};
    use tokio::io::AsyncReadExt;
    use tokio::time::timeout;

    fn board(source: &str) -> Arc<Board> {
        Arc::new(Board::from_level(&Level::parse("test", source).unwrap(), 0))
    }

    fn table() -> (Arc<RwLock<SessionTable>>, SessionTicket) {
        let mut table = SessionTable::new(1);
        let ticket = table.try_reserve(1, "in", "out").unwrap();
        (Arc::new(RwLock::new(table)), ticket)
    }

    async fn read_snapshot(stream: &mut tokio::io::DuplexStream, cells: usize) -> BoardSnapshot {
        let mut frame = vec![0u8; 1 + BOARD_HEADER_LEN + cells];
        stream.read_exact(&mut frame).await.unwrap();
        assert_eq!(frame[0], OP_BOARD);
        BoardSnapshot::decode(&frame).unwrap()
    }

    async fn read_until(
        stream: &mut tokio::io::DuplexStream,
        cells: usize,
        done: impl Fn(&BoardSnapshot) -> bool,
    ) -> BoardSnapshot {
        timeout(Duration::from_secs(2), async {
            loop {
                let snapshot = read_snapshot(stream, cells).await;
                if done(&snapshot) {
                    return snapshot;
                }
            }
        })
        .await
        .unwrap()
    }

    #[test]
    fn test_judge() {
        let board = board("grid\nP.@\n");
        let verdict = judge(&board);
        assert_eq!(verdict.points, 0);
        assert!(!verdict.victory);
        assert!(!verdict.game_over);
        assert_eq!(verdict.outcome(), None);

        board.move_player(0, &mut Command::new(Action::Step(Direction::Right)));
        let verdict = judge(&board);
        assert_eq!(verdict.points, 1);
        // No collectibles left on a level that had one
        assert!(verdict.victory);
        assert_eq!(verdict.outcome(), Some(RoundState::LevelCleared));
    }

    #[test]
    fn test_judge_without_collectibles() {
        let board = board("grid\nPM\n");
        assert!(!judge(&board).victory);

        board.move_player(0, &mut Command::new(Action::Step(Direction::Right)));
        let verdict = judge(&board);
        assert!(verdict.game_over);
        assert!(!verdict.victory);
        assert_eq!(verdict.outcome(), Some(RoundState::Lost));
    }

    #[tokio::test]
    async fn test_initial_snapshot_is_immediate() {
        let board = board("tempo 10000\ngrid\nP.\n");
        let control = Arc::new(GameControl::new());
        let (sessions, ticket) = table();
        let (mut client, server) = tokio::io::duplex(1024);

        let notifier = tokio::spawn(run_notifier(
            board,
            Arc::clone(&control),
            sessions,
            ticket,
            Box::new(server),
        ));

        let first = timeout(Duration::from_millis(500), read_snapshot(&mut client, 2))
            .await
            .unwrap();
        assert_eq!(first.header.game_over, 0);
        assert_eq!(first.header.victory, 0);
        assert_eq!(first.cells, b"P.".to_vec());

        control.finish(RoundState::Lost);
        let last = read_snapshot(&mut client, 2).await;
        assert_eq!(last.header.game_over, 1);

        let (_, healthy) = notifier.await.unwrap();
        assert!(healthy);
    }

    #[tokio::test]
    async fn test_notifier_detects_death() {
        let board = board("tempo 5\ngrid\nPM\n");
        let control = Arc::new(GameControl::new());
        let (sessions, ticket) = table();
        let (mut client, server) = tokio::io::duplex(4096);

        let notifier = tokio::spawn(run_notifier(
            Arc::clone(&board),
            Arc::clone(&control),
            sessions,
            ticket,
            Box::new(server),
        ));
        read_snapshot(&mut client, 2).await;

        board.move_player(0, &mut Command::new(Action::Step(Direction::Right)));
        let snapshot = read_until(&mut client, 2, |s| s.header.game_over == 1).await;
        assert_eq!(snapshot.cells, b" M".to_vec());

        timeout(Duration::from_secs(1), notifier).await.unwrap().unwrap();
        assert_eq!(control.state(), RoundState::Lost);
    }

    #[tokio::test]
    async fn test_outcome_sent_once_when_player_ends_round() {
        let board = board("tempo 5\ngrid\nP@\n");
        let control = Arc::new(GameControl::new());
        let (sessions, ticket) = table();
        let (mut client, server) = tokio::io::duplex(4096);

        let notifier = tokio::spawn(run_notifier(
            Arc::clone(&board),
            Arc::clone(&control),
            sessions,
            ticket,
            Box::new(server),
        ));
        read_snapshot(&mut client, 2).await;

        // What the player task does on reaching the portal
        board.move_player(0, &mut Command::new(Action::Step(Direction::Right)));
        control.finish(RoundState::LevelCleared);

        let (writer, healthy) = timeout(Duration::from_secs(1), notifier)
            .await
            .unwrap()
            .unwrap();
        assert!(healthy);
        drop(writer);

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        let frame_len = 1 + BOARD_HEADER_LEN + 2;
        assert_eq!(rest.len() % frame_len, 0);
        let frames: Vec<BoardSnapshot> = rest
            .chunks(frame_len)
            .map(|frame| BoardSnapshot::decode(frame).unwrap())
            .collect();
        let victories = frames.iter().filter(|s| s.header.victory == 1).count();
        assert_eq!(victories, 1);
        assert_eq!(frames.last().unwrap().header.victory, 1);
    }

    #[tokio::test]
    async fn test_notifier_updates_session_score() {
        let board = board("tempo 5\ngrid\nP..\n");
        let control = Arc::new(GameControl::new());
        let (sessions, ticket) = table();
        let (mut client, server) = tokio::io::duplex(4096);

        let notifier = tokio::spawn(run_notifier(
            Arc::clone(&board),
            Arc::clone(&control),
            Arc::clone(&sessions),
            ticket,
            Box::new(server),
        ));
        read_snapshot(&mut client, 3).await;

        board.move_player(0, &mut Command::new(Action::Step(Direction::Right)));
        let snapshot = read_until(&mut client, 3, |s| s.header.points == 1).await;
        assert_eq!(snapshot.header.game_over, 0);
        assert_eq!(sessions.read().await.get(&ticket).unwrap().score, 1);

        control.finish(RoundState::Lost);
        drop(client);
        timeout(Duration::from_secs(1), notifier).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_closed_writer_ends_round() {
        let board = board("tempo 5\ngrid\nP.\n");
        let control = Arc::new(GameControl::new());
        let (sessions, ticket) = table();
        let (client, server) = tokio::io::duplex(64);
        drop(client);

        let (_, healthy) = timeout(
            Duration::from_secs(1),
            run_notifier(board, Arc::clone(&control), sessions, ticket, Box::new(server)),
        )
        .await
        .unwrap();
        assert!(!healthy);
        assert_eq!(control.state(), RoundState::Lost);
    }
}
