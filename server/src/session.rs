//! Session slot management for concurrently running games
//!
//! The session table is the only place that decides how many games run at
//! once. It tracks:
//! - Which of the fixed slots are occupied and by which requester
//! - The running score of each session, for leaderboard snapshots
//! - The orchestrator task driving each admitted session
//!
//! Every reservation hands out a `SessionTicket`. Later writes carry the
//! ticket so a finished session can never touch a slot that was already
//! handed to somebody else.

use log::{debug, info};
use std::fmt::Write as _;
use tokio::task::JoinHandle;

/// How many sessions a leaderboard snapshot lists
pub const LEADERBOARD_SIZE: usize = 5;

/// Proof of a slot reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTicket {
    /// Index into the session table
    pub slot: usize,
    /// Unique across the server's lifetime, never reused
    pub session_id: u64,
}

/// One occupied slot
#[derive(Debug)]
pub struct Session {
    /// Requester id parsed from the inbound channel name
    pub client_id: i32,
    pub session_id: u64,
    /// Channel names as received in the connect request
    pub inbound: String,
    pub outbound: String,
    /// Score carried across the levels played so far
    pub score: u32,
    /// Orchestrator task, set once the session is admitted
    pub task: Option<JoinHandle<()>>,
}

/// A leaderboard line: requester id and score
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreEntry {
    pub client_id: i32,
    pub score: u32,
}

/// Fixed-capacity table of running sessions
///
/// Slots are scanned lowest index first, both when reserving and when
/// building a leaderboard, so ties keep a stable and predictable order.
#[derive(Debug)]
pub struct SessionTable {
    slots: Vec<Option<Session>>,
    next_session_id: u64,
}

impl SessionTable {
    /// Creates a table with `capacity` free slots
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            next_session_id: 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Claims the lowest free slot for a requester
    ///
    /// Returns None when every slot is occupied. The caller is expected to
    /// retry later; this never waits.
    pub fn try_reserve(
        &mut self,
        client_id: i32,
        inbound: &str,
        outbound: &str,
    ) -> Option<SessionTicket> {
        let slot = self.slots.iter().position(Option::is_none)?;

        let session_id = self.next_session_id;
        self.next_session_id += 1;

        self.slots[slot] = Some(Session {
            client_id,
            session_id,
            inbound: inbound.to_string(),
            outbound: outbound.to_string(),
            score: 0,
            task: None,
        });
        info!("Reserved slot {} for client {}", slot, client_id);

        Some(SessionTicket { slot, session_id })
    }

    fn session_mut(&mut self, ticket: &SessionTicket) -> Option<&mut Session> {
        self.slots
            .get_mut(ticket.slot)?
            .as_mut()
            .filter(|session| session.session_id == ticket.session_id)
    }

    /// Looks up the session a ticket refers to, if it is still running
    pub fn get(&self, ticket: &SessionTicket) -> Option<&Session> {
        self.slots
            .get(ticket.slot)?
            .as_ref()
            .filter(|session| session.session_id == ticket.session_id)
    }

    /// Records the orchestrator task of an admitted session
    ///
    /// Returns false if the ticket is stale, in which case the handle is
    /// dropped and the task keeps running detached.
    pub fn attach(&mut self, ticket: &SessionTicket, task: JoinHandle<()>) -> bool {
        match self.session_mut(ticket) {
            Some(session) => {
                session.task = Some(task);
                true
            }
            None => false,
        }
    }

    /// Stores the latest score of a session
    pub fn update_score(&mut self, ticket: &SessionTicket, score: u32) -> bool {
        match self.session_mut(ticket) {
            Some(session) => {
                session.score = score;
                true
            }
            None => false,
        }
    }

    /// Frees a slot
    ///
    /// Safe to call more than once; only the first call with a matching
    /// ticket has any effect.
    pub fn release(&mut self, ticket: &SessionTicket) -> bool {
        if self.session_mut(ticket).is_none() {
            return false;
        }
        if let Some(session) = self.slots[ticket.slot].take() {
            debug!(
                "Released slot {} (client {}, session {})",
                ticket.slot, session.client_id, session.session_id
            );
        }
        true
    }

    /// Returns the number of occupied slots
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Best scores among running sessions, highest first
    ///
    /// Equal scores keep slot order.
    pub fn leaderboard(&self, limit: usize) -> Vec<ScoreEntry> {
        let mut entries: Vec<ScoreEntry> = self
            .slots
            .iter()
            .flatten()
            .map(|session| ScoreEntry {
                client_id: session.client_id,
                score: session.score,
            })
            .collect();
        // sort_by is stable
        entries.sort_by(|a, b| b.score.cmp(&a.score));
        entries.truncate(limit);
        entries
    }

    /// Removes every orchestrator handle, leaving the slots in place
    pub fn take_tasks(&mut self) -> Vec<JoinHandle<()>> {
        self.slots
            .iter_mut()
            .flatten()
            .filter_map(|session| session.task.take())
            .collect()
    }
}

/// Renders a leaderboard as the text written to the leaderboard file
pub fn render_leaderboard(entries: &[ScoreEntry]) -> String {
    let mut text = format!("=== TOP {} CLIENTS BY SCORE ===\n", LEADERBOARD_SIZE);
    for (rank, entry) in entries.iter().enumerate() {
        let _ = writeln!(
            text,
            "{}. Client ID: {} - Score: {}",
            rank + 1,
            entry.client_id,
            entry.score
        );
    }
    if entries.is_empty() {
        text.push_str("No active clients.\n");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reserve(table: &mut SessionTable, client_id: i32) -> Option<SessionTicket> {
        table.try_reserve(client_id, "/tmp/in", "/tmp/out")
    }

    #[test]
    fn test_session_table_creation() {
        let table = SessionTable::new(3);
        assert_eq!(table.capacity(), 3);
        assert!(table.is_empty());
        assert!(!table.is_full());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_reserve_lowest_free_slot() {
        let mut table = SessionTable::new(3);

        let first = reserve(&mut table, 10).unwrap();
        let second = reserve(&mut table, 11).unwrap();
        assert_eq!(first.slot, 0);
        assert_eq!(second.slot, 1);
        assert_ne!(first.session_id, second.session_id);

        assert!(table.release(&first));
        let third = reserve(&mut table, 12).unwrap();
        assert_eq!(third.slot, 0);
        assert_eq!(table.get(&third).unwrap().client_id, 12);
    }

    #[test]
    fn test_reserve_at_capacity() {
        let mut table = SessionTable::new(1);

        assert!(reserve(&mut table, 1).is_some());
        assert!(table.is_full());
        assert!(reserve(&mut table, 2).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_stale_ticket_is_ignored() {
        let mut table = SessionTable::new(1);

        let old = reserve(&mut table, 1).unwrap();
        table.update_score(&old, 3);
        assert!(table.release(&old));
        assert!(!table.release(&old));

        let new = reserve(&mut table, 2).unwrap();
        assert_eq!(new.slot, old.slot);

        // Late writes from the finished session must not leak into the new one
        assert!(!table.update_score(&old, 99));
        assert!(!table.release(&old));
        assert!(table.get(&old).is_none());
        assert_eq!(table.get(&new).unwrap().score, 0);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_leaderboard_order() {
        let mut table = SessionTable::new(8);
        let scores = [(1, 4), (2, 9), (3, 4), (4, 0), (5, 7), (6, 9), (7, 1)];
        for (client_id, score) in scores {
            let ticket = reserve(&mut table, client_id).unwrap();
            table.update_score(&ticket, score);
        }

        let top: Vec<(i32, u32)> = table
            .leaderboard(LEADERBOARD_SIZE)
            .iter()
            .map(|entry| (entry.client_id, entry.score))
            .collect();
        assert_eq!(top, vec![(2, 9), (6, 9), (5, 7), (1, 4), (3, 4)]);
    }

    #[test]
    fn test_render_leaderboard() {
        let entries = [
            ScoreEntry {
                client_id: 2,
                score: 9,
            },
            ScoreEntry {
                client_id: 7,
                score: 1,
            },
        ];
        assert_eq!(
            render_leaderboard(&entries),
            "=== TOP 5 CLIENTS BY SCORE ===\n\
             1. Client ID: 2 - Score: 9\n\
             2. Client ID: 7 - Score: 1\n"
        );
        assert_eq!(
            render_leaderboard(&[]),
            "=== TOP 5 CLIENTS BY SCORE ===\nNo active clients.\n"
        );
    }

    #[tokio::test]
    async fn test_attach_and_take_tasks() {
        let mut table = SessionTable::new(2);
        let ticket = reserve(&mut table, 5).unwrap();

        assert!(table.attach(&ticket, tokio::spawn(async {})));
        let tasks = table.take_tasks();
        assert_eq!(tasks.len(), 1);
        for task in tasks {
            task.await.unwrap();
        }
        assert!(table.get(&ticket).unwrap().task.is_none());

        table.release(&ticket);
        assert!(!table.attach(&ticket, tokio::spawn(async {})));
    }
}
