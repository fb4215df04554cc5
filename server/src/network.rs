//! Server front end: registration listener, worker pool and leaderboard dumps

use crate::admission::{AdmissionQueue, ConnectionRequest};
use crate::channel::ChannelOpener;
use crate::config::{ServerConfig, ServerError};
use crate::game::SessionContext;
use crate::level::LevelSource;
use crate::session::{render_leaderboard, SessionTable, LEADERBOARD_SIZE};
use crate::utils::client_id_from_channel;
use crate::worker::{spawn_workers, WorkerContext};
use log::{debug, info, warn};
use shared::{decode_channel_name, CHANNEL_NAME_LEN, OP_CONNECT};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{Notify, RwLock};

/// Handle used to ask a running server for a leaderboard dump
#[derive(Debug, Clone)]
pub struct LeaderboardTrigger {
    notify: Arc<Notify>,
}

impl LeaderboardTrigger {
    /// Requests a dump. Requests made while one is pending are merged.
    pub fn request(&self) {
        self.notify.notify_one();
    }
}

/// Main server coordinating admission and running sessions
pub struct Server {
    config: ServerConfig,
    queue: Arc<AdmissionQueue>,
    sessions: Arc<RwLock<SessionTable>>,
    levels: Arc<dyn LevelSource>,
    opener: Arc<dyn ChannelOpener>,
    leaderboard: Arc<Notify>,
}

impl Server {
    pub fn new(
        config: ServerConfig,
        levels: Arc<dyn LevelSource>,
        opener: Arc<dyn ChannelOpener>,
    ) -> Result<Self, ServerError> {
        config.validate()?;

        Ok(Server {
            queue: Arc::new(AdmissionQueue::new(config.queue_capacity)),
            sessions: Arc::new(RwLock::new(SessionTable::new(config.max_games))),
            config,
            levels,
            opener,
            leaderboard: Arc::new(Notify::new()),
        })
    }

    pub fn sessions(&self) -> Arc<RwLock<SessionTable>> {
        Arc::clone(&self.sessions)
    }

    pub fn leaderboard_trigger(&self) -> LeaderboardTrigger {
        LeaderboardTrigger {
            notify: Arc::clone(&self.leaderboard),
        }
    }

    /// Runs the worker pool and the listener until `registration` reaches EOF
    ///
    /// The queue is closed on return so idle workers stop. Sessions already
    /// running keep going until they end on their own.
    pub async fn run<R>(&self, registration: R) -> Result<(), ServerError>
    where
        R: AsyncRead + Unpin,
    {
        let context = WorkerContext {
            queue: Arc::clone(&self.queue),
            opener: Arc::clone(&self.opener),
            session: SessionContext {
                sessions: Arc::clone(&self.sessions),
                levels: Arc::clone(&self.levels),
                input_poll_timeout: self.config.input_poll_timeout,
            },
            slot_poll_interval: self.config.slot_poll_interval,
        };
        let workers = spawn_workers(self.config.max_games, &context);
        info!(
            "Server started: {} workers, queue capacity {}",
            workers.len(),
            self.queue.capacity()
        );

        let result = self.listen(registration).await;
        self.queue.close();
        result
    }

    /// Reads registrations and feeds them into the admission queue
    async fn listen<R>(&self, mut registration: R) -> Result<(), ServerError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let opcode = tokio::select! {
                _ = self.leaderboard.notified() => {
                    self.write_leaderboard().await;
                    continue;
                }
                opcode = registration.read_u8() => opcode,
            };
            let opcode = match opcode {
                Ok(opcode) => opcode,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    info!("Registration channel closed");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            if opcode != OP_CONNECT {
                debug!("Ignoring opcode {} on registration channel", opcode);
                continue;
            }

            let request = match read_request(&mut registration).await {
                Ok(Some(request)) => request,
                Ok(None) => continue,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    warn!("Registration channel closed mid-request");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            let client_id = request.client_id;
            if !self.enqueue(request).await {
                return Ok(());
            }
            info!("Queued connection request from client {}", client_id);
        }
    }

    /// Pushes a request, still serving leaderboard requests while the queue
    /// is full. Returns false if the queue was closed.
    async fn enqueue(&self, request: ConnectionRequest) -> bool {
        let put = self.queue.put(request);
        tokio::pin!(put);
        loop {
            tokio::select! {
                result = &mut put => return result.is_ok(),
                _ = self.leaderboard.notified() => self.write_leaderboard().await,
            }
        }
    }

    /// Waits for every session started so far to end on its own.
    pub async fn join_sessions(&self) {
        let tasks = self.sessions.write().await.take_tasks();
        if !tasks.is_empty() {
            info!("Waiting for {} running session(s)", tasks.len());
        }
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Session task failed: {}", e);
            }
        }
    }

    /// Writes the current top scores to the leaderboard file
    pub async fn write_leaderboard(&self) {
        let entries = self.sessions.read().await.leaderboard(LEADERBOARD_SIZE);
        let text = render_leaderboard(&entries);
        let path = &self.config.leaderboard_path;
        match tokio::fs::write(path, text).await {
            Ok(()) => info!(
                "Wrote leaderboard with {} entries to {}",
                entries.len(),
                path.display()
            ),
            Err(e) => warn!("Failed to write leaderboard {}: {}", path.display(), e),
        }
    }
}

/// Reads the two channel-name fields of a CONNECT request
///
/// Returns Ok(None) for requests whose names do not decode; those are
/// dropped without a reply.
async fn read_request<R>(registration: &mut R) -> io::Result<Option<ConnectionRequest>>
where
    R: AsyncRead + Unpin,
{
    let mut inbound = [0u8; CHANNEL_NAME_LEN];
    let mut outbound = [0u8; CHANNEL_NAME_LEN];
    registration.read_exact(&mut inbound).await?;
    registration.read_exact(&mut outbound).await?;

    match (decode_channel_name(&inbound), decode_channel_name(&outbound)) {
        (Ok(inbound), Ok(outbound)) => Ok(Some(ConnectionRequest {
            client_id: client_id_from_channel(&inbound),
            inbound,
            outbound,
        })),
        (Err(e), _) | (_, Err(e)) => {
            warn!("Dropping malformed connection request: {}", e);
            Ok(None)
        }
    }
}
