use crate::input::MoveScript;
use crate::rendering::render_snapshot;
use log::{debug, info, warn};
use nix::sys::stat::Mode;
use shared::{
    encode_connect_request, BoardHeader, BoardSnapshot, ProtocolError, BOARD_HEADER_LEN,
    CMD_QUIT, CONNECT_ACCEPTED, OP_BOARD, OP_CONNECT, OP_DISCONNECT, OP_PLAY,
};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::unix::pipe;
use tokio::sync::mpsc;
use tokio::time::interval;

/// How long [`Client::connect`] waits for the server to open the
/// notification FIFO.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("server refused the connection (result {0})")]
    Refused(u8),
}

/// Client side of one game session.
pub struct Client {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    /// FIFOs this client created and removes when done
    fifos: Vec<PathBuf>,
}

impl Client {
    /// Registers with the server over `register_pipe`, using FIFOs named
    /// `<client_id>_request` and `<client_id>_notification` in `fifo_dir`.
    pub async fn connect(
        client_id: i32,
        register_pipe: &Path,
        fifo_dir: &Path,
    ) -> Result<Self, ClientError> {
        Self::connect_with_timeout(client_id, register_pipe, fifo_dir, DEFAULT_CONNECT_TIMEOUT)
            .await
    }

    /// Like [`Client::connect`], failing with `TimedOut` when the server has
    /// not opened the notification FIFO within `open_timeout`.
    pub async fn connect_with_timeout(
        client_id: i32,
        register_pipe: &Path,
        fifo_dir: &Path,
        open_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let request_path = fifo_dir.join(format!("{}_request", client_id));
        let notification_path = fifo_dir.join(format!("{}_notification", client_id));
        for path in [&request_path, &notification_path] {
            create_fifo(path)?;
        }

        let fifos = vec![request_path.clone(), notification_path.clone()];
        let result = Self::register(
            client_id,
            register_pipe,
            &request_path,
            &notification_path,
            open_timeout,
        )
        .await;
        match result {
            Ok(mut client) => {
                client.fifos = fifos;
                client.read_ack().await?;
                info!("Connected as client {}", client_id);
                Ok(client)
            }
            Err(e) => {
                for path in &fifos {
                    let _ = std::fs::remove_file(path);
                }
                Err(e)
            }
        }
    }

    async fn register(
        client_id: i32,
        register_pipe: &Path,
        request_path: &Path,
        notification_path: &Path,
        open_timeout: Duration,
    ) -> Result<Self, ClientError> {
        // The server reads commands read-only, so the writing end has to be
        // open before it looks at the request
        let writer = pipe::OpenOptions::new()
            .read_write(true)
            .open_sender(request_path)?;

        let request = encode_connect_request(
            &request_path.to_string_lossy(),
            &notification_path.to_string_lossy(),
        )?;
        let mut registration = pipe::OpenOptions::new().open_sender(register_pipe)?;
        registration.write_all(&request).await?;
        info!("Sent connection request as client {}", client_id);

        // Blocks until the server opens its end; counts as a reader meanwhile,
        // which is what the server's sender open retries for
        let notification = {
            let path = notification_path.to_path_buf();
            tokio::task::spawn_blocking(move || std::fs::File::open(path))
        };

        let notification = match tokio::time::timeout(open_timeout, notification).await {
            Ok(joined) => joined.map_err(|e| io::Error::new(io::ErrorKind::Other, e))??,
            Err(_) => {
                // Opening the writing end releases the blocked open
                if let Err(e) = pipe::OpenOptions::new().open_sender(notification_path) {
                    debug!("Could not release notification open: {}", e);
                }
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "server did not open the notification channel",
                )
                .into());
            }
        };
        let reader = pipe::Receiver::from_file(notification)?;
        Ok(Self::from_parts(reader, writer))
    }

    /// Wraps an already open pair of channels.
    pub fn from_parts<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            fifos: Vec::new(),
        }
    }

    /// Reads the two-byte registration acknowledgement.
    pub async fn read_ack(&mut self) -> Result<(), ClientError> {
        let mut ack = [0u8; 2];
        self.reader.read_exact(&mut ack).await?;
        match ack {
            [OP_CONNECT, CONNECT_ACCEPTED] => Ok(()),
            [OP_CONNECT, result] => Err(ClientError::Refused(result)),
            [opcode, _] => Err(ProtocolError::UnexpectedOpcode(opcode).into()),
        }
    }

    /// Sends one command byte.
    pub async fn play(&mut self, command: u8) -> Result<(), ClientError> {
        self.writer.write_all(&[OP_PLAY, command]).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Ends the session and removes the client's FIFOs.
    pub async fn disconnect(mut self) -> Result<(), ClientError> {
        self.writer.write_all(&[OP_DISCONNECT]).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Waits for the next BOARD frame. Returns None once the server closed
    /// the notification channel.
    pub async fn next_snapshot(&mut self) -> Result<Option<BoardSnapshot>, ClientError> {
        read_snapshot(&mut self.reader).await
    }

    /// Plays `script` one command per `step` while printing every snapshot,
    /// until the server ends the session or the script says quit.
    pub async fn run(mut self, script: MoveScript, step: Duration) -> Result<(), ClientError> {
        // Frames are read on their own task so a command tick never cuts one
        // in half
        let mut reader = std::mem::replace(&mut self.reader, Box::new(tokio::io::empty()));
        let (tx, mut snapshots) = mpsc::channel(16);
        let receiver = tokio::spawn(async move {
            loop {
                let next = read_snapshot(&mut reader).await;
                let last = !matches!(next, Ok(Some(_)));
                if tx.send(next).await.is_err() || last {
                    break;
                }
            }
        });

        let result = self.drive(&mut snapshots, script, step).await;
        receiver.abort();
        match result {
            Ok(true) => {
                info!("Quitting");
                self.disconnect().await
            }
            Ok(false) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Returns true when the script asked to quit.
    async fn drive(
        &mut self,
        snapshots: &mut mpsc::Receiver<Result<Option<BoardSnapshot>, ClientError>>,
        mut script: MoveScript,
        step: Duration,
    ) -> Result<bool, ClientError> {
        let mut ticker = interval(step);
        // Skip the first tick since it fires immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                next = snapshots.recv() => {
                    let Some(snapshot) = next.transpose()?.flatten() else {
                        info!("Server closed the session");
                        return Ok(false);
                    };
                    println!("{}", render_snapshot(&snapshot));
                    if snapshot.header.game_over != 0 {
                        info!("Game over with {} points", snapshot.header.points);
                    } else if snapshot.header.victory != 0 {
                        info!("Level cleared with {} points", snapshot.header.points);
                    }
                }
                _ = ticker.tick() => {
                    match script.next_command() {
                        Some(CMD_QUIT) => return Ok(true),
                        Some(command) => {
                            debug!("Playing {}", command as char);
                            self.play(command).await?;
                        }
                        None => {}
                    }
                }
            }
        }
    }
}

async fn read_snapshot<R>(reader: &mut R) -> Result<Option<BoardSnapshot>, ClientError>
where
    R: AsyncRead + Unpin,
{
    let opcode = match reader.read_u8().await {
        Ok(opcode) => opcode,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if opcode != OP_BOARD {
        return Err(ProtocolError::UnexpectedOpcode(opcode).into());
    }

    let mut header = [0u8; BOARD_HEADER_LEN];
    reader.read_exact(&mut header).await?;
    let header = BoardHeader::decode(&header)?;
    let mut cells = vec![0u8; header.cell_count()?];
    reader.read_exact(&mut cells).await?;
    Ok(Some(BoardSnapshot { header, cells }))
}

impl Drop for Client {
    fn drop(&mut self) {
        for path in &self.fifos {
            if let Err(e) = std::fs::remove_file(path) {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}

fn create_fifo(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    nix::unistd::mkfifo(path, Mode::from_bits_truncate(0o640))?;
    Ok(())
}
