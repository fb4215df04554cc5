//! Per-client byte channels and how they are opened.
//!
//! Workers only see the [`ChannelOpener`] trait. The server binary uses
//! [`FifoChannelOpener`], which opens the named pipes created by clients;
//! tests plug in in-memory streams instead.

use async_trait::async_trait;
use log::debug;
use nix::errno::Errno;
use nix::sys::stat::Mode;
use std::io;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::unix::pipe;
use tokio::time::Instant;

/// Client to server stream of DISCONNECT and PLAY messages.
pub type ChannelReader = Box<dyn AsyncRead + Send + Unpin>;
/// Server to client stream of the ack and BOARD frames.
pub type ChannelWriter = Box<dyn AsyncWrite + Send + Unpin>;

const OPEN_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Opens the two channels named in a connect request.
#[async_trait]
pub trait ChannelOpener: Send + Sync {
    async fn open(&self, inbound: &str, outbound: &str)
        -> io::Result<(ChannelReader, ChannelWriter)>;
}

/// Opens client channels as named pipes.
#[derive(Debug, Clone)]
pub struct FifoChannelOpener {
    open_timeout: Duration,
}

impl FifoChannelOpener {
    pub fn new(open_timeout: Duration) -> Self {
        Self { open_timeout }
    }
}

#[async_trait]
impl ChannelOpener for FifoChannelOpener {
    async fn open(
        &self,
        inbound: &str,
        outbound: &str,
    ) -> io::Result<(ChannelReader, ChannelWriter)> {
        // Read-only, so a client closing its writing end shows up as EOF. The
        // client must already hold that end open when it registers.
        let receiver = pipe::OpenOptions::new().open_receiver(inbound)?;
        let sender = open_sender(Path::new(outbound), self.open_timeout).await?;
        debug!("Opened channels {} and {}", inbound, outbound);
        Ok((Box::new(receiver), Box::new(sender)))
    }
}

/// Opens the writing end of a FIFO, waiting up to `timeout` for a reader.
pub async fn open_sender(path: &Path, timeout: Duration) -> io::Result<pipe::Sender> {
    let deadline = Instant::now() + timeout;
    loop {
        match pipe::OpenOptions::new().open_sender(path) {
            Ok(sender) => return Ok(sender),
            Err(e) if e.raw_os_error() == Some(Errno::ENXIO as i32) => {
                if Instant::now() >= deadline {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("no reader on {} after {:?}", path.display(), timeout),
                    ));
                }
                tokio::time::sleep(OPEN_RETRY_INTERVAL).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Creates a FIFO at `path`, replacing whatever stale file is there.
pub fn create_fifo(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed stale {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    nix::unistd::mkfifo(path, Mode::from_bits_truncate(0o640))?;
    Ok(())
}

/// Opens the registration FIFO for reading.
///
/// The server also holds a writing end through the same descriptor, so the
/// stream stays open while no client is connected.
pub fn open_registration(path: &Path) -> io::Result<pipe::Receiver> {
    pipe::OpenOptions::new().read_write(true).open_receiver(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_create_fifo_replaces_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("register");
        std::fs::write(&path, "stale").unwrap();

        create_fifo(&path).unwrap();

        use std::os::unix::fs::FileTypeExt;
        assert!(std::fs::metadata(&path).unwrap().file_type().is_fifo());
    }

    #[tokio::test]
    async fn test_open_sender_times_out_without_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notify");
        create_fifo(&path).unwrap();

        let error = open_sender(&path, Duration::from_millis(120))
            .await
            .unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn test_fifo_opener_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let inbound = dir.path().join("1_request");
        let outbound = dir.path().join("1_notification");
        create_fifo(&inbound).unwrap();
        create_fifo(&outbound).unwrap();

        // Client side: reader on the outbound FIFO must exist before the
        // server can open its sender
        let mut client_reader = pipe::OpenOptions::new()
            .read_write(true)
            .open_receiver(&outbound)
            .unwrap();

        let mut client_writer = pipe::OpenOptions::new()
            .read_write(true)
            .open_sender(&inbound)
            .unwrap();

        let opener = FifoChannelOpener::new(Duration::from_secs(1));
        let (mut reader, mut writer) = opener
            .open(inbound.to_str().unwrap(), outbound.to_str().unwrap())
            .await
            .unwrap();

        client_writer.write_all(&[3, b'D']).await.unwrap();
        let mut message = [0u8; 2];
        reader.read_exact(&mut message).await.unwrap();
        assert_eq!(message, [3, b'D']);

        writer.write_all(&[1, 0]).await.unwrap();
        let mut ack = [0u8; 2];
        client_reader.read_exact(&mut ack).await.unwrap();
        assert_eq!(ack, [1, 0]);
    }

    #[tokio::test]
    async fn test_inbound_eof_when_client_closes_writer() {
        let dir = tempfile::tempdir().unwrap();
        let inbound = dir.path().join("2_request");
        let outbound = dir.path().join("2_notification");
        create_fifo(&inbound).unwrap();
        create_fifo(&outbound).unwrap();

        let _client_reader = pipe::OpenOptions::new()
            .read_write(true)
            .open_receiver(&outbound)
            .unwrap();
        let mut client_writer = pipe::OpenOptions::new()
            .read_write(true)
            .open_sender(&inbound)
            .unwrap();

        let opener = FifoChannelOpener::new(Duration::from_secs(1));
        let (mut reader, _writer) = opener
            .open(inbound.to_str().unwrap(), outbound.to_str().unwrap())
            .await
            .unwrap();

        client_writer.write_all(&[4]).await.unwrap();
        drop(client_writer);

        assert_eq!(reader.read_u8().await.unwrap(), 4);
        let error = tokio::time::timeout(Duration::from_secs(1), reader.read_u8())
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_fifo_opener_missing_inbound() {
        let opener = FifoChannelOpener::new(Duration::from_millis(50));
        assert!(opener
            .open("/nonexistent/1_request", "/nonexistent/1_notification")
            .await
            .is_err());
    }
}
