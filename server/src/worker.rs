//! Worker pool turning queued connection requests into running sessions.

use crate::admission::{AdmissionQueue, ConnectionRequest};
use crate::channel::ChannelOpener;
use crate::game::{run_session, SessionContext};
use crate::session::SessionTicket;
use log::{debug, info, warn};
use shared::{connect_ack, CONNECT_ACCEPTED};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;

/// Everything a worker needs, shared by the whole pool.
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: Arc<AdmissionQueue>,
    pub opener: Arc<dyn ChannelOpener>,
    pub session: SessionContext,
    pub slot_poll_interval: Duration,
}

/// Spawns `count` workers. They exit once the queue is closed.
pub fn spawn_workers(count: usize, context: &WorkerContext) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|id| tokio::spawn(run_worker(id, context.clone())))
        .collect()
}

pub async fn run_worker(id: usize, context: WorkerContext) {
    debug!("Worker {} started", id);
    while let Some(request) = context.queue.get().await {
        admit(id, &context, request).await;
    }
    debug!("Worker {} exiting", id);
}

/// Waits for a free slot, polling the session table.
async fn reserve_slot(context: &WorkerContext, request: &ConnectionRequest) -> SessionTicket {
    loop {
        // Read lock only while the table is full
        if context.session.sessions.read().await.is_full() {
            tokio::time::sleep(context.slot_poll_interval).await;
            continue;
        }
        let reserved = context.session.sessions.write().await.try_reserve(
            request.client_id,
            &request.inbound,
            &request.outbound,
        );
        if let Some(ticket) = reserved {
            return ticket;
        }
        tokio::time::sleep(context.slot_poll_interval).await;
    }
}

/// Admits one request: reserve, open channels, ack, start the session.
///
/// Any failure after the reservation frees the slot again. Returns the ticket
/// of the started session.
pub async fn admit(
    id: usize,
    context: &WorkerContext,
    request: ConnectionRequest,
) -> Option<SessionTicket> {
    let ticket = reserve_slot(context, &request).await;
    let sessions = &context.session.sessions;

    let (reader, mut writer) = match context
        .opener
        .open(&request.inbound, &request.outbound)
        .await
    {
        Ok(channels) => channels,
        Err(e) => {
            warn!(
                "Worker {}: cannot open channels for client {}: {}",
                id, request.client_id, e
            );
            sessions.write().await.release(&ticket);
            return None;
        }
    };

    let ack = connect_ack(CONNECT_ACCEPTED);
    let acked: std::io::Result<()> = async {
        writer.write_all(&ack).await?;
        writer.flush().await
    }
    .await;
    if let Err(e) = acked {
        warn!(
            "Worker {}: cannot acknowledge client {}: {}",
            id, request.client_id, e
        );
        sessions.write().await.release(&ticket);
        return None;
    }

    let task = tokio::spawn(run_session(
        context.session.clone(),
        ticket,
        request.client_id,
        reader,
        writer,
    ));
    sessions.write().await.attach(&ticket, task);
    info!(
        "Worker {} admitted client {} into slot {}",
        id, request.client_id, ticket.slot
    );
    Some(ticket)
}
