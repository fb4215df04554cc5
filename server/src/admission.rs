//! Bounded FIFO of connection requests between the listener and the workers.
//!
//! Two counting semaphores track free and filled slots, so `put` waits while
//! the buffer is full and `get` waits while it is empty. The buffer itself is
//! a `VecDeque` behind a short-lived mutex.

use crate::utils::lock;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Semaphore;

pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// A parsed registration, consumed exactly once by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequest {
    pub client_id: i32,
    /// Channel the client writes commands to.
    pub inbound: String,
    /// Channel the server writes the ack and snapshots to.
    pub outbound: String,
}

#[derive(Debug)]
pub struct AdmissionQueue {
    buffer: Mutex<VecDeque<ConnectionRequest>>,
    empty: Semaphore,
    full: Semaphore,
    capacity: usize,
}

impl AdmissionQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            empty: Semaphore::new(capacity),
            full: Semaphore::new(0),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueues a request, waiting for room first.
    ///
    /// Gives the request back if the queue was closed.
    pub async fn put(&self, request: ConnectionRequest) -> Result<(), ConnectionRequest> {
        let Ok(permit) = self.empty.acquire().await else {
            return Err(request);
        };
        permit.forget();
        lock(&self.buffer).push_back(request);
        self.full.add_permits(1);
        Ok(())
    }

    /// Dequeues the oldest request, waiting for one to arrive.
    ///
    /// Returns None once the queue is closed.
    pub async fn get(&self) -> Option<ConnectionRequest> {
        let permit = self.full.acquire().await.ok()?;
        permit.forget();
        let request = lock(&self.buffer).pop_front();
        self.empty.add_permits(1);
        request
    }

    /// Wakes every waiter; later `put` and `get` calls fail immediately.
    /// Requests still buffered are dropped.
    pub fn close(&self) {
        self.empty.close();
        self.full.close();
        lock(&self.buffer).clear();
    }

    pub fn is_closed(&self) -> bool {
        self.full.is_closed()
    }

    pub fn len(&self) -> usize {
        lock(&self.buffer).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
