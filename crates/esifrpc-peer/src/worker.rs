//! Request queue and the worker threads that drain it.
//!
//! The I/O loop hands every decoded request here; workers run the interface
//! table and queue the encoded reply back to the I/O loop. A connection may
//! have at most `depth` requests queued or executing at once.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use esifrpc_codec::{decode_header, encode_status, Handle, ResultCode};
use esifrpc_transport::TransportError;
use parking_lot::{Condvar, Mutex};

use crate::error::{PeerError, Result};
use crate::iface::CallContext;
use crate::runtime::Shared;
use crate::ConnectionId;

/// One request waiting for a worker.
#[derive(Debug)]
pub(crate) struct Job {
    pub(crate) connection: ConnectionId,
    pub(crate) session: Handle,
    pub(crate) message: Bytes,
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: VecDeque<Job>,
    in_flight: HashMap<ConnectionId, usize>,
    closed: bool,
}

#[derive(Debug)]
pub(crate) struct WorkQueue {
    depth: usize,
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl WorkQueue {
    pub(crate) fn new(depth: usize) -> Self {
        Self {
            depth: depth.max(1),
            state: Mutex::new(QueueState::default()),
            ready: Condvar::new(),
        }
    }

    /// Queue a request, refusing it when its connection is at depth.
    pub(crate) fn push(&self, job: Job) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PeerError::Shutdown);
        }
        let count = state.in_flight.entry(job.connection).or_insert(0);
        if *count >= self.depth {
            return Err(PeerError::QueueFull {
                connection: job.connection,
                depth: self.depth,
            });
        }
        *count += 1;
        state.jobs.push_back(job);
        self.ready.notify_one();
        Ok(())
    }

    /// Block until a request is available. `None` once closed and drained.
    pub(crate) fn pop(&self) -> Option<Job> {
        let mut state = self.state.lock();
        loop {
            if let Some(job) = state.jobs.pop_front() {
                return Some(job);
            }
            if state.closed {
                return None;
            }
            self.ready.wait(&mut state);
        }
    }

    /// A popped request for `connection` has finished executing.
    pub(crate) fn complete(&self, connection: ConnectionId) {
        let mut state = self.state.lock();
        if let Some(count) = state.in_flight.get_mut(&connection) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.in_flight.remove(&connection);
            }
        }
    }

    /// Discard queued requests of a closed connection. Returns how many.
    pub(crate) fn forget(&self, connection: ConnectionId) -> usize {
        let mut state = self.state.lock();
        let before = state.jobs.len();
        state.jobs.retain(|job| job.connection != connection);
        let dropped = before - state.jobs.len();
        if let Some(count) = state.in_flight.get_mut(&connection) {
            *count = count.saturating_sub(dropped);
            if *count == 0 {
                state.in_flight.remove(&connection);
            }
        }
        dropped
    }

    /// Requests queued or executing for `connection`.
    pub(crate) fn pending(&self, connection: ConnectionId) -> usize {
        self.state
            .lock()
            .in_flight
            .get(&connection)
            .copied()
            .unwrap_or(0)
    }

    /// Wake every worker; `pop` returns `None` once the queue is empty.
    pub(crate) fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }
}

/// Start `count` workers draining `shared.work`.
pub(crate) fn spawn_workers(shared: &Arc<Shared>, count: usize) -> Result<Vec<JoinHandle<()>>> {
    (0..count.max(1))
        .map(|index| {
            let shared = Arc::clone(shared);
            thread::Builder::new()
                .name(format!("esifrpc-worker-{index}"))
                .spawn(move || run(&shared))
                .map_err(|err| PeerError::Transport(TransportError::from(err)))
        })
        .collect()
}

fn run(shared: &Shared) {
    tracing::trace!("worker started");
    while let Some(job) = shared.work.pop() {
        if let Some(reply) = execute(shared, &job) {
            shared.send(job.connection, reply);
        }
        shared.work.complete(job.connection);
    }
    tracing::trace!("worker stopped");
}

fn execute(shared: &Shared, job: &Job) -> Option<Bytes> {
    let mode = shared.mode();
    let (header, payload) = match decode_header(mode, &job.message) {
        Ok(decoded) => decoded,
        Err(err) => {
            tracing::warn!(connection = job.connection, error = %err, "dropping malformed request");
            return None;
        }
    };

    let ctx = {
        let Some(session) = shared.sessions.by_handle(job.session) else {
            tracing::debug!(
                connection = job.connection,
                function = %header.function,
                "session closed before request ran"
            );
            return None;
        };
        CallContext {
            session: session.handle(),
            connection: session.connection(),
            app_name: session.app_name().map(str::to_owned),
        }
    };

    let reply = match shared.handlers.dispatch(&ctx, mode, &header, payload) {
        Ok(reply) => reply,
        Err(err) => {
            tracing::warn!(function = %header.function, error = %err, "request failed");
            return encode_status(mode, &header.response(err.result_code())).ok();
        }
    };

    if reply.len() > shared.max_message_size() {
        tracing::warn!(
            function = %header.function,
            size = reply.len(),
            "reply exceeds message limit"
        );
        return encode_status(mode, &header.response(ResultCode::NoMemory)).ok();
    }
    Some(reply)
}
