//! The single I/O thread of an endpoint.
//!
//! One `poll(2)` covers the doorbell, the listener (servers only) and every
//! adopted connection. The loop reads and reassembles WebSocket messages,
//! answers control frames, resolves replies, queues requests for workers and
//! flushes outbound bytes. It never runs interface code.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::sync::{mpsc, Arc};

use bytes::{Buf, Bytes, BytesMut};
use esifrpc_codec::{decode_header, Handle, RpcKind};
use esifrpc_frame::ws::frame::{close_code, close_payload, parse_close};
use esifrpc_frame::{FrameError, Opcode, WsDecoder, WsMessage};
use esifrpc_transport::{poll, Doorbell, IpcListener, IpcStream, PollFd, TransportError};

use crate::error::{PeerError, Result};
use crate::runtime::{Command, Shared};
use crate::worker::Job;
use crate::ConnectionId;

const READ_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    /// A CLOSE is queued; drop once the outbox drains.
    Closing,
    /// Drop on the next reap.
    Closed,
}

/// An upgraded, handshaken connection owned by the I/O thread.
pub(crate) struct Connection {
    id: ConnectionId,
    session: Handle,
    stream: IpcStream,
    decoder: WsDecoder,
    outbox: BytesMut,
    state: State,
    peer: String,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        session: Handle,
        stream: IpcStream,
        decoder: WsDecoder,
    ) -> Result<Self> {
        stream.set_read_timeout(None)?;
        stream.set_write_timeout(None)?;
        stream.set_nonblocking(true)?;
        let peer = stream.peer_address();
        Ok(Self {
            id,
            session,
            stream,
            decoder,
            outbox: BytesMut::new(),
            state: State::Open,
            peer,
        })
    }

    pub(crate) fn session(&self) -> Handle {
        self.session
    }

    /// Encode one message onto the outbox.
    ///
    /// Once a peer leaves more than one maximum-size message unread, further
    /// output is refused with [`PeerError::OutboxFull`].
    fn queue(&mut self, shared: &Shared, opcode: Opcode, payload: &[u8]) -> Result<()> {
        let limit = shared.max_message_size();
        if self.outbox.len() > limit {
            return Err(PeerError::OutboxFull {
                connection: self.id,
                pending: self.outbox.len(),
                limit,
            });
        }
        esifrpc_frame::ws::encode_message(shared.role, &shared.config.ws, opcode, payload, &mut self.outbox)?;
        Ok(())
    }

    /// Queue a CLOSE and stop taking new work from this connection.
    fn begin_close(&mut self, shared: &Shared, code: u16, reason: &str) {
        if self.state != State::Open {
            return;
        }
        tracing::debug!(connection = self.id, peer = %self.peer, code, reason, "closing connection");
        let payload = close_payload(code, reason);
        self.state = match self.queue(shared, Opcode::Close, &payload) {
            Ok(()) => State::Closing,
            Err(_) => State::Closed,
        };
    }

    /// Read everything available. Returns `false` once the peer hung up.
    fn fill(&mut self) -> io::Result<bool> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(false),
                Ok(n) => self.decoder.push(&chunk[..n]),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(true),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Write as much of the outbox as the socket takes.
    fn flush(&mut self) -> io::Result<()> {
        while !self.outbox.is_empty() {
            match self.stream.write(&self.outbox) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.outbox.advance(n),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        if self.state == State::Closing {
            self.state = State::Closed;
        }
        Ok(())
    }

    fn flush_or_drop(&mut self) {
        if let Err(err) = self.flush() {
            tracing::debug!(connection = self.id, error = %err, "write failed");
            self.state = State::Closed;
        }
    }

    fn poll_fd(&self) -> PollFd {
        PollFd::new(self.stream.as_raw_fd(), true, !self.outbox.is_empty())
    }

    /// Decode and dispatch every complete message.
    fn process(&mut self, shared: &Shared) {
        while self.state != State::Closed {
            let message = match self.decoder.next_message() {
                Ok(Some(message)) => message,
                Ok(None) => return,
                Err(err) => {
                    let code = match &err {
                        FrameError::MessageTooLarge { .. } => close_code::TOO_BIG,
                        _ => close_code::PROTOCOL_ERROR,
                    };
                    tracing::warn!(connection = self.id, peer = %self.peer, error = %err, "bad frame");
                    self.begin_close(shared, code, "bad frame");
                    return;
                }
            };
            if let Err(err) = self.handle(shared, message) {
                tracing::warn!(connection = self.id, peer = %self.peer, error = %err, "dropping connection");
                let code = match err {
                    PeerError::QueueFull { .. } | PeerError::OutboxFull { .. } => close_code::TOO_BIG,
                    _ => close_code::PROTOCOL_ERROR,
                };
                self.begin_close(shared, code, &err.to_string());
                return;
            }
        }
    }

    fn handle(&mut self, shared: &Shared, message: WsMessage) -> Result<()> {
        tracing::trace!(
            connection = self.id,
            opcode = message.opcode.name(),
            size = message.payload.len(),
            "message received"
        );
        shared.sessions.touch(self.session);
        match message.opcode {
            Opcode::Ping => self.queue(shared, Opcode::Pong, &message.payload),
            Opcode::Pong => Ok(()),
            Opcode::Close => {
                let (code, reason) = parse_close(&message.payload)
                    .unwrap_or((close_code::NORMAL, String::new()));
                tracing::debug!(connection = self.id, code, reason = %reason, "peer sent close");
                match self.state {
                    State::Open => {
                        // Echo the peer's code and finish once it is flushed.
                        self.queue(shared, Opcode::Close, &close_payload(code, ""))?;
                        self.state = State::Closing;
                    }
                    _ => self.state = State::Closed,
                }
                Ok(())
            }
            Opcode::Binary if self.state == State::Open => self.dispatch(shared, message.payload),
            Opcode::Binary => Ok(()),
            other => Err(PeerError::Frame(FrameError::Protocol(format!(
                "unexpected {} message",
                other.name()
            )))),
        }
    }

    fn dispatch(&mut self, shared: &Shared, message: Bytes) -> Result<()> {
        let (header, _) = decode_header(shared.mode(), &message)?;
        match header.kind {
            RpcKind::Response => {
                shared.resolve(self.id, &header, message);
                Ok(())
            }
            RpcKind::Request => shared.work.push(Job {
                connection: self.id,
                session: self.session,
                message,
            }),
        }
    }
}

/// Accepting side of a server loop.
pub(crate) struct Acceptor {
    pub(crate) listener: IpcListener,
    pub(crate) sessions: mpsc::SyncSender<Handle>,
}

pub(crate) struct IoLoop {
    shared: Arc<Shared>,
    doorbell: Doorbell,
    acceptor: Option<Acceptor>,
    connections: HashMap<ConnectionId, Connection>,
}

impl IoLoop {
    pub(crate) fn new(shared: Arc<Shared>, doorbell: Doorbell, acceptor: Option<Acceptor>) -> Result<Self> {
        if let Some(acceptor) = &acceptor {
            acceptor.listener.set_nonblocking(true)?;
        }
        Ok(Self {
            shared,
            doorbell,
            acceptor,
            connections: HashMap::new(),
        })
    }

    pub(crate) fn with_connection(mut self, connection: Connection) -> Self {
        self.connections.insert(connection.id, connection);
        self
    }

    /// Serve until shutdown. A loop without a listener also ends when its
    /// last connection closes.
    pub(crate) fn run(mut self) {
        tracing::debug!(role = ?self.shared.role, "io loop started");
        loop {
            self.apply_commands();
            self.reap();
            if self.shared.is_shutdown() {
                break;
            }
            if self.acceptor.is_none() && self.connections.is_empty() {
                break;
            }

            let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
            let mut fds = Vec::with_capacity(ids.len() + 2);
            fds.push(PollFd::readable(self.doorbell.as_raw_fd()));
            if let Some(acceptor) = &self.acceptor {
                fds.push(PollFd::readable(acceptor.listener.as_raw_fd()));
            }
            let first = fds.len();
            fds.extend(ids.iter().filter_map(|id| self.connections.get(id)).map(Connection::poll_fd));

            if let Err(err) = poll(&mut fds, self.shared.transactions.next_timeout()) {
                tracing::error!(error = %err, "poll failed, stopping io loop");
                break;
            }

            if fds[0].is_readable() {
                self.doorbell.drain();
            }
            if first == 2 && fds[1].is_readable() {
                self.accept_ready();
            }
            for (id, fd) in ids.iter().zip(&fds[first..]) {
                self.service(*id, fd);
            }

            if let Some(timeout) = self.shared.transactions.timeout() {
                let expired = self.shared.transactions.expire_timeout(timeout);
                if expired > 0 {
                    tracing::debug!(expired, "expired overdue transactions");
                }
            }
        }
        self.close_all();
        tracing::debug!(role = ?self.shared.role, "io loop stopped");
    }

    fn apply_commands(&mut self) {
        for command in self.shared.take_commands() {
            match command {
                Command::Adopt(connection) => {
                    tracing::debug!(
                        connection = connection.id,
                        session = connection.session,
                        peer = %connection.peer,
                        "connection adopted"
                    );
                    self.connections.insert(connection.id, connection);
                }
                Command::Send(id, message) => match self.connections.get_mut(&id) {
                    Some(conn) if conn.state == State::Open => {
                        if let Err(err) = conn.queue(&self.shared, Opcode::Binary, &message) {
                            tracing::warn!(connection = id, error = %err, "cannot queue message");
                            if matches!(err, PeerError::OutboxFull { .. }) {
                                conn.begin_close(&self.shared, close_code::TOO_BIG, "peer not reading");
                            }
                        } else {
                            conn.flush_or_drop();
                        }
                    }
                    _ => {
                        tracing::debug!(connection = id, "dropping message for closed connection");
                        self.shared.transactions.expire_connection(id);
                    }
                },
                Command::Close {
                    connection,
                    code,
                    reason,
                } => {
                    if let Some(conn) = self.connections.get_mut(&connection) {
                        conn.begin_close(&self.shared, code, &reason);
                        conn.flush_or_drop();
                    }
                }
            }
        }
    }

    fn service(&mut self, id: ConnectionId, fd: &PollFd) {
        let shared = Arc::clone(&self.shared);
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        if fd.is_readable() || fd.is_error() {
            match conn.fill() {
                Ok(open) => {
                    conn.process(&shared);
                    if !open {
                        tracing::debug!(connection = id, peer = %conn.peer, "peer hung up");
                        conn.state = State::Closed;
                    }
                }
                Err(err) => {
                    tracing::debug!(connection = id, error = %err, "read failed");
                    conn.state = State::Closed;
                }
            }
        }
        if conn.state != State::Closed && (fd.is_writable() || !conn.outbox.is_empty()) {
            conn.flush_or_drop();
        }
    }

    fn accept_ready(&mut self) {
        let Some(acceptor) = &self.acceptor else {
            return;
        };
        loop {
            match acceptor.listener.accept() {
                Ok((stream, peer)) => {
                    crate::server::spawn_handshake(&self.shared, stream, peer, acceptor.sessions.clone());
                }
                Err(TransportError::Accept(source)) if source.kind() == io::ErrorKind::WouldBlock => {
                    return;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "accept failed");
                    return;
                }
            }
        }
    }

    fn reap(&mut self) {
        let done: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.state == State::Closed)
            .map(|(id, _)| *id)
            .collect();
        for id in done {
            if let Some(conn) = self.connections.remove(&id) {
                self.teardown(conn);
            }
        }
    }

    /// Release everything tied to a connection and wake its callers.
    fn teardown(&self, conn: Connection) {
        let _ = conn.stream.shutdown();
        self.shared.sessions.unregister(conn.session);
        let expired = self.shared.transactions.expire_connection(conn.id);
        let dropped = self.shared.work.forget(conn.id);
        tracing::debug!(
            connection = conn.id,
            peer = %conn.peer,
            expired,
            dropped,
            "connection closed"
        );
    }

    fn close_all(&mut self) {
        let shared = Arc::clone(&self.shared);
        let open: Vec<Connection> = self.connections.drain().map(|(_, conn)| conn).collect();
        for mut conn in open {
            conn.begin_close(&shared, close_code::GOING_AWAY, "shutting down");
            let _ = conn.flush();
            self.teardown(conn);
        }
        // Anything left belongs to connections that never got adopted.
        for command in self.shared.take_commands() {
            if let Command::Adopt(conn) = command {
                self.teardown(conn);
            }
        }
        self.shared.transactions.expire_all();
    }
}
