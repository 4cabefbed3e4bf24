//! State shared by the I/O thread, the workers and calling threads of one
//! endpoint, and the blocking call path.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use esifrpc_codec::{decode_call, decode_header, encode_call, ResultCode, RpcCall, RpcHeader, WireMode};
use esifrpc_frame::{FrameError, Role, WsConfig};
use esifrpc_transport::DoorbellRinger;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{PeerError, Result};
use crate::handle::HandleConfig;
use crate::handshake::HandshakeConfig;
use crate::iface::Handlers;
use crate::ioloop::Connection;
use crate::session::{Session, SessionRegistry};
use crate::transaction::{TransactionConfig, TransactionManager};
use crate::worker::WorkQueue;
use crate::ConnectionId;

/// Extra time a caller waits past the transaction timeout, so the I/O loop
/// expires the transaction before the caller gives up on it.
const WAIT_GRACE: Duration = Duration::from_millis(250);

/// Configuration for a server or client endpoint.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Worker threads executing incoming requests. Default: 2.
    pub workers: usize,
    /// Requests one connection may have queued or executing. Default: 64.
    pub queue_depth: usize,
    /// How long a client keeps retrying a refused connect. Default: 5s.
    pub connect_timeout: Duration,
    /// Accepted connections a server may have mid-handshake at once;
    /// connections past this are closed unanswered. Default: 16.
    pub max_pending_handshakes: usize,
    pub handshake: HandshakeConfig,
    pub ws: WsConfig,
    pub transactions: TransactionConfig,
    pub handles: HandleConfig,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_depth: 64,
            connect_timeout: Duration::from_secs(5),
            max_pending_handshakes: 16,
            handshake: HandshakeConfig::default(),
            ws: WsConfig::default(),
            transactions: TransactionConfig::default(),
            handles: HandleConfig::default(),
        }
    }
}

impl PeerConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_max_pending_handshakes(mut self, max: usize) -> Self {
        self.max_pending_handshakes = max.max(1);
        self
    }

    pub fn with_handshake(mut self, handshake: HandshakeConfig) -> Self {
        self.handshake = handshake;
        self
    }

    pub fn with_ws(mut self, ws: WsConfig) -> Self {
        self.ws = ws;
        self
    }

    /// Per-call timeout; `None` waits forever.
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.transactions.timeout = timeout;
        self
    }

    pub fn with_transactions(mut self, transactions: TransactionConfig) -> Self {
        self.transactions = transactions;
        self
    }

    pub fn with_handles(mut self, handles: HandleConfig) -> Self {
        self.handles = handles;
        self
    }
}

/// Summary of a live session, for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub handle: u64,
    pub connection: ConnectionId,
    #[serde(default)]
    pub peer_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_handle: Option<u64>,
    pub connected: bool,
    /// Milliseconds since the peer last sent a message.
    #[serde(default)]
    pub idle_ms: u64,
}

impl From<&Session> for SessionInfo {
    fn from(session: &Session) -> Self {
        Self {
            handle: session.handle(),
            connection: session.connection(),
            peer_address: session.peer_address().to_owned(),
            app_name: session.app_name().map(str::to_owned),
            app_handle: session.app_handle(),
            connected: session.is_connected(),
            idle_ms: u64::try_from(session.idle().as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Work for the I/O thread, applied in submission order.
pub(crate) enum Command {
    /// Start serving a connection that finished its handshake.
    Adopt(Connection),
    /// Send one encoded message.
    Send(ConnectionId, Bytes),
    /// Send a CLOSE and drop the connection once it is flushed.
    Close {
        connection: ConnectionId,
        code: u16,
        reason: String,
    },
}

pub(crate) struct Shared {
    pub(crate) config: PeerConfig,
    pub(crate) role: Role,
    pub(crate) handlers: Handlers,
    pub(crate) transactions: TransactionManager,
    pub(crate) sessions: SessionRegistry,
    pub(crate) work: WorkQueue,
    /// Accepted connections still in their handshake.
    pub(crate) handshakes: AtomicUsize,
    commands: Mutex<VecDeque<Command>>,
    ringer: DoorbellRinger,
    next_connection: AtomicU64,
    shutdown: AtomicBool,
}

impl Shared {
    pub(crate) fn new(config: PeerConfig, role: Role, handlers: Handlers, ringer: DoorbellRinger) -> Self {
        Self {
            transactions: TransactionManager::new(config.transactions.clone()),
            sessions: SessionRegistry::new(config.handles),
            work: WorkQueue::new(config.queue_depth),
            handshakes: AtomicUsize::new(0),
            config,
            role,
            handlers,
            commands: Mutex::new(VecDeque::new()),
            ringer,
            next_connection: AtomicU64::new(1),
            shutdown: AtomicBool::new(false),
        }
    }

    pub(crate) fn mode(&self) -> WireMode {
        self.config.handshake.wire_mode
    }

    pub(crate) fn max_message_size(&self) -> usize {
        self.config.ws.max_message_size
    }

    pub(crate) fn next_connection_id(&self) -> ConnectionId {
        self.next_connection.fetch_add(1, Ordering::Relaxed)
    }

    /// Queue a command for the I/O thread and wake it.
    pub(crate) fn submit(&self, command: Command) {
        self.commands.lock().push_back(command);
        self.ringer.ring();
    }

    pub(crate) fn send(&self, connection: ConnectionId, message: Bytes) {
        self.submit(Command::Send(connection, message));
    }

    pub(crate) fn close(&self, connection: ConnectionId, code: u16, reason: impl Into<String>) {
        self.submit(Command::Close {
            connection,
            code,
            reason: reason.into(),
        });
    }

    pub(crate) fn take_commands(&self) -> VecDeque<Command> {
        std::mem::take(&mut *self.commands.lock())
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Stop accepting work and wake the I/O thread and every worker.
    pub(crate) fn begin_shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.work.close();
        self.ringer.ring();
    }

    /// Send `call` over `session`'s connection and block for the reply.
    ///
    /// On `Ok`, outputs of a reply with a body are copied back into `call`.
    /// The returned code is the peer's result; transport failures, expiry
    /// and disconnection come back as `Err`.
    pub(crate) fn call<C: RpcCall>(&self, session: &Session, call: &mut C) -> Result<ResultCode> {
        if self.is_shutdown() {
            return Err(PeerError::Shutdown);
        }
        let connection = session.connection();
        if !session.is_connected() {
            return Err(session_closed(session));
        }

        let txn = self.transactions.create(connection, C::FUNCTION);
        let header = RpcHeader::request(C::FUNCTION, txn.id());
        let message = encode_call(self.mode(), &header, Some(&*call))?;
        if message.len() > self.max_message_size() {
            return Err(PeerError::Frame(FrameError::MessageTooLarge {
                size: message.len(),
                max: self.max_message_size(),
            }));
        }

        self.transactions.add(Arc::clone(&txn))?;
        // A disconnect between the first check and `add` would have expired
        // the pool before this transaction was in it.
        if !session.is_connected() {
            self.transactions.take(Some(connection), Some(txn.id()));
            return Err(session_closed(session));
        }

        tracing::trace!(
            function = %C::FUNCTION,
            txn = txn.id(),
            connection,
            size = message.len(),
            "sending request"
        );
        self.send(connection, message);

        let limit = self.transactions.timeout().map(|timeout| timeout + WAIT_GRACE);
        let Some(resolution) = txn.wait(limit) else {
            self.transactions.take(Some(connection), Some(txn.id()));
            return Err(PeerError::Timeout(limit.unwrap_or_default()));
        };

        match resolution.response {
            Some(reply) => {
                let (reply_header, payload) = decode_header(self.mode(), &reply)?;
                if reply_header.result.has_body() {
                    let (_, answered) = decode_call::<C>(self.mode(), payload)?;
                    *call = answered;
                }
                Ok(reply_header.result)
            }
            None if resolution.result == ResultCode::Disconnected => Err(PeerError::Disconnected(
                format!("connection {connection} closed during {}", C::FUNCTION),
            )),
            None => Err(PeerError::Timeout(
                self.transactions.timeout().unwrap_or_default(),
            )),
        }
    }

    /// Match a reply to its pending transaction and wake the caller.
    pub(crate) fn resolve(&self, connection: ConnectionId, header: &RpcHeader, reply: Bytes) {
        match self
            .transactions
            .take(Some(connection), Some(header.transaction_id))
        {
            Some(txn) => {
                txn.signal(header.result, Some(reply));
            }
            None => tracing::debug!(
                connection,
                txn = header.transaction_id,
                function = %header.function,
                "reply for unknown or expired transaction"
            ),
        }
    }
}

fn session_closed(session: &Session) -> PeerError {
    PeerError::Disconnected(format!("session 0x{:X} is closed", session.handle()))
}
