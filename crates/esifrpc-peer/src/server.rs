//! Host side: accept application connections and serve [`EsifServices`].

use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use esifrpc_codec::{Handle, ResultCode, RpcCall};
use esifrpc_frame::ws::frame::close_code;
use esifrpc_frame::ws::handshake::server_handshake;
use esifrpc_frame::{Role, WsDecoder};
use esifrpc_transport::{Doorbell, Endpoint, IpcListener, IpcStream, TransportError};
use parking_lot::Mutex;

use crate::error::{PeerError, Result};
use crate::handshake::handshake_server;
use crate::iface::{EsifServices, Handlers};
use crate::ioloop::{Acceptor, Connection, IoLoop};
use crate::proxy::AppProxy;
use crate::runtime::{Command, PeerConfig, SessionInfo, Shared};
use crate::session::{SessionRef, SessionRegistry};
use crate::transaction::TransactionManager;
use crate::worker::spawn_workers;

/// New-session notices kept for [`ServerHandle::next_session`] before
/// further ones are dropped.
const NEW_SESSION_BACKLOG: usize = 64;

/// A bound, not yet running, host endpoint.
pub struct RpcServer {
    listener: IpcListener,
    endpoint: Endpoint,
    services: Arc<dyn EsifServices>,
    config: PeerConfig,
}

impl RpcServer {
    /// Bind `endpoint`. Port 0 picks a free TCP port; see
    /// [`RpcServer::local_endpoint`].
    pub fn bind(endpoint: &Endpoint, services: Arc<dyn EsifServices>) -> Result<Self> {
        let listener = IpcListener::bind(endpoint)?;
        let endpoint = listener.local_endpoint(endpoint);
        tracing::info!(%endpoint, "rpc server bound");
        Ok(Self {
            listener,
            endpoint,
            services,
            config: PeerConfig::default(),
        })
    }

    pub fn with_config(mut self, config: PeerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn local_endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Start the I/O thread and workers.
    pub fn spawn(self) -> Result<ServerHandle> {
        let doorbell = Doorbell::new()?;
        let workers = self.config.workers;
        let shared = Arc::new(Shared::new(
            self.config,
            Role::Server,
            Handlers::Host(self.services),
            doorbell.ringer(),
        ));
        let (sessions_tx, sessions_rx) = mpsc::sync_channel(NEW_SESSION_BACKLOG);
        let io_loop = IoLoop::new(
            Arc::clone(&shared),
            doorbell,
            Some(Acceptor {
                listener: self.listener,
                sessions: sessions_tx,
            }),
        )?;

        let io_thread = thread::Builder::new()
            .name("esifrpc-io".into())
            .spawn(move || io_loop.run())
            .map_err(TransportError::from)?;
        let workers = match spawn_workers(&shared, workers) {
            Ok(workers) => workers,
            Err(err) => {
                shared.begin_shutdown();
                let _ = io_thread.join();
                return Err(err);
            }
        };

        Ok(ServerHandle {
            shared,
            endpoint: self.endpoint,
            new_sessions: Mutex::new(sessions_rx),
            io_thread: Some(io_thread),
            workers,
        })
    }
}

/// A running host endpoint. Dropping it shuts the endpoint down.
pub struct ServerHandle {
    shared: Arc<Shared>,
    endpoint: Endpoint,
    new_sessions: Mutex<mpsc::Receiver<Handle>>,
    io_thread: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.shared.sessions
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.shared.transactions
    }

    /// Snapshot of every live session.
    pub fn session_infos(&self) -> Vec<SessionInfo> {
        let sessions = &self.shared.sessions;
        let mut infos: Vec<SessionInfo> = sessions
            .handles()
            .into_iter()
            .filter_map(|handle| sessions.by_handle(handle))
            .map(|session| SessionInfo::from(&*session))
            .collect();
        infos.sort_by_key(|info| info.connection);
        infos
    }

    /// Interface table that forwards lifecycle calls to connected apps.
    pub fn app_proxy(&self) -> AppProxy {
        AppProxy::new(Arc::clone(&self.shared))
    }

    /// Accepted connections still in their handshake.
    pub fn pending_handshakes(&self) -> usize {
        self.shared.handshakes.load(Ordering::Acquire)
    }

    /// Wait for the next application to finish its handshake.
    ///
    /// Once 64 sessions sit unclaimed, later ones are not reported here;
    /// [`ServerHandle::session_infos`] still lists every live session.
    pub fn next_session(&self, timeout: Duration) -> Option<Handle> {
        self.new_sessions.lock().recv_timeout(timeout).ok()
    }

    /// Call the application behind `session` directly.
    pub fn call<C: RpcCall>(&self, session: Handle, call: &mut C) -> Result<ResultCode> {
        let session = self.session(session)?;
        self.shared.call(&session, call)
    }

    /// Close one application's connection.
    ///
    /// Waits up to `wait` for calls still holding the session to return.
    /// Returns whether they all did.
    pub fn disconnect(&self, session: Handle, wait: Duration) -> Result<bool> {
        let session = self.session(session)?.session();
        self.shared
            .close(session.connection(), close_code::NORMAL, "closed by host");
        Ok(session.wait_released(wait))
    }

    fn session(&self, handle: Handle) -> Result<SessionRef> {
        self.shared
            .sessions
            .by_handle(handle)
            .ok_or(PeerError::InvalidHandle(handle))
    }

    /// Close every connection and stop all threads.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shared.begin_shutdown();
        if let Some(io_thread) = self.io_thread.take() {
            let _ = io_thread.join();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        tracing::info!(endpoint = %self.endpoint, "rpc server stopped");
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if self.io_thread.is_some() {
            self.stop();
        }
    }
}

/// Counts one accepted connection as mid-handshake until dropped.
struct HandshakeSlot(Arc<Shared>);

impl HandshakeSlot {
    fn acquire(shared: &Arc<Shared>) -> Option<Self> {
        let limit = shared.config.max_pending_handshakes;
        shared
            .handshakes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| {
                (pending < limit).then_some(pending + 1)
            })
            .ok()?;
        Some(Self(Arc::clone(shared)))
    }
}

impl Drop for HandshakeSlot {
    fn drop(&mut self) {
        self.0.handshakes.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Upgrade and handshake an accepted stream off the I/O thread, then hand
/// the connection to the I/O loop.
///
/// Streams accepted while `max_pending_handshakes` are already in progress
/// are closed without a reply.
pub(crate) fn spawn_handshake(
    shared: &Arc<Shared>,
    stream: IpcStream,
    peer: String,
    notify: SyncSender<Handle>,
) {
    let Some(slot) = HandshakeSlot::acquire(shared) else {
        tracing::warn!(
            %peer,
            limit = shared.config.max_pending_handshakes,
            "too many pending handshakes, closing connection"
        );
        let _ = stream.shutdown();
        return;
    };
    let spawned = thread::Builder::new()
        .name("esifrpc-handshake".into())
        .spawn(move || {
            let shared = &slot.0;
            match accept_connection(shared, stream, &peer) {
                Ok(connection) => {
                    let session = connection.session();
                    tracing::info!(%peer, session, "application connected");
                    shared.submit(Command::Adopt(connection));
                    if let Err(TrySendError::Full(_)) = notify.try_send(session) {
                        tracing::debug!(session, "new-session backlog full, notice dropped");
                    }
                }
                Err(err) => tracing::warn!(%peer, error = %err, "connection rejected"),
            }
        });
    if let Err(err) = spawned {
        tracing::warn!(error = %err, "cannot start handshake thread");
    }
}

fn accept_connection(shared: &Shared, mut stream: IpcStream, peer: &str) -> Result<Connection> {
    let config = &shared.config;
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(config.handshake.timeout))?;
    stream.set_write_timeout(Some(config.handshake.timeout))?;

    let (upgrade, leftover) = server_handshake(&mut stream)?;
    tracing::debug!(resource = %upgrade.resource, "websocket upgrade accepted");
    let mut decoder =
        WsDecoder::new(Role::Server, config.ws.max_message_size).with_leftover(leftover.freeze());

    let connection = shared.next_connection_id();
    let mut registered: Option<SessionRef> = None;
    let negotiated = handshake_server(&mut stream, &mut decoder, &config.ws, &config.handshake, |request| {
        let session = shared.sessions.register(connection, peer, request.app_name.clone())?;
        let handle = session.handle();
        registered = Some(session);
        Ok(handle)
    });

    let session = match (negotiated, registered) {
        (Ok(_), Some(session)) => session,
        (result, registered) => {
            if let Some(session) = registered {
                shared.sessions.unregister(session.handle());
            }
            return Err(result.err().unwrap_or_else(|| {
                PeerError::HandshakeFailed("no session was registered".into())
            }));
        }
    };

    let adopted = if shared.is_shutdown() {
        Err(PeerError::Shutdown)
    } else {
        Connection::new(connection, session.handle(), stream, decoder)
    };
    release_on_error(shared, session.handle(), adopted)
}

/// Drop a registered session whose connection never reached the I/O loop.
fn release_on_error<T>(shared: &Shared, session: Handle, result: Result<T>) -> Result<T> {
    if result.is_err() {
        shared.sessions.unregister(session);
    }
    result
}
