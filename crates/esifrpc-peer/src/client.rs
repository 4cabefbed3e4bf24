//! Application side: connect to a host and serve [`AppInterface`].

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use esifrpc_codec::{Handle, ResultCode, RpcCall};
use esifrpc_frame::ws::handshake::client_handshake;
use esifrpc_frame::{Role, WsDecoder};
use esifrpc_transport::{Doorbell, Endpoint, IpcStream, TransportError};

use crate::error::{PeerError, Result};
use crate::handshake::{handshake_client, HandshakeResult};
use crate::iface::{AppInterface, Handlers};
use crate::ioloop::{Connection, IoLoop};
use crate::proxy::EsifProxy;
use crate::runtime::{PeerConfig, Shared};
use crate::transaction::TransactionManager;
use crate::worker::spawn_workers;

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// A connected application endpoint. Dropping it closes the connection.
pub struct RpcClient {
    shared: Arc<Shared>,
    endpoint: Endpoint,
    info: HandshakeResult,
    session: Handle,
    io_thread: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl RpcClient {
    /// Connect with default configuration.
    pub fn connect(endpoint: &Endpoint, app: Arc<dyn AppInterface>) -> Result<Self> {
        Self::connect_with_config(endpoint, app, PeerConfig::default())
    }

    /// Connect, upgrade, handshake and start serving `app`.
    ///
    /// A refused or missing endpoint is retried until
    /// `config.connect_timeout` elapses.
    pub fn connect_with_config(
        endpoint: &Endpoint,
        app: Arc<dyn AppInterface>,
        config: PeerConfig,
    ) -> Result<Self> {
        let mut stream = connect_retrying(endpoint, config.connect_timeout)?;
        stream.set_read_timeout(Some(config.handshake.timeout))?;
        stream.set_write_timeout(Some(config.handshake.timeout))?;

        let leftover = client_handshake(&mut stream, &endpoint.host_header(), endpoint.resource())?;
        let mut decoder =
            WsDecoder::new(Role::Client, config.ws.max_message_size).with_leftover(leftover.freeze());
        let info = handshake_client(&mut stream, &mut decoder, &config.ws, &config.handshake)?;
        tracing::info!(
            %endpoint,
            session = info.session_handle,
            version = %info.protocol_version,
            "connected to host"
        );

        let doorbell = Doorbell::new()?;
        let workers = config.workers;
        let app_name = config.handshake.app_name.clone();
        let shared = Arc::new(Shared::new(config, Role::Client, Handlers::App(app), doorbell.ringer()));

        let connection = shared.next_connection_id();
        let peer = stream.peer_address();
        let session = shared.sessions.register(connection, peer, app_name)?.handle();
        let io_loop = IoLoop::new(Arc::clone(&shared), doorbell, None)?
            .with_connection(Connection::new(connection, session, stream, decoder)?);

        let io_thread = thread::Builder::new()
            .name("esifrpc-client-io".into())
            .spawn(move || io_loop.run())
            .map_err(TransportError::from)?;
        let mut client = Self {
            shared: Arc::clone(&shared),
            endpoint: endpoint.clone(),
            info,
            session,
            io_thread: Some(io_thread),
            workers: Vec::new(),
        };
        client.workers = spawn_workers(&shared, workers)?;
        Ok(client)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// What the handshake negotiated, including the host-assigned session
    /// handle.
    pub fn info(&self) -> &HandshakeResult {
        &self.info
    }

    pub fn session_handle(&self) -> Handle {
        self.info.session_handle
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.shared.transactions
    }

    /// Whether the connection to the host is still up.
    pub fn is_connected(&self) -> bool {
        self.shared
            .sessions
            .by_handle(self.session)
            .is_some_and(|session| session.is_connected())
    }

    /// Call an ESIF service on the host and wait for the reply.
    pub fn call<C: RpcCall>(&self, call: &mut C) -> Result<ResultCode> {
        let session = self.shared.sessions.by_handle(self.session).ok_or_else(|| {
            PeerError::Disconnected(format!("connection to {} is closed", self.endpoint))
        })?;
        self.shared.call(&session, call)
    }

    /// Interface table that forwards ESIF service calls to the host.
    pub fn esif_proxy(&self) -> EsifProxy {
        EsifProxy::new(Arc::clone(&self.shared), self.session)
    }

    /// Close the connection and stop all threads.
    pub fn close(mut self) {
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
        tracing::debug!(endpoint = %self.endpoint, "client closed");
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        if self.io_thread.is_some() {
            self.stop();
        }
    }
}

fn connect_retrying(endpoint: &Endpoint, limit: Duration) -> Result<IpcStream> {
    let deadline = Instant::now() + limit;
    loop {
        match esifrpc_transport::connect(endpoint) {
            Ok(stream) => return Ok(stream),
            Err(TransportError::Connect { source, .. })
                if is_retryable(&source) && Instant::now() < deadline =>
            {
                tracing::trace!(%endpoint, error = %source, "connect refused, retrying");
                thread::sleep(CONNECT_RETRY_INTERVAL);
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn is_retryable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
    )
}
