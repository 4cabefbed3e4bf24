//! Live sessions, one per handshaken connection.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use esifrpc_codec::{Handle, INVALID_HANDLE};
use parking_lot::{Condvar, Mutex, RwLock};

use crate::error::{PeerError, Result};
use crate::handle::{HandleConfig, HandleGenerator};
use crate::ConnectionId;

const MAX_HANDLE_ATTEMPTS: usize = 64;

/// State shared by everything that talks to one connected peer.
pub struct Session {
    handle: Handle,
    connection: ConnectionId,
    peer_address: String,
    app_name: Option<String>,
    app_handle: AtomicU64,
    connected: AtomicBool,
    created: Instant,
    last_activity: Mutex<Instant>,
    refs: Mutex<usize>,
    released: Condvar,
}

impl Session {
    fn new(
        handle: Handle,
        connection: ConnectionId,
        peer_address: String,
        app_name: Option<String>,
    ) -> Self {
        let now = Instant::now();
        Self {
            handle,
            connection,
            peer_address,
            app_name,
            app_handle: AtomicU64::new(INVALID_HANDLE),
            connected: AtomicBool::new(true),
            created: now,
            last_activity: Mutex::new(now),
            refs: Mutex::new(0),
            released: Condvar::new(),
        }
    }

    /// Handle this side assigned to the session.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Address of the connected peer, as the transport reports it.
    pub fn peer_address(&self) -> &str {
        &self.peer_address
    }

    /// Name the peer announced in its handshake, if any.
    pub fn app_name(&self) -> Option<&str> {
        self.app_name.as_deref()
    }

    /// Handle the peer assigned to its application instance, once known.
    pub fn app_handle(&self) -> Option<Handle> {
        match self.app_handle.load(Ordering::Acquire) {
            INVALID_HANDLE => None,
            handle => Some(handle),
        }
    }

    fn set_app_handle(&self, handle: Handle) {
        self.app_handle.store(handle, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    /// When the last message arrived from the peer.
    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    /// Time since the last message arrived from the peer.
    pub fn idle(&self) -> Duration {
        self.last_activity().elapsed()
    }

    pub(crate) fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Outstanding [`SessionRef`]s.
    pub fn ref_count(&self) -> usize {
        *self.refs.lock()
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
    }

    fn acquire(self: &Arc<Self>) -> SessionRef {
        *self.refs.lock() += 1;
        SessionRef(Arc::clone(self))
    }

    fn release(&self) {
        let mut refs = self.refs.lock();
        *refs = refs.saturating_sub(1);
        if *refs == 0 {
            self.released.notify_all();
        }
    }

    /// Wait until every [`SessionRef`] has been dropped.
    ///
    /// Returns `false` if references remain after `limit`.
    pub fn wait_released(&self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        let mut refs = self.refs.lock();
        while *refs > 0 {
            if self.released.wait_until(&mut refs, deadline).timed_out() {
                return *refs == 0;
            }
        }
        true
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("handle", &format_args!("0x{:X}", self.handle))
            .field("connection", &self.connection)
            .field("peer_address", &self.peer_address)
            .field("app_name", &self.app_name)
            .field("app_handle", &self.app_handle())
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Counted reference to a [`Session`]; dropping it releases the count.
pub struct SessionRef(Arc<Session>);

impl SessionRef {
    /// The underlying session, detached from the reference count.
    pub fn session(&self) -> Arc<Session> {
        Arc::clone(&self.0)
    }
}

impl Deref for SessionRef {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.0
    }
}

impl Clone for SessionRef {
    fn clone(&self) -> Self {
        self.0.acquire()
    }
}

impl Drop for SessionRef {
    fn drop(&mut self) {
        self.0.release();
    }
}

impl fmt::Debug for SessionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// All live sessions of one runtime, plus per-thread bindings.
///
/// A thread binding lets a caller route a sequence of calls to a session
/// before the peer has assigned an app handle.
#[derive(Debug)]
pub struct SessionRegistry {
    handles: HandleGenerator,
    sessions: RwLock<HashMap<Handle, Arc<Session>>>,
    threads: RwLock<HashMap<ThreadId, Handle>>,
}

impl SessionRegistry {
    pub fn new(config: HandleConfig) -> Self {
        Self {
            handles: HandleGenerator::new(config),
            sessions: RwLock::new(HashMap::new()),
            threads: RwLock::new(HashMap::new()),
        }
    }

    /// Create a session under a fresh handle unique among live sessions.
    pub fn register(
        &self,
        connection: ConnectionId,
        peer_address: impl Into<String>,
        app_name: Option<String>,
    ) -> Result<SessionRef> {
        let peer_address = peer_address.into();
        let mut sessions = self.sessions.write();
        for _ in 0..MAX_HANDLE_ATTEMPTS {
            let handle = self.handles.next_handle();
            if sessions.contains_key(&handle) {
                tracing::trace!(handle, "handle collision, retrying");
                continue;
            }
            let session = Arc::new(Session::new(handle, connection, peer_address, app_name));
            let session_ref = session.acquire();
            sessions.insert(handle, Arc::clone(&session));
            tracing::debug!(handle, connection, peer = %session.peer_address, "session registered");
            return Ok(session_ref);
        }
        Err(PeerError::Capacity(format!(
            "no unique session handle after {MAX_HANDLE_ATTEMPTS} attempts"
        )))
    }

    pub fn by_handle(&self, handle: Handle) -> Option<SessionRef> {
        self.sessions.read().get(&handle).map(Session::acquire)
    }

    pub fn by_connection(&self, connection: ConnectionId) -> Option<SessionRef> {
        self.find(|session| session.connection == connection)
    }

    /// Session whose peer assigned `app_handle` to its application.
    pub fn by_app_handle(&self, app_handle: Handle) -> Option<SessionRef> {
        if app_handle == INVALID_HANDLE {
            return None;
        }
        self.find(|session| session.app_handle() == Some(app_handle))
    }

    /// Record the app handle the peer of `session` reported from `AppCreate`.
    ///
    /// App handles are unique among live sessions: one already held by
    /// another session is refused and `session` keeps what it had.
    pub fn assign_app_handle(&self, session: Handle, app_handle: Handle) -> Result<()> {
        if app_handle == INVALID_HANDLE {
            return Err(PeerError::InvalidHandle(app_handle));
        }
        let sessions = self.sessions.write();
        if let Some(owner) = sessions
            .values()
            .find(|other| other.handle != session && other.app_handle() == Some(app_handle))
        {
            return Err(PeerError::AppHandleInUse {
                app_handle,
                session: owner.handle,
            });
        }
        let target = sessions.get(&session).ok_or(PeerError::InvalidHandle(session))?;
        target.set_app_handle(app_handle);
        Ok(())
    }

    /// Note that the peer of `handle` was just heard from.
    pub(crate) fn touch(&self, handle: Handle) {
        if let Some(session) = self.sessions.read().get(&handle) {
            session.touch();
        }
    }

    /// Session bound to the calling thread.
    pub fn by_thread(&self) -> Option<SessionRef> {
        let handle = *self.threads.read().get(&thread::current().id())?;
        self.by_handle(handle)
    }

    fn find(&self, pred: impl Fn(&Session) -> bool) -> Option<SessionRef> {
        self.sessions
            .read()
            .values()
            .find(|session| pred(session))
            .map(Session::acquire)
    }

    /// Bind the calling thread to a live session.
    pub fn bind_thread(&self, handle: Handle) -> Result<()> {
        if !self.sessions.read().contains_key(&handle) {
            return Err(PeerError::InvalidHandle(handle));
        }
        self.threads.write().insert(thread::current().id(), handle);
        Ok(())
    }

    /// Drop the calling thread's binding, returning the handle it had.
    pub fn unbind_thread(&self) -> Option<Handle> {
        self.threads.write().remove(&thread::current().id())
    }

    /// Mark a session disconnected and remove it.
    ///
    /// Outstanding references stay valid; use [`Session::wait_released`] on
    /// the returned session to wait for them.
    pub fn unregister(&self, handle: Handle) -> Option<Arc<Session>> {
        let session = self.sessions.write().remove(&handle)?;
        session.mark_disconnected();
        self.threads.write().retain(|_, bound| *bound != handle);
        tracing::debug!(
            handle,
            connection = session.connection,
            refs = session.ref_count(),
            "session unregistered"
        );
        Some(session)
    }

    /// Handles of all live sessions.
    pub fn handles(&self) -> Vec<Handle> {
        self.sessions.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(HandleConfig::default())
    }
}
