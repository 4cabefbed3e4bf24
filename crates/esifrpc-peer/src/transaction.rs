//! Outstanding request tracking.
//!
//! Every request sent across a connection gets a [`Transaction`]. The caller
//! blocks on it; the I/O loop resolves it when the matching response arrives,
//! when it times out, or when its connection goes away.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use esifrpc_codec::{FunctionId, ResultCode};
use parking_lot::{Condvar, Mutex, RwLock};

use crate::error::{PeerError, Result};
use crate::ConnectionId;

pub type TransactionId = u64;

/// Ids wrap back to 1 before reaching this value; 0 is never used.
pub const TRANSACTION_ID_WRAP: TransactionId = 0xFFFF_FFFF_FFFF_FF00;

/// Pool sizing and expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionConfig {
    /// Age after which a pending transaction is expired. `None` disables
    /// expiry. Default: 45 s.
    pub timeout: Option<Duration>,
    /// Slots added each time the pool fills. Default: 32.
    pub pool_increment: usize,
    /// Hard limit on pool slots. Default: 1024.
    pub pool_max: usize,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(45)),
            pool_increment: 32,
            pool_max: 1024,
        }
    }
}

impl TransactionConfig {
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_pool(mut self, increment: usize, max: usize) -> Self {
        self.pool_increment = increment.max(1);
        self.pool_max = max;
        self
    }
}

/// How a transaction ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub result: ResultCode,
    /// The complete response message, absent when the transaction was
    /// expired locally.
    pub response: Option<Bytes>,
}

#[derive(Debug)]
enum State {
    Pending,
    Resolved(Resolution),
    Consumed,
}

/// One in-flight request.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    connection: ConnectionId,
    function: FunctionId,
    created: Instant,
    state: Mutex<State>,
    resolved: Condvar,
}

impl Transaction {
    fn new(id: TransactionId, connection: ConnectionId, function: FunctionId) -> Self {
        Self {
            id,
            connection,
            function,
            created: Instant::now(),
            state: Mutex::new(State::Pending),
            resolved: Condvar::new(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn function(&self) -> FunctionId {
        self.function
    }

    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.state.lock(), State::Pending)
    }

    /// Resolve the transaction and wake its waiter.
    ///
    /// Only the first signal counts. Returns `false` if the transaction was
    /// already resolved.
    pub fn signal(&self, result: ResultCode, response: Option<Bytes>) -> bool {
        let mut state = self.state.lock();
        if !matches!(*state, State::Pending) {
            return false;
        }
        *state = State::Resolved(Resolution { result, response });
        self.resolved.notify_all();
        true
    }

    /// Block until resolved or until `limit` passes.
    ///
    /// Returns the resolution once; later calls return `None`.
    pub fn wait(&self, limit: Option<Duration>) -> Option<Resolution> {
        let deadline = limit.map(|limit| Instant::now() + limit);
        let mut state = self.state.lock();
        loop {
            if matches!(*state, State::Resolved(_)) {
                if let State::Resolved(resolution) = std::mem::replace(&mut *state, State::Consumed)
                {
                    return Some(resolution);
                }
            }
            if matches!(*state, State::Consumed) {
                return None;
            }
            match deadline {
                None => self.resolved.wait(&mut state),
                Some(deadline) => {
                    if self.resolved.wait_until(&mut state, deadline).timed_out() {
                        if matches!(*state, State::Resolved(_)) {
                            continue;
                        }
                        return None;
                    }
                }
            }
        }
    }
}

/// Pool of pending transactions.
///
/// Slots are reused first-free; the pool grows by `pool_increment` up to
/// `pool_max`.
#[derive(Debug)]
pub struct TransactionManager {
    config: TransactionConfig,
    next_id: AtomicU64,
    pool: RwLock<Vec<Option<Arc<Transaction>>>>,
}

impl TransactionManager {
    pub fn new(config: TransactionConfig) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(1),
            pool: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.config.timeout
    }

    /// Allocate a fresh id and build a transaction for it.
    ///
    /// The transaction is not tracked until [`add`](Self::add) is called.
    pub fn create(&self, connection: ConnectionId, function: FunctionId) -> Arc<Transaction> {
        Arc::new(Transaction::new(self.next_id(), connection, function))
    }

    fn next_id(&self) -> TransactionId {
        let step = |id: u64| Some(if id + 1 >= TRANSACTION_ID_WRAP { 1 } else { id + 1 });
        self.next_id
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, step)
            .unwrap_or_else(|id| id)
    }

    /// Track a transaction in the first free slot.
    pub fn add(&self, txn: Arc<Transaction>) -> Result<()> {
        let mut pool = self.pool.write();
        if let Some(slot) = pool.iter_mut().find(|slot| slot.is_none()) {
            *slot = Some(txn);
            return Ok(());
        }

        let len = pool.len();
        if len >= self.config.pool_max {
            tracing::warn!(max = self.config.pool_max, "transaction pool full");
            return Err(PeerError::Capacity(format!(
                "transaction pool full ({} slots)",
                self.config.pool_max
            )));
        }
        let grown = (len + self.config.pool_increment).min(self.config.pool_max);
        tracing::debug!(from = len, to = grown, "growing transaction pool");
        pool.resize(grown, None);
        pool[len] = Some(txn);
        Ok(())
    }

    /// Remove and return the first transaction matching both filters.
    ///
    /// `None` matches any connection or any id.
    pub fn take(
        &self,
        connection: Option<ConnectionId>,
        id: Option<TransactionId>,
    ) -> Option<Arc<Transaction>> {
        let mut pool = self.pool.write();
        pool.iter_mut()
            .find(|slot| {
                slot.as_deref().is_some_and(|txn| {
                    connection.is_none_or(|c| c == txn.connection) && id.is_none_or(|i| i == txn.id)
                })
            })
            .and_then(Option::take)
    }

    /// Expire every transaction older than `timeout` with `RequestFailed`.
    pub fn expire_timeout(&self, timeout: Duration) -> usize {
        let expired = self.remove_where(|txn| txn.age() >= timeout);
        for txn in &expired {
            tracing::debug!(
                id = txn.id,
                function = %txn.function,
                connection = txn.connection,
                "transaction expired"
            );
            txn.signal(ResultCode::RequestFailed, None);
        }
        expired.len()
    }

    /// Expire every pending transaction.
    pub fn expire_all(&self) -> usize {
        self.expire_timeout(Duration::ZERO)
    }

    /// Resolve every transaction on `connection` with `Disconnected`.
    pub fn expire_connection(&self, connection: ConnectionId) -> usize {
        let expired = self.remove_where(|txn| txn.connection == connection);
        for txn in &expired {
            txn.signal(ResultCode::Disconnected, None);
        }
        if !expired.is_empty() {
            tracing::debug!(connection, count = expired.len(), "expired transactions for closed connection");
        }
        expired.len()
    }

    fn remove_where(&self, mut matches: impl FnMut(&Transaction) -> bool) -> Vec<Arc<Transaction>> {
        let mut pool = self.pool.write();
        pool.iter_mut()
            .filter(|slot| slot.as_deref().is_some_and(&mut matches))
            .filter_map(Option::take)
            .collect()
    }

    /// Time until the oldest pending transaction expires.
    ///
    /// `None` when nothing is pending or expiry is disabled.
    pub fn next_timeout(&self) -> Option<Duration> {
        let timeout = self.config.timeout?;
        self.pool
            .read()
            .iter()
            .flatten()
            .map(|txn| timeout.saturating_sub(txn.age()))
            .min()
    }

    /// Number of tracked transactions.
    pub fn len(&self) -> usize {
        self.pool.read().iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current number of slots.
    pub fn capacity(&self) -> usize {
        self.pool.read().len()
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new(TransactionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn manager(increment: usize, max: usize) -> TransactionManager {
        TransactionManager::new(TransactionConfig::default().with_pool(increment, max))
    }

    #[test]
    fn ids_start_at_one_and_wrap() {
        let manager = TransactionManager::default();
        assert_eq!(manager.create(1, FunctionId::GetConfig).id(), 1);
        assert_eq!(manager.create(1, FunctionId::GetConfig).id(), 2);

        manager
            .next_id
            .store(TRANSACTION_ID_WRAP - 1, Ordering::Relaxed);
        assert_eq!(manager.create(1, FunctionId::GetConfig).id(), TRANSACTION_ID_WRAP - 1);
        assert_eq!(manager.create(1, FunctionId::GetConfig).id(), 1);
    }

    #[test]
    fn pool_grows_in_increments_up_to_max() {
        let manager = manager(4, 10);
        for _ in 0..10 {
            manager.add(manager.create(1, FunctionId::WriteLog)).unwrap();
        }
        assert_eq!(manager.capacity(), 10);
        assert_eq!(manager.len(), 10);
        assert!(matches!(
            manager.add(manager.create(1, FunctionId::WriteLog)),
            Err(PeerError::Capacity(_))
        ));

        let freed = manager.take(None, None).unwrap();
        assert!(freed.is_pending());
        manager.add(manager.create(1, FunctionId::WriteLog)).unwrap();
        assert_eq!(manager.capacity(), 10);
    }

    #[test]
    fn take_matches_connection_and_id() {
        let manager = TransactionManager::default();
        let a = manager.create(1, FunctionId::GetConfig);
        let b = manager.create(2, FunctionId::GetConfig);
        manager.add(Arc::clone(&a)).unwrap();
        manager.add(Arc::clone(&b)).unwrap();

        assert!(manager.take(Some(1), Some(b.id())).is_none());
        assert_eq!(manager.take(Some(2), None).unwrap().id(), b.id());
        assert_eq!(manager.take(None, Some(a.id())).unwrap().id(), a.id());
        assert!(manager.is_empty());
    }

    #[test]
    fn signal_wakes_waiter_once() {
        let manager = TransactionManager::default();
        let txn = manager.create(7, FunctionId::GetConfig);
        manager.add(Arc::clone(&txn)).unwrap();

        let waiter = {
            let txn = Arc::clone(&txn);
            thread::spawn(move || txn.wait(Some(Duration::from_secs(5))))
        };

        let taken = manager.take(Some(7), Some(txn.id())).unwrap();
        assert!(taken.signal(ResultCode::Ok, Some(Bytes::from_static(b"reply"))));
        assert!(!taken.signal(ResultCode::RequestFailed, None));

        let resolution = waiter.join().unwrap().unwrap();
        assert_eq!(resolution.result, ResultCode::Ok);
        assert_eq!(resolution.response.as_deref(), Some(&b"reply"[..]));
        assert!(txn.wait(Some(Duration::ZERO)).is_none());
    }

    #[test]
    fn wait_times_out_when_never_signalled() {
        let txn = TransactionManager::default().create(1, FunctionId::AppGetName);
        let start = Instant::now();
        assert!(txn.wait(Some(Duration::from_millis(30))).is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(txn.is_pending());
    }

    #[test]
    fn timeout_expiry_wakes_exactly_once() {
        let manager = TransactionManager::new(
            TransactionConfig::default().with_timeout(Some(Duration::from_millis(20))),
        );
        let txn = manager.create(3, FunctionId::ExecutePrimitive);
        manager.add(Arc::clone(&txn)).unwrap();

        assert_eq!(manager.expire_timeout(Duration::from_secs(60)), 0);
        let remaining = manager.next_timeout().unwrap();
        assert!(remaining <= Duration::from_millis(20));

        thread::sleep(Duration::from_millis(25));
        assert_eq!(manager.next_timeout(), Some(Duration::ZERO));
        assert_eq!(manager.expire_timeout(Duration::from_millis(20)), 1);
        assert_eq!(manager.expire_timeout(Duration::from_millis(20)), 0);
        assert!(manager.is_empty());
        assert!(manager.next_timeout().is_none());

        assert!(!txn.signal(ResultCode::Ok, None));
        let resolution = txn.wait(None).unwrap();
        assert_eq!(resolution.result, ResultCode::RequestFailed);
        assert!(resolution.response.is_none());
    }

    #[test]
    fn expire_connection_only_touches_that_connection() {
        let manager = TransactionManager::default();
        let mine = manager.create(1, FunctionId::SendCommand);
        let other = manager.create(2, FunctionId::SendCommand);
        manager.add(Arc::clone(&mine)).unwrap();
        manager.add(Arc::clone(&other)).unwrap();

        assert_eq!(manager.expire_connection(1), 1);
        assert_eq!(mine.wait(None).unwrap().result, ResultCode::Disconnected);
        assert!(other.is_pending());

        assert_eq!(manager.expire_all(), 1);
        assert_eq!(other.wait(None).unwrap().result, ResultCode::RequestFailed);
    }

    #[test]
    fn expiry_disabled_has_no_next_timeout() {
        let manager =
            TransactionManager::new(TransactionConfig::default().with_timeout(None));
        manager.add(manager.create(1, FunctionId::GetConfig)).unwrap();
        assert!(manager.next_timeout().is_none());
    }
}
