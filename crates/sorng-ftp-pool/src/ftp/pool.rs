//! Bounded connection pool, generic over a [`ConnectionFactory`].
//!
//! All bookkeeping lives behind one mutex that is never held across an
//! `.await`. A connection is idle, checked out, or *pending* (being
//! created, validated or destroyed); the sum of the three never exceeds
//! `max_total`. Borrowers waiting for capacity park on a `Notify`.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::factory::ConnectionFactory;
use crate::ftp::types::{PoolConfig, PoolStats};
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

struct IdleEntry<C> {
    conn: C,
    idle_since: Instant,
}

struct PoolState<C> {
    idle: VecDeque<IdleEntry<C>>,
    checked_out: usize,
    pending: usize,
    closed: bool,
    created: u64,
    destroyed: u64,
    borrowed: u64,
}

impl<C> PoolState<C> {
    fn live(&self) -> usize {
        self.idle.len() + self.checked_out + self.pending
    }
}

struct Shared<F: ConnectionFactory> {
    factory: F,
    config: PoolConfig,
    state: Mutex<PoolState<F::Connection>>,
    available: Notify,
    evictor: Mutex<Option<JoinHandle<()>>>,
}

impl<F: ConnectionFactory> Shared<F> {
    fn state(&self) -> MutexGuard<'_, PoolState<F::Connection>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Capacity reserved for an in-flight create/validate/destroy. Released on
/// drop unless handed over to the idle set or a borrower.
struct Reservation<'a, F: ConnectionFactory> {
    shared: &'a Shared<F>,
    slots: usize,
}

impl<'a, F: ConnectionFactory> Reservation<'a, F> {
    /// Caller already incremented `pending` under the lock.
    fn held(shared: &'a Shared<F>, slots: usize) -> Self {
        Self { shared, slots }
    }

    /// Move one slot out of `pending`; the caller re-accounts it.
    fn transfer(&mut self, st: &mut PoolState<F::Connection>) {
        st.pending -= 1;
        self.slots -= 1;
    }
}

impl<F: ConnectionFactory> Drop for Reservation<'_, F> {
    fn drop(&mut self) {
        if self.slots == 0 {
            return;
        }
        self.shared.state().pending -= self.slots;
        for _ in 0..self.slots {
            self.shared.available.notify_one();
        }
    }
}

/// A checked-out connection. Give it back with [`Pool::release`] or
/// [`Pool::invalidate`]; dropping it closes the connection and frees its
/// slot.
pub struct Pooled<F: ConnectionFactory> {
    conn: Option<F::Connection>,
    shared: Arc<Shared<F>>,
}

impl<F: ConnectionFactory> Pooled<F> {
    fn take(mut self) -> F::Connection {
        self.conn.take().expect("connection present until released")
    }
}

impl<F: ConnectionFactory> Deref for Pooled<F> {
    type Target = F::Connection;

    fn deref(&self) -> &F::Connection {
        self.conn.as_ref().expect("connection present until released")
    }
}

impl<F: ConnectionFactory> DerefMut for Pooled<F> {
    fn deref_mut(&mut self) -> &mut F::Connection {
        self.conn.as_mut().expect("connection present until released")
    }
}

impl<F: ConnectionFactory> Drop for Pooled<F> {
    fn drop(&mut self) {
        if self.conn.take().is_some() {
            log::warn!("Pooled FTP connection dropped without release; closing it");
            {
                let mut st = self.shared.state();
                st.checked_out -= 1;
                st.destroyed += 1;
            }
            self.shared.available.notify_one();
        }
    }
}

/// Thread-safe pool of factory-made connections.
pub struct Pool<F: ConnectionFactory> {
    shared: Arc<Shared<F>>,
}

impl<F: ConnectionFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

enum Next<C> {
    Validate(C),
    Create,
    Wait,
}

impl<F: ConnectionFactory> Pool<F> {
    pub fn new(factory: F, config: PoolConfig) -> FtpResult<Self> {
        config.validate()?;
        log::info!(
            "FTP pool created (maxTotal={}, maxIdle={}, minIdle={})",
            config.max_total,
            config.max_idle,
            config.min_idle
        );
        Ok(Self {
            shared: Arc::new(Shared {
                factory,
                config,
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    checked_out: 0,
                    pending: 0,
                    closed: false,
                    created: 0,
                    destroyed: 0,
                    borrowed: 0,
                }),
                available: Notify::new(),
                evictor: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub fn factory(&self) -> &F {
        &self.shared.factory
    }

    /// Check a connection out: reuse a valid idle one, create one if under
    /// `max_total`, or wait up to `max_wait` for one to come back.
    ///
    /// Idle connections that fail validation are destroyed and the loop
    /// carries on within the same call.
    pub async fn borrow(&self) -> FtpResult<Pooled<F>> {
        let shared = &*self.shared;
        let deadline = Instant::now() + shared.config.max_wait();

        loop {
            let notified = shared.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next = {
                let mut st = shared.state();
                if st.closed {
                    return Err(FtpError::pool_unavailable("Pool is closed"));
                }
                let entry = if shared.config.lifo {
                    st.idle.pop_back()
                } else {
                    st.idle.pop_front()
                };
                match entry {
                    Some(entry) => {
                        st.pending += 1;
                        Next::Validate(entry.conn)
                    }
                    None if st.live() < shared.config.max_total => {
                        st.pending += 1;
                        Next::Create
                    }
                    None => Next::Wait,
                }
            };

            match next {
                Next::Validate(mut conn) => {
                    let slot = Reservation::held(shared, 1);
                    if shared.config.test_on_borrow && !shared.factory.validate(&mut conn).await {
                        log::warn!("Idle FTP connection failed validation on borrow; replacing it");
                        self.discard(conn, slot).await;
                        continue;
                    }
                    return self.hand_out(conn, slot, false).await;
                }
                Next::Create => {
                    let slot = Reservation::held(shared, 1);
                    match shared.factory.create().await {
                        Ok(conn) => return self.hand_out(conn, slot, true).await,
                        Err(e) => {
                            log::warn!("FTP pool could not create a connection: {}", e);
                            return Err(FtpError::factory_failed(e));
                        }
                    }
                }
                Next::Wait => {
                    log::debug!("FTP pool exhausted; waiting for a connection");
                    if time::timeout_at(deadline, notified).await.is_err() {
                        return Err(FtpError::pool_exhausted(format!(
                            "No connection available within {} ms (maxTotal={})",
                            shared.config.max_wait_ms, shared.config.max_total
                        )));
                    }
                }
            }
        }
    }

    /// Check `conn` out, or destroy it if the pool closed while it was
    /// being created or validated.
    async fn hand_out(
        &self,
        conn: F::Connection,
        mut slot: Reservation<'_, F>,
        fresh: bool,
    ) -> FtpResult<Pooled<F>> {
        let closed = {
            let mut st = self.shared.state();
            if fresh {
                st.created += 1;
            }
            if !st.closed {
                slot.transfer(&mut st);
                st.checked_out += 1;
                st.borrowed += 1;
            }
            st.closed
        };
        if closed {
            self.discard(conn, slot).await;
            return Err(FtpError::pool_unavailable("Pool closed during borrow"));
        }
        Ok(Pooled {
            conn: Some(conn),
            shared: Arc::clone(&self.shared),
        })
    }

    /// Destroy a connection whose slot is held by `slot`.
    async fn discard(&self, conn: F::Connection, slot: Reservation<'_, F>) {
        self.shared.factory.destroy(conn).await;
        self.shared.state().destroyed += 1;
        drop(slot);
    }

    /// Return a checked-out connection to the idle set.
    ///
    /// The connection is destroyed instead when it fails validation (with
    /// `test_on_return`), when the idle set is full, or after `close()`.
    pub async fn release(&self, handle: Pooled<F>) {
        let mut conn = handle.take();
        let shared = &*self.shared;
        let closed = {
            let mut st = shared.state();
            st.checked_out -= 1;
            st.pending += 1;
            st.closed
        };
        let slot = Reservation::held(shared, 1);

        if closed {
            self.discard(conn, slot).await;
            return;
        }
        if shared.config.test_on_return && !shared.factory.validate(&mut conn).await {
            log::warn!("FTP connection failed validation on return; destroying it");
            self.discard(conn, slot).await;
            return;
        }

        let mut slot = slot;
        let rejected = {
            let mut st = shared.state();
            if st.closed || st.idle.len() >= shared.config.max_idle {
                Some(conn)
            } else {
                slot.transfer(&mut st);
                st.idle.push_back(IdleEntry {
                    conn,
                    idle_since: Instant::now(),
                });
                None
            }
        };
        match rejected {
            Some(conn) => {
                log::debug!("FTP pool idle set full or closed; destroying returned connection");
                self.discard(conn, slot).await;
            }
            None => shared.available.notify_one(),
        }
    }

    /// Destroy a checked-out connection and free its slot.
    pub async fn invalidate(&self, handle: Pooled<F>) {
        let conn = handle.take();
        {
            let mut st = self.shared.state();
            st.checked_out -= 1;
            st.pending += 1;
        }
        let slot = Reservation::held(&self.shared, 1);
        log::debug!("Invalidating FTP connection");
        self.discard(conn, slot).await;
    }

    /// Create up to `min(n, max_idle)` idle connections (also bounded by
    /// `max_total`). Failures are logged and skipped. Returns how many
    /// were added.
    pub async fn pre_warm(&self, n: usize) -> usize {
        let shared = &*self.shared;
        let target = n.min(shared.config.max_idle);
        let mut added = 0;
        for _ in 0..target {
            if !self.reserve_idle_slot(target) {
                break;
            }
            let slot = Reservation::held(shared, 1);
            if self.create_idle(slot).await {
                added += 1;
            }
        }
        log::info!("FTP pool pre-warmed {} of {} connections", added, target);
        added
    }

    /// Reserve a slot for a new idle connection while idle + in-flight is
    /// below `idle_target` and the pool is under `max_total`.
    fn reserve_idle_slot(&self, idle_target: usize) -> bool {
        let mut st = self.shared.state();
        if st.closed
            || st.idle.len() + st.pending >= idle_target
            || st.live() >= self.shared.config.max_total
        {
            return false;
        }
        st.pending += 1;
        true
    }

    async fn create_idle(&self, mut slot: Reservation<'_, F>) -> bool {
        let shared = &*self.shared;
        match shared.factory.create().await {
            Ok(conn) => {
                let leftover = {
                    let mut st = shared.state();
                    st.created += 1;
                    if st.closed {
                        Some(conn)
                    } else {
                        slot.transfer(&mut st);
                        st.idle.push_back(IdleEntry {
                            conn,
                            idle_since: Instant::now(),
                        });
                        None
                    }
                };
                match leftover {
                    Some(conn) => {
                        self.discard(conn, slot).await;
                        false
                    }
                    None => {
                        shared.available.notify_one();
                        true
                    }
                }
            }
            Err(e) => {
                log::error!("FTP pool failed to create idle connection: {}", e);
                false
            }
        }
    }

    /// One eviction pass: drop idle connections past the hard timeout,
    /// those past the soft timeout while above `min_idle`, validate the
    /// rest (with `test_while_idle`), then top up to `min_idle`.
    pub async fn evict(&self) {
        let shared = &*self.shared;
        let cfg = &shared.config;
        let now = Instant::now();

        let (victims, survivors) = {
            let mut st = shared.state();
            if st.closed {
                return;
            }
            let mut remaining = st.idle.len();
            let mut victims = Vec::new();
            let mut kept = VecDeque::new();
            for entry in st.idle.drain(..) {
                let age = now.saturating_duration_since(entry.idle_since);
                let expired = age > cfg.min_evictable_idle()
                    || (age > cfg.soft_min_evictable_idle() && remaining > cfg.min_idle);
                if expired {
                    remaining -= 1;
                    victims.push(entry.conn);
                } else {
                    kept.push_back(entry);
                }
            }
            let survivors = if cfg.test_while_idle {
                kept
            } else {
                st.idle = kept;
                VecDeque::new()
            };
            st.pending += victims.len() + survivors.len();
            (victims, survivors)
        };

        if !victims.is_empty() {
            log::debug!("FTP pool evicting {} idle connections", victims.len());
        }
        for conn in victims {
            self.discard(conn, Reservation::held(shared, 1)).await;
        }

        let mut valid = Vec::with_capacity(survivors.len());
        for mut entry in survivors {
            let slot = Reservation::held(shared, 1);
            if shared.factory.validate(&mut entry.conn).await {
                valid.push((entry, slot));
            } else {
                log::warn!("Idle FTP connection failed validation; evicting it");
                self.discard(entry.conn, slot).await;
            }
        }

        let mut leftovers = Vec::new();
        let mut restored = 0;
        {
            let mut st = shared.state();
            for (entry, mut slot) in valid.into_iter().rev() {
                if st.closed {
                    leftovers.push((entry.conn, slot));
                } else {
                    slot.transfer(&mut st);
                    st.idle.push_front(entry);
                    restored += 1;
                }
            }
        }
        // Borrowers may have parked while these were out for validation.
        for _ in 0..restored {
            shared.available.notify_one();
        }
        for (conn, slot) in leftovers {
            self.discard(conn, slot).await;
        }

        self.ensure_min_idle().await;
    }

    async fn ensure_min_idle(&self) {
        let min_idle = self.shared.config.min_idle;
        while self.reserve_idle_slot(min_idle) {
            let slot = Reservation::held(&self.shared, 1);
            if !self.create_idle(slot).await {
                break;
            }
        }
    }

    /// Spawn the background evictor if an interval is configured. Calling
    /// it again is a no-op. The task stops when the pool is closed or
    /// dropped.
    pub fn start_evictor(&self) {
        let Some(interval) = self.shared.config.eviction_interval() else {
            return;
        };
        let mut slot = self
            .shared
            .evictor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_some() {
            return;
        }
        let weak: Weak<Shared<F>> = Arc::downgrade(&self.shared);
        *slot = Some(tokio::spawn(async move {
            loop {
                time::sleep(interval).await;
                let Some(shared) = weak.upgrade() else { break };
                let pool = Pool { shared };
                if pool.shared.state().closed {
                    break;
                }
                pool.evict().await;
            }
        }));
    }

    /// Destroy idle connections and stop eviction. Checked-out connections
    /// are destroyed when released. Idempotent.
    pub async fn close(&self) {
        let drained: Vec<F::Connection> = {
            let mut st = self.shared.state();
            if st.closed {
                return;
            }
            st.closed = true;
            let drained: Vec<_> = st.idle.drain(..).map(|e| e.conn).collect();
            st.pending += drained.len();
            drained
        };
        if let Some(handle) = self
            .shared
            .evictor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            handle.abort();
        }
        self.shared.available.notify_waiters();

        let n = drained.len();
        for conn in drained {
            self.discard(conn, Reservation::held(&self.shared, 1)).await;
        }
        log::info!("FTP pool closed ({} idle connections destroyed)", n);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state().closed
    }

    pub fn stats(&self) -> PoolStats {
        let st = self.shared.state();
        PoolStats {
            idle: st.idle.len(),
            checked_out: st.checked_out,
            total: st.live(),
            max_total: self.shared.config.max_total,
            created: st.created,
            destroyed: st.destroyed,
            borrowed: st.borrowed,
            closed: st.closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ftp::error::FtpErrorKind;
    use crate::ftp::session::FtpSession;
    use crate::ftp::simulated::{MemoryConnectionFactory, MemoryFtpServer};
    use std::time::Duration;

    fn cfg(max_total: usize) -> PoolConfig {
        PoolConfig {
            max_total,
            max_idle: max_total,
            max_wait_ms: 2_000,
            time_between_eviction_runs_ms: 0,
            ..Default::default()
        }
    }

    fn pool_with(config: PoolConfig) -> (Pool<MemoryConnectionFactory>, MemoryFtpServer) {
        let server = MemoryFtpServer::new();
        let pool = Pool::new(MemoryConnectionFactory::new(server.clone()), config).unwrap();
        (pool, server)
    }

    #[tokio::test]
    async fn test_borrow_creates_then_reuses() {
        let (pool, _server) = pool_with(cfg(2));
        let h = pool.borrow().await.unwrap();
        let id = h.id;
        pool.release(h).await;
        assert_eq!(pool.stats().idle, 1);

        let h = pool.borrow().await.unwrap();
        assert_eq!(h.id, id);
        assert_eq!(pool.factory().created(), 1);
        pool.release(h).await;
    }

    #[tokio::test]
    async fn test_third_borrow_waits_for_return() {
        let (pool, _server) = pool_with(cfg(2));
        let a = pool.borrow().await.unwrap();
        let b = pool.borrow().await.unwrap();
        let a_id = a.id;

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move {
                let h = pool.borrow().await.unwrap();
                let id = h.id;
                pool.release(h).await;
                id
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        assert_eq!(pool.stats().total, 2);

        pool.release(a).await;
        assert_eq!(waiter.await.unwrap(), a_id);
        assert_eq!(pool.factory().created(), 2);
        pool.release(b).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_borrow_times_out_when_exhausted() {
        let (pool, _server) = pool_with(PoolConfig {
            max_wait_ms: 500,
            ..cfg(1)
        });
        let _held = pool.borrow().await.unwrap();
        let err = pool.borrow().await.err().unwrap();
        assert_eq!(err.kind, FtpErrorKind::PoolExhausted);
    }

    #[tokio::test]
    async fn test_live_connections_never_exceed_max_total() {
        let (pool, server) = pool_with(cfg(3));
        let mut tasks = Vec::new();
        for _ in 0..12 {
            let pool = pool.clone();
            let server = server.clone();
            tasks.push(tokio::spawn(async move {
                let mut h = pool.borrow().await.unwrap();
                assert!(server.open_sessions() <= 3);
                assert!(pool.stats().total <= 3);
                h.noop().await.unwrap();
                tokio::task::yield_now().await;
                pool.release(h).await;
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert!(pool.factory().created() <= 3);
        assert!(server.open_sessions() <= 3);
    }

    #[tokio::test]
    async fn test_invalid_idle_connection_is_replaced() {
        let (pool, server) = pool_with(cfg(2));
        assert_eq!(pool.pre_warm(2).await, 2);

        server.faults().fail_noop(true);
        let h = pool.borrow().await.unwrap();
        // Both idle sessions failed NOOP; a fresh one was created.
        assert_eq!(h.id, 3);
        assert_eq!(pool.factory().destroyed(), 2);
        assert_eq!(pool.factory().created(), 3);

        // Still failing on return: destroyed rather than kept.
        pool.release(h).await;
        assert_eq!(pool.stats().idle, 0);
        assert_eq!(pool.stats().total, 0);
        assert_eq!(server.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_create_failure_is_factory_failed() {
        let (pool, _server) = pool_with(cfg(1));
        pool.factory().fail_next_creates(1);
        let err = pool.borrow().await.err().unwrap();
        assert_eq!(err.kind, FtpErrorKind::FactoryFailed);
        assert_eq!(
            err.source.as_ref().map(|s| s.kind),
            Some(FtpErrorKind::ConnectionFailed)
        );
        assert_eq!(pool.stats().total, 0);
        assert!(pool.borrow().await.is_ok());
    }

    #[tokio::test]
    async fn test_release_over_max_idle_destroys() {
        let (pool, _server) = pool_with(PoolConfig {
            max_idle: 1,
            ..cfg(3)
        });
        let a = pool.borrow().await.unwrap();
        let b = pool.borrow().await.unwrap();
        pool.release(a).await;
        pool.release(b).await;
        let stats = pool.stats();
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.destroyed, 1);
    }

    #[tokio::test]
    async fn test_invalidate_and_drop_free_capacity() {
        let (pool, server) = pool_with(cfg(1));
        let h = pool.borrow().await.unwrap();
        pool.invalidate(h).await;
        assert_eq!(pool.stats().total, 0);

        let h = pool.borrow().await.unwrap();
        drop(h);
        assert_eq!(pool.stats().total, 0);
        assert_eq!(server.open_sessions(), 0);
        assert!(pool.borrow().await.is_ok());
    }

    #[tokio::test]
    async fn test_pre_warm_skips_failures_and_respects_max_idle() {
        let (pool, _server) = pool_with(PoolConfig {
            max_idle: 3,
            ..cfg(5)
        });
        pool.factory().fail_next_creates(1);
        assert_eq!(pool.pre_warm(10).await, 2);
        assert_eq!(pool.stats().idle, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_and_hard_eviction() {
        let (pool, _server) = pool_with(PoolConfig {
            min_idle: 1,
            min_evictable_idle_ms: 60_000,
            soft_min_evictable_idle_ms: 10_000,
            ..cfg(4)
        });
        pool.pre_warm(3).await;

        time::advance(Duration::from_secs(5)).await;
        pool.evict().await;
        assert_eq!(pool.stats().idle, 3);

        // Past the soft timeout: trimmed down to min_idle.
        time::advance(Duration::from_secs(6)).await;
        pool.evict().await;
        assert_eq!(pool.stats().idle, 1);
        assert_eq!(pool.factory().destroyed(), 2);

        // Past the hard timeout: evicted regardless, then topped back up.
        time::advance(Duration::from_secs(60)).await;
        pool.evict().await;
        let stats = pool.stats();
        assert_eq!(stats.idle, 1);
        assert_eq!(pool.factory().destroyed(), 3);
        assert_eq!(pool.factory().created(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_evictor_runs() {
        let (pool, server) = pool_with(PoolConfig {
            min_evictable_idle_ms: 5_000,
            soft_min_evictable_idle_ms: 5_000,
            time_between_eviction_runs_ms: 1_000,
            ..cfg(2)
        });
        pool.pre_warm(2).await;
        pool.start_evictor();
        time::sleep(Duration::from_secs(8)).await;
        assert_eq!(pool.stats().idle, 0);
        assert_eq!(server.open_sessions(), 0);
        pool.close().await;
    }

    #[tokio::test]
    async fn test_idle_validation_evicts_broken() {
        let (pool, server) = pool_with(cfg(2));
        pool.pre_warm(2).await;
        server.faults().fail_noop(true);
        pool.evict().await;
        assert_eq!(pool.stats().idle, 0);
        assert_eq!(pool.factory().destroyed(), 2);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_rejects_borrow() {
        let (pool, server) = pool_with(cfg(2));
        pool.pre_warm(1).await;
        let out = pool.borrow().await.unwrap();

        pool.close().await;
        pool.close().await;
        assert!(pool.is_closed());
        assert_eq!(pool.stats().idle, 0);

        let err = pool.borrow().await.err().unwrap();
        assert_eq!(err.kind, FtpErrorKind::PoolUnavailable);

        pool.release(out).await;
        assert_eq!(pool.stats().total, 0);
        assert_eq!(server.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_close_wakes_waiters() {
        let (pool, _server) = pool_with(cfg(1));
        let held = pool.borrow().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.borrow().await.err().map(|e| e.kind) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.close().await;
        assert_eq!(waiter.await.unwrap(), Some(FtpErrorKind::PoolUnavailable));
        pool.invalidate(held).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_borrower_woken_when_idle_validation_finishes() {
        let (pool, server) = pool_with(PoolConfig {
            test_on_borrow: false,
            ..cfg(1)
        });
        pool.pre_warm(1).await;
        server.faults().slow_noop(Some(Duration::from_millis(100)));

        let evictor = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.evict().await })
        };
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.stats().idle, 0);

        let started = Instant::now();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move {
                let h = pool.borrow().await?;
                let id = h.id;
                pool.release(h).await;
                Ok::<_, FtpError>(id)
            })
        };
        evictor.await.unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), 1);
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(pool.factory().created(), 1);
    }

    #[tokio::test]
    async fn test_fifo_reuses_oldest_idle() {
        let (pool, _server) = pool_with(PoolConfig {
            lifo: false,
            ..cfg(2)
        });
        let a = pool.borrow().await.unwrap();
        let b = pool.borrow().await.unwrap();
        let (a_id, b_id) = (a.id, b.id);
        pool.release(a).await;
        pool.release(b).await;

        let first = pool.borrow().await.unwrap();
        assert_eq!(first.id, a_id);
        let second = pool.borrow().await.unwrap();
        assert_eq!(second.id, b_id);
        pool.release(first).await;
        pool.release(second).await;

        // Default LIFO hands out the most recent return.
        let (lifo, _server) = pool_with(cfg(2));
        let a = lifo.borrow().await.unwrap();
        let b = lifo.borrow().await.unwrap();
        let b_id = b.id;
        lifo.release(a).await;
        lifo.release(b).await;
        assert_eq!(lifo.borrow().await.unwrap().id, b_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_during_borrow_validation_destroys_connection() {
        let (pool, server) = pool_with(cfg(1));
        pool.pre_warm(1).await;
        server.faults().slow_noop(Some(Duration::from_millis(100)));

        let borrower = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.borrow().await.err().map(|e| e.kind) })
        };
        time::sleep(Duration::from_millis(10)).await;
        pool.close().await;

        assert_eq!(borrower.await.unwrap(), Some(FtpErrorKind::PoolUnavailable));
        assert_eq!(pool.stats().total, 0);
        assert_eq!(pool.factory().destroyed(), 1);
        assert_eq!(server.open_sessions(), 0);
    }
}
