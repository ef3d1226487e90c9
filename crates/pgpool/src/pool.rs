//! Bounded, fail-fast pool of database sessions.
//!
//! `Pool<F>` opens sessions through `F: ConnectionFactory`, hands them out
//! by moving ownership to the caller, and takes them back through
//! [`Pool::release`], where the [release policy](crate::release) decides
//! whether a session is recycled, rolled back first, or closed.
//!
//! Every mutation of pool state happens under one lock per pool. The
//! factory `open` and the `rollback`/`close` I/O run while that lock is
//! held, so two callers never observe a half-updated pool.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::config::{AdmissionPolicy, ConnectOptions, MAX_LIFETIME_CEILING_SECS, PoolConfig};
use crate::connection::{
    Connection, ConnectionFactory, ConnectionId, ConnectionOwner, PooledConnection,
    TransactionStatus,
};
use crate::error::{Error, Result};
use crate::guard::PoolGuard;
use crate::release::{self, ReleaseDecision};

/// Pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections currently waiting in the idle set.
    pub idle: usize,
    /// Connections currently checked out.
    pub in_use: usize,
    /// Connections still held by callers across a [`Pool::close_all`].
    /// They stay open until released or dropped.
    pub abandoned: usize,
    /// Physical connections ever opened by this pool.
    pub total_issued: usize,
    /// Connections permanently removed (closed, expired or found dead).
    pub discarded: u64,
    /// Total successful acquisitions.
    pub acquisitions: u64,
    /// Total accepted releases.
    pub releases: u64,
    /// Rollbacks issued on release.
    pub rollbacks: u64,
}

/// Mutable pool state. Only ever touched under `PoolInner::state`.
struct PoolState<C: Connection> {
    idle: VecDeque<PooledConnection<C>>,
    /// Checked-out connection ids, mapped to their creation instant.
    in_use: HashMap<ConnectionId, Instant>,
    /// Ids forgotten by `close_all` whose sessions callers still hold open.
    abandoned: HashSet<ConnectionId>,
    next_seq: u64,
    total_issued: usize,
    discarded: u64,
    acquisitions: u64,
    releases: u64,
    rollbacks: u64,
}

impl<C: Connection> PoolState<C> {
    fn new(capacity: usize) -> Self {
        Self {
            idle: VecDeque::with_capacity(capacity),
            in_use: HashMap::with_capacity(capacity),
            abandoned: HashSet::new(),
            next_seq: 0,
            total_issued: 0,
            discarded: 0,
            acquisitions: 0,
            releases: 0,
            rollbacks: 0,
        }
    }

    /// Stamp a freshly opened session and count it as issued.
    fn register_open(&mut self, pool: Uuid, conn: C) -> PooledConnection<C> {
        let id = ConnectionId::new(pool, self.next_seq);
        self.next_seq += 1;
        self.total_issued += 1;
        PooledConnection::new(conn, id, Instant::now())
    }

    fn check_out(&mut self, conn: &mut PooledConnection<C>, owner: Weak<dyn ConnectionOwner<C>>) {
        self.in_use.insert(conn.id(), conn.created_at());
        self.acquisitions += 1;
        conn.attach(owner);
    }

    /// Physical sessions this pool opened that are still open.
    fn live(&self) -> usize {
        self.idle.len() + self.in_use.len() + self.abandoned.len()
    }

    fn admits(&self, config: &PoolConfig) -> bool {
        match config.admission {
            AdmissionPolicy::Cumulative => self.total_issued < config.max_size,
            AdmissionPolicy::Live => self.live() < config.max_size,
        }
    }

    fn discard(&mut self, conn: &mut PooledConnection<C>) {
        if !conn.is_closed() {
            conn.close();
        }
        self.discarded += 1;
    }

    /// Verify that the idle set and in-use registry agree with each other
    /// and with the issued count.
    fn check_consistency(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.idle.len());
        for conn in &self.idle {
            if self.in_use.contains_key(&conn.id()) {
                return Err(Error::internal(format!(
                    "connection {} is both idle and in use",
                    conn.id()
                )));
            }
            if !seen.insert(conn.id()) {
                return Err(Error::internal(format!(
                    "connection {} is queued twice in the idle set",
                    conn.id()
                )));
            }
        }
        if let Some(id) = self.abandoned.iter().find(|id| self.in_use.contains_key(id)) {
            return Err(Error::internal(format!(
                "connection {id} is both abandoned and in use"
            )));
        }
        let tracked = self.live();
        if tracked > self.total_issued {
            return Err(Error::internal(format!(
                "{tracked} connections tracked but only {} ever issued",
                self.total_issued
            )));
        }
        Ok(())
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            idle: self.idle.len(),
            in_use: self.in_use.len(),
            abandoned: self.abandoned.len(),
            total_issued: self.total_issued,
            discarded: self.discarded,
            acquisitions: self.acquisitions,
            releases: self.releases,
            rollbacks: self.rollbacks,
        }
    }
}

/// Inner shared state for the pool.
struct PoolInner<F: ConnectionFactory> {
    id: Uuid,
    factory: F,
    options: ConnectOptions,
    config: PoolConfig,
    state: Mutex<PoolState<F::Connection>>,
}

impl<F: ConnectionFactory> PoolInner<F> {
    fn expired(&self, conn: &PooledConnection<F::Connection>) -> bool {
        self.config
            .max_lifetime()
            .is_some_and(|max| conn.age() > max)
    }

    fn release(&self, mut conn: PooledConnection<F::Connection>) -> Result<()> {
        let id = conn.id();
        if id.pool() != self.id {
            return self.reject_foreign(conn);
        }
        // released explicitly, so dropping the handle below must not call back
        conn.detach();

        let mut state = self.state.lock();
        if state.in_use.remove(&id).is_none() {
            let abandoned = state.abandoned.remove(&id);
            state.discard(&mut conn);
            tracing::warn!(
                pool = %self.id,
                connection = %id,
                abandoned,
                "Rejected release of untracked connection, closed it"
            );
            return Err(Error::InvalidRelease { connection: id });
        }
        state.releases += 1;

        let decision = release::decide(&*conn, conn.age(), self.config.max_lifetime());
        tracing::debug!(pool = %self.id, connection = %id, ?decision, "Releasing connection");

        match decision {
            ReleaseDecision::Forget => state.discarded += 1,
            ReleaseDecision::Expire | ReleaseDecision::Discard => state.discard(&mut conn),
            ReleaseDecision::Recycle => state.idle.push_back(conn),
            ReleaseDecision::Rollback => {
                state.rollbacks += 1;
                match conn.rollback() {
                    Ok(())
                        if !conn.is_closed()
                            && conn.transaction_status() == TransactionStatus::Idle =>
                    {
                        state.idle.push_back(conn);
                    }
                    Ok(()) => {
                        tracing::warn!(
                            pool = %self.id,
                            connection = %id,
                            status = ?conn.transaction_status(),
                            "Connection not idle after rollback, discarding"
                        );
                        state.discard(&mut conn);
                    }
                    Err(error) => {
                        tracing::warn!(
                            pool = %self.id,
                            connection = %id,
                            %error,
                            "Rollback failed, discarding connection"
                        );
                        state.discard(&mut conn);
                    }
                }
            }
        }
        Ok(())
    }

    /// Hand a connection checked out of another pool back to that pool.
    /// This pool's state is not touched.
    fn reject_foreign(&self, mut conn: PooledConnection<F::Connection>) -> Result<()> {
        let id = conn.id();
        match conn.detach().and_then(|owner| owner.upgrade()) {
            Some(owner) => {
                if let Err(error) = owner.reclaim(conn) {
                    tracing::warn!(connection = %id, %error, "Owning pool refused connection");
                }
            }
            None => {
                // owning pool is gone
                if !conn.is_closed() {
                    conn.close();
                }
            }
        }
        tracing::warn!(
            pool = %self.id,
            connection = %id,
            owner = %id.pool(),
            "Rejected release of connection from another pool"
        );
        Err(Error::InvalidRelease { connection: id })
    }
}

impl<F: ConnectionFactory> ConnectionOwner<F::Connection> for PoolInner<F> {
    fn reclaim(&self, conn: PooledConnection<F::Connection>) -> Result<()> {
        self.release(conn)
    }

    fn forget(&self, id: ConnectionId) {
        let mut state = self.state.lock();
        if state.in_use.remove(&id).is_some() || state.abandoned.remove(&id) {
            state.discarded += 1;
            tracing::warn!(pool = %self.id, connection = %id, "Connection dropped without release, closed it");
        }
    }
}

/// Bounded pool of database connections.
///
/// Cloning is cheap and yields another handle to the same pool.
pub struct Pool<F: ConnectionFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ConnectionFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ConnectionFactory> std::fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("Pool")
            .field("id", &self.inner.id)
            .field("target", &self.inner.options.target())
            .field("stats", &stats)
            .finish()
    }
}

impl<F: ConnectionFactory> Pool<F> {
    /// Create a pool and eagerly open `config.min_size` connections.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if `config` is invalid, before any
    /// connection is opened. Returns [`Error::ConnectionFailed`] if a
    /// pre-filled connection cannot be opened; connections opened so far are
    /// closed and no pool is returned.
    #[tracing::instrument(skip_all, fields(target = %options.target()))]
    pub fn new(factory: F, options: ConnectOptions, config: PoolConfig) -> Result<Self> {
        config.validate()?;
        if config.max_lifetime_secs > MAX_LIFETIME_CEILING_SECS {
            tracing::debug!(
                requested = config.max_lifetime_secs,
                ceiling = MAX_LIFETIME_CEILING_SECS,
                "Clamping max connection lifetime"
            );
        }
        let config = config.clamped();

        let id = Uuid::new_v4();
        let mut state = PoolState::new(config.max_size);
        for _ in 0..config.min_size {
            match factory.open(&options) {
                Ok(conn) => {
                    let conn = state.register_open(id, conn);
                    state.idle.push_back(conn);
                }
                Err(source) => {
                    for mut conn in state.idle.drain(..) {
                        conn.close();
                    }
                    tracing::warn!(error = %source, "Failed to pre-fill connection pool");
                    return Err(Error::connection_failed(options.target(), source));
                }
            }
        }

        tracing::info!(
            pool = %id,
            min_size = config.min_size,
            max_size = config.max_size,
            max_lifetime_secs = config.max_lifetime_secs,
            "Created connection pool"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                id,
                factory,
                options,
                config,
                state: Mutex::new(state),
            }),
        })
    }

    /// Unique id of this pool; every [`ConnectionId`] it issues carries it.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Effective configuration, after clamping.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Check out a connection.
    ///
    /// Reuses the oldest idle connection if there is one. Otherwise opens a
    /// new one if the admission policy allows it, and fails immediately
    /// with [`Error::PoolExhausted`] if it does not. Never waits.
    ///
    /// Idle connections that have died or outlived the maximum lifetime are
    /// closed on the way. Under [`AdmissionPolicy::Cumulative`] they are not
    /// replaced, so a pool whose idle set has all expired reports exhaustion.
    pub fn acquire(&self) -> Result<PooledConnection<F::Connection>> {
        let inner = &*self.inner;
        let owner: Weak<dyn ConnectionOwner<F::Connection>> = Arc::<PoolInner<F>>::downgrade(&self.inner);
        let mut state = inner.state.lock();

        while let Some(mut conn) = state.idle.pop_front() {
            if conn.is_closed() || inner.expired(&conn) {
                tracing::debug!(
                    pool = %inner.id,
                    connection = %conn.id(),
                    closed = conn.is_closed(),
                    "Discarding stale idle connection"
                );
                state.discard(&mut conn);
                continue;
            }
            state.check_out(&mut conn, owner);
            tracing::debug!(pool = %inner.id, connection = %conn.id(), "Reused idle connection");
            return Ok(conn);
        }

        if !state.admits(&inner.config) {
            tracing::debug!(
                pool = %inner.id,
                in_use = state.in_use.len(),
                total_issued = state.total_issued,
                "Connection pool exhausted"
            );
            return Err(Error::PoolExhausted {
                in_use: state.in_use.len(),
                max_size: inner.config.max_size,
            });
        }

        let conn = inner.factory.open(&inner.options).map_err(|source| {
            tracing::warn!(pool = %inner.id, error = %source, "Failed to open connection");
            Error::connection_failed(inner.options.target(), source)
        })?;
        let mut conn = state.register_open(inner.id, conn);
        state.check_out(&mut conn, owner);
        tracing::debug!(pool = %inner.id, connection = %conn.id(), "Opened new connection");
        Ok(conn)
    }

    /// Check out a connection wrapped in a guard that releases it on drop.
    pub fn get(&self) -> Result<PoolGuard<F>> {
        let conn = self.acquire()?;
        Ok(PoolGuard::new(self.clone(), conn))
    }

    /// Return a connection to the pool.
    ///
    /// Closed, expired and unrecoverable connections are dropped; connections
    /// with an open or failed transaction are rolled back before they are
    /// recycled. A connection is only ever queued idle in a clean state.
    ///
    /// # Errors
    /// Returns [`Error::InvalidRelease`] if `conn` is not checked out of this
    /// pool. A connection from another pool is handed back to the pool that
    /// issued it and this pool is left untouched. A connection outstanding
    /// across [`close_all`](Self::close_all) is closed.
    pub fn release(&self, conn: PooledConnection<F::Connection>) -> Result<()> {
        self.inner.release(conn)
    }

    /// Close every idle connection and forget checked-out ones.
    ///
    /// Connections still held by callers are not closed; releasing them later
    /// reports [`Error::InvalidRelease`]. Until they are released or dropped
    /// they still count against [`AdmissionPolicy::Live`].
    ///
    /// # Errors
    /// Returns [`Error::Internal`] if pool bookkeeping is inconsistent, in
    /// which case nothing is closed.
    #[tracing::instrument(skip_all, fields(pool = %self.inner.id))]
    pub fn close_all(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        state.check_consistency()?;

        let closed = state.idle.len();
        for mut conn in state.idle.drain(..) {
            if !conn.is_closed() {
                conn.close();
            }
        }
        state.discarded += closed as u64;

        let held: Vec<ConnectionId> = state.in_use.drain().map(|(id, _)| id).collect();
        let abandoned = held.len();
        state.abandoned.extend(held);

        tracing::info!(closed, abandoned, "Closed all idle connections");
        Ok(())
    }

    /// Number of idle connections.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    /// Number of checked-out connections.
    #[must_use]
    pub fn in_use_count(&self) -> usize {
        self.inner.state.lock().in_use.len()
    }

    /// Physical connections ever opened by this pool.
    #[must_use]
    pub fn total_issued(&self) -> usize {
        self.inner.state.lock().total_issued
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.inner.state.lock().stats()
    }

    /// Whether no id is both idle and in use. Test-only view of I1.
    #[cfg(test)]
    fn disjoint(&self) -> bool {
        let state = self.inner.state.lock();
        state.idle.iter().all(|c| !state.in_use.contains_key(&c.id()))
    }
}
