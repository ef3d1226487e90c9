//! Driver-facing traits and the pooled connection handle.
//!
//! The pool never talks to a database itself. A driver plugs in through
//! [`ConnectionFactory`], which opens physical sessions, and [`Connection`],
//! which reports the session state the release policy needs.

use std::fmt;
use std::sync::Weak;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::config::ConnectOptions;
use crate::error::{BoxError, Result};

/// Transaction state reported by a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionStatus {
    /// Session is idle, outside any transaction.
    Idle,
    /// A command is currently in progress.
    Active,
    /// Session is inside a valid transaction block.
    InTransaction,
    /// Session is inside a failed transaction block.
    InError,
    /// Session state cannot be determined (bad connection).
    Unknown,
}

impl TransactionStatus {
    /// Whether a rollback is required before the session can be reused.
    #[must_use]
    pub fn needs_rollback(self) -> bool {
        matches!(self, Self::Active | Self::InTransaction | Self::InError)
    }
}

/// A live database session.
pub trait Connection: Send + 'static {
    /// Close the physical session. Must be idempotent.
    fn close(&mut self);

    /// Whether the session has been closed, by us or by the server.
    fn is_closed(&self) -> bool;

    /// Abort any open transaction, returning the session to [`TransactionStatus::Idle`].
    fn rollback(&mut self) -> std::result::Result<(), BoxError>;

    /// Current transaction state of the session.
    fn transaction_status(&self) -> TransactionStatus;
}

/// Opens physical sessions for a pool.
pub trait ConnectionFactory: Send + Sync + 'static {
    /// The session type produced by this factory.
    type Connection: Connection;

    /// Open a new session to the target described by `options`.
    fn open(&self, options: &ConnectOptions) -> std::result::Result<Self::Connection, BoxError>;
}

/// Identity of a physical connection, assigned when it is opened.
///
/// Carries the owning pool's id so handles from another pool are detected
/// on release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    pool: Uuid,
    seq: u64,
}

impl ConnectionId {
    pub(crate) fn new(pool: Uuid, seq: u64) -> Self {
        Self { pool, seq }
    }

    /// Id of the pool that opened this connection.
    #[must_use]
    pub fn pool(&self) -> Uuid {
        self.pool
    }

    /// Per-pool sequence number, starting at 0.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.pool, self.seq)
    }
}

/// The pool a checked-out connection belongs to.
pub(crate) trait ConnectionOwner<C: Connection>: Send + Sync {
    /// Take a handle back through the owner's release path.
    fn reclaim(&self, conn: PooledConnection<C>) -> Result<()>;

    /// Drop bookkeeping for a handle that was closed without being released.
    fn forget(&self, id: ConnectionId);
}

/// A connection checked out of a [`Pool`](crate::Pool).
///
/// Exclusively owns the driver session while the caller holds it. Hand it
/// back with [`Pool::release`](crate::Pool::release). A handle dropped
/// without release closes its session and the owning pool stops counting it.
pub struct PooledConnection<C: Connection> {
    conn: C,
    id: ConnectionId,
    created_at: Instant,
    owner: Option<Weak<dyn ConnectionOwner<C>>>,
}

impl<C: Connection> PooledConnection<C> {
    pub(crate) fn new(conn: C, id: ConnectionId, created_at: Instant) -> Self {
        Self {
            conn,
            id,
            created_at,
            owner: None,
        }
    }

    /// Identity assigned when the session was opened.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// When the physical session was opened.
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Time since the physical session was opened.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Tie the handle to the pool that checked it out.
    pub(crate) fn attach(&mut self, owner: Weak<dyn ConnectionOwner<C>>) {
        self.owner = Some(owner);
    }

    /// Untie the handle from its pool, so dropping it has no side effects.
    pub(crate) fn detach(&mut self) -> Option<Weak<dyn ConnectionOwner<C>>> {
        self.owner.take()
    }
}

impl<C: Connection> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        let Some(owner) = self.owner.take() else {
            return;
        };
        if !self.conn.is_closed() {
            self.conn.close();
        }
        if let Some(owner) = owner.upgrade() {
            owner.forget(self.id);
        }
    }
}

impl<C: Connection> std::ops::Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.conn
    }
}

impl<C: Connection> std::ops::DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.conn
    }
}

impl<C: Connection + fmt::Debug> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("conn", &self.conn)
            .finish_non_exhaustive()
    }
}
