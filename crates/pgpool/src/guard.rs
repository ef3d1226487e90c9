//! RAII guard for pooled connections

use crate::connection::{ConnectionFactory, PooledConnection};
use crate::pool::Pool;

/// RAII guard that wraps a checked-out connection.
///
/// When the guard is dropped the connection is released back to its pool.
/// Use `into_inner()` to take the connection and release it explicitly.
pub struct PoolGuard<F: ConnectionFactory> {
    pool: Pool<F>,
    conn: Option<PooledConnection<F::Connection>>,
}

impl<F: ConnectionFactory> PoolGuard<F> {
    pub(crate) fn new(pool: Pool<F>, conn: PooledConnection<F::Connection>) -> Self {
        Self {
            pool,
            conn: Some(conn),
        }
    }

    /// Take the connection out of the guard, preventing the release on drop.
    #[must_use]
    pub fn into_inner(mut self) -> PooledConnection<F::Connection> {
        self.conn.take().expect("guard used after into_inner")
    }
}

impl<F: ConnectionFactory> std::ops::Deref for PoolGuard<F> {
    type Target = PooledConnection<F::Connection>;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("guard used after into_inner")
    }
}

impl<F: ConnectionFactory> std::ops::DerefMut for PoolGuard<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("guard used after into_inner")
    }
}

impl<F: ConnectionFactory> Drop for PoolGuard<F> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let id = conn.id();
            if let Err(error) = self.pool.release(conn) {
                tracing::warn!(connection = %id, %error, "Failed to release connection on guard drop");
            }
        }
    }
}

impl<F: ConnectionFactory> std::fmt::Debug for PoolGuard<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolGuard")
            .field("connection", &self.conn.as_ref().map(PooledConnection::id))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{ConnectOptions, PoolConfig};
    use crate::connection::TransactionStatus;
    use crate::pool::Pool;
    use crate::testing::MockFactory;

    fn pool(factory: &MockFactory) -> Pool<MockFactory> {
        Pool::new(factory.clone(), ConnectOptions::default(), PoolConfig::new(0, 2)).unwrap()
    }

    #[test]
    fn guard_drop_releases() {
        let factory = MockFactory::new();
        let pool = pool(&factory);

        let guard = pool.get().unwrap();
        assert_eq!(pool.in_use_count(), 1);
        drop(guard);

        assert_eq!(pool.in_use_count(), 0);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn guard_drop_runs_release_policy() {
        let factory = MockFactory::new();
        let pool = pool(&factory);

        {
            let guard = pool.get().unwrap();
            guard.probe().set_status(TransactionStatus::InTransaction);
        }

        let probe = factory.probe(0).unwrap();
        assert_eq!(probe.rollbacks(), 1);
        assert_eq!(probe.status(), TransactionStatus::Idle);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn guard_into_inner_prevents_release() {
        let factory = MockFactory::new();
        let pool = pool(&factory);

        let conn = pool.get().unwrap().into_inner();
        assert_eq!(pool.in_use_count(), 1);
        assert_eq!(pool.idle_count(), 0);

        pool.release(conn).unwrap();
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn guard_drop_after_close_all_does_not_panic() {
        let factory = MockFactory::new();
        let pool = pool(&factory);

        let guard = pool.get().unwrap();
        pool.close_all().unwrap();
        drop(guard);

        assert!(factory.probe(0).unwrap().is_closed());
        assert_eq!(pool.idle_count(), 0);
    }
}
