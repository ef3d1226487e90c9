//! # pgpool
//!
//! A bounded pool of reusable database connections. The pool hands a
//! connection to a caller, takes it back on release, and recycles, rolls back
//! or closes it depending on its transaction state and age. It never opens
//! more than the configured number of physical connections and fails fast
//! instead of queueing when that ceiling is reached.
//!
//! The database driver stays outside the crate: implement
//! [`ConnectionFactory`] and [`Connection`] for it.
//!
//! ```
//! use pgpool::testing::MockFactory;
//! use pgpool::{ConnectOptions, Pool, PoolConfig};
//!
//! let options = ConnectOptions::new("localhost").dbname("app").user("app");
//! let pool = Pool::new(MockFactory::new(), options, PoolConfig::new(1, 4))?;
//!
//! let conn = pool.acquire()?;
//! // ... run queries ...
//! pool.release(conn)?;
//! assert_eq!(pool.idle_count(), 1);
//! # Ok::<(), pgpool::Error>(())
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod guard;
pub mod pool;
pub mod release;
pub mod testing;

pub use config::{
    AdmissionPolicy, ConnectOptions, MAX_LIFETIME_CEILING_SECS, MAX_POOL_SIZE_CEILING, PoolConfig,
};
pub use connection::{Connection, ConnectionFactory, ConnectionId, PooledConnection, TransactionStatus};
pub use error::{BoxError, Error, Result};
pub use guard::PoolGuard;
pub use pool::{Pool, PoolStats};
pub use release::ReleaseDecision;
