//! Simple pooling example
//!
//! Plugs a toy driver into the pool and walks through acquire, a dirty
//! release that triggers a rollback, and shutdown. Run with
//! `RUST_LOG=pgpool=debug` to see the pool's decisions.

use std::sync::atomic::{AtomicU64, Ordering};

use pgpool::{
    BoxError, ConnectOptions, Connection, ConnectionFactory, Pool, PoolConfig, TransactionStatus,
};

/// Pretend session that tracks only what the pool looks at.
#[derive(Debug)]
struct FakeSession {
    backend_pid: u64,
    status: TransactionStatus,
    closed: bool,
}

impl FakeSession {
    fn begin(&mut self) {
        self.status = TransactionStatus::InTransaction;
    }
}

impl Connection for FakeSession {
    fn close(&mut self) {
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn rollback(&mut self) -> Result<(), BoxError> {
        self.status = TransactionStatus::Idle;
        Ok(())
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.status
    }
}

#[derive(Default)]
struct FakeDriver {
    next_pid: AtomicU64,
}

impl ConnectionFactory for FakeDriver {
    type Connection = FakeSession;

    fn open(&self, options: &ConnectOptions) -> Result<FakeSession, BoxError> {
        if options.host.is_empty() {
            return Err("host cannot be empty".into());
        }
        Ok(FakeSession {
            backend_pid: 4000 + self.next_pid.fetch_add(1, Ordering::Relaxed),
            status: TransactionStatus::Idle,
            closed: false,
        })
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== Simple Connection Pool Example ===\n");

    let options = ConnectOptions::new("localhost")
        .dbname("example")
        .user("example")
        .password("example");
    let pool = Pool::new(FakeDriver::default(), options, PoolConfig::new(2, 4))?;

    println!("Pool created: {} idle, {} issued\n", pool.idle_count(), pool.total_issued());

    let mut conn = pool.acquire()?;
    println!("Acquired backend pid {}", conn.backend_pid);
    conn.begin();

    // released mid-transaction: the pool rolls it back before reuse
    pool.release(conn)?;

    {
        let guard = pool.get()?;
        println!("Guard holds backend pid {}", guard.backend_pid);
    }

    let stats = pool.stats();
    println!("\nPool statistics:");
    println!("  - Idle: {}", stats.idle);
    println!("  - In use: {}", stats.in_use);
    println!("  - Issued: {}", stats.total_issued);
    println!("  - Rollbacks: {}", stats.rollbacks);

    pool.close_all()?;
    println!("\n=== Example completed! ===");

    Ok(())
}
