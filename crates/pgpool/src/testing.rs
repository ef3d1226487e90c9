//! In-memory driver for exercising the pool without a database.
//!
//! [`MockFactory`] hands out [`MockConnection`]s. Each connection shares a
//! [`ConnectionProbe`] with the factory, so a test can steer a session's
//! transaction state and observe `rollback`/`close` calls after the
//! connection has been moved back into the pool.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::ConnectOptions;
use crate::connection::{Connection, ConnectionFactory, TransactionStatus};
use crate::error::BoxError;

#[derive(Debug)]
struct ProbeState {
    serial: usize,
    status: TransactionStatus,
    status_after_rollback: TransactionStatus,
    closed: bool,
    fail_rollback: bool,
    rollbacks: usize,
    closes: usize,
}

/// Shared view of one mock session.
#[derive(Debug, Clone)]
pub struct ConnectionProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl ConnectionProbe {
    fn new(serial: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(ProbeState {
                serial,
                status: TransactionStatus::Idle,
                status_after_rollback: TransactionStatus::Idle,
                closed: false,
                fail_rollback: false,
                rollbacks: 0,
                closes: 0,
            })),
        }
    }

    /// Order in which the factory opened this session, starting at 0.
    pub fn serial(&self) -> usize {
        self.state.lock().serial
    }

    /// Set the transaction status the session reports.
    pub fn set_status(&self, status: TransactionStatus) {
        self.state.lock().status = status;
    }

    /// Current transaction status.
    pub fn status(&self) -> TransactionStatus {
        self.state.lock().status
    }

    /// Status the session reports after a successful rollback.
    pub fn set_status_after_rollback(&self, status: TransactionStatus) {
        self.state.lock().status_after_rollback = status;
    }

    /// Make every subsequent rollback fail.
    pub fn fail_rollbacks(&self) {
        self.state.lock().fail_rollback = true;
    }

    /// Simulate the server dropping the session.
    pub fn kill(&self) {
        self.state.lock().closed = true;
    }

    /// Whether the session is closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of rollback calls.
    pub fn rollbacks(&self) -> usize {
        self.state.lock().rollbacks
    }

    /// Number of close calls.
    pub fn closes(&self) -> usize {
        self.state.lock().closes
    }
}

/// A fake session driven through its [`ConnectionProbe`].
#[derive(Debug)]
pub struct MockConnection {
    probe: ConnectionProbe,
}

impl MockConnection {
    /// A session that no factory knows about.
    pub fn detached() -> Self {
        Self {
            probe: ConnectionProbe::new(usize::MAX),
        }
    }

    /// The probe shared with the factory.
    pub fn probe(&self) -> &ConnectionProbe {
        &self.probe
    }

    /// Shorthand for `probe().serial()`.
    pub fn serial(&self) -> usize {
        self.probe.serial()
    }
}

impl Connection for MockConnection {
    fn close(&mut self) {
        let mut state = self.probe.state.lock();
        state.closed = true;
        state.closes += 1;
    }

    fn is_closed(&self) -> bool {
        self.probe.is_closed()
    }

    fn rollback(&mut self) -> Result<(), BoxError> {
        let mut state = self.probe.state.lock();
        state.rollbacks += 1;
        if state.fail_rollback {
            state.status = TransactionStatus::Unknown;
            return Err("rollback failed: server closed the connection unexpectedly".into());
        }
        state.status = state.status_after_rollback;
        Ok(())
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.probe.status()
    }
}

#[derive(Debug, Default)]
struct FactoryState {
    attempts: usize,
    failing: HashSet<usize>,
    always_fail: bool,
    open_delay: Option<Duration>,
    opened: Vec<ConnectionProbe>,
}

/// Factory producing [`MockConnection`]s, with scripted failures.
///
/// Cloning shares state, so a test can keep a handle after moving the
/// factory into a pool.
#[derive(Debug, Clone, Default)]
pub struct MockFactory {
    state: Arc<Mutex<FactoryState>>,
}

impl MockFactory {
    /// A factory whose opens always succeed.
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory whose opens always fail.
    pub fn failing() -> Self {
        let factory = Self::new();
        factory.state.lock().always_fail = true;
        factory
    }

    /// Fail the open attempts with these 0-based indices.
    pub fn fail_on<I: IntoIterator<Item = usize>>(self, attempts: I) -> Self {
        self.state.lock().failing.extend(attempts);
        self
    }

    /// Sleep this long inside every open, to widen race windows.
    pub fn with_open_delay(self, delay: Duration) -> Self {
        self.state.lock().open_delay = Some(delay);
        self
    }

    /// Number of open attempts, successful or not.
    pub fn attempts(&self) -> usize {
        self.state.lock().attempts
    }

    /// Number of sessions successfully opened.
    pub fn opened(&self) -> usize {
        self.state.lock().opened.len()
    }

    /// Probe of the `serial`-th opened session.
    pub fn probe(&self, serial: usize) -> Option<ConnectionProbe> {
        self.state.lock().opened.get(serial).cloned()
    }

    /// Probes of every opened session, in open order.
    pub fn probes(&self) -> Vec<ConnectionProbe> {
        self.state.lock().opened.clone()
    }
}

impl ConnectionFactory for MockFactory {
    type Connection = MockConnection;

    fn open(&self, options: &ConnectOptions) -> Result<MockConnection, BoxError> {
        let delay = {
            let mut state = self.state.lock();
            state.attempts += 1;
            state.open_delay
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut state = self.state.lock();
        let attempt = state.attempts - 1;
        if state.always_fail || state.failing.contains(&attempt) {
            return Err(format!("could not connect to server at {}", options.target()).into());
        }

        let probe = ConnectionProbe::new(state.opened.len());
        state.opened.push(probe.clone());
        Ok(MockConnection { probe })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_scripts_failures() {
        let factory = MockFactory::new().fail_on([1]);
        let options = ConnectOptions::default();

        assert!(factory.open(&options).is_ok());
        let err = factory.open(&options).unwrap_err();
        assert!(err.to_string().contains("localhost:5432/postgres"));
        let third = factory.open(&options).unwrap();

        assert_eq!(factory.attempts(), 3);
        assert_eq!(factory.opened(), 2);
        assert_eq!(third.serial(), 1);
    }

    #[test]
    fn rollback_resets_status() {
        let mut conn = MockConnection::detached();
        conn.probe().set_status(TransactionStatus::InError);
        conn.rollback().unwrap();
        assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
        assert_eq!(conn.probe().rollbacks(), 1);
    }

    #[test]
    fn failed_rollback_leaves_unknown_status() {
        let mut conn = MockConnection::detached();
        conn.probe().set_status(TransactionStatus::InTransaction);
        conn.probe().fail_rollbacks();
        assert!(conn.rollback().is_err());
        assert_eq!(conn.transaction_status(), TransactionStatus::Unknown);
    }

    #[test]
    fn probe_observes_close_after_move() {
        let factory = MockFactory::new();
        let mut conn = factory.open(&ConnectOptions::default()).unwrap();
        conn.close();
        conn.close();
        let probe = factory.probe(0).unwrap();
        assert!(probe.is_closed());
        assert_eq!(probe.closes(), 2);
    }
}
