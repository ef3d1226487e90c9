//! Release policy: what happens to a connection handed back to the pool.

use std::time::Duration;

use crate::connection::{Connection, TransactionStatus};

/// Outcome of inspecting a returned connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseDecision {
    /// Already closed; forget it.
    Forget,
    /// Older than the configured lifetime; close it.
    Expire,
    /// Protocol state is unknown; close it.
    Discard,
    /// Open transaction or failed block; roll back, then recycle.
    Rollback,
    /// Clean; recycle as-is.
    Recycle,
}

impl ReleaseDecision {
    /// Whether the decision can put the connection back into the idle set.
    #[must_use]
    pub fn may_recycle(self) -> bool {
        matches!(self, Self::Rollback | Self::Recycle)
    }
}

/// Decide the fate of `conn`, checked out for `age` since it was opened.
///
/// Order matters: a closed session is never inspected further, and lifetime
/// eviction wins over transaction-state recycling.
pub fn decide<C: Connection + ?Sized>(
    conn: &C,
    age: Duration,
    max_lifetime: Option<Duration>,
) -> ReleaseDecision {
    if conn.is_closed() {
        return ReleaseDecision::Forget;
    }
    if max_lifetime.is_some_and(|max| age > max) {
        return ReleaseDecision::Expire;
    }
    match conn.transaction_status() {
        TransactionStatus::Unknown => ReleaseDecision::Discard,
        TransactionStatus::Idle => ReleaseDecision::Recycle,
        status if status.needs_rollback() => ReleaseDecision::Rollback,
        _ => ReleaseDecision::Discard,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockConnection;
    use rstest::rstest;

    const HOUR: Duration = Duration::from_secs(3600);

    #[rstest]
    #[case(TransactionStatus::Idle, ReleaseDecision::Recycle)]
    #[case(TransactionStatus::Active, ReleaseDecision::Rollback)]
    #[case(TransactionStatus::InTransaction, ReleaseDecision::Rollback)]
    #[case(TransactionStatus::InError, ReleaseDecision::Rollback)]
    #[case(TransactionStatus::Unknown, ReleaseDecision::Discard)]
    fn status_drives_decision(#[case] status: TransactionStatus, #[case] expected: ReleaseDecision) {
        let conn = MockConnection::detached();
        conn.probe().set_status(status);
        assert_eq!(decide(&conn, Duration::ZERO, Some(HOUR)), expected);
    }

    #[test]
    fn closed_wins_over_everything() {
        let conn = MockConnection::detached();
        conn.probe().set_status(TransactionStatus::InTransaction);
        conn.probe().kill();
        assert_eq!(
            decide(&conn, HOUR * 2, Some(HOUR)),
            ReleaseDecision::Forget
        );
    }

    #[test]
    fn expiry_wins_over_idle_status() {
        let conn = MockConnection::detached();
        assert_eq!(
            decide(&conn, HOUR + Duration::from_secs(1), Some(HOUR)),
            ReleaseDecision::Expire
        );
        // exactly at the limit is still fine
        assert_eq!(decide(&conn, HOUR, Some(HOUR)), ReleaseDecision::Recycle);
    }

    #[test]
    fn disabled_lifetime_never_expires() {
        let conn = MockConnection::detached();
        assert_eq!(
            decide(&conn, Duration::from_secs(1_000_000), None),
            ReleaseDecision::Recycle
        );
    }

    #[test]
    fn only_rollback_and_recycle_return_to_idle() {
        assert!(ReleaseDecision::Recycle.may_recycle());
        assert!(ReleaseDecision::Rollback.may_recycle());
        assert!(!ReleaseDecision::Forget.may_recycle());
        assert!(!ReleaseDecision::Expire.may_recycle());
        assert!(!ReleaseDecision::Discard.may_recycle());
    }
}
