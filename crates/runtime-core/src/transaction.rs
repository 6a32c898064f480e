//! The transaction state machine returned alongside every device read.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::WrongTransactionStateError;

/// The three states a [`Transaction`] can be in. Once `Committed` or
/// `RolledBack`, a transaction is terminal: the opposite move is an
/// error, but repeating the move already made is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransactionState {
    Active = 0,
    Committed = 1,
    RolledBack = 2,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionState::Active => "active",
            TransactionState::Committed => "committed",
            TransactionState::RolledBack => "rolled back",
        };
        f.write_str(s)
    }
}

/// Something that can be finalized exactly once, in exactly one
/// direction: `commit` or `rollback`. The device that produced a
/// transaction is identified by name only — never by reference — so
/// transactions never hold a cyclic pointer back into the device that
/// issued them.
pub trait Transaction: Send + Sync {
    /// The name of the device this transaction was produced by.
    fn device_name(&self) -> &str;

    /// The current state, for diagnostics and tests.
    fn state(&self) -> TransactionState;

    /// Commits the transaction. Idempotent if already committed; an
    /// error if already rolled back.
    fn commit(&self) -> Result<(), WrongTransactionStateError>;

    /// Rolls the transaction back. Idempotent if already rolled back; an
    /// error if already committed.
    fn rollback(&self) -> Result<(), WrongTransactionStateError>;
}

/// Tracks commit/rollback as an atomic state transition and dispatches to
/// a closure on the *first* successful move in either direction. Device
/// implementations embed this and supply the actual commit/rollback side
/// effects, instead of re-deriving the state machine each time.
pub struct AtomicTransactionState {
    state: AtomicU8,
}

impl AtomicTransactionState {
    pub fn new() -> Self {
        AtomicTransactionState {
            state: AtomicU8::new(TransactionState::Active as u8),
        }
    }

    pub fn state(&self) -> TransactionState {
        match self.state.load(Ordering::SeqCst) {
            0 => TransactionState::Active,
            1 => TransactionState::Committed,
            _ => TransactionState::RolledBack,
        }
    }

    /// Attempts to move from `Active` to `target`. Returns `Ok(true)` if
    /// this call performed the move, `Ok(false)` if the state already
    /// equals `target` (idempotent no-op), or `Err` if the state is the
    /// other terminal value.
    pub fn try_finish(&self, target: TransactionState) -> Result<bool, WrongTransactionStateError> {
        match self.state.compare_exchange(
            TransactionState::Active as u8,
            target as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => Ok(true),
            Err(current) if current == target as u8 => Ok(false),
            Err(_) => {
                let (current, attempted) = match target {
                    TransactionState::Committed => ("rolled back", "commit"),
                    TransactionState::RolledBack => ("committed", "rollback"),
                    TransactionState::Active => unreachable!("target is never Active"),
                };
                Err(WrongTransactionStateError {
                    current,
                    attempted,
                })
            }
        }
    }
}

impl Default for AtomicTransactionState {
    fn default() -> Self {
        Self::new()
    }
}

/// A transaction with no backing resource: commit and rollback are both
/// no-ops. Returned by reads performed with `with_transaction = false`,
/// and as the transaction for the aggregator's synthetic empty reads.
pub struct NullTransaction {
    inner: AtomicTransactionState,
}

impl NullTransaction {
    pub fn new() -> Self {
        NullTransaction {
            inner: AtomicTransactionState::new(),
        }
    }
}

impl Default for NullTransaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Transaction for NullTransaction {
    fn device_name(&self) -> &str {
        "<null>"
    }

    fn state(&self) -> TransactionState {
        self.inner.state()
    }

    fn commit(&self) -> Result<(), WrongTransactionStateError> {
        self.inner.try_finish(TransactionState::Committed).map(|_| ())
    }

    fn rollback(&self) -> Result<(), WrongTransactionStateError> {
        self.inner.try_finish(TransactionState::RolledBack).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_then_commit_is_idempotent() {
        let t = NullTransaction::new();
        t.commit().unwrap();
        t.commit().unwrap();
        assert_eq!(t.state(), TransactionState::Committed);
    }

    #[test]
    fn commit_then_rollback_errors() {
        let t = NullTransaction::new();
        t.commit().unwrap();
        let err = t.rollback().unwrap_err();
        assert_eq!(err.current, "committed");
        assert_eq!(err.attempted, "rollback");
    }

    #[test]
    fn rollback_then_commit_errors() {
        let t = NullTransaction::new();
        t.rollback().unwrap();
        assert!(t.commit().is_err());
    }
}
