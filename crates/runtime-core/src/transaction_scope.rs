//! Groups several child transactions so a handler can finish them as one unit.

use std::sync::Mutex;

use crate::error::WrongTransactionStateError;
use crate::transaction::Transaction;

/// Accumulates child transactions (typically one per [`crate::bundle::MessageBundle`]
/// produced during a single pipeline iteration) and finishes them
/// together. Committing or rolling back skips children that have already
/// reached a terminal state — e.g. a handler that explicitly committed
/// one output ahead of time — so the scope never turns an idempotent
/// no-op into a hard error.
#[derive(Default)]
pub struct TransactionScope {
    children: Mutex<Vec<Box<dyn Transaction>>>,
}

impl TransactionScope {
    pub fn new() -> Self {
        TransactionScope::default()
    }

    /// Adds a child transaction to the scope.
    pub fn add(&self, transaction: Box<dyn Transaction>) {
        self.children.lock().expect("transaction scope lock poisoned").push(transaction);
    }

    /// The number of children currently tracked.
    pub fn len(&self) -> usize {
        self.children.lock().expect("transaction scope lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Commits every child not already in a terminal state. Returns the
    /// errors raised by children that were already rolled back, keyed by
    /// device name; a child already committed is silently skipped.
    pub fn commit(&self) -> Vec<(String, WrongTransactionStateError)> {
        self.finish(|t| t.commit())
    }

    /// Rolls back every child not already in a terminal state. Returns
    /// the errors raised by children that were already committed, keyed
    /// by device name; a child already rolled back is silently skipped.
    pub fn rollback(&self) -> Vec<(String, WrongTransactionStateError)> {
        self.finish(|t| t.rollback())
    }

    fn finish(
        &self,
        f: impl Fn(&dyn Transaction) -> Result<(), WrongTransactionStateError>,
    ) -> Vec<(String, WrongTransactionStateError)> {
        let children = self.children.lock().expect("transaction scope lock poisoned");
        let mut errors = Vec::new();
        for child in children.iter() {
            if let Err(e) = f(child.as_ref()) {
                errors.push((child.device_name().to_owned(), e));
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::NullTransaction;

    #[test]
    fn commit_skips_already_committed_children() {
        let scope = TransactionScope::new();
        let t = NullTransaction::new();
        t.commit().unwrap();
        scope.add(Box::new(t));
        let errors = scope.commit();
        assert!(errors.is_empty());
    }

    #[test]
    fn commit_reports_children_already_rolled_back() {
        let scope = TransactionScope::new();
        let t = NullTransaction::new();
        t.rollback().unwrap();
        scope.add(Box::new(t));
        let errors = scope.commit();
        assert_eq!(errors.len(), 1);
    }
}
