use super::crypto::Address;
use super::transaction::SignedTransaction;

/// Signed transactions admitted but not yet included in an accepted block.
///
/// Kept in arrival order. Membership is structural equality on the whole
/// signed transaction, so resubmitting an identical transaction is a no-op.
#[derive(Debug, Clone, Default)]
pub struct TransactionPool {
    pending: Vec<SignedTransaction>,
}

impl TransactionPool {
    pub fn new() -> Self {
        TransactionPool::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn contains(&self, transaction: &SignedTransaction) -> bool {
        self.pending.contains(transaction)
    }

    /// Adds a transaction, returning `false` if an identical one is pending
    pub fn insert(&mut self, transaction: SignedTransaction) -> bool {
        if self.contains(&transaction) {
            return false;
        }
        self.pending.push(transaction);
        true
    }

    /// Sum of `amount + fee` over pending transactions sent by `sender`
    pub fn pending_obligations(&self, sender: &Address) -> f64 {
        self.pending
            .iter()
            .filter(|signed| signed.sender() == sender)
            .map(|signed| signed.transaction.total_amount())
            .sum()
    }

    pub fn snapshot(&self) -> Vec<SignedTransaction> {
        self.pending.clone()
    }

    /// Drops every pending transaction that appears in `included`
    pub fn prune(&mut self, included: &[SignedTransaction]) -> usize {
        let before = self.pending.len();
        self.pending.retain(|signed| !included.contains(signed));
        before - self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::Wallet;
    use crate::blockchain::transaction::Transaction;

    fn signed(from: &Wallet, to: &Wallet, amount: f64, fee: f64) -> SignedTransaction {
        Transaction::new(from.address().clone(), to.address().clone(), amount, fee)
            .sign(from)
            .unwrap()
    }

    #[test]
    fn test_insert_deduplicates() {
        let alice = Wallet::new();
        let bob = Wallet::new();
        let mut pool = TransactionPool::new();

        let tx = signed(&alice, &bob, 10.0, 0.5);
        assert!(pool.insert(tx.clone()));
        assert!(!pool.insert(tx.clone()));
        assert_eq!(pool.len(), 1);
        assert!(pool.contains(&tx));
    }

    #[test]
    fn test_pending_obligations_per_sender() {
        let alice = Wallet::new();
        let bob = Wallet::new();
        let mut pool = TransactionPool::new();

        pool.insert(signed(&alice, &bob, 10.0, 0.5));
        pool.insert(signed(&alice, &bob, 20.0, 1.0));
        pool.insert(signed(&bob, &alice, 7.0, 0.0));

        assert_eq!(pool.pending_obligations(alice.address()), 31.5);
        assert_eq!(pool.pending_obligations(bob.address()), 7.0);
    }

    #[test]
    fn test_prune_keeps_arrival_order() {
        let alice = Wallet::new();
        let bob = Wallet::new();
        let mut pool = TransactionPool::new();

        let first = signed(&alice, &bob, 1.0, 0.0);
        let second = signed(&alice, &bob, 2.0, 0.0);
        let third = signed(&alice, &bob, 3.0, 0.0);
        pool.insert(first.clone());
        pool.insert(second.clone());
        pool.insert(third.clone());

        assert_eq!(pool.prune(&[second]), 1);
        assert_eq!(pool.snapshot(), vec![first, third]);
    }
}
