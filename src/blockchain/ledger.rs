use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::collections::BTreeMap;

use super::block::Block;
use super::chain::Chain;
use super::crypto::Address;

/// Initial credit given to the genesis address
pub const COINBASE_AMOUNT: f64 = 100.0;

/// Errors that can occur while applying blocks to a ledger
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Negative balance for {address}: {balance}")]
    NegativeBalance { address: Address, balance: f64 },
}

/// Address to balance mapping.
///
/// Always derived by replaying a chain; a ledger is never authoritative on
/// its own. Ordered so that two replays of the same chain serialize to the
/// same bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    balances: BTreeMap<Address, f64>,
}

impl Ledger {
    /// An empty ledger, held by nodes that have not adopted a chain yet
    pub fn new() -> Self {
        Ledger::default()
    }

    pub fn with_genesis(address: Address, amount: f64) -> Self {
        let mut balances = BTreeMap::new();
        balances.insert(address, amount);
        Ledger { balances }
    }

    pub fn balance(&self, address: &Address) -> Option<f64> {
        self.balances.get(address).copied()
    }

    /// Applies every transaction of `block` in order.
    ///
    /// Per transaction: debit the sender by `amount + fee`, credit the
    /// receiver by `amount`, credit the miner by `fee`. The block is applied
    /// all-or-nothing: on a negative balance the ledger is left untouched.
    pub fn apply_block(&mut self, block: &Block) -> Result<(), LedgerError> {
        let mut balances = self.balances.clone();

        for signed in &block.transactions {
            let transaction = &signed.transaction;

            let sender = balances.entry(transaction.sender.clone()).or_insert(0.0);
            *sender -= transaction.total_amount();
            if *sender < 0.0 {
                return Err(LedgerError::NegativeBalance {
                    address: transaction.sender.clone(),
                    balance: *sender,
                });
            }

            *balances.entry(transaction.receiver.clone()).or_insert(0.0) += transaction.amount;
            *balances.entry(block.miner.clone()).or_insert(0.0) += transaction.fee;
        }

        self.balances = balances;
        Ok(())
    }
}

/// The ledger before any block is applied: the coinbase credit to
/// `genesis`, or nothing for a chain without one
pub fn genesis_ledger(genesis: Option<&Address>) -> Ledger {
    match genesis {
        Some(genesis) => Ledger::with_genesis(genesis.clone(), COINBASE_AMOUNT),
        None => Ledger::new(),
    }
}

/// Replays `chain` from its genesis credit.
///
/// An empty chain yields an empty ledger.
pub fn derive_ledger(chain: &Chain) -> Result<Ledger, LedgerError> {
    let mut ledger = genesis_ledger(chain.genesis());
    for block in chain.blocks() {
        ledger.apply_block(block)?;
    }

    Ok(ledger)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::Wallet;
    use crate::blockchain::transaction::{SignedTransaction, Transaction};

    fn transfer(from: &Wallet, to: &Address, amount: f64, fee: f64) -> SignedTransaction {
        Transaction::new(from.address().clone(), to.clone(), amount, fee)
            .sign(from)
            .unwrap()
    }

    #[test]
    fn test_apply_block_debits_credits_and_pays_miner() {
        let alice = Wallet::new();
        let bob = Wallet::new();
        let miner = Wallet::new();

        let mut ledger = Ledger::with_genesis(alice.address().clone(), COINBASE_AMOUNT);
        let block = Block::new(
            vec![transfer(&alice, bob.address(), 30.0, 1.0)],
            "0".to_string(),
            miner.address().clone(),
        );
        ledger.apply_block(&block).unwrap();

        assert_eq!(ledger.balance(alice.address()), Some(69.0));
        assert_eq!(ledger.balance(bob.address()), Some(30.0));
        assert_eq!(ledger.balance(miner.address()), Some(1.0));
    }

    #[test]
    fn test_negative_balance_leaves_ledger_untouched() {
        let alice = Wallet::new();
        let bob = Wallet::new();

        let mut ledger = Ledger::with_genesis(alice.address().clone(), 50.0);
        let before = ledger.clone();
        let block = Block::new(
            vec![
                transfer(&alice, bob.address(), 40.0, 0.0),
                transfer(&alice, bob.address(), 40.0, 0.0),
            ],
            "0".to_string(),
            bob.address().clone(),
        );

        let result = ledger.apply_block(&block);
        assert!(matches!(result, Err(LedgerError::NegativeBalance { .. })));
        assert_eq!(ledger, before);
    }

    #[test]
    fn test_self_payment_debits_then_credits() {
        let alice = Wallet::new();

        let mut ledger = Ledger::with_genesis(alice.address().clone(), 10.0);
        let block = Block::new(
            vec![transfer(&alice, alice.address(), 10.0, 0.0)],
            "0".to_string(),
            alice.address().clone(),
        );
        ledger.apply_block(&block).unwrap();

        assert_eq!(ledger, Ledger::with_genesis(alice.address().clone(), 10.0));
    }

    #[test]
    fn test_derive_ledger_of_empty_chain() {
        let ledger = derive_ledger(&Chain::empty()).unwrap();
        assert_eq!(ledger, Ledger::new());

        let alice = Wallet::new();
        let ledger = derive_ledger(&Chain::new(alice.address().clone())).unwrap();
        assert_eq!(ledger.balance(alice.address()), Some(COINBASE_AMOUNT));
    }
}
