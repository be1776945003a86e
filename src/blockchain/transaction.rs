use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::crypto::{verify_signature, Address, CryptoError, DigitalSignature, Wallet};
use super::ledger::Ledger;

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Unknown sender {address}: required {required}")]
    UnknownSender { address: Address, required: f64 },

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: f64, available: f64 },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// A transfer of `amount` from `sender` to `receiver`, paying `fee` to
/// whoever mines it.
///
/// Field order is the canonical serialization order; signatures are computed
/// over exactly these bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    pub sender: Address,
    pub receiver: Address,
    pub amount: f64,
    pub fee: f64,
}

impl Transaction {
    pub fn new(sender: Address, receiver: Address, amount: f64, fee: f64) -> Self {
        Transaction {
            sender,
            receiver,
            amount,
            fee,
        }
    }

    /// Canonical bytes used for signing and verification
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, TransactionError> {
        serde_json::to_vec(self).map_err(|e| TransactionError::SerializationError(e.to_string()))
    }

    /// Total debit on the sender's balance
    pub fn total_amount(&self) -> f64 {
        self.amount + self.fee
    }

    /// Signs the transaction, producing an immutable signed value
    pub fn sign(self, wallet: &Wallet) -> Result<SignedTransaction, TransactionError> {
        let message = self.canonical_bytes()?;
        let signature = wallet.sign(&message);

        Ok(SignedTransaction {
            transaction: self,
            signature,
        })
    }

    fn check_amounts(&self) -> Result<(), TransactionError> {
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(TransactionError::InvalidAmount(format!(
                "amount must be positive: {}",
                self.amount
            )));
        }
        if !self.fee.is_finite() || self.fee < 0.0 {
            return Err(TransactionError::InvalidAmount(format!(
                "fee must not be negative: {}",
                self.fee
            )));
        }
        Ok(())
    }
}

/// A transaction together with the sender's signature over its canonical bytes.
///
/// Equality is structural (sender, receiver, amount, fee, signature), which is
/// also the identity used by the transaction pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SignedTransaction {
    pub transaction: Transaction,
    pub signature: DigitalSignature,
}

impl SignedTransaction {
    pub fn sender(&self) -> &Address {
        &self.transaction.sender
    }

    /// Verifies the signature against the public key encoded in the sender address
    pub fn verify_signature(&self) -> Result<(), TransactionError> {
        let public_key = self.transaction.sender.to_public_key()?;
        let message = self.transaction.canonical_bytes()?;

        if verify_signature(&message, &self.signature, &public_key)? {
            Ok(())
        } else {
            Err(TransactionError::InvalidSignature)
        }
    }
}

/// Validates a signed transaction, optionally against a ledger snapshot.
///
/// With a ledger, the sender must already hold an entry covering
/// `amount + fee`. Any malformed encoding is an error, never a pass.
pub fn validate_transaction(
    signed: &SignedTransaction,
    ledger: Option<&Ledger>,
) -> Result<(), TransactionError> {
    let transaction = &signed.transaction;
    transaction.check_amounts()?;
    signed.verify_signature()?;

    if let Some(ledger) = ledger {
        let required = transaction.total_amount();
        let available = ledger
            .balance(&transaction.sender)
            .ok_or_else(|| TransactionError::UnknownSender {
                address: transaction.sender.clone(),
                required,
            })?;

        if available < required {
            return Err(TransactionError::InsufficientFunds {
                required,
                available,
            });
        }
    }

    Ok(())
}

/// Validates every transaction in order, stopping at the first failure.
pub fn validate_transactions(
    transactions: &[SignedTransaction],
    ledger: Option<&Ledger>,
) -> Result<(), TransactionError> {
    transactions
        .iter()
        .try_for_each(|signed| validate_transaction(signed, ledger))
}
