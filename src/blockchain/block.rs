use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use utoipa::ToSchema;

use super::crypto::Address;
use super::ledger::Ledger;
use super::transaction::{validate_transactions, SignedTransaction, TransactionError};

/// `previous` value of the first block after genesis
pub const GENESIS_PREVIOUS: &str = "0";

/// Upper bound of the random nonce step taken after a failed attempt
const MAX_NONCE_STEP: u64 = 100;

/// Errors that can occur while validating or hashing a block
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(#[from] TransactionError),

    #[error("Insufficient proof of work: {hash:?} lacks {difficulty} leading zeros")]
    InsufficientWork { hash: String, difficulty: usize },

    #[error("Hash mismatch: declared {declared}, computed {computed}")]
    HashMismatch { declared: String, computed: String },

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Transactions in the order they are applied
    pub transactions: Vec<SignedTransaction>,

    /// Hash of the previous block, or `"0"` right after genesis
    pub previous: String,

    /// Proof of work nonce
    pub nonce: u64,

    /// Address credited with the fees of every transaction in the block
    pub miner: Address,

    /// Proof of work hash, empty until mined
    #[serde(default)]
    pub hash: String,
}

/// The hashed portion of a block, in canonical field order
#[derive(Serialize)]
struct BlockContents<'a> {
    transactions: &'a [SignedTransaction],
    previous: &'a str,
    nonce: u64,
    miner: &'a Address,
}

impl Block {
    /// Creates an unmined candidate block
    pub fn new(transactions: Vec<SignedTransaction>, previous: String, miner: Address) -> Self {
        Block {
            transactions,
            previous,
            nonce: 0,
            miner,
            hash: String::new(),
        }
    }

    /// Canonical JSON form, with or without the `hash` field
    pub fn serialize(&self, include_hash: bool) -> Result<Vec<u8>, BlockError> {
        let result = if include_hash {
            serde_json::to_vec(self)
        } else {
            serde_json::to_vec(&self.contents())
        };
        result.map_err(|e| BlockError::SerializationError(e.to_string()))
    }

    fn contents(&self) -> BlockContents<'_> {
        BlockContents {
            transactions: &self.transactions,
            previous: &self.previous,
            nonce: self.nonce,
            miner: &self.miner,
        }
    }

    /// SHA-256 of the canonical serialization without the hash, hex encoded
    pub fn compute_hash(&self) -> Result<String, BlockError> {
        let bytes = self.serialize(false)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    /// Checks transactions, proof of work and the declared hash.
    ///
    /// Transactions are each checked against `ledger`, not against the
    /// ledger as it would evolve through the block.
    pub fn validate(&self, ledger: Option<&Ledger>, difficulty: usize) -> Result<(), BlockError> {
        validate_transactions(&self.transactions, ledger)?;

        if !meets_difficulty(&self.hash, difficulty) {
            return Err(BlockError::InsufficientWork {
                hash: self.hash.clone(),
                difficulty,
            });
        }

        let computed = self.compute_hash()?;
        if computed != self.hash {
            return Err(BlockError::HashMismatch {
                declared: self.hash.clone(),
                computed,
            });
        }

        Ok(())
    }

    /// A single bounded unit of proof-of-work search.
    ///
    /// On success the hash is stored and `true` returned. Otherwise the nonce
    /// advances by a random step in `1..=100` drawn from `rng`.
    pub fn attempt_proof_of_work<R: Rng + ?Sized>(
        &mut self,
        difficulty: usize,
        rng: &mut R,
    ) -> Result<bool, BlockError> {
        let hash = self.compute_hash()?;
        if meets_difficulty(&hash, difficulty) {
            self.hash = hash;
            return Ok(true);
        }

        self.nonce = self.nonce.wrapping_add(rng.gen_range(1..=MAX_NONCE_STEP));
        Ok(false)
    }
}

/// Whether `hash` starts with exactly `difficulty` zero characters
pub fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}
