use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::block::{Block, BlockError, GENESIS_PREVIOUS};
use super::crypto::Address;
use super::ledger::{genesis_ledger, LedgerError};

/// Errors that can occur during chain operations
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Chain has no genesis entry")]
    MissingGenesis,

    #[error("Malformed chain: {0}")]
    Malformed(String),

    #[error("Block does not extend head: expected previous {expected}, got {actual}")]
    DoesNotExtend { expected: String, actual: String },

    #[error("Invalid block at height {height}: {source}")]
    InvalidBlock {
        height: usize,
        #[source]
        source: BlockError,
    },

    #[error("Ledger error at height {height}: {source}")]
    LedgerError {
        height: usize,
        #[source]
        source: LedgerError,
    },
}

/// One element of the wire chain dump: the genesis address first, blocks after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChainEntry {
    Genesis(Address),
    Block(Block),
}

/// Ordered sequence of accepted blocks on top of a genesis address.
///
/// Length counts the genesis entry, so a genesis-only chain has length 1 and
/// a chain without genesis has length 0.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chain {
    genesis: Option<Address>,
    blocks: Vec<Block>,
}

impl Chain {
    /// A chain seeded with the coinbase credit to `genesis`
    pub fn new(genesis: Address) -> Self {
        Chain {
            genesis: Some(genesis),
            blocks: Vec::new(),
        }
    }

    /// A chain with nothing in it, held until a peer chain is adopted
    pub fn empty() -> Self {
        Chain::default()
    }

    pub fn genesis(&self) -> Option<&Address> {
        self.genesis.as_ref()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        match self.genesis {
            Some(_) => self.blocks.len() + 1,
            None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hash of the last block, or `"0"` when there is none
    pub fn head(&self) -> &str {
        self.blocks
            .last()
            .map(|block| block.hash.as_str())
            .unwrap_or(GENESIS_PREVIOUS)
    }

    /// Appends a block that strictly extends the current head.
    ///
    /// Only linkage is checked here; callers validate the block itself.
    pub fn append(&mut self, block: Block) -> Result<(), ChainError> {
        if self.genesis.is_none() {
            return Err(ChainError::MissingGenesis);
        }
        if block.previous != self.head() {
            return Err(ChainError::DoesNotExtend {
                expected: self.head().to_string(),
                actual: block.previous,
            });
        }
        self.blocks.push(block);
        Ok(())
    }

    /// Wire form: genesis address followed by every block including its hash
    pub fn to_entries(&self) -> Vec<ChainEntry> {
        let genesis = self.genesis.iter().cloned().map(ChainEntry::Genesis);
        let blocks = self.blocks.iter().cloned().map(ChainEntry::Block);
        genesis.chain(blocks).collect()
    }

    /// Rebuilds a chain from its wire form without validating blocks
    pub fn from_entries(entries: Vec<ChainEntry>) -> Result<Self, ChainError> {
        let mut entries = entries.into_iter();

        let genesis = match entries.next() {
            None => return Ok(Chain::empty()),
            Some(ChainEntry::Genesis(address)) => address,
            Some(ChainEntry::Block(_)) => return Err(ChainError::MissingGenesis),
        };

        let blocks = entries
            .enumerate()
            .map(|(index, entry)| match entry {
                ChainEntry::Block(block) => Ok(block),
                ChainEntry::Genesis(address) => Err(ChainError::Malformed(format!(
                    "unexpected genesis entry {} at height {}",
                    address,
                    index + 1
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Chain {
            genesis: Some(genesis),
            blocks,
        })
    }

    /// Validates every block from genesis.
    ///
    /// Each block must link to its predecessor and validate against the
    /// ledger replayed from the blocks before it.
    pub fn validate(&self, difficulty: usize) -> Result<(), ChainError> {
        if self.genesis.is_none() && !self.blocks.is_empty() {
            return Err(ChainError::MissingGenesis);
        }

        let mut ledger = genesis_ledger(self.genesis());
        let mut previous = GENESIS_PREVIOUS;

        for (index, block) in self.blocks.iter().enumerate() {
            let height = index + 1;
            if block.previous != previous {
                return Err(ChainError::DoesNotExtend {
                    expected: previous.to_string(),
                    actual: block.previous.clone(),
                });
            }
            block
                .validate(Some(&ledger), difficulty)
                .map_err(|source| ChainError::InvalidBlock { height, source })?;
            ledger
                .apply_block(block)
                .map_err(|source| ChainError::LedgerError { height, source })?;
            previous = block.hash.as_str();
        }

        Ok(())
    }
}
