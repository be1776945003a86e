// Blockchain module
//
// Core of the node:
// - Identity and signatures
// - Transactions and their validation
// - Ledger derived by chain replay
// - Transaction pool
// - Blocks and proof of work
// - Chain and fork resolution
// - Peer gossip and the mining loop

pub mod block;
pub mod chain;
pub mod crypto;
pub mod ledger;
pub mod miner;
pub mod node;
pub mod peers;
pub mod pool;
pub mod transaction;

// Re-export main components for easier access
pub use block::Block;
pub use chain::{Chain, ChainEntry};
pub use crypto::{Address, DigitalSignature, Wallet};
pub use ledger::Ledger;
pub use miner::MinerSettings;
pub use node::{Admission, ChainAdoption, Node, NodeError};
pub use peers::{HttpPeerClient, PeerClient, PeerStatus};
pub use transaction::{SignedTransaction, Transaction};
