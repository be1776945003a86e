use futures::future::join_all;
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;

use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::block::Block;
use super::chain::{Chain, ChainEntry, ChainError};
use super::crypto::{Address, Wallet};
use super::ledger::{derive_ledger, Ledger, LedgerError};
use super::miner::{Miner, MinerSettings};
use super::peers::{normalize_url, PeerClient, PeerError, PeerRegistry};
use super::pool::TransactionPool;
use super::transaction::{validate_transaction, SignedTransaction, Transaction, TransactionError};

/// Faults raised by node operations.
///
/// `SignatureInvalid` and `InsufficientFunds` are recoverable rejects.
/// `ProtocolViolation` and `NegativeBalance` mean this node and a peer have
/// diverged; they abort the task that hit them but never the process.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Signature invalid")]
    SignatureInvalid,

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: f64, available: f64 },

    #[error("Negative balance: {0}")]
    NegativeBalance(String),

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Peer unreachable: {0}")]
    PeerUnreachable(#[from] PeerError),
}

impl NodeError {
    /// Whether the error signals consensus divergence
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            NodeError::ProtocolViolation(_) | NodeError::NegativeBalance(_)
        )
    }
}

impl From<TransactionError> for NodeError {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::InvalidSignature | TransactionError::CryptoError(_) => {
                NodeError::SignatureInvalid
            }
            TransactionError::InsufficientFunds {
                required,
                available,
            } => NodeError::InsufficientFunds {
                required,
                available,
            },
            TransactionError::UnknownSender { required, .. } => NodeError::InsufficientFunds {
                required,
                available: 0.0,
            },
            TransactionError::InvalidAmount(msg) | TransactionError::SerializationError(msg) => {
                NodeError::MalformedInput(msg)
            }
        }
    }
}

impl From<LedgerError> for NodeError {
    fn from(err: LedgerError) -> Self {
        NodeError::NegativeBalance(err.to_string())
    }
}

impl From<ChainError> for NodeError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::LedgerError { .. } => NodeError::NegativeBalance(err.to_string()),
            other => NodeError::ProtocolViolation(other.to_string()),
        }
    }
}

/// Outcome of offering a transaction to the pool
#[derive(Debug)]
pub enum Admission {
    Admitted,
    Duplicate,
    /// Dropped without raising a fault
    Rejected(NodeError),
}

/// Outcome of offering a peer chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainAdoption {
    Adopted { length: usize },
    Ignored { local: usize, offered: usize },
}

#[derive(Debug)]
struct ChainState {
    chain: Chain,
    ledger: Ledger,
}

/// A node: identity, chain, ledger and pool, plus the peers it gossips with.
///
/// Chain and ledger sit behind one lock so that block application and fork
/// replacement are a single critical section. The pool has its own lock;
/// when both are needed the chain lock is always taken first.
pub struct Node {
    wallet: Wallet,
    difficulty: usize,
    state: RwLock<ChainState>,
    pool: Mutex<TransactionPool>,
    peers: PeerRegistry,
    client: Arc<dyn PeerClient>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("address", self.wallet.address())
            .field("difficulty", &self.difficulty)
            .finish()
    }
}

impl Node {
    /// Creates a node. A `genesis` node seeds the chain with a coinbase
    /// credit to its own address; any other node starts empty and waits to
    /// adopt a peer chain.
    pub fn new(
        wallet: Wallet,
        difficulty: usize,
        genesis: bool,
        client: Arc<dyn PeerClient>,
    ) -> Result<Self, NodeError> {
        let chain = if genesis {
            Chain::new(wallet.address().clone())
        } else {
            Chain::empty()
        };
        let ledger = derive_ledger(&chain)?;

        Ok(Node {
            wallet,
            difficulty,
            state: RwLock::new(ChainState { chain, ledger }),
            pool: Mutex::new(TransactionPool::new()),
            peers: PeerRegistry::new(),
            client,
        })
    }

    pub fn address(&self) -> &Address {
        self.wallet.address()
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ChainState> {
        self.state.read().unwrap_or_else(|poisoned| {
            warn!("Chain lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ChainState> {
        self.state.write().unwrap_or_else(|poisoned| {
            warn!("Chain lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn lock_pool(&self) -> MutexGuard<'_, TransactionPool> {
        self.pool.lock().unwrap_or_else(|poisoned| {
            warn!("Pool lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn head(&self) -> String {
        self.read_state().chain.head().to_string()
    }

    pub fn chain_len(&self) -> usize {
        self.read_state().chain.len()
    }

    /// The chain in its wire form
    pub fn chain_dump(&self) -> Vec<ChainEntry> {
        self.read_state().chain.to_entries()
    }

    pub fn ledger(&self) -> Ledger {
        self.read_state().ledger.clone()
    }

    /// This node's own balance, zero if it has none yet
    pub fn balance(&self) -> f64 {
        self.balance_of(self.address()).unwrap_or(0.0)
    }

    pub fn balance_of(&self, address: &Address) -> Option<f64> {
        self.read_state().ledger.balance(address)
    }

    pub fn pending_transactions(&self) -> Vec<SignedTransaction> {
        self.lock_pool().snapshot()
    }

    /// Head and ledger read together, for assembling a candidate block
    pub(crate) fn mining_view(&self) -> (String, Ledger) {
        let state = self.read_state();
        (state.chain.head().to_string(), state.ledger.clone())
    }

    /// Signs a transfer from this node, admits it locally and gossips it.
    pub async fn create_transaction(
        &self,
        receiver: Address,
        amount: f64,
        fee: f64,
    ) -> Result<SignedTransaction, NodeError> {
        let available = self.balance();
        let required = amount + fee;
        if available < required {
            return Err(NodeError::InsufficientFunds {
                required,
                available,
            });
        }

        let signed = Transaction::new(self.address().clone(), receiver, amount, fee).sign(&self.wallet)?;

        if let Admission::Rejected(err) = self.on_transaction_received(signed.clone()) {
            return Err(err);
        }

        self.broadcast_transaction(&signed).await;
        Ok(signed)
    }

    /// Decodes a gossiped transaction and offers it to the pool
    pub fn transaction_signal(&self, raw: &str) -> Result<Admission, NodeError> {
        let signed: SignedTransaction = serde_json::from_str(raw)
            .map_err(|e| NodeError::MalformedInput(format!("transaction: {}", e)))?;
        Ok(self.on_transaction_received(signed))
    }

    /// Admission control for the pool.
    ///
    /// The transaction must validate against the current ledger, and the
    /// sender's pending obligations plus this one must fit in its balance.
    pub fn on_transaction_received(&self, signed: SignedTransaction) -> Admission {
        let state = self.read_state();

        if let Err(err) = validate_transaction(&signed, Some(&state.ledger)) {
            debug!("Dropping transaction from {}: {}", signed.sender(), err);
            return Admission::Rejected(err.into());
        }

        let transaction = &signed.transaction;
        let available = state.ledger.balance(&transaction.sender).unwrap_or(0.0);

        let mut pool = self.lock_pool();
        if pool.contains(&signed) {
            return Admission::Duplicate;
        }

        let required = pool.pending_obligations(&transaction.sender) + transaction.total_amount();
        if required > available {
            debug!(
                "Dropping transaction from {}: pending obligations {} exceed balance {}",
                transaction.sender, required, available
            );
            return Admission::Rejected(NodeError::InsufficientFunds {
                required,
                available,
            });
        }

        pool.insert(signed);
        debug!("Admitted transaction, {} pending", pool.len());
        Admission::Admitted
    }

    /// Decodes a gossiped block and applies it
    pub fn block_signal(&self, raw: &str) -> Result<(), NodeError> {
        let block: Block = serde_json::from_str(raw)
            .map_err(|e| NodeError::MalformedInput(format!("block: {}", e)))?;
        self.on_block_received(block)
    }

    /// Applies a block that strictly extends the current head.
    ///
    /// Ledger update, append and pool pruning happen under one critical
    /// section; on any failure nothing is changed.
    pub fn on_block_received(&self, block: Block) -> Result<(), NodeError> {
        let mut guard = self.write_state();
        let state = &mut *guard;

        if state.chain.is_empty() {
            return Err(NodeError::ProtocolViolation(
                "no chain to extend yet".to_string(),
            ));
        }
        if block.previous != state.chain.head() {
            return Err(NodeError::ProtocolViolation(format!(
                "block {} does not extend head {} (previous {})",
                block.hash,
                state.chain.head(),
                block.previous
            )));
        }

        block
            .validate(Some(&state.ledger), self.difficulty)
            .map_err(|e| NodeError::ProtocolViolation(format!("block {}: {}", block.hash, e)))?;

        let mut ledger = state.ledger.clone();
        ledger.apply_block(&block)?;

        let mut pool = self.lock_pool();
        let pruned = pool.prune(&block.transactions);
        let hash = block.hash.clone();
        let count = block.transactions.len();

        state
            .chain
            .append(block)
            .map_err(|e| NodeError::ProtocolViolation(e.to_string()))?;
        state.ledger = ledger;

        info!(
            "Accepted block {} with {} transactions at height {} ({} pruned from pool)",
            hash,
            count,
            state.chain.len() - 1,
            pruned
        );
        Ok(())
    }

    /// Longest-chain rule.
    ///
    /// A strictly longer peer chain is validated from genesis and, if every
    /// block holds, replaces the chain. The ledger is re-derived from the
    /// adopted chain.
    pub fn on_peer_chain_offered(&self, entries: Vec<ChainEntry>) -> Result<ChainAdoption, NodeError> {
        let candidate = Chain::from_entries(entries)
            .map_err(|e| NodeError::MalformedInput(format!("chain: {}", e)))?;

        let local = self.chain_len();
        let offered = candidate.len();
        if offered <= local {
            debug!("Ignoring peer chain of length {} (local {})", offered, local);
            return Ok(ChainAdoption::Ignored { local, offered });
        }

        candidate.validate(self.difficulty)?;
        let ledger = derive_ledger(&candidate)?;

        let mut state = self.write_state();
        let local = state.chain.len();
        if offered <= local {
            return Ok(ChainAdoption::Ignored { local, offered });
        }

        let mut pool = self.lock_pool();
        let pruned: usize = candidate
            .blocks()
            .iter()
            .map(|block| pool.prune(&block.transactions))
            .sum();

        state.chain = candidate;
        state.ledger = ledger;

        info!(
            "Adopted peer chain of length {} (was {}), head {}, {} pruned from pool",
            offered,
            local,
            state.chain.head(),
            pruned
        );
        Ok(ChainAdoption::Adopted { length: offered })
    }

    /// Registers a peer and pulls its chain
    pub async fn add_client(&self, url: &str) -> Result<ChainAdoption, NodeError> {
        let url = normalize_url(url);
        if self.peers.register(&url) {
            info!("Registered peer {}", url);
        }

        let raw = match self.client.fetch_chain(&url).await {
            Ok(raw) => {
                self.peers.record_success(&url);
                raw
            }
            Err(err) => {
                self.peers.record_failure(&url);
                return Err(err.into());
            }
        };

        let entries: Vec<ChainEntry> = serde_json::from_str(&raw)
            .map_err(|e| NodeError::MalformedInput(format!("chain from {}: {}", url, e)))?;
        self.on_peer_chain_offered(entries)
    }

    /// Pulls the chain of every known peer, logging per-peer failures
    pub async fn sync_with_peers(&self) {
        for url in self.peers.urls() {
            match self.add_client(&url).await {
                Ok(outcome) => debug!("Synced with {}: {:?}", url, outcome),
                Err(err) if err.is_fatal() => error!("Rejected chain from {}: {}", url, err),
                Err(err) => warn!("Could not sync with {}: {}", url, err),
            }
        }
    }

    /// Applies a locally mined block, then gossips it.
    ///
    /// A block that no longer extends the head is dropped without broadcast.
    pub async fn publish_block(&self, block: Block) -> Result<(), NodeError> {
        self.on_block_received(block.clone())?;
        self.broadcast_block(&block).await;
        Ok(())
    }

    pub async fn broadcast_transaction(&self, transaction: &SignedTransaction) {
        let peers = self.peers.urls();
        let client = &self.client;
        let sends = peers.iter().map(|peer| async move {
            (peer, client.send_transaction(peer, transaction).await)
        });

        for (peer, result) in join_all(sends).await {
            self.record_delivery(peer, "transaction", result);
        }
    }

    pub async fn broadcast_block(&self, block: &Block) {
        let peers = self.peers.urls();
        let client = &self.client;
        let sends = peers
            .iter()
            .map(|peer| async move { (peer, client.send_block(peer, block).await) });

        for (peer, result) in join_all(sends).await {
            self.record_delivery(peer, "block", result);
        }
    }

    fn record_delivery(&self, peer: &str, what: &str, result: Result<(), PeerError>) {
        match result {
            Ok(()) => self.peers.record_success(peer),
            Err(err) => {
                warn!("Failed to send {} to {}: {}", what, peer, err);
                self.peers.record_failure(peer);
            }
        }
    }

    /// Runs the mining loop with an entropy-seeded nonce search.
    ///
    /// Only returns on a fatal mining error.
    pub async fn run_node(self: Arc<Self>, settings: MinerSettings) -> Result<(), NodeError> {
        Miner::new(self, StdRng::from_entropy(), settings).run().await
    }
}
