use log::{debug, error, info, warn};
use rand::Rng;

use std::sync::Arc;
use std::time::Duration;

use super::block::Block;
use super::node::{Node, NodeError};
use super::transaction::{validate_transactions, SignedTransaction};

/// Pacing of the mining loop
#[derive(Debug, Clone)]
pub struct MinerSettings {
    /// Sleep between polls while the pool is empty
    pub idle_interval: Duration,
    /// Proof-of-work attempts between cooperative yields
    pub attempts_per_yield: u32,
}

impl Default for MinerSettings {
    fn default() -> Self {
        MinerSettings {
            idle_interval: Duration::from_millis(50),
            attempts_per_yield: 256,
        }
    }
}

/// What a single [`Miner::step`] did
#[derive(Debug)]
pub enum MiningStep {
    /// Nothing to mine
    Idle,
    /// A fresh candidate was built from the pool
    Assembled,
    /// The head moved under the candidate, which was discarded
    Stale,
    /// One proof-of-work attempt failed
    Working,
    Mined(Block),
}

/// The per-node mining loop.
///
/// The nonce search draws from `rng`, so a seeded generator makes mining
/// reproducible.
pub struct Miner<R> {
    node: Arc<Node>,
    rng: R,
    settings: MinerSettings,
    candidate: Option<Block>,
    snapshot: Option<Vec<SignedTransaction>>,
}

impl<R: Rng> Miner<R> {
    pub fn new(node: Arc<Node>, rng: R, settings: MinerSettings) -> Self {
        Miner {
            node,
            rng,
            settings,
            candidate: None,
            snapshot: None,
        }
    }

    /// One bounded unit of mining work.
    ///
    /// A pending pool that fails validation against the ledger is returned as
    /// a `ProtocolViolation`. A pool whose transactions only overdraw a
    /// sender together is returned as `NegativeBalance`. Either way the node
    /// would otherwise keep mining a block it cannot apply.
    pub fn step(&mut self) -> Result<MiningStep, NodeError> {
        let (head, mut ledger) = self.node.mining_view();

        if let Some(candidate) = &self.candidate {
            if candidate.previous != head {
                debug!("Head moved to {}, discarding candidate on {}", head, candidate.previous);
                self.candidate = None;
                self.snapshot = None;
                return Ok(MiningStep::Stale);
            }
        }

        let pool = self.node.pending_transactions();
        if !pool.is_empty() && self.snapshot.as_ref() != Some(&pool) {
            validate_transactions(&pool, Some(&ledger)).map_err(|e| {
                NodeError::ProtocolViolation(format!("pending pool failed validation: {}", e))
            })?;

            debug!("Assembling candidate with {} transactions on {}", pool.len(), head);
            let candidate = Block::new(pool.clone(), head, self.node.address().clone());
            ledger.apply_block(&candidate).map_err(|e| {
                NodeError::NegativeBalance(format!("pending pool overdraws the ledger: {}", e))
            })?;

            self.candidate = Some(candidate);
            self.snapshot = Some(pool);
            return Ok(MiningStep::Assembled);
        }

        let Some(candidate) = self.candidate.as_mut() else {
            return Ok(MiningStep::Idle);
        };

        let found = candidate
            .attempt_proof_of_work(self.node.difficulty(), &mut self.rng)
            .map_err(|e| {
                NodeError::ProtocolViolation(format!("cannot hash candidate block: {}", e))
            })?;
        if !found {
            return Ok(MiningStep::Working);
        }

        self.snapshot = None;
        Ok(self
            .candidate
            .take()
            .map(MiningStep::Mined)
            .unwrap_or(MiningStep::Idle))
    }

    /// Runs until a fatal error; yields between bounded attempts.
    ///
    /// Losing the race for the head drops the mined block. A mined block that
    /// the ledger rejects stops the loop.
    pub async fn run(mut self) -> Result<(), NodeError> {
        info!("Miner started for {}", self.node.address());
        let mut attempts = 0u32;

        loop {
            match self.step()? {
                MiningStep::Mined(block) => {
                    attempts = 0;
                    let hash = block.hash.clone();
                    match self.node.publish_block(block).await {
                        Ok(()) => info!("Mined block {}", hash),
                        Err(err @ NodeError::NegativeBalance(_)) => {
                            error!("Mined block {} does not apply: {}", hash, err);
                            return Err(err);
                        }
                        Err(err) => warn!("Dropped mined block {}: {}", hash, err),
                    }
                }
                MiningStep::Idle => {
                    attempts = 0;
                    tokio::time::sleep(self.settings.idle_interval).await;
                }
                MiningStep::Working => {
                    attempts += 1;
                    if attempts >= self.settings.attempts_per_yield {
                        attempts = 0;
                        tokio::task::yield_now().await;
                    }
                }
                MiningStep::Assembled | MiningStep::Stale => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::block::tests::mine;
    use crate::blockchain::crypto::Wallet;
    use crate::blockchain::node::tests::{mined_block, test_node, transfer, DIFFICULTY};
    use crate::blockchain::node::Admission;
    use crate::blockchain::peers::testing::RecordingPeers;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn miner_for(node: &Arc<Node>, seed: u64) -> Miner<StdRng> {
        Miner::new(node.clone(), StdRng::seed_from_u64(seed), MinerSettings::default())
    }

    fn mine_until_found(miner: &mut Miner<StdRng>) -> Block {
        loop {
            match miner.step().unwrap() {
                MiningStep::Mined(block) => return block,
                MiningStep::Working | MiningStep::Assembled => {}
                other => panic!("unexpected step {:?}", other),
            }
        }
    }

    #[test]
    fn test_idle_with_empty_pool() {
        let peers = Arc::new(RecordingPeers::default());
        let node = Arc::new(test_node(Wallet::new(), true, &peers));
        let mut miner = miner_for(&node, 1);

        assert!(matches!(miner.step().unwrap(), MiningStep::Idle));
    }

    #[tokio::test]
    async fn test_mines_pool_into_valid_block() {
        let peers = Arc::new(RecordingPeers::default());
        let alice = Wallet::new();
        let bob = Wallet::new();
        let node = Arc::new(test_node(alice.clone(), true, &peers));
        node.peers().register("http://peer:5000");

        let signed = transfer(&alice, bob.address(), 30.0, 1.0);
        assert!(matches!(node.on_transaction_received(signed.clone()), Admission::Admitted));

        let mut miner = miner_for(&node, 11);
        assert!(matches!(miner.step().unwrap(), MiningStep::Assembled));
        let block = mine_until_found(&mut miner);

        assert_eq!(block.transactions, vec![signed]);
        assert_eq!(&block.miner, node.address());
        assert_eq!(block.previous, "0");
        block.validate(Some(&node.ledger()), DIFFICULTY).unwrap();

        node.publish_block(block).await.unwrap();
        assert_eq!(node.balance_of(alice.address()), Some(69.0));
        assert_eq!(node.balance_of(bob.address()), Some(30.0));
        assert_eq!(peers.blocks.lock().unwrap().len(), 1);
        assert!(matches!(miner.step().unwrap(), MiningStep::Idle));
    }

    #[test]
    fn test_same_seed_mines_same_block() {
        let peers = Arc::new(RecordingPeers::default());
        let alice = Wallet::new();
        let node = Arc::new(test_node(alice.clone(), true, &peers));
        node.on_transaction_received(transfer(&alice, alice.address(), 5.0, 0.0));

        let first = mine_until_found(&mut miner_for(&node, 5));
        let second = mine_until_found(&mut miner_for(&node, 5));
        assert_eq!(first, second);
    }

    #[test]
    fn test_candidate_discarded_when_head_moves() {
        let peers = Arc::new(RecordingPeers::default());
        let alice = Wallet::new();
        let bob = Wallet::new();
        let node = Arc::new(test_node(alice.clone(), true, &peers));

        node.on_transaction_received(transfer(&alice, bob.address(), 10.0, 0.0));
        let mut miner = miner_for(&node, 3);
        assert!(matches!(miner.step().unwrap(), MiningStep::Assembled));

        // A competing block lands first.
        let competing = mined_block(&node, vec![transfer(&alice, bob.address(), 1.0, 0.0)], bob.address());
        node.on_block_received(competing).unwrap();

        assert!(matches!(miner.step().unwrap(), MiningStep::Stale));
        assert!(matches!(miner.step().unwrap(), MiningStep::Assembled));
        let block = mine_until_found(&mut miner);
        assert_eq!(block.previous, node.head());
    }

    #[test]
    fn test_invalid_pool_is_fatal() {
        let peers = Arc::new(RecordingPeers::default());
        let alice = Wallet::new();
        let bob = Wallet::new();
        let node = Arc::new(test_node(alice.clone(), true, &peers));

        let pending = transfer(&alice, bob.address(), 80.0, 0.0);
        assert!(matches!(node.on_transaction_received(pending), Admission::Admitted));

        // A peer block spends most of alice's balance, stranding the pooled transfer.
        let mut spend = Block::new(
            vec![transfer(&alice, bob.address(), 90.0, 0.0)],
            node.head(),
            bob.address().clone(),
        );
        mine(&mut spend, DIFFICULTY, 8);
        node.on_block_received(spend).unwrap();

        let err = miner_for(&node, 4).step().unwrap_err();
        assert!(matches!(err, NodeError::ProtocolViolation(_)));
        assert!(err.is_fatal());
    }

    fn pool_overdrawn_in_aggregate() -> Arc<Node> {
        let peers = Arc::new(RecordingPeers::default());
        let alice = Wallet::new();
        let bob = Wallet::new();
        let carol = Wallet::new();
        let node = Arc::new(test_node(alice.clone(), true, &peers));

        // 40 + 40 fits alice's 100 at admission time.
        let to_bob = transfer(&alice, bob.address(), 40.0, 0.0);
        let to_carol = transfer(&alice, carol.address(), 40.0, 0.0);
        assert!(matches!(node.on_transaction_received(to_bob), Admission::Admitted));
        assert!(matches!(node.on_transaction_received(to_carol), Admission::Admitted));

        // After a peer block spends 30, each still fits alone but not together.
        let spend = mined_block(&node, vec![transfer(&alice, bob.address(), 30.0, 0.0)], bob.address());
        node.on_block_received(spend).unwrap();
        assert_eq!(node.balance_of(alice.address()), Some(70.0));
        assert_eq!(node.pending_transactions().len(), 2);
        node
    }

    #[test]
    fn test_pool_overdrawn_in_aggregate_is_fatal() {
        let node = pool_overdrawn_in_aggregate();
        let chain_len = node.chain_len();

        let err = miner_for(&node, 6).step().unwrap_err();
        assert!(matches!(err, NodeError::NegativeBalance(_)));
        assert!(err.is_fatal());
        assert_eq!(node.chain_len(), chain_len);
    }

    #[tokio::test]
    async fn test_run_stops_on_overdrawn_pool() {
        let node = pool_overdrawn_in_aggregate();
        node.peers().register("http://peer:5000");

        let err = miner_for(&node, 6).run().await.unwrap_err();
        assert!(matches!(err, NodeError::NegativeBalance(_)));
        assert_eq!(node.chain_len(), 2);
    }
}
