//! Pipelined three-phase BFT engine: PREPARE → PRE-COMMIT → COMMIT
//! over `(block_hash, view, phase)`, quorum `⌊2n/3⌋+1`, up to three block
//! numbers in flight at once but finalized strictly in order.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::block::Block;
use crate::crypto::{bls_verify, BlsKeypair, BlsPublicKey, BlsSignature};
use crate::error::ConsensusError;
use crate::messages::{view_change_signing_payload, vote_signing_payload, Phase};
use crate::primitives::{Address, Hash256};
use crate::validator_set::ValidatorSet;

/// How many block numbers may have an open round at once.
pub const PIPELINE_DEPTH: u64 = 3;

/// A reserved phase value disjoint from PREPARE/PRE-COMMIT/COMMIT, used only
/// to key view-change vote tallies inside the same per-round vote map shape.
const VIEW_CHANGE_PHASE_SLOT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
    Idle,
    Proposing,
    Preparing,
    PreCommitting,
    Committing,
    Finalized,
}

/// One in-flight consensus round for a single block number.
pub struct BftRound {
    pub number: u64,
    pub view: u64,
    pub block: Option<Block>,
    pub block_hash: Option<Hash256>,
    pub state: RoundState,
    /// `votes[phase_tag][validator_index] = signature`, deduped by signer.
    votes: [BTreeMap<usize, BlsSignature>; 3],
    ready_to_finalize: bool,
}

impl BftRound {
    fn new(number: u64, view: u64) -> Self {
        Self {
            number,
            view,
            block: None,
            block_hash: None,
            state: RoundState::Idle,
            votes: [BTreeMap::new(), BTreeMap::new(), BTreeMap::new()],
            ready_to_finalize: false,
        }
    }

    fn vote_count(&self, phase: Phase) -> usize {
        self.votes[phase.tag() as usize].len()
    }
}

/// Selects the leader for a given view. `RoundRobinSelector` is the default;
/// `WeightedRandomSelector` is available for validator sets that want
/// proposal frequency proportional to stake.
pub trait LeaderSelector: Send + Sync {
    fn select(&self, validators: &ValidatorSet, view: u64) -> usize;
}

pub struct RoundRobinSelector;

impl LeaderSelector for RoundRobinSelector {
    fn select(&self, validators: &ValidatorSet, view: u64) -> usize {
        if validators.is_empty() {
            return 0;
        }
        (view % validators.len() as u64) as usize
    }
}

/// Picks a leader by `BLAKE3(view)` mapped onto the cumulative stake
/// distribution; falls back to round-robin if total stake is zero.
pub struct WeightedRandomSelector;

impl LeaderSelector for WeightedRandomSelector {
    fn select(&self, validators: &ValidatorSet, view: u64) -> usize {
        let total = validators.total_stake();
        if total == 0 || validators.is_empty() {
            return RoundRobinSelector.select(validators, view);
        }
        let seed = crate::crypto::blake3_hash(&view.to_le_bytes());
        let mut buf = [0u8; 16];
        buf.copy_from_slice(&seed.as_bytes()[..16]);
        let r = u128::from_be_bytes(buf) % total;
        let mut cumulative = 0u128;
        for v in validators.validators() {
            let mut stake_buf = [0u8; 16];
            stake_buf.copy_from_slice(&v.stake.as_bytes()[16..]);
            cumulative += u128::from_be_bytes(stake_buf);
            if r < cumulative {
                return v.index;
            }
        }
        validators.len() - 1
    }
}

#[derive(Debug, Clone)]
pub enum BftEvent {
    BlockFinalized { number: u64, block: Block },
    ViewChange { new_view: u64, new_leader: usize },
}

struct Inner {
    validator_set: ValidatorSet,
    rounds: BTreeMap<u64, BftRound>,
    current_view: u64,
    finalized_number: Option<u64>,
    view_change_votes: BTreeMap<u64, BTreeMap<usize, BlsSignature>>,
}

impl Inner {
    fn next_block_number(&self) -> u64 {
        self.finalized_number.map_or(0, |n| n + 1)
    }

    fn pipeline_window_contains(&self, number: u64) -> bool {
        number >= self.next_block_number() && number < self.next_block_number() + PIPELINE_DEPTH
    }
}

/// Owns all in-flight rounds for a single validator set. Safe to share via
/// `Arc` across the networking and block-production tasks; all mutation goes
/// through one lock, matching how [`crate::mempool::Mempool`] and
/// [`crate::state::StateDb`] serialize concurrent access.
pub struct BftEngine {
    inner: Mutex<Inner>,
    leader_selector: Box<dyn LeaderSelector>,
    events: tokio::sync::mpsc::Sender<BftEvent>,
    /// This node's own validator index and BLS keypair, if it is a member of
    /// the current validator set. `None` for observer nodes.
    self_validator: Option<(usize, Arc<BlsKeypair>)>,
}

impl BftEngine {
    pub fn new(
        validator_set: ValidatorSet,
        leader_selector: Box<dyn LeaderSelector>,
        self_address: Option<Address>,
        self_keypair: Option<Arc<BlsKeypair>>,
        event_channel_capacity: usize,
    ) -> (Self, tokio::sync::mpsc::Receiver<BftEvent>) {
        let (tx, rx) = tokio::sync::mpsc::channel(event_channel_capacity);
        let self_validator = match (self_address, self_keypair) {
            (Some(addr), Some(kp)) => validator_set.index_of(&addr).map(|idx| (idx, kp)),
            _ => None,
        };
        let engine = Self {
            inner: Mutex::new(Inner {
                validator_set,
                rounds: BTreeMap::new(),
                current_view: 0,
                finalized_number: None,
                view_change_votes: BTreeMap::new(),
            }),
            leader_selector,
            events: tx,
            self_validator,
        };
        (engine, rx)
    }

    pub fn current_view(&self) -> u64 {
        self.inner.lock().current_view
    }

    pub fn leader_for_view(&self, view: u64) -> usize {
        let inner = self.inner.lock();
        self.leader_selector.select(&inner.validator_set, view)
    }

    /// Replaces the validator set, clearing all
    /// in-flight vote state and resetting to `Idle`.
    pub fn update_validator_set(&self, new_set: ValidatorSet) {
        let mut inner = self.inner.lock();
        inner.rounds.clear();
        inner.view_change_votes.clear();
        inner.validator_set = new_set;
        inner.current_view = 0;
        info!("validator set swapped, consensus state reset");
    }

    /// Leader begins a round by proposing `block` at `number`/`view`. The
    /// leader's own PREPARE vote is counted immediately (self-vote rule).
    pub fn propose(
        &self,
        number: u64,
        view: u64,
        block: Block,
        proposer_index: usize,
        proposer_prepare_sig: BlsSignature,
    ) -> Result<(), ConsensusError> {
        let mut inner = self.inner.lock();
        if !inner.pipeline_window_contains(number) {
            return Err(ConsensusError::InvalidProposal);
        }
        if proposer_index >= inner.validator_set.len() {
            return Err(ConsensusError::UnknownValidator);
        }
        let block_hash = block.block_hash();
        let round = inner
            .rounds
            .entry(number)
            .or_insert_with(|| BftRound::new(number, view));
        round.view = view;
        round.block_hash = Some(block_hash);
        round.block = Some(block);
        round.state = RoundState::Proposing;
        round.votes[Phase::Prepare.tag() as usize].insert(proposer_index, proposer_prepare_sig);
        round.state = RoundState::Preparing;
        debug!(number, view, "block proposed, prepare phase open");
        Ok(())
    }

    /// Records a vote from `validator_index` for `(number, phase)`. Advances
    /// the round's phase when quorum is reached, casting this node's own
    /// next-phase vote immediately if it is a member of the validator set.
    pub fn record_vote(
        &self,
        number: u64,
        phase: Phase,
        validator_index: usize,
        block_hash: Hash256,
        sig: BlsSignature,
    ) -> Result<(), ConsensusError> {
        let mut inner = self.inner.lock();
        let quorum = inner.validator_set.quorum_threshold();
        let bls_pubkey = inner
            .validator_set
            .get(validator_index)
            .ok_or(ConsensusError::UnknownValidator)?
            .bls_pubkey;
        let view = inner.rounds.get(&number).map(|r| r.view).unwrap_or(0);
        let message = vote_signing_payload(&block_hash, view, phase);
        if !bls_verify(&bls_pubkey, &message, &sig) {
            return Err(ConsensusError::InvalidProposal);
        }

        let round = inner
            .rounds
            .get_mut(&number)
            .ok_or(ConsensusError::InvalidProposal)?;
        if round.block_hash != Some(block_hash) {
            return Err(ConsensusError::InvalidProposal);
        }
        if round.votes[phase.tag() as usize].contains_key(&validator_index) {
            return Err(ConsensusError::DuplicateVote);
        }
        round.votes[phase.tag() as usize].insert(validator_index, sig);

        if round.vote_count(phase) >= quorum {
            self.advance_phase(&mut inner, number, phase)?;
        }
        Ok(())
    }

    fn advance_phase(
        &self,
        inner: &mut Inner,
        number: u64,
        reached: Phase,
    ) -> Result<(), ConsensusError> {
        let self_validator = self.self_validator.clone();
        let round = inner
            .rounds
            .get_mut(&number)
            .ok_or(ConsensusError::InvalidProposal)?;
        let block_hash = round.block_hash.ok_or(ConsensusError::InvalidProposal)?;
        let view = round.view;

        match reached {
            Phase::Prepare => {
                round.state = RoundState::PreCommitting;
                debug!(number, "prepare quorum reached, entering pre-commit");
                if let Some((idx, kp)) = &self_validator {
                    let msg = vote_signing_payload(&block_hash, view, Phase::PreCommit);
                    let sig = kp.sign(&msg);
                    round.votes[Phase::PreCommit.tag() as usize].insert(*idx, sig);
                }
            }
            Phase::PreCommit => {
                round.state = RoundState::Committing;
                debug!(number, "pre-commit quorum reached, entering commit");
                if let Some((idx, kp)) = &self_validator {
                    let msg = vote_signing_payload(&block_hash, view, Phase::Commit);
                    let sig = kp.sign(&msg);
                    round.votes[Phase::Commit.tag() as usize].insert(*idx, sig);
                }
            }
            Phase::Commit => {
                round.ready_to_finalize = true;
                debug!(number, "commit quorum reached");
            }
        }

        let quorum = inner.validator_set.quorum_threshold();
        // A self-vote inserted above may itself reach quorum (e.g. n=1).
        if reached != Phase::Commit {
            let round = inner.rounds.get(&number).unwrap();
            let next_phase = match reached {
                Phase::Prepare => Phase::PreCommit,
                Phase::PreCommit => Phase::Commit,
                Phase::Commit => unreachable!(),
            };
            if round.vote_count(next_phase) >= quorum {
                return self.advance_phase(inner, number, next_phase);
            }
        } else {
            self.try_finalize_cascade(inner);
        }
        Ok(())
    }

    /// Emits `BlockFinalized` for every contiguous ready round starting at
    /// the next expected block number, in strict increasing order.
    fn try_finalize_cascade(&self, inner: &mut Inner) {
        loop {
            let next = inner.next_block_number();
            let ready = matches!(inner.rounds.get(&next), Some(r) if r.ready_to_finalize);
            if !ready {
                break;
            }
            let mut round = inner.rounds.remove(&next).unwrap();
            round.state = RoundState::Finalized;
            let block = round.block.take().expect("finalized round carries a block");
            inner.finalized_number = Some(next);
            info!(number = next, "block finalized");
            let _ = self.events.try_send(BftEvent::BlockFinalized { number: next, block });
        }
    }

    /// Records a view-change vote; on quorum, aborts all non-finalized
    /// in-flight rounds and elects a new leader for `proposed_view`.
    pub fn record_view_change(
        &self,
        current_view: u64,
        proposed_view: u64,
        validator_index: usize,
        sig: BlsSignature,
    ) -> Result<(), ConsensusError> {
        let mut inner = self.inner.lock();
        let bls_pubkey = inner
            .validator_set
            .get(validator_index)
            .ok_or(ConsensusError::UnknownValidator)?
            .bls_pubkey;
        let message = view_change_signing_payload(current_view, proposed_view);
        if !bls_verify(&bls_pubkey, &message, &sig) {
            return Err(ConsensusError::InvalidProposal);
        }
        if current_view != inner.current_view {
            return Err(ConsensusError::ViewTimeout);
        }

        let votes = inner.view_change_votes.entry(proposed_view).or_default();
        if votes.contains_key(&validator_index) {
            return Err(ConsensusError::DuplicateVote);
        }
        votes.insert(validator_index, sig);
        let quorum = inner.validator_set.quorum_threshold();
        if votes.len() >= quorum {
            inner.rounds.retain(|_, r| r.state == RoundState::Finalized);
            inner.view_change_votes.clear();
            inner.current_view = proposed_view;
            let new_leader = self.leader_selector.select(&inner.validator_set, proposed_view);
            warn!(proposed_view, new_leader, "view change quorum reached");
            let _ = self.events.try_send(BftEvent::ViewChange {
                new_view: proposed_view,
                new_leader,
            });
        }
        Ok(())
    }

    pub fn round_state(&self, number: u64) -> Option<RoundState> {
        self.inner.lock().rounds.get(&number).map(|r| r.state)
    }

    pub fn finalized_number(&self) -> Option<u64> {
        self.inner.lock().finalized_number
    }

    /// `(block_hash, view, phase)` reserved view-change phase sentinel used
    /// only for documentation purposes; view-change votes are tallied in
    /// their own map rather than sharing `BftRound::votes`.
    pub const RESERVED_VIEW_CHANGE_PHASE: usize = VIEW_CHANGE_PHASE_SLOT;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockHeader;
    use crate::crypto::BlsKeypair;
    use crate::primitives::Hash256;
    use crate::validator_set::ValidatorInfo;
    use crate::primitives::UInt256;

    fn test_block(number: u64) -> Block {
        Block {
            header: BlockHeader {
                number,
                parent_hash: Hash256::ZERO,
                state_root: Hash256::ZERO,
                transactions_root: Hash256::ZERO,
                receipts_root: Hash256::ZERO,
                timestamp_ms: 0,
                proposer: Address::ZERO,
                chain_id: 1,
                gas_used: 0,
                gas_limit: 1_000_000,
                base_fee: 1,
                protocol_version: 1,
                extra_data: vec![],
            },
            transactions: vec![],
            receipts: vec![],
        }
    }

    fn validator_set(keypairs: &[BlsKeypair]) -> ValidatorSet {
        ValidatorSet::new(
            keypairs
                .iter()
                .enumerate()
                .map(|(i, kp)| ValidatorInfo {
                    peer_id: [i as u8; 32],
                    ed25519_pubkey: [i as u8; 32],
                    bls_pubkey: kp.public,
                    address: Address::from_bytes([i as u8; 20]),
                    stake: UInt256::from_u64(100),
                    index: i,
                })
                .collect(),
        )
    }

    #[test]
    fn single_validator_finalizes_immediately_on_propose() {
        let kp = BlsKeypair::from_ikm(&[1u8; 32]).unwrap();
        let set = validator_set(std::slice::from_ref(&kp));
        let (engine, mut rx) = BftEngine::new(set, Box::new(RoundRobinSelector), None, None, 8);

        let block = test_block(0);
        let block_hash = block.block_hash();
        let msg = vote_signing_payload(&block_hash, 0, Phase::Prepare);
        let sig = kp.sign(&msg);
        engine.propose(0, 0, block, 0, sig).unwrap();

        // Leader's own prepare vote already reaches quorum=1; the pre-commit
        // and commit self-votes happen only via `record_vote`'s quorum path,
        // so drive them explicitly here as a second validator would.
        let msg = vote_signing_payload(&block_hash, 0, Phase::PreCommit);
        let sig = kp.sign(&msg);
        engine.record_vote(0, Phase::PreCommit, 0, block_hash, sig).unwrap();
        let msg = vote_signing_payload(&block_hash, 0, Phase::Commit);
        let sig = kp.sign(&msg);
        engine.record_vote(0, Phase::Commit, 0, block_hash, sig).unwrap();

        assert_eq!(engine.finalized_number(), Some(0));
        let event = rx.try_recv().unwrap();
        matches!(event, BftEvent::BlockFinalized { number: 0, .. });
    }

    #[test]
    fn four_validators_reach_quorum_at_three_votes() {
        let kps: Vec<BlsKeypair> = (0..4)
            .map(|i| BlsKeypair::from_ikm(&[i as u8; 32]).unwrap())
            .collect();
        let set = validator_set(&kps);
        let (engine, _rx) = BftEngine::new(set, Box::new(RoundRobinSelector), None, None, 8);

        let block = test_block(0);
        let block_hash = block.block_hash();
        let prepare_sig0 = kps[0].sign(&vote_signing_payload(&block_hash, 0, Phase::Prepare));
        engine.propose(0, 0, block, 0, prepare_sig0).unwrap();

        for i in 1..3 {
            let sig = kps[i].sign(&vote_signing_payload(&block_hash, 0, Phase::Prepare));
            engine.record_vote(0, Phase::Prepare, i, block_hash, sig).unwrap();
        }
        assert_eq!(engine.round_state(0), Some(RoundState::PreCommitting));
    }

    #[test]
    fn duplicate_vote_rejected() {
        let kps: Vec<BlsKeypair> = (0..4)
            .map(|i| BlsKeypair::from_ikm(&[i as u8; 32]).unwrap())
            .collect();
        let set = validator_set(&kps);
        let (engine, _rx) = BftEngine::new(set, Box::new(RoundRobinSelector), None, None, 8);

        let block = test_block(0);
        let block_hash = block.block_hash();
        let prepare_sig0 = kps[0].sign(&vote_signing_payload(&block_hash, 0, Phase::Prepare));
        engine.propose(0, 0, block, 0, prepare_sig0.clone()).unwrap();

        let result = engine.record_vote(0, Phase::Prepare, 0, block_hash, prepare_sig0);
        assert_eq!(result, Err(ConsensusError::DuplicateVote));
    }

    #[test]
    fn view_change_quorum_advances_view_and_aborts_rounds() {
        let kps: Vec<BlsKeypair> = (0..4)
            .map(|i| BlsKeypair::from_ikm(&[i as u8; 32]).unwrap())
            .collect();
        let set = validator_set(&kps);
        let (engine, mut rx) = BftEngine::new(set, Box::new(RoundRobinSelector), None, None, 8);

        let block = test_block(0);
        let block_hash = block.block_hash();
        let prepare_sig0 = kps[0].sign(&vote_signing_payload(&block_hash, 0, Phase::Prepare));
        engine.propose(0, 0, block, 0, prepare_sig0).unwrap();

        for i in 0..3 {
            let sig = kps[i].sign(&view_change_signing_payload(0, 1));
            engine.record_view_change(0, 1, i, sig).unwrap();
        }

        assert_eq!(engine.current_view(), 1);
        assert!(engine.round_state(0).is_none());
        let event = rx.try_recv().unwrap();
        matches!(event, BftEvent::ViewChange { new_view: 1, .. });
    }

    #[test]
    fn pipelined_rounds_finalize_strictly_in_order() {
        let kps: Vec<BlsKeypair> = (0..4)
            .map(|i| BlsKeypair::from_ikm(&[i as u8; 32]).unwrap())
            .collect();
        let set = validator_set(&kps);
        let (engine, mut rx) = BftEngine::new(set, Box::new(RoundRobinSelector), None, None, 8);

        let mut hashes = vec![];
        for number in 0..3u64 {
            let block = test_block(number);
            let hash = block.block_hash();
            hashes.push(hash);
            let sig = kps[0].sign(&vote_signing_payload(&hash, 0, Phase::Prepare));
            engine.propose(number, 0, block, 0, sig).unwrap();
        }

        // Drive round 1 and round 2 to full commit quorum before round 0,
        // simulating out-of-order quorum arrival; finalization must still
        // cascade in order once round 0 also reaches commit.
        for &number in &[1u64, 2u64] {
            let hash = hashes[number as usize];
            for i in 1..3 {
                let sig = kps[i].sign(&vote_signing_payload(&hash, 0, Phase::Prepare));
                engine.record_vote(number, Phase::Prepare, i, hash, sig).unwrap();
            }
            // The proposer does not auto-vote past prepare for an engine with
            // no local keypair, so three of the four validators must submit
            // pre-commit/commit votes explicitly to reach quorum.
            for i in 1..4 {
                let sig = kps[i].sign(&vote_signing_payload(&hash, 0, Phase::PreCommit));
                engine.record_vote(number, Phase::PreCommit, i, hash, sig).unwrap();
            }
            for i in 1..4 {
                let sig = kps[i].sign(&vote_signing_payload(&hash, 0, Phase::Commit));
                engine.record_vote(number, Phase::Commit, i, hash, sig).unwrap();
            }
        }
        assert_eq!(engine.finalized_number(), None);

        let hash0 = hashes[0];
        for i in 1..3 {
            let sig = kps[i].sign(&vote_signing_payload(&hash0, 0, Phase::Prepare));
            engine.record_vote(0, Phase::Prepare, i, hash0, sig).unwrap();
        }
        for i in 1..4 {
            let sig = kps[i].sign(&vote_signing_payload(&hash0, 0, Phase::PreCommit));
            engine.record_vote(0, Phase::PreCommit, i, hash0, sig).unwrap();
        }
        for i in 1..4 {
            let sig = kps[i].sign(&vote_signing_payload(&hash0, 0, Phase::Commit));
            engine.record_vote(0, Phase::Commit, i, hash0, sig).unwrap();
        }

        assert_eq!(engine.finalized_number(), Some(2));
        let mut finalized = vec![];
        while let Ok(BftEvent::BlockFinalized { number, .. }) = rx.try_recv() {
            finalized.push(number);
        }
        assert_eq!(finalized, vec![0, 1, 2]);
    }
}
