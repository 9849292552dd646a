//! Consensus and gossip wire messages. Each message is preceded by a
//! 1-byte tag; `sender_id` and `timestamp_ms` prefix every message. The
//! tx-relay, block-relay, and gossip-control families grouped under
//! `0x20`/`0x30`/`0x40` are given their own sequential sub-tags here so
//! decoding is unambiguous.

use crate::block::Block;
use crate::codec::{Codec, CodecError, CodecResult, Reader, Writer};
use crate::crypto::{BlsPublicKey, BlsSignature};
use crate::primitives::Hash256;
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};

/// Fields common to every wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub sender_id: Hash256,
    pub timestamp_ms: u64,
}

impl Codec for MessageHeader {
    fn encode(&self, w: &mut Writer) {
        w.write_hash(&self.sender_id);
        w.write_u64(self.timestamp_ms);
    }

    fn decode(r: &mut Reader) -> CodecResult<Self> {
        Ok(MessageHeader {
            sender_id: r.read_hash()?,
            timestamp_ms: r.read_u64()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Prepare,
    PreCommit,
    Commit,
}

impl Phase {
    pub fn tag(self) -> u8 {
        match self {
            Phase::Prepare => 0,
            Phase::PreCommit => 1,
            Phase::Commit => 2,
        }
    }

    pub fn from_tag(tag: u8) -> CodecResult<Self> {
        Ok(match tag {
            0 => Phase::Prepare,
            1 => Phase::PreCommit,
            2 => Phase::Commit,
            _ => return Err(CodecError::Eof),
        })
    }
}

/// The exact bytes a `ConsensusVote`'s BLS signature covers.
pub fn vote_signing_payload(block_hash: &Hash256, view: u64, phase: Phase) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32 + 8 + 1);
    buf.extend_from_slice(block_hash.as_bytes());
    buf.extend_from_slice(&view.to_le_bytes());
    buf.push(phase.tag());
    buf
}

/// The exact bytes a `ViewChange`'s BLS signature covers.
pub fn view_change_signing_payload(current_view: u64, proposed_view: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16);
    buf.extend_from_slice(&current_view.to_le_bytes());
    buf.extend_from_slice(&proposed_view.to_le_bytes());
    buf
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusProposal {
    pub header: MessageHeader,
    pub view: u64,
    pub block_number: u64,
    pub block_hash: Hash256,
    pub block_data: Vec<u8>,
    pub proposer_bls_sig: BlsSignature,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsensusVote {
    pub header: MessageHeader,
    pub block_number: u64,
    pub block_hash: Hash256,
    pub phase: Phase,
    pub voter_bls_sig: BlsSignature,
    pub voter_bls_pubkey: BlsPublicKey,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewChangeMessage {
    pub header: MessageHeader,
    pub current_view: u64,
    pub proposed_view: u64,
    pub voter_bls_sig: BlsSignature,
    pub voter_bls_pubkey: BlsPublicKey,
}

fn write_bls_sig(w: &mut Writer, sig: &BlsSignature) {
    w.write_fixed(&sig.0);
}

fn read_bls_sig(r: &mut Reader) -> CodecResult<BlsSignature> {
    Ok(BlsSignature(r.read_fixed::<96>()?))
}

fn write_bls_pubkey(w: &mut Writer, pk: &BlsPublicKey) {
    w.write_fixed(&pk.0);
}

fn read_bls_pubkey(r: &mut Reader) -> CodecResult<BlsPublicKey> {
    Ok(BlsPublicKey(r.read_fixed::<48>()?))
}

impl Codec for ConsensusProposal {
    fn encode(&self, w: &mut Writer) {
        self.header.encode(w);
        w.write_u64(self.view);
        w.write_u64(self.block_number);
        w.write_hash(&self.block_hash);
        w.write_bytes(&self.block_data);
        write_bls_sig(w, &self.proposer_bls_sig);
    }

    fn decode(r: &mut Reader) -> CodecResult<Self> {
        Ok(ConsensusProposal {
            header: MessageHeader::decode(r)?,
            view: r.read_u64()?,
            block_number: r.read_u64()?,
            block_hash: r.read_hash()?,
            block_data: r.read_bytes()?,
            proposer_bls_sig: read_bls_sig(r)?,
        })
    }
}

impl Codec for ConsensusVote {
    fn encode(&self, w: &mut Writer) {
        self.header.encode(w);
        w.write_u64(self.block_number);
        w.write_hash(&self.block_hash);
        w.write_u8(self.phase.tag());
        write_bls_sig(w, &self.voter_bls_sig);
        write_bls_pubkey(w, &self.voter_bls_pubkey);
    }

    fn decode(r: &mut Reader) -> CodecResult<Self> {
        Ok(ConsensusVote {
            header: MessageHeader::decode(r)?,
            block_number: r.read_u64()?,
            block_hash: r.read_hash()?,
            phase: Phase::from_tag(r.read_u8()?)?,
            voter_bls_sig: read_bls_sig(r)?,
            voter_bls_pubkey: read_bls_pubkey(r)?,
        })
    }
}

impl Codec for ViewChangeMessage {
    fn encode(&self, w: &mut Writer) {
        self.header.encode(w);
        w.write_u64(self.current_view);
        w.write_u64(self.proposed_view);
        write_bls_sig(w, &self.voter_bls_sig);
        write_bls_pubkey(w, &self.voter_bls_pubkey);
    }

    fn decode(r: &mut Reader) -> CodecResult<Self> {
        Ok(ViewChangeMessage {
            header: MessageHeader::decode(r)?,
            current_view: r.read_u64()?,
            proposed_view: r.read_u64()?,
            voter_bls_sig: read_bls_sig(r)?,
            voter_bls_pubkey: read_bls_pubkey(r)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TxAnnounce {
    pub header: MessageHeader,
    pub tx_hashes: Vec<Hash256>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TxRequest {
    pub header: MessageHeader,
    pub tx_hashes: Vec<Hash256>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TxPayload {
    pub header: MessageHeader,
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockAnnounce {
    pub header: MessageHeader,
    pub block_number: u64,
    pub block_hash: Hash256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRequest {
    pub header: MessageHeader,
    pub block_number: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockPayload {
    pub header: MessageHeader,
    pub block: Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncRequest {
    pub header: MessageHeader,
    pub from_block_number: u64,
}

fn write_hash_list(w: &mut Writer, hashes: &[Hash256]) {
    w.write_varint(hashes.len() as u64);
    for h in hashes {
        w.write_hash(h);
    }
}

fn read_hash_list(r: &mut Reader) -> CodecResult<Vec<Hash256>> {
    let len = r.read_varint()? as usize;
    (0..len).map(|_| r.read_hash()).collect()
}

impl Codec for TxAnnounce {
    fn encode(&self, w: &mut Writer) {
        self.header.encode(w);
        write_hash_list(w, &self.tx_hashes);
    }
    fn decode(r: &mut Reader) -> CodecResult<Self> {
        Ok(TxAnnounce {
            header: MessageHeader::decode(r)?,
            tx_hashes: read_hash_list(r)?,
        })
    }
}

impl Codec for TxRequest {
    fn encode(&self, w: &mut Writer) {
        self.header.encode(w);
        write_hash_list(w, &self.tx_hashes);
    }
    fn decode(r: &mut Reader) -> CodecResult<Self> {
        Ok(TxRequest {
            header: MessageHeader::decode(r)?,
            tx_hashes: read_hash_list(r)?,
        })
    }
}

impl Codec for TxPayload {
    fn encode(&self, w: &mut Writer) {
        self.header.encode(w);
        w.write_varint(self.transactions.len() as u64);
        for tx in &self.transactions {
            w.write_bytes(&tx.to_canonical_bytes());
        }
    }
    fn decode(r: &mut Reader) -> CodecResult<Self> {
        let header = MessageHeader::decode(r)?;
        let len = r.read_varint()? as usize;
        let mut transactions = Vec::with_capacity(len);
        for _ in 0..len {
            let bytes = r.read_bytes()?;
            transactions.push(Transaction::from_canonical_bytes(&bytes)?);
        }
        Ok(TxPayload { header, transactions })
    }
}

impl Codec for BlockAnnounce {
    fn encode(&self, w: &mut Writer) {
        self.header.encode(w);
        w.write_u64(self.block_number);
        w.write_hash(&self.block_hash);
    }
    fn decode(r: &mut Reader) -> CodecResult<Self> {
        Ok(BlockAnnounce {
            header: MessageHeader::decode(r)?,
            block_number: r.read_u64()?,
            block_hash: r.read_hash()?,
        })
    }
}

impl Codec for BlockRequest {
    fn encode(&self, w: &mut Writer) {
        self.header.encode(w);
        w.write_u64(self.block_number);
    }
    fn decode(r: &mut Reader) -> CodecResult<Self> {
        Ok(BlockRequest {
            header: MessageHeader::decode(r)?,
            block_number: r.read_u64()?,
        })
    }
}

impl Codec for BlockPayload {
    fn encode(&self, w: &mut Writer) {
        self.header.encode(w);
        w.write_bytes(&self.block.header.to_canonical_bytes());
        w.write_varint(self.block.transactions.len() as u64);
        for tx in &self.block.transactions {
            w.write_bytes(&tx.to_canonical_bytes());
        }
        w.write_varint(self.block.receipts.len() as u64);
        for receipt in &self.block.receipts {
            w.write_bool(receipt.success);
            w.write_u64(receipt.gas_used);
            w.write_u64(receipt.effective_gas_price);
            w.write_hash(&receipt.tx_hash);
        }
    }
    fn decode(r: &mut Reader) -> CodecResult<Self> {
        use crate::block::BlockHeader;
        use crate::transaction::Receipt;

        let header = MessageHeader::decode(r)?;
        let header_bytes = r.read_bytes()?;
        let block_header = BlockHeader::from_canonical_bytes(&header_bytes)?;
        let tx_len = r.read_varint()? as usize;
        let mut transactions = Vec::with_capacity(tx_len);
        for _ in 0..tx_len {
            let bytes = r.read_bytes()?;
            transactions.push(Transaction::from_canonical_bytes(&bytes)?);
        }
        let receipt_len = r.read_varint()? as usize;
        let mut receipts = Vec::with_capacity(receipt_len);
        for _ in 0..receipt_len {
            let success = r.read_bool()?;
            let gas_used = r.read_u64()?;
            let effective_gas_price = r.read_u64()?;
            let tx_hash = r.read_hash()?;
            receipts.push(Receipt {
                tx_hash,
                success,
                gas_used,
                effective_gas_price,
                logs: vec![],
                error_code: None,
            });
        }
        Ok(BlockPayload {
            header,
            block: Block {
                header: block_header,
                transactions,
                receipts,
            },
        })
    }
}

impl Codec for SyncRequest {
    fn encode(&self, w: &mut Writer) {
        self.header.encode(w);
        w.write_u64(self.from_block_number);
    }
    fn decode(r: &mut Reader) -> CodecResult<Self> {
        Ok(SyncRequest {
            header: MessageHeader::decode(r)?,
            from_block_number: r.read_u64()?,
        })
    }
}

/// Gossip control plane, patterned after pubsub mesh maintenance
/// (ping/pong liveness, ihave/iwant reconciliation, graft/prune mesh edges).
#[derive(Debug, Clone, PartialEq)]
pub enum GossipControl {
    Ping { header: MessageHeader, nonce: u64 },
    Pong { header: MessageHeader, nonce: u64 },
    IHave { header: MessageHeader, ids: Vec<Hash256> },
    IWant { header: MessageHeader, ids: Vec<Hash256> },
    Graft { header: MessageHeader, topic: String },
    Prune { header: MessageHeader, topic: String },
}

impl Codec for GossipControl {
    fn encode(&self, w: &mut Writer) {
        match self {
            GossipControl::Ping { header, nonce } => {
                w.write_u8(0);
                header.encode(w);
                w.write_u64(*nonce);
            }
            GossipControl::Pong { header, nonce } => {
                w.write_u8(1);
                header.encode(w);
                w.write_u64(*nonce);
            }
            GossipControl::IHave { header, ids } => {
                w.write_u8(2);
                header.encode(w);
                write_hash_list(w, ids);
            }
            GossipControl::IWant { header, ids } => {
                w.write_u8(3);
                header.encode(w);
                write_hash_list(w, ids);
            }
            GossipControl::Graft { header, topic } => {
                w.write_u8(4);
                header.encode(w);
                w.write_string(topic);
            }
            GossipControl::Prune { header, topic } => {
                w.write_u8(5);
                header.encode(w);
                w.write_string(topic);
            }
        }
    }

    fn decode(r: &mut Reader) -> CodecResult<Self> {
        Ok(match r.read_u8()? {
            0 => GossipControl::Ping {
                header: MessageHeader::decode(r)?,
                nonce: r.read_u64()?,
            },
            1 => GossipControl::Pong {
                header: MessageHeader::decode(r)?,
                nonce: r.read_u64()?,
            },
            2 => GossipControl::IHave {
                header: MessageHeader::decode(r)?,
                ids: read_hash_list(r)?,
            },
            3 => GossipControl::IWant {
                header: MessageHeader::decode(r)?,
                ids: read_hash_list(r)?,
            },
            4 => GossipControl::Graft {
                header: MessageHeader::decode(r)?,
                topic: r.read_string()?,
            },
            5 => GossipControl::Prune {
                header: MessageHeader::decode(r)?,
                topic: r.read_string()?,
            },
            _ => return Err(CodecError::Eof),
        })
    }
}
