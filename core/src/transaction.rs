//! Transaction model (C4): canonical serialization, signing payload, and
//! the type taxonomy.

use crate::codec::{Codec, CodecError, CodecResult, Reader, Writer};
use crate::crypto::{blake3_hash, derive_address, ed25519_verify};
use crate::error::ValidationError;
use crate::merkle::merkle_root;
use crate::primitives::{Address, Hash256, UInt256};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    Transfer = 0,
    ContractDeploy = 1,
    ContractCall = 2,
    StakeDeposit = 3,
    StakeWithdraw = 4,
    ValidatorRegister = 5,
}

impl TransactionType {
    fn tag(self) -> u8 {
        self as u8
    }

    fn from_tag(tag: u8) -> CodecResult<Self> {
        Ok(match tag {
            0 => TransactionType::Transfer,
            1 => TransactionType::ContractDeploy,
            2 => TransactionType::ContractCall,
            3 => TransactionType::StakeDeposit,
            4 => TransactionType::StakeWithdraw,
            5 => TransactionType::ValidatorRegister,
            _ => return Err(CodecError::Eof),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub tx_type: TransactionType,
    pub nonce: u64,
    pub sender: Address,
    pub to: Address,
    pub value: UInt256,
    pub gas_limit: u64,
    pub gas_price: u64,
    pub max_fee_per_gas: Option<u64>,
    pub max_priority_fee_per_gas: Option<u64>,
    pub data: Vec<u8>,
    pub priority: u8,
    pub chain_id: u64,
    /// 64-byte raw Ed25519 signature; empty until signed.
    pub signature: Vec<u8>,
    /// 32-byte raw Ed25519 public key; empty until signed.
    pub sender_public_key: Vec<u8>,
}

impl Transaction {
    /// Encodes every field except `signature` and `sender_public_key`.
    fn encode_signing_fields(&self, w: &mut Writer) {
        w.write_u8(self.tx_type.tag());
        w.write_u64(self.nonce);
        w.write_address(&self.sender);
        w.write_address(&self.to);
        w.write_uint256(&self.value);
        w.write_u64(self.gas_limit);
        w.write_u64(self.gas_price);
        w.write_bool(self.max_fee_per_gas.is_some());
        w.write_u64(self.max_fee_per_gas.unwrap_or(0));
        w.write_bool(self.max_priority_fee_per_gas.is_some());
        w.write_u64(self.max_priority_fee_per_gas.unwrap_or(0));
        w.write_bytes(&self.data);
        w.write_u8(self.priority);
        w.write_u64(self.chain_id);
    }

    /// The canonical encoding of every field except `signature` and
    /// `sender_public_key`, ready to be BLAKE3-hashed for the signing
    /// payload.
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.encode_signing_fields(&mut w);
        w.into_bytes()
    }

    /// BLAKE3 over [`Transaction::signing_payload`]; this is what the
    /// signature actually covers.
    pub fn signing_hash(&self) -> Hash256 {
        blake3_hash(&self.signing_payload())
    }

    /// BLAKE3 over the full canonical encoding (including signature and
    /// public key), used as the transaction's identity/hash.
    pub fn tx_hash(&self) -> Hash256 {
        blake3_hash(&self.to_canonical_bytes())
    }

    /// Signs the transaction in place with a raw Ed25519 keypair, setting
    /// `sender`, `sender_public_key`, and `signature`.
    pub fn sign(&mut self, signing_key: &ed25519_dalek::SigningKey) {
        let public = signing_key.verifying_key().to_bytes();
        self.sender = derive_address(&public);
        self.sender_public_key = public.to_vec();
        let msg = self.signing_hash();
        let sig = crate::crypto::ed25519_sign(signing_key, msg.as_bytes());
        self.signature = sig.to_vec();
    }

    /// Runs the structural (not stateful) checks of the validator that
    /// don't require access to account state: signature shape, derived
    /// address, chain id, and the Ed25519 signature itself. Used by the
    /// mempool on admission.
    pub fn verify_signature_shape(&self, expected_chain_id: u64) -> Result<(), ValidationError> {
        if self.chain_id != expected_chain_id {
            return Err(ValidationError::WrongChain);
        }
        if self.signature.len() != 64 || self.sender_public_key.len() != 32 {
            return Err(ValidationError::MalformedTx);
        }
        let mut public = [0u8; 32];
        public.copy_from_slice(&self.sender_public_key);
        if self.sender != derive_address(&public) {
            return Err(ValidationError::SenderMismatch);
        }
        let mut sig = [0u8; 64];
        sig.copy_from_slice(&self.signature);
        let msg = self.signing_hash();
        if !ed25519_verify(&public, msg.as_bytes(), &sig) {
            return Err(ValidationError::InvalidSignature);
        }
        Ok(())
    }
}

impl Codec for Transaction {
    fn encode(&self, w: &mut Writer) {
        self.encode_signing_fields(w);
        w.write_bytes(&self.signature);
        w.write_bytes(&self.sender_public_key);
    }

    fn decode(r: &mut Reader) -> CodecResult<Self> {
        let tx_type = TransactionType::from_tag(r.read_u8()?)?;
        let nonce = r.read_u64()?;
        let sender = r.read_address()?;
        let to = r.read_address()?;
        let value = r.read_uint256()?;
        let gas_limit = r.read_u64()?;
        let gas_price = r.read_u64()?;
        let has_max_fee = r.read_bool()?;
        let max_fee_raw = r.read_u64()?;
        let has_priority_fee = r.read_bool()?;
        let priority_fee_raw = r.read_u64()?;
        let data = r.read_bytes()?;
        let priority = r.read_u8()?;
        let chain_id = r.read_u64()?;
        let signature = r.read_bytes()?;
        let sender_public_key = r.read_bytes()?;
        Ok(Transaction {
            tx_type,
            nonce,
            sender,
            to,
            value,
            gas_limit,
            gas_price,
            max_fee_per_gas: has_max_fee.then_some(max_fee_raw),
            max_priority_fee_per_gas: has_priority_fee.then_some(priority_fee_raw),
            data,
            priority,
            chain_id,
            signature,
            sender_public_key,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLog {
    pub contract: Address,
    pub event_signature: Hash256,
    pub data: Vec<u8>,
}

/// Concatenated-and-hashed logs digest used inside the receipt hash: one
/// BLAKE3 hash over `contract || event_signature || data` for every log,
/// concatenated in order. Zero if there are no logs.
fn logs_hash(logs: &[EventLog]) -> Hash256 {
    if logs.is_empty() {
        return Hash256::ZERO;
    }
    let mut buf = Vec::new();
    for log in logs {
        buf.extend_from_slice(log.contract.as_bytes());
        buf.extend_from_slice(log.event_signature.as_bytes());
        buf.extend_from_slice(&log.data);
    }
    blake3_hash(&buf)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: Hash256,
    pub success: bool,
    pub gas_used: u64,
    pub effective_gas_price: u64,
    pub logs: Vec<EventLog>,
    pub error_code: Option<String>,
}

impl Receipt {
    /// BLAKE3 over the fixed-size tuple `success || gas_used_LE64 ||
    /// tx_hash || logs_hash`.
    pub fn receipt_hash(&self) -> Hash256 {
        let mut buf = Vec::with_capacity(1 + 8 + 32 + 32);
        buf.push(if self.success { 1 } else { 0 });
        buf.extend_from_slice(&self.gas_used.to_le_bytes());
        buf.extend_from_slice(self.tx_hash.as_bytes());
        buf.extend_from_slice(logs_hash(&self.logs).as_bytes());
        blake3_hash(&buf)
    }
}

pub fn transactions_root(txs: &[Transaction]) -> Hash256 {
    let leaves: Vec<Hash256> = txs.iter().map(|t| t.tx_hash()).collect();
    merkle_root(&leaves)
}

pub fn receipts_root(receipts: &[Receipt]) -> Hash256 {
    let leaves: Vec<Hash256> = receipts.iter().map(|r| r.receipt_hash()).collect();
    merkle_root(&leaves)
}

/// `intrinsic_cost(type, data_len)`: `Transfer` is a flat 21000;
/// contract types and staking types charge a per-byte data surcharge.
pub fn intrinsic_cost(tx_type: TransactionType, data_len: usize) -> u64 {
    const BASE: u64 = 21_000;
    match tx_type {
        TransactionType::Transfer => BASE,
        TransactionType::ContractDeploy | TransactionType::ContractCall => {
            BASE + 68 * data_len as u64
        }
        TransactionType::StakeDeposit
        | TransactionType::StakeWithdraw
        | TransactionType::ValidatorRegister => BASE + 16 * data_len as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    fn signed_transfer(chain_id: u64) -> Transaction {
        let key = SigningKey::generate(&mut OsRng);
        let mut tx = Transaction {
            tx_type: TransactionType::Transfer,
            nonce: 0,
            sender: Address::ZERO,
            to: Address::from_bytes([2u8; 20]),
            value: UInt256::from_u64(1_000),
            gas_limit: 21_000,
            gas_price: 1,
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            data: vec![],
            priority: 0,
            chain_id,
            signature: vec![],
            sender_public_key: vec![],
        };
        tx.sign(&key);
        tx
    }

    #[test]
    fn decode_encode_roundtrip() {
        let tx = signed_transfer(31337);
        let bytes = tx.to_canonical_bytes();
        let decoded = Transaction::from_canonical_bytes(&bytes).unwrap();
        assert_eq!(tx, decoded);
    }

    #[test]
    fn signature_verifies_over_signing_payload() {
        let tx = signed_transfer(31337);
        assert!(tx.verify_signature_shape(31337).is_ok());
    }

    #[test]
    fn wrong_chain_id_rejected() {
        let tx = signed_transfer(1);
        assert_eq!(
            tx.verify_signature_shape(31337),
            Err(ValidationError::WrongChain)
        );
    }

    #[test]
    fn tampered_signature_rejected() {
        let mut tx = signed_transfer(31337);
        tx.value = UInt256::from_u64(999_999);
        assert_eq!(
            tx.verify_signature_shape(31337),
            Err(ValidationError::InvalidSignature)
        );
    }

    #[test]
    fn intrinsic_cost_matches_scenario() {
        assert_eq!(intrinsic_cost(TransactionType::Transfer, 0), 21_000);
    }

    #[test]
    fn receipt_hash_is_pure_function_of_content() {
        let r1 = Receipt {
            tx_hash: Hash256::from_bytes([1u8; 32]),
            success: true,
            gas_used: 21_000,
            effective_gas_price: 1,
            logs: vec![],
            error_code: None,
        };
        let r2 = r1.clone();
        assert_eq!(r1.receipt_hash(), r2.receipt_hash());

        let mut r3 = r1.clone();
        r3.gas_used += 1;
        assert_ne!(r1.receipt_hash(), r3.receipt_hash());
    }

    #[test]
    fn roots_of_zero_and_one_item() {
        assert_eq!(transactions_root(&[]), Hash256::ZERO);
        let tx = signed_transfer(31337);
        assert_eq!(transactions_root(&[tx.clone()]), tx.tx_hash());
    }
}
