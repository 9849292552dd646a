//! Holon core: the replicated state machine and its consensus driver.
//!
//! Organized leaves-first: primitives and the codec underpin everything;
//! crypto sits below the transaction/block model; the state database and
//! mempool are independent consumers of that model; execution ties state,
//! staking, and the VM collaborator together to build and apply blocks;
//! the BFT engine and epoch manager sit on top of the validator set; the
//! routing table is a self-contained peer-management structure used by the
//! networking layer above this crate.

pub mod primitives;
pub mod codec;
pub mod crypto;
pub mod merkle;
pub mod error;
pub mod config;
pub mod transaction;
pub mod block;
pub mod state;
pub mod mempool;
pub mod vm;
pub mod execution;
pub mod fees;
pub mod staking;
pub mod validator_set;
pub mod epoch;
pub mod messages;
pub mod bft;
pub mod routing;
pub mod genesis;

pub use primitives::{Address, Hash256, UInt256};
