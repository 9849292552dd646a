//! Error taxonomy for the **Holon** core crate.
//!
//! Each subsystem gets its own enum so callers can match narrowly; variant
//! names are the stable machine-readable codes handed back to submitters
//! and to the host's user-visible mapping. [`HolonError`] wraps all of them
//! for call sites that cross subsystem boundaries; the block applier, for
//! instance, can fail with either a [`ChainError`] or a [`ValidationError`].

use thiserror::Error;

/// Validation failures surfaced to the transaction submitter; the mempool
/// evicts on any of these.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ValidationError {
    #[error("malformed transaction")]
    MalformedTx,
    #[error("wrong chain id")]
    WrongChain,
    #[error("nonce mismatch: expected {expected}, got {got}")]
    NonceMismatch { expected: u64, got: u64 },
    #[error("invalid signature")]
    InvalidSignature,
    #[error("sender does not match derived address")]
    SenderMismatch,
    #[error("unknown sender account")]
    UnknownSender,
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("effective gas price below block base fee")]
    UnderpricedForBlock,
    #[error("gas limit below intrinsic cost")]
    GasLimitTooLow,
    #[error("sender nonce is already at u64::MAX")]
    NonceExhausted,
}

/// Failures that occur mid-execution; these never abort block building,
/// they become a failed [`crate::transaction::Receipt`] instead.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ExecutionError {
    #[error("execution reverted")]
    Reverted,
    #[error("out of gas")]
    OutOfGas,
    #[error("memory limit exceeded")]
    MemoryLimitExceeded,
    #[error("cpu time limit exceeded")]
    CpuTimeLimitExceeded,
    #[error("contract call failed: {0}")]
    ContractCallFailed(String),
}

/// Errors raised while aggregating or validating consensus votes. These are
/// logged and the offending message dropped; they never crash the node.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConsensusError {
    #[error("invalid proposal")]
    InvalidProposal,
    #[error("duplicate vote")]
    DuplicateVote,
    #[error("unknown validator")]
    UnknownValidator,
    #[error("view timed out")]
    ViewTimeout,
}

/// Errors raised while validating or applying a block header/body.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ChainError {
    #[error("block previous hash mismatch")]
    BadParentHash,
    #[error("block number non-sequential")]
    BadBlockNumber,
    #[error("state root mismatch")]
    StateRootMismatch,
    #[error("transactions root mismatch")]
    TransactionsRootMismatch,
    #[error("receipts root mismatch")]
    ReceiptsRootMismatch,
    #[error("gas used exceeds gas limit")]
    GasOverLimit,
    #[error("invalid transaction in block: {0}")]
    InvalidTransaction(#[source] ValidationError),
}

/// Errors raised by staking operations.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum StakingError {
    #[error("validator already registered")]
    AlreadyRegistered,
    #[error("initial stake below minimum validator stake")]
    StakeTooLow,
    #[error("insufficient stake to unbond that amount")]
    InsufficientStake,
    #[error("remaining stake would fall below minimum")]
    RemainingBelowMinimum,
    #[error("validator is not registered")]
    UnknownValidator,
}

/// Errors raised by the routing table.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum NetworkError {
    #[error("peer unreachable")]
    PeerUnreachable,
    #[error("handshake failed")]
    HandshakeFailed,
    #[error("ip-subnet diversity cap reached")]
    SubnetCapReached,
    #[error("k-bucket is full")]
    BucketFull,
    #[error("iterative lookup exceeded its round bound")]
    LookupBounded,
}

/// Crate-wide error wrapping every subsystem error, for call sites that
/// cross subsystem boundaries.
#[derive(Debug, Error, Clone)]
pub enum HolonError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Staking(#[from] StakingError),
    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// Convenient result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, HolonError>;
