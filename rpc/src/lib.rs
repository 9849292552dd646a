//! Holon JSON-RPC server placeholder.
//!
//! Exposes node state (`holon_core`) over `jsonrpsee`; not implemented in
//! this pass.

// TODO: jsonrpsee server with eth-style methods (getBalance, getBlock,
// sendTransaction) backed by holon_core::state::StateDb.
