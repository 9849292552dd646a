//! External VM collaborator contract: the sandboxed user-contract VM
//! is out of scope, but the core defines the trait boundary it calls
//! through and a `NullVm` stand-in for standalone operation and tests.

use crate::primitives::{Address, UInt256};
use crate::state::StateSnapshot;
use crate::transaction::EventLog;

/// Execution context handed to the VM collaborator for a single contract
/// call. `state_view` lets the VM read/write the current snapshot without
/// stepping outside it.
pub struct VmContext<'a, 'snap> {
    pub caller: Address,
    pub contract_addr: Address,
    pub value: UInt256,
    pub block_ts_ms: u64,
    pub block_number: u64,
    pub chain_id: u64,
    pub gas_meter: &'a mut GasMeter,
    pub state_view: &'a mut StateSnapshot<'snap>,
}

/// Tracks gas consumption during a contract call; the VM collaborator must
/// honor this meter rather than its own accounting.
pub struct GasMeter {
    pub limit: u64,
    pub used: u64,
}

impl GasMeter {
    pub fn new(limit: u64) -> Self {
        Self { limit, used: 0 }
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }

    pub fn consume(&mut self, amount: u64) -> bool {
        if amount > self.remaining() {
            self.used = self.limit;
            false
        } else {
            self.used += amount;
            true
        }
    }
}

pub struct VmOutcome {
    pub success: bool,
    pub return_data: Option<Vec<u8>>,
    pub logs: Vec<EventLog>,
    pub gas_used: u64,
    pub error: Option<String>,
}

/// Given `(code_bytes, call_data, ctx)`, returns `(success, return_data?,
/// logs, gas_used, error?)`. Implementations must never read or write state
/// outside `ctx.state_view` and must stop once `ctx.gas_meter` is
/// exhausted.
pub trait VmCollaborator: Send + Sync {
    fn call(&self, code: &[u8], call_data: &[u8], ctx: VmContext<'_, '_>) -> VmOutcome;
}

/// Stand-in used when no real VM is wired in: every contract call fails
/// immediately, consuming no gas beyond the intrinsic cost already charged
/// by the executor.
pub struct NullVm;

impl VmCollaborator for NullVm {
    fn call(&self, _code: &[u8], _call_data: &[u8], _ctx: VmContext<'_, '_>) -> VmOutcome {
        VmOutcome {
            success: false,
            return_data: None,
            logs: vec![],
            gas_used: 0,
            error: Some("no VM collaborator configured".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gas_meter_refuses_overdraw() {
        let mut meter = GasMeter::new(100);
        assert!(meter.consume(60));
        assert!(!meter.consume(50));
        assert_eq!(meter.remaining(), 0);
    }
}
