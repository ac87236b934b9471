use std::sync::Arc;

use crate::decode::{self, DecodeError, DecodedInst, MAX_INST_LEN};
use crate::mem::GuestMemory;
use crate::state::{CpuMode, CpuState};
use crate::system::System;
use crate::unary::exec_unary;
use crate::Exception;

/// One emulated hardware thread: private register state plus a handle on the
/// system it shares with its siblings.
///
/// Cloning a `Machine` yields a sibling thread with a copy of the registers and
/// the same guest memory and LOCK fallback.
#[derive(Debug, Clone)]
pub struct Machine {
    pub state: CpuState,
    pub(crate) system: Arc<System>,
}

impl Machine {
    pub fn new(system: Arc<System>, mode: CpuMode) -> Self {
        Self {
            state: CpuState::new(mode),
            system,
        }
    }

    #[inline]
    pub fn system(&self) -> &Arc<System> {
        &self.system
    }

    #[inline]
    pub fn memory(&self) -> &GuestMemory {
        self.system.memory()
    }

    /// Decodes the instruction at `addr` without touching machine state.
    pub fn decode_at(&self, addr: u64) -> Result<DecodedInst, DecodeError> {
        let mut bytes = [0u8; MAX_INST_LEN];
        let len = self.memory().fetch(addr, &mut bytes);
        decode::decode(&bytes[..len], addr, self.state.mode.bitness())
    }

    pub fn effective_address(&self, inst: &DecodedInst) -> Option<u64> {
        decode::effective_address(&self.state, inst)
    }

    /// Executes one instruction at RIP.
    ///
    /// Only NOT/NEG/INC/DEC are implemented; anything else is reported as
    /// [`Exception::InvalidOpcode`] with RIP left on the faulting instruction.
    pub fn step(&mut self) -> Result<(), Exception> {
        let rip = self.state.rip;
        if !self.memory().is_mapped(rip) {
            return Err(Exception::MemoryFault { addr: rip, len: 1 });
        }
        let inst = self
            .decode_at(rip)
            .map_err(|_| Exception::InvalidOpcode)?;
        exec_unary(self, &inst)?;
        self.state.rip = inst.next_ip();
        Ok(())
    }
}
