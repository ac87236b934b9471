//! x86/x86-64 decoding helpers.
//!
//! `iced-x86` does the decoding; this module wraps it so the rest of the core
//! deals in [`DecodedInst`] and never constructs a decoder itself.

use iced_x86::{Decoder, DecoderOptions};

pub use iced_x86::{Instruction, Mnemonic, OpKind, Register};

use crate::state::CpuState;

/// Architectural maximum instruction length.
pub const MAX_INST_LEN: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid instruction")]
    InvalidInstruction,
    #[error("unsupported decoder bitness {0}")]
    UnsupportedBitness(u32),
}

#[derive(Debug, Clone)]
pub struct DecodedInst {
    pub instr: Instruction,
    pub len: u8,
}

impl DecodedInst {
    #[inline]
    pub fn next_ip(&self) -> u64 {
        self.instr.next_ip()
    }

    /// Index of the first operand that references memory through a ModRM/SIB or
    /// absolute-offset form.
    pub fn memory_operand(&self) -> Option<u32> {
        (0..self.instr.op_count()).find(|&op| self.instr.op_kind(op) == OpKind::Memory)
    }

    #[inline]
    pub fn has_lock_prefix(&self) -> bool {
        self.instr.has_lock_prefix()
    }
}

pub fn decode(bytes: &[u8], ip: u64, bitness: u32) -> Result<DecodedInst, DecodeError> {
    let mut decoder = Decoder::try_with_ip(bitness, bytes, ip, DecoderOptions::NONE)
        .map_err(|_| DecodeError::UnsupportedBitness(bitness))?;
    let instr = decoder.decode();
    if instr.is_invalid() {
        return Err(DecodeError::InvalidInstruction);
    }
    Ok(DecodedInst {
        len: instr.len() as u8,
        instr,
    })
}

/// Effective (linear) address of the instruction's memory operand, including the
/// segment base. Pure function of the decoded instruction and `state`.
///
/// RIP-relative displacements are resolved against the IP the instruction was
/// decoded at, i.e. relative to the end of the instruction.
pub fn effective_address(state: &CpuState, inst: &DecodedInst) -> Option<u64> {
    let operand = inst.memory_operand()?;
    inst.instr
        .virtual_address(operand, 0, |reg, _, _| state.read_register(reg))
}
