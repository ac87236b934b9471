//! NOT/NEG/INC/DEC read-modify-write execution.
//!
//! LOCK handling follows what the host can do natively:
//! - 64-bit: compare-and-swap on an 8-byte aligned location, otherwise the
//!   system-wide [`SharedLock`] around a plain load/store.
//! - 32-bit: compare-and-swap on a 4-byte aligned location, otherwise a plain
//!   load/store with no lock taken.
//! - 16-bit and 8-bit: always the [`SharedLock`].

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::decode::{DecodedInst, Mnemonic};
use crate::flags::{add_with_flags, sub_with_flags};
use crate::machine::Machine;
use crate::mem::HostRef;
use crate::operand::{resolve_destination, Operand};
use crate::state::{CpuState, Gpr, RFlags};
use crate::system::SharedLock;
use crate::width::Width;
use crate::Exception;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Neg,
    Inc,
    Dec,
}

impl UnaryOp {
    pub const ALL: [UnaryOp; 4] = [UnaryOp::Not, UnaryOp::Neg, UnaryOp::Inc, UnaryOp::Dec];

    pub fn from_mnemonic(mnemonic: Mnemonic) -> Option<Self> {
        match mnemonic {
            Mnemonic::Not => Some(UnaryOp::Not),
            Mnemonic::Neg => Some(UnaryOp::Neg),
            Mnemonic::Inc => Some(UnaryOp::Inc),
            Mnemonic::Dec => Some(UnaryOp::Dec),
            _ => None,
        }
    }

    /// Applies the operation to the low `width` bits of `value`.
    ///
    /// NOT leaves `rflags` untouched. INC/DEC update every arithmetic flag except
    /// CF. NEG sets CF when the source is non-zero.
    pub fn apply(self, rflags: &mut RFlags, value: u64, width: Width) -> u64 {
        match self {
            UnaryOp::Not => !value & width.mask(),
            UnaryOp::Neg => sub_with_flags(rflags, 0, value, width),
            UnaryOp::Inc => {
                let cf = rflags.contains(RFlags::CF);
                let res = add_with_flags(rflags, value, 1, width);
                rflags.set(RFlags::CF, cf);
                res
            }
            UnaryOp::Dec => {
                let cf = rflags.contains(RFlags::CF);
                let res = sub_with_flags(rflags, value, 1, width);
                rflags.set(RFlags::CF, cf);
                res
            }
        }
    }
}

/// Executes a decoded NOT/NEG/INC/DEC instruction against `machine`.
///
/// Does not advance RIP.
pub fn exec_unary(machine: &mut Machine, inst: &DecodedInst) -> Result<(), Exception> {
    let mnemonic = inst.instr.mnemonic();
    let Some(op) = UnaryOp::from_mnemonic(mnemonic) else {
        tracing::warn!(?mnemonic, rip = machine.state.rip, "not a unary ALU instruction");
        return Err(Exception::InvalidOpcode);
    };
    let (operand, width) = resolve_destination(&machine.state, inst)?;
    let locked = inst.has_lock_prefix();
    if locked && operand.is_register() {
        return Err(Exception::InvalidOpcode);
    }
    execute_unary(machine, op, width, operand, locked)
}

/// Applies `op` to `operand` at `width`, honouring LOCK semantics when `locked`.
pub fn execute_unary(
    machine: &mut Machine,
    op: UnaryOp,
    width: Width,
    operand: Operand,
    locked: bool,
) -> Result<(), Exception> {
    let Machine { state, system } = machine;
    let slot = match operand {
        Operand::Register { gpr, high8 } => Slot::Register { gpr, high8 },
        Operand::Memory { addr } => {
            let len = width.bytes();
            let host = system
                .memory()
                .translate(addr, len)
                .ok_or(Exception::MemoryFault { addr, len })?;
            Slot::Memory(host)
        }
    };

    let lock = system.lock();
    match width {
        Width::W8 | Width::W16 => {
            let _guard = lock.lock_if(locked);
            read_modify_write(state, &slot, op, width);
        }
        Width::W32 => alu_dword(state, &slot, op, locked),
        Width::W64 => alu_qword(state, lock, &slot, op, locked),
    }
    Ok(())
}

enum Slot<'a> {
    Register { gpr: Gpr, high8: bool },
    Memory(HostRef<'a>),
}

impl<'a> Slot<'a> {
    fn load(&self, state: &CpuState, width: Width) -> u64 {
        match self {
            Slot::Register { gpr, high8 } => state.read_gpr_sized(*gpr, *high8, width),
            Slot::Memory(host) => match width {
                Width::W8 => host.load_u8() as u64,
                Width::W16 => host.load_u16() as u64,
                Width::W32 => host.load_u32() as u64,
                Width::W64 => host.load_u64(),
            },
        }
    }

    fn store(&self, state: &mut CpuState, width: Width, value: u64) {
        match self {
            Slot::Register { gpr, high8 } => state.write_gpr_sized(*gpr, *high8, width, value),
            Slot::Memory(host) => match width {
                Width::W8 => host.store_u8(value as u8),
                Width::W16 => host.store_u16(value as u16),
                Width::W32 => host.store_u32(value as u32),
                Width::W64 => host.store_u64(value),
            },
        }
    }

    fn atomic_u32(&self) -> Option<&'a AtomicU32> {
        match self {
            Slot::Memory(host) => host.atomic_u32(),
            Slot::Register { .. } => None,
        }
    }

    fn atomic_u64(&self) -> Option<&'a AtomicU64> {
        match self {
            Slot::Memory(host) => host.atomic_u64(),
            Slot::Register { .. } => None,
        }
    }
}

fn read_modify_write(state: &mut CpuState, slot: &Slot<'_>, op: UnaryOp, width: Width) {
    let old = slot.load(state, width);
    let new = op.apply(&mut state.rflags, old, width);
    slot.store(state, width, new);
}

fn alu_qword(state: &mut CpuState, lock: &SharedLock, slot: &Slot<'_>, op: UnaryOp, locked: bool) {
    if locked {
        if let Some(cell) = slot.atomic_u64() {
            cas_u64(state, cell, op);
            return;
        }
        tracing::trace!(?op, "qword LOCK falling back to the shared lock");
    }
    let _guard = lock.lock_if(locked);
    read_modify_write(state, slot, op, Width::W64);
}

// Unaligned or unlocked dwords take no lock at all.
fn alu_dword(state: &mut CpuState, slot: &Slot<'_>, op: UnaryOp, locked: bool) {
    match slot.atomic_u32().filter(|_| locked) {
        Some(cell) => cas_u32(state, cell, op),
        None => read_modify_write(state, slot, op, Width::W32),
    }
    if let Slot::Register { gpr, .. } = slot {
        let value = state.gpr(*gpr);
        state.set_gpr(*gpr, value & 0xffff_ffff);
    }
}

// Values in the atomic cells are in guest byte order; they are converted to host
// order for the arithmetic and back before the compare-and-swap. Flags are
// computed from the iteration whose swap succeeds.

fn cas_u64(state: &mut CpuState, cell: &AtomicU64, op: UnaryOp) {
    let mut current = cell.load(Ordering::Acquire);
    loop {
        let mut flags = state.rflags;
        let new = op.apply(&mut flags, u64::from_le(current), Width::W64).to_le();
        match cell.compare_exchange_weak(current, new, Ordering::Release, Ordering::Relaxed) {
            Ok(_) => {
                state.rflags = flags;
                return;
            }
            Err(actual) => current = actual,
        }
    }
}

fn cas_u32(state: &mut CpuState, cell: &AtomicU32, op: UnaryOp) {
    let mut current = cell.load(Ordering::Acquire);
    loop {
        let mut flags = state.rflags;
        let new = op.apply(&mut flags, u32::from_le(current) as u64, Width::W32) as u32;
        match cell.compare_exchange_weak(
            current,
            new.to_le(),
            Ordering::Release,
            Ordering::Relaxed,
        ) {
            Ok(_) => {
                state.rflags = flags;
                return;
            }
            Err(actual) => current = actual,
        }
    }
}
