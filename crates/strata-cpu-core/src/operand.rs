use crate::decode::{effective_address, DecodedInst, OpKind};
use crate::state::{CpuState, Gpr};
use crate::width::Width;
use crate::Exception;

/// Destination of a read-modify-write instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// A GPR slot; `high8` selects AH/CH/DH/BH for byte operands.
    Register { gpr: Gpr, high8: bool },
    /// A guest linear address.
    Memory { addr: u64 },
}

impl Operand {
    pub const fn reg(gpr: Gpr) -> Self {
        Operand::Register { gpr, high8: false }
    }

    pub const fn mem(addr: u64) -> Self {
        Operand::Memory { addr }
    }

    #[inline]
    pub fn is_register(&self) -> bool {
        matches!(self, Operand::Register { .. })
    }
}

/// Resolves operand 0 of `inst` to a register slot or guest address together
/// with its declared width.
pub fn resolve_destination(
    state: &CpuState,
    inst: &DecodedInst,
) -> Result<(Operand, Width), Exception> {
    let instr = &inst.instr;
    match instr.op0_kind() {
        OpKind::Register => {
            let reg = instr.op0_register();
            let (gpr, high8) = Gpr::from_register(reg).ok_or(Exception::InvalidOpcode)?;
            let width = Width::from_bytes(reg.size()).ok_or(Exception::InvalidOpcode)?;
            Ok((Operand::Register { gpr, high8 }, width))
        }
        OpKind::Memory => {
            let addr = effective_address(state, inst).ok_or(Exception::InvalidOpcode)?;
            let width =
                Width::from_bytes(instr.memory_size().size()).ok_or(Exception::InvalidOpcode)?;
            Ok((Operand::Memory { addr }, width))
        }
        _ => Err(Exception::InvalidOpcode),
    }
}
