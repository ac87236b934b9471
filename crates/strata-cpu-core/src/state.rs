//! Architectural register state for a single emulated hardware thread.
//!
//! Guest memory and the shared LOCK fallback live in [`crate::system::System`];
//! everything here is private to the thread that owns the [`crate::Machine`].

use bitflags::bitflags;
use iced_x86::Register;

use crate::width::Width;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CpuMode {
    /// 16-bit real mode.
    Real,
    /// 32-bit protected mode.
    Protected,
    /// 64-bit long mode.
    #[default]
    Long,
}

impl CpuMode {
    /// Decoder bitness for this mode.
    pub const fn bitness(self) -> u32 {
        match self {
            CpuMode::Real => 16,
            CpuMode::Protected => 32,
            CpuMode::Long => 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gpr {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Gpr {
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Maps a decoder register of any width onto its backing GPR slot.
    ///
    /// The returned flag is set for the legacy high-byte registers (AH/CH/DH/BH),
    /// which alias bits 8..16 of the slot.
    pub fn from_register(reg: Register) -> Option<(Gpr, bool)> {
        let high8 = matches!(
            reg,
            Register::AH | Register::CH | Register::DH | Register::BH
        );
        let gpr = match reg.full_register() {
            Register::RAX => Gpr::Rax,
            Register::RCX => Gpr::Rcx,
            Register::RDX => Gpr::Rdx,
            Register::RBX => Gpr::Rbx,
            Register::RSP => Gpr::Rsp,
            Register::RBP => Gpr::Rbp,
            Register::RSI => Gpr::Rsi,
            Register::RDI => Gpr::Rdi,
            Register::R8 => Gpr::R8,
            Register::R9 => Gpr::R9,
            Register::R10 => Gpr::R10,
            Register::R11 => Gpr::R11,
            Register::R12 => Gpr::R12,
            Register::R13 => Gpr::R13,
            Register::R14 => Gpr::R14,
            Register::R15 => Gpr::R15,
            _ => return None,
        };
        Some((gpr, high8))
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RFlags: u64 {
        const CF = 1 << 0;
        const FIXED1 = 1 << 1;
        const PF = 1 << 2;
        const AF = 1 << 4;
        const ZF = 1 << 6;
        const SF = 1 << 7;
        const TF = 1 << 8;
        const IF = 1 << 9;
        const DF = 1 << 10;
        const OF = 1 << 11;
    }
}

impl RFlags {
    /// The flags written by arithmetic instructions.
    pub const ARITH: RFlags = RFlags::CF
        .union(RFlags::PF)
        .union(RFlags::AF)
        .union(RFlags::ZF)
        .union(RFlags::SF)
        .union(RFlags::OF);
}

impl Default for RFlags {
    fn default() -> Self {
        RFlags::FIXED1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegReg {
    Es = 0,
    Cs = 1,
    Ss = 2,
    Ds = 3,
    Fs = 4,
    Gs = 5,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuState {
    gpr: [u64; 16],
    pub rip: u64,
    pub rflags: RFlags,
    pub mode: CpuMode,
    /// Segment bases, indexed by [`SegReg`].
    pub seg_base: [u64; 6],
}

impl Default for CpuState {
    fn default() -> Self {
        Self::new(CpuMode::default())
    }
}

impl CpuState {
    pub fn new(mode: CpuMode) -> Self {
        Self {
            gpr: [0; 16],
            rip: 0,
            rflags: RFlags::default(),
            mode,
            seg_base: [0; 6],
        }
    }

    #[inline]
    pub fn gpr(&self, gpr: Gpr) -> u64 {
        self.gpr[gpr.index()]
    }

    #[inline]
    pub fn set_gpr(&mut self, gpr: Gpr, value: u64) {
        self.gpr[gpr.index()] = value;
    }

    pub fn read_gpr_sized(&self, gpr: Gpr, high8: bool, width: Width) -> u64 {
        let full = self.gpr(gpr);
        match (width, high8) {
            (Width::W8, true) => (full >> 8) & 0xff,
            _ => full & width.mask(),
        }
    }

    /// Writes the low `width` bits of a GPR with x86 merge rules.
    ///
    /// 8- and 16-bit writes preserve the untouched bits; 32-bit writes clear
    /// bits 32..64 of the full register.
    pub fn write_gpr_sized(&mut self, gpr: Gpr, high8: bool, width: Width, value: u64) {
        let full = self.gpr(gpr);
        let merged = match (width, high8) {
            (Width::W8, true) => (full & !0xff00) | ((value & 0xff) << 8),
            (Width::W8, false) => (full & !0xff) | (value & 0xff),
            (Width::W16, _) => (full & !0xffff) | (value & 0xffff),
            (Width::W32, _) => value & 0xffff_ffff,
            (Width::W64, _) => value,
        };
        self.set_gpr(gpr, merged);
    }

    #[inline]
    pub fn seg_base(&self, seg: SegReg) -> u64 {
        self.seg_base[seg as usize]
    }

    /// Base added to linear addresses formed through `seg`.
    ///
    /// Long mode ignores the ES/CS/SS/DS bases; only FS and GS keep theirs.
    pub fn effective_seg_base(&self, seg: SegReg) -> u64 {
        if self.mode == CpuMode::Long && !matches!(seg, SegReg::Fs | SegReg::Gs) {
            return 0;
        }
        self.seg_base(seg)
    }

    /// Register lookup for address computation.
    ///
    /// Returns `None` for registers that cannot take part in a GPR-based
    /// address (vector registers, control registers, ...).
    pub fn read_register(&self, reg: Register) -> Option<u64> {
        let seg = match reg {
            Register::ES => Some(SegReg::Es),
            Register::CS => Some(SegReg::Cs),
            Register::SS => Some(SegReg::Ss),
            Register::DS => Some(SegReg::Ds),
            Register::FS => Some(SegReg::Fs),
            Register::GS => Some(SegReg::Gs),
            _ => None,
        };
        if let Some(seg) = seg {
            return Some(self.effective_seg_base(seg));
        }
        match reg {
            Register::RIP => return Some(self.rip),
            Register::EIP => return Some(self.rip & 0xffff_ffff),
            _ => {}
        }

        let (gpr, high8) = Gpr::from_register(reg)?;
        let width = Width::from_bytes(reg.size())?;
        Some(self.read_gpr_sized(gpr, high8, width))
    }
}
