//! Execution core for the strata x86 emulator.
//!
//! The crate is centered around [`Machine`], one emulated hardware thread, and
//! [`System`], the guest memory and LOCK fallback shared by all threads of a
//! guest. Instruction semantics currently cover the unary read-modify-write
//! group (NOT/NEG/INC/DEC) including LOCK-prefixed forms; see [`unary`].
//!
//! Guest RAM is stored as `AtomicU64` words and LOCK-prefixed qword operations
//! compare-and-swap on them, so the host must provide native 64-bit atomics.

#[cfg(not(target_has_atomic = "64"))]
compile_error!("strata-cpu-core requires a host with native 64-bit atomics");

mod exception;

pub mod decode;
pub mod flags;
pub mod machine;
pub mod mem;
pub mod operand;
pub mod state;
pub mod system;
pub mod unary;
pub mod width;

pub use exception::Exception;
pub use machine::Machine;
pub use mem::{GuestMemory, GuestMemoryError, HostRef};
pub use operand::Operand;
pub use state::{CpuMode, CpuState, Gpr, RFlags, SegReg};
pub use system::{SharedLock, System, SystemConfig};
pub use unary::{exec_unary, execute_unary, UnaryOp};
pub use width::Width;
