/// Conditions the execution core reports back to the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Exception {
    /// Undefined instruction (#UD): an opcode/width combination outside the
    /// implemented table, or a LOCK prefix the architecture does not allow.
    #[error("invalid opcode (#UD)")]
    InvalidOpcode,
    /// The operand could not be resolved to mapped guest memory.
    #[error("memory fault at 0x{addr:x} (len={len})")]
    MemoryFault { addr: u64, len: usize },
}
