//! Address and content watchpoints, checked once per instruction boundary.
//!
//! A watchpoint fires when either
//! - the instruction about to execute has a memory operand whose effective
//!   address equals the watched address, or
//! - the 8-byte word at the watched address differs from the value observed on
//!   the previous check.
//!
//! Entries live in a dense array and are identified by index. Removal is done
//! by disabling; disabled slots are recycled by the next [`Watchpoints::add`].

use serde::{Deserialize, Serialize};
use strata_cpu_core::decode::effective_address;
use strata_cpu_core::Machine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watchpoint {
    pub addr: u64,
    /// Last observed little-endian word at `addr`. Meaningless until `initialized`.
    pub old_value: u64,
    pub initialized: bool,
    pub disabled: bool,
}

impl Watchpoint {
    pub const fn new(addr: u64) -> Self {
        Self {
            addr,
            old_value: 0,
            initialized: false,
            disabled: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct Watchpoints {
    entries: Vec<Watchpoint>,
    capacity: usize,
}

impl Watchpoints {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries the array can hold before it has to grow.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, index: usize) -> Option<&Watchpoint> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Watchpoint> + '_ {
        self.entries.iter()
    }

    /// Inserts `wp` and returns its index.
    ///
    /// The first disabled slot (lowest index) is overwritten if there is one, so
    /// an index handed out earlier is only stable until the next `add` that
    /// follows a [`Watchpoints::disable`] of it. Callers holding indices across
    /// that sequence must re-check with [`Watchpoints::get`].
    pub fn add(&mut self, wp: Watchpoint) -> usize {
        if let Some(index) = self.entries.iter().position(|slot| slot.disabled) {
            tracing::debug!(index, addr = wp.addr, "watchpoint reuses disabled slot");
            self.entries[index] = wp;
            return index;
        }

        let len = self.entries.len();
        if len == self.capacity {
            let new_capacity = (len + len / 2).max(len + 1);
            self.entries.reserve_exact(new_capacity - len);
            self.capacity = new_capacity;
        }
        self.entries.push(wp);
        len
    }

    /// Drops the most recently appended entry, if any.
    ///
    /// This undoes an [`Watchpoints::add`] that appended; it is not a general
    /// removal (use [`Watchpoints::disable`] for that).
    pub fn remove_last(&mut self) -> Option<Watchpoint> {
        self.entries.pop()
    }

    /// Disables the entry at `index`, making its slot available for reuse.
    ///
    /// Returns `false` if there is no such entry.
    pub fn disable(&mut self, index: usize) -> bool {
        match self.entries.get_mut(index) {
            Some(slot) => {
                slot.disabled = true;
                true
            }
            None => false,
        }
    }

    /// Returns the index of the watchpoint triggered at the current instruction
    /// boundary, if any.
    ///
    /// Newer entries (higher indices) are checked first. Content baselines of the
    /// entries visited before a hit are updated as a side effect; the machine is
    /// never modified.
    pub fn check(&mut self, machine: &Machine) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }

        let access = peek_memory_access(machine);
        for (index, wp) in self.entries.iter_mut().enumerate().rev() {
            if wp.disabled {
                continue;
            }

            if access == Some(wp.addr) {
                tracing::debug!(index, addr = wp.addr, "address watchpoint hit");
                return Some(index);
            }

            // An unmapped target is a normal transient state; just skip it this round.
            let Some(host) = machine.memory().translate(wp.addr, 8) else {
                continue;
            };
            let value = host.load_u64();
            if !wp.initialized {
                wp.old_value = value;
                wp.initialized = true;
            } else if value != wp.old_value {
                tracing::debug!(
                    index,
                    addr = wp.addr,
                    old = wp.old_value,
                    new = value,
                    "content watchpoint hit"
                );
                wp.old_value = value;
                return Some(index);
            }
        }
        None
    }
}

/// Effective address of the memory operand of the instruction at RIP.
///
/// Decodes speculatively and evaluates the address on a copy of the register
/// state with RIP advanced past the instruction, so the machine itself is never
/// touched. Returns `None` when decoding fails or there is no memory operand.
pub fn peek_memory_access(machine: &Machine) -> Option<u64> {
    let inst = machine.decode_at(machine.state.rip).ok()?;
    inst.memory_operand()?;
    let mut peek = machine.state.clone();
    peek.rip = inst.next_ip();
    effective_address(&peek, &inst)
}
