// Shared test helpers (integration tests compile as separate crates, so put
// common code in a submodule to avoid it becoming its own test target).
#![allow(dead_code)]

use std::sync::Arc;

use strata_cpu_core::{CpuMode, Machine, System, SystemConfig};

pub const CODE: u64 = 0x1000;
pub const DATA: u64 = 0x2000;

pub fn system() -> Arc<System> {
    Arc::new(
        System::new(SystemConfig {
            ram_size: 0x10000,
            page_size: 0x1000,
        })
        .expect("test system"),
    )
}

pub fn machine() -> Machine {
    Machine::new(system(), CpuMode::Long)
}

/// Places `code` at [`CODE`] and points RIP at it.
pub fn load_code(m: &mut Machine, code: &[u8]) {
    m.memory().write_bytes(CODE, code).expect("code fits");
    m.state.rip = CODE;
}

pub fn read_bytes<const N: usize>(m: &Machine, addr: u64) -> [u8; N] {
    let mut buf = [0u8; N];
    m.memory().read_bytes(addr, &mut buf).expect("in range");
    buf
}
