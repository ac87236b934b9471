//! strata: an x86 execution core with a watchpoint-capable debugger.
//!
//! This crate only re-exports the workspace members so integration tests and
//! embedders can depend on a single package.

pub use strata_cpu_core as cpu;
pub use strata_debug as debug;
