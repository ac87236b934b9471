//! Debugger session state for strata machines: run state, breakpoints, single
//! stepping and watchpoints.

pub mod watch;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use strata_cpu_core::{Exception, Machine};

pub use watch::{peek_memory_access, Watchpoint, Watchpoints};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PauseReason {
    Manual,
    Breakpoint { rip: u64 },
    SingleStep,
    Watchpoint { index: usize, addr: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecDecision {
    Continue,
    Pause(PauseReason),
}

#[derive(Debug)]
pub struct Debugger {
    run_state: RunState,
    breakpoints: HashSet<u64>,
    watchpoints: Watchpoints,
    remaining_single_steps: u32,
}

impl Debugger {
    pub fn new() -> Self {
        Self {
            run_state: RunState::Running,
            breakpoints: HashSet::new(),
            watchpoints: Watchpoints::new(),
            remaining_single_steps: 0,
        }
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn pause(&mut self) {
        self.run_state = RunState::Paused;
        self.remaining_single_steps = 0;
    }

    pub fn resume(&mut self) {
        self.run_state = RunState::Running;
        self.remaining_single_steps = 0;
    }

    pub fn request_single_step(&mut self) {
        self.run_state = RunState::Running;
        self.remaining_single_steps = 1;
    }

    pub fn set_breakpoint(&mut self, rip: u64) {
        self.breakpoints.insert(rip);
    }

    pub fn remove_breakpoint(&mut self, rip: u64) -> bool {
        self.breakpoints.remove(&rip)
    }

    pub fn clear_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    /// Watches the 8-byte word at `addr`. See [`Watchpoints::add`] for how long
    /// the returned index stays valid.
    pub fn add_watchpoint(&mut self, addr: u64) -> usize {
        self.watchpoints.add(Watchpoint::new(addr))
    }

    pub fn remove_last_watchpoint(&mut self) -> Option<Watchpoint> {
        self.watchpoints.remove_last()
    }

    pub fn disable_watchpoint(&mut self, index: usize) -> bool {
        self.watchpoints.disable(index)
    }

    pub fn watchpoints(&self) -> &Watchpoints {
        &self.watchpoints
    }

    /// Decides whether the instruction at `machine.state.rip` may run.
    ///
    /// Breakpoints take precedence over watchpoints. The machine is only read.
    pub fn check_before_exec(&mut self, machine: &Machine) -> ExecDecision {
        if self.run_state == RunState::Paused {
            return ExecDecision::Pause(PauseReason::Manual);
        }

        let rip = machine.state.rip;
        if self.breakpoints.contains(&rip) {
            return self.pause_with(PauseReason::Breakpoint { rip });
        }

        match self.watchpoints.check(machine) {
            Some(index) => {
                let addr = self.watchpoints.get(index).map_or(0, |wp| wp.addr);
                self.pause_with(PauseReason::Watchpoint { index, addr })
            }
            None => ExecDecision::Continue,
        }
    }

    pub fn check_after_exec(&mut self) -> ExecDecision {
        if self.run_state == RunState::Paused {
            return ExecDecision::Pause(PauseReason::Manual);
        }

        if self.remaining_single_steps == 0 {
            return ExecDecision::Continue;
        }

        self.remaining_single_steps -= 1;
        if self.remaining_single_steps == 0 {
            self.pause_with(PauseReason::SingleStep)
        } else {
            ExecDecision::Continue
        }
    }

    /// Runs one instruction of `machine` under debugger control.
    ///
    /// Returns the pause decision taken before execution without stepping, or
    /// the decision taken after a successful step.
    pub fn step(&mut self, machine: &mut Machine) -> Result<ExecDecision, Exception> {
        if let decision @ ExecDecision::Pause(_) = self.check_before_exec(machine) {
            return Ok(decision);
        }
        machine.step()?;
        Ok(self.check_after_exec())
    }

    fn pause_with(&mut self, reason: PauseReason) -> ExecDecision {
        tracing::debug!(?reason, "debugger paused");
        self.run_state = RunState::Paused;
        self.remaining_single_steps = 0;
        ExecDecision::Pause(reason)
    }
}

impl Default for Debugger {
    fn default() -> Self {
        Self::new()
    }
}
