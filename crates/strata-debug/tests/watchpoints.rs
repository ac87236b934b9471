use std::sync::Arc;

use strata_cpu_core::{CpuMode, Gpr, Machine, SegReg, System, SystemConfig};
use strata_debug::{peek_memory_access, Debugger, ExecDecision, PauseReason, Watchpoint, Watchpoints};

const CODE: u64 = 0x1000;
const DATA: u64 = 0x2000;
const HOLE: u64 = 0x3000;

fn machine() -> Machine {
    let system = System::new(SystemConfig {
        ram_size: 0x8000,
        page_size: 0x1000,
    })
    .expect("test system");
    let m = Machine::new(Arc::new(system), CpuMode::Long);
    m.memory().unmap_page(HOLE);
    m
}

fn load_code(m: &mut Machine, code: &[u8]) {
    m.memory().write_bytes(CODE, code).unwrap();
    m.state.rip = CODE;
}

#[test]
fn empty_set_never_fires() {
    let mut m = machine();
    load_code(&mut m, &[0x48, 0xFF, 0x00]);
    m.state.set_gpr(Gpr::Rax, DATA);
    assert_eq!(Watchpoints::new().check(&m), None);
}

#[test]
fn first_check_seeds_without_firing() {
    let m = machine();
    m.memory().write_u64_le(DATA, 0xdead_beef).unwrap();

    let mut wps = Watchpoints::new();
    wps.add(Watchpoint::new(DATA));
    assert_eq!(wps.check(&m), None);

    let wp = wps.get(0).unwrap();
    assert!(wp.initialized);
    assert_eq!(wp.old_value, 0xdead_beef);
    assert_eq!(wps.check(&m), None);
}

#[test]
fn content_change_fires_once_and_rebaselines() {
    let m = machine();
    let mut wps = Watchpoints::new();
    wps.add(Watchpoint::new(DATA + 8));
    assert_eq!(wps.check(&m), None);

    // A change anywhere in the watched 8 bytes counts.
    m.memory().write_bytes(DATA + 15, &[0x80]).unwrap();
    assert_eq!(wps.check(&m), Some(0));
    assert_eq!(wps.get(0).unwrap().old_value, 0x8000_0000_0000_0000);
    assert_eq!(wps.check(&m), None);
}

#[test]
fn address_hit_leaves_machine_untouched() {
    let mut m = machine();
    // inc qword ptr [rax]
    load_code(&mut m, &[0x48, 0xFF, 0x00]);
    m.state.set_gpr(Gpr::Rax, DATA);
    let before = m.state.clone();

    let mut wps = Watchpoints::new();
    wps.add(Watchpoint::new(DATA));
    assert_eq!(wps.check(&m), Some(0));
    assert_eq!(m.state, before);
    assert_eq!(m.state.rip, CODE);
}

#[test]
fn long_mode_address_watch_ignores_ds_base() {
    let mut m = machine();
    // inc qword ptr [rax]
    load_code(&mut m, &[0x48, 0xFF, 0x00]);
    m.state.set_gpr(Gpr::Rax, DATA);
    m.state.seg_base[SegReg::Ds as usize] = 0x1000;
    assert_eq!(peek_memory_access(&m), Some(DATA));

    let mut wps = Watchpoints::new();
    wps.add(Watchpoint::new(DATA + 0x1000));
    wps.add(Watchpoint::new(DATA));
    assert_eq!(wps.check(&m), Some(1));
}

#[test]
fn long_mode_address_watch_keeps_fs_base() {
    let mut m = machine();
    // inc qword ptr fs:[rax]
    load_code(&mut m, &[0x64, 0x48, 0xFF, 0x00]);
    m.state.set_gpr(Gpr::Rax, DATA);
    m.state.seg_base[SegReg::Fs as usize] = 0x1000;
    assert_eq!(peek_memory_access(&m), Some(DATA + 0x1000));
}

#[test]
fn rip_relative_operand_is_resolved_past_the_instruction() {
    let mut m = machine();
    // inc dword ptr [rip + 0x10]
    load_code(&mut m, &[0xFF, 0x05, 0x10, 0x00, 0x00, 0x00]);
    assert_eq!(peek_memory_access(&m), Some(CODE + 6 + 0x10));

    let mut wps = Watchpoints::new();
    wps.add(Watchpoint::new(CODE + 0x16));
    assert_eq!(wps.check(&m), Some(0));
    assert_eq!(m.state.rip, CODE);
}

#[test]
fn register_only_instruction_has_no_access() {
    let mut m = machine();
    // not eax
    load_code(&mut m, &[0xF7, 0xD0]);
    assert_eq!(peek_memory_access(&m), None);
}

#[test]
fn highest_index_wins() {
    let mut m = machine();
    load_code(&mut m, &[0x48, 0xFF, 0x00]);
    m.state.set_gpr(Gpr::Rax, DATA);

    let mut wps = Watchpoints::new();
    wps.add(Watchpoint::new(DATA));
    wps.add(Watchpoint::new(DATA + 0x100));
    wps.add(Watchpoint::new(DATA));
    assert_eq!(wps.check(&m), Some(2));

    wps.disable(2);
    assert_eq!(wps.check(&m), Some(0));
}

#[test]
fn disabled_entries_are_ignored() {
    let m = machine();
    let mut wps = Watchpoints::new();
    wps.add(Watchpoint::new(DATA));
    assert_eq!(wps.check(&m), None);
    wps.disable(0);

    m.memory().write_u64_le(DATA, 7).unwrap();
    assert_eq!(wps.check(&m), None);
}

#[test]
fn unmapped_target_is_skipped() {
    let m = machine();
    let mut wps = Watchpoints::new();
    wps.add(Watchpoint::new(DATA));
    wps.add(Watchpoint::new(HOLE));
    // Straddles into the unmapped page.
    wps.add(Watchpoint::new(HOLE - 4));
    assert_eq!(wps.check(&m), None);
    assert!(!wps.get(1).unwrap().initialized);
    assert!(!wps.get(2).unwrap().initialized);

    m.memory().write_u64_le(DATA, 1).unwrap();
    assert_eq!(wps.check(&m), Some(0));
}

#[test]
fn watch_seeds_once_target_page_is_mapped() {
    let m = machine();
    let mut wps = Watchpoints::new();
    wps.add(Watchpoint::new(HOLE));
    assert_eq!(wps.check(&m), None);

    m.memory().write_u64_le(HOLE, 5).unwrap();
    m.memory().map_page(HOLE);
    assert_eq!(wps.check(&m), None);
    assert_eq!(wps.get(0).unwrap().old_value, 5);
}

#[test]
fn undecodable_rip_falls_back_to_content_checks() {
    let mut m = machine();
    m.state.rip = HOLE;
    m.state.set_gpr(Gpr::Rax, DATA);
    assert_eq!(peek_memory_access(&m), None);

    let mut wps = Watchpoints::new();
    wps.add(Watchpoint::new(DATA));
    assert_eq!(wps.check(&m), None);
    m.memory().write_u64_le(DATA, 9).unwrap();
    assert_eq!(wps.check(&m), Some(0));
    assert_eq!(m.state.rip, HOLE);
}

#[test]
fn reused_slot_starts_uninitialized() {
    let m = machine();
    m.memory().write_u64_le(DATA, 1).unwrap();

    let mut wps = Watchpoints::new();
    wps.add(Watchpoint::new(DATA));
    assert_eq!(wps.check(&m), None);
    wps.disable(0);
    assert_eq!(wps.add(Watchpoint::new(DATA)), 0);
    assert!(!wps.get(0).unwrap().initialized);

    // The replacement seeds on its first check rather than comparing against
    // the old entry's baseline.
    m.memory().write_u64_le(DATA, 2).unwrap();
    assert_eq!(wps.check(&m), None);
}

#[test]
fn debugger_pauses_before_the_accessing_instruction() {
    let mut m = machine();
    // not eax; inc qword ptr [rbx]; inc qword ptr [rbx]
    load_code(&mut m, &[0xF7, 0xD0, 0x48, 0xFF, 0x03, 0x48, 0xFF, 0x03]);
    m.state.set_gpr(Gpr::Rbx, DATA);

    let mut dbg = Debugger::new();
    let index = dbg.add_watchpoint(DATA);

    assert_eq!(dbg.step(&mut m), Ok(ExecDecision::Continue));
    assert_eq!(m.state.rip, CODE + 2);

    let reason = PauseReason::Watchpoint { index, addr: DATA };
    assert_eq!(dbg.step(&mut m), Ok(ExecDecision::Pause(reason)));
    assert_eq!(m.state.rip, CODE + 2);
    assert_eq!(m.memory().read_u64_le(DATA), Ok(0));

    dbg.resume();
    dbg.disable_watchpoint(index);
    assert_eq!(dbg.step(&mut m), Ok(ExecDecision::Continue));
    assert_eq!(m.memory().read_u64_le(DATA), Ok(1));
}

#[test]
fn sibling_write_triggers_content_watch() {
    let mut m = machine();
    // not eax; not eax
    load_code(&mut m, &[0xF7, 0xD0, 0xF7, 0xD0]);
    let mut sibling = m.clone();
    // lock inc qword ptr [rax]
    sibling.memory().write_bytes(0x4000, &[0xF0, 0x48, 0xFF, 0x00]).unwrap();
    sibling.state.rip = 0x4000;
    sibling.state.set_gpr(Gpr::Rax, DATA + 0x40);

    let mut dbg = Debugger::new();
    let index = dbg.add_watchpoint(DATA + 0x40);
    assert_eq!(dbg.step(&mut m), Ok(ExecDecision::Continue));

    sibling.step().unwrap();
    assert_eq!(
        dbg.step(&mut m),
        Ok(ExecDecision::Pause(PauseReason::Watchpoint {
            index,
            addr: DATA + 0x40
        }))
    );
    assert_eq!(m.state.rip, CODE + 2);
}
