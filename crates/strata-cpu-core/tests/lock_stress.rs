//! LOCK-prefixed increments from many host threads against one guest word.

mod common;

use std::thread;

use strata_cpu_core::{execute_unary, CpuMode, Gpr, Machine, Operand, UnaryOp, Width};

const THREADS: u64 = 8;
const ITERS: u64 = 5_000;

fn hammer(width: Width, addr: u64) -> u64 {
    let system = common::system();
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let mut m = Machine::new(system.clone(), CpuMode::Long);
            thread::spawn(move || {
                for _ in 0..ITERS {
                    execute_unary(&mut m, UnaryOp::Inc, width, Operand::mem(addr), true)
                        .expect("locked inc");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker panicked");
    }

    let mut buf = [0u8; 8];
    system
        .memory()
        .read_bytes(addr, &mut buf[..width.bytes()])
        .unwrap();
    u64::from_le_bytes(buf)
}

#[test]
fn aligned_qword_uses_cas_and_loses_no_updates() {
    assert_eq!(hammer(Width::W64, common::DATA), THREADS * ITERS);
}

#[test]
fn unaligned_qword_falls_back_to_shared_lock() {
    assert_eq!(hammer(Width::W64, common::DATA + 3), THREADS * ITERS);
}

#[test]
fn aligned_dword_uses_cas() {
    assert_eq!(hammer(Width::W32, common::DATA + 4), THREADS * ITERS);
}

#[test]
fn word_and_byte_serialize_on_shared_lock() {
    assert_eq!(
        hammer(Width::W16, common::DATA + 1),
        (THREADS * ITERS) & Width::W16.mask()
    );
    assert_eq!(
        hammer(Width::W8, common::DATA + 7),
        (THREADS * ITERS) & Width::W8.mask()
    );
}

#[test]
fn decoded_lock_inc_from_sibling_machines() {
    let system = common::system();
    let mut template = Machine::new(system.clone(), CpuMode::Long);
    // lock inc qword ptr [rax]
    common::load_code(&mut template, &[0xF0, 0x48, 0xFF, 0x00]);
    template.state.set_gpr(Gpr::Rax, common::DATA);

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let mut m = template.clone();
            thread::spawn(move || {
                for _ in 0..ITERS {
                    m.state.rip = common::CODE;
                    m.step().expect("step");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker panicked");
    }

    assert_eq!(
        system.memory().read_u64_le(common::DATA).unwrap(),
        THREADS * ITERS
    );
}
