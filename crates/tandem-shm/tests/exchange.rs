//! Two-endpoint exchange tests over a heap-backed pool pair.
//!
//! Each test runs the two endpoints on separate threads, standing in for
//! the two OS processes: same memory, same protocol, same orderings.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tandem_shm::pool::ShmPool;
use tandem_shm::region::RawRegion;
use tandem_shm::slot::WaitMode;
use tandem_shm::Channel;

const ROUNDS: u32 = 100_000;

fn read_u32(cell: &RawRegion) -> u32 {
    // SAFETY: callers hold the turn.
    let bytes = unsafe { cell.bytes() };
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(word)
}

fn write_u32(cell: &RawRegion, value: u32) {
    // SAFETY: callers hold the turn.
    unsafe {
        std::ptr::copy_nonoverlapping(value.to_le_bytes().as_ptr(), cell.as_ptr(), 4);
    }
}

/// The concrete alternation scenario: endpoint A writes `2*i` on even
/// versions, endpoint B reads it, checks it, and answers `2*i + 1` on odd
/// versions. Both sides observe a strictly increasing, gap-free version
/// sequence; no write is seen twice or missed.
#[test]
fn alternating_turns_are_exactly_once() {
    let (pa, pb) = ShmPool::heap_pair(4096);
    let slot_a = pa.register_slot(1, 8);
    let slot_b = pb.register_slot(1, 8);

    let cell_a = slot_a.payload();
    let cell_b = slot_b.payload();

    let b = thread::spawn(move || {
        for i in 0..ROUNDS {
            slot_b.claim(WaitMode::Residue {
                modulus: 2,
                residue: 1,
            });
            // The version sequence is gap-free: B's turn i is version 2i+1,
            // and while the turn is held the claim delta is exactly 1.
            assert_eq!(slot_b.version(), ((2 * i + 1) % 256) as u8);
            assert_eq!(slot_b.status().claim_delta(), 1);
            assert_eq!(read_u32(&cell_b), 2 * i, "round {}", i);
            write_u32(&cell_b, 2 * i + 1);
            slot_b.commit();
        }
    });

    for i in 0..ROUNDS {
        slot_a.claim(WaitMode::Residue {
            modulus: 2,
            residue: 0,
        });
        assert_eq!(slot_a.version(), ((2 * i) % 256) as u8);
        assert_eq!(slot_a.status().claim_delta(), 1);
        if i > 0 {
            // B's answer to the previous round is still in the cell.
            assert_eq!(read_u32(&cell_a), 2 * (i - 1) + 1);
        }
        write_u32(&cell_a, 2 * i);
        slot_a.commit();
    }

    b.join().unwrap();
}

/// Struct-wrapped alternation: every byte of the record reflects exactly the
/// peer's last commit — no torn reads across the 16-byte payload.
#[test]
fn struct_alternation_has_no_torn_reads() {
    let (pa, pb) = ShmPool::heap_pair(4096);
    let slot_a = pa.register_slot(2, 16);
    let slot_b = pb.register_slot(2, 16);
    let cell_a = slot_a.payload();
    let cell_b = slot_b.payload();

    let b = thread::spawn(move || {
        for i in 0..1000u32 {
            slot_b.claim(WaitMode::Residue {
                modulus: 2,
                residue: 1,
            });
            let fill = (i % 251) as u8;
            // SAFETY: turn held.
            let bytes = unsafe { cell_b.bytes() };
            assert!(
                bytes.iter().all(|&x| x == fill),
                "round {}: torn read {:?}",
                i,
                bytes
            );
            // SAFETY: turn held.
            unsafe {
                std::ptr::write_bytes(cell_b.as_ptr(), fill.wrapping_add(1), 16);
            }
            slot_b.commit();
        }
    });

    for i in 0..1000u32 {
        slot_a.claim(WaitMode::Residue {
            modulus: 2,
            residue: 0,
        });
        if i > 0 {
            let answered = (((i - 1) % 251) as u8).wrapping_add(1);
            // SAFETY: turn held.
            assert!(unsafe { cell_a.bytes() }.iter().all(|&x| x == answered));
        }
        // SAFETY: turn held.
        unsafe {
            std::ptr::write_bytes(cell_a.as_ptr(), (i % 251) as u8, 16);
        }
        slot_a.commit();
    }

    b.join().unwrap();
}

/// A rollback-based read turn can observe the same version repeatedly
/// without consuming it, then the next writer turn proceeds as usual.
#[test]
fn read_turns_do_not_consume_versions() {
    let (pa, pb) = ShmPool::heap_pair(4096);
    let mut writer = Channel::new(&pa, 3, &[8]);
    let mut reader = Channel::new(&pb, 3, &[8]);

    writer.bytes_mut(0)[0] = 77;
    writer.set_completed();

    for _ in 0..5 {
        assert_eq!(reader.bytes(0)[0], 77);
        reader.get_completed();
        assert_eq!(reader.version(), 1);
    }

    writer.bytes_mut(0)[0] = 78;
    writer.set_completed();
    assert_eq!(writer.version(), 2);
}

/// Channels registered for ids the peer created converge on the same
/// regions: data written through one is read through the other.
#[test]
fn peer_discovered_channels_share_regions() {
    let (pa, pb) = ShmPool::heap_pair(8192);
    // A registers several regions first, in its own order.
    let mut one = Channel::new(&pa, 10, &[16]);
    let _two = pa.register(11, 64);
    let _three = pa.register_slot(12, 8);

    // B discovers them in a different order.
    let _three_b = pb.register_slot(12, 8);
    let mut one_b = Channel::new(&pb, 10, &[16]);

    one.bytes_mut(0).fill(0x5A);
    one.set_completed();
    assert!(one_b.bytes(0).iter().all(|&b| b == 0x5A));
    one_b.get_completed();
}

/// Incompatible predicates spin forever: nothing in the protocol detects or
/// breaks the stall. The test observes the stall from outside, then makes
/// the predicate satisfiable so the spinner can finish.
#[test]
fn incompatible_predicates_spin_until_satisfiable() {
    let (pa, pb) = ShmPool::heap_pair(4096);
    let waiting = pa.register_slot(4, 8);
    let driver = pb.register_slot(4, 8);

    let progressed = Arc::new(AtomicBool::new(false));
    let flag = progressed.clone();
    let spinner = thread::spawn(move || {
        // Version is 0 and nobody is driving it toward 100 yet.
        waiting.claim(WaitMode::Target(100));
        flag.store(true, Ordering::Release);
        waiting.rollback();
    });

    thread::sleep(Duration::from_millis(100));
    assert!(
        !progressed.load(Ordering::Acquire),
        "claim must still be spinning on an unsatisfiable predicate"
    );

    // Drive the version to the target; the spinner wakes on its own.
    for _ in 0..100 {
        driver.bump();
    }
    spinner.join().unwrap();
    assert!(progressed.load(Ordering::Acquire));
}

/// Custom-predicate turns: a reader that only takes turns on versions
/// divisible by 4 sees every fourth write exactly once.
#[test]
fn custom_predicate_skips_turns() {
    let (pa, pb) = ShmPool::heap_pair(4096);
    let writer = pa.register_slot(6, 8);
    let reader = pb.register_slot(6, 8);
    let w_cell = writer.payload();
    let r_cell = reader.payload();

    let b = thread::spawn(move || {
        for k in 0..50u32 {
            reader.claim(WaitMode::Custom(|v| v % 4 == 3));
            // Three writer increments land before each of our turns.
            assert_eq!(read_u32(&r_cell), 3 * (k + 1), "turn {}", k);
            reader.commit();
        }
    });

    // Writer takes three turns in a row (residues 0, 1, 2 of each cycle of
    // 4), leaving every residue-3 turn to the reader.
    for _ in 0..150u32 {
        writer.claim(WaitMode::Custom(|v| v % 4 != 3));
        write_u32(&w_cell, read_u32(&w_cell).wrapping_add(1));
        writer.commit();
    }

    b.join().unwrap();
}
