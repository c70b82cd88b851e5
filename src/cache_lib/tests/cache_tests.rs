//! Cache hierarchy engine tests.
//!
//! Exercises hit/miss accounting, dirty-line writeback propagation through a
//! miss-handler chain, the traced-level miss hook, and the deterministic
//! LFSR replacement of both tag-store variants.

use cache_lib::{CacheSim, MissHook};
use std::cell::RefCell;
use std::rc::Rc;

type MissEvents = Rc<RefCell<Vec<(u64, u64, u64, bool)>>>;

/// A hook that records every miss it is handed, in order.
fn recording_hook() -> (MissHook, MissEvents) {
    let events: MissEvents = Rc::new(RefCell::new(Vec::new()));
    let tap = Rc::clone(&events);
    let hook: MissHook = Rc::new(move |vaddr, paddr, bytes, store| {
        tap.borrow_mut().push((vaddr, paddr, bytes, store));
    });
    (hook, events)
}

fn shared(cache: CacheSim) -> Rc<RefCell<CacheSim>> {
    Rc::new(RefCell::new(cache))
}

// ──────────────────────────────────────────────────────────
// Hit / miss accounting
// ──────────────────────────────────────────────────────────

#[test]
fn cold_miss_then_warm_hit() {
    let mut cache = CacheSim::construct("2:2:64", "L1-D").unwrap();

    cache.access(0x1000, 0x1000, 4, false);
    let stats = cache.cache_stats();
    assert_eq!(stats.read_accesses, 1);
    assert_eq!(stats.read_misses, 1);
    assert_eq!(stats.bytes_read, 4);

    cache.access(0x1000, 0x1000, 8, false);
    let stats = cache.cache_stats();
    assert_eq!(stats.read_accesses, 2);
    assert_eq!(stats.read_misses, 1);
    assert_eq!(stats.bytes_read, 12);
}

#[test]
fn same_line_different_offset_hits() {
    let mut cache = CacheSim::construct("2:2:64", "L1-D").unwrap();

    cache.access(0x1000, 0x1000, 4, false);
    cache.access(0x1020, 0x1020, 4, false);

    let stats = cache.cache_stats();
    assert_eq!(stats.read_accesses, 2);
    assert_eq!(stats.read_misses, 1, "offset 0x20 shares the 64-byte line");
}

#[test]
fn store_miss_counts_as_write() {
    let mut cache = CacheSim::construct("2:2:64", "L1-D").unwrap();

    cache.access(0x1000, 0x1000, 4, true);

    let stats = cache.cache_stats();
    assert_eq!(stats.write_accesses, 1);
    assert_eq!(stats.write_misses, 1);
    assert_eq!(stats.bytes_written, 4);
    assert_eq!(stats.read_accesses, 0);
}

// ──────────────────────────────────────────────────────────
// Miss-handler chain: fills and writebacks
// ──────────────────────────────────────────────────────────

#[test]
fn store_miss_fills_from_below_as_read() {
    // Write-allocate: the lower level services the fill as a read even
    // when the originating access is a store.
    let l2 = shared(CacheSim::construct("16:2:64", "L2").unwrap());
    let mut l1 = CacheSim::construct("1:1:8", "L1-D").unwrap();
    l1.set_miss_handler(Rc::clone(&l2));

    l1.access(0x40, 0x40, 4, true);

    let stats = l2.borrow().cache_stats();
    assert_eq!(stats.read_accesses, 1);
    assert_eq!(stats.write_accesses, 0);
    assert_eq!(stats.bytes_read, 8, "fills move whole lines");
}

#[test]
fn dirty_eviction_writes_back_before_fill() {
    // Two front caches share one single-line L2 so a dirty line evicted
    // from the first front cache reaches an L2 that no longer holds it.
    let (hook, events) = recording_hook();
    let l2 = shared(CacheSim::construct("1:1:8", "L2").unwrap());
    l2.borrow_mut().enable_trace_miss(hook);

    let mut front_a = CacheSim::construct("1:1:8", "L1-D").unwrap();
    let mut front_b = CacheSim::construct("1:1:8", "L1-I").unwrap();
    front_a.set_miss_handler(Rc::clone(&l2));
    front_b.set_miss_handler(Rc::clone(&l2));

    // Install 0x40 dirty in front_a (vaddr deliberately differs from paddr
    // so source propagation is observable).
    front_a.access(0x7F40, 0x40, 4, true);
    // Push 0x40 out of L2.
    front_b.access(0x100, 0x100, 4, false);
    // Evict the dirty line from front_a; the writeback must precede the
    // fill of 0x80 in the L2 miss stream.
    front_a.access(0x80, 0x80, 4, false);

    let events = events.borrow();
    assert_eq!(
        *events,
        vec![
            (0x7F40, 0x40, 8, false),
            (0x100, 0x100, 8, false),
            (0x7F40, 0x40, 8, true),
            (0x80, 0x80, 8, false),
        ],
    );

    let stats = l2.borrow().cache_stats();
    assert_eq!(stats.read_accesses, 3);
    assert_eq!(stats.write_accesses, 1);
    assert_eq!(stats.write_misses, 1);
    assert_eq!(stats.writebacks, 1, "the fill of 0x80 evicts the dirty 0x40");
    assert_eq!(front_a.cache_stats().writebacks, 1);
}

#[test]
fn clean_eviction_produces_no_writeback() {
    let l2 = shared(CacheSim::construct("16:2:64", "L2").unwrap());
    let mut l1 = CacheSim::construct("1:1:8", "L1-D").unwrap();
    l1.set_miss_handler(Rc::clone(&l2));

    l1.access(0x40, 0x40, 4, false);
    l1.access(0x80, 0x80, 4, false);

    assert_eq!(l1.cache_stats().writebacks, 0);
    assert_eq!(l2.borrow().cache_stats().write_accesses, 0);
}

#[test]
fn dirty_bit_survives_intervening_reads() {
    let l2 = shared(CacheSim::construct("16:2:64", "L2").unwrap());
    let mut l1 = CacheSim::construct("1:1:8", "L1-D").unwrap();
    l1.set_miss_handler(Rc::clone(&l2));

    l1.access(0x40, 0x40, 4, true);
    l1.access(0x44, 0x44, 4, false);
    l1.access(0x80, 0x80, 4, false);

    assert_eq!(l1.cache_stats().writebacks, 1);
    assert_eq!(l2.borrow().cache_stats().write_accesses, 1);
}

// ──────────────────────────────────────────────────────────
// Traced-level miss hook
// ──────────────────────────────────────────────────────────

#[test]
fn miss_records_are_line_aligned() {
    let (hook, events) = recording_hook();
    let mut cache = CacheSim::construct("4:2:64", "L1-D").unwrap();
    cache.enable_trace_miss(hook);

    for i in 0..64u64 {
        let vaddr = 0x4000_1001 + i * 217;
        cache.access(vaddr, vaddr, 4, i % 3 == 0);
    }

    let events = events.borrow();
    assert!(!events.is_empty());
    for (vaddr, paddr, bytes, _) in events.iter() {
        assert_eq!(vaddr % 64, 0);
        assert_eq!(paddr % 64, 0);
        assert_eq!(*bytes, 64);
    }
}

#[test]
fn hits_emit_no_miss_record() {
    let (hook, events) = recording_hook();
    let mut cache = CacheSim::construct("2:2:64", "L1-D").unwrap();
    cache.enable_trace_miss(hook);

    cache.access(0x1000, 0x1000, 4, false);
    cache.access(0x1008, 0x1008, 4, true);

    assert_eq!(events.borrow().len(), 1, "only the cold miss is reported");
}

// ──────────────────────────────────────────────────────────
// Replacement determinism
// ──────────────────────────────────────────────────────────

#[test]
fn identical_streams_replay_identically() {
    let mut first = CacheSim::construct("4:2:8", "A").unwrap();
    let mut second = CacheSim::construct("4:2:8", "B").unwrap();

    let mut addr = 0x40u64;
    for i in 0..2_000u64 {
        addr = addr
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        let paddr = addr % 0x800;
        first.access(paddr, paddr, 4, i % 5 == 0);
        second.access(paddr, paddr, 4, i % 5 == 0);
    }

    assert_eq!(first.cache_stats(), second.cache_stats());
    for paddr in (0..0x800u64).step_by(8) {
        assert_eq!(first.cache_contains(paddr), second.cache_contains(paddr));
    }
}

#[test]
fn writebacks_never_exceed_misses() {
    let l2 = shared(CacheSim::construct("4:2:64", "L2").unwrap());
    let mut l1 = CacheSim::construct("2:1:8", "L1-D").unwrap();
    l1.set_miss_handler(Rc::clone(&l2));

    let mut addr = 0x9000u64;
    for i in 0..3_000u64 {
        addr = addr
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        let paddr = addr % 0x1000;
        l1.access(paddr, paddr, 2, i % 2 == 0);
    }

    for stats in [l1.cache_stats(), l2.borrow().cache_stats()] {
        assert!(stats.writebacks <= stats.read_misses + stats.write_misses);
        assert!(stats.read_misses <= stats.read_accesses);
        assert!(stats.write_misses <= stats.write_accesses);
    }
}

// ──────────────────────────────────────────────────────────
// Fully-associative variant
// ──────────────────────────────────────────────────────────

#[test]
fn fully_associative_holds_ways_lines() {
    let mut cache = CacheSim::construct("1:8:64", "FA").unwrap();

    for line in 0..8u64 {
        cache.access(line * 64, line * 64, 4, false);
    }
    for line in 0..8u64 {
        assert!(cache.cache_contains(line * 64));
    }
    assert_eq!(cache.cache_stats().read_misses, 8);

    // All resident: re-touching every line only adds hits.
    for line in 0..8u64 {
        cache.access(line * 64, line * 64, 4, false);
    }
    assert_eq!(cache.cache_stats().read_misses, 8);
}

#[test]
fn fully_associative_eviction_follows_sorted_order() {
    let mut cache = CacheSim::construct("1:8:64", "FA").unwrap();

    for line in 0..8u64 {
        cache.access(line * 64, line * 64, 4, false);
    }
    // First LFSR draw is 0xD0000001; 0xD0000001 % 8 == 1, so the ninth
    // install evicts the second-smallest resident line number.
    cache.access(8 * 64, 8 * 64, 4, false);

    assert!(!cache.cache_contains(64));
    for line in [0u64, 2, 3, 4, 5, 6, 7, 8] {
        assert!(cache.cache_contains(line * 64));
    }
}

#[test]
fn fully_associative_propagates_dirty_writebacks() {
    let (hook, events) = recording_hook();
    let l2 = shared(CacheSim::construct("1:1:8", "L2").unwrap());
    l2.borrow_mut().enable_trace_miss(hook);

    let mut fa = CacheSim::construct("1:8:8", "FA").unwrap();
    fa.set_miss_handler(Rc::clone(&l2));

    for line in 0..8u64 {
        fa.access(0x9000 + line * 8, line * 8, 2, true);
    }
    // Ninth distinct line evicts line 1 (first draw % 8 == 1), which is
    // dirty, so L2 sees its saved source vaddr as a store.
    fa.access(0x9000 + 8 * 8, 8 * 8, 2, true);

    assert_eq!(fa.cache_stats().writebacks, 1);
    let events = events.borrow();
    let writeback = events
        .iter()
        .find(|(_, _, _, store)| *store)
        .expect("dirty eviction must reach the next level");
    assert_eq!(*writeback, (0x9008, 0x8, 8, true));
}

// ──────────────────────────────────────────────────────────
// Statistics block
// ──────────────────────────────────────────────────────────

#[test]
fn stats_block_format() {
    let mut cache = CacheSim::construct("1:1:8", "L1-D").unwrap();
    cache.access(0x40, 0x40, 4, false);
    cache.access(0x44, 0x44, 4, false);
    cache.access(0x48, 0x48, 4, true);

    let mut out = Vec::new();
    cache.write_stats(&mut out).unwrap();
    let block = String::from_utf8(out).unwrap();
    assert_eq!(
        block,
        "======== L1-D ========\n\
         Bytes Read: 8\n\
         Bytes Written: 4\n\
         Read Accesses: 2\n\
         Write Accesses: 1\n\
         Read Misses: 1\n\
         Write Misses: 1\n\
         Writebacks: 0\n\
         Miss Rate: 66.667\n",
    );
}

#[test]
fn stats_block_suppressed_without_accesses() {
    let cache = CacheSim::construct("1:1:8", "L1-D").unwrap();
    let mut out = Vec::new();
    cache.write_stats(&mut out).unwrap();
    assert!(out.is_empty());
}
