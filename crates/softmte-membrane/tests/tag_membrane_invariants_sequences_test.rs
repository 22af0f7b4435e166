use serde_json::json;
use softmte_membrane::{CheckMode, ReleaseError, Tag, TagCheck, TagMembrane, TaggedPtr};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn gen_range_usize(&mut self, low: usize, high_inclusive: usize) -> usize {
        assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotState {
    Empty,
    Live,
    Released,
}

#[test]
fn deterministic_sequences_hold_core_invariants() {
    // Bounded invariant pressure over allocate / validate / release / double release.
    const SEEDS: [u64; 4] = [1, 2, 3, 4];
    const STEPS: usize = 2_000;
    const SLOTS: usize = 32;

    for seed in SEEDS {
        let membrane = TagMembrane::with_seed(seed);
        let mut rng = XorShift64::new(seed);

        let mut ptrs = [TaggedPtr::NULL; SLOTS];
        let mut sizes = [0_usize; SLOTS];
        let mut states = [SlotState::Empty; SLOTS];
        // Last tag each raw address carried when released.
        let mut last_released: HashMap<usize, Tag> = HashMap::new();

        let foreign = TaggedPtr::from_addr(0xDEAD_BEE0);
        assert!(
            !membrane.validate(foreign),
            "seed={seed}: foreign pointer must not validate"
        );
        assert!(
            membrane
                .check(foreign, 16, CheckMode::Strict)
                .permitted(CheckMode::Strict),
            "seed={seed}: untagged foreign pointer must pass the gate"
        );

        for step in 0..STEPS {
            let op = rng.gen_range_usize(0, 99);
            let idx = rng.gen_range_usize(0, SLOTS - 1);

            match op {
                // allocate (biased)
                0..=44 => {
                    if states[idx] == SlotState::Live {
                        continue;
                    }
                    let size = rng.gen_range_usize(1, 2048);
                    let ptr = membrane.allocate(size).expect("alloc");
                    assert!(
                        membrane.validate(ptr),
                        "seed={seed} step={step}: fresh allocation must validate"
                    );
                    if let Some(previous) = last_released.get(&ptr.raw()) {
                        assert_ne!(
                            *previous,
                            ptr.tag(),
                            "seed={seed} step={step}: reused address got its retired tag"
                        );
                    }
                    ptrs[idx] = ptr;
                    sizes[idx] = size;
                    states[idx] = SlotState::Live;
                }
                // validate
                45..=84 => match states[idx] {
                    SlotState::Empty => {}
                    SlotState::Live => {
                        let ptr = ptrs[idx];
                        assert!(
                            membrane.validate(ptr),
                            "seed={seed} step={step}: live pointer must validate"
                        );
                        let check = membrane.check(ptr, sizes[idx], CheckMode::Strict);
                        assert_eq!(
                            check,
                            TagCheck::Match {
                                base: ptr.raw(),
                                tag: ptr.tag()
                            },
                            "seed={seed} step={step}: full-extent access must match"
                        );
                        let overrun = membrane.check(ptr, sizes[idx] + 1, CheckMode::Strict);
                        assert!(
                            matches!(overrun, TagCheck::OutOfBounds { .. }),
                            "seed={seed} step={step}: overrun must be out of bounds (got {overrun:?})"
                        );
                    }
                    SlotState::Released => {
                        let ptr = ptrs[idx];
                        let reused = (0..SLOTS).any(|other| {
                            states[other] == SlotState::Live && ptrs[other].raw() == ptr.raw()
                        });
                        if !reused {
                            assert!(
                                !membrane.validate(ptr),
                                "seed={seed} step={step}: released pointer must not validate"
                            );
                        }
                    }
                },
                // release live
                85..=94 => {
                    if states[idx] != SlotState::Live {
                        continue;
                    }
                    let ptr = ptrs[idx];
                    assert_eq!(
                        membrane.release(ptr),
                        Ok(sizes[idx]),
                        "seed={seed} step={step}: first release must free the block"
                    );
                    last_released.insert(ptr.raw(), ptr.tag());
                    states[idx] = SlotState::Released;
                }
                // double release attempt
                _ => {
                    if states[idx] != SlotState::Released {
                        continue;
                    }
                    let ptr = ptrs[idx];
                    let occupant = (0..SLOTS)
                        .find(|&other| {
                            states[other] == SlotState::Live && ptrs[other].raw() == ptr.raw()
                        })
                        .map(|other| ptrs[other]);
                    if occupant == Some(ptr) {
                        // The address came back around to the same tag; that
                        // release would be indistinguishable from the owner's.
                        continue;
                    }
                    let result = membrane.release(ptr);
                    if occupant.is_some() {
                        assert!(
                            matches!(result, Err(ReleaseError::TagMismatch { .. })),
                            "seed={seed} step={step}: stale release of reused block must be a mismatch (got {result:?})"
                        );
                    } else {
                        assert_eq!(
                            result,
                            Err(ReleaseError::Untracked { raw: ptr.raw() }),
                            "seed={seed} step={step}: double release must be untracked"
                        );
                    }
                }
            }
        }

        let live = states.iter().filter(|s| **s == SlotState::Live).count();
        assert_eq!(
            membrane.shadow().len(),
            live,
            "seed={seed}: one shadow entry per live block"
        );
        for idx in 0..SLOTS {
            if states[idx] == SlotState::Live {
                membrane.release(ptrs[idx]).expect("final release");
            }
        }
        assert!(membrane.shadow().is_empty(), "seed={seed}: table drained");
    }
}

#[test]
fn concurrent_allocate_release_keeps_table_consistent() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 500;

    let membrane = Arc::new(TagMembrane::with_seed(0xC0FFEE));
    let mut handles = Vec::with_capacity(THREADS);
    for t in 0..THREADS {
        let membrane = Arc::clone(&membrane);
        handles.push(thread::spawn(move || {
            let mut rng = XorShift64::new(t as u64 + 1);
            let mut held = Vec::new();
            let mut stale_rejected = 0usize;
            for _ in 0..ROUNDS {
                let size = rng.gen_range_usize(1, 256);
                let ptr = membrane.allocate(size).expect("alloc");
                assert!(membrane.validate(ptr));
                held.push(ptr);
                if held.len() > 8 {
                    let victim = held.swap_remove(rng.gen_range_usize(0, held.len() - 1));
                    let forged = victim.with_tag(victim.tag().next());
                    if membrane.release(forged).is_err() {
                        stale_rejected += 1;
                    }
                    membrane.release(victim).expect("release");
                }
            }
            for ptr in held.drain(..) {
                membrane.release(ptr).expect("drain");
            }
            stale_rejected
        }));
    }

    let mut stale_rejected = 0usize;
    for handle in handles {
        stale_rejected += handle.join().expect("worker must not panic");
    }

    let snap = membrane.metrics().snapshot();
    let report = json!({
        "scenario": "concurrent_allocate_release",
        "threads": THREADS,
        "rounds": ROUNDS,
        "allocations": snap.allocations,
        "releases": snap.releases,
        "rejected_releases": snap.rejected_releases,
        "stale_rejected": stale_rejected,
        "live_entries": membrane.shadow().len(),
    });
    assert_eq!(report["live_entries"], 0, "report: {report}");
    assert_eq!(snap.allocations, (THREADS * ROUNDS) as u64, "report: {report}");
    assert_eq!(snap.releases, snap.allocations, "report: {report}");
    assert_eq!(
        snap.rejected_releases, stale_rejected as u64,
        "report: {report}"
    );
    assert_eq!(
        stale_rejected,
        THREADS * (ROUNDS - 8),
        "every forged release must be refused: {report}"
    );
}
