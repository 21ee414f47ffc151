//! Loop removal for branch-stack callchains.
//!
//! A tight loop fills the last-branch-record buffer with the same few
//! branches over and over:
//!
//! ```text
//! from:  A  B  C  B  C  B  C  D
//!           └──┘  └──┘  └──┘
//!        after: A  B  C  D      (B annotated: 3 iterations)
//! ```
//!
//! Every `from` address is bucketed in a small hash table holding the index
//! of its first occurrence. When an address shows up again, the candidate
//! segment `[first, i)` is compared against `[i, i + len)`; only a verified
//! repeat is spliced out, so hash collisions never remove real frames.

use perfhist_common::{BranchEntry, LOOP_HASH_BITS};

/// Iteration annotation carried by the first frame of a collapsed loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LoopIterations {
    /// Times the loop body ran (0 when the frame is not a loop head).
    pub count: u64,
    /// Sum of branch cycles over every iteration.
    pub cycles: u64,
}

const GOLDEN_RATIO_64: u64 = 0x61C8_8646_80B5_83EB;

fn bucket_of(addr: u64, size: usize) -> usize {
    let hash = addr.wrapping_mul(GOLDEN_RATIO_64) >> (64 - LOOP_HASH_BITS);
    usize::try_from(hash).unwrap_or(0) % size
}

/// `entries[start..i]` repeats verbatim right after itself.
fn is_repeat(entries: &[BranchEntry], start: usize, i: usize) -> bool {
    let len = i - start;
    i + len <= entries.len()
        && entries[start..i]
            .iter()
            .zip(&entries[i..i + len])
            .all(|(a, b)| a.from == b.from)
}

/// Start of a repeating segment ending at `i`, trying the first occurrence
/// of the address and then its most recent one.
fn find_repeat(entries: &[BranchEntry], first: usize, i: usize) -> Option<usize> {
    if is_repeat(entries, first, i) {
        return Some(first);
    }
    let from = entries[i].from;
    let last = entries[first + 1..i].iter().rposition(|e| e.from == from)? + first + 1;
    is_repeat(entries, last, i).then_some(last)
}

fn cycles(entries: &[BranchEntry]) -> u64 {
    entries.iter().map(|e| u64::from(e.flags.cycles)).sum()
}

/// Remove repeated loop bodies from `entries` in place.
///
/// Returns one [`LoopIterations`] per remaining entry.
pub fn remove_loops(entries: &mut Vec<BranchEntry>, hash_size: usize) -> Vec<LoopIterations> {
    let hash_size = hash_size.max(1);
    let mut iterations = vec![LoopIterations::default(); entries.len()];
    let mut first_seen: Vec<Option<usize>> = vec![None; hash_size];

    let mut i = 0;
    while i < entries.len() {
        let from = entries[i].from;
        let bucket = bucket_of(from, hash_size);
        let first = match first_seen[bucket] {
            None => {
                first_seen[bucket] = Some(i);
                None
            }
            Some(j) if entries[j].from == from => Some(j),
            // Collision with another address
            Some(_) => entries[..i].iter().position(|e| e.from == from),
        };

        let Some(start) = first.and_then(|first| find_repeat(entries, first, i)) else {
            i += 1;
            continue;
        };

        let len = i - start;
        let removed = cycles(&entries[i..i + len]);
        let head = &mut iterations[start];
        if head.count == 0 {
            head.count = 2;
            head.cycles = cycles(&entries[start..i]) + removed;
        } else {
            head.count += 1;
            head.cycles += removed;
        }
        entries.drain(i..i + len);
        iterations.drain(i..i + len);
        // Re-check the same position: the next iteration has shifted into it.
    }

    iterations
}
