//! Periodic aging for live views.

use log::debug;

use super::table::HistogramTable;
use perfhist_common::USER_LEVEL;

/// Entries of this level are candidates for eviction.
fn zap_matches(zap_user: bool, zap_kernel: bool, level: char) -> bool {
    match (zap_user, zap_kernel) {
        (true, false) => level == USER_LEVEL,
        (false, true) => level != USER_LEVEL,
        _ => true,
    }
}

impl HistogramTable {
    /// Age every entry, and its callchain tree, by the configured decay factor
    /// and evict the ones that reached zero period.
    ///
    /// Pinned entries (see [`set_used`](Self::set_used)) are aged but never
    /// evicted. `zap_user` alone restricts eviction to user-space entries,
    /// `zap_kernel` alone to kernel ones; neither or both evict any level.
    /// Must run between output resorts. Returns the number of evicted entries.
    pub fn decay_entries(&mut self, zap_user: bool, zap_kernel: bool) -> usize {
        let decay = self.config.decay;
        let doomed: Vec<bool> = self
            .entries
            .iter_mut()
            .map(|entry| {
                entry.stat.decay(decay);
                if let Some(root) = &mut entry.callchain {
                    root.decay(decay);
                }
                entry.stat.period == 0
                    && !entry.used
                    && zap_matches(zap_user, zap_kernel, entry.level())
            })
            .collect();

        let removed = doomed.iter().filter(|&&gone| gone).count();
        if removed > 0 {
            self.compact(&doomed);
        }
        self.recompute_totals();
        debug!("decay: evicted {removed}, {} remain", self.entries.len());
        removed
    }

    /// Drop doomed slots from the arena and remap every view onto the survivors.
    fn compact(&mut self, doomed: &[bool]) {
        let mut remap = vec![None; doomed.len()];
        let old = std::mem::take(&mut self.entries);
        self.entries.reserve(old.len() - doomed.iter().filter(|&&d| d).count());
        for (slot, entry) in old.into_iter().enumerate() {
            if doomed[slot] {
                continue;
            }
            remap[slot] = Some(self.entries.len());
            self.entries.push(entry);
        }
        // Aliases of merged entries move with their bucket.
        self.by_id.retain(|_, slot| match remap[*slot] {
            Some(new_slot) => {
                *slot = new_slot;
                true
            }
            None => false,
        });
        self.collapsed = self.collapsed.iter().filter_map(|&s| remap[s]).collect();
        self.output = self.output.iter().filter_map(|&s| remap[s]).collect();
        for (rank, &slot) in self.output.iter().enumerate() {
            self.entries[slot].position = rank + 1;
        }
    }
}
