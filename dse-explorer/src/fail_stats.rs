//! Per-thread failure statistics with reservoir-of-size-one sample mappings
//! (spec §3 "Failure record", §7 "Propagation").
//!
//! Grounded on `MapperThread::Stats::UpdateFails` in
//! `examples/original_source/include/applications/mapper/mapper-thread.hpp`:
//! repeat failures at the same `(class, level)` replace the stored sample
//! mapping with probability `1/count`, giving a uniform random sample across
//! all occurrences without keeping a growing list.

use std::collections::HashMap;

use rand::Rng;

/// Why a candidate mapping was rejected (spec §3, §7 kinds 2-3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailClass {
    Fanout,
    Capacity,
}

#[derive(Debug, Clone)]
pub struct FailRecord {
    pub count: u64,
    pub sample_mapping_id: u64,
    pub reason: String,
}

/// Per-thread `(FailClass, level) -> FailRecord` table.
#[derive(Debug, Clone, Default)]
pub struct FailStats {
    records: HashMap<(FailClass, usize), FailRecord>,
}

impl FailStats {
    pub fn new() -> Self {
        FailStats::default()
    }

    /// Records one failure occurrence, replacing the stored sample mapping
    /// with probability `1/count` on repeats (spec §3).
    pub fn record(
        &mut self,
        rng: &mut impl Rng,
        class: FailClass,
        level: usize,
        mapping_id: u64,
        reason: &str,
    ) {
        let entry = self
            .records
            .entry((class, level))
            .or_insert_with(|| FailRecord { count: 0, sample_mapping_id: mapping_id, reason: reason.to_string() });
        entry.count += 1;
        if entry.count == 1 {
            return;
        }
        if rng.gen_bool(1.0 / entry.count as f64) {
            entry.sample_mapping_id = mapping_id;
            entry.reason = reason.to_string();
        }
    }

    pub fn get(&self, class: FailClass, level: usize) -> Option<&FailRecord> {
        self.records.get(&(class, level))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(FailClass, usize), &FailRecord)> {
        self.records.iter()
    }

    /// Merges another thread's failure stats into this one, summing counts
    /// and keeping the first-seen sample per `(class, level)` (spec §7:
    /// "only the first-seen sample mapping per (fail_class, level) is
    /// preserved, rotated uniformly at random across repeated occurrences").
    pub fn merge(&mut self, other: &FailStats) {
        for (&key, record) in &other.records {
            let entry = self
                .records
                .entry(key)
                .or_insert_with(|| FailRecord { count: 0, sample_mapping_id: record.sample_mapping_id, reason: record.reason.clone() });
            entry.count += record.count;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn first_occurrence_is_always_kept() {
        let mut stats = FailStats::new();
        let mut rng = rand::rngs::StdRng::seed_from_u64(0);
        stats.record(&mut rng, FailClass::Capacity, 1, 42, "too big");
        let record = stats.get(FailClass::Capacity, 1).unwrap();
        assert_eq!(record.count, 1);
        assert_eq!(record.sample_mapping_id, 42);
    }

    #[test]
    fn merge_sums_counts() {
        let mut a = FailStats::new();
        let mut b = FailStats::new();
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        a.record(&mut rng, FailClass::Fanout, 0, 1, "r");
        b.record(&mut rng, FailClass::Fanout, 0, 2, "r");
        b.record(&mut rng, FailClass::Fanout, 0, 3, "r");
        a.merge(&b);
        assert_eq!(a.get(FailClass::Fanout, 0).unwrap().count, 3);
    }
}
