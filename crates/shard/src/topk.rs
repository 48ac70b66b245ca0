//! Top-k ranking of `(name, count)` aggregates through a max-heap keyed by
//! count, count-descending with name-ascending tie order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct CaseCount {
    pub name: Arc<str>,
    pub count: u64,
}

impl PartialEq for CaseCount {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CaseCount {}

impl PartialOrd for CaseCount {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CaseCount {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher count ranks first; on equal counts the lexicographically
        // smaller name does, so popping the heap is deterministic.
        self.count
            .cmp(&other.count)
            .then_with(|| other.name.cmp(&self.name))
    }
}

/// The k highest-ranked entries, best first.
pub fn top_k(counts: impl IntoIterator<Item = CaseCount>, k: usize) -> Vec<CaseCount> {
    let mut heap: BinaryHeap<CaseCount> = counts.into_iter().collect();
    let mut ranked = Vec::with_capacity(k.min(heap.len()));
    while ranked.len() < k {
        let Some(next) = heap.pop() else { break };
        ranked.push(next);
    }
    ranked
}
