//! Bounded top-k selection for ranked sections.

use crate::index::types::SectionKey;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A scored candidate carrying its payload
#[derive(Debug, Clone)]
pub struct TopKEntry<T> {
    pub score: f64,
    pub key: SectionKey,
    pub item: T,
}

impl<T> TopKEntry<T> {
    /// Higher score first, then `(path, heading)` ascending
    fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.key.cmp(&other.key))
    }
}

impl<T> PartialEq for TopKEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.rank_cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for TopKEntry<T> {}

impl<T> PartialOrd for TopKEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for TopKEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // "Greater" means ranked worse, so the max-heap peek is the entry to evict
        self.rank_cmp(other)
    }
}

/// Top-K heap. Keeps the k best entries seen so far; the worst of them sits
/// at the top of the heap so admission is a single comparison.
pub struct TopKHeap<T> {
    heap: BinaryHeap<TopKEntry<T>>,
    capacity: usize,
}

impl<T> TopKHeap<T> {
    pub fn new(k: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(k + 1),
            capacity: k,
        }
    }

    /// Try to insert an entry. Returns true if it is currently in the top k.
    pub fn try_insert(&mut self, entry: TopKEntry<T>) -> bool {
        if self.capacity == 0 {
            return false;
        }
        if self.heap.len() < self.capacity {
            self.heap.push(entry);
            return true;
        }
        match self.heap.peek() {
            Some(worst) if entry < *worst => {
                self.heap.pop();
                self.heap.push(entry);
                true
            }
            _ => false,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Entries best first
    pub fn into_sorted_vec(self) -> Vec<TopKEntry<T>> {
        self.heap.into_sorted_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(score: f64, path: &str) -> TopKEntry<()> {
        TopKEntry {
            score,
            key: SectionKey::new(path, ""),
            item: (),
        }
    }

    #[test]
    fn test_keeps_best_k() {
        let mut heap = TopKHeap::new(2);
        assert!(heap.try_insert(entry(1.0, "a")));
        assert!(heap.try_insert(entry(3.0, "b")));
        assert!(heap.try_insert(entry(2.0, "c")));
        assert!(!heap.try_insert(entry(0.5, "d")));

        let scores: Vec<f64> = heap.into_sorted_vec().iter().map(|e| e.score).collect();
        assert_eq!(scores, vec![3.0, 2.0]);
    }

    #[test]
    fn test_ties_break_by_key() {
        let mut heap = TopKHeap::new(2);
        heap.try_insert(entry(1.0, "c"));
        heap.try_insert(entry(1.0, "a"));
        heap.try_insert(entry(1.0, "b"));

        let paths: Vec<String> = heap
            .into_sorted_vec()
            .into_iter()
            .map(|e| e.key.path)
            .collect();
        assert_eq!(paths, vec!["a", "b"]);
    }

    #[test]
    fn test_zero_capacity() {
        let mut heap = TopKHeap::new(0);
        assert!(!heap.try_insert(entry(9.0, "a")));
        assert!(heap.is_empty());
    }
}
