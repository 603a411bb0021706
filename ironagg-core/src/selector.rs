// ironagg-core/src/selector.rs
// N-best selection backing $top, $bottom, $topN and $bottomN

use crate::sort_key::SortKey;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Which end of the sortBy order a selector keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sense {
    /// First N in sortBy order
    Top,
    /// Last N in sortBy order
    Bottom,
}

/// A retained entry. `Ord` ranks entries so that the heap maximum is the
/// entry closest to eviction.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Ranked<T> {
    key: SortKey,
    seq: u64,
    bottom: bool,
    item: T,
}

impl<T> Ord for Ranked<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_key = if self.bottom {
            other.key.cmp(&self.key)
        } else {
            self.key.cmp(&other.key)
        };
        // Earlier arrival always ranks better
        by_key.then(self.seq.cmp(&other.seq))
    }
}

impl<T> PartialOrd for Ranked<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> PartialEq for Ranked<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Ranked<T> {}

/// Outcome of [`BoundedSelector::offer`]
#[derive(Debug)]
pub enum Offer<T> {
    /// Retained without displacing anything
    Kept,
    /// Retained; the displaced entry is handed back
    Replaced(SortKey, T),
    /// Not retained; the item is handed back
    Rejected(T),
}

impl<T> Offer<T> {
    pub fn is_retained(&self) -> bool {
        !matches!(self, Offer::Rejected(_))
    }
}

/// Keeps the N most extreme entries seen so far for one sort specification
///
/// Entries are offered with an arrival sequence number; among equal keys the
/// entry that arrived first is retained, and an equal key never evicts.
/// `T` is whatever the caller needs at finalize time: the coordinator keeps
/// the whole document so every sharing accumulator can evaluate its own
/// output expression, the merging node keeps a single output value.
///
/// # Examples
///
/// ```
/// use ironagg_core::selector::{BoundedSelector, Sense};
/// use ironagg_core::sort_key::SortSpec;
/// use ironagg_core::value::Document;
/// use serde_json::json;
///
/// let spec = SortSpec::from_json(&json!({"y": -1})).unwrap();
/// let mut selector = BoundedSelector::new(Sense::Top, 2);
/// for (seq, y) in [10, 1000, 3, 300].into_iter().enumerate() {
///     let doc = Document::from_json(&json!({"y": y})).unwrap();
///     selector.offer(spec.extract(&doc), seq as u64, y);
/// }
/// let best: Vec<i32> = selector.finalize().into_iter().map(|(_, y)| *y).collect();
/// assert_eq!(best, vec![1000, 300]);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundedSelector<T> {
    sense: Sense,
    n: usize,
    heap: BinaryHeap<Ranked<T>>,
}

impl<T> BoundedSelector<T> {
    /// Create an empty selector keeping at most `n` entries (`n >= 1`)
    pub fn new(sense: Sense, n: usize) -> Self {
        BoundedSelector {
            sense,
            n,
            heap: BinaryHeap::with_capacity(n.min(1024)),
        }
    }

    pub fn sense(&self) -> Sense {
        self.sense
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.n
    }

    /// Offer an entry
    pub fn offer(&mut self, key: SortKey, seq: u64, item: T) -> Offer<T> {
        if self.n == 0 {
            return Offer::Rejected(item);
        }

        let candidate = Ranked {
            key,
            seq,
            bottom: self.sense == Sense::Bottom,
            item,
        };

        if self.heap.len() < self.n {
            self.heap.push(candidate);
            return Offer::Kept;
        }

        match self.heap.peek_mut() {
            Some(mut worst) if candidate < *worst => {
                let evicted = std::mem::replace(&mut *worst, candidate);
                Offer::Replaced(evicted.key, evicted.item)
            }
            _ => Offer::Rejected(candidate.item),
        }
    }

    /// Retained entries in output order, without consuming them
    ///
    /// Output is always in sortBy order; entries with equal keys appear in
    /// arrival order. Calling this repeatedly yields the same result.
    pub fn finalize(&self) -> Vec<(&SortKey, &T)> {
        let mut entries: Vec<&Ranked<T>> = self.heap.iter().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key).then(a.seq.cmp(&b.seq)));
        entries.into_iter().map(|r| (&r.key, &r.item)).collect()
    }

    /// The single entry `$top`/`$bottom` report
    ///
    /// For a bottom selector of size one this is the last entry in sortBy
    /// order, which is also the only one retained.
    pub fn finalize_single(&self) -> Option<&T> {
        let entries = self.finalize();
        match self.sense {
            Sense::Top => entries.first().map(|(_, item)| *item),
            Sense::Bottom => entries.last().map(|(_, item)| *item),
        }
    }

    /// Fold another selector's entries in, keeping their sequence numbers
    pub fn absorb(&mut self, other: BoundedSelector<T>) {
        for ranked in other.heap.into_vec() {
            self.offer(ranked.key, ranked.seq, ranked.item);
        }
    }

    pub fn approx_size(&self, item_size: impl Fn(&T) -> usize) -> usize {
        self.heap
            .iter()
            .map(|r| r.key.approx_size() + item_size(&r.item) + 24)
            .sum::<usize>()
            + 32
    }
}
