//! Deterministic multi-key ranking
//!
//! A [`RankingChain`] is an ordered list of key extractors, each with a
//! direction. Input order is only used when the chain declares it with
//! [`RankingChain::then_by_insertion`]; the underlying sort is unstable, so a
//! chain without it gives no guarantee about equal-key items.

pub mod product;
pub mod story;

use std::cmp::Ordering;
use std::fmt;

pub use product::{
    rank_products, select_devices, DeviceSelection, MetadataTable, ProductCandidate, Tier,
};
pub use story::{
    recommend, recommend_batch, AccountProfile, Recommendation, ScoredStory, Story,
    StoryCatalogue, StoryRecommendation,
};

/// Sort direction of one key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

type Comparator<T> = Box<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Ordered tie-break chain over `T`
pub struct RankingChain<T> {
    keys: Vec<(String, Comparator<T>)>,
    by_insertion: bool,
}

impl<T> Default for RankingChain<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for RankingChain<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RankingChain")
            .field("keys", &self.keys.iter().map(|(name, _)| name).collect::<Vec<_>>())
            .field("by_insertion", &self.by_insertion)
            .finish()
    }
}

impl<T> RankingChain<T> {
    pub fn new() -> Self {
        Self {
            keys: Vec::new(),
            by_insertion: false,
        }
    }

    /// Append a key to the chain
    pub fn by<K, F>(mut self, name: &str, key: F, direction: Direction) -> Self
    where
        K: Ord,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        let cmp: Comparator<T> = Box::new(move |a, b| {
            let ord = key(a).cmp(&key(b));
            match direction {
                Direction::Ascending => ord,
                Direction::Descending => ord.reverse(),
            }
        });
        self.keys.push((name.to_string(), cmp));
        self
    }

    /// Declare input position (ascending) as the final tie-break
    pub fn then_by_insertion(mut self) -> Self {
        self.by_insertion = true;
        self
    }

    /// Compare two items on the declared keys only
    pub fn compare(&self, a: &T, b: &T) -> Ordering {
        self.keys
            .iter()
            .map(|(_, cmp)| cmp(a, b))
            .find(|ord| ord.is_ne())
            .unwrap_or(Ordering::Equal)
    }

    /// Whether two items share every declared key
    pub fn ties(&self, a: &T, b: &T) -> bool {
        self.compare(a, b).is_eq()
    }

    /// Rank items; returns `(input index, item)` pairs in rank order
    pub fn rank_indexed(&self, items: Vec<T>) -> Vec<(usize, T)> {
        let mut indexed: Vec<(usize, T)> = items.into_iter().enumerate().collect();
        indexed.sort_unstable_by(|(ia, a), (ib, b)| {
            let ord = self.compare(a, b);
            if self.by_insertion {
                ord.then(ia.cmp(ib))
            } else {
                ord
            }
        });
        indexed
    }

    /// Rank items
    pub fn rank(&self, items: Vec<T>) -> Vec<T> {
        self.rank_indexed(items).into_iter().map(|(_, item)| item).collect()
    }
}
