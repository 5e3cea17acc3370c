//! Sorted Sets
//!
//! Members map to scores in a plain `HashMap`. The total order
//! `(score, member)` is recomputed for every rank or range query instead of
//! being maintained on insert; sets in this server are small and writes
//! dominate.

use bytes::Bytes;
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct SortedSet {
    scores: HashMap<Bytes, f64>,
}

impl SortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or updates a member. Returns true if the member is new.
    pub fn insert(&mut self, member: Bytes, score: f64) -> bool {
        self.scores.insert(member, score).is_none()
    }

    /// Removes a member. Returns true if it was present.
    pub fn remove(&mut self, member: &[u8]) -> bool {
        self.scores.remove(member).is_some()
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.scores.get(member).copied()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Members in `(score, member)` order.
    pub fn ordered(&self) -> Vec<(&Bytes, f64)> {
        let mut members: Vec<(&Bytes, f64)> =
            self.scores.iter().map(|(m, s)| (m, *s)).collect();
        members.sort_by(|a, b| compare(a, b));
        members
    }

    /// 0-based position of `member` in the total order.
    pub fn rank(&self, member: &[u8]) -> Option<usize> {
        let score = self.score(member)?;
        let below = self
            .scores
            .iter()
            .filter(|&(m, &s)| s.total_cmp(&score).then_with(|| m[..].cmp(member)) == Ordering::Less)
            .count();
        Some(below)
    }

    /// Iterates members with their scores, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, f64)> {
        self.scores.iter().map(|(m, s)| (m, *s))
    }
}

fn compare(a: &(&Bytes, f64), b: &(&Bytes, f64)) -> Ordering {
    a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_insert_and_update() {
        let mut set = SortedSet::new();
        assert!(set.insert(Bytes::from("a"), 1.0));
        assert!(!set.insert(Bytes::from("a"), 2.0));
        assert_eq!(set.score(b"a"), Some(2.0));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_ties_break_on_member_name() {
        let mut set = SortedSet::new();
        set.insert(Bytes::from("zeta"), 1.0);
        set.insert(Bytes::from("alpha"), 1.0);
        set.insert(Bytes::from("mid"), 0.5);

        let order: Vec<&[u8]> = set.ordered().into_iter().map(|(m, _)| m.as_ref()).collect();
        assert_eq!(order, vec![&b"mid"[..], b"alpha", b"zeta"]);
        assert_eq!(set.rank(b"alpha"), Some(1));
        assert_eq!(set.rank(b"zeta"), Some(2));
        assert_eq!(set.rank(b"missing"), None);
    }

    #[test]
    fn test_remove() {
        let mut set = SortedSet::new();
        set.insert(Bytes::from("a"), 1.0);
        assert!(set.remove(b"a"));
        assert!(!set.remove(b"a"));
        assert!(set.is_empty());
    }

    proptest! {
        #[test]
        fn prop_rank_matches_position(
            entries in proptest::collection::btree_map("[a-e]{1,3}", -5i32..5, 0..40)
        ) {
            let entries: BTreeMap<String, i32> = entries;
            let mut set = SortedSet::new();
            for (member, score) in &entries {
                set.insert(Bytes::from(member.clone()), *score as f64);
            }

            for (i, (member, _)) in set.ordered().into_iter().enumerate() {
                prop_assert_eq!(set.rank(member), Some(i));
            }
        }
    }
}
