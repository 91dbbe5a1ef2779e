//! Sorted trove registry: one doubly linked, rank-ordered list per
//! collateral token.
//!
//! Nodes live in an arena keyed by the stable `TroveId`, never by position,
//! so removal and re-insertion cannot alias. Walking `head` -> `tail` yields
//! non-decreasing rank, where the rank of a trove is its
//! collateral-per-debt key supplied by the caller (price-invariant within a
//! token, so price moves alone never require a re-sort).
//!
//! Insertion starts from a caller-supplied hint and walks to the true
//! position. A wrong-but-live hint only costs extra hops; a dead hint is
//! rejected with `InvalidReference` before anything is unlinked, so a failed
//! call leaves the list untouched.

use crate::{ProtocolError, TroveId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Node {
    prev: Option<TroveId>,
    next: Option<TroveId>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortedTroves {
    head: Option<TroveId>,
    tail: Option<TroveId>,
    nodes: BTreeMap<TroveId, Node>,
}

impl SortedTroves {
    pub fn new() -> Self {
        Self::default()
    }

    /// Weakest trove (lowest rank).
    pub fn first(&self) -> Option<TroveId> {
        self.head
    }

    /// Strongest trove (highest rank).
    pub fn last(&self) -> Option<TroveId> {
        self.tail
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: TroveId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn next(&self, id: TroveId) -> Option<TroveId> {
        self.nodes.get(&id).and_then(|n| n.next)
    }

    pub fn prev(&self, id: TroveId) -> Option<TroveId> {
        self.nodes.get(&id).and_then(|n| n.prev)
    }

    /// Walk from the weakest to the strongest trove.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }

    /// Insert `id` at its ordered position, walking from `hint` (a live
    /// member) or from the head when the sentinel is given.
    pub fn insert<F>(&mut self, id: TroveId, hint: Option<TroveId>, rank: F) -> Result<(), ProtocolError>
    where
        F: Fn(TroveId) -> Decimal,
    {
        if self.contains(id) {
            return Err(ProtocolError::DuplicateInsert);
        }
        if let Some(h) = hint {
            if !self.contains(h) {
                return Err(ProtocolError::InvalidReference);
            }
        }

        let key = rank(id);

        // Back up from the hint past any member that outranks the new key.
        let mut pred = hint;
        while let Some(p) = pred {
            if rank(p) <= key {
                break;
            }
            pred = self.nodes[&p].prev;
        }
        // Advance while the successor candidate still ranks at or below the
        // new key; equal keys keep insertion order.
        loop {
            let candidate = match pred {
                Some(p) => self.nodes[&p].next,
                None => self.head,
            };
            match candidate {
                Some(c) if rank(c) <= key => pred = Some(c),
                _ => break,
            }
        }

        let succ = match pred {
            Some(p) => self.nodes[&p].next,
            None => self.head,
        };
        self.nodes.insert(id, Node { prev: pred, next: succ });
        match pred {
            Some(p) => self.nodes.get_mut(&p).expect("linked pred").next = Some(id),
            None => self.head = Some(id),
        }
        match succ {
            Some(s) => self.nodes.get_mut(&s).expect("linked succ").prev = Some(id),
            None => self.tail = Some(id),
        }
        Ok(())
    }

    pub fn remove(&mut self, id: TroveId) -> Result<(), ProtocolError> {
        let node = self.nodes.remove(&id).ok_or(ProtocolError::InvalidReference)?;
        match node.prev {
            Some(p) => self.nodes.get_mut(&p).expect("linked prev").next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(n) => self.nodes.get_mut(&n).expect("linked next").prev = node.prev,
            None => self.tail = node.prev,
        }
        Ok(())
    }

    /// Re-sort a member after its collateral or debt changed.
    pub fn reinsert<F>(&mut self, id: TroveId, hint: Option<TroveId>, rank: F) -> Result<(), ProtocolError>
    where
        F: Fn(TroveId) -> Decimal,
    {
        if !self.contains(id) {
            return Err(ProtocolError::InvalidReference);
        }
        // The hint may not be the element itself once it is unlinked.
        let hint = match hint {
            Some(h) if h == id => self.nodes[&id].prev,
            other => other,
        };
        if let Some(h) = hint {
            if !self.contains(h) {
                return Err(ProtocolError::InvalidReference);
            }
        }
        self.remove(id)?;
        // The hint could have been adjacent to `id`; it is still a live
        // member after removal, so this cannot fail.
        self.insert(id, hint, rank)
    }
}

pub struct Iter<'a> {
    list: &'a SortedTroves,
    cursor: Option<TroveId>,
}

impl Iterator for Iter<'_> {
    type Item = TroveId;

    fn next(&mut self) -> Option<TroveId> {
        let id = self.cursor?;
        self.cursor = self.list.next(id);
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal::prelude::FromPrimitive;

    fn by_id(id: TroveId) -> Decimal {
        Decimal::from_u64(id).unwrap()
    }

    fn collect(list: &SortedTroves) -> Vec<TroveId> {
        list.iter().collect()
    }

    #[test]
    fn empty_list_has_sentinel_ends() {
        let list = SortedTroves::new();
        assert_eq!(list.first(), None);
        assert_eq!(list.last(), None);
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn single_element_is_head_and_tail() {
        let mut list = SortedTroves::new();
        list.insert(7, None, by_id).unwrap();
        assert_eq!(list.first(), Some(7));
        assert_eq!(list.last(), Some(7));
        assert_eq!(list.prev(7), None);
        assert_eq!(list.next(7), None);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut list = SortedTroves::new();
        list.insert(7, None, by_id).unwrap();
        assert_matches!(list.insert(7, None, by_id), Err(ProtocolError::DuplicateInsert));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn dead_hint_is_rejected_without_mutation() {
        let mut list = SortedTroves::new();
        list.insert(1, None, by_id).unwrap();
        assert_matches!(list.insert(2, Some(99), by_id), Err(ProtocolError::InvalidReference));
        assert_eq!(collect(&list), vec![1]);
    }

    #[test]
    fn removing_the_only_element_resets_the_sentinels() {
        let mut list = SortedTroves::new();
        list.insert(3, None, by_id).unwrap();
        list.remove(3).unwrap();
        assert_eq!(list.first(), None);
        assert_eq!(list.last(), None);
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn removing_a_non_member_fails() {
        let mut list = SortedTroves::new();
        list.insert(3, None, by_id).unwrap();
        assert_matches!(list.remove(4), Err(ProtocolError::InvalidReference));
    }

    #[test]
    fn inserts_stay_sorted_regardless_of_arrival_order() {
        let mut list = SortedTroves::new();
        for id in [5, 1, 9, 3, 7, 2, 8, 4, 6] {
            list.insert(id, None, by_id).unwrap();
        }
        assert_eq!(collect(&list), vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(list.first(), Some(1));
        assert_eq!(list.last(), Some(9));
    }

    #[test]
    fn wrong_hints_degrade_cost_not_correctness() {
        let mut list = SortedTroves::new();
        list.insert(10, None, by_id).unwrap();
        list.insert(30, Some(10), by_id).unwrap();
        // hint far above the true position
        list.insert(20, Some(30), by_id).unwrap();
        // hint far below the true position
        list.insert(25, Some(10), by_id).unwrap();
        assert_eq!(collect(&list), vec![10, 20, 25, 30]);
    }

    #[test]
    fn removes_interior_elements_and_relinks() {
        let mut list = SortedTroves::new();
        for id in 0..10 {
            list.insert(id, None, by_id).unwrap();
        }
        for id in [8, 6, 4, 2, 0] {
            list.remove(id).unwrap();
        }
        assert_eq!(collect(&list), vec![1, 3, 5, 7, 9]);
        assert_eq!(list.prev(1), None);
        assert_eq!(list.next(9), None);
    }

    #[test]
    fn reinsert_moves_an_element_to_its_new_rank() {
        let mut list = SortedTroves::new();
        let ranks = std::cell::RefCell::new(BTreeMap::from([(1u64, 10i64), (2, 20), (3, 30)]));
        let rank = |id: TroveId| Decimal::from_i64(ranks.borrow()[&id]).unwrap();
        for id in [1, 2, 3] {
            list.insert(id, None, rank).unwrap();
        }
        ranks.borrow_mut().insert(1, 25);
        list.reinsert(1, Some(1), rank).unwrap();
        assert_eq!(collect(&list), vec![2, 1, 3]);
    }

    #[test]
    fn equal_ranks_preserve_insertion_order() {
        let mut list = SortedTroves::new();
        let rank = |_: TroveId| Decimal::ONE;
        for id in [4, 2, 9] {
            list.insert(id, None, rank).unwrap();
        }
        assert_eq!(collect(&list), vec![4, 2, 9]);
    }
}
