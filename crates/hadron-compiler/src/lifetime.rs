//! Per-value live intervals with usages, plus the `LifetimeInterval`
//! primitives worth testing independently of the analysis pass that
//! builds them: `add_live_range`, `split_at`, `covers`,
//! `find_first_intersection`.
//!
//! Grounded on Wimmer & Franz, "Linear Scan Register Allocation on SSA
//! Form" — iterate blocks in reverse of the serialized order, tracking
//! a `live` set of values threading backward from each block's
//! successors.

use crate::error::InternalError;
use crate::hir::serializer::{LinearBlock, LiveRange};
use crate::hir::{BlockId, HirOp, ValueId};
use std::collections::{BTreeSet, HashMap, HashSet};

/// `{ranges (sorted, non-overlapping), usages (sorted set), value-id,
/// register-id (once assigned), is-spill, spill-slot}`.
/// Also doubles as the representation for the serializer's pre-seeded
/// physical-register reservations, in which case `value_id` is
/// `ValueId::INVALID` and `register_id` is set from construction.
#[derive(Debug, Clone, PartialEq)]
pub struct LifetimeInterval {
    pub value_id: ValueId,
    pub ranges: Vec<LiveRange>,
    pub usages: BTreeSet<u32>,
    pub register_id: Option<u32>,
    pub is_spill: bool,
    pub spill_slot: Option<u32>,
}

impl LifetimeInterval {
    pub fn for_value(value_id: ValueId) -> LifetimeInterval {
        LifetimeInterval {
            value_id,
            ranges: Vec::new(),
            usages: BTreeSet::new(),
            register_id: None,
            is_spill: false,
            spill_slot: None,
        }
    }

    pub fn for_register(register: u32) -> LifetimeInterval {
        let mut interval = LifetimeInterval::for_value(ValueId::INVALID);
        interval.register_id = Some(register);
        interval
    }

    /// Inserts `[from, to)`, merging with any overlapping or adjacent
    /// existing range. The result depends only on the union of ranges
    /// ever inserted, not on insertion order: re-sorting and re-merging
    /// the full set on every insert makes that property hold trivially
    /// rather than as an invariant we'd otherwise have to maintain
    /// incrementally.
    pub fn add_live_range(&mut self, from: u32, to: u32) {
        self.ranges.push(LiveRange::new(from, to));
        self.ranges.sort_by_key(|r| r.from);
        let mut merged: Vec<LiveRange> = Vec::with_capacity(self.ranges.len());
        for r in self.ranges.drain(..) {
            match merged.last_mut() {
                Some(last) if last.to >= r.from => last.to = last.to.max(r.to),
                _ => merged.push(r),
            }
        }
        self.ranges = merged;
    }

    pub fn add_usage(&mut self, index: u32) {
        self.usages.insert(index);
    }

    pub fn covers(&self, pos: u32) -> bool {
        self.ranges.iter().any(|r| r.contains(pos))
    }

    /// Smallest position that lies in a range of both `self` and
    /// `other`, found by a merge-scan over the two sorted,
    /// non-overlapping range lists.
    pub fn find_first_intersection(&self, other: &LifetimeInterval) -> Option<u32> {
        let (mut i, mut j) = (0usize, 0usize);
        while i < self.ranges.len() && j < other.ranges.len() {
            let a = self.ranges[i];
            let b = other.ranges[j];
            let lo = a.from.max(b.from);
            let hi = a.to.min(b.to);
            if lo < hi {
                return Some(lo);
            }
            if a.to <= b.to {
                i += 1;
            } else {
                j += 1;
            }
        }
        None
    }

    /// Splits this interval at `pos`: `self` keeps ranges strictly
    /// before `pos` (a range straddling `pos` is truncated to end
    /// exactly there), and the returned interval holds everything from
    /// `pos` onward (a straddling range begins exactly there).
    /// Usages partition the same way. Carries the parent's `value_id`
    /// forward; register/spill assignment is left to the caller.
    pub fn split_at(&mut self, pos: u32) -> LifetimeInterval {
        let mut kept = Vec::new();
        let mut moved = Vec::new();
        for r in &self.ranges {
            if r.to <= pos {
                kept.push(*r);
            } else if r.from >= pos {
                moved.push(*r);
            } else {
                kept.push(LiveRange::new(r.from, pos));
                moved.push(LiveRange::new(pos, r.to));
            }
        }
        let moved_usages: BTreeSet<u32> = self.usages.range(pos..).copied().collect();
        self.usages.retain(|u| *u < pos);
        self.ranges = kept;

        let mut tail = LifetimeInterval::for_value(self.value_id);
        tail.ranges = moved;
        tail.usages = moved_usages;
        tail
    }

    /// Inverse of `split_at`: folds `other`'s ranges and usages back
    /// in. `split_at(p).merge()` must restore the original interval for
    /// every `p >= start`.
    pub fn merge(mut self, other: LifetimeInterval) -> LifetimeInterval {
        for r in other.ranges {
            self.add_live_range(r.from, r.to);
        }
        for u in other.usages {
            self.usages.insert(u);
        }
        self
    }

    pub fn start(&self) -> Option<u32> {
        self.ranges.first().map(|r| r.from)
    }

    pub fn end(&self) -> Option<u32> {
        self.ranges.last().map(|r| r.to)
    }

    pub fn first_usage_at_or_after(&self, pos: u32) -> Option<u32> {
        self.usages.range(pos..).next().copied()
    }

    /// Narrows the earliest range to begin exactly at `idx` — called
    /// when the analyzer walks backward onto a value's defining
    /// instruction, shortening its current range to start there.
    fn narrow_start(&mut self, idx: u32) {
        match self.ranges.first_mut() {
            Some(first) => first.from = idx,
            None => self.ranges.push(LiveRange::new(idx, idx + 1)),
        }
    }
}

/// Computes live intervals for every SSA value in `linear`, mutating
/// its `value_lifetimes` map in place.
pub fn analyze(linear: &mut LinearBlock) -> Result<(), InternalError> {
    let position_in_order: HashMap<BlockId, usize> =
        linear.block_order.iter().enumerate().map(|(i, b)| (*b, i)).collect();
    let mut live_in: HashMap<BlockId, HashSet<ValueId>> = HashMap::new();

    for &block_id in linear.block_order.clone().iter().rev() {
        let (first, last) = linear.block_ranges[&block_id];
        let (predecessors, successors) = label_edges(linear, first)?;

        let mut live: HashSet<ValueId> = HashSet::new();
        for &succ in &successors {
            if let Some(succ_live_in) = live_in.get(&succ) {
                live.extend(succ_live_in.iter().copied());
            }
            let (succ_first, succ_last) = linear.block_ranges[&succ];
            let (succ_preds, _) = label_edges(linear, succ_first)?;
            if let Some(pos) = succ_preds.iter().position(|p| *p == block_id) {
                for idx in (succ_first + 1)..=succ_last {
                    if let HirOp::Phi { inputs } = &linear.instructions[idx].op {
                        if let Some(&input) = inputs.get(pos) {
                            if input.is_valid() {
                                live.insert(input);
                            }
                        }
                    }
                }
            }
        }

        for &v in &live {
            lifetime_of(linear, v).add_live_range(first as u32, last as u32 + 1);
        }

        for idx in (first..=last).rev() {
            let output = linear.instructions[idx].value;
            let reads = linear.instructions[idx].op.reads();
            if output.is_valid() {
                lifetime_of(linear, output.id).narrow_start(idx as u32);
                lifetime_of(linear, output.id).add_usage(idx as u32);
                live.remove(&output.id);
            }
            for u in reads {
                if !u.is_valid() {
                    continue;
                }
                live.insert(u);
                let interval = lifetime_of(linear, u);
                interval.add_live_range(first as u32, idx as u32 + 1);
                interval.add_usage(idx as u32);
            }
        }

        if let Some(tail_pos) = predecessors
            .iter()
            .filter_map(|p| position_in_order.get(p).copied())
            .filter(|&p| p > position_in_order[&block_id])
            .max()
        {
            let tail_block = linear.block_order[tail_pos];
            let tail_last = linear.block_ranges[&tail_block].1;
            for &v in &live {
                lifetime_of(linear, v).add_live_range(first as u32, tail_last as u32 + 1);
            }
        }

        live_in.insert(block_id, live);
    }

    Ok(())
}

fn label_edges(linear: &LinearBlock, label_index: usize) -> Result<(Vec<BlockId>, Vec<BlockId>), InternalError> {
    match &linear.instructions[label_index].op {
        HirOp::Label { predecessors, successors } => Ok((predecessors.clone(), successors.clone())),
        other => Err(InternalError::new(format!(
            "expected a label HIR at index {label_index}, found {other:?}"
        ))),
    }
}

/// Returns the single in-progress interval for `value`, creating it on
/// first touch. Before register allocation splits intervals, each
/// value has exactly one fragment; allocation is what turns this into
/// a real list.
fn lifetime_of(linear: &mut LinearBlock, value: ValueId) -> &mut LifetimeInterval {
    let list = linear.value_lifetimes.entry(value).or_insert_with(|| vec![LifetimeInterval::for_value(value)]);
    &mut list[0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{builder, serializer};
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn analyze_source(src: &str) -> LinearBlock {
        let tokens = Lexer::new(src).tokenize().unwrap();
        let root = Parser::new(tokens).parse().unwrap();
        let frame = builder::build(&root).unwrap();
        let mut linear = serializer::serialize(&frame, 8).unwrap();
        analyze(&mut linear).unwrap();
        linear
    }

    #[test]
    fn add_live_range_is_idempotent_on_contained_subrange() {
        let mut interval = LifetimeInterval::for_value(ValueId(0));
        interval.add_live_range(0, 10);
        interval.add_live_range(2, 4);
        assert_eq!(interval.ranges, vec![LiveRange::new(0, 10)]);
    }

    #[test]
    fn add_live_range_is_commutative() {
        let mut a = LifetimeInterval::for_value(ValueId(0));
        a.add_live_range(4, 8);
        a.add_live_range(0, 4);
        a.add_live_range(10, 12);

        let mut b = LifetimeInterval::for_value(ValueId(0));
        b.add_live_range(10, 12);
        b.add_live_range(0, 4);
        b.add_live_range(4, 8);

        assert_eq!(a.ranges, b.ranges);
    }

    #[test]
    fn split_at_then_merge_restores_original() {
        let mut original = LifetimeInterval::for_value(ValueId(0));
        original.add_live_range(0, 20);
        original.add_usage(2);
        original.add_usage(15);
        let before = original.clone();

        for pos in 0..=20 {
            let mut copy = before.clone();
            let tail = copy.split_at(pos);
            let restored = copy.merge(tail);
            assert_eq!(restored, before, "split at {pos} did not round-trip");
        }
    }

    #[test]
    fn covers_reports_membership_in_any_range() {
        let mut interval = LifetimeInterval::for_value(ValueId(0));
        interval.add_live_range(0, 4);
        interval.add_live_range(10, 14);
        assert!(interval.covers(0));
        assert!(interval.covers(12));
        assert!(!interval.covers(4));
        assert!(!interval.covers(8));
    }

    #[test]
    fn find_first_intersection_finds_smallest_shared_position() {
        let mut a = LifetimeInterval::for_value(ValueId(0));
        a.add_live_range(0, 4);
        a.add_live_range(8, 12);
        let mut b = LifetimeInterval::for_value(ValueId(1));
        b.add_live_range(2, 10);
        assert_eq!(a.find_first_intersection(&b), Some(2));
    }

    #[test]
    fn find_first_intersection_none_when_disjoint() {
        let mut a = LifetimeInterval::for_value(ValueId(0));
        a.add_live_range(0, 4);
        let mut b = LifetimeInterval::for_value(ValueId(1));
        b.add_live_range(4, 8);
        assert_eq!(a.find_first_intersection(&b), None);
    }

    #[test]
    fn every_usage_lies_within_some_range() {
        let linear = analyze_source("var x = 3; x + x");
        for fragments in linear.value_lifetimes.values() {
            for interval in fragments {
                for &usage in &interval.usages {
                    assert!(interval.covers(usage), "usage {usage} not covered by {interval:?}");
                }
            }
        }
    }

    #[test]
    fn loop_variable_lifetime_spans_the_whole_loop() {
        let linear = analyze_source("var i = 0; while {i < 10} {i = i + 1}");
        let spans_multiple_blocks = linear.value_lifetimes.values().flatten().any(|interval| {
            match (interval.start(), interval.end()) {
                (Some(start), Some(end)) if end > start + 1 => {
                    linear.block_of(start as usize) != linear.block_of((end - 1) as usize)
                }
                _ => false,
            }
        });
        assert!(spans_multiple_blocks, "expected a value live across more than one block");
    }
}
