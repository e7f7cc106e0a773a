//! CFG -> linear instruction list.
//!
//! Flattens a `Frame`'s basic blocks into a single `Vec<Hir>` in
//! reverse postorder, so every loop body is contiguous and every
//! forward jump targets a later index. A sentinel `Hir::nil()` sits at
//! index 0 and one more follows every instruction, reserving slots the
//! `Resolver` later overwrites with phi-resolution and split-interval
//! moves without having to shift the whole list.

use crate::error::InternalError;
use crate::hir::{BlockId, Frame, Hir, HirOp, ValueId};
use std::collections::HashMap;

/// A half-open instruction-index range `[from, to)` a value stays live over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LiveRange {
    pub from: u32,
    pub to: u32,
}

impl LiveRange {
    pub fn new(from: u32, to: u32) -> LiveRange {
        LiveRange { from, to }
    }

    pub fn contains(&self, pos: u32) -> bool {
        pos >= self.from && pos < self.to
    }

    /// Ranges that overlap or merely touch end-to-end are considered
    /// mergeable — no two adjacent ranges in a merged set should touch
    /// or overlap.
    fn mergeable_with(&self, other: &LiveRange) -> bool {
        self.from <= other.to && other.from <= self.to
    }

    fn union(&self, other: &LiveRange) -> LiveRange {
        LiveRange::new(self.from.min(other.from), self.to.max(other.to))
    }
}

/// The flattened, linearized form of a `Frame`. `value_lifetimes` and
/// `register_lifetimes` start out populated only with the serializer's
/// own pre-seeding (forced caller-saves around dispatch calls); the
/// `LifetimeAnalyzer` fills in the rest in place.
#[derive(Debug, Clone)]
pub struct LinearBlock {
    pub instructions: Vec<Hir>,
    /// Reverse postorder of block numbers.
    pub block_order: Vec<BlockId>,
    /// Block number -> `[first, last]` instruction index, inclusive.
    pub block_ranges: HashMap<BlockId, (usize, usize)>,
    /// Every value's lifetime fragments, whichever location (register or
    /// spill) the allocator finally gave them — the map the resolver and
    /// emitter consult to find a value's location at a given index.
    pub value_lifetimes: HashMap<ValueId, Vec<crate::lifetime::LifetimeInterval>>,
    pub register_lifetimes: HashMap<u32, Vec<crate::lifetime::LifetimeInterval>>,
    /// A secondary, slot-keyed index over the spilled subset of
    /// `value_lifetimes`, populated by the `RegisterAllocator` as it
    /// spills and later recycles slots.
    pub spill_lifetimes: HashMap<u32, Vec<crate::lifetime::LifetimeInterval>>,
    /// Spill slot 0 is reserved for cycle-breaking scratch;
    /// `RegisterAllocator` grows this as it allocates more.
    pub number_of_spill_slots: u32,
}

impl LinearBlock {
    pub fn block_of(&self, index: usize) -> Option<BlockId> {
        self.block_ranges
            .iter()
            .find(|(_, (first, last))| index >= *first && index <= *last)
            .map(|(b, _)| *b)
    }
}

/// Flattens `frame` into reverse postorder and pre-seeds physical
/// register lifetimes around every dispatch-call instruction so the
/// allocator naturally avoids assigning a caller-saved value across a
/// call.
pub fn serialize(frame: &Frame, num_physical_registers: u32) -> Result<LinearBlock, InternalError> {
    frame.check_invariants()?;

    let block_order = reverse_postorder(frame);
    if block_order.len() != frame.blocks.len() {
        return Err(InternalError::new(format!(
            "reverse postorder visited {} of {} blocks: frame has unreachable blocks",
            block_order.len(),
            frame.blocks.len()
        )));
    }

    let mut instructions = vec![Hir::nil()];
    let mut block_ranges = HashMap::new();

    for &block_id in &block_order {
        let block = frame.block(block_id);
        let first = instructions.len();
        instructions.push(Hir::side_effect_only(HirOp::Label {
            predecessors: block.predecessors.clone(),
            successors: block.successors.clone(),
        }));
        instructions.push(Hir::nil());
        for stmt in &block.statements {
            instructions.push(stmt.clone());
            instructions.push(Hir::nil());
        }
        let last = instructions.len() - 1;
        block_ranges.insert(block_id, (first, last));
    }

    let mut register_lifetimes: HashMap<u32, Vec<crate::lifetime::LifetimeInterval>> = (0..num_physical_registers)
        .map(|r| (r, vec![crate::lifetime::LifetimeInterval::for_register(r)]))
        .collect();

    for (index, hir) in instructions.iter().enumerate() {
        if let HirOp::DispatchCall { .. } = &hir.op {
            for reg in 0..num_physical_registers {
                let interval = &mut register_lifetimes.get_mut(&reg).expect("pre-seeded above")[0];
                interval.add_live_range(index as u32, index as u32 + 1);
                interval.add_usage(index as u32);
            }
        }
    }

    Ok(LinearBlock {
        instructions,
        block_order,
        block_ranges,
        value_lifetimes: HashMap::new(),
        register_lifetimes,
        spill_lifetimes: HashMap::new(),
        number_of_spill_slots: 1,
    })
}

/// Reverse postorder of reachable blocks from block 0, computed with a
/// depth-first postorder traversal over successors and then reversed —
/// the traversal order the lifetime analyzer and register allocator
/// both require of a forward data-flow pass.
fn reverse_postorder(frame: &Frame) -> Vec<BlockId> {
    let mut visited = vec![false; frame.blocks.len()];
    let mut postorder = Vec::with_capacity(frame.blocks.len());
    visit(frame, BlockId(0), &mut visited, &mut postorder);
    postorder.reverse();
    postorder
}

fn visit(frame: &Frame, id: BlockId, visited: &mut [bool], postorder: &mut Vec<BlockId>) {
    if visited[id.0 as usize] {
        return;
    }
    visited[id.0 as usize] = true;
    for &succ in &frame.block(id).successors {
        visit(frame, succ, visited, postorder);
    }
    postorder.push(id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::builder;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn serialize_source(src: &str, num_registers: u32) -> LinearBlock {
        let tokens = Lexer::new(src).tokenize().unwrap();
        let root = Parser::new(tokens).parse().unwrap();
        let frame = builder::build(&root).unwrap();
        serialize(&frame, num_registers).unwrap()
    }

    #[test]
    fn nil_serializes_with_leading_sentinel_and_label() {
        let linear = serialize_source("nil", 8);
        assert!(matches!(linear.instructions[0].op, HirOp::Nil));
        assert!(matches!(linear.instructions[1].op, HirOp::Label { .. }));
        assert!(linear.instructions.len() >= 3);
    }

    #[test]
    fn block_ranges_start_with_a_label() {
        let linear = serialize_source("var x = 3; x + x", 8);
        for (block, (first, _last)) in &linear.block_ranges {
            assert!(matches!(linear.instructions[*first].op, HirOp::Label { .. }), "block {block:?}");
        }
    }

    #[test]
    fn dispatch_call_pre_seeds_all_physical_registers() {
        let linear = serialize_source("var x = 3; x + x", 4);
        assert_eq!(linear.register_lifetimes.len(), 4);
        let any_nonempty = linear.register_lifetimes.values().any(|list| !list[0].ranges.is_empty());
        assert!(any_nonempty);
    }

    #[test]
    fn live_range_merges_adjacent_ranges() {
        let a = LiveRange::new(0, 4);
        let b = LiveRange::new(4, 8);
        assert!(a.mergeable_with(&b));
        assert_eq!(a.union(&b), LiveRange::new(0, 8));
    }
}
