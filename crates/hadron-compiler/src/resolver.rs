//! Inserts moves for phi resolution and interval splits.
//!
//! Two kinds of moves are produced: (a) a move for every value whose
//! register allocator-assigned location changes across a split point
//! in the middle of a block, and (b) a parallel-move schedule at every
//! control-flow edge reconciling phi inputs and any value whose
//! location differs between the end of the predecessor and the start
//! of the successor. Both land in the reserved `Hir::Nil` slots the
//! `BlockSerializer` left between every real instruction.

use crate::error::InternalError;
use crate::hir::serializer::LinearBlock;
use crate::hir::{BlockId, HirOp, Location, ValueId};
use std::collections::{HashMap, HashSet};

pub fn resolve(linear: &mut LinearBlock) -> Result<(), InternalError> {
    insert_split_moves(linear)?;
    insert_edge_moves(linear)?;
    Ok(())
}

/// (a): a value split mid-block gets a move at the reserved nil slot
/// immediately before the split point, provided the split doesn't
/// coincide with a block boundary (that case is a control-flow edge
/// and is handled by `insert_edge_moves` instead, where the source
/// depends on *which* predecessor was taken).
fn insert_split_moves(linear: &mut LinearBlock) -> Result<(), InternalError> {
    let mut moves_by_slot: HashMap<usize, Vec<(Location, Location)>> = HashMap::new();

    for fragments in linear.value_lifetimes.values() {
        let mut sorted: Vec<_> = fragments.iter().collect();
        sorted.sort_by_key(|iv| iv.start().unwrap_or(0));
        for pair in sorted.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let (Some(a_end), Some(b_start)) = (a.end(), b.start()) else { continue };
            if a_end != b_start {
                continue;
            }
            let split_pos = b_start as usize;
            if split_pos == 0 || split_pos >= linear.instructions.len() {
                continue;
            }
            if matches!(linear.instructions[split_pos].op, HirOp::Label { .. }) {
                continue; // a control-flow edge, not a mid-block split
            }
            let (a_loc, b_loc) = (location_of(a), location_of(b));
            if let (Some(a_loc), Some(b_loc)) = (a_loc, b_loc) {
                if a_loc != b_loc {
                    moves_by_slot.entry(split_pos - 1).or_default().push((a_loc, b_loc));
                }
            }
        }
    }

    for (slot, moves) in moves_by_slot {
        for (src, dst) in schedule_moves(moves) {
            linear.instructions[slot].add_move(src, dst);
        }
    }
    Ok(())
}

/// (b): for every `pred -> succ` edge, reconciles phi inputs and any
/// value live at `succ`'s start whose location differs from its
/// location at `pred`'s end.
fn insert_edge_moves(linear: &mut LinearBlock) -> Result<(), InternalError> {
    let block_order = linear.block_order.clone();
    let mut moves_by_slot: HashMap<usize, Vec<(Location, Location)>> = HashMap::new();

    for &succ in &block_order {
        let (succ_first, _succ_last) = linear.block_ranges[&succ];
        let (predecessors, _) = label_edges(linear, succ_first)?;
        let phi_defs = phi_definitions(linear, succ)?;
        let live_at_succ_start = values_live_at(linear, succ_first as u32);

        for (pos_in_preds, &pred) in predecessors.iter().enumerate() {
            let (pred_first, pred_last) = linear.block_ranges[&pred];
            let (_, pred_successors) = label_edges(linear, pred_first)?;

            let mut edge_moves = Vec::new();
            for &value in &live_at_succ_start {
                let source_value = phi_defs.get(&value).and_then(|inputs| inputs.get(pos_in_preds)).copied().unwrap_or(value);
                let Some(source_loc) = location_at(linear, source_value, pred_last as u32) else { continue };
                let Some(dest_loc) = location_at(linear, value, succ_first as u32) else { continue };
                if source_loc != dest_loc {
                    edge_moves.push((source_loc, dest_loc));
                }
            }
            if edge_moves.is_empty() {
                continue;
            }

            let slot = if pred_successors.len() == 1 {
                pred_last
            } else if predecessors.len() == 1 {
                succ_first + 1
            } else {
                return Err(InternalError::new(format!(
                    "critical edge block {} -> block {}: CFG construction must split critical edges before resolution",
                    pred.0, succ.0
                )));
            };
            moves_by_slot.entry(slot).or_default().extend(edge_moves);
        }
    }

    for (slot, moves) in moves_by_slot {
        for (src, dst) in schedule_moves(moves) {
            linear.instructions[slot].add_move(src, dst);
        }
    }
    Ok(())
}

fn location_of(interval: &crate::lifetime::LifetimeInterval) -> Option<Location> {
    if interval.is_spill {
        Some(Location::Spill(interval.spill_slot.unwrap_or(0)))
    } else {
        interval.register_id.map(Location::Register)
    }
}

fn location_at(linear: &LinearBlock, value: ValueId, index: u32) -> Option<Location> {
    linear.value_lifetimes.get(&value)?.iter().find(|iv| iv.covers(index)).and_then(location_of)
}

fn values_live_at(linear: &LinearBlock, index: u32) -> Vec<ValueId> {
    linear
        .value_lifetimes
        .iter()
        .filter(|(_, fragments)| fragments.iter().any(|iv| iv.covers(index)))
        .map(|(v, _)| *v)
        .collect()
}

fn phi_definitions(linear: &LinearBlock, block: BlockId) -> Result<HashMap<ValueId, Vec<ValueId>>, InternalError> {
    let (first, last) = linear.block_ranges[&block];
    let mut defs = HashMap::new();
    for idx in first..=last {
        if let HirOp::Phi { inputs } = &linear.instructions[idx].op {
            defs.insert(linear.instructions[idx].value.id, inputs.clone());
        }
    }
    Ok(defs)
}

fn label_edges(linear: &LinearBlock, label_index: usize) -> Result<(Vec<BlockId>, Vec<BlockId>), InternalError> {
    match &linear.instructions[label_index].op {
        HirOp::Label { predecessors, successors } => Ok((predecessors.clone(), successors.clone())),
        other => Err(InternalError::new(format!(
            "expected a label HIR at index {label_index}, found {other:?}"
        ))),
    }
}

/// Orders a parallel move set into a sequence of serial moves,
/// breaking cycles through spill slot 0 as scratch. Moves whose
/// destination is nobody else's source are safe leaves and emit first;
/// once only cycles remain, one edge of the cycle is rerouted through
/// the scratch slot to break it.
fn schedule_moves(mut pending: Vec<(Location, Location)>) -> Vec<(Location, Location)> {
    let mut scheduled = Vec::new();
    while !pending.is_empty() {
        let sources: HashSet<Location> = pending.iter().map(|&(s, _)| s).collect();
        let (safe, rest): (Vec<_>, Vec<_>) = pending.into_iter().partition(|(_, d)| !sources.contains(d));
        if !safe.is_empty() {
            scheduled.extend(safe);
            pending = rest;
            continue;
        }
        let mut rest = rest;
        match rest.pop() {
            Some((src, dst)) => {
                scheduled.push((src, Location::Spill(0)));
                scheduled.push((Location::Spill(0), dst));
                pending = rest;
            }
            None => break,
        }
    }
    scheduled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{builder, serializer};
    use crate::lexer::Lexer;
    use crate::lifetime;
    use crate::parser::Parser;
    use crate::regalloc;

    fn resolve_source(src: &str, num_registers: u32) -> LinearBlock {
        let tokens = Lexer::new(src).tokenize().unwrap();
        let root = Parser::new(tokens).parse().unwrap();
        let frame = builder::build(&root).unwrap();
        let mut linear = serializer::serialize(&frame, num_registers).unwrap();
        lifetime::analyze(&mut linear).unwrap();
        regalloc::allocate(&mut linear, num_registers).unwrap();
        resolve(&mut linear).unwrap();
        linear
    }

    #[test]
    fn if_with_both_branches_reconciles_phi_with_moves() {
        let linear = resolve_source("var a = true; if (a) {1} {2}", 4);
        let any_moves = linear.instructions.iter().any(|hir| !hir.moves.is_empty());
        assert!(any_moves, "expected at least one resolved move across the if/else join");
    }

    #[test]
    fn schedule_moves_breaks_a_two_cycle() {
        let moves = vec![
            (Location::Register(0), Location::Register(1)),
            (Location::Register(1), Location::Register(0)),
        ];
        let scheduled = schedule_moves(moves);
        // every destination in the schedule is reachable and the cycle
        // is broken via the scratch spill slot.
        assert!(scheduled.iter().any(|(_, d)| *d == Location::Spill(0)));
        assert!(scheduled.iter().any(|(s, _)| *s == Location::Spill(0)));
    }

    #[test]
    fn schedule_moves_emits_safe_leaves_before_cycles() {
        let moves = vec![
            (Location::Register(2), Location::Register(3)), // safe leaf
            (Location::Register(0), Location::Register(1)),
            (Location::Register(1), Location::Register(0)),
        ];
        let scheduled = schedule_moves(moves);
        let leaf_pos = scheduled.iter().position(|m| *m == (Location::Register(2), Location::Register(3))).unwrap();
        let cycle_start = scheduled.iter().position(|(_, d)| *d == Location::Spill(0)).unwrap();
        assert!(leaf_pos < cycle_start);
    }
}
