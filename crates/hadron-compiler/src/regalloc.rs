//! Live intervals -> register/spill-slot assignment.
//!
//! Linear scan with interval splitting, grounded on Wimmer & Mössenböck,
//! "Optimized Interval Splitting in a Linear Scan Register Allocator".
//! Intervals are processed in start-position order out of an
//! `unhandled` worklist; `active`/`inactive` track where each register
//! currently stands relative to the scan position, and spill slots are
//! recycled through a free list once their occupant's interval ends.

use crate::error::InternalError;
use crate::hir::serializer::LinearBlock;
use crate::hir::ValueId;
use crate::lifetime::LifetimeInterval;
use std::collections::HashMap;

/// Assigns every value's lifetime interval (and the pre-seeded
/// register reservations) a register in `[0, num_registers)` or a
/// spill slot, mutating `linear.value_lifetimes` in place (every
/// fragment, spilled or not, keyed by value) and `linear.spill_lifetimes`
/// alongside it (spilled fragments only, keyed by slot, for slot-centric
/// inspection).
pub fn allocate(linear: &mut LinearBlock, num_registers: u32) -> Result<(), InternalError> {
    if num_registers == 0 {
        return Err(InternalError::new("register allocator requires at least one physical register"));
    }

    let mut state = AllocatorState::new(num_registers, linear.number_of_spill_slots);

    for (_, fragments) in linear.register_lifetimes.iter() {
        for interval in fragments {
            if !interval.ranges.is_empty() {
                let reg = interval.register_id.expect("register-lifetime interval always names its register");
                state.inactive.entry(reg).or_default().push(interval.clone());
            }
        }
    }

    for (_, fragments) in linear.value_lifetimes.drain() {
        for interval in fragments {
            if !interval.ranges.is_empty() {
                state.unhandled.push(interval);
            }
        }
    }

    while let Some(mut current) = state.pop_unhandled() {
        let Some(pos) = current.start() else { continue };

        state.expire_active(pos);
        state.expire_inactive(pos);
        state.recycle_spills(pos);

        if let Some(reg) = state.try_allocate_free_reg(&current) {
            if let Some(end) = current.end() {
                if let Some(free_until) = state.free_until_for(reg, &current) {
                    if end > free_until {
                        let tail = current.split_at(free_until);
                        state.unhandled.push(tail);
                    }
                }
            }
            current.register_id = Some(reg);
            state.active.insert(reg, current);
        } else {
            state.allocate_blocked_reg(current, pos)?;
        }
    }

    state.finish(linear);
    Ok(())
}

struct AllocatorState {
    num_registers: u32,
    unhandled: Vec<LifetimeInterval>,
    active: HashMap<u32, LifetimeInterval>,
    inactive: HashMap<u32, Vec<LifetimeInterval>>,
    active_spills: HashMap<u32, LifetimeInterval>,
    handled: Vec<LifetimeInterval>,
    free_spill_slots: Vec<u32>,
    number_of_spill_slots: u32,
}

impl AllocatorState {
    fn new(num_registers: u32, number_of_spill_slots: u32) -> AllocatorState {
        AllocatorState {
            num_registers,
            unhandled: Vec::new(),
            active: HashMap::new(),
            inactive: HashMap::new(),
            active_spills: HashMap::new(),
            handled: Vec::new(),
            free_spill_slots: Vec::new(),
            number_of_spill_slots,
        }
    }

    fn pop_unhandled(&mut self) -> Option<LifetimeInterval> {
        let (idx, _) = self
            .unhandled
            .iter()
            .enumerate()
            .min_by_key(|(_, iv)| iv.start().unwrap_or(u32::MAX))?;
        Some(self.unhandled.remove(idx))
    }

    fn expire_active(&mut self, pos: u32) {
        let mut moved_to_inactive = Vec::new();
        self.active.retain(|&reg, interval| match interval.end() {
            Some(end) if end <= pos => {
                self.handled.push(interval.clone());
                false
            }
            _ if !interval.covers(pos) => {
                moved_to_inactive.push((reg, interval.clone()));
                false
            }
            _ => true,
        });
        for (reg, interval) in moved_to_inactive {
            self.inactive.entry(reg).or_default().push(interval);
        }
    }

    fn expire_inactive(&mut self, pos: u32) {
        for (&reg, list) in self.inactive.iter_mut() {
            let mut still_inactive = Vec::new();
            for interval in list.drain(..) {
                match interval.end() {
                    Some(end) if end <= pos => self.handled.push(interval),
                    _ if interval.covers(pos) => {
                        self.active.insert(reg, interval);
                    }
                    _ => still_inactive.push(interval),
                }
            }
            *list = still_inactive;
        }
    }

    fn recycle_spills(&mut self, pos: u32) {
        let mut ended = Vec::new();
        self.active_spills.retain(|&slot, interval| match interval.end() {
            Some(end) if end <= pos => {
                ended.push(slot);
                false
            }
            _ => true,
        });
        self.free_spill_slots.extend(ended);
    }

    /// Computes `freeUntil[r]` for every register: `u32::MAX` if
    /// nothing active or inactive conflicts, `0` if a register is
    /// currently active (occupied for the whole remaining scan), or
    /// the first intersection with an inactive (held-in-a-hole)
    /// interval otherwise.
    fn free_until_table(&self, current: &LifetimeInterval) -> Vec<u32> {
        let mut free_until = vec![u32::MAX; self.num_registers as usize];
        for &reg in self.active.keys() {
            free_until[reg as usize] = 0;
        }
        for (&reg, list) in self.inactive.iter() {
            for interval in list {
                if let Some(pos) = current.find_first_intersection(interval) {
                    free_until[reg as usize] = free_until[reg as usize].min(pos);
                }
            }
        }
        free_until
    }

    fn free_until_for(&self, reg: u32, current: &LifetimeInterval) -> Option<u32> {
        self.free_until_table(current).get(reg as usize).copied()
    }

    /// Returns the chosen register if some register is free for at
    /// least part of `current`'s range; `None` (the TryAllocateFreeReg
    /// failure case, `freeUntil == 0` everywhere) falls through to
    /// `allocate_blocked_reg`.
    fn try_allocate_free_reg(&self, current: &LifetimeInterval) -> Option<u32> {
        let free_until = self.free_until_table(current);
        let (best_reg, best_free) = free_until
            .iter()
            .enumerate()
            .max_by_key(|&(_, &v)| v)
            .map(|(i, &v)| (i as u32, v))?;
        if best_free == 0 {
            None
        } else {
            Some(best_reg)
        }
    }

    /// Choose the register whose active occupant's next usage is
    /// furthest away. If `current`'s
    /// own first use comes later still, spill `current` itself instead
    /// of evicting anyone.
    fn allocate_blocked_reg(&mut self, mut current: LifetimeInterval, pos: u32) -> Result<(), InternalError> {
        let mut next_use = vec![u32::MAX; self.num_registers as usize];
        for (&reg, interval) in self.active.iter() {
            next_use[reg as usize] = interval.first_usage_at_or_after(pos).unwrap_or(u32::MAX);
        }
        let (best_reg, best_next_use) = next_use
            .iter()
            .enumerate()
            .max_by_key(|&(_, &v)| v)
            .map(|(i, &v)| (i as u32, v))
            .ok_or_else(|| InternalError::new("register allocator: no physical registers configured"))?;

        let current_first_use = current.first_usage_at_or_after(pos).unwrap_or_else(|| current.start().unwrap_or(pos));

        if current_first_use > best_next_use {
            self.spill(&mut current, pos);
            self.handled.push(current);
        } else if let Some(mut evicted) = self.active.remove(&best_reg) {
            let tail = evicted.split_at(pos);
            self.spill(&mut evicted, pos);
            self.handled.push(evicted);
            self.unhandled.push(tail);
            current.register_id = Some(best_reg);
            self.active.insert(best_reg, current);
        } else {
            // No active occupant despite appearing blocked: an
            // inactive reservation must cover `pos`; fall back to
            // spilling `current` rather than violating that reservation.
            self.spill(&mut current, pos);
            self.handled.push(current);
        }
        Ok(())
    }

    /// Splits `interval` before its first register-requiring use at or
    /// after `pos` (pushing the remainder back into `unhandled`) and
    /// assigns it a spill slot, recycling from the free list when
    /// possible.
    fn spill(&mut self, interval: &mut LifetimeInterval, pos: u32) {
        if let Some(first_use) = interval.first_usage_at_or_after(pos) {
            if first_use > pos {
                let tail = interval.split_at(first_use);
                self.unhandled.push(tail);
            }
        }
        let slot = self.take_spill_slot();
        interval.is_spill = true;
        interval.spill_slot = Some(slot);
        self.active_spills.insert(slot, interval.clone());
    }

    fn take_spill_slot(&mut self) -> u32 {
        if let Some(slot) = self.free_spill_slots.pop() {
            return slot;
        }
        let slot = self.number_of_spill_slots;
        self.number_of_spill_slots += 1;
        slot
    }

    fn finish(mut self, linear: &mut LinearBlock) {
        for (_, interval) in self.active.drain() {
            if interval.value_id.is_valid() {
                self.handled.push(interval);
            }
        }
        for (_, list) in self.inactive.drain() {
            for interval in list {
                if interval.value_id.is_valid() {
                    self.handled.push(interval);
                }
            }
        }

        let mut by_value: HashMap<ValueId, Vec<LifetimeInterval>> = HashMap::new();
        let mut by_slot: HashMap<u32, Vec<LifetimeInterval>> = HashMap::new();
        for interval in self.handled {
            if interval.is_spill {
                by_slot.entry(interval.spill_slot.unwrap_or(0)).or_default().push(interval.clone());
            }
            by_value.entry(interval.value_id).or_default().push(interval);
        }
        linear.value_lifetimes = by_value;
        linear.spill_lifetimes = by_slot;
        linear.number_of_spill_slots = self.number_of_spill_slots;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{builder, serializer};
    use crate::lexer::Lexer;
    use crate::lifetime;
    use crate::parser::Parser;

    fn allocate_source(src: &str, num_registers: u32) -> LinearBlock {
        let tokens = Lexer::new(src).tokenize().unwrap();
        let root = Parser::new(tokens).parse().unwrap();
        let frame = builder::build(&root).unwrap();
        let mut linear = serializer::serialize(&frame, num_registers).unwrap();
        lifetime::analyze(&mut linear).unwrap();
        allocate(&mut linear, num_registers).unwrap();
        linear
    }

    /// Every value assigned a register is either spilled or lands in a
    /// single register with non-overlapping ranges against every other
    /// value sharing that register.
    #[test]
    fn no_two_registers_overlap_on_the_same_physical_register() {
        let linear = allocate_source("var x = 3; x + x", 2);
        let mut by_register: HashMap<u32, Vec<&LifetimeInterval>> = HashMap::new();
        for fragments in linear.value_lifetimes.values() {
            for interval in fragments {
                if let Some(reg) = interval.register_id {
                    by_register.entry(reg).or_default().push(interval);
                }
            }
        }
        for intervals in by_register.values() {
            for i in 0..intervals.len() {
                for j in (i + 1)..intervals.len() {
                    assert_eq!(intervals[i].find_first_intersection(intervals[j]), None);
                }
            }
        }
    }

    #[test]
    fn every_value_gets_a_register_or_a_spill_slot() {
        let linear = allocate_source("var x = 3; x + x", 2);
        for fragments in linear.value_lifetimes.values() {
            for interval in fragments {
                assert!(interval.register_id.is_some() || interval.is_spill);
            }
        }
    }

    /// A single physical register is enough for `1 + 2`.
    #[test]
    fn small_arithmetic_expression_fits_in_few_registers() {
        let linear = allocate_source("1 + 2", 2);
        let used_registers: std::collections::HashSet<u32> = linear
            .value_lifetimes
            .values()
            .flatten()
            .filter_map(|interval| interval.register_id)
            .collect();
        assert!(used_registers.len() <= 2);
    }

    /// Forcing many concurrently-live values with only one physical
    /// register guarantees at least one spill.
    #[test]
    fn register_pressure_forces_a_spill() {
        let src = "var a = 1; var b = 2; var c = 3; var d = 4; a + (b + (c + d))";
        let linear = allocate_source(src, 1);
        let any_spilled = linear.value_lifetimes.values().flatten().any(|interval| interval.is_spill);
        assert!(any_spilled, "expected register pressure with a single physical register to force a spill");
    }

    #[test]
    fn spill_slot_zero_is_never_assigned_to_a_real_value() {
        let src = "var a = 1; var b = 2; var c = 3; var d = 4; a + (b + (c + d))";
        let linear = allocate_source(src, 1);
        assert!(!linear.spill_lifetimes.contains_key(&0));
    }
}
