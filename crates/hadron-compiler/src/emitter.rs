//! Resolved LinearBlock -> native code via an abstract JIT assembler.
//!
//! `Assembler` is the trait boundary a real native backend would
//! implement; `TestAssembler` is the one concrete implementation this
//! workspace ships, a deterministic in-memory encoder that records a
//! disassembly-like `Vec<EmittedOp>` instead of real machine code,
//! asserting on generated IR text rather than decoded opcodes.

use crate::error::{InternalError, ResourceError, ResourceErrorKind};
use crate::hir::serializer::LinearBlock;
use crate::hir::{HirOp, Location};
use hadron_core::collab::{JitBuffer, ThreadContextLayout};
use hadron_core::Slot;
use std::collections::HashMap;

/// A register operand. `General` ids come from the register allocator's
/// physical register numbering (0..R); the three ABI-reserved registers
/// are named separately so callers can't accidentally hand the
/// allocator one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reg {
    Context,
    Frame,
    Stack,
    General(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

/// The small instruction set a backend must support: register move,
/// immediate load, indexed load/store, conditional/unconditional
/// branch, call/return, and ABI enter/leave.
pub trait Assembler {
    type Error: std::fmt::Debug;

    fn current_address(&self) -> usize;
    fn create_label(&mut self) -> Label;
    /// Records `label`'s address as the assembler's current position.
    fn bind_label(&mut self, label: Label);
    /// Back-patches every branch emitted against `label` before it was
    /// bound.
    fn patch_there(&mut self, label: Label, address: usize);

    fn move_reg(&mut self, dst: Reg, src: Reg);
    fn load_immediate(&mut self, dst: Reg, value: Slot);
    fn load_indirect(&mut self, dst: Reg, base: Reg, offset: i32);
    fn store_indirect(&mut self, base: Reg, offset: i32, src: Reg);
    fn branch(&mut self, label: Label);
    fn branch_if_zero(&mut self, condition: Reg, label: Label);
    /// Transfers control to the dispatch trampoline.
    fn call_trampoline(&mut self);
    fn enter(&mut self);
    fn leave(&mut self);

    /// The encoded byte length produced so far, for sizing a `JitBuffer`
    /// allocation.
    fn encoded_len(&self) -> usize;
    fn encoded_bytes(&self) -> &[u8];
}

#[derive(Debug, Clone, PartialEq)]
pub enum EmittedOp {
    Move { dst: Reg, src: Reg },
    LoadImmediate { dst: Reg, value: Slot },
    LoadIndirect { dst: Reg, base: Reg, offset: i32 },
    StoreIndirect { base: Reg, offset: i32, src: Reg },
    Branch { target: Option<usize> },
    BranchIfZero { condition: Reg, target: Option<usize> },
    CallTrampoline,
    Enter,
    Leave,
}

/// Nominal encoded width of one `EmittedOp`, chosen so addresses are
/// deterministic without modeling a real instruction encoding.
const OP_WIDTH: usize = 4;

/// A deterministic in-memory `Assembler` used by this crate's own tests
/// and by embedders exercising the pipeline without a real JIT backend.
#[derive(Debug, Default)]
pub struct TestAssembler {
    pub ops: Vec<EmittedOp>,
    label_addresses: HashMap<Label, usize>,
    pending_patches: HashMap<Label, Vec<usize>>,
    next_label: u32,
}

impl TestAssembler {
    pub fn new() -> TestAssembler {
        TestAssembler::default()
    }
}

impl Assembler for TestAssembler {
    type Error = std::convert::Infallible;

    fn current_address(&self) -> usize {
        self.ops.len() * OP_WIDTH
    }

    fn create_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    fn bind_label(&mut self, label: Label) {
        self.label_addresses.insert(label, self.current_address());
    }

    fn patch_there(&mut self, label: Label, address: usize) {
        if let Some(sites) = self.pending_patches.remove(&label) {
            for idx in sites {
                match &mut self.ops[idx] {
                    EmittedOp::Branch { target } => *target = Some(address),
                    EmittedOp::BranchIfZero { target, .. } => *target = Some(address),
                    other => unreachable!("patch site {idx} is not a branch: {other:?}"),
                }
            }
        }
    }

    fn move_reg(&mut self, dst: Reg, src: Reg) {
        if dst != src {
            self.ops.push(EmittedOp::Move { dst, src });
        }
    }

    fn load_immediate(&mut self, dst: Reg, value: Slot) {
        self.ops.push(EmittedOp::LoadImmediate { dst, value });
    }

    fn load_indirect(&mut self, dst: Reg, base: Reg, offset: i32) {
        self.ops.push(EmittedOp::LoadIndirect { dst, base, offset });
    }

    fn store_indirect(&mut self, base: Reg, offset: i32, src: Reg) {
        self.ops.push(EmittedOp::StoreIndirect { base, offset, src });
    }

    fn branch(&mut self, label: Label) {
        let target = self.label_addresses.get(&label).copied();
        self.ops.push(EmittedOp::Branch { target });
        if target.is_none() {
            self.pending_patches.entry(label).or_default().push(self.ops.len() - 1);
        }
    }

    fn branch_if_zero(&mut self, condition: Reg, label: Label) {
        let target = self.label_addresses.get(&label).copied();
        self.ops.push(EmittedOp::BranchIfZero { condition, target });
        if target.is_none() {
            self.pending_patches.entry(label).or_default().push(self.ops.len() - 1);
        }
    }

    fn call_trampoline(&mut self) {
        self.ops.push(EmittedOp::CallTrampoline);
    }

    fn enter(&mut self) {
        self.ops.push(EmittedOp::Enter);
    }

    fn leave(&mut self) {
        self.ops.push(EmittedOp::Leave);
    }

    fn encoded_len(&self) -> usize {
        self.ops.len() * OP_WIDTH
    }

    fn encoded_bytes(&self) -> &[u8] {
        // Not a real encoding; callers that need bytes to hand to a
        // `JitBuffer` get a deterministic placeholder of the right length.
        static ZEROES: [u8; 4096] = [0u8; 4096];
        let len = self.encoded_len().min(ZEROES.len());
        &ZEROES[..len]
    }
}

/// Bytes per argument/return frame slot: one word for the value, one
/// for its type tag — `load-argument` and `load-argument-type` are
/// separate ops reading the same index.
const SLOT_BYTES: i32 = 8;
const ARGUMENT_STRIDE: i32 = SLOT_BYTES * 2;

/// Scratch register the emitter uses internally for spill-to-spill
/// moves (load into scratch, then store); never assigned to a value by
/// the register allocator since its id is one past the allocatable
/// range.
fn scratch_register(num_physical_registers: u32) -> Reg {
    Reg::General(num_physical_registers)
}

/// Walks `linear` in order and drives `assembler` one HIR op at a time.
/// `num_physical_registers` is the register allocator's `R`; the three
/// ABI registers and the scratch register are outside that range.
pub fn emit<A: Assembler>(
    linear: &LinearBlock,
    num_physical_registers: u32,
    context_layout: ThreadContextLayout,
    assembler: &mut A,
) -> Result<(), InternalError> {
    let scratch = scratch_register(num_physical_registers);
    let mut block_labels = HashMap::new();
    for &block in &linear.block_order {
        block_labels.insert(block, assembler.create_label());
    }

    assembler.enter();

    for (index, hir) in linear.instructions.iter().enumerate() {
        for &(src, dst) in &hir.moves {
            emit_move(assembler, src, dst, scratch);
        }

        match &hir.op {
            HirOp::Nil => {}
            HirOp::Label { .. } => {
                let block = linear.block_of(index).ok_or_else(|| {
                    InternalError::new(format!("instruction {index} is a label but not inside any recorded block range"))
                })?;
                let label = *block_labels.get(&block).expect("label created for every block above");
                assembler.bind_label(label);
                assembler.patch_there(label, assembler.current_address());
            }
            HirOp::LoadArgument { index: arg } => {
                assembler.load_indirect(reg_for(hir, linear, index, num_physical_registers)?, Reg::Frame, *arg as i32 * ARGUMENT_STRIDE);
            }
            HirOp::LoadArgumentType { index: arg } => {
                assembler.load_indirect(
                    reg_for(hir, linear, index, num_physical_registers)?,
                    Reg::Frame,
                    *arg as i32 * ARGUMENT_STRIDE + SLOT_BYTES,
                );
            }
            HirOp::Constant(slot) => {
                assembler.load_immediate(reg_for(hir, linear, index, num_physical_registers)?, *slot);
            }
            HirOp::StoreReturn { value } => {
                let value_reg = location_reg(linear, *value, index, scratch)?;
                assembler.store_indirect(Reg::Context, context_layout.stack_pointer_offset as i32, Reg::Stack);
                assembler.move_reg(Reg::Frame, Reg::Stack);
                assembler.store_indirect(Reg::Frame, 0, value_reg);
                assembler.load_indirect(Reg::Stack, Reg::Context, context_layout.stack_pointer_offset as i32);
            }
            HirOp::ResolveType { .. } | HirOp::Phi { .. } => {
                // no code emitted: phi resolution already ran in the
                // Resolver, type tracking is metadata only.
            }
            HirOp::LoadInstanceVariable { object, index: slot } => {
                let base = location_reg(linear, *object, index, scratch)?;
                assembler.load_indirect(reg_for(hir, linear, index, num_physical_registers)?, base, *slot as i32 * SLOT_BYTES);
            }
            HirOp::LoadInstanceVariableType { object, index: slot } => {
                let base = location_reg(linear, *object, index, scratch)?;
                assembler.load_indirect(
                    reg_for(hir, linear, index, num_physical_registers)?,
                    base,
                    *slot as i32 * SLOT_BYTES + SLOT_BYTES / 2,
                );
            }
            HirOp::LoadClassVariable { index: slot, .. } => {
                assembler.load_indirect(reg_for(hir, linear, index, num_physical_registers)?, Reg::Context, *slot as i32 * SLOT_BYTES);
            }
            HirOp::LoadClassVariableType { index: slot, .. } => {
                assembler.load_indirect(
                    reg_for(hir, linear, index, num_physical_registers)?,
                    Reg::Context,
                    *slot as i32 * SLOT_BYTES + SLOT_BYTES / 2,
                );
            }
            HirOp::StoreInstanceVariable { object, index: slot, value } => {
                let base = location_reg(linear, *object, index, scratch)?;
                let value_reg = location_reg(linear, *value, index, scratch)?;
                assembler.store_indirect(base, *slot as i32 * SLOT_BYTES, value_reg);
            }
            HirOp::StoreClassVariable { index: slot, value, .. } => {
                let value_reg = location_reg(linear, *value, index, scratch)?;
                assembler.store_indirect(Reg::Context, *slot as i32 * SLOT_BYTES, value_reg);
            }
            HirOp::Branch { target } => {
                let label = *block_labels.get(target).ok_or_else(|| {
                    InternalError::new(format!("branch target block {} has no recorded label", target.0))
                })?;
                if !is_fallthrough(linear, index, *target) {
                    assembler.branch(label);
                }
            }
            HirOp::BranchIfZero { condition, target } => {
                let condition_reg = location_reg(linear, *condition, index, scratch)?;
                let label = *block_labels.get(target).ok_or_else(|| {
                    InternalError::new(format!("branch target block {} has no recorded label", target.0))
                })?;
                assembler.branch_if_zero(condition_reg, label);
            }
            HirOp::DispatchSetupStack | HirOp::DispatchStoreArg { .. } | HirOp::DispatchStoreKeyArg { .. } => {
                // argument staging happens via the ordinary per-value
                // location; no dedicated opcode is needed beyond the
                // moves already emitted above for this instruction.
            }
            HirOp::DispatchCall { .. } => {
                assembler.call_trampoline();
            }
            HirOp::DispatchLoadReturn => {
                assembler.load_indirect(reg_for(hir, linear, index, num_physical_registers)?, Reg::Frame, 0);
            }
            HirOp::DispatchLoadReturnType => {
                assembler.load_indirect(reg_for(hir, linear, index, num_physical_registers)?, Reg::Frame, SLOT_BYTES);
            }
            HirOp::DispatchCleanup => {}
        }
    }

    assembler.leave();
    Ok(())
}

/// True when `target` is the block immediately following `from_index`
/// in serialization order, letting the branch be omitted entirely.
fn is_fallthrough(linear: &LinearBlock, from_index: usize, target: crate::hir::BlockId) -> bool {
    let Some((first, _)) = linear.block_ranges.get(&target) else { return false };
    *first == from_index + 1
}

fn reg_for(hir: &crate::hir::Hir, linear: &LinearBlock, index: usize, num_physical_registers: u32) -> Result<Reg, InternalError> {
    if !hir.value.is_valid() {
        return Err(InternalError::new("emitter asked for a destination register on a valueless HIR"));
    }
    location_reg(linear, hir.value.id, index, scratch_register(num_physical_registers))
}

/// Looks up the register or spill slot `value` occupies at `index`,
/// choosing among its (possibly split) lifetime fragments the one
/// covering that instruction — interval splitting can give a value
/// different locations at different points in the program.
fn location_reg(linear: &LinearBlock, value: crate::hir::ValueId, index: usize, scratch: Reg) -> Result<Reg, InternalError> {
    let fragments = linear
        .value_lifetimes
        .get(&value)
        .ok_or_else(|| InternalError::new(format!("value {value:?} has no lifetime at emission time")))?;
    let interval = fragments
        .iter()
        .find(|iv| iv.covers(index as u32))
        .or_else(|| fragments.first())
        .ok_or_else(|| InternalError::new(format!("value {value:?} has no lifetime fragments")))?;
    let location = if interval.is_spill {
        Location::Spill(interval.spill_slot.unwrap_or(0))
    } else {
        Location::Register(interval.register_id.ok_or_else(|| {
            InternalError::new(format!("value {value:?}'s interval is neither a register nor a spill"))
        })?)
    };
    Ok(location_to_reg(location, scratch))
}

fn location_to_reg(location: Location, scratch: Reg) -> Reg {
    match location {
        Location::Register(r) => Reg::General(r),
        Location::Spill(_) => scratch,
    }
}

fn emit_move<A: Assembler>(assembler: &mut A, src: Location, dst: Location, scratch: Reg) {
    match (src, dst) {
        (Location::Register(s), Location::Register(d)) => assembler.move_reg(Reg::General(d), Reg::General(s)),
        (Location::Register(s), Location::Spill(slot)) => {
            assembler.store_indirect(Reg::Stack, spill_offset(slot), Reg::General(s))
        }
        (Location::Spill(slot), Location::Register(d)) => {
            assembler.load_indirect(Reg::General(d), Reg::Stack, spill_offset(slot))
        }
        (Location::Spill(from_slot), Location::Spill(to_slot)) => {
            assembler.load_indirect(scratch, Reg::Stack, spill_offset(from_slot));
            assembler.store_indirect(Reg::Stack, spill_offset(to_slot), scratch);
        }
    }
}

fn spill_offset(slot: u32) -> i32 {
    slot as i32 * SLOT_BYTES
}

/// Allocates a `JitBuffer` sized to `assembler`'s encoded output,
/// retrying once with double the capacity before surfacing a
/// `ResourceError`.
pub fn finalize_into_buffer<A: Assembler, B: JitBuffer>(assembler: &A, buffer: &mut B) -> Result<*const u8, ResourceError> {
    let needed = assembler.encoded_len().max(1);
    if buffer.allocate(needed).is_err() && buffer.allocate(needed * 2).is_err() {
        return Err(ResourceError {
            kind: ResourceErrorKind::JitBufferExhausted,
            message: format!("failed to allocate {needed} bytes (and {} bytes on retry)", needed * 2),
        });
    }
    buffer.mark_for_write();
    buffer.write(0, assembler.encoded_bytes());
    buffer.mark_for_execute();
    Ok(buffer.finalize(needed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hadron_core::collab::NullJitBuffer;

    #[test]
    fn branch_to_bound_label_records_its_address() {
        let mut asm = TestAssembler::new();
        let label = asm.create_label();
        asm.bind_label(label);
        asm.branch(label);
        assert!(matches!(asm.ops.last(), Some(EmittedOp::Branch { target: Some(0) })));
    }

    #[test]
    fn branch_to_unbound_label_patches_after_binding() {
        let mut asm = TestAssembler::new();
        let label = asm.create_label();
        asm.branch(label);
        assert!(matches!(asm.ops[0], EmittedOp::Branch { target: None }));
        asm.enter(); // advance current_address so the patched value is nonzero
        let address = asm.current_address();
        asm.patch_there(label, address);
        assert!(matches!(asm.ops[0], EmittedOp::Branch { target: Some(a) } if a == address));
    }

    #[test]
    fn move_reg_is_a_no_op_for_identical_registers() {
        let mut asm = TestAssembler::new();
        asm.move_reg(Reg::General(0), Reg::General(0));
        assert!(asm.ops.is_empty());
    }

    #[test]
    fn finalize_into_buffer_writes_through_to_a_null_jit_buffer() {
        let mut asm = TestAssembler::new();
        asm.load_immediate(Reg::General(0), Slot::Int(1));
        let mut buffer = NullJitBuffer::default();
        let ptr = finalize_into_buffer(&asm, &mut buffer).unwrap();
        assert!(!ptr.is_null());
    }

    #[test]
    fn spill_to_spill_move_routes_through_scratch() {
        let mut asm = TestAssembler::new();
        emit_move(&mut asm, Location::Spill(1), Location::Spill(2), Reg::General(9));
        assert_eq!(
            asm.ops,
            vec![
                EmittedOp::LoadIndirect { dst: Reg::General(9), base: Reg::Stack, offset: 8 },
                EmittedOp::StoreIndirect { base: Reg::Stack, offset: 16, src: Reg::General(9) },
            ]
        );
    }
}
