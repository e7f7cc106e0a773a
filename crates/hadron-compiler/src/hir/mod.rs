//! SSA instruction set, basic blocks, and CFG.
//!
//! A class hierarchy of HIR subtypes (`LoadArgumentHIR`, `ConstantHIR`,
//! ...) collapses here into a single tagged sum `HirOp`; blocks and
//! values are referenced by small integer ids (`BlockId`, `ValueId`)
//! into arena-like `Vec`s on `Frame`, never by pointer, so the cyclic
//! predecessor/successor graph never needs an owning reference.

pub mod builder;
pub mod serializer;

use hadron_core::{Slot, SymbolHash, TypeFlags};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

impl ValueId {
    pub const INVALID: ValueId = ValueId(u32::MAX);

    pub fn is_valid(&self) -> bool {
        self.0 != u32::MAX
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

/// The SSA name plus its proposed type: a pair of value number and
/// type flags. A `type_flags` of `NONE` means invalid — a type-flag
/// bitset of zero never describes a real value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SsaValue {
    pub id: ValueId,
    pub type_flags: TypeFlags,
}

impl SsaValue {
    pub const INVALID: SsaValue = SsaValue { id: ValueId::INVALID, type_flags: TypeFlags::NONE };

    pub fn is_valid(&self) -> bool {
        self.id.is_valid() && self.type_flags.0 != 0
    }
}

/// A predicate-move destination: a physical register or a spill slot.
/// Spill slot 0 is reserved for cycle-breaking scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    Register(u32),
    Spill(u32),
}

/// How many extra physical registers an op needs reserved across its
/// execution. Only dispatch-call reserves all of them (to force the
/// allocator to preserve caller registers across an arbitrary method
/// call); every other op needs none beyond its own operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservedRegisters {
    None,
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HirOp {
    /// An empty reserved slot: a sentinel at instruction index 0 and
    /// one between each real instruction. Carries no value and is
    /// overwritten in place by the resolver when it inserts a
    /// predicate move.
    Nil,
    LoadArgument { index: u32 },
    LoadArgumentType { index: u32 },
    Constant(Slot),
    StoreReturn { value: ValueId },
    /// Materializes the runtime type of `value` as a first-class value
    /// when it isn't known at compile time.
    ResolveType { value: ValueId },

    LoadInstanceVariable { object: ValueId, index: u32 },
    LoadInstanceVariableType { object: ValueId, index: u32 },
    LoadClassVariable { class: SymbolHash, index: u32 },
    LoadClassVariableType { class: SymbolHash, index: u32 },
    StoreInstanceVariable { object: ValueId, index: u32, value: ValueId },
    StoreClassVariable { class: SymbolHash, index: u32, value: ValueId },

    /// Ordered to match the containing block's predecessor list.
    Phi { inputs: Vec<ValueId> },
    Branch { target: BlockId },
    BranchIfZero { condition: ValueId, target: BlockId },
    /// Head-of-block marker; carries predecessors/successors for the
    /// serialized linear form, where the CFG's own block adjacency is
    /// no longer directly addressable.
    Label { predecessors: Vec<BlockId>, successors: Vec<BlockId> },

    DispatchSetupStack,
    DispatchStoreArg { value: ValueId },
    DispatchStoreKeyArg { key: SymbolHash, value: ValueId },
    DispatchCall { selector: SymbolHash, num_args: u32 },
    DispatchLoadReturn,
    DispatchLoadReturnType,
    DispatchCleanup,
}

impl HirOp {
    /// The set of value ids this op reads. Order matters for operands
    /// like `Phi` inputs and is preserved here even though it's
    /// conceptually a set — determinism downstream (codegen argument
    /// order) depends on it.
    pub fn reads(&self) -> Vec<ValueId> {
        match self {
            HirOp::Nil
            | HirOp::LoadArgument { .. }
            | HirOp::LoadArgumentType { .. }
            | HirOp::Constant(_)
            | HirOp::LoadClassVariable { .. }
            | HirOp::LoadClassVariableType { .. }
            | HirOp::Branch { .. }
            | HirOp::Label { .. }
            | HirOp::DispatchSetupStack
            | HirOp::DispatchLoadReturn
            | HirOp::DispatchLoadReturnType
            | HirOp::DispatchCleanup => vec![],

            HirOp::StoreReturn { value }
            | HirOp::ResolveType { value }
            | HirOp::DispatchStoreArg { value }
            | HirOp::DispatchStoreKeyArg { value, .. } => vec![*value],

            HirOp::BranchIfZero { condition, .. } => vec![*condition],

            HirOp::LoadInstanceVariable { object, .. }
            | HirOp::LoadInstanceVariableType { object, .. } => vec![*object],

            HirOp::StoreInstanceVariable { object, value, .. } => vec![*object, *value],
            HirOp::StoreClassVariable { value, .. } => vec![*value],

            HirOp::Phi { inputs } => inputs.clone(),
            HirOp::DispatchCall { .. } => vec![],
        }
    }

    pub fn reserved_registers(&self) -> ReservedRegisters {
        match self {
            HirOp::DispatchCall { .. } => ReservedRegisters::All,
            _ => ReservedRegisters::None,
        }
    }

    /// True for ops whose presence alone does not require emitted
    /// code: resolve-type and phi are both purely bookkeeping.
    pub fn is_metadata_only(&self) -> bool {
        matches!(self, HirOp::ResolveType { .. } | HirOp::Phi { .. })
    }
}

/// One HIR instruction: the SSA value it defines (if any) plus the
/// operation itself, plus the register-allocation bookkeeping that
/// later stages attach.
#[derive(Debug, Clone, PartialEq)]
pub struct Hir {
    pub value: SsaValue,
    pub op: HirOp,
    /// Predicate moves: executed before this HIR, origin -> destination.
    /// A `Vec` rather than a map because insertion order is scheduling
    /// order and origins must be unique (enforced by `add_move`).
    pub moves: Vec<(Location, Location)>,
    pub value_locations: HashMap<ValueId, Location>,
}

impl Hir {
    pub fn new(value: SsaValue, op: HirOp) -> Hir {
        Hir { value, op, moves: Vec::new(), value_locations: HashMap::new() }
    }

    pub fn side_effect_only(op: HirOp) -> Hir {
        Hir::new(SsaValue::INVALID, op)
    }

    pub fn nil() -> Hir {
        Hir::side_effect_only(HirOp::Nil)
    }

    /// Adds a predicate move, panicking (an `InternalError` at the call
    /// site should have been raised first) if `origin` already has a
    /// scheduled move — each origin may be copied from only once per
    /// instruction.
    pub fn add_move(&mut self, origin: Location, destination: Location) {
        debug_assert!(
            !self.moves.iter().any(|(o, _)| *o == origin),
            "origin already has a scheduled move"
        );
        self.moves.push((origin, destination));
    }
}

/// `{number, predecessors, successors, phis, statements}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub number: BlockId,
    pub predecessors: Vec<BlockId>,
    pub successors: Vec<BlockId>,
    /// Value ids of the phi HIRs at this block's head, in emission
    /// order (matches the label's copy used post-serialization).
    pub phis: Vec<ValueId>,
    pub statements: Vec<Hir>,
}

impl Block {
    pub fn new(number: BlockId) -> Block {
        Block {
            number,
            predecessors: Vec::new(),
            successors: Vec::new(),
            phis: Vec::new(),
            statements: Vec::new(),
        }
    }

    pub fn has_no_successors(&self) -> bool {
        self.successors.is_empty()
    }
}

/// One stack frame's worth of HIR. Block 0 is always the entry; at
/// most one block has no successors.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub blocks: Vec<Block>,
    pub value_count: u32,
    pub argument_names: Vec<SymbolHash>,
}

impl Frame {
    pub fn new(argument_names: Vec<SymbolHash>) -> Frame {
        Frame { blocks: Vec::new(), value_count: 0, argument_names }
    }

    pub fn block_count(&self) -> u32 {
        self.blocks.len() as u32
    }

    pub fn next_value(&mut self, type_flags: TypeFlags) -> SsaValue {
        let id = ValueId(self.value_count);
        self.value_count += 1;
        SsaValue { id, type_flags }
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0 as usize]
    }

    /// Verifies the invariants checkable directly on a built `Frame`:
    /// phi input count matches predecessor count, and at most one
    /// block has no successors. "Every read was defined earlier" needs
    /// a linear order and is checked post-serialization instead.
    pub fn check_invariants(&self) -> Result<(), crate::error::InternalError> {
        let terminal_blocks = self.blocks.iter().filter(|b| b.has_no_successors()).count();
        if terminal_blocks > 1 {
            return Err(crate::error::InternalError::new(format!(
                "frame has {terminal_blocks} blocks with no successors, expected at most 1"
            )));
        }
        for block in &self.blocks {
            for stmt in &block.statements {
                if let HirOp::Phi { inputs } = &stmt.op {
                    if inputs.len() != block.predecessors.len() {
                        return Err(crate::error::InternalError::new(format!(
                            "block {} phi has {} inputs but {} predecessors",
                            block.number.0,
                            inputs.len(),
                            block.predecessors.len()
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_ssa_value_has_zero_type_flags() {
        assert!(!SsaValue::INVALID.is_valid());
    }

    #[test]
    fn reads_reflects_operand_fields() {
        let op = HirOp::StoreReturn { value: ValueId(3) };
        assert_eq!(op.reads(), vec![ValueId(3)]);
    }

    #[test]
    fn dispatch_call_reserves_all_registers() {
        let op = HirOp::DispatchCall { selector: SymbolHash::of("foo"), num_args: 0 };
        assert_eq!(op.reserved_registers(), ReservedRegisters::All);
    }

    #[test]
    fn frame_rejects_multiple_terminal_blocks() {
        let mut frame = Frame::new(vec![]);
        frame.blocks.push(Block::new(BlockId(0)));
        frame.blocks.push(Block::new(BlockId(1)));
        assert!(frame.check_invariants().is_err());
    }

    #[test]
    fn frame_rejects_phi_input_count_mismatch() {
        let mut frame = Frame::new(vec![]);
        let mut entry = Block::new(BlockId(0));
        entry.successors.push(BlockId(1));
        let mut join = Block::new(BlockId(1));
        join.predecessors.push(BlockId(0));
        join.statements.push(Hir::new(
            SsaValue { id: ValueId(0), type_flags: TypeFlags::INTEGER },
            HirOp::Phi { inputs: vec![ValueId(1), ValueId(2)] },
        ));
        frame.blocks.push(entry);
        frame.blocks.push(join);
        assert!(frame.check_invariants().is_err());
    }
}
