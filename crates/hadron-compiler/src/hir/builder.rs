//! AST -> HIR SSA construction.
//!
//! Implements the Braun et al. "Simple and Efficient Construction of
//! SSA Form" algorithm: a per-block map of `name -> value id` threaded
//! top-down through the AST, with incomplete-phi bookkeeping for blocks
//! whose predecessor set isn't fully known yet (only the `while`-loop
//! header needs this — every other block in this grammar gets all its
//! predecessors wired before the builder reads from it). Trivial-phi
//! elimination is a distinct fixpoint pass run once construction
//! finishes, as the algorithm describes it as a separate step.

use crate::ast::{KeywordArg, Node, NodeKind, VarDef};
use crate::error::{SemanticError, SemanticErrorKind};
use crate::hir::{Block, BlockId, Frame, Hir, HirOp, SsaValue, ValueId};
use hadron_core::{Slot, SymbolHash, TypeFlags};
use std::collections::{HashMap, HashSet};

pub fn build(root: &Node) -> Result<Frame, Vec<SemanticError>> {
    let (arguments, locals, body) = match &root.kind {
        NodeKind::Block { arguments, locals, body } => (arguments, locals, body),
        _ => {
            // `build` only ever lowers a `Block`; the class-library root
            // `parse_class()` yields is handled per-method-body by
            // `compile_class` before it ever reaches here. Not an
            // assignment-target error at all — reuses `TypeMismatch` the
            // same way the
            // class-library-node-inside-an-expression-block arm below
            // does, rather than a fabricated `InvalidAssignTarget`.
            return Err(vec![SemanticError {
                position: root.token_index,
                kind: SemanticErrorKind::TypeMismatch {
                    context: "HIR construction root must be a Block".into(),
                },
            }]);
        }
    };

    let argument_names: Vec<SymbolHash> = arguments.args.iter().map(|a| a.name).collect();
    let mut builder = BlockBuilder::new(argument_names.clone());
    let entry = builder.new_block();
    builder.seal(entry);
    builder.current = entry;

    for (index, arg) in arguments.args.iter().enumerate() {
        let value = builder.frame.next_value(TypeFlags::ANY);
        builder.emit(value, HirOp::LoadArgument { index: index as u32 });
        builder.write_variable(entry, arg.name, value.id);
    }

    for local in locals {
        builder.declare_local(local)?;
    }

    let mut last_value: Option<ValueId> = None;
    for stmt in body {
        last_value = Some(builder.build_expr(stmt)?);
    }

    let result = last_value.unwrap_or_else(|| {
        let value = builder.frame.next_value(TypeFlags::NIL);
        builder.emit(value, HirOp::Constant(Slot::Nil));
        value.id
    });
    builder.emit_side_effect(HirOp::StoreReturn { value: result });

    if !builder.errors.is_empty() {
        return Err(builder.errors);
    }

    let mut frame = builder.frame;
    eliminate_trivial_phis(&mut frame);
    frame
        .check_invariants()
        .map_err(|e| vec![SemanticError { position: 0, kind: SemanticErrorKind::TypeMismatch { context: e.message } }])?;
    Ok(frame)
}

struct BlockBuilder {
    frame: Frame,
    current: BlockId,
    defs: HashMap<BlockId, HashMap<SymbolHash, ValueId>>,
    sealed: HashSet<BlockId>,
    incomplete_phis: HashMap<BlockId, Vec<(SymbolHash, ValueId)>>,
    errors: Vec<SemanticError>,
}

/// Precomputed hashes of the selectors the builder can constant-fold
/// at the AST level: binary operators on two literal numeric operands
/// lower directly to a constant instead of a dispatch. Folding is
/// driven off the two *operand AST nodes* being literals, not off
/// value-level constant propagation through variables — `x + x` for a
/// variable `x` must still lower through the dispatch sequence so the
/// register allocator has something to allocate, even though both
/// reads resolve to the same SSA value.
fn foldable_numeric_op(selector: SymbolHash) -> Option<fn(f64, f64) -> FoldResult> {
    let table: &[(&str, fn(f64, f64) -> FoldResult)] = &[
        ("+", |a, b| FoldResult::Number(a + b)),
        ("-", |a, b| FoldResult::Number(a - b)),
        ("*", |a, b| FoldResult::Number(a * b)),
        ("/", |a, b| FoldResult::Number(a / b)),
        ("<", |a, b| FoldResult::Bool(a < b)),
        (">", |a, b| FoldResult::Bool(a > b)),
        ("<=", |a, b| FoldResult::Bool(a <= b)),
        (">=", |a, b| FoldResult::Bool(a >= b)),
        ("==", |a, b| FoldResult::Bool(a == b)),
        ("!=", |a, b| FoldResult::Bool(a != b)),
    ];
    table
        .iter()
        .find(|(name, _)| SymbolHash::of(name) == selector)
        .map(|(_, f)| *f)
}

enum FoldResult {
    Number(f64),
    Bool(bool),
}

impl BlockBuilder {
    fn new(argument_names: Vec<SymbolHash>) -> BlockBuilder {
        BlockBuilder {
            frame: Frame::new(argument_names),
            current: BlockId(0),
            defs: HashMap::new(),
            sealed: HashSet::new(),
            incomplete_phis: HashMap::new(),
            errors: Vec::new(),
        }
    }

    fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.frame.blocks.len() as u32);
        self.frame.blocks.push(Block::new(id));
        self.defs.insert(id, HashMap::new());
        id
    }

    fn add_edge(&mut self, pred: BlockId, succ: BlockId) {
        self.frame.block_mut(pred).successors.push(succ);
        self.frame.block_mut(succ).predecessors.push(pred);
    }

    fn seal(&mut self, block: BlockId) {
        let pending = self.incomplete_phis.remove(&block).unwrap_or_default();
        for (name, phi_value) in pending {
            self.add_phi_operands(block, name, phi_value);
        }
        self.sealed.insert(block);
    }

    fn emit(&mut self, value: SsaValue, op: HirOp) {
        self.frame.block_mut(self.current).statements.push(Hir::new(value, op));
    }

    fn emit_side_effect(&mut self, op: HirOp) {
        self.frame.block_mut(self.current).statements.push(Hir::side_effect_only(op));
    }

    fn write_variable(&mut self, block: BlockId, name: SymbolHash, value: ValueId) {
        self.defs.get_mut(&block).unwrap().insert(name, value);
    }

    fn declare_local(&mut self, def: &VarDef) -> Result<(), Vec<SemanticError>> {
        let value = if let Some(initial) = &def.initial {
            self.build_expr(initial).map_err(|e| vec![e])?
        } else {
            let v = self.frame.next_value(TypeFlags::NIL);
            self.emit(v, HirOp::Constant(Slot::Nil));
            v.id
        };
        self.write_variable(self.current, def.name, value);
        Ok(())
    }

    fn read_variable(&mut self, block: BlockId, name: SymbolHash) -> Option<ValueId> {
        if let Some(v) = self.defs[&block].get(&name) {
            return Some(*v);
        }
        self.read_variable_recursive(block, name)
    }

    fn read_variable_recursive(&mut self, block: BlockId, name: SymbolHash) -> Option<ValueId> {
        let result = if !self.sealed.contains(&block) {
            // Predecessor set not finalized yet (loop header before its
            // back edge is wired): create an operandless phi now and
            // fill it in once the block is sealed.
            let phi = self.frame.next_value(TypeFlags::ANY);
            self.incomplete_phis.entry(block).or_default().push((name, phi.id));
            self.emit_phi_at(block, phi);
            phi.id
        } else {
            let preds = self.frame.block(block).predecessors.clone();
            match preds.as_slice() {
                [] => return None, // undefined name: no predecessor has it
                [only] => self.read_variable(*only, name)?,
                _ => {
                    let phi = self.frame.next_value(TypeFlags::ANY);
                    // Record before recursing so a cyclic lookup (loop
                    // variable referencing itself through the back edge)
                    // terminates instead of recursing forever.
                    self.write_variable(block, name, phi.id);
                    self.emit_phi_at(block, phi);
                    self.add_phi_operands(block, name, phi.id);
                    phi.id
                }
            }
        };
        self.write_variable(block, name, result);
        Some(result)
    }

    fn emit_phi_at(&mut self, block: BlockId, value: SsaValue) {
        let b = self.frame.block_mut(block);
        b.phis.push(value.id);
        b.statements.insert(0, Hir::new(value, HirOp::Phi { inputs: vec![] }));
    }

    fn add_phi_operands(&mut self, block: BlockId, name: SymbolHash, phi_value: ValueId) {
        let preds = self.frame.block(block).predecessors.clone();
        let mut inputs = Vec::with_capacity(preds.len());
        for pred in preds {
            let input = self.read_variable(pred, name).unwrap_or_else(|| {
                // Undefined along this predecessor: fall back to nil
                // rather than silently dropping an input (keeps the
                // phi's input count equal to the predecessor count).
                let v = self.frame.next_value(TypeFlags::NIL);
                let cur = self.current;
                self.current = pred;
                self.emit(v, HirOp::Constant(Slot::Nil));
                self.current = cur;
                v.id
            });
            inputs.push(input);
        }
        for stmt in &mut self.frame.block_mut(block).statements {
            if stmt.value.id == phi_value {
                if let HirOp::Phi { inputs: existing } = &mut stmt.op {
                    *existing = inputs;
                }
                break;
            }
        }
    }

    fn build_expr(&mut self, node: &Node) -> Result<ValueId, SemanticError> {
        match &node.kind {
            NodeKind::Literal(slot) => {
                let v = self.frame.next_value(slot.type_flags());
                self.emit(v, HirOp::Constant(*slot));
                Ok(v.id)
            }
            NodeKind::Symbol(hash) => {
                let v = self.frame.next_value(TypeFlags::SYMBOL);
                self.emit(v, HirOp::Constant(Slot::Symbol(*hash)));
                Ok(v.id)
            }
            NodeKind::Str(text) => {
                // `Slot` has no inline string payload — a string is a
                // heap object, not a machine-word atom — so the
                // literal's text is interned as a symbol constant and
                // handed to a dispatch that materializes the string
                // object at runtime, rather than being folded into a
                // placeholder nil.
                let hash = SymbolHash::of(text);
                let sym = self.frame.next_value(TypeFlags::SYMBOL);
                self.emit(sym, HirOp::Constant(Slot::Symbol(hash)));
                self.lower_dispatch(SymbolHash::of("string"), None, vec![sym.id], vec![])
            }
            NodeKind::Name { hash, is_global, .. } => {
                if *is_global {
                    let v = self.frame.next_value(TypeFlags::ANY);
                    self.emit(v, HirOp::LoadClassVariable { class: *hash, index: 0 });
                    return Ok(v.id);
                }
                self.read_variable(self.current, *hash).ok_or(SemanticError {
                    position: node.token_index,
                    kind: SemanticErrorKind::UndefinedName(format!("{hash:?}")),
                })
            }
            NodeKind::Assign { name, is_global, value, .. } => {
                let v = self.build_expr(value)?;
                if *is_global {
                    self.emit_side_effect(HirOp::StoreClassVariable { class: *name, index: 0, value: v });
                } else {
                    self.write_variable(self.current, *name, v);
                }
                Ok(v)
            }
            NodeKind::Setter { target, name, value } => {
                let object = self.build_expr(target)?;
                let v = self.build_expr(value)?;
                self.emit_side_effect(HirOp::StoreInstanceVariable { object, index: name.0 as u32, value: v });
                Ok(v)
            }
            NodeKind::ArrayWrite { target, index, value } => {
                let object = self.build_expr(target)?;
                let idx = self.build_expr(index)?;
                let v = self.build_expr(value)?;
                self.lower_dispatch(SymbolHash::of("put"), Some(object), vec![idx, v], vec![])?;
                // An assignment's value is the assigned right-hand
                // side, not the dispatch's own return, so `v` is
                // threaded through even though `put`'s dispatch result
                // is unused.
                Ok(v)
            }
            NodeKind::ArrayRead { target, index } => {
                let object = self.build_expr(target)?;
                let idx = self.build_expr(index)?;
                self.lower_dispatch(SymbolHash::of("at"), Some(object), vec![idx], vec![])
            }
            NodeKind::BinopCall { selector, left, right } => self.build_binop(*selector, left, right),
            NodeKind::Call { target, selector, positional_args, keyword_args } => {
                let receiver = target.as_ref().map(|t| self.build_expr(t)).transpose()?;
                let positional = positional_args
                    .iter()
                    .map(|a| self.build_expr(a))
                    .collect::<Result<Vec<_>, _>>()?;
                let keyword = self.build_keyword_args(keyword_args)?;
                self.lower_dispatch(*selector, receiver, positional, keyword)
            }
            NodeKind::New { class_name, positional_args, keyword_args, block_arg } => {
                let _ = block_arg;
                let positional = positional_args
                    .iter()
                    .map(|a| self.build_expr(a))
                    .collect::<Result<Vec<_>, _>>()?;
                let keyword = self.build_keyword_args(keyword_args)?;
                self.lower_dispatch(*class_name, None, positional, keyword)
            }
            NodeKind::If { condition, then_branch, else_branch } => {
                self.build_if(condition, then_branch, else_branch.as_deref())
            }
            NodeKind::While { condition, body } => self.build_while(condition, body),
            NodeKind::Return(value) => {
                let v = self.build_expr(value)?;
                self.emit_side_effect(HirOp::StoreReturn { value: v });
                Ok(v)
            }
            NodeKind::Block { body, .. } => {
                // A nested block literal used purely as an expression
                // (e.g. passed as a dispatch argument) evaluates to a
                // type-tagged placeholder; full closure support is out
                // of scope for this pipeline stage.
                let mut last = None;
                for stmt in body {
                    last = Some(self.build_expr(stmt)?);
                }
                match last {
                    Some(v) => Ok(v),
                    None => {
                        let v = self.frame.next_value(TypeFlags::BLOCK);
                        self.emit(v, HirOp::Constant(Slot::Nil));
                        Ok(v.id)
                    }
                }
            }
            NodeKind::ArrayLiteral(items) => {
                // Lowers like `NodeKind::New` does for `Class(args)`
                // sugar: a dispatch whose positional arguments are the
                // evaluated elements, so the constructed array actually
                // holds them instead of a discarded-then-faked nil.
                let values = items.iter().map(|item| self.build_expr(item)).collect::<Result<Vec<_>, _>>()?;
                self.lower_dispatch(SymbolHash::of("array"), None, values, vec![])
            }
            NodeKind::Event(pairs) => {
                let keyword = self.build_keyword_args(pairs)?;
                self.lower_dispatch(SymbolHash::of("event"), None, vec![], keyword)
            }
            NodeKind::Series { start, step, end } => {
                let start_v = self.build_expr(start)?;
                let mut positional = vec![start_v];
                if let Some(s) = step {
                    positional.push(self.build_expr(s)?);
                }
                positional.push(self.build_expr(end)?);
                self.lower_dispatch(SymbolHash::of("series"), None, positional, vec![])
            }
            NodeKind::CopySeries { target, start, end } => {
                let object = self.build_expr(target)?;
                let start_v = self.build_expr(start)?;
                let end_v = self.build_expr(end)?;
                self.lower_dispatch(SymbolHash::of("copySeries"), Some(object), vec![start_v, end_v], vec![])
            }
            NodeKind::CurryArgument => {
                let v = self.frame.next_value(TypeFlags::ANY);
                self.emit(v, HirOp::Constant(Slot::Nil));
                Ok(v.id)
            }
            NodeKind::VarDef(_) | NodeKind::VarList(_) | NodeKind::ArgList(_) => {
                let v = self.frame.next_value(TypeFlags::NIL);
                self.emit(v, HirOp::Constant(Slot::Nil));
                Ok(v.id)
            }
            NodeKind::Method { .. } | NodeKind::ClassDef { .. } | NodeKind::ClassExtension { .. } => {
                Err(SemanticError {
                    position: node.token_index,
                    kind: SemanticErrorKind::TypeMismatch {
                        context: "class-library node inside an expression block".into(),
                    },
                })
            }
        }
    }

    fn build_keyword_args(&mut self, pairs: &[KeywordArg]) -> Result<Vec<(SymbolHash, ValueId)>, SemanticError> {
        pairs
            .iter()
            .map(|kv| Ok((kv.name, self.build_expr(&kv.value)?)))
            .collect()
    }

    fn build_binop(&mut self, selector: SymbolHash, left: &Node, right: &Node) -> Result<ValueId, SemanticError> {
        if let (NodeKind::Literal(a), NodeKind::Literal(b)) = (&left.kind, &right.kind) {
            if let (Some(fold), Some(af), Some(bf)) = (
                foldable_numeric_op(selector),
                slot_as_f64(a),
                slot_as_f64(b),
            ) {
                let result_slot = match fold(af, bf) {
                    FoldResult::Number(n) if matches!((a, b), (Slot::Int(_), Slot::Int(_))) => {
                        Slot::Int(n as i32)
                    }
                    FoldResult::Number(n) => Slot::Float(n),
                    FoldResult::Bool(b) => Slot::Bool(b),
                };
                let v = self.frame.next_value(result_slot.type_flags());
                self.emit(v, HirOp::Constant(result_slot));
                return Ok(v.id);
            }
        }
        let l = self.build_expr(left)?;
        let r = self.build_expr(right)?;
        self.lower_dispatch(selector, Some(l), vec![r], vec![])
    }

    /// Lowers a message send to the six-op dispatch sequence:
    /// setup-stack, store-arg per positional argument (receiver first,
    /// if any), store-key-arg per keyword argument, call, load-return,
    /// load-return-type, cleanup.
    fn lower_dispatch(
        &mut self,
        selector: SymbolHash,
        receiver: Option<ValueId>,
        positional: Vec<ValueId>,
        keyword: Vec<(SymbolHash, ValueId)>,
    ) -> Result<ValueId, SemanticError> {
        self.emit_side_effect(HirOp::DispatchSetupStack);
        let mut num_args = 0u32;
        if let Some(r) = receiver {
            self.emit_side_effect(HirOp::DispatchStoreArg { value: r });
            num_args += 1;
        }
        for arg in positional {
            self.emit_side_effect(HirOp::DispatchStoreArg { value: arg });
            num_args += 1;
        }
        for (key, value) in keyword {
            self.emit_side_effect(HirOp::DispatchStoreKeyArg { key, value });
        }
        let call_result = self.frame.next_value(TypeFlags::ANY);
        self.emit(call_result, HirOp::DispatchCall { selector, num_args });
        let ret = self.frame.next_value(TypeFlags::ANY);
        self.emit(ret, HirOp::DispatchLoadReturn);
        let ret_type = self.frame.next_value(TypeFlags::TYPE_TAG);
        self.emit(ret_type, HirOp::DispatchLoadReturnType);
        self.emit_side_effect(HirOp::DispatchCleanup);
        Ok(ret.id)
    }

    fn build_if(
        &mut self,
        condition: &Node,
        then_branch: &Node,
        else_branch: Option<&Node>,
    ) -> Result<ValueId, SemanticError> {
        let cond = self.build_expr(condition)?;
        let entry = self.current;

        let then_block = self.new_block();
        self.add_edge(entry, then_block);
        self.seal(then_block);

        let else_block = self.new_block();
        self.add_edge(entry, else_block);
        self.seal(else_block);

        self.emit_side_effect(HirOp::BranchIfZero { condition: cond, target: else_block });
        self.emit_side_effect(HirOp::Branch { target: then_block });

        self.current = then_block;
        let then_value = self.build_expr(then_branch)?;
        let then_end = self.current;
        self.emit_side_effect(HirOp::Branch { target: BlockId(0) }); // patched below once join exists

        self.current = else_block;
        let else_value = match else_branch {
            Some(e) => self.build_expr(e)?,
            None => {
                let v = self.frame.next_value(TypeFlags::NIL);
                self.emit(v, HirOp::Constant(Slot::Nil));
                v.id
            }
        };
        let else_end = self.current;
        self.emit_side_effect(HirOp::Branch { target: BlockId(0) }); // patched below

        let join = self.new_block();
        self.add_edge(then_end, join);
        self.add_edge(else_end, join);
        self.seal(join);

        // Patch the placeholder branch targets now that `join` exists.
        Self::patch_last_branch(&mut self.frame, then_end, join);
        Self::patch_last_branch(&mut self.frame, else_end, join);

        self.current = join;
        if then_value == else_value {
            return Ok(then_value);
        }
        let phi = self.frame.next_value(TypeFlags::ANY);
        self.frame.block_mut(join).phis.push(phi.id);
        self.frame
            .block_mut(join)
            .statements
            .insert(0, Hir::new(phi, HirOp::Phi { inputs: vec![then_value, else_value] }));
        Ok(phi.id)
    }

    fn patch_last_branch(frame: &mut Frame, block: BlockId, target: BlockId) {
        let stmts = &mut frame.block_mut(block).statements;
        if let Some(last) = stmts.last_mut() {
            if let HirOp::Branch { target: t } = &mut last.op {
                *t = target;
            }
        }
    }

    fn build_while(&mut self, condition: &Node, body: &Node) -> Result<ValueId, SemanticError> {
        let pre = self.current;
        let header = self.new_block();
        self.add_edge(pre, header);
        // header is intentionally left unsealed: the back edge from
        // the loop body is not known until after the body is built.
        self.emit_side_effect_in(pre, HirOp::Branch { target: header });

        self.current = header;
        let cond = self.build_expr(condition)?;

        let body_block = self.new_block();
        self.add_edge(header, body_block);
        self.seal(body_block);

        let exit_block = self.new_block();
        self.add_edge(header, exit_block);
        self.seal(exit_block);

        self.emit_side_effect(HirOp::BranchIfZero { condition: cond, target: exit_block });
        self.emit_side_effect(HirOp::Branch { target: body_block });

        self.current = body_block;
        self.build_expr(body)?;
        let body_end = self.current;
        self.add_edge(body_end, header);
        self.emit_side_effect(HirOp::Branch { target: header });

        self.seal(header);

        self.current = exit_block;
        let v = self.frame.next_value(TypeFlags::NIL);
        self.emit(v, HirOp::Constant(Slot::Nil));
        Ok(v.id)
    }

    fn emit_side_effect_in(&mut self, block: BlockId, op: HirOp) {
        self.frame.block_mut(block).statements.push(Hir::side_effect_only(op));
    }
}

fn slot_as_f64(slot: &Slot) -> Option<f64> {
    match slot {
        Slot::Int(v) => Some(*v as f64),
        Slot::Float(v) => Some(*v),
        _ => None,
    }
}

/// Runs trivial-phi elimination to a fixpoint: a phi whose non-self
/// inputs are all the same value is replaced by that value everywhere,
/// and the rewrite is repeated until no further phi qualifies.
pub fn eliminate_trivial_phis(frame: &mut Frame) {
    loop {
        let mut replacement: Option<(ValueId, ValueId)> = None;
        'search: for block in &frame.blocks {
            for stmt in &block.statements {
                if let HirOp::Phi { inputs } = &stmt.op {
                    if let Some(same) = trivial_value(stmt.value.id, inputs) {
                        replacement = Some((stmt.value.id, same));
                        break 'search;
                    }
                }
            }
        }
        let Some((phi_id, same)) = replacement else { break };
        replace_value(frame, phi_id, same);
        remove_phi(frame, phi_id);
    }
}

fn trivial_value(phi_id: ValueId, inputs: &[ValueId]) -> Option<ValueId> {
    let mut same: Option<ValueId> = None;
    for input in inputs {
        if *input == phi_id {
            continue;
        }
        match same {
            None => same = Some(*input),
            Some(s) if s == *input => {}
            Some(_) => return None,
        }
    }
    same
}

fn replace_value(frame: &mut Frame, old: ValueId, new: ValueId) {
    for block in &mut frame.blocks {
        for stmt in &mut block.statements {
            match &mut stmt.op {
                HirOp::Phi { inputs } => {
                    for i in inputs.iter_mut() {
                        if *i == old {
                            *i = new;
                        }
                    }
                }
                op => {
                    replace_operand(op, old, new);
                }
            }
        }
    }
}

fn replace_operand(op: &mut HirOp, old: ValueId, new: ValueId) {
    let mut replace = |v: &mut ValueId| {
        if *v == old {
            *v = new;
        }
    };
    match op {
        HirOp::StoreReturn { value }
        | HirOp::ResolveType { value }
        | HirOp::DispatchStoreArg { value }
        | HirOp::DispatchStoreKeyArg { value, .. } => replace(value),
        HirOp::BranchIfZero { condition, .. } => replace(condition),
        HirOp::LoadInstanceVariable { object, .. } | HirOp::LoadInstanceVariableType { object, .. } => {
            replace(object)
        }
        HirOp::StoreInstanceVariable { object, value, .. } => {
            replace(object);
            replace(value);
        }
        HirOp::StoreClassVariable { value, .. } => replace(value),
        _ => {}
    }
}

fn remove_phi(frame: &mut Frame, phi_id: ValueId) {
    for block in &mut frame.blocks {
        block.phis.retain(|v| *v != phi_id);
        block.statements.retain(|stmt| !(stmt.value.id == phi_id && matches!(stmt.op, HirOp::Phi { .. })));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn build_source(src: &str) -> Frame {
        let tokens = Lexer::new(src).tokenize().unwrap();
        let root = Parser::new(tokens).parse().unwrap();
        build(&root).unwrap()
    }

    #[test]
    fn nil_lowers_to_single_block_with_store_return() {
        let frame = build_source("nil");
        assert_eq!(frame.blocks.len(), 1);
        let has_store_return = frame.blocks[0]
            .statements
            .iter()
            .any(|s| matches!(s.op, HirOp::StoreReturn { .. }));
        assert!(has_store_return);
    }

    #[test]
    fn constant_binop_folds_at_build_time() {
        let frame = build_source("1 + 2");
        let constants: Vec<_> = frame.blocks[0]
            .statements
            .iter()
            .filter_map(|s| match &s.op {
                HirOp::Constant(slot) => Some(*slot),
                _ => None,
            })
            .collect();
        assert!(constants.contains(&Slot::Int(3)));
    }

    #[test]
    fn variable_self_add_lowers_through_dispatch() {
        let frame = build_source("var x = 3; x + x");
        let has_dispatch = frame.blocks[0]
            .statements
            .iter()
            .any(|s| matches!(s.op, HirOp::DispatchCall { .. }));
        assert!(has_dispatch);
    }

    #[test]
    fn if_with_both_branches_produces_four_blocks_and_a_phi() {
        let frame = build_source("var a = true; if (a) {1} {2}");
        assert_eq!(frame.blocks.len(), 4);
        let join = &frame.blocks[3];
        assert_eq!(join.predecessors.len(), 2);
        assert!(!join.phis.is_empty());
    }

    #[test]
    fn while_loop_header_carries_phi_for_loop_variable() {
        let frame = build_source("var i = 0; while {i < 10} {i = i + 1}");
        // header is block 1 (0 = pre-loop entry)
        let header = &frame.blocks[1];
        assert_eq!(header.predecessors.len(), 2);
        assert!(!header.phis.is_empty());
    }

    /// Collection/range literals must dispatch against their actually
    /// evaluated elements, not silently fold to a nil placeholder (a
    /// prior defect: the elements were built then discarded).
    #[test]
    fn array_literal_lowers_through_dispatch_over_its_elements() {
        let frame = build_source("[1, 2, 3]");
        let dispatches: Vec<_> = frame.blocks[0]
            .statements
            .iter()
            .filter_map(|s| match &s.op {
                HirOp::DispatchCall { selector, num_args } => Some((*selector, *num_args)),
                _ => None,
            })
            .collect();
        assert_eq!(dispatches, vec![(SymbolHash::of("array"), 3)]);
    }

    #[test]
    fn event_literal_lowers_through_dispatch_with_keyword_args() {
        let frame = build_source("(a: 1, b: 2)");
        let has_dispatch = frame.blocks[0]
            .statements
            .iter()
            .any(|s| matches!(&s.op, HirOp::DispatchCall { selector, .. } if *selector == SymbolHash::of("event")));
        assert!(has_dispatch);
        let key_args = frame.blocks[0]
            .statements
            .iter()
            .filter(|s| matches!(s.op, HirOp::DispatchStoreKeyArg { .. }))
            .count();
        assert_eq!(key_args, 2);
    }

    #[test]
    fn series_literal_lowers_through_dispatch_over_start_step_end() {
        let frame = build_source("(1, 3 .. 10)");
        let has_dispatch = frame.blocks[0]
            .statements
            .iter()
            .any(|s| matches!(&s.op, HirOp::DispatchCall { selector, num_args } if *selector == SymbolHash::of("series") && *num_args == 3));
        assert!(has_dispatch);
    }

    #[test]
    fn copy_series_lowers_through_dispatch_with_target_as_receiver() {
        let frame = build_source("var x = [1, 2, 3]; x[0..1]");
        let has_dispatch = frame.blocks[0]
            .statements
            .iter()
            .any(|s| matches!(&s.op, HirOp::DispatchCall { selector, .. } if *selector == SymbolHash::of("copySeries")));
        assert!(has_dispatch);
    }

    #[test]
    fn string_literal_lowers_through_dispatch_instead_of_folding_to_nil() {
        let frame = build_source(r#""hello""#);
        let has_dispatch = frame.blocks[0]
            .statements
            .iter()
            .any(|s| matches!(&s.op, HirOp::DispatchCall { selector, .. } if *selector == SymbolHash::of("string")));
        assert!(has_dispatch);
        let interned_text = frame.blocks[0].statements.iter().any(|s| {
            matches!(&s.op, HirOp::Constant(Slot::Symbol(hash)) if *hash == SymbolHash::of("hello"))
        });
        assert!(interned_text, "the literal's text must survive as an interned symbol constant");
    }

    #[test]
    fn array_write_dispatches_a_put_and_still_evaluates_to_the_assigned_value() {
        let frame = build_source("var x = [1, 2, 3]; x[0] = 9");
        let has_put = frame.blocks[0]
            .statements
            .iter()
            .any(|s| matches!(&s.op, HirOp::DispatchCall { selector, .. } if *selector == SymbolHash::of("put")));
        assert!(has_put);
    }

    #[test]
    fn trivial_phi_elimination_is_idempotent() {
        let mut frame = build_source("var a = true; if (a) {1} {2}");
        eliminate_trivial_phis(&mut frame);
        let once = frame.clone();
        eliminate_trivial_phis(&mut frame);
        assert_eq!(once, frame);
    }
}
