//! Abstract syntax tree produced by the parser.
//!
//! Sibling sequences (statement lists, argument lists) are built into an
//! owned `Vec` during parsing rather than a linked list with a cached
//! tail pointer: children accumulate into an owned vector as the parser
//! descends, then freeze into a slice. Each node still carries the
//! index of the token that names it, mirroring the original's per-node
//! token reference.

use hadron_core::{Slot, SymbolHash};

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Index into the parser's token stream of the token that "names"
    /// this node — usually the head token of the production.
    pub token_index: usize,
    pub kind: NodeKind,
}

impl Node {
    pub fn new(token_index: usize, kind: NodeKind) -> Node {
        Node { token_index, kind }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDef {
    pub name: SymbolHash,
    pub initial: Option<Box<Node>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArgList {
    pub args: Vec<VarDef>,
    /// `...rest` tail, if present.
    pub var_args: Option<SymbolHash>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeywordArg {
    pub name: SymbolHash,
    pub value: Box<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Literal(Slot),
    Symbol(SymbolHash),
    Str(String),
    /// A name reference. `is_global` is set for `~name`.
    /// `is_class_name` is set when the reference came from a
    /// `ClassName` token used bare (no `(args)`/`{block}` constructor
    /// sugar) — structurally identical to a variable read, but not a
    /// valid assignment target (class bindings aren't reassignable).
    Name { hash: SymbolHash, is_global: bool, is_class_name: bool },

    VarDef(VarDef),
    VarList(Vec<VarDef>),
    ArgList(ArgList),

    /// `arguments`/`locals` and body-expression-sequence.
    Block {
        arguments: ArgList,
        locals: Vec<VarDef>,
        body: Vec<Node>,
    },

    Method {
        name: SymbolHash,
        is_class_method: bool,
        primitive_index: Option<i32>,
        body: Box<Node>,
    },

    ClassDef {
        name: SymbolHash,
        metaclass_name: Option<SymbolHash>,
        superclass: Option<SymbolHash>,
        class_vars: Vec<VarDef>,
        instance_vars: Vec<VarDef>,
        methods: Vec<Node>,
    },

    ClassExtension {
        name: SymbolHash,
        methods: Vec<Node>,
    },

    /// `name = value`, including `~global = value`. `is_class_name`
    /// carries through from the target `Name` so the semantic analyzer
    /// can reject assignment to a class binding — the parser only
    /// resolves assignment-target *shape*, not this kind
    /// of semantic validity.
    Assign {
        name: SymbolHash,
        is_global: bool,
        is_class_name: bool,
        value: Box<Node>,
    },

    /// `target.name = value`.
    Setter {
        target: Box<Node>,
        name: SymbolHash,
        value: Box<Node>,
    },

    ArrayLiteral(Vec<Node>),
    /// Event (dictionary) literal: `(key: value, ...)`.
    Event(Vec<KeywordArg>),

    /// Arithmetic progression `(a, b .. c)`.
    Series {
        start: Box<Node>,
        step: Option<Box<Node>>,
        end: Box<Node>,
    },

    /// Slice `x[a..b]`.
    CopySeries {
        target: Box<Node>,
        start: Box<Node>,
        end: Box<Node>,
    },

    Call {
        target: Option<Box<Node>>,
        selector: SymbolHash,
        positional_args: Vec<Node>,
        keyword_args: Vec<KeywordArg>,
    },

    BinopCall {
        selector: SymbolHash,
        left: Box<Node>,
        right: Box<Node>,
    },

    /// `Class(args)` / `Class{ block }` sugar.
    New {
        class_name: SymbolHash,
        positional_args: Vec<Node>,
        keyword_args: Vec<KeywordArg>,
        block_arg: Option<Box<Node>>,
    },

    ArrayRead {
        target: Box<Node>,
        index: Box<Node>,
    },

    ArrayWrite {
        target: Box<Node>,
        index: Box<Node>,
        value: Box<Node>,
    },

    If {
        condition: Box<Node>,
        then_branch: Box<Node>,
        else_branch: Option<Box<Node>>,
    },

    While {
        condition: Box<Node>,
        body: Box<Node>,
    },

    /// The `_` placeholder in a curried call.
    CurryArgument,

    Return(Box<Node>),
}
