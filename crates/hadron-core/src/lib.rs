//! Hadron Core: tagged-value model and injected-collaborator traits
//!
//! This crate is the language-agnostic foundation shared by every stage
//! of the Hadron compiler pipeline. It is deliberately small: it knows
//! about `Slot` (the tagged-value atom every later IR is built from),
//! stable symbol hashing, and the trait boundaries to the runtime
//! collaborators (`Heap`, `SymbolTable`, `JitBuffer`, thread-context
//! layout) that live outside this workspace.
//!
//! # Modules
//!
//! - `slot`: the `Slot` tagged-value atom and `TypeFlags`
//! - `hash`: stable textual hashing for identifiers and symbols
//! - `collab`: injected-collaborator traits plus in-memory test doubles

pub mod collab;
pub mod hash;
pub mod slot;

pub use collab::{Heap, JitBuffer, NullHeap, NullJitBuffer, NullSymbolTable, SymbolTable, ThreadContextLayout};
pub use hash::SymbolHash;
pub use slot::{HeapPtr, Slot, TypeFlags};
