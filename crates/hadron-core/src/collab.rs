//! Injected collaborators. The compiler core calls into these; their
//! implementations live entirely outside this workspace (heap/GC,
//! symbol interning, JIT memory management, runtime stack plumbing).
//! We specify only the trait boundary, plus small in-crate test
//! doubles so the pipeline can be exercised without a real runtime.

use crate::hash::SymbolHash;
use crate::slot::HeapPtr;
use std::collections::HashMap;

/// Allocates raw and object memory on the runtime heap. The compiler
/// core only uses this for building symbol/identifier tables it owns;
/// it never allocates user objects itself.
pub trait Heap {
    fn allocate(&mut self, bytes: usize) -> HeapPtr;
    fn allocate_object(&mut self, class_hash: SymbolHash, bytes: usize) -> HeapPtr;
}

/// Interns identifier/symbol text into a stable hash. Must be injective
/// in practice: the core assumes no collisions among identifiers used
/// in one compile job.
pub trait SymbolTable {
    fn intern(&mut self, bytes: &[u8]) -> SymbolHash;
}

/// A block of memory the emitter can write native code into and later
/// make executable. On W^X platforms `mark_for_write`/`mark_for_execute`
/// toggle the thread-local compiling/executing discipline; the core
/// never manipulates that discipline directly, only calls through this
/// trait.
pub trait JitBuffer {
    type Error: std::fmt::Debug;

    fn allocate(&mut self, bytes: usize) -> Result<(), Self::Error>;
    fn mark_for_write(&mut self);
    fn mark_for_execute(&mut self);
    fn write(&mut self, offset: usize, bytes: &[u8]);
    /// Truncates/commits the buffer to exactly `size` bytes and returns
    /// its base address for trampoline dispatch.
    fn finalize(&mut self, size: usize) -> *const u8;
}

/// Stable-offset fields of the runtime's per-thread context. The core
/// emits loads/stores against these offsets; it does not interpret the
/// values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ThreadContextLayout {
    pub c_stack_pointer_offset: usize,
    pub frame_pointer_offset: usize,
    pub stack_pointer_offset: usize,
    pub interrupt_code_offset: usize,
    pub exit_machine_code_offset: usize,
}

/// An in-memory `Heap`/`SymbolTable` double sufficient for the compiler
/// core's own tests and for embedders that don't yet have a runtime
/// heap wired up. Not suitable for production use: `allocate` never
/// reclaims memory.
#[derive(Debug, Default)]
pub struct NullHeap {
    next: u64,
}

impl Heap for NullHeap {
    fn allocate(&mut self, bytes: usize) -> HeapPtr {
        let ptr = HeapPtr(self.next);
        self.next += bytes.max(1) as u64;
        ptr
    }

    fn allocate_object(&mut self, _class_hash: SymbolHash, bytes: usize) -> HeapPtr {
        self.allocate(bytes)
    }
}

/// An in-memory `SymbolTable` double backed by a `HashMap`.
#[derive(Debug, Default)]
pub struct NullSymbolTable {
    interned: HashMap<Vec<u8>, SymbolHash>,
}

impl SymbolTable for NullSymbolTable {
    fn intern(&mut self, bytes: &[u8]) -> SymbolHash {
        if let Some(hash) = self.interned.get(bytes) {
            return *hash;
        }
        let hash = SymbolHash::of(&String::from_utf8_lossy(bytes));
        self.interned.insert(bytes.to_vec(), hash);
        hash
    }
}

/// An in-memory `JitBuffer` double backed by a growable `Vec<u8>`. Never
/// actually marks pages executable; used by `TestAssembler` and the
/// pipeline's own integration tests.
#[derive(Debug, Default)]
pub struct NullJitBuffer {
    bytes: Vec<u8>,
    writable: bool,
}

impl JitBuffer for NullJitBuffer {
    type Error = std::convert::Infallible;

    fn allocate(&mut self, bytes: usize) -> Result<(), Self::Error> {
        self.bytes = vec![0u8; bytes];
        self.writable = true;
        Ok(())
    }

    fn mark_for_write(&mut self) {
        self.writable = true;
    }

    fn mark_for_execute(&mut self) {
        self.writable = false;
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) {
        debug_assert!(self.writable, "wrote to a NullJitBuffer marked executable");
        self.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn finalize(&mut self, size: usize) -> *const u8 {
        self.bytes.truncate(size);
        self.bytes.as_ptr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_symbol_table_is_injective_for_distinct_inputs() {
        let mut table = NullSymbolTable::default();
        let a = table.intern(b"foo");
        let b = table.intern(b"bar");
        assert_ne!(a, b);
        assert_eq!(table.intern(b"foo"), a);
    }

    #[test]
    fn null_jit_buffer_round_trips_written_bytes() {
        let mut buf = NullJitBuffer::default();
        buf.allocate(16).unwrap();
        buf.mark_for_write();
        buf.write(0, &[1, 2, 3, 4]);
        let base = buf.finalize(4);
        assert!(!base.is_null());
    }
}
