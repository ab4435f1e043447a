//! The function table (§4.3 "forward references among functions work at
//! top level", §4.5 "Call to native/compiled: loads the function address
//! into a pointer register … emits call")
//!
//! User-defined function addresses aren't known until each function's body
//! has been fully emitted, so a call to a not-yet-compiled function can't be
//! a direct relative `call`. Instead every top-level function gets a slot in
//! this table during the global parser's signature-collection pass; calls
//! compile to "load the slot's address as an absolute immediate, load the
//! pointer out of it, call through the register". The global parser patches
//! each slot once its function finishes compiling.
//!
//! The table's backing storage must outlive every [`crate::CompiledFunction`]
//! whose machine code embeds a slot address, so a [`crate::Scope`] owns one
//! alongside its compiled functions.

use std::sync::atomic::{AtomicUsize, Ordering};

pub struct FunctionTable {
    slots: Box<[AtomicUsize]>,
}

impl FunctionTable {
    /// Allocate `len` slots, one per top-level function, all initially null.
    pub fn new(len: usize) -> Self {
        let mut slots = Vec::with_capacity(len);
        slots.resize_with(len, || AtomicUsize::new(0));
        FunctionTable {
            slots: slots.into_boxed_slice(),
        }
    }

    /// Absolute address of slot `idx`, the value the emitter bakes into a
    /// `mov reg, imm64` for a forward call.
    pub fn slot_address(&self, idx: usize) -> usize {
        &self.slots[idx] as *const AtomicUsize as usize
    }

    /// Patch slot `idx` with a function's entry address once it has
    /// finished compiling.
    pub fn set(&self, idx: usize, address: usize) {
        self.slots[idx].store(address, Ordering::Release);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_address_is_stable_across_patches() {
        let table = FunctionTable::new(2);
        let addr = table.slot_address(1);
        table.set(1, 0xdead_beef);
        assert_eq!(table.slot_address(1), addr);
        assert_eq!(
            unsafe { *(addr as *const usize) },
            0xdead_beef
        );
    }

    #[test]
    fn fresh_slots_are_null() {
        let table = FunctionTable::new(3);
        for i in 0..3 {
            assert_eq!(unsafe { *(table.slot_address(i) as *const usize) }, 0);
        }
    }
}
