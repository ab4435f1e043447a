//! Stack frame bookkeeping and the small fixed set of scratch registers the
//! emitter reuses for every node.
//!
//! Expressions in this language are small (no loops, at most two params,
//! flat statement lists) so there's no need for a real register allocator:
//! every local, parameter and intermediate value gets its own 8-byte slot in
//! the function's stack frame, and a handful of callee-saved/scratch
//! registers are reloaded from and spilled back to those slots around each
//! operation. This mirrors the stack-slot-plus-reused-work-registers style
//! of the dynasm-rs backend this emitter is grounded on (`WR0`/`WR1`/`WR2`
//! below play the same role as that backend's `WR0..WR2`).

use std::collections::HashMap;

use dynasmrt::x64::{Rq, Rx};
use jit_core::Type;

/// General-purpose scratch registers, callee-saved so a value can survive a
/// call to a native or compiled function without extra bookkeeping. Saved in
/// the prologue and restored in the epilogue of every function that uses
/// them (all of them do, in practice).
pub const WR0: Rq = Rq::R12;
pub const WR1: Rq = Rq::R13;
/// Holds a `BufferHandle*` while a buffer index/method-call node is emitted.
pub const WRB: Rq = Rq::R14;

/// Scalar-float/double scratch registers. Caller-saved in the SysV ABI, but
/// since nothing here keeps an xmm value live across a call (everything is
/// spilled to its frame slot first), that's never an issue.
pub const XR0: Rx = Rx::XMM2;
pub const XR1: Rx = Rx::XMM3;

/// One 8-byte cell per slot, addressed `[rbp - 8*(slot+1)]`.
pub struct Frame {
    next_slot: usize,
    locals: HashMap<String, (usize, Type, bool)>,
}

impl Frame {
    pub fn new() -> Self {
        Frame {
            next_slot: 0,
            locals: HashMap::new(),
        }
    }

    /// Reserve a slot for a named local/parameter/shadowed global and
    /// record its type. Redeclaring a name repoints it at a fresh slot.
    pub fn declare(&mut self, name: &str, ty: Type, is_const: bool) -> usize {
        let slot = self.next_slot;
        self.next_slot += 1;
        self.locals.insert(name.to_string(), (slot, ty, is_const));
        slot
    }

    /// Reserve an unnamed slot for an expression temporary.
    pub fn temp_slot(&mut self) -> usize {
        let slot = self.next_slot;
        self.next_slot += 1;
        slot
    }

    pub fn lookup(&self, name: &str) -> Option<(usize, Type, bool)> {
        self.locals.get(name).copied()
    }

    /// Byte displacement from `rbp` for `slot` (always negative from rbp's
    /// perspective; callers subtract this).
    pub fn slot_offset(slot: usize) -> i32 {
        8 * (slot as i32 + 1)
    }

    /// Total stack space to reserve, rounded up to keep `rsp` 16-byte
    /// aligned at the point of any `call`.
    pub fn frame_size(&self) -> i32 {
        let bytes = (self.next_slot as i32) * 8;
        (bytes + 15) & !15
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_distinct_and_ordered() {
        let mut frame = Frame::new();
        let a = frame.declare("a", Type::Int, false);
        let b = frame.declare("b", Type::Float, true);
        assert_ne!(a, b);
        assert_eq!(frame.lookup("a"), Some((a, Type::Int, false)));
        assert_eq!(frame.lookup("b"), Some((b, Type::Float, true)));
    }

    #[test]
    fn frame_size_is_16_byte_aligned() {
        let mut frame = Frame::new();
        frame.declare("a", Type::Int, false);
        assert_eq!(frame.frame_size() % 16, 0);
    }
}
