//! Global variables (§3 "Global")
//!
//! A global is `(name, type, storage slot, const-flag, optional owned
//! buffer)`. Storage is one 8-byte cell, wide enough for a `double`; a
//! buffer-typed global additionally owns a [`Buffer`] and its slot holds
//! the stable address of that buffer's [`BufferHandle`].
//!
//! The slot's address must never move once a function has been compiled
//! against it (§5 "Globals' storage slots: stable addresses") — it is
//! boxed so the allocation survives moves of the owning `Global`/`Scope`.

use std::cell::Cell;

use crate::buffer::Buffer;
use crate::types::Type;

/// An 8-byte storage cell at a fixed heap address.
pub struct GlobalSlot {
    cell: Box<Cell<u64>>,
}

impl GlobalSlot {
    pub fn zeroed() -> Self {
        GlobalSlot {
            cell: Box::new(Cell::new(0)),
        }
    }

    /// Address of the storage cell. This is the absolute address the
    /// emitter compiles loads/stores against (§4.5).
    pub fn address(&self) -> usize {
        self.cell.as_ref() as *const Cell<u64> as usize
    }

    pub fn read_bits(&self) -> u64 {
        self.cell.get()
    }

    pub fn write_bits(&self, bits: u64) {
        self.cell.set(bits);
    }

    pub fn read_i32(&self) -> i32 {
        self.cell.get() as u32 as i32
    }

    pub fn write_i32(&self, v: i32) {
        self.cell.set(v as u32 as u64);
    }

    pub fn read_bool(&self) -> bool {
        (self.cell.get() & 0xff) != 0
    }

    pub fn write_bool(&self, v: bool) {
        self.cell.set(if v { 1 } else { 0 });
    }

    pub fn read_f32(&self) -> f32 {
        f32::from_bits(self.cell.get() as u32)
    }

    pub fn write_f32(&self, v: f32) {
        self.cell.set(v.to_bits() as u64);
    }

    pub fn read_f64(&self) -> f64 {
        f64::from_bits(self.cell.get())
    }

    pub fn write_f64(&self, v: f64) {
        self.cell.set(v.to_bits());
    }

    /// Address of a buffer's `BufferHandle`, stored as a raw pointer-sized
    /// integer.
    pub fn read_ptr(&self) -> usize {
        self.cell.get() as usize
    }

    pub fn write_ptr(&self, addr: usize) {
        self.cell.set(addr as u64);
    }
}

pub struct Global {
    pub name: String,
    pub ty: Type,
    pub is_const: bool,
    pub slot: GlobalSlot,
    pub buffer: Option<Buffer>,
}

impl Global {
    pub fn new_scalar(name: impl Into<String>, ty: Type, is_const: bool) -> Self {
        assert_ne!(ty, Type::Buffer, "use Global::new_buffer for Buffer globals");
        Global {
            name: name.into(),
            ty,
            is_const,
            slot: GlobalSlot::zeroed(),
            buffer: None,
        }
    }

    pub fn new_buffer(name: impl Into<String>, size: usize) -> Self {
        let buffer = Buffer::new(size);
        let slot = GlobalSlot::zeroed();
        slot.write_ptr(buffer.handle_address());
        Global {
            name: name.into(),
            ty: Type::Buffer,
            is_const: false,
            slot,
            buffer: Some(buffer),
        }
    }

    /// Rebind this global's slot to a fresh buffer (the "set global" entry
    /// of §4.4's `buf.setSize` / host-supplied buffer replacement).
    pub fn rebind_buffer(&mut self, buffer: Buffer) {
        assert_eq!(self.ty, Type::Buffer);
        self.slot.write_ptr(buffer.handle_address());
        self.buffer = Some(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_roundtrip() {
        let g = Global::new_scalar("x", Type::Float, false);
        g.slot.write_f32(0.5);
        assert_eq!(g.slot.read_f32(), 0.5);
    }

    #[test]
    fn buffer_global_slot_points_at_handle() {
        let g = Global::new_buffer("b", 4);
        let buf = g.buffer.as_ref().unwrap();
        assert_eq!(g.slot.read_ptr(), buf.handle_address());
    }
}
