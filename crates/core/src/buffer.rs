//! The buffer type (§3 "Buffer type")
//!
//! A buffer is a fixed-size, reference-counted array of `f32`. Indexing is
//! by `int`. Every buffer owns an *overflow sentinel*, an integer initialised
//! to -1 that records the offending index on the first out-of-range access
//! in safe mode (§3, §8 scenario 5).
//!
//! `BufferHandle` is the `#[repr(C)]` struct compiled code actually touches:
//! its address is baked into a global's storage slot at compile time and
//! never changes for the scope's lifetime, even across a `setSize` resize
//! (§5 "Buffer backing: shared-handle semantics; resizing a buffer replaces
//! its backing atomically from the perspective of the resizer"). Only the
//! fields *inside* the handle move. The handle owns its sample storage
//! directly (a raw allocation, not a `Vec`) so that [`jit_buffer_set_size`]
//! can be called from emitted machine code against nothing but a
//! `*mut BufferHandle` — no Rust-side collection to keep in sync.

use std::alloc::{self, Layout};
use std::sync::{Arc, Mutex};

/// Machine-visible buffer header. Field order and layout matter: the
/// emitter reads `data`, `len` and `sentinel` via fixed byte offsets from a
/// `BufferHandle*` loaded out of the owning global's storage slot.
#[repr(C)]
pub struct BufferHandle {
    pub data: *mut f32,
    pub len: i64,
    pub sentinel: i64,
}

// SAFETY: the raw pointer inside `BufferHandle` only ever points at a
// `BufferHandle`-private allocation; all mutation of the pointee happens
// either from the single compile-role thread or from native code whose
// lifetime is tied to the owning `Buffer`/`Scope`.
unsafe impl Send for BufferHandle {}

fn alloc_samples(len: usize) -> *mut f32 {
    if len == 0 {
        return std::ptr::null_mut();
    }
    let layout = Layout::array::<f32>(len).expect("buffer size overflow");
    // SAFETY: layout is non-zero-sized since len > 0.
    let ptr = unsafe { alloc::alloc_zeroed(layout) } as *mut f32;
    assert!(!ptr.is_null(), "buffer allocation failed");
    ptr
}

fn dealloc_samples(ptr: *mut f32, len: usize) {
    if len == 0 || ptr.is_null() {
        return;
    }
    let layout = Layout::array::<f32>(len).expect("buffer size overflow");
    // SAFETY: `ptr` was returned by `alloc_samples` with this same `len`.
    unsafe { alloc::dealloc(ptr as *mut u8, layout) };
}

/// `buf.setSize(n)` (§4.4), bound directly by address (not through the
/// natives table) into emitted code, since its receiver is a raw handle
/// pointer rather than a value the exposed-native ABI can express.
/// Bypasses the buffer's `Mutex` entirely — compiled code must never take a
/// lock (§5) — so calling it from the audio thread is the caller's hazard,
/// same as the reallocation it performs (§5 "callers must resize off the
/// audio thread").
pub extern "C" fn jit_buffer_set_size(handle: *mut BufferHandle, new_size: i32) {
    // SAFETY: `handle` is the address baked into a buffer global's storage
    // slot at compile time, which stays valid for the scope's lifetime.
    unsafe {
        let h = &mut *handle;
        let old_len = h.len.max(0) as usize;
        let new_len = new_size.max(0) as usize;
        let new_ptr = alloc_samples(new_len);
        dealloc_samples(h.data, old_len);
        h.data = new_ptr;
        h.len = new_len as i64;
        h.sentinel = -1;
    }
}

/// The safe-mode out-of-range handler (§4.4 "emit a call to an out-of-range
/// handler that stores i into the buffer's overflow sentinel"), bound by
/// address the same way as [`jit_buffer_set_size`].
pub extern "C" fn jit_buffer_mark_overflow(handle: *mut BufferHandle, index: i32) {
    // SAFETY: see `jit_buffer_set_size`.
    unsafe {
        (*handle).sentinel = index as i64;
    }
}

struct BufferState {
    handle: Box<BufferHandle>,
}

impl Drop for BufferState {
    fn drop(&mut self) {
        dealloc_samples(self.handle.data, self.handle.len.max(0) as usize);
    }
}

/// A shared handle to a buffer global. Cloning a `Buffer` shares the
/// backing storage (§3: "a variable of buffer type is a shared handle").
#[derive(Clone)]
pub struct Buffer {
    inner: Arc<Mutex<BufferState>>,
}

impl Buffer {
    /// Allocate a new buffer of `size` samples, zero-initialised, with the
    /// overflow sentinel reset to -1.
    pub fn new(size: usize) -> Self {
        let data = alloc_samples(size);
        let handle = Box::new(BufferHandle {
            data,
            len: size as i64,
            sentinel: -1,
        });
        Buffer {
            inner: Arc::new(Mutex::new(BufferState { handle })),
        }
    }

    /// Address of the `BufferHandle`, stable for the buffer's lifetime.
    /// This is the value baked into the owning global's storage slot.
    pub fn handle_address(&self) -> usize {
        let state = self.inner.lock().expect("buffer lock poisoned");
        state.handle.as_ref() as *const BufferHandle as usize
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("buffer lock poisoned").handle.len.max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overflow sentinel value; -1 means no out-of-range access has
    /// occurred since creation or the last reset.
    pub fn sentinel(&self) -> i64 {
        self.inner.lock().expect("buffer lock poisoned").handle.sentinel
    }

    pub fn reset_sentinel(&self) {
        self.inner.lock().expect("buffer lock poisoned").handle.sentinel = -1;
    }

    pub fn read(&self, index: usize) -> Option<f32> {
        let state = self.inner.lock().expect("buffer lock poisoned");
        let len = state.handle.len.max(0) as usize;
        if index >= len {
            return None;
        }
        // SAFETY: index < len, and `data` points at a `len`-element allocation.
        Some(unsafe { *state.handle.data.add(index) })
    }

    pub fn write(&self, index: usize, value: f32) -> bool {
        let mut state = self.inner.lock().expect("buffer lock poisoned");
        let len = state.handle.len.max(0) as usize;
        if index >= len {
            return false;
        }
        // SAFETY: index < len, and `data` points at a `len`-element allocation.
        unsafe { *state.handle.data.add(index) = value };
        true
    }

    pub fn to_vec(&self) -> Vec<f32> {
        let state = self.inner.lock().expect("buffer lock poisoned");
        let len = state.handle.len.max(0) as usize;
        if len == 0 {
            return Vec::new();
        }
        // SAFETY: `data` points at a `len`-element allocation.
        unsafe { std::slice::from_raw_parts(state.handle.data, len).to_vec() }
    }

    /// `buf.setSize(n)` (§4.4): reallocate the backing storage and
    /// repoint the stable `BufferHandle` at it. Must only be called off
    /// the audio thread (§5). The host-facing equivalent of
    /// [`jit_buffer_set_size`], but taking the lock this crate's own API
    /// promises (unlike the version emitted code calls directly).
    pub fn set_size(&self, new_size: usize) {
        let mut state = self.inner.lock().expect("buffer lock poisoned");
        let old_len = state.handle.len.max(0) as usize;
        let old_ptr = state.handle.data;
        let new_ptr = alloc_samples(new_size);
        dealloc_samples(old_ptr, old_len);
        state.handle.data = new_ptr;
        state.handle.len = new_size as i64;
        state.handle.sentinel = -1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_buffer_has_sentinel_of_minus_one() {
        let buf = Buffer::new(8);
        assert_eq!(buf.sentinel(), -1);
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn read_write_roundtrip() {
        let buf = Buffer::new(4);
        assert!(buf.write(2, 1.5));
        assert_eq!(buf.read(2), Some(1.5));
        assert_eq!(buf.read(10), None);
    }

    #[test]
    fn clone_shares_storage() {
        let buf = Buffer::new(2);
        let other = buf.clone();
        buf.write(0, 42.0);
        assert_eq!(other.read(0), Some(42.0));
    }

    #[test]
    fn set_size_replaces_backing_but_not_handle_address() {
        let buf = Buffer::new(2);
        let addr_before = buf.handle_address();
        buf.set_size(16);
        assert_eq!(buf.handle_address(), addr_before);
        assert_eq!(buf.len(), 16);
        assert_eq!(buf.sentinel(), -1);
    }

    #[test]
    fn jit_entry_points_operate_on_raw_handle() {
        let buf = Buffer::new(2);
        let handle = buf.handle_address() as *mut BufferHandle;
        jit_buffer_mark_overflow(handle, 7);
        assert_eq!(buf.sentinel(), 7);

        jit_buffer_set_size(handle, 5);
        assert_eq!(buf.len(), 5);
        assert_eq!(buf.sentinel(), -1);
    }

    #[test]
    fn empty_buffer_has_null_data_and_is_safe_to_read() {
        let buf = Buffer::new(0);
        assert!(buf.is_empty());
        assert_eq!(buf.read(0), None);
    }
}
