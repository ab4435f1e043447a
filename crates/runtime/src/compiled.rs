//! Compiled functions (§3 "Compiled function")
//!
//! `(name, signature, pointer into emitted code, holder of its
//! assembler/runtime objects for lifetime)`. Each compiled function owns
//! the executable page(s) backing it; dropping the last `CompiledFunction`
//! (or the `Scope` holding it) frees them (§3 "Scope" lifecycle, §5
//! "Executable pages: owned by the scope; never shared between scopes").

use dynasmrt::ExecutableBuffer;
use jit_core::Signature;

use crate::native::NativeSignature;

pub struct CompiledFunction {
    pub name: String,
    pub signature: Signature,
    code: ExecutableBuffer,
    entry: dynasmrt::AssemblyOffset,
}

impl CompiledFunction {
    pub fn new(name: impl Into<String>, signature: Signature, code: ExecutableBuffer, entry: dynasmrt::AssemblyOffset) -> Self {
        CompiledFunction {
            name: name.into(),
            signature,
            code,
            entry,
        }
    }

    pub fn raw_pointer(&self) -> *const u8 {
        self.code.ptr(self.entry)
    }

    /// Typed retrieval: checks the requested Rust function-pointer type's
    /// §4.3 signature against the one recorded at compile time before
    /// handing back a pointer, returning `None` (never transmuting
    /// blindly) on mismatch.
    pub fn typed<F: NativeSignature>(&self) -> Option<F> {
        if F::jit_signature() != self.signature {
            return None;
        }
        let raw = self.raw_pointer();
        // SAFETY: F is an `extern "C" fn(...)` pointer type of the exact
        // signature just checked against `self.signature`, and `raw` points
        // at code emitted for that signature with that calling convention.
        Some(unsafe { std::mem::transmute_copy::<*const u8, F>(&raw) })
    }
}
