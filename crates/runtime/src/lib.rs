//! Host-facing runtime for the expression JIT (§3 Scope/Compiled function,
//! §5 concurrency, §6 host API, §4.6 DSP harness).
//!
//! This crate never parses or emits machine code itself — `jit-compiler`
//! builds a [`Scope`] and hands it to the host. What lives here is what the
//! host (and the realtime audio thread) actually touches: globals
//! introspection, typed function-pointer retrieval, and the three-entry-point
//! DSP adapter.

pub mod compiled;
pub mod error;
pub mod function_table;
pub mod harness;
pub mod host_value;
pub mod native;
pub mod scope;

pub use compiled::CompiledFunction;
pub use error::RuntimeError;
pub use function_table::FunctionTable;
pub use harness::DspHarness;
pub use host_value::HostValue;
pub use native::{NativeFunction, NativeSignature, ScalarRepr};
pub use scope::Scope;

pub use jit_core::{Buffer, BufferHandle, Global, GlobalSlot, Signature, Type};
