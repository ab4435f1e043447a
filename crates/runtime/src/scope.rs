//! The compiled scope (§3 "Scope", §6 host API)
//!
//! A `Scope` is the container returned by a successful compile: it owns
//! every global's storage, every registered native, and every compiled
//! function's executable pages. It lives as long as any of its function
//! pointers is in use; dropping it frees those pages (§3, §5).

use jit_core::{Global, Type};

use crate::compiled::CompiledFunction;
use crate::error::RuntimeError;
use crate::function_table::FunctionTable;
use crate::harness::DspHarness;
use crate::host_value::HostValue;
use crate::native::{NativeFunction, NativeSignature};

pub struct Scope {
    globals: Vec<Global>,
    natives: Vec<NativeFunction>,
    compiled: Vec<CompiledFunction>,
    /// Kept alive only so the absolute addresses compiled functions embed
    /// for forward calls (§4.3, §4.5) stay valid; never read back out.
    _function_table: FunctionTable,
}

impl Scope {
    pub fn new(
        globals: Vec<Global>,
        natives: Vec<NativeFunction>,
        compiled: Vec<CompiledFunction>,
        function_table: FunctionTable,
    ) -> Self {
        tracing::debug!(
            globals = globals.len(),
            natives = natives.len(),
            compiled = compiled.len(),
            function_table_len = function_table.len(),
            "scope constructed"
        );
        Scope {
            globals,
            natives,
            compiled,
            _function_table: function_table,
        }
    }

    // -- introspection (§6) --------------------------------------------

    pub fn global_count(&self) -> usize {
        self.globals.len()
    }

    pub fn compiled_function_count(&self) -> usize {
        self.compiled.len()
    }

    pub fn global_name(&self, index: usize) -> Option<&str> {
        self.globals.get(index).map(|g| g.name.as_str())
    }

    pub fn global_type(&self, index: usize) -> Option<Type> {
        self.globals.get(index).map(|g| g.ty)
    }

    pub fn global_value(&self, index: usize) -> Option<HostValue> {
        let g = self.globals.get(index)?;
        Some(match g.ty {
            Type::Int => HostValue::Number(g.slot.read_i32() as f64),
            Type::Float => HostValue::Number(g.slot.read_f32() as f64),
            Type::Double => HostValue::Number(g.slot.read_f64()),
            Type::Bool => HostValue::Bool(g.slot.read_bool()),
            Type::Buffer => HostValue::Buffer(g.buffer.as_ref().map(|b| b.to_vec()).unwrap_or_default()),
            Type::Void => return None,
        })
    }

    /// Overflow sentinel of the named buffer global (§3, §4.6), or `None`
    /// if no such buffer exists.
    pub fn buffer_sentinel(&self, name: &str) -> Option<i64> {
        let g = self.globals.iter().find(|g| g.name == name)?;
        g.buffer.as_ref().map(|b| b.sentinel())
    }

    fn find_global(&self, name: &str) -> Option<usize> {
        self.globals.iter().position(|g| g.name == name)
    }

    pub(crate) fn globals(&self) -> &[Global] {
        &self.globals
    }

    /// `scope.setGlobal(name, value)` (§6): type-checked write.
    pub fn set_global(&self, name: &str, value: HostValue) -> Result<(), RuntimeError> {
        let idx = self
            .find_global(name)
            .ok_or_else(|| RuntimeError::UnknownGlobal(name.to_string()))?;
        let g = &self.globals[idx];

        if g.is_const {
            return Err(RuntimeError::ConstAssignment(name.to_string()));
        }

        match (&value, g.ty) {
            (HostValue::Number(n), Type::Int) => g.slot.write_i32(*n as i32),
            (HostValue::Number(n), Type::Float) => g.slot.write_f32(*n as f32),
            (HostValue::Number(n), Type::Double) => g.slot.write_f64(*n),
            (HostValue::Number(n), Type::Bool) => g.slot.write_bool(*n > 0.0),
            (HostValue::Bool(b), Type::Bool) => g.slot.write_bool(*b),
            (HostValue::Bool(b), Type::Int) => g.slot.write_i32(if *b { 1 } else { 0 }),
            (HostValue::Bool(b), Type::Float) => g.slot.write_f32(if *b { 1.0 } else { 0.0 }),
            (HostValue::Bool(b), Type::Double) => g.slot.write_f64(if *b { 1.0 } else { 0.0 }),
            (HostValue::Buffer(data), Type::Buffer) => {
                if let Some(buf) = &g.buffer {
                    buf.set_size(data.len());
                    for (i, v) in data.iter().enumerate() {
                        buf.write(i, *v);
                    }
                } else {
                    return Err(RuntimeError::TypeMismatch {
                        global: name.to_string(),
                        reason: "global has no backing buffer".to_string(),
                    });
                }
            }
            _ => {
                return Err(RuntimeError::TypeMismatch {
                    global: name.to_string(),
                    reason: format!("cannot assign {:?} to {}", value, g.ty),
                });
            }
        }
        Ok(())
    }

    // -- functions --------------------------------------------------------

    pub fn get_native(&self, name: &str) -> Option<&NativeFunction> {
        self.natives.iter().find(|n| n.name == name)
    }

    pub fn get_compiled(&self, name: &str) -> Option<&CompiledFunction> {
        self.compiled.iter().find(|c| c.name == name)
    }

    /// `scope.getFunction<R(P...)>(name)` (§6): typed compiled-function
    /// lookup, `None` on missing name or signature mismatch.
    pub fn get_function<F: NativeSignature>(&self, name: &str) -> Option<F> {
        self.get_compiled(name)?.typed::<F>()
    }

    pub fn dsp_harness(&self) -> Option<DspHarness<'_>> {
        DspHarness::try_new(self)
    }
}
