//! Code generation (§4.5): turns a parsed [`Program`] into a runtime
//! [`Scope`].
//!
//! Two passes, mirroring the parser's own split and required by §4.3's
//! forward-reference guarantee: first every global's storage is allocated
//! and every function's signature is recorded (so a function can call one
//! declared later in the source), then each function body is emitted
//! against that shared context. [`FunctionTable`] slots are patched with
//! each function's entry address as soon as it finishes compiling.

pub mod error;
mod emitter;
pub mod regs;

pub use error::{CgResult, CodeGenError};

use std::collections::HashMap;

use jit_core::{Global, Signature, Type};
use jit_runtime::{CompiledFunction, FunctionTable, NativeFunction, Scope};

use crate::ast::{GlobalDecl, Literal, Program};
use crate::config::CompilerConfig;

/// What the emitter needs to know about a global to load/store it: its
/// declared type, whether it may be assigned, and the absolute address of
/// its storage cell (stable for the `Scope`'s lifetime, §5).
pub struct GlobalInfo {
    pub name: String,
    pub ty: Type,
    pub address: usize,
    pub is_const: bool,
}

/// A top-level function's signature plus its slot in the [`FunctionTable`].
pub struct FuncEntry {
    pub signature: Signature,
    pub table_index: usize,
}

pub struct NativeInfo {
    pub signature: Signature,
    pub address: usize,
}

/// Everything shared read-only across every function body's emission.
pub struct CodegenContext<'a> {
    pub globals: &'a [GlobalInfo],
    pub functions: &'a HashMap<String, FuncEntry>,
    pub natives: &'a HashMap<String, NativeInfo>,
    pub function_table: &'a FunctionTable,
    pub safe_buffer_access: bool,
}

/// Compile a whole program into a [`Scope`]. `safe_buffer_access` is the
/// preprocessor's final determination for this source (§4.1).
pub fn compile_program(
    program: &Program,
    config: &CompilerConfig,
    safe_buffer_access: bool,
) -> CgResult<Scope> {
    check_unique_names(program)?;

    let mut globals_vec: Vec<Global> = Vec::with_capacity(program.buffers.len() + program.globals.len());
    for b in &program.buffers {
        globals_vec.push(Global::new_buffer(&b.name, b.size));
    }
    for g in &program.globals {
        let global = Global::new_scalar(&g.name, g.ty, g.is_const);
        if let Some(lit) = &g.init {
            apply_initializer(&global, g, lit)?;
        }
        globals_vec.push(global);
    }

    let global_infos: Vec<GlobalInfo> = globals_vec
        .iter()
        .map(|g| GlobalInfo {
            name: g.name.clone(),
            ty: g.ty,
            address: g.slot.address(),
            is_const: g.is_const,
        })
        .collect();

    let mut func_entries: HashMap<String, FuncEntry> = HashMap::new();
    for (idx, f) in program.functions.iter().enumerate() {
        for p in &f.params {
            if p.ty == Type::Void {
                return Err(CodeGenError::logic(
                    format!("parameter \"{}\" of \"{}\" cannot have type void", p.name, f.name),
                    f.offset,
                ));
            }
        }
        let signature = Signature::new(f.return_type, f.params.iter().map(|p| p.ty).collect());
        func_entries.insert(f.name.clone(), FuncEntry { signature, table_index: idx });
    }

    let function_table = FunctionTable::new(program.functions.len());

    let natives_vec: Vec<NativeFunction> = config.natives().to_vec();
    let natives: HashMap<String, NativeInfo> = natives_vec
        .iter()
        .map(|n| {
            (
                n.name.clone(),
                NativeInfo {
                    signature: n.signature.clone(),
                    address: n.address(),
                },
            )
        })
        .collect();

    let ctx = CodegenContext {
        globals: &global_infos,
        functions: &func_entries,
        natives: &natives,
        function_table: &function_table,
        safe_buffer_access,
    };

    let mut compiled: Vec<CompiledFunction> = Vec::with_capacity(program.functions.len());
    for f in &program.functions {
        tracing::debug!(function = f.name.as_str(), "emitting function");
        let (compiled_fn, entry_address) = emitter::emit_function(f, &ctx)?;
        let table_index = func_entries[&f.name].table_index;
        function_table.set(table_index, entry_address);
        compiled.push(compiled_fn);
    }

    Ok(Scope::new(globals_vec, natives_vec, compiled, function_table))
}

fn check_unique_names(program: &Program) -> CgResult<()> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for g in &program.globals {
        if let Some(prev) = seen.insert(g.name.as_str(), g.offset) {
            let _ = prev;
            return Err(CodeGenError::logic(format!("\"{}\" is already defined", g.name), g.offset));
        }
    }
    for b in &program.buffers {
        if seen.insert(b.name.as_str(), b.offset).is_some() {
            return Err(CodeGenError::logic(format!("\"{}\" is already defined", b.name), b.offset));
        }
    }
    for f in &program.functions {
        if seen.insert(f.name.as_str(), f.offset).is_some() {
            return Err(CodeGenError::logic(format!("\"{}\" is already defined", f.name), f.offset));
        }
    }
    Ok(())
}

fn apply_initializer(global: &Global, decl: &GlobalDecl, lit: &Literal) -> CgResult<()> {
    match (decl.ty, lit) {
        (Type::Int, Literal::Int(v)) => global.slot.write_i32(*v),
        (Type::Float, Literal::Float(v)) => global.slot.write_f32(*v),
        (Type::Double, Literal::Double(v)) => global.slot.write_f64(*v),
        (Type::Bool, Literal::Bool(v)) => global.slot.write_bool(*v),
        _ => {
            return Err(CodeGenError::logic(
                format!("initializer for \"{}\" does not match its declared type", decl.name),
                decl.offset,
            ));
        }
    }
    Ok(())
}
