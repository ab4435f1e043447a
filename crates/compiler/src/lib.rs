//! Front end and x86-64 emitter for the expression JIT language (§4).
//!
//! `compile()` runs the whole pipeline — preprocess, lex, parse, emit — and
//! turns whatever stage fails into a single "Line N: …" message (§4.7): the
//! preprocessor and lexer already carry a line/byte offset on their errors,
//! the parser now does too (`ParseError`), and codegen errors carry an
//! optional offset since some (an unfinalizable assembler buffer) have none
//! to report.

pub mod ast;
pub mod codegen;
pub mod config;
pub mod lexer;
pub mod parser;
pub mod preprocessor;

pub use codegen::{CgResult, CodeGenError};
pub use config::{CompilerConfig, SurfaceForm};
pub use parser::ParseError;

use jit_runtime::Scope;

/// Compile expression-language source into a [`Scope`]. Runs the
/// preprocessor, lexer, two-pass parser and code generator in sequence;
/// the first stage to fail produces a `"Line N: <message>"` string (§4.7).
pub fn compile(source: &str, config: &CompilerConfig) -> Result<Scope, String> {
    let pre = preprocessor::preprocess(source, config.safe_buffer_access_default)
        .map_err(|e| format!("Line {}: {}", e.line + 1, e.message))?;

    let tokens = lexer::tokenize(&pre.source).map_err(|e| locate(&pre.source, e.offset, &e.message))?;

    let mut parser = parser::Parser::new(&tokens);
    let program = parser
        .parse_program()
        .map_err(|e| locate(&pre.source, e.offset, &e.message))?;

    codegen::compile_program(&program, config, pre.safe_buffer_access)
        .map_err(|e| match e.offset() {
            Some(offset) => locate(&pre.source, offset, &e.to_string()),
            None => e.to_string(),
        })
}

/// Turn a byte offset into the preprocessed source into a 1-indexed line
/// number for error reporting (§4.7).
fn locate(source: &str, offset: usize, message: &str) -> String {
    let line = source[..offset.min(source.len())].matches('\n').count() + 1;
    format!("Line {line}: {message}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use jit_core::Type;
    use jit_runtime::{HostValue, NativeSignature};

    fn cfg() -> CompilerConfig {
        CompilerConfig::new()
    }

    #[test]
    fn compiles_trivial_gain() {
        let src = "float gain = 0.5f;\nfloat process(float input) { return input * gain; }";
        let scope = compile(src, &cfg()).expect("should compile");
        let f = scope
            .get_function::<extern "C" fn(f32) -> f32>("process")
            .expect("process should have that signature");
        assert_eq!(f(2.0), 1.0);
    }

    #[test]
    fn reports_line_number_for_unknown_identifier() {
        let src = "float process(float input) {\n    return input * missing;\n}";
        let err = compile(src, &cfg()).unwrap_err();
        assert!(err.starts_with("Line 2:"), "unexpected error: {err}");
    }

    #[test]
    fn rejects_assignment_to_const_global() {
        let src = "const int limit = 10;\nint bump() { limit = 11; return limit; }";
        let err = compile(src, &cfg()).unwrap_err();
        assert!(err.contains("const"), "unexpected error: {err}");
    }

    #[test]
    fn global_flush_on_return_accumulates() {
        let src = "int c = 0;\nint bump() { c += 1; return c; }";
        let scope = compile(src, &cfg()).expect("should compile");
        let bump = scope.get_function::<extern "C" fn() -> i32>("bump").unwrap();
        assert_eq!(bump(), 1);
        assert_eq!(bump(), 2);
        assert_eq!(bump(), 3);
        assert_eq!(scope.global_value(0), Some(HostValue::Number(3.0)));
    }

    #[test]
    fn ternary_and_modulo() {
        let src = "int pick(int a, int b) { return (a > b ? a : b) % 4; }";
        let scope = compile(src, &cfg()).expect("should compile");
        let pick = scope.get_function::<extern "C" fn(i32, i32) -> i32>("pick").unwrap();
        assert_eq!(pick(9, 3), 1);
        assert_eq!(pick(1, 10), 2);
    }

    #[test]
    fn forward_reference_between_functions() {
        let src = "int helper() { return twice(21); }\nint twice(int x) { return x * 2; }";
        let scope = compile(src, &cfg()).expect("should compile");
        let helper = scope.get_function::<extern "C" fn() -> i32>("helper").unwrap();
        assert_eq!(helper(), 42);
    }

    #[test]
    fn rejects_more_than_two_parameters() {
        let src = "int f(int a, int b, int c) { return a; }";
        let err = compile(src, &cfg()).unwrap_err();
        assert!(err.contains("too many parameters"), "unexpected error: {err}");
    }

    #[test]
    fn unsupported_buffer_method_is_rejected() {
        let src = "Buffer buf(8);\nfloat process() { buf.resize(4); return 0.0f; }";
        let err = compile(src, &cfg()).unwrap_err();
        assert!(err.contains("not supported"), "unexpected error: {err}");
    }

    #[test]
    fn ensure_type_display_shown_in_type_error() {
        let src = "int f() { return 1.0f; }";
        let err = compile(src, &cfg()).unwrap_err();
        assert!(err.contains("float") && err.contains("int"), "unexpected error: {err}");
    }

    #[test]
    fn call_with_cast_argument() {
        let src = "float half(float x) { return x * 0.5f; }\nfloat use_it(int x) { return half((float)x); }";
        let scope = compile(src, &cfg()).expect("should compile");
        let f = scope.get_function::<extern "C" fn(i32) -> f32>("use_it").unwrap();
        assert_eq!(f(10), 5.0);
    }

    #[test]
    fn safe_buffer_index_out_of_range_returns_zero_and_marks_overflow() {
        let src = "Buffer b(4);\nfloat read(int i) { return b[i]; }";
        let scope = compile(src, &cfg()).expect("should compile");
        let read = scope.get_function::<extern "C" fn(i32) -> f32>("read").unwrap();
        assert_eq!(read(7), 0.0);
        assert_eq!(scope.global_type(0), Some(Type::Buffer));
    }
}
