//! Integration tests for the host-facing scope API.
//!
//! These exercise `Scope`/`HostValue`/`DspHarness` directly against a
//! hand-built `Scope` (no compiler involved) to catch regressions at the
//! runtime boundary independent of code generation.

use jit_core::{Global, Type};
use jit_runtime::{FunctionTable, HostValue, NativeFunction, Scope};

fn empty_scope_with_globals(globals: Vec<Global>) -> Scope {
    Scope::new(globals, Vec::new(), Vec::new(), FunctionTable::new(0))
}

#[test]
fn set_global_casts_numeric_into_declared_type() {
    let scope = empty_scope_with_globals(vec![Global::new_scalar("gain", Type::Float, false)]);
    scope.set_global("gain", HostValue::Number(2.0)).unwrap();
    match scope.global_value(0) {
        Some(HostValue::Number(n)) => assert_eq!(n, 2.0),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn set_global_rejects_const() {
    let scope = empty_scope_with_globals(vec![Global::new_scalar("k", Type::Int, true)]);
    let err = scope.set_global("k", HostValue::Number(1.0)).unwrap_err();
    assert!(err.to_string().contains("const"));
}

#[test]
fn set_global_unknown_name_errors() {
    let scope = empty_scope_with_globals(vec![]);
    let err = scope.set_global("missing", HostValue::Number(0.0)).unwrap_err();
    assert!(err.to_string().contains("missing"));
}

#[test]
fn buffer_global_roundtrips_through_host_value() {
    let scope = empty_scope_with_globals(vec![Global::new_buffer("b", 4)]);
    scope
        .set_global("b", HostValue::Buffer(vec![1.0, 2.0, 3.0]))
        .unwrap();
    match scope.global_value(0) {
        Some(HostValue::Buffer(v)) => assert_eq!(v, vec![1.0, 2.0, 3.0]),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn native_function_retrieved_with_matching_signature() {
    let natives = vec![NativeFunction::new("sqrtf", f32::sqrt as extern "C" fn(f32) -> f32)];
    let scope = Scope::new(vec![], natives, vec![], FunctionTable::new(0));
    let f = scope.get_native("sqrtf").unwrap();
    assert_eq!(f.signature.params, vec![Type::Float]);
}

#[test]
fn dsp_harness_is_none_without_all_three_entry_points() {
    let scope = empty_scope_with_globals(vec![]);
    assert!(scope.dsp_harness().is_none());
}
