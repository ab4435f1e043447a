//! Exposed native functions (§3 "Exposed native function", §6)
//!
//! The host registers a small allow-list of native functions into a
//! [`crate::Scope`] before compilation — `sinf`, `cosf`, `powf`, `fabsf`,
//! `sqrtf`, `exp`, `tan`, `atan`, `atanh`, `abs`, `tanh` and friends. The
//! allow-list exists because the emitter must never insert a call that
//! could block or allocate on the audio thread (§5) — only `extern "C"`
//! leaf math functions are admitted.
//!
//! Both native functions and compiled functions are retrieved through the
//! same [`NativeSignature`] trait: the caller names the Rust
//! function-pointer type it expects, and retrieval fails (returns `None`)
//! rather than transmuting blindly if the recorded signature doesn't
//! match.

use jit_core::{Signature, Type};

/// A scalar type that can appear in a native/compiled function signature.
pub trait ScalarRepr: Copy + 'static {
    const TYPE: Type;
}

impl ScalarRepr for i32 {
    const TYPE: Type = Type::Int;
}
impl ScalarRepr for f32 {
    const TYPE: Type = Type::Float;
}
impl ScalarRepr for f64 {
    const TYPE: Type = Type::Double;
}
impl ScalarRepr for bool {
    const TYPE: Type = Type::Bool;
}

/// A function-pointer type whose §3/§4.3 signature can be derived purely
/// from its Rust type. Implemented for every (return, param1, param2)
/// combination the closed signature table in §4.3 allows.
pub trait NativeSignature: Copy + 'static {
    fn jit_signature() -> Signature;
}

impl NativeSignature for extern "C" fn() {
    fn jit_signature() -> Signature {
        Signature::new(Type::Void, vec![])
    }
}

impl<R: ScalarRepr> NativeSignature for extern "C" fn() -> R {
    fn jit_signature() -> Signature {
        Signature::new(R::TYPE, vec![])
    }
}

impl<P1: ScalarRepr> NativeSignature for extern "C" fn(P1) {
    fn jit_signature() -> Signature {
        Signature::new(Type::Void, vec![P1::TYPE])
    }
}

impl<P1: ScalarRepr, R: ScalarRepr> NativeSignature for extern "C" fn(P1) -> R {
    fn jit_signature() -> Signature {
        Signature::new(R::TYPE, vec![P1::TYPE])
    }
}

impl<P1: ScalarRepr, P2: ScalarRepr> NativeSignature for extern "C" fn(P1, P2) {
    fn jit_signature() -> Signature {
        Signature::new(Type::Void, vec![P1::TYPE, P2::TYPE])
    }
}

impl<P1: ScalarRepr, P2: ScalarRepr, R: ScalarRepr> NativeSignature for extern "C" fn(P1, P2) -> R {
    fn jit_signature() -> Signature {
        Signature::new(R::TYPE, vec![P1::TYPE, P2::TYPE])
    }
}

/// A registered native function: name, signature, and raw entry address.
#[derive(Clone)]
pub struct NativeFunction {
    pub name: String,
    pub signature: Signature,
    pub(crate) address: usize,
}

impl NativeFunction {
    pub fn new<F: NativeSignature>(name: impl Into<String>, f: F) -> Self {
        // SAFETY: F is a `extern "C" fn(...)` pointer type, always exactly
        // pointer-sized, so this transmute just reads the function address.
        let address = unsafe { std::mem::transmute_copy::<F, usize>(&f) };
        NativeFunction {
            name: name.into(),
            signature: F::jit_signature(),
            address,
        }
    }

    pub fn address(&self) -> usize {
        self.address
    }
}

/// Returns the default allow-list of exposed natives (§3, §6).
pub fn default_natives() -> Vec<NativeFunction> {
    extern "C" fn abs_i32(x: i32) -> i32 {
        x.abs()
    }

    vec![
        NativeFunction::new("sinf", f32::sin as extern "C" fn(f32) -> f32),
        NativeFunction::new("cosf", f32::cos as extern "C" fn(f32) -> f32),
        NativeFunction::new("tanf", f32::tan as extern "C" fn(f32) -> f32),
        NativeFunction::new("atanf", f32::atan as extern "C" fn(f32) -> f32),
        NativeFunction::new("atanhf", f32::atanh as extern "C" fn(f32) -> f32),
        NativeFunction::new("tanhf", f32::tanh as extern "C" fn(f32) -> f32),
        NativeFunction::new("fabsf", f32::abs as extern "C" fn(f32) -> f32),
        NativeFunction::new("sqrtf", f32::sqrt as extern "C" fn(f32) -> f32),
        NativeFunction::new("expf", f32::exp as extern "C" fn(f32) -> f32),
        NativeFunction::new("powf", f32::powf as extern "C" fn(f32, f32) -> f32),
        NativeFunction::new("sin", f64::sin as extern "C" fn(f64) -> f64),
        NativeFunction::new("cos", f64::cos as extern "C" fn(f64) -> f64),
        NativeFunction::new("tan", f64::tan as extern "C" fn(f64) -> f64),
        NativeFunction::new("atan", f64::atan as extern "C" fn(f64) -> f64),
        NativeFunction::new("atanh", f64::atanh as extern "C" fn(f64) -> f64),
        NativeFunction::new("tanh", f64::tanh as extern "C" fn(f64) -> f64),
        NativeFunction::new("fabs", f64::abs as extern "C" fn(f64) -> f64),
        NativeFunction::new("sqrt", f64::sqrt as extern "C" fn(f64) -> f64),
        NativeFunction::new("exp", f64::exp as extern "C" fn(f64) -> f64),
        NativeFunction::new("pow", f64::powf as extern "C" fn(f64, f64) -> f64),
        NativeFunction::new("abs", abs_i32 as extern "C" fn(i32) -> i32),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_of_unary_float_fn() {
        let sig = <extern "C" fn(f32) -> f32 as NativeSignature>::jit_signature();
        assert_eq!(sig.return_type, Type::Float);
        assert_eq!(sig.params, vec![Type::Float]);
    }

    #[test]
    fn default_natives_includes_sinf() {
        let natives = default_natives();
        assert!(natives.iter().any(|n| n.name == "sinf"));
        assert!(natives.iter().any(|n| n.name == "powf"));
    }
}
