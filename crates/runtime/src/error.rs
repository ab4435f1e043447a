//! Host-facing runtime errors.
//!
//! A small hand-written error enum with manual `Display`/`Error` impls
//! rather than a `thiserror` derive (see
//! `jit-compiler::codegen::error::CodeGenError` for the sibling used on the
//! compile side).

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    /// `scope.setGlobal(name, value)` (§6) named a global that doesn't exist.
    UnknownGlobal(String),
    /// The host value's shape doesn't match the global's declared type,
    /// e.g. assigning a buffer to a scalar global (§6 "Any mismatch raises
    /// an error").
    TypeMismatch { global: String, reason: String },
    /// Assignment targeted a `const` global.
    ConstAssignment(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::UnknownGlobal(name) => write!(f, "no global named \"{name}\""),
            RuntimeError::TypeMismatch { global, reason } => {
                write!(f, "{global} - var type mismatch: {reason}")
            }
            RuntimeError::ConstAssignment(name) => {
                write!(f, "{name} - cannot assign to const global")
            }
        }
    }
}

impl std::error::Error for RuntimeError {}
