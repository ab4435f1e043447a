//! Code generation errors.
//!
//! Hand-written enum with manual `Display`/`Error`/`From` impls rather than
//! a `thiserror` derive. `Asm` covers the case where the emitter's
//! `dynasmrt` assembler refuses to finalize; everything else is a located
//! `Logic` error.

use std::fmt;

#[derive(Debug, Clone)]
pub enum CodeGenError {
    /// A semantic error: unknown identifier, type mismatch, arity mismatch,
    /// unsupported construct. Carries the byte offset of the offending
    /// token so the top-level `compile()` can report "Line N: …" (§4.7).
    Logic { message: String, offset: usize },
    /// The assembler failed to finalize the executable buffer.
    Asm(String),
}

impl CodeGenError {
    pub fn logic(message: impl Into<String>, offset: usize) -> Self {
        CodeGenError::Logic {
            message: message.into(),
            offset,
        }
    }

    /// Byte offset to report the error at, if one is known.
    pub fn offset(&self) -> Option<usize> {
        match self {
            CodeGenError::Logic { offset, .. } => Some(*offset),
            CodeGenError::Asm(_) => None,
        }
    }
}

impl fmt::Display for CodeGenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeGenError::Logic { message, .. } => write!(f, "{message}"),
            CodeGenError::Asm(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for CodeGenError {}

impl From<std::io::Error> for CodeGenError {
    fn from(e: std::io::Error) -> Self {
        CodeGenError::Asm(e.to_string())
    }
}

pub type CgResult<T> = Result<T, CodeGenError>;
