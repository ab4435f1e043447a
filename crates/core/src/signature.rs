//! Function signatures
//!
//! Shared between exposed natives and compiled functions (§3). The global
//! parser only accepts signatures drawn from a closed (return, param1,
//! param2) product (§4.3) — at most two parameters — so `Signature` simply
//! stores whatever the parser produced and lets callers validate arity
//! against the closed table themselves.

use crate::types::Type;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    pub return_type: Type,
    pub params: Vec<Type>,
}

impl Signature {
    pub fn new(return_type: Type, params: Vec<Type>) -> Self {
        Signature { return_type, params }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.return_type)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", p)?;
        }
        write!(f, ")")
    }
}
