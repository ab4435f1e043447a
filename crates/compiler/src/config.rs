//! Compiler configuration (§4.3, §4.1, §6)
//!
//! Callers extend the compiler with additional exposed natives via
//! `with_native` rather than the compiler hard-coding every possible
//! host integration.

use jit_runtime::NativeFunction;

/// Which of the two accepted surface forms (§4.3, §6) the source is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SurfaceForm {
    /// `float x; float process(...) { ... }`
    #[default]
    Raw,
    /// `class Name { public: <same contents> };`
    Class,
}

#[derive(Clone)]
pub struct CompilerConfig {
    pub surface_form: SurfaceForm,
    /// Default safe-buffer-access mode before any `#define` in the source
    /// overrides it (§4.1).
    pub safe_buffer_access_default: bool,
    natives: Vec<NativeFunction>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            surface_form: SurfaceForm::Raw,
            safe_buffer_access_default: true,
            natives: jit_runtime::native::default_natives(),
        }
    }
}

impl CompilerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_surface_form(mut self, form: SurfaceForm) -> Self {
        self.surface_form = form;
        self
    }

    pub fn with_safe_buffer_access_default(mut self, safe: bool) -> Self {
        self.safe_buffer_access_default = safe;
        self
    }

    /// Register an additional exposed native (§3, §6), extending (not
    /// replacing) the default allow-list.
    pub fn with_native(mut self, native: NativeFunction) -> Self {
        self.natives.push(native);
        self
    }

    pub fn natives(&self) -> &[NativeFunction] {
        &self.natives
    }
}
