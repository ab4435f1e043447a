//! The DSP harness (§4.6)
//!
//! Binds the three well-known entry points — `init`, `prepareToPlay`,
//! `process` — to a per-sample processing loop. Construction fails (not
//! panics) if any of the three is missing or has the wrong signature;
//! callers check `Scope::dsp_harness()` for `None` the way the host checks
//! `wasCompiledOK` before using a compile result (§6).

use jit_core::Type;

use crate::scope::Scope;

pub struct DspHarness<'a> {
    scope: &'a Scope,
    init: extern "C" fn(),
    prepare_to_play: extern "C" fn(f64, i32),
    process: extern "C" fn(f32) -> f32,
}

/// Reported when `process_block_checked` finds a buffer global whose
/// overflow sentinel has been set (§4.6, §8 scenario 5).
#[derive(Debug, Clone, PartialEq)]
pub struct OverflowReport {
    pub global_name: String,
    pub index: i64,
}

impl<'a> DspHarness<'a> {
    pub fn try_new(scope: &'a Scope) -> Option<Self> {
        let init = scope.get_function::<extern "C" fn()>("init")?;
        let prepare_to_play = scope.get_function::<extern "C" fn(f64, i32)>("prepareToPlay")?;
        let process = scope.get_function::<extern "C" fn(f32) -> f32>("process")?;
        Some(DspHarness {
            scope,
            init,
            prepare_to_play,
            process,
        })
    }

    pub fn init(&self) {
        (self.init)();
    }

    pub fn prepare_to_play(&self, sample_rate: f64, block_size: i32) {
        (self.prepare_to_play)(sample_rate, block_size);
    }

    pub fn process(&self, input: f32) -> f32 {
        (self.process)(input)
    }

    /// `processBlock(buffer, N)` (§4.6): invokes `process` per sample, in
    /// order, in place.
    pub fn process_block(&self, buffer: &mut [f32]) {
        for sample in buffer.iter_mut() {
            *sample = self.process(*sample);
        }
    }

    /// Same as [`Self::process_block`], but after the block inspects every
    /// buffer global's overflow sentinel (§4.6). Returns the first breach
    /// found, if any, and — per §4.6/§7, the harness never throws during
    /// audio processing — stops only the *reporting*, not by panicking.
    pub fn process_block_checked(&self, buffer: &mut [f32]) -> Option<OverflowReport> {
        self.process_block(buffer);
        for idx in 0..self.scope.global_count() {
            if self.scope.global_type(idx) != Some(Type::Buffer) {
                continue;
            }
            if let Some(name) = self.scope.global_name(idx) {
                if let Some(g) = self.scope.globals().iter().find(|g| g.name == name) {
                    if let Some(buf) = &g.buffer {
                        let sentinel = buf.sentinel();
                        if sentinel >= 0 {
                            tracing::warn!(global = name, index = sentinel, "buffer overflow sentinel set");
                            return Some(OverflowReport {
                                global_name: name.to_string(),
                                index: sentinel,
                            });
                        }
                    }
                }
            }
        }
        None
    }
}
