//! End-to-end scenarios (§8): compile real source text, call the resulting
//! function pointers, check against the literal expected outputs.

use jit_compiler::{compile, CompilerConfig};

fn cfg() -> CompilerConfig {
    CompilerConfig::new()
}

#[test]
fn gain() {
    let src = "float x = 0.5f;\nfloat process(float input) { return input * x; }";
    let scope = compile(src, &cfg()).expect("gain should compile");
    let process = scope.get_function::<extern "C" fn(f32) -> f32>("process").unwrap();

    let input = [1.0f32, -1.0, 0.25];
    let expected = [0.5f32, -0.5, 0.125];
    for (i, e) in input.iter().zip(expected.iter()) {
        assert_eq!(process(*i), *e);
    }
}

#[test]
fn saturator() {
    let src = "\
        float k; float saturationAmount;\n\
        void init() { saturationAmount = 0.8f; k = 2.0f*saturationAmount/(1.0f-saturationAmount); }\n\
        void prepareToPlay(double sr, int bs) {}\n\
        float process(float input) { return (1.0f+k)*input/(1.0f+k*fabsf(input)); }\n\
    ";
    let scope = compile(src, &cfg()).expect("saturator should compile");
    let harness = scope.dsp_harness().expect("init/prepareToPlay/process should all be present");

    harness.init();
    harness.prepare_to_play(44_100.0, 512);

    let out = harness.process(0.5);
    assert!((out - 0.9).abs() < 1e-4, "expected ~0.9, got {out}");
}

#[test]
fn safe_delay() {
    let src = "\
        Buffer b(8192);\n\
        int readIndex = 0;\n\
        int writeIndex = 1000;\n\
        float process(float input) {\n\
            b[(readIndex+300)%8192] = input;\n\
            float v = b[readIndex];\n\
            ++readIndex;\n\
            return v;\n\
        }\n\
    ";
    let scope = compile(src, &cfg()).expect("safe delay should compile");
    let process = scope.get_function::<extern "C" fn(f32) -> f32>("process").unwrap();

    for n in 0..300 {
        let input = (n + 1) as f32;
        assert_eq!(process(input), 0.0, "sample {n} should still be silence");
    }
    for n in 300..310 {
        let input = (n + 1) as f32;
        let expected = (n - 300 + 1) as f32;
        assert_eq!(process(input), expected, "sample {n} should echo back input {expected}");
    }
}

#[test]
fn global_flush_accumulates_across_statements_and_calls() {
    let src = "\
        int c = 0;\n\
        float test(float i) { c += 1; c += 1; c += 1; return (float)c; }\n\
    ";
    let scope = compile(src, &cfg()).expect("global flush should compile");
    let test = scope.get_function::<extern "C" fn(f32) -> f32>("test").unwrap();
    assert_eq!(test(0.0), 3.0);
}

#[test]
fn overflow_sentinel_on_out_of_range_read() {
    let src = "Buffer b(2);\nfloat process() { return b[7]; }";
    let scope = compile(src, &cfg()).expect("overflow scenario should compile");
    let process = scope.get_function::<extern "C" fn() -> f32>("process").unwrap();

    assert_eq!(scope.buffer_sentinel("b"), Some(-1));
    assert_eq!(process(), 0.0);
    assert_eq!(scope.buffer_sentinel("b"), Some(7));
}

#[test]
fn ternary_and_modulo() {
    let src = "int test(int a, int b) { return (a > b ? a : b) % 4; }";
    let scope = compile(src, &cfg()).expect("ternary/modulo scenario should compile");
    let test = scope.get_function::<extern "C" fn(i32, i32) -> i32>("test").unwrap();

    assert_eq!(test(10, 3), 2);
    assert_eq!(test(7, 15), 3);
}
