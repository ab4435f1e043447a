//! Expression JIT CLI
//!
//! Command-line front end for compiling and exercising `.exprjit` source
//! files against the DSP harness (§4.6).

use std::fs;
use std::path::PathBuf;
use std::process;

use clap::{Parser as ClapParser, Subcommand};

use jit_compiler::{compile, CompilerConfig};
use jit_core::Type;

#[derive(ClapParser)]
#[command(name = "exprjit")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compile and run expression-language DSP programs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a source file and report success or a located error.
    Check {
        /// Input source file
        input: PathBuf,
    },

    /// Compile a source file and print its globals.
    Globals {
        /// Input source file
        input: PathBuf,
    },

    /// Compile a source file and run its DSP harness over a test signal.
    Run {
        /// Input source file
        input: PathBuf,

        /// Number of samples to process (a unit impulse followed by silence)
        #[arg(short, long, default_value_t = 16)]
        samples: usize,

        /// Sample rate passed to prepareToPlay
        #[arg(long, default_value_t = 44_100.0)]
        sample_rate: f64,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check { input } => run_check(&input),
        Commands::Globals { input } => run_globals(&input),
        Commands::Run { input, samples, sample_rate } => run_run(&input, samples, sample_rate),
    }
}

fn read_source(input: &PathBuf) -> String {
    fs::read_to_string(input).unwrap_or_else(|e| {
        eprintln!("Error reading {}: {}", input.display(), e);
        process::exit(1);
    })
}

fn run_check(input: &PathBuf) {
    let source = read_source(input);
    match compile(&source, &CompilerConfig::default()) {
        Ok(scope) => {
            println!(
                "OK: {} globals, {} compiled functions",
                scope.global_count(),
                scope.compiled_function_count()
            );
        }
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    }
}

fn run_globals(input: &PathBuf) {
    let source = read_source(input);
    let scope = compile(&source, &CompilerConfig::default()).unwrap_or_else(|e| {
        eprintln!("{e}");
        process::exit(1);
    });

    for idx in 0..scope.global_count() {
        let name = scope.global_name(idx).unwrap_or("?");
        let ty = scope.global_type(idx).unwrap_or(Type::Void);
        match scope.global_value(idx) {
            Some(value) => println!("{name}: {ty} = {value:?}"),
            None => println!("{name}: {ty}"),
        }
    }
}

fn run_run(input: &PathBuf, samples: usize, sample_rate: f64) {
    let source = read_source(input);
    let scope = compile(&source, &CompilerConfig::default()).unwrap_or_else(|e| {
        eprintln!("{e}");
        process::exit(1);
    });

    let harness = scope.dsp_harness().unwrap_or_else(|| {
        eprintln!("Error: source does not define init/prepareToPlay/process with the expected signatures");
        process::exit(1);
    });

    harness.init();
    harness.prepare_to_play(sample_rate, samples as i32);

    let mut buffer = vec![0.0f32; samples];
    if let Some(first) = buffer.first_mut() {
        *first = 1.0;
    }

    if let Some(report) = harness.process_block_checked(&mut buffer) {
        eprintln!(
            "buffer overflow in \"{}\" at index {} during processing",
            report.global_name, report.index
        );
    }

    for (i, sample) in buffer.iter().enumerate() {
        println!("{i}\t{sample}");
    }
}

