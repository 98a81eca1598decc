//! # pawnc-e
//!
//! `pawnc-e` compiles a Pawn source file through the native pawncc library and
//! prints the compiler's progress and diagnostics as they arrive.
//!
//! ## Quick Start
//! ```sh
//! pawnc-e --library ./libpawnc.so gamemodes/test.pwn
//! pawnc-e "content://com.android.externalstorage.documents/document/primary%3Agm%2Ftest.pwn"
//! ```

use std::env;
use std::io::{self, Write};
use std::process::exit;
use std::sync::Arc;

use clap::Parser;
use log::debug;
use pawnc_e::e_native::PawnLibrary;
use pawnc_e::e_path_resolver::HostStorage;
use pawnc_e::e_runner::CompileWorker;
use pawnc_e::{
    Cli, CompilationResult, CompilerBridge, OutputRouter, PathResolver, Settings, SourceSelection,
};

/// Exit status when the reference cannot be compiled at all.
const EXIT_BAD_SOURCE: i32 = 2;

pub fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    debug!("CLI options: {:?}", cli);

    let cwd = env::current_dir()?;
    let settings = Settings::discover(cli.config.as_deref(), &cwd)?;

    let resolver = PathResolver::new(HostStorage::from_config(&settings.storage));
    let reference = cli.reference_uri();
    let selection = SourceSelection::classify(resolver.resolve(&reference));
    let source = match &selection {
        SourceSelection::Accepted(path) => {
            println!("{}", selection);
            path.clone()
        }
        _ => {
            eprintln!("{}: {}", selection.label(), reference);
            eprintln!("{}", selection);
            exit(EXIT_BAD_SOURCE);
        }
    };

    let mut compiler = settings.compiler.clone();
    cli.apply_to(&mut compiler);
    compiler.validate()?;

    let library_path = cli
        .library
        .clone()
        .unwrap_or_else(|| settings.library.library_path());
    let native = PawnLibrary::load(&library_path)?;

    let (router, pump) = OutputRouter::pumped();
    let bridge = Arc::new(
        CompilerBridge::new(native, router).with_program_name(compiler.program_name()),
    );
    bridge.set_output_listener(|message| {
        print!("{}", message);
        let _ = io::stdout().flush();
    });
    let color = !cli.no_color;
    bridge.set_error_listener(move |diagnostic| println!("{}", diagnostic.render(color)));

    let worker = CompileWorker::new();
    let result =
        worker.compile_and_deliver(Arc::clone(&bridge), &pump, &source, compiler.build_options())?;
    bridge.clear_callbacks();

    if result.success {
        let output = compiler
            .output
            .clone()
            .unwrap_or_else(|| CompilationResult::output_path(&source));
        println!("Output: {}", output.display());
    }
    println!(
        "Errors: {}, Warnings: {}",
        result.error_count(),
        result.warning_count()
    );
    exit(if result.success { 0 } else { 1 });
}
