#![doc = include_str!("../README.md")]

pub mod e_cli;
pub use e_cli::Cli;
pub mod e_compile_result;
pub use e_compile_result::CompilationResult;
pub mod e_compiler_bridge;
pub use e_compiler_bridge::CompilerBridge;
pub mod e_config;
pub use e_config::Settings;
pub mod e_diagnostic;
pub use e_diagnostic::{CompileDiagnostic, DiagnosticLevel};
pub mod e_native;
pub mod e_output_router;
pub use e_output_router::OutputRouter;
pub mod e_path_resolver;
pub use e_path_resolver::PathResolver;
pub mod e_runner;
pub mod e_source_filter;
pub use e_source_filter::SourceSelection;
