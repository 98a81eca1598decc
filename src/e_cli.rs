use std::path::PathBuf;

use clap::Parser;

use crate::e_config::CompilerConfig;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Compile a Pawn source file with the native pawncc library and report its diagnostics.",
    long_about = None
)]
pub struct Cli {
    /// File reference to compile: a file:// or content:// URI, or a plain path.
    pub reference: String,

    /// Settings file; defaults to ./pawnc.toml when present.
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Path to the compiler shared library.
    #[arg(long, short = 'l')]
    pub library: Option<PathBuf>,

    /// Additional include directory (repeatable).
    #[arg(long = "include", short = 'i')]
    pub include: Vec<PathBuf>,

    /// Output file for the compiled script.
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    /// Debug information level (0-3).
    #[arg(long = "debug-level", short = 'd', value_parser = clap::value_parser!(u8).range(0..=3))]
    pub debug_level: Option<u8>,

    /// Optimization level (0-2).
    #[arg(long, short = 'O', value_parser = clap::value_parser!(u8).range(0..=2))]
    pub optimization: Option<u8>,

    /// Print diagnostics without colors.
    #[arg(long = "no-color")]
    pub no_color: bool,

    /// Arguments passed to the compiler as-is.
    #[arg(last = true)]
    pub extra: Vec<String>,
}

impl Cli {
    /// Layer the command-line flags over the settings file.
    pub fn apply_to(&self, config: &mut CompilerConfig) {
        config.include_paths.extend(self.include.iter().cloned());
        if let Some(output) = &self.output {
            config.output = Some(output.clone());
        }
        if let Some(level) = self.debug_level {
            config.debug_level = Some(level);
        }
        if let Some(level) = self.optimization {
            config.optimization = Some(level);
        }
        config.extra.extend(self.extra.iter().cloned());
    }

    /// Plain paths are turned into `file://` references; anything with a
    /// scheme is passed through.
    pub fn reference_uri(&self) -> String {
        if self.reference.contains("://") {
            return self.reference.clone();
        }
        let path = PathBuf::from(&self.reference);
        let absolute = if path.is_absolute() {
            path
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&path))
                .unwrap_or(path)
        };
        url::Url::from_file_path(&absolute)
            .map(String::from)
            .unwrap_or_else(|_| format!("file://{}", absolute.display()))
    }
}
