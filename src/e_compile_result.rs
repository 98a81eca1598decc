use std::path::{Path, PathBuf};

use crate::e_diagnostic::CompileDiagnostic;

/// Outcome of one `compile()` call.
///
/// `success` comes from the native exit status alone. A successful run may
/// carry warnings and a failed run may carry no diagnostics at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationResult {
    pub success: bool,
    /// In the order the native layer emitted them.
    pub diagnostics: Vec<CompileDiagnostic>,
}

impl CompilationResult {
    pub fn from_status(status: i32, diagnostics: Vec<CompileDiagnostic>) -> Self {
        CompilationResult {
            success: status == 0,
            diagnostics,
        }
    }

    /// Errors and fatal errors.
    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.is_error() || d.is_fatal())
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_warning()).count()
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    /// Where pawncc writes the compiled script when no `-o` is given.
    pub fn output_path(source: &Path) -> PathBuf {
        let is_source = source
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("pwn") || ext.eq_ignore_ascii_case("p"))
            .unwrap_or(false);
        if is_source {
            source.with_extension("amx")
        } else {
            let mut name = source.as_os_str().to_owned();
            name.push(".amx");
            PathBuf::from(name)
        }
    }
}
