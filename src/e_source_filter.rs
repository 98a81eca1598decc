use std::fmt;
use std::path::{Path, PathBuf};

/// Extensions the compiler accepts as source files, compared case-insensitively.
pub const SOURCE_EXTENSIONS: [&str; 2] = ["pwn", "p"];

/// What became of a file reference the user picked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSelection {
    Accepted(PathBuf),
    InvalidFileType(PathBuf),
    CannotAccess,
}

impl SourceSelection {
    /// Classify the outcome of path resolution.
    pub fn classify(resolved: Option<PathBuf>) -> Self {
        match resolved {
            Some(path) if is_source_file(&path) => SourceSelection::Accepted(path),
            Some(path) => SourceSelection::InvalidFileType(path),
            None => SourceSelection::CannotAccess,
        }
    }

    pub fn accepted(&self) -> Option<&Path> {
        match self {
            SourceSelection::Accepted(path) => Some(path.as_path()),
            _ => None,
        }
    }

    /// Short label for the selected-file display.
    pub fn label(&self) -> String {
        match self {
            SourceSelection::Accepted(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            SourceSelection::InvalidFileType(_) => "Invalid file type".to_string(),
            SourceSelection::CannotAccess => "Cannot access file".to_string(),
        }
    }
}

impl fmt::Display for SourceSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSelection::Accepted(path) => write!(f, "Selected: {}", path.display()),
            SourceSelection::InvalidFileType(path) => write!(
                f,
                "Error: {} is not a .pwn or .p file",
                path.display()
            ),
            SourceSelection::CannotAccess => write!(
                f,
                "Error: Cannot access file. Make sure storage permission is granted."
            ),
        }
    }
}

pub fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            SOURCE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}
