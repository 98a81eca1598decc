use std::fmt;
use std::path::Path;

use nu_ansi_term::{Color, Style};

/// Severity of a compiler diagnostic, derived from its numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticLevel {
    Info,
    Error,
    Fatal,
    Warning,
}

impl DiagnosticLevel {
    /// Classify a pawncc diagnostic number.
    ///
    /// `0` is info, `1..=99` error, `100..=199` fatal, `200..` warning.
    /// Negative numbers are never emitted by the compiler and fall into info.
    pub fn from_code(code: i32) -> Self {
        match code {
            1..=99 => DiagnosticLevel::Error,
            100..=199 => DiagnosticLevel::Fatal,
            200.. => DiagnosticLevel::Warning,
            _ => DiagnosticLevel::Info,
        }
    }

    fn style(&self) -> Style {
        match self {
            DiagnosticLevel::Info => Color::Green.normal(),
            DiagnosticLevel::Error => Color::Red.normal(),
            DiagnosticLevel::Fatal => Color::Red.bold(),
            DiagnosticLevel::Warning => Color::Yellow.normal(),
        }
    }

    /// Label used when rendering a report line.
    pub fn label(&self) -> &'static str {
        match self {
            DiagnosticLevel::Info => "Info",
            DiagnosticLevel::Error => "Error",
            DiagnosticLevel::Fatal => "Fatal Error",
            DiagnosticLevel::Warning => "Warning",
        }
    }
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One issue reported by the native compiler.
///
/// Line numbers use `-1` for "absent", exactly as the compiler reports them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileDiagnostic {
    pub code: i32,
    pub file: String,
    pub first_line: i32,
    pub last_line: i32,
    pub message: String,
}

impl CompileDiagnostic {
    pub fn new(
        code: i32,
        file: impl Into<String>,
        first_line: i32,
        last_line: i32,
        message: impl Into<String>,
    ) -> Self {
        CompileDiagnostic {
            code,
            file: file.into(),
            first_line,
            last_line,
            message: message.into(),
        }
    }

    pub fn level(&self) -> DiagnosticLevel {
        DiagnosticLevel::from_code(self.code)
    }

    pub fn is_info(&self) -> bool {
        self.level() == DiagnosticLevel::Info
    }

    pub fn is_error(&self) -> bool {
        self.level() == DiagnosticLevel::Error
    }

    pub fn is_fatal(&self) -> bool {
        self.level() == DiagnosticLevel::Fatal
    }

    pub fn is_warning(&self) -> bool {
        self.level() == DiagnosticLevel::Warning
    }

    /// `"(first-last)"`, `"(last)"` or `""` depending on which lines are known.
    pub fn line_info(&self) -> String {
        if self.first_line >= 0 {
            format!("({}-{})", self.first_line, self.last_line)
        } else if self.last_line >= 0 {
            format!("({})", self.last_line)
        } else {
            String::new()
        }
    }

    /// Last component of `file`, or the raw string when it has none.
    pub fn file_name(&self) -> &str {
        Path::new(&self.file)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(&self.file)
    }

    /// The report line, with the level and number colored when `color` is set.
    pub fn render(&self, color: bool) -> String {
        if !color {
            return self.to_string();
        }
        let head = format!("{} {:03}:", self.level(), self.code);
        format!(
            "{} {}{}: {}",
            self.level().style().paint(head),
            Style::new().underline().paint(self.file_name()),
            self.line_info(),
            self.message
        )
    }
}

impl fmt::Display for CompileDiagnostic {
    /// `Warning 203: test.pwn(3-7): symbol is never used: "x"`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:03}: {}{}: {}",
            self.level(),
            self.code,
            self.file_name(),
            self.line_info(),
            self.message
        )
    }
}
