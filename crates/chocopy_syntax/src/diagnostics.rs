//! Diagnostics (errors, warnings) and the internal code-generation error type.

use crate::span::Span;
use std::fmt;

#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub level: Level,
    pub message: String,
    pub span: Option<Span>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Error,
    Warning,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, span: Option<Span>) -> Self {
        Self {
            level: Level::Error,
            message: message.into(),
            span,
        }
    }

    pub fn warning(message: impl Into<String>, span: Option<Span>) -> Self {
        Self {
            level: Level::Warning,
            message: message.into(),
            span,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            Level::Error => "error",
            Level::Warning => "warning",
        };
        if let Some(span) = &self.span {
            write!(f, "{} at {}: {}", level, span, self.message)
        } else {
            write!(f, "{}: {}", level, self.message)
        }
    }
}

/// Format a diagnostic prefixed with the input file name (for printing).
pub fn format_diagnostic(file: &str, diag: &Diagnostic) -> String {
    match &diag.span {
        Some(span) => format!("{}:{}:{}: {}", file, span.line, span.col, diag),
        None => format!("{}: {}", file, diag),
    }
}

/// Defects in the code generator itself. None of these are recoverable: the
/// input was already validated, so hitting one means the compiler is wrong.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CodegenError {
    /// A construct the translator has no lowering for.
    Unsupported { construct: String, span: Span },
    /// An identifier with no descriptor in scope.
    UnresolvedSymbol { name: String, span: Span },
    /// Physical-register mode ran out of pool registers.
    RegisterPoolExhausted { construct: String, span: Span },
    /// The allocator needed a spill slot beyond the addressable frame range.
    SpillSlotsExhausted { function: String, slots: usize },
    /// A virtual register reached the emission sink.
    VirtualRegisterInEmission { instr: String },
    /// Declarations that contradict each other (e.g. unknown super class).
    InvalidProgram { message: String },
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodegenError::Unsupported { construct, span } => {
                write!(f, "no code generation for {} at {}", construct, span)
            }
            CodegenError::UnresolvedSymbol { name, span } => {
                write!(f, "unresolved identifier '{}' at {}", name, span)
            }
            CodegenError::RegisterPoolExhausted { construct, span } => write!(
                f,
                "register pool exhausted while translating {} at {}",
                construct, span
            ),
            CodegenError::SpillSlotsExhausted { function, slots } => write!(
                f,
                "function '{}' needs {} spill slots, more than the frame can address",
                function, slots
            ),
            CodegenError::VirtualRegisterInEmission { instr } => {
                write!(f, "virtual register survived allocation: {}", instr)
            }
            CodegenError::InvalidProgram { message } => write!(f, "invalid program: {}", message),
        }
    }
}

impl std::error::Error for CodegenError {}

impl CodegenError {
    pub fn span(&self) -> Option<Span> {
        match self {
            CodegenError::Unsupported { span, .. }
            | CodegenError::UnresolvedSymbol { span, .. }
            | CodegenError::RegisterPoolExhausted { span, .. } => Some(*span),
            CodegenError::SpillSlotsExhausted { .. }
            | CodegenError::VirtualRegisterInEmission { .. }
            | CodegenError::InvalidProgram { .. } => None,
        }
    }
}

impl From<CodegenError> for Diagnostic {
    fn from(e: CodegenError) -> Self {
        Diagnostic::error(e.to_string(), e.span())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codegen_error_becomes_located_diagnostic() {
        let e = CodegenError::UnresolvedSymbol {
            name: "x".into(),
            span: Span::new(3, 4, 3, 5),
        };
        let d: Diagnostic = e.into();
        assert_eq!(d.level, Level::Error);
        assert_eq!(
            format_diagnostic("prog.json", &d),
            "prog.json:3:4: error at 3:4: unresolved identifier 'x' at 3:4"
        );
    }
}
