pub mod ansi;
pub mod json;

use crate::ast::Span;

/// Which stage of the pipeline raised the diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Parse,
    Assembly,
    Runtime,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Parse => "parse",
            Phase::Assembly => "assembly",
            Phase::Runtime => "runtime",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Label {
    pub span: Span,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub phase: Phase,
    pub message: String,
    pub label: Option<Label>,
    pub notes: Vec<String>,
    pub suggestion: Option<String>,
    pub source: Option<String>,
}

impl Diagnostic {
    pub fn error(phase: Phase, message: impl Into<String>) -> Self {
        Diagnostic {
            phase,
            message: message.into(),
            label: None,
            notes: Vec::new(),
            suggestion: None,
            source: None,
        }
    }

    pub fn with_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.label = Some(Label { span, message: label.into() });
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

// ---- From impls for the pipeline's error types ----

impl From<&crate::parser::ParseError> for Diagnostic {
    fn from(e: &crate::parser::ParseError) -> Self {
        let label = match &e.found {
            Some(text) => format!("found '{}'", text),
            None => "input ends here".to_string(),
        };
        let mut d = Diagnostic::error(Phase::Parse, e.to_string()).with_span(e.span, label);
        if e.found.is_none() {
            d = d.with_suggestion("check for a missing ')', ']' or '}'");
        }
        d
    }
}

impl From<&crate::asm::AssemblyError> for Diagnostic {
    fn from(e: &crate::asm::AssemblyError) -> Self {
        Diagnostic::error(Phase::Assembly, e.to_string())
    }
}

impl From<&crate::vm::RuntimeError> for Diagnostic {
    fn from(e: &crate::vm::RuntimeError) -> Self {
        use crate::vm::RuntimeError;

        let d = Diagnostic::error(Phase::Runtime, e.to_string());
        match e {
            RuntimeError::UnknownHandle { reference, .. } => d.with_suggestion(format!(
                "open the file first with ^path@{0} or vpath@{0}",
                reference
            )),
            RuntimeError::DivisionByZero { .. } => d.with_note("the right-hand side evaluated to 0"),
            RuntimeError::EndOfInput { .. } => d.with_note("no more lines were available to read"),
            _ => d,
        }
    }
}

impl From<&crate::CompileError> for Diagnostic {
    fn from(e: &crate::CompileError) -> Self {
        match e {
            crate::CompileError::Parse(e) => e.into(),
            crate::CompileError::Assembly(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_error_builder() {
        let d = Diagnostic::error(Phase::Runtime, "something went wrong");
        assert_eq!(d.phase, Phase::Runtime);
        assert_eq!(d.message, "something went wrong");
        assert!(d.label.is_none());
        assert!(d.notes.is_empty());
        assert!(d.suggestion.is_none());
    }

    #[test]
    fn diagnostic_with_span() {
        let d = Diagnostic::error(Phase::Parse, "bad token").with_span(Span { start: 5, end: 8 }, "here");
        let label = d.label.unwrap();
        assert_eq!(label.span, Span { start: 5, end: 8 });
        assert_eq!(label.message, "here");
    }

    #[test]
    fn from_parse_error() {
        let e = crate::parse("1d6 + kz").unwrap_err();
        let d = Diagnostic::from(&e);
        assert_eq!(d.phase, Phase::Parse);
        assert!(d.message.starts_with("Error line 1 column 7"), "{}", d.message);
        assert_eq!(d.label.unwrap().span, Span { start: 6, end: 8 });
        assert!(d.suggestion.is_none());
    }

    #[test]
    fn from_parse_error_at_end_of_input() {
        let e = crate::parse("(1d6").unwrap_err();
        let d = Diagnostic::from(&e);
        assert!(d.suggestion.is_some());
    }

    #[test]
    fn from_assembly_error() {
        let e = crate::asm::AssemblyError::UnresolvedLabel { label: crate::asm::Label(3) };
        let d = Diagnostic::from(&e);
        assert_eq!(d.phase, Phase::Assembly);
        assert!(d.message.contains(":L3"));
    }

    #[test]
    fn from_runtime_error() {
        let e = crate::vm::RuntimeError::UnknownHandle {
            ip: 4,
            reference: crate::vm::Reference { count: 1, sides: 2 },
        };
        let d = Diagnostic::from(&e);
        assert_eq!(d.phase, Phase::Runtime);
        assert!(d.label.is_none());
        assert!(d.suggestion.unwrap().contains("@1d2"));
    }
}
