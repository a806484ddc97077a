use super::ast::Span;

/// A compilation error with source location.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub message: String,
    pub span: Span,
    pub kind: ErrorKind,
    /// Resource the error was raised in, when compiling a corpus.
    pub source_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Lex,
    Parse,
    TypeName,
    Arity,
    TypeMismatch,
    UnresolvedCall,
    UndefinedVariable,
    DuplicateSchema,
    Codegen,
}

impl ErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Lex => "lex",
            ErrorKind::Parse => "parse",
            ErrorKind::TypeName => "type-name",
            ErrorKind::Arity => "arity",
            ErrorKind::TypeMismatch => "type",
            ErrorKind::UnresolvedCall => "unresolved",
            ErrorKind::UndefinedVariable => "undefined",
            ErrorKind::DuplicateSchema => "duplicate",
            ErrorKind::Codegen => "codegen",
        }
    }
}

impl CompileError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            kind,
            source_id: None,
        }
    }

    pub fn lex(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Lex, message, span)
    }

    pub fn parse(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Parse, message, span)
    }

    pub fn type_name(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::TypeName, message, span)
    }

    pub fn arity(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Arity, message, span)
    }

    pub fn mismatch(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::TypeMismatch, message, span)
    }

    pub fn unresolved(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::UnresolvedCall, message, span)
    }

    pub fn undefined(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::UndefinedVariable, message, span)
    }

    pub fn codegen(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Codegen, message, span)
    }

    /// Tag the error with the resource it came from, unless already tagged.
    pub fn in_source(mut self, source_id: &str) -> Self {
        if self.source_id.is_none() {
            self.source_id = Some(source_id.to_string());
        }
        self
    }

    /// Format the error with source context.
    pub fn format_with_source(&self, source: &str) -> String {
        let (line, col) = offset_to_line_col(source, self.span.start);
        match &self.source_id {
            Some(id) => format!(
                "[{}] {id}:{line}:{col}: {}",
                self.kind.label(),
                self.message
            ),
            None => format!("[{}] line {line}:{col}: {}", self.kind.label(), self.message),
        }
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.source_id {
            Some(id) => write!(f, "{id}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for CompileError {}

fn offset_to_line_col(source: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;
    for (i, ch) in source.char_indices() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_line_and_column() {
        let src = "schema() {\n  x\n}";
        let err = CompileError::undefined("undefined variable `x`", Span::new(13, 14));
        assert_eq!(
            err.format_with_source(src),
            "[undefined] line 2:3: undefined variable `x`"
        );
        let tagged = err.in_source("demo:greet");
        assert_eq!(
            tagged.format_with_source(src),
            "[undefined] demo:greet:2:3: undefined variable `x`"
        );
    }
}
