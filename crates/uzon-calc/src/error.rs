use std::fmt::{self, Write};
use std::ops::Range;
use std::path::PathBuf;

use strum_macros::IntoStaticStr;
use thiserror::Error;

use crate::units::UnitError;
use math_ir::html_utils::{escape_double_quoted_html_attribute, escape_html_content};

/// Represents an error that occurred while lexing or parsing a calculation script.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError(pub Range<usize>, pub(crate) ParseErrKind);

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ParseErrKind {
    UnexpectedChar(char),
    UnmatchedBracket(char),
    UnclosedBracket(char),
    InconsistentDedent,
    UnexpectedIndent,
    IntegerTooLarge(Box<str>),
    InvalidNumber(Box<str>),
    UnterminatedString,
    InvalidEscape(Box<str>),
    InvalidFString(&'static str),
    Unsupported(&'static str),
    UnexpectedToken {
        expected: &'static str,
        got: Box<str>,
    },
    UnexpectedEof(&'static str),
    InvalidAssignTarget(&'static str),
}

impl ParseErrKind {
    /// Returns the error message as a string.
    ///
    /// This serves the same purpose as the `Display` implementation,
    /// but produces more compact WASM code.
    pub fn string(&self) -> String {
        match self {
            ParseErrKind::UnexpectedChar(ch) => {
                "Unexpected character '".to_string() + ch.encode_utf8(&mut [0; 4]) + "'."
            }
            ParseErrKind::UnmatchedBracket(close) => {
                "Unmatched '".to_string() + close.encode_utf8(&mut [0; 4]) + "'."
            }
            ParseErrKind::UnclosedBracket(close) => {
                "Expected '".to_string()
                    + close.encode_utf8(&mut [0; 4])
                    + "' before the end of input."
            }
            ParseErrKind::InconsistentDedent => {
                "Unindent does not match any outer indentation level.".to_string()
            }
            ParseErrKind::UnexpectedIndent => "Unexpected indent.".to_string(),
            ParseErrKind::IntegerTooLarge(text) => {
                "Integer literal '".to_string() + text + "' is too large."
            }
            ParseErrKind::InvalidNumber(text) => "Invalid number '".to_string() + text + "'.",
            ParseErrKind::UnterminatedString => "Unterminated string literal.".to_string(),
            ParseErrKind::InvalidEscape(escape) => {
                "Invalid escape sequence '".to_string() + escape + "'."
            }
            ParseErrKind::InvalidFString(reason) => "f-string: ".to_string() + reason + ".",
            ParseErrKind::Unsupported(what) => what.to_string() + " are not supported.",
            ParseErrKind::UnexpectedToken { expected, got } => {
                "Expected ".to_string() + expected + ", got " + got + "."
            }
            ParseErrKind::UnexpectedEof(expected) => {
                "Expected ".to_string() + expected + ", got end of input."
            }
            ParseErrKind::InvalidAssignTarget(kind) => {
                "Cannot assign to ".to_string() + kind + "."
            }
        }
    }
}

impl ParseError {
    /// Format a parse error as an HTML snippet.
    ///
    /// The error message is put into the `title` attribute of the wrapping element, and the
    /// offending source is shown escaped inside a `<code>` element.
    pub fn to_html(&self, source: &str, css_class: Option<&str>) -> String {
        let mut output = String::new();
        let css_class = css_class.unwrap_or("uzon-calc-error");
        let _ = write!(
            output,
            r#"<p class="{}" title="{}: "#,
            css_class, self.0.start
        );
        escape_double_quoted_html_attribute(&mut output, &self.1.string());
        output.push_str(r#""><code>"#);
        escape_html_content(&mut output, source);
        output.push_str("</code></p>");
        output
    }

    /// Returns the error message as a string.
    pub fn error_message(&self) -> String {
        self.1.string()
    }

    /// 1-based line of the error start in `source`.
    pub fn line(&self, source: &str) -> u32 {
        let end = self.0.start.min(source.len());
        let newlines = memchr::memchr_iter(b'\n', &source.as_bytes()[..end]).count();
        u32::try_from(newlines).unwrap_or(u32::MAX - 1) + 1
    }
}

#[cfg(feature = "ariadne")]
impl ParseError {
    /// Build an [`ariadne::Report`] pointing at the offending source range.
    pub fn to_report<'name>(
        &self,
        source_name: &'name str,
        with_color: bool,
    ) -> ariadne::Report<'static, (&'name str, Range<usize>)> {
        use ariadne::{Label, Report, ReportKind};

        let label_msg = match &self.1 {
            ParseErrKind::UnexpectedChar(_) => "unexpected character".into(),
            ParseErrKind::UnmatchedBracket(_) => "no matching opening bracket".into(),
            ParseErrKind::UnclosedBracket(close) => format!("expected \"{close}\" to close this"),
            ParseErrKind::InconsistentDedent => "inconsistent indentation".into(),
            ParseErrKind::UnexpectedIndent => "unexpected indent".into(),
            ParseErrKind::IntegerTooLarge(_) => "does not fit into 64 bits".into(),
            ParseErrKind::InvalidNumber(_) => "invalid number".into(),
            ParseErrKind::UnterminatedString => "string starts here".into(),
            ParseErrKind::InvalidEscape(_) => "invalid escape".into(),
            ParseErrKind::InvalidFString(reason) => (*reason).into(),
            ParseErrKind::Unsupported(_) => "not supported".into(),
            ParseErrKind::UnexpectedToken { expected, .. } => format!("expected {expected}"),
            ParseErrKind::UnexpectedEof(expected) => format!("expected {expected}"),
            ParseErrKind::InvalidAssignTarget(_) => "cannot be assigned to".into(),
        };

        let mut config = ariadne::Config::default().with_index_type(ariadne::IndexType::Byte);
        if !with_color {
            config = config.with_color(false);
        }
        Report::build(ReportKind::Error, (source_name, self.0.start..self.0.start))
            .with_config(config)
            .with_message(self.1.string())
            .with_label(Label::new((source_name, self.0.clone())).with_message(label_msg))
            .finish()
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.0.start, self.1.string())
    }
}

impl std::error::Error for ParseError {}

/// Lowering met a sub-tree it cannot turn into math.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AstConversionError {
    #[error("malformed {kind} at line {line}: {reason}")]
    Malformed {
        kind: &'static str,
        line: u32,
        reason: &'static str,
    },
    #[error("unit expression at line {line}: {source}")]
    Unit { line: u32, source: UnitError },
}

/// The rewritten tree contains a node outside the allow-list.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("disallowed node '{kind}' at line {line}")]
pub struct ValidationError {
    pub kind: &'static str,
    pub line: u32,
}

/// The stage of instrumentation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    Extract,
    Parse,
    Lower,
    Validate,
    Exec,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(<&str>::from(self))
    }
}

#[derive(Debug, Clone, Error)]
pub enum InstrumentationCause {
    #[error("{0}")]
    Extract(String),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Lower(#[from] AstConversionError),
    #[error(transparent)]
    Validate(#[from] ValidationError),
    #[error(transparent)]
    Exec(#[from] ScriptError),
}

impl InstrumentationCause {
    pub fn phase(&self) -> Phase {
        match self {
            InstrumentationCause::Extract(_) => Phase::Extract,
            InstrumentationCause::Parse(_) => Phase::Parse,
            InstrumentationCause::Lower(_) => Phase::Lower,
            InstrumentationCause::Validate(_) => Phase::Validate,
            InstrumentationCause::Exec(_) => Phase::Exec,
        }
    }
}

/// A function could not be instrumented.
#[derive(Debug, Clone, Error)]
#[error("failed to instrument '{function}' ({}): {cause}", .cause.phase())]
pub struct InstrumentationError {
    pub function: String,
    #[source]
    pub cause: InstrumentationCause,
}

impl InstrumentationError {
    pub fn new(function: impl Into<String>, cause: impl Into<InstrumentationCause>) -> Self {
        InstrumentationError {
            function: function.into(),
            cause: cause.into(),
        }
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.cause.phase()
    }
}

/// An error raised while a script runs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    /// An uncaught exception, with the exception class name.
    #[error("{kind}: {message}{}", .line.map(|line| format!(" (line {line})")).unwrap_or_default())]
    Raised {
        kind: String,
        message: String,
        line: Option<u32>,
    },
    #[error("Cancelled")]
    Cancelled,
}

impl ScriptError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        ScriptError::Raised {
            kind: kind.into(),
            message: message.into(),
            line: None,
        }
    }

    /// The exception class name, `"Cancelled"` for cancellation.
    pub fn kind(&self) -> &str {
        match self {
            ScriptError::Raised { kind, .. } => kind,
            ScriptError::Cancelled => "Cancelled",
        }
    }

    pub fn line(&self) -> Option<u32> {
        match self {
            ScriptError::Raised { line, .. } => *line,
            ScriptError::Cancelled => None,
        }
    }
}

/// Running a script file failed.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("cannot read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{}:{line}: {}", .path.display(), .source.error_message())]
    Parse {
        path: PathBuf,
        line: u32,
        source: ParseError,
    },
    #[error("No entry point found. Please decorate a function with @uzon_calc")]
    NoEntryPoint,
    #[error(transparent)]
    Instrumentation(#[from] InstrumentationError),
    #[error("{}: {source}", .path.display())]
    Script { path: PathBuf, source: ScriptError },
}

impl RunError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            RunError::Script {
                source: ScriptError::Cancelled,
                ..
            }
        )
    }
}

/// A request to the executor service failed.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Execution {0} not found")]
    ExecutionNotFound(String),
    #[error("Execution {id} timed out after {secs} seconds")]
    Timeout { id: String, secs: u64 },
    #[error(transparent)]
    Run(#[from] RunError),
    #[error("execution worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_html() {
        let err = ParseError(4..5, ParseErrKind::UnexpectedChar('$'));
        assert_eq!(
            err.to_html("a = $", None),
            r#"<p class="uzon-calc-error" title="4: Unexpected character '$'."><code>a = $</code></p>"#
        );
        assert_eq!(err.to_string(), "4: Unexpected character '$'.");
    }

    #[test]
    fn parse_error_line() {
        let err = ParseError(8..9, ParseErrKind::UnexpectedIndent);
        assert_eq!(err.line("a = 1\nb\n c"), 3);
        assert_eq!(err.line("abc"), 1);
        let err = ParseError(6..7, ParseErrKind::UnexpectedChar('b'));
        assert_eq!(err.line("a = 1\nb\n c"), 2);
    }

    #[test]
    fn instrumentation_error_names_function_and_phase() {
        let err = InstrumentationError::new(
            "sheet",
            ValidationError {
                kind: "Global",
                line: 3,
            },
        );
        assert_eq!(err.phase(), Phase::Validate);
        assert_eq!(
            err.to_string(),
            "failed to instrument 'sheet' (validate): disallowed node 'Global' at line 3"
        );
    }

    #[test]
    fn script_error_display() {
        let err = ScriptError::Raised {
            kind: "ZeroDivisionError".to_string(),
            message: "division by zero".to_string(),
            line: Some(4),
        };
        assert_eq!(err.to_string(), "ZeroDivisionError: division by zero (line 4)");
        assert_eq!(ScriptError::new("ValueError", "bad").to_string(), "ValueError: bad");
    }
}
