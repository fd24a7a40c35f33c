use crate::error::ScriptError;
use crate::units::UnitError;

use super::value::Value;

/// An error raised by a builtin operation, named by its exception class.
///
/// It becomes an exception object only when a script handler catches it.
#[derive(Debug, Clone, PartialEq)]
pub struct OpError {
    pub kind: &'static str,
    pub message: String,
}

impl OpError {
    pub fn new(kind: &'static str, message: impl Into<String>) -> Self {
        OpError {
            kind,
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        OpError::new("TypeError", message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        OpError::new("ValueError", message)
    }

    pub fn runtime_error(message: impl Into<String>) -> Self {
        OpError::new("RuntimeError", message)
    }

    pub fn attribute_error(owner: &str, attr: &str) -> Self {
        OpError::new(
            "AttributeError",
            format!("'{owner}' object has no attribute '{attr}'"),
        )
    }

    pub fn zero_division(message: impl Into<String>) -> Self {
        OpError::new("ZeroDivisionError", message)
    }

    pub fn overflow() -> Self {
        OpError::new("OverflowError", "integer result does not fit into 64 bits")
    }
}

impl From<UnitError> for OpError {
    fn from(err: UnitError) -> Self {
        let kind = match err {
            UnitError::Undefined(_) => "UndefinedUnitError",
            UnitError::Syntax { .. } => "ValueError",
            UnitError::Dimensionality { .. } => "DimensionalityError",
        };
        OpError::new(kind, err.to_string())
    }
}

/// Non-local exits while a script runs.
pub enum Exc {
    /// An error from a builtin operation.
    Error { error: OpError, line: Option<u32> },
    /// A `raise` of an exception object.
    Raised { value: Value, line: Option<u32> },
    /// The run was cancelled; script handlers cannot catch this.
    Cancelled,
}

impl Exc {
    /// Records `line` as the origin unless one is already known.
    pub fn at_line(mut self, at: u32) -> Self {
        match &mut self {
            Exc::Error { line, .. } | Exc::Raised { line, .. } if line.is_none() => {
                *line = Some(at);
            }
            _ => {}
        }
        self
    }

    pub fn into_script_error(self) -> ScriptError {
        match self {
            Exc::Error { error, line } => ScriptError::Raised {
                kind: error.kind.to_string(),
                message: error.message,
                line,
            },
            Exc::Raised { value, line } => {
                let (kind, message) = match &value {
                    Value::Instance(instance) => {
                        (instance.class.name.clone(), instance.exception_message())
                    }
                    other => ("TypeError".to_string(), other.to_str()),
                };
                ScriptError::Raised {
                    kind,
                    message,
                    line,
                }
            }
            Exc::Cancelled => ScriptError::Cancelled,
        }
    }
}

impl From<OpError> for Exc {
    fn from(error: OpError) -> Self {
        Exc::Error { error, line: None }
    }
}

impl From<UnitError> for Exc {
    fn from(err: UnitError) -> Self {
        Exc::from(OpError::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_line_wins() {
        let exc = Exc::from(OpError::value_error("bad")).at_line(3).at_line(7);
        assert_eq!(
            exc.into_script_error(),
            ScriptError::Raised {
                kind: "ValueError".to_string(),
                message: "bad".to_string(),
                line: Some(3),
            }
        );
        assert_eq!(
            Exc::Cancelled.at_line(2).into_script_error(),
            ScriptError::Cancelled
        );
    }

    #[test]
    fn unit_errors_map_to_exception_kinds() {
        let err = OpError::from(UnitError::Undefined("furlong".to_string()));
        assert_eq!(err.kind, "UndefinedUnitError");
    }
}
