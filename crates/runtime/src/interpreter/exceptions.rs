//! Exception kinds and the non-local exits of the interpreter.

use std::fmt;
use std::rc::Rc;

use super::value::{ExceptionObject, Items, Value};

/// Built-in exception classes reachable from submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    BaseException,
    Exception,
    ArithmeticError,
    ZeroDivisionError,
    OverflowError,
    LookupError,
    IndexError,
    KeyError,
    ValueError,
    TypeError,
    NameError,
    UnboundLocalError,
    AttributeError,
    RuntimeError,
    RecursionError,
    NotImplementedError,
    AssertionError,
    StopIteration,
    MemoryError,
    ImportError,
    ModuleNotFoundError,
}

impl ExceptionKind {
    /// Kinds exposed by name in the capability namespace.
    pub const EXPOSED: &'static [ExceptionKind] = &[
        ExceptionKind::BaseException,
        ExceptionKind::Exception,
        ExceptionKind::ArithmeticError,
        ExceptionKind::ZeroDivisionError,
        ExceptionKind::OverflowError,
        ExceptionKind::LookupError,
        ExceptionKind::IndexError,
        ExceptionKind::KeyError,
        ExceptionKind::ValueError,
        ExceptionKind::TypeError,
        ExceptionKind::NameError,
        ExceptionKind::UnboundLocalError,
        ExceptionKind::AttributeError,
        ExceptionKind::RuntimeError,
        ExceptionKind::RecursionError,
        ExceptionKind::NotImplementedError,
        ExceptionKind::AssertionError,
        ExceptionKind::StopIteration,
        ExceptionKind::MemoryError,
        ExceptionKind::ImportError,
        ExceptionKind::ModuleNotFoundError,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ExceptionKind::BaseException => "BaseException",
            ExceptionKind::Exception => "Exception",
            ExceptionKind::ArithmeticError => "ArithmeticError",
            ExceptionKind::ZeroDivisionError => "ZeroDivisionError",
            ExceptionKind::OverflowError => "OverflowError",
            ExceptionKind::LookupError => "LookupError",
            ExceptionKind::IndexError => "IndexError",
            ExceptionKind::KeyError => "KeyError",
            ExceptionKind::ValueError => "ValueError",
            ExceptionKind::TypeError => "TypeError",
            ExceptionKind::NameError => "NameError",
            ExceptionKind::UnboundLocalError => "UnboundLocalError",
            ExceptionKind::AttributeError => "AttributeError",
            ExceptionKind::RuntimeError => "RuntimeError",
            ExceptionKind::RecursionError => "RecursionError",
            ExceptionKind::NotImplementedError => "NotImplementedError",
            ExceptionKind::AssertionError => "AssertionError",
            ExceptionKind::StopIteration => "StopIteration",
            ExceptionKind::MemoryError => "MemoryError",
            ExceptionKind::ImportError => "ImportError",
            ExceptionKind::ModuleNotFoundError => "ModuleNotFoundError",
        }
    }

    pub fn parent(self) -> Option<ExceptionKind> {
        use ExceptionKind::*;
        match self {
            BaseException => None,
            Exception => Some(BaseException),
            ArithmeticError | LookupError | ValueError | TypeError | NameError | AttributeError | RuntimeError
            | AssertionError | StopIteration | MemoryError | ImportError => Some(Exception),
            ZeroDivisionError | OverflowError => Some(ArithmeticError),
            IndexError | KeyError => Some(LookupError),
            UnboundLocalError => Some(NameError),
            RecursionError | NotImplementedError => Some(RuntimeError),
            ModuleNotFoundError => Some(ImportError),
        }
    }

    /// `issubclass(self, other)`
    pub fn is_subclass_of(self, other: ExceptionKind) -> bool {
        let mut current = Some(self);
        while let Some(kind) = current {
            if kind == other {
                return true;
            }
            current = kind.parent();
        }
        false
    }
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An exception travelling up the stack.
#[derive(Debug)]
pub struct RaisedException {
    /// The exception instance (`Value::Exception` or an exception `Value::Instance`)
    pub value: Value,
    /// Line of the innermost statement that raised, once known
    pub line: Option<usize>,
}

/// Why evaluation stopped early.
#[derive(Debug)]
pub enum Interrupt {
    Raised(Box<RaisedException>),
    /// The run was cancelled from outside (deadline passed)
    Cancelled,
}

impl Interrupt {
    /// A built-in exception with a single message argument.
    pub fn error(kind: ExceptionKind, message: impl Into<String>) -> Self {
        let value = Value::Exception(Rc::new(ExceptionObject::new(
            kind,
            Items::from(vec![Value::str(message.into())]),
        )));
        Interrupt::raised(value)
    }

    pub fn raised(value: Value) -> Self {
        Interrupt::Raised(Box::new(RaisedException { value, line: None }))
    }

    /// Attach a line number if none was recorded deeper down.
    pub fn at_line(mut self, line: usize) -> Self {
        if let Interrupt::Raised(raised) = &mut self {
            if raised.line.is_none() {
                raised.line = Some(line);
            }
        }
        self
    }
}

pub type Exec<T> = Result<T, Interrupt>;

/// Shorthand for returning a built-in exception.
pub fn fail<T>(kind: ExceptionKind, message: impl Into<String>) -> Exec<T> {
    Err(Interrupt::error(kind, message))
}

pub fn type_error<T>(message: impl Into<String>) -> Exec<T> {
    fail(ExceptionKind::TypeError, message)
}

pub fn value_error<T>(message: impl Into<String>) -> Exec<T> {
    fail(ExceptionKind::ValueError, message)
}

pub fn overflow<T>() -> Exec<T> {
    fail(ExceptionKind::OverflowError, "integer overflow")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hierarchy() {
        assert!(ExceptionKind::ZeroDivisionError.is_subclass_of(ExceptionKind::ArithmeticError));
        assert!(ExceptionKind::KeyError.is_subclass_of(ExceptionKind::LookupError));
        assert!(ExceptionKind::ModuleNotFoundError.is_subclass_of(ExceptionKind::Exception));
        assert!(!ExceptionKind::ValueError.is_subclass_of(ExceptionKind::TypeError));
        assert!(ExceptionKind::Exception.is_subclass_of(ExceptionKind::BaseException));
    }

    #[test]
    fn test_line_is_kept_from_innermost_frame() {
        let interrupt = Interrupt::error(ExceptionKind::ValueError, "bad").at_line(3).at_line(7);
        match interrupt {
            Interrupt::Raised(raised) => assert_eq!(raised.line, Some(3)),
            Interrupt::Cancelled => panic!("expected an exception"),
        }
    }
}
