// Error types
// A ScriptError is what native functions and attribute machinery raise; the
// runtime normalises it into a pending exception. InternalError covers
// interpreter misuse (typed pop on an empty stack, bad slot index) and is
// also turned into a pending exception rather than unwinding the host.

use crate::objects::Object;
use std::fmt;

#[derive(Debug, Clone)]
pub enum ScriptError {
    /// A fully formed exception object to be set as the pending exception.
    Exception(Object),
    /// A plain message; the runtime wraps it into an exception object with
    /// file/line/stack context.
    Message(String),
}

pub type ScriptResult<T> = Result<T, ScriptError>;

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptError::Exception(value) => write!(f, "{}", value.to_string_repr()),
            ScriptError::Message(message) => write!(f, "{}", message),
        }
    }
}

impl From<String> for ScriptError {
    fn from(message: String) -> Self {
        ScriptError::Message(message)
    }
}

impl From<&str> for ScriptError {
    fn from(message: &str) -> Self {
        ScriptError::Message(message.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalError {
    StackEmpty,
    StackWrongDataType,
    UnknownLocalVariable,
    UnknownStaticVariable,
}

impl fmt::Display for InternalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            InternalError::StackEmpty => "Empty stack.",
            InternalError::StackWrongDataType => "Wrong data type on stack.",
            InternalError::UnknownLocalVariable => "Invalid local variable.",
            InternalError::UnknownStaticVariable => "Invalid static variable.",
        };
        write!(f, "Internal error: {}", reason)
    }
}

impl From<InternalError> for ScriptError {
    fn from(error: InternalError) -> Self {
        ScriptError::Message(error.to_string())
    }
}
