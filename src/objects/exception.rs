// Exceptions
// Script exceptions carry a message plus the file/line where they were
// raised and, when enabled, a rendered call-stack description. They are
// extendable objects: user code may attach further attributes.

use parking_lot::Mutex;
use std::sync::Arc;

use super::type_object::{exception_type, TypeObject};
use super::AttributeContainer;

pub struct ExceptionObject {
    type_ref: Arc<TypeObject>,
    message: String,
    file: String,
    line: Option<u32>,
    stack_info: Mutex<Option<String>>,
    pub(super) attributes: Mutex<AttributeContainer>,
}

impl ExceptionObject {
    pub fn new(message: impl Into<String>) -> Arc<Self> {
        Self::with_context(message, String::new(), None)
    }

    pub fn with_context(
        message: impl Into<String>,
        file: impl Into<String>,
        line: Option<u32>,
    ) -> Arc<Self> {
        Self::with_type(exception_type().clone(), message, file, line)
    }

    /// Constructor used by factories of derived exception types.
    pub fn with_type(
        type_ref: Arc<TypeObject>,
        message: impl Into<String>,
        file: impl Into<String>,
        line: Option<u32>,
    ) -> Arc<Self> {
        Arc::new(Self {
            type_ref,
            message: message.into(),
            file: file.into(),
            line,
            stack_info: Mutex::new(None),
            attributes: Mutex::new(AttributeContainer::new()),
        })
    }

    pub fn get_type(&self) -> &Arc<TypeObject> {
        &self.type_ref
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn line(&self) -> Option<u32> {
        self.line
    }

    pub fn stack_info(&self) -> Option<String> {
        self.stack_info.lock().clone()
    }

    pub fn set_stack_info(&self, info: String) {
        *self.stack_info.lock() = Some(info);
    }

    pub fn description(&self) -> String {
        let mut text = format!("[#Exception \"{}\"", self.message);
        if let Some(line) = self.line {
            text.push_str(&format!(" ('{}':~{})", self.file, line));
        } else if !self.file.is_empty() {
            text.push_str(&format!(" ('{}')", self.file));
        }
        text.push(']');
        text
    }
}

impl std::fmt::Debug for ExceptionObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}
