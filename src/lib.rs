// EScript execution core
// Runs already-compiled instruction blocks: values, objects, attributes,
// inheritance, calls, constructors, exceptions, optional concurrent runtimes.
// The compiler producing the instruction blocks is not part of this crate.

pub mod bytecode;
pub mod consts;
pub mod error;
pub mod identifier;
pub mod logger;
pub mod objects;
pub mod runtime;

pub mod builtins;
#[cfg(feature = "threading")]
pub mod threading;

pub use bytecode::{Instruction, InstructionBlock};
pub use error::{ScriptError, ScriptResult};
pub use identifier::StringId;
pub use logger::{ConsoleLogger, LogLevel, Logger, MemoryLogger};
pub use objects::{
    AttrFlags, Attribute, AttributeContainer, Object, ATTR_NORMAL_ATTRIBUTE,
};
pub use runtime::{ParameterValues, RtValue, Runtime};
