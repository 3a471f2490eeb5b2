// Instruction set
// Each instruction is an opcode plus a small payload. Jump payloads are
// absolute instruction addresses; markers are compiler artefacts that have
// already been resolved and are no-ops at runtime.

use crate::consts;
use crate::identifier::StringId;
use serde::{Deserialize, Serialize};

use super::InstructionBlock;

/// Address value meaning "no jump target" (used for the exception handler
/// of a frame that has none).
pub const INVALID_JUMP_ADDRESS: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    PushVoid,
    PushUndefined,
    PushBool(bool),
    PushNumber(f64),
    PushUint(u32),
    PushId(StringId),
    /// Push an entry of the enclosing function's string-constant pool.
    PushString(u32),
    /// Push an entry of the enclosing function's nested-function list.
    PushFunction(u32),
    Pop,
    Dup,
    Not,
    Jmp(u32),
    JmpOnTrue(u32),
    JmpOnFalse(u32),
    /// Pops a local-variable index; jumps if that local is set.
    JmpIfSet(u32),
    /// Compiler artefact; no-op after jump finalisation.
    SetMarker(u32),
    GetLocalVariable(u32),
    AssignLocal(u32),
    ResetLocalVariable(u32),
    GetVariable(StringId),
    /// Pushes (owner, value): the caller and its attribute, or the globals
    /// and the global value.
    FindVariable(StringId),
    AssignVariable(StringId),
    GetAttribute(StringId),
    SetAttribute(StringId),
    AssignAttribute(StringId),
    Call(u32),
    CreateInstance(u32),
    /// Invokes the next queued super constructor inside a constructor frame.
    InitCaller(u32),
    SetExceptionHandler(u32),
    SysCall { fn_id: u32, num_params: u32 },
    Yield,
}

impl Instruction {
    /// Human-readable rendering, resolving pool indices through `block`.
    pub fn describe(&self, block: &InstructionBlock) -> String {
        match *self {
            Instruction::PushVoid => "pushVoid".to_string(),
            Instruction::PushUndefined => "pushUndefined".to_string(),
            Instruction::PushBool(value) => format!("pushBool {}", value),
            Instruction::PushNumber(value) => format!("pushNumber {}", value),
            Instruction::PushUint(value) => format!("pushUint {}", value),
            Instruction::PushId(id) => format!("pushId '{}'", id),
            Instruction::PushString(index) => format!(
                "pushString #{} \"{}\"",
                index,
                block.string_constant(index).unwrap_or_default()
            ),
            Instruction::PushFunction(index) => format!("pushFunction #{}", index),
            Instruction::Pop => "pop".to_string(),
            Instruction::Dup => "dup".to_string(),
            Instruction::Not => "not".to_string(),
            Instruction::Jmp(address) => format!("jmp @{}", address),
            Instruction::JmpOnTrue(address) => format!("jmpOnTrue @{}", address),
            Instruction::JmpOnFalse(address) => format!("jmpOnFalse @{}", address),
            Instruction::JmpIfSet(address) => format!("jmpIfSet @{}", address),
            Instruction::SetMarker(marker) => format!("setMarker {}", marker),
            Instruction::GetLocalVariable(index) => format!(
                "getLocalVariable ${}({})",
                index,
                block.local_variable_name(index).map(|id| id.to_string()).unwrap_or_default()
            ),
            Instruction::AssignLocal(index) => format!("assignLocal ${}", index),
            Instruction::ResetLocalVariable(index) => format!("resetLocalVariable ${}", index),
            Instruction::GetVariable(id) => format!("getVariable '{}'", id),
            Instruction::FindVariable(id) => format!("findVariable '{}'", id),
            Instruction::AssignVariable(id) => format!("assignVariable '{}'", id),
            Instruction::GetAttribute(id) => format!("getAttribute '{}'", id),
            Instruction::SetAttribute(id) => format!("setAttribute '{}'", id),
            Instruction::AssignAttribute(id) => format!("assignAttribute '{}'", id),
            Instruction::Call(num_params) if num_params == consts::DYNAMIC_PARAMETER_COUNT => {
                "call (dynamic)".to_string()
            }
            Instruction::Call(num_params) => format!("call ({})", num_params),
            Instruction::CreateInstance(num_params) => format!("createInstance ({})", num_params),
            Instruction::InitCaller(num_params) => format!("initCaller ({})", num_params),
            Instruction::SetExceptionHandler(address) if address == INVALID_JUMP_ADDRESS => {
                "setExceptionHandler (none)".to_string()
            }
            Instruction::SetExceptionHandler(address) => {
                format!("setExceptionHandler @{}", address)
            }
            Instruction::SysCall { fn_id, num_params } => {
                format!("sysCall #{} ({})", fn_id, num_params)
            }
            Instruction::Yield => "yield".to_string(),
        }
    }
}
