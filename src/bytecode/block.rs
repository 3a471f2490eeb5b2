// InstructionBlock
// Per-function bytecode plus its constant pools: string constants, the
// local-variable name table (slot 0 `this`, slot 1 `thisFn`, slot 2
// `___result`, then parameters and declared locals) and referenced nested
// functions. Serialisable for diagnostics.

use crate::consts;
use crate::identifier::StringId;
use crate::objects::UserFunction;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::Instruction;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstructionBlock {
    instructions: Vec<Instruction>,
    /// Source line per instruction; 0 when unknown.
    lines: Vec<u32>,
    string_constants: Vec<String>,
    local_variable_names: Vec<StringId>,
    static_var_count: u32,
    functions: Vec<Arc<UserFunction>>,
    filename: String,
}

impl InstructionBlock {
    pub fn new() -> Self {
        let [this, this_fn, result] = consts::reserved_local_names();
        Self {
            instructions: Vec::new(),
            lines: Vec::new(),
            string_constants: Vec::new(),
            local_variable_names: vec![this, this_fn, result],
            static_var_count: 0,
            functions: Vec::new(),
            filename: String::new(),
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    // --- building (used by the compiler and by tests that hand-assemble) ---

    pub fn emit(&mut self, instruction: Instruction) {
        self.emit_at_line(instruction, 0);
    }

    pub fn emit_at_line(&mut self, instruction: Instruction, line: u32) {
        self.instructions.push(instruction);
        self.lines.push(line);
    }

    /// Declares a local variable and returns its slot index.
    pub fn declare_local(&mut self, name: StringId) -> u32 {
        self.local_variable_names.push(name);
        (self.local_variable_names.len() - 1) as u32
    }

    pub fn add_string_constant(&mut self, value: impl Into<String>) -> u32 {
        self.string_constants.push(value.into());
        (self.string_constants.len() - 1) as u32
    }

    pub fn add_function(&mut self, function: Arc<UserFunction>) -> u32 {
        self.functions.push(function);
        (self.functions.len() - 1) as u32
    }

    pub fn set_static_var_count(&mut self, count: u32) {
        self.static_var_count = count;
    }

    // --- access ---

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn instruction(&self, cursor: usize) -> Option<Instruction> {
        self.instructions.get(cursor).copied()
    }

    pub fn line(&self, cursor: usize) -> Option<u32> {
        self.lines.get(cursor).copied().filter(|&line| line > 0)
    }

    pub fn string_constant(&self, index: u32) -> Option<&str> {
        self.string_constants.get(index as usize).map(String::as_str)
    }

    pub fn local_variable_name(&self, index: u32) -> Option<StringId> {
        self.local_variable_names.get(index as usize).copied()
    }

    pub fn local_variables(&self) -> &[StringId] {
        &self.local_variable_names
    }

    pub fn num_local_vars(&self) -> usize {
        self.local_variable_names.len()
    }

    pub fn static_var_count(&self) -> u32 {
        self.static_var_count
    }

    pub fn function(&self, index: u32) -> Option<&Arc<UserFunction>> {
        self.functions.get(index as usize)
    }

    /// Disassembly listing, one instruction per line.
    pub fn to_listing(&self) -> String {
        let mut out = String::new();
        for (address, instruction) in self.instructions.iter().enumerate() {
            out.push_str(&format!("{:4}: {}\n", address, instruction.describe(self)));
        }
        out
    }
}

impl Default for InstructionBlock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_locals_are_seeded() {
        let block = InstructionBlock::new();
        assert_eq!(block.num_local_vars(), 3);
        assert_eq!(
            block
                .local_variable_name(consts::LOCAL_VAR_INDEX_THIS)
                .map(|id| id.to_string()),
            Some("this".to_string())
        );
        assert_eq!(
            block
                .local_variable_name(consts::LOCAL_VAR_INDEX_INTERNAL_RESULT)
                .map(|id| id.to_string()),
            Some("___result".to_string())
        );
    }

    #[test]
    fn declared_locals_start_after_reserved_slots() {
        let mut block = InstructionBlock::new();
        let a = block.declare_local(StringId::new("a"));
        let b = block.declare_local(StringId::new("b"));
        assert_eq!(a, consts::LOCAL_VAR_INDEX_FIRST_PARAMETER);
        assert_eq!(b, a + 1);
    }

    #[test]
    fn serde_round_trip_preserves_payloads() {
        let mut block = InstructionBlock::new().with_filename("demo.escript");
        let greeting = block.add_string_constant("hello");
        block.emit(Instruction::PushString(greeting));
        block.emit_at_line(Instruction::PushNumber(2.5), 7);
        block.emit(Instruction::PushId(StringId::new("x")));
        block.emit(Instruction::SysCall {
            fn_id: consts::sys_call::CREATE_ARRAY,
            num_params: consts::DYNAMIC_PARAMETER_COUNT,
        });
        block.emit(Instruction::Jmp(4));

        let json = serde_json::to_string(&block).unwrap();
        let restored: InstructionBlock = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.instructions(), block.instructions());
        assert_eq!(restored.string_constant(greeting), Some("hello"));
        assert_eq!(restored.line(1), Some(7));
        assert_eq!(restored.filename(), "demo.escript");
    }

    #[test]
    fn listing_resolves_pool_entries() {
        let mut block = InstructionBlock::new();
        let index = block.add_string_constant("boom");
        block.emit(Instruction::PushString(index));
        let listing = block.to_listing();
        assert!(listing.contains("pushString #0 \"boom\""));
    }
}
