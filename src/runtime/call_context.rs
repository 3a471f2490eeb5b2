// Function call contexts
// One frame per invocation of a user function: instruction cursor, value
// stack, local-variable slots, exception-handler address and the flags the
// interpreter steers by. Local slot 0 is `this`, slot 1 the function itself,
// slot 2 the internal result; parameters and declared locals follow.
// Stack and local buffers are recycled through the opportunistic pools.

use crate::bytecode::{InstructionBlock, INVALID_JUMP_ADDRESS};
use crate::consts;
use crate::error::InternalError;
use crate::identifier::StringId;
use crate::objects::pool::BufferPool;
use crate::objects::{Object, UserFunction};
use std::mem;
use std::sync::Arc;

use super::RtValue;

static STACK_BUFFERS: BufferPool<Vec<RtValue>> = BufferPool::new(64);
static LOCAL_BUFFERS: BufferPool<Vec<Option<Object>>> = BufferPool::new(64);

pub struct FunctionCallContext {
    caller: Option<Object>,
    function: Arc<UserFunction>,
    cursor: usize,
    stack: Vec<RtValue>,
    locals: Vec<Option<Object>>,
    exception_handler_pos: u32,
    constructor_call: bool,
    provides_caller_as_result: bool,
    stop_execution_after_ending: bool,
}

impl FunctionCallContext {
    pub fn create(function: Arc<UserFunction>, caller: Option<Object>) -> Box<Self> {
        let stack = STACK_BUFFERS.acquire().unwrap_or_default();
        let mut locals = LOCAL_BUFFERS.acquire().unwrap_or_default();
        locals.resize(function.block().num_local_vars(), None);
        locals[consts::LOCAL_VAR_INDEX_THIS as usize] = caller.clone();
        locals[consts::LOCAL_VAR_INDEX_THIS_FN as usize] =
            Some(Object::UserFn(function.clone()));
        Box::new(Self {
            caller,
            function,
            cursor: 0,
            stack,
            locals,
            exception_handler_pos: INVALID_JUMP_ADDRESS,
            constructor_call: false,
            provides_caller_as_result: false,
            stop_execution_after_ending: false,
        })
    }

    // --- identity ---

    pub fn caller(&self) -> Option<&Object> {
        self.caller.as_ref()
    }

    /// Installs a new `this` object (constructor chaining).
    pub fn init_caller(&mut self, caller: Object) {
        self.locals[consts::LOCAL_VAR_INDEX_THIS as usize] = Some(caller.clone());
        self.caller = Some(caller);
    }

    pub fn user_function(&self) -> &Arc<UserFunction> {
        &self.function
    }

    pub fn block(&self) -> &InstructionBlock {
        self.function.block()
    }

    // --- cursor ---

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn set_cursor(&mut self, cursor: usize) {
        self.cursor = cursor;
    }

    pub fn advance(&mut self) {
        self.cursor += 1;
    }

    pub fn current_line(&self) -> Option<u32> {
        self.block().line(self.cursor.min(
            self.block().instructions().len().saturating_sub(1),
        ))
    }

    // --- flags ---

    pub fn is_constructor_call(&self) -> bool {
        self.constructor_call
    }

    pub fn mark_as_constructor_call(&mut self) {
        self.constructor_call = true;
    }

    pub fn provides_caller_as_result(&self) -> bool {
        self.provides_caller_as_result
    }

    pub fn mark_as_providing_caller_as_result(&mut self) {
        self.provides_caller_as_result = true;
    }

    pub fn is_execution_stopped_after_ending(&self) -> bool {
        self.stop_execution_after_ending
    }

    pub fn enable_stop_execution_after_ending(&mut self) {
        self.stop_execution_after_ending = true;
    }

    pub fn exception_handler_pos(&self) -> Option<u32> {
        (self.exception_handler_pos != INVALID_JUMP_ADDRESS).then_some(self.exception_handler_pos)
    }

    pub fn set_exception_handler_pos(&mut self, address: u32) {
        self.exception_handler_pos = address;
    }

    // --- value stack ---

    pub fn stack_size(&self) -> usize {
        self.stack.len()
    }

    pub fn stack_is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn stack_clear(&mut self) {
        self.stack.clear();
    }

    pub fn stack_push(&mut self, value: RtValue) {
        self.stack.push(value);
    }

    pub fn stack_push_object(&mut self, object: Object) {
        self.stack.push(RtValue::from(object));
    }

    pub fn stack_push_void(&mut self) {
        self.stack.push(RtValue::Void);
    }

    pub fn stack_dup(&mut self) -> Result<(), InternalError> {
        let top = self.stack.last().ok_or(InternalError::StackEmpty)?.clone();
        self.stack.push(top);
        Ok(())
    }

    pub fn stack_pop(&mut self) -> Result<RtValue, InternalError> {
        self.stack.pop().ok_or(InternalError::StackEmpty)
    }

    pub fn stack_pop_bool(&mut self) -> Result<bool, InternalError> {
        Ok(match self.stack_pop()? {
            RtValue::Undefined | RtValue::Void => false,
            RtValue::Bool(value) => value,
            RtValue::UInt32(_) | RtValue::Number(_) => true,
            RtValue::Identifier(_) | RtValue::StringIndex(_) => true,
            RtValue::Object(object) => object.to_bool(),
            RtValue::Frame(_) => return Err(InternalError::StackWrongDataType),
        })
    }

    pub fn stack_pop_u32(&mut self) -> Result<u32, InternalError> {
        match self.stack_pop()? {
            RtValue::UInt32(value) => Ok(value),
            RtValue::Number(value) => Ok(value as u32),
            RtValue::Object(Object::Number(value)) => Ok(value as u32),
            _ => Err(InternalError::StackWrongDataType),
        }
    }

    pub fn stack_pop_identifier(&mut self) -> Result<StringId, InternalError> {
        match self.stack_pop()? {
            RtValue::Identifier(id) => Ok(id),
            RtValue::StringIndex(index) => {
                let name = self
                    .block()
                    .string_constant(index)
                    .ok_or(InternalError::StackWrongDataType)?;
                Ok(StringId::new(name))
            }
            RtValue::Object(Object::Identifier(id)) => Ok(id),
            RtValue::Object(Object::String(name)) => Ok(StringId::new(&name)),
            _ => Err(InternalError::StackWrongDataType),
        }
    }

    /// Pops a full object reference; primitives are boxed, string-pool
    /// entries are materialised. Undefined yields `None`.
    pub fn stack_pop_object(&mut self) -> Result<Option<Object>, InternalError> {
        let value = self.stack_pop()?;
        Ok(self.rt_value_to_object(value))
    }

    /// Like `stack_pop_object`, additionally cloning values of
    /// call-by-value types.
    pub fn stack_pop_object_value(&mut self) -> Result<Option<Object>, InternalError> {
        let value = self.stack_pop()?;
        match value {
            RtValue::Object(object) => Ok(Some(object.get_ref_or_copy())),
            other => Ok(self.rt_value_to_object(other)),
        }
    }

    fn rt_value_to_object(&self, value: RtValue) -> Option<Object> {
        match value {
            RtValue::Undefined | RtValue::Frame(_) => None,
            RtValue::Void => Some(Object::Void),
            RtValue::Bool(value) => Some(Object::Bool(value)),
            RtValue::UInt32(value) => Some(Object::number(value as f64)),
            RtValue::Number(value) => Some(Object::number(value)),
            RtValue::Identifier(id) => Some(Object::identifier(id)),
            RtValue::StringIndex(index) => Some(Object::string(
                self.block().string_constant(index).unwrap_or_default(),
            )),
            RtValue::Object(object) => Some(object),
        }
    }

    pub fn stack_to_dbg_string(&self) -> String {
        let entries: Vec<String> = self.stack.iter().map(RtValue::to_dbg_string).collect();
        format!("[{}]", entries.join(", "))
    }

    // --- locals ---

    pub fn get_local_variable(&self, index: u32) -> Option<Object> {
        self.locals.get(index as usize).cloned().flatten()
    }

    pub fn assign_to_local_variable(
        &mut self,
        index: u32,
        value: Option<Object>,
    ) -> Result<(), InternalError> {
        match self.locals.get_mut(index as usize) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(InternalError::UnknownLocalVariable),
        }
    }

    pub fn reset_local_variable(&mut self, index: u32) -> Result<(), InternalError> {
        self.assign_to_local_variable(index, None)
    }

    pub fn local_variable_name(&self, index: u32) -> Option<StringId> {
        self.block().local_variable_name(index)
    }

    pub fn local_variables_to_string(&self, include_undefined: bool) -> String {
        let mut out = String::new();
        for (index, name) in self.block().local_variables().iter().enumerate() {
            let value = self.get_local_variable(index as u32);
            if value.is_none() && !include_undefined {
                continue;
            }
            let rendered = value
                .map(|object| object.to_dbg_string())
                .unwrap_or_else(|| "undefined".to_string());
            out.push_str(&format!("${}={}\t", name, rendered));
        }
        out
    }

    // --- function-scoped statics ---

    pub fn get_static_var(&self, index: u32) -> Result<Option<Object>, InternalError> {
        self.function.get_static_var(index)
    }

    pub fn set_static_var(&self, index: u32, value: Option<Object>) -> Result<(), InternalError> {
        self.function.set_static_var(index, value)
    }
}

impl Drop for FunctionCallContext {
    fn drop(&mut self) {
        let mut stack = mem::take(&mut self.stack);
        stack.clear();
        STACK_BUFFERS.release(stack);
        let mut locals = mem::take(&mut self.locals);
        locals.clear();
        LOCAL_BUFFERS.release(locals);
    }
}

impl std::fmt::Debug for FunctionCallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionCallContext")
            .field("cursor", &self.cursor)
            .field("stack", &self.stack.len())
            .field("locals", &self.locals.len())
            .field("constructor_call", &self.constructor_call)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Instruction;

    fn sample_function() -> Arc<UserFunction> {
        let mut block = InstructionBlock::new();
        block.add_string_constant("greeting");
        block.declare_local(StringId::new("a"));
        block.emit(Instruction::PushVoid);
        Arc::new(UserFunction::new(block, 1, 1))
    }

    #[test]
    fn reserved_locals_are_seeded_on_creation() {
        let caller = Object::Ext(crate::objects::ExtObject::create());
        let frame = FunctionCallContext::create(sample_function(), Some(caller.clone()));
        assert!(frame
            .get_local_variable(consts::LOCAL_VAR_INDEX_THIS)
            .unwrap()
            .same(&caller));
        assert!(matches!(
            frame.get_local_variable(consts::LOCAL_VAR_INDEX_THIS_FN),
            Some(Object::UserFn(_))
        ));
        assert!(frame
            .get_local_variable(consts::LOCAL_VAR_INDEX_INTERNAL_RESULT)
            .is_none());
    }

    #[test]
    fn typed_pops_convert_and_box() {
        let mut frame = FunctionCallContext::create(sample_function(), None);
        frame.stack_push(RtValue::Number(4.0));
        frame.stack_push(RtValue::StringIndex(0));
        frame.stack_push(RtValue::Bool(true));

        assert!(frame.stack_pop_bool().unwrap());
        let text = frame.stack_pop_object().unwrap().unwrap();
        assert_eq!(text.to_string_repr(), "greeting");
        assert_eq!(frame.stack_pop_u32().unwrap(), 4);
        assert!(frame.stack_pop().is_err());
    }

    #[test]
    fn pop_object_value_clones_call_by_value_objects() {
        let mut frame = FunctionCallContext::create(sample_function(), None);
        frame.stack_push(RtValue::Object(Object::string("abc")));
        let popped = frame.stack_pop_object_value().unwrap().unwrap();
        assert_eq!(popped.to_string_repr(), "abc");
    }

    #[test]
    fn exception_handler_roundtrip() {
        let mut frame = FunctionCallContext::create(sample_function(), None);
        assert!(frame.exception_handler_pos().is_none());
        frame.set_exception_handler_pos(9);
        assert_eq!(frame.exception_handler_pos(), Some(9));
        frame.set_exception_handler_pos(INVALID_JUMP_ADDRESS);
        assert!(frame.exception_handler_pos().is_none());
    }
}
