// Interpreter
// The dispatch loop alternates between an exception/exit check and
// instruction execution. Function invocation and instance creation return
// either a finished value or a freshly built call frame that is pushed onto
// the active stack and interpreted in place of its caller.

use crate::bytecode::Instruction;
use crate::consts;
use crate::error::{ScriptError, ScriptResult};
use crate::identifier::StringId;
use crate::objects::{
    ArrayObject, AttrFlags, Attribute, InternalTypeId, Object, TypeObject, YieldIterator,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::call_context::FunctionCallContext;
use super::{ParameterValues, RtValue, Runtime};

pub(crate) enum Step {
    Continue,
    Return(Option<Object>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AssignOutcome {
    Assigned,
    NotFound,
    ConstViolation,
    PrivateViolation,
}

impl Runtime {
    pub(crate) fn frame(&mut self) -> &mut FunctionCallContext {
        self.frames
            .last_mut()
            .map(|frame| frame.as_mut())
            .expect("no active call frame")
    }

    fn frame_ref(&self) -> &FunctionCallContext {
        self.frames
            .last()
            .map(|frame| frame.as_ref())
            .expect("no active call frame")
    }

    pub(crate) fn calling_object(&self) -> Option<Object> {
        self.frames
            .last()
            .and_then(|frame| frame.caller().cloned())
    }

    pub(crate) fn push_active_frame(&mut self, frame: Box<FunctionCallContext>) {
        self.frames.push(frame);
        if self.frames.len() > self.stack_size_limit() {
            let message = format!(
                "The number of active functions ({}) reached its limit.",
                self.frames.len()
            );
            self.set_exception(message);
        }
    }

    // --- the loop ---

    /// Runs `frame` (and every frame it pushes) to completion. Returns the
    /// result object, or `None` when an exception or exit is left pending.
    pub(crate) fn execute_call_context(
        &mut self,
        mut frame: Box<FunctionCallContext>,
    ) -> Option<Object> {
        frame.enable_stop_execution_after_ending();
        self.push_active_frame(frame);

        loop {
            if !self.state.normal.load(Ordering::Acquire) {
                match self.handle_abnormal_state() {
                    Some(result) => return result,
                    None => continue,
                }
            }

            let instruction = {
                let frame = self.frame_ref();
                frame.block().instruction(frame.cursor())
            };
            match instruction {
                None => match self.finish_active_frame() {
                    Step::Return(result) => return result,
                    Step::Continue => continue,
                },
                Some(instruction) => match self.execute_instruction(instruction) {
                    Ok(Step::Continue) => {}
                    Ok(Step::Return(result)) => return result,
                    Err(error) => self.raise(error),
                },
            }
        }
    }

    /// Unwinds frames for a pending exception (stopping at the nearest
    /// handler) or a pending exit (never recovered). `Some(..)` means the
    /// outermost frame was left; `None` means execution continues in a
    /// handler.
    fn handle_abnormal_state(&mut self) -> Option<Option<Object>> {
        let state = self.state.clone();
        let mut values = state.values.lock();
        if values.exception.is_some() {
            loop {
                let Some(frame) = self.frames.last_mut() else {
                    return Some(None);
                };
                frame.stack_clear();
                if let Some(handler) = frame.exception_handler_pos() {
                    let exception = values.exception.take();
                    let _ = frame.assign_to_local_variable(
                        consts::LOCAL_VAR_INDEX_INTERNAL_RESULT,
                        exception,
                    );
                    frame.set_cursor(handler as usize);
                    let normal = values.exception.is_none() && values.exit.is_none();
                    state.normal.store(normal, Ordering::Release);
                    return None;
                } else if frame.is_execution_stopped_after_ending() {
                    self.frames.pop();
                    return Some(None);
                } else {
                    self.frames.pop();
                }
            }
        } else if values.exit.is_some() {
            loop {
                let Some(frame) = self.frames.last_mut() else {
                    return Some(None);
                };
                frame.stack_clear();
                let stop = frame.is_execution_stopped_after_ending();
                self.frames.pop();
                if stop {
                    return Some(None);
                }
            }
        } else {
            // flag and values disagree; restore the fast path
            state.normal.store(true, Ordering::Release);
            None
        }
    }

    /// Cursor ran past the last instruction: propagate the result into the
    /// calling frame (or out of the loop).
    fn finish_active_frame(&mut self) -> Step {
        let (is_constructor, mut result, stack_dirty) = {
            let frame = self.frame_ref();
            (
                frame.is_constructor_call(),
                frame.get_local_variable(consts::LOCAL_VAR_INDEX_INTERNAL_RESULT),
                frame.stack_size() != 0,
            )
        };
        if is_constructor {
            if result.is_some() {
                self.warn("Constructors should not return a value.");
            }
            // local 0 holds the created object; the frame's caller is the
            // instantiated Type
            result = self
                .frame_ref()
                .get_local_variable(consts::LOCAL_VAR_INDEX_THIS);
        }
        if stack_dirty {
            self.set_exception("(internal) Value stack of the ending call frame is not empty.");
            return Step::Continue;
        }
        let finished = self.frames.pop().expect("no active call frame");
        if finished.is_execution_stopped_after_ending() || self.frames.is_empty() {
            return Step::Return(result);
        }
        if finished.provides_caller_as_result() {
            // constructor chaining: the created object becomes the `this`
            // of the frame that issued the super call
            if let Some(result) = result {
                self.frame().init_caller(result);
            }
        } else {
            let value = result.map(|object| object.get_ref_or_copy());
            self.frame().stack_push(RtValue::from(value));
        }
        Step::Continue
    }

    // --- instruction dispatch ---

    fn execute_instruction(&mut self, instruction: Instruction) -> ScriptResult<Step> {
        match instruction {
            Instruction::PushVoid => {
                let frame = self.frame();
                frame.stack_push(RtValue::Void);
                frame.advance();
            }
            Instruction::PushUndefined => {
                let frame = self.frame();
                frame.stack_push(RtValue::Undefined);
                frame.advance();
            }
            Instruction::PushBool(value) => {
                let frame = self.frame();
                frame.stack_push(RtValue::Bool(value));
                frame.advance();
            }
            Instruction::PushNumber(value) => {
                let frame = self.frame();
                frame.stack_push(RtValue::Number(value));
                frame.advance();
            }
            Instruction::PushUint(value) => {
                let frame = self.frame();
                frame.stack_push(RtValue::UInt32(value));
                frame.advance();
            }
            Instruction::PushId(id) => {
                let frame = self.frame();
                frame.stack_push(RtValue::Identifier(id));
                frame.advance();
            }
            Instruction::PushString(index) => {
                let frame = self.frame();
                frame.stack_push(RtValue::StringIndex(index));
                frame.advance();
            }
            Instruction::PushFunction(index) => {
                let frame = self.frame();
                let function = frame
                    .block()
                    .function(index)
                    .cloned()
                    .ok_or_else(|| ScriptError::from("(internal) Invalid function index."))?;
                frame.stack_push_object(Object::UserFn(function));
                frame.advance();
            }
            Instruction::Pop => {
                let frame = self.frame();
                frame.stack_pop()?;
                frame.advance();
            }
            Instruction::Dup => {
                let frame = self.frame();
                frame.stack_dup()?;
                frame.advance();
            }
            Instruction::Not => {
                let frame = self.frame();
                let value = frame.stack_pop_bool()?;
                frame.stack_push(RtValue::Bool(!value));
                frame.advance();
            }
            Instruction::Jmp(address) => {
                self.frame().set_cursor(address as usize);
            }
            Instruction::JmpOnTrue(address) => {
                let frame = self.frame();
                if frame.stack_pop_bool()? {
                    frame.set_cursor(address as usize);
                } else {
                    frame.advance();
                }
            }
            Instruction::JmpOnFalse(address) => {
                let frame = self.frame();
                if !frame.stack_pop_bool()? {
                    frame.set_cursor(address as usize);
                } else {
                    frame.advance();
                }
            }
            Instruction::JmpIfSet(address) => {
                let frame = self.frame();
                let index = frame.stack_pop_u32()?;
                if frame.get_local_variable(index).is_some() {
                    frame.set_cursor(address as usize);
                } else {
                    frame.advance();
                }
            }
            Instruction::SetMarker(_) => {
                self.frame().advance();
            }
            Instruction::GetLocalVariable(index) => {
                let frame = self.frame();
                let value = frame.get_local_variable(index);
                frame.stack_push(RtValue::from(value));
                frame.advance();
            }
            Instruction::AssignLocal(index) => {
                let frame = self.frame();
                let value = frame.stack_pop_object_value()?;
                frame.assign_to_local_variable(index, value)?;
                frame.advance();
            }
            Instruction::ResetLocalVariable(index) => {
                let frame = self.frame();
                frame.reset_local_variable(index)?;
                frame.advance();
            }
            Instruction::GetVariable(id) => {
                self.op_get_variable(id)?;
            }
            Instruction::FindVariable(id) => {
                self.op_find_variable(id)?;
            }
            Instruction::AssignVariable(id) => {
                self.op_assign_variable(id)?;
            }
            Instruction::GetAttribute(id) => {
                self.op_get_attribute(id)?;
            }
            Instruction::SetAttribute(id) => {
                self.op_set_attribute(id)?;
            }
            Instruction::AssignAttribute(id) => {
                self.op_assign_attribute(id)?;
            }
            Instruction::Call(num_params) => {
                let params = self.pop_parameters(num_params)?;
                let (function, caller) = {
                    let frame = self.frame();
                    let function = frame.stack_pop_object()?;
                    let caller = frame.stack_pop_object()?;
                    (function, caller)
                };
                let result = self.start_function_execution(function, caller, params)?;
                self.frame().advance();
                match result {
                    RtValue::Frame(new_frame) => self.push_active_frame(new_frame),
                    value => self.frame().stack_push(value),
                }
            }
            Instruction::CreateInstance(num_params) => {
                let params = self.pop_parameters(num_params)?;
                let callee = self.frame().stack_pop_object()?;
                let type_object = match callee {
                    Some(Object::Type(type_object)) => type_object,
                    _ => {
                        self.set_exception("Can't instantiate object not of type 'Type'.");
                        self.frame().advance();
                        return Ok(Step::Continue);
                    }
                };
                let result = self.start_instance_creation(type_object, params)?;
                self.frame().advance();
                match result {
                    RtValue::Frame(new_frame) => self.push_active_frame(new_frame),
                    value => self.frame().stack_push(value),
                }
            }
            Instruction::InitCaller(num_params) => {
                return self.op_init_caller(num_params);
            }
            Instruction::SetExceptionHandler(address) => {
                let frame = self.frame();
                frame.set_exception_handler_pos(address);
                frame.advance();
            }
            Instruction::SysCall { fn_id, num_params } => {
                let params = self.pop_parameters(num_params)?;
                let result = self.sys_call(fn_id, params)?;
                self.frame().advance();
                match result {
                    RtValue::Frame(new_frame) => self.push_active_frame(new_frame),
                    value => self.frame().stack_push(value),
                }
            }
            Instruction::Yield => {
                return self.op_yield();
            }
        }
        Ok(Step::Continue)
    }

    fn op_get_variable(&mut self, id: StringId) -> ScriptResult<()> {
        if let Some(caller) = self.calling_object() {
            if let Some(attribute) = caller.get_attribute(id)? {
                let frame = self.frame();
                frame.stack_push_object(attribute.into_value());
                frame.advance();
                return Ok(());
            }
        }
        match self.get_global_variable(id) {
            Some(value) => self.frame().stack_push_object(value),
            None => {
                self.warn(format!("Variable not found: '{}'", id));
                self.frame().stack_push_void();
            }
        }
        self.frame().advance();
        Ok(())
    }

    fn op_find_variable(&mut self, id: StringId) -> ScriptResult<()> {
        if let Some(caller) = self.calling_object() {
            if let Some(attribute) = caller.get_attribute(id)? {
                let frame = self.frame();
                frame.stack_push_object(caller);
                frame.stack_push_object(attribute.into_value());
                frame.advance();
                return Ok(());
            }
        }
        match self.get_global_variable(id) {
            Some(value) => {
                let globals = self.get_globals();
                let frame = self.frame();
                frame.stack_push_object(globals);
                frame.stack_push_object(value);
            }
            None => {
                self.warn(format!("Variable not found: '{}'", id));
                let frame = self.frame();
                frame.stack_push_void();
                frame.stack_push_void();
            }
        }
        self.frame().advance();
        Ok(())
    }

    fn op_assign_variable(&mut self, id: StringId) -> ScriptResult<()> {
        let value = self
            .frame()
            .stack_pop_object_value()?
            .unwrap_or(Object::Void);
        let mut outcome = AssignOutcome::NotFound;
        if let Some(caller) = self.calling_object() {
            // assignment through the caller counts as self access
            outcome = self.try_assign_attribute(&caller, id, value.clone(), true, false)?;
        }
        if outcome == AssignOutcome::NotFound {
            let globals = self.get_globals();
            outcome = self.try_assign_attribute(&globals, id, value, true, true)?;
        }
        match outcome {
            AssignOutcome::Assigned | AssignOutcome::PrivateViolation => {}
            AssignOutcome::ConstViolation => {
                self.set_exception(format!("Cannot assign to const attribute '{}'.", id));
            }
            AssignOutcome::NotFound => {
                self.warn(format!("Attribute not found: '{}'", id));
            }
        }
        self.frame().advance();
        Ok(())
    }

    fn op_get_attribute(&mut self, id: StringId) -> ScriptResult<()> {
        let object = self.frame().stack_pop_object()?;
        let Some(object) = object else {
            self.warn(format!("Attribute not found: '{}'", id));
            let frame = self.frame();
            frame.stack_push_void();
            frame.advance();
            return Ok(());
        };
        match object.get_attribute(id)? {
            None => {
                self.warn(format!("Attribute not found: '{}'", id));
                self.frame().stack_push_void();
            }
            Some(attribute) => {
                let is_self = self
                    .frame_ref()
                    .caller()
                    .map_or(false, |caller| caller.same(&object));
                if attribute.is_private() && !is_self {
                    self.set_exception(format!(
                        "Cannot access private attribute '{}' from outside of its owning object.",
                        id
                    ));
                } else {
                    self.frame().stack_push_object(attribute.into_value());
                }
            }
        }
        self.frame().advance();
        Ok(())
    }

    fn op_set_attribute(&mut self, id: StringId) -> ScriptResult<()> {
        let (properties, object, value) = {
            let frame = self.frame();
            let properties = AttrFlags::from_bits_retain(frame.stack_pop_u32()? as u8);
            let object = frame.stack_pop_object()?;
            let value = frame.stack_pop_object_value()?.unwrap_or(Object::Void);
            (properties, object, value)
        };
        match object {
            None => self.warn(format!("Could not set attribute '{}'.", id)),
            Some(object) => {
                if properties.contains(AttrFlags::OVERRIDE) && object.get_attribute(id)?.is_none() {
                    self.warn("Attribute marked with @(override) does not override.");
                }
                if properties.contains(AttrFlags::TYPE_ATTR)
                    && object.internal_type_id() != InternalTypeId::Type
                {
                    self.warn(format!(
                        "Setting type attribute '{}' to an object which is no Type.",
                        id
                    ));
                }
                if !object.set_attribute(id, Attribute::new(value, properties)) {
                    self.warn(format!("Could not set attribute '{}'.", id));
                }
            }
        }
        self.frame().advance();
        Ok(())
    }

    fn op_assign_attribute(&mut self, id: StringId) -> ScriptResult<()> {
        let (object, value) = {
            let frame = self.frame();
            let object = frame.stack_pop_object()?;
            let value = frame.stack_pop_object_value()?.unwrap_or(Object::Void);
            (object, value)
        };
        match object {
            None => self.warn(format!("Attribute not found: '{}'", id)),
            Some(object) => {
                let is_self = self
                    .frame_ref()
                    .caller()
                    .map_or(false, |caller| caller.same(&object));
                match self.try_assign_attribute(&object, id, value, is_self, false)? {
                    AssignOutcome::Assigned => {}
                    AssignOutcome::NotFound => {
                        self.warn(format!("Attribute not found: '{}'", id));
                    }
                    AssignOutcome::ConstViolation => {
                        self.set_exception(format!("Cannot assign to const attribute '{}'.", id));
                    }
                    AssignOutcome::PrivateViolation => {
                        self.set_exception(format!(
                            "Cannot access private attribute '{}' from outside of its owning object.",
                            id
                        ));
                    }
                }
            }
        }
        self.frame().advance();
        Ok(())
    }

    fn op_init_caller(&mut self, num_params: u32) -> ScriptResult<Step> {
        if !self.frame_ref().is_constructor_call() {
            self.frame().advance();
            if num_params > 0 {
                self.warn("Calling constructor function with @(super) attribute as normal function.");
            }
            return Ok(Step::Continue);
        }

        let params = self.pop_parameters(num_params)?;
        let (super_constructor, queued, caller) = {
            let frame = self.frame();
            let super_constructor = frame.stack_pop_object_value()?;
            let mut queued: Vec<Option<Object>> = Vec::new();
            while !frame.stack_is_empty() {
                queued.push(frame.stack_pop_object()?);
            }
            let caller = frame.caller().cloned();
            (super_constructor, queued, caller)
        };

        let result = self.start_function_execution(super_constructor, caller, params)?;
        self.frame().advance();

        match result {
            RtValue::Frame(mut new_frame) => {
                // hand the remaining super constructors to the new frame
                for constructor in queued.iter().rev() {
                    new_frame.stack_push(RtValue::from(constructor.clone()));
                }
                new_frame.mark_as_constructor_call();
                new_frame.mark_as_providing_caller_as_result();
                self.push_active_frame(new_frame);
            }
            value => match value.into_object() {
                Some(new_object) => {
                    new_object.init_attributes(self)?;
                    self.frame().init_caller(new_object);
                }
                None => {
                    if !self.is_exception_pending() {
                        self.set_exception("Constructor did not create an Object.");
                    }
                }
            },
        }
        Ok(Step::Continue)
    }

    fn op_yield(&mut self) -> ScriptResult<Step> {
        let value = self.frame().stack_pop_object_value()?;
        self.frame().advance();
        let finished = self.frames.pop().expect("no active call frame");
        let stop = finished.is_execution_stopped_after_ending();
        let iterator = Object::Iterator(YieldIterator::new(finished, value));
        if stop {
            return Ok(Step::Return(Some(iterator)));
        }
        if self.frames.is_empty() {
            return Ok(Step::Return(None));
        }
        self.frame().stack_push_object(iterator);
        Ok(Step::Continue)
    }

    // --- helpers ---

    /// Pops `num_params` argument values (resolving the dynamic-count
    /// sentinel first) in declaration order.
    pub(crate) fn pop_parameters(&mut self, num_params: u32) -> ScriptResult<ParameterValues> {
        let frame = self.frame();
        let count = if num_params == consts::DYNAMIC_PARAMETER_COUNT {
            frame.stack_pop_u32()?
        } else {
            num_params
        };
        let mut params = ParameterValues::with_capacity(count as usize);
        for _ in 0..count {
            let value = frame.stack_pop_object_value()?.unwrap_or(Object::Void);
            params.push(value);
        }
        params.reverse();
        Ok(params)
    }

    pub(crate) fn try_assign_attribute(
        &self,
        object: &Object,
        id: StringId,
        value: Object,
        is_self: bool,
        local_only: bool,
    ) -> ScriptResult<AssignOutcome> {
        let outcome = object.with_attribute_mut(id, local_only, |attribute| {
            if attribute
                .properties()
                .intersects(AttrFlags::ASSIGNMENT_RELEVANT)
            {
                if attribute.is_const() {
                    return AssignOutcome::ConstViolation;
                }
                if attribute.is_private() && !is_self {
                    return AssignOutcome::PrivateViolation;
                }
            }
            attribute.set_value(value);
            AssignOutcome::Assigned
        })?;
        Ok(outcome.unwrap_or(AssignOutcome::NotFound))
    }

    // --- function invocation ---

    /// Starts a call. A native function is executed immediately and the
    /// result is a plain value; a user function produces a new call frame
    /// that still has to be executed.
    pub(crate) fn start_function_execution(
        &mut self,
        function: Option<Object>,
        caller: Option<Object>,
        params: ParameterValues,
    ) -> ScriptResult<RtValue> {
        let Some(function) = function else {
            self.set_exception("No function to call!");
            return Ok(RtValue::Undefined);
        };
        match function {
            Object::UserFn(user_function) => {
                let mut frame = FunctionCallContext::create(user_function.clone(), caller);
                let min = user_function.min_param_count() as usize;
                if params.len() < min {
                    let message = format!(
                        "Too few parameters: Expected {}, got {}.",
                        min,
                        params.len()
                    );
                    // activate the frame briefly so it shows in the stack info
                    self.push_active_frame(frame);
                    self.set_exception(message);
                    self.frames.pop();
                    return Ok(RtValue::Undefined);
                }
                match user_function.multi_param() {
                    Some(multi_index) => {
                        self.assign_multi_params(&mut frame, &user_function, multi_index, &params)?;
                    }
                    None => {
                        let mut params = params;
                        let max = user_function.param_count() as usize;
                        if params.len() > max {
                            self.warn(format!(
                                "Too many parameters given: Expected {}, got {}.",
                                max,
                                params.len()
                            ));
                            params.truncate(max);
                        }
                        for (offset, value) in params.into_iter().enumerate() {
                            frame.assign_to_local_variable(
                                consts::LOCAL_VAR_INDEX_FIRST_PARAMETER + offset as u32,
                                Some(value),
                            )?;
                        }
                    }
                }
                Ok(RtValue::Frame(frame))
            }
            Object::Binder(binder) => {
                let caller = binder.object().cloned().or(caller);
                let function = Some(binder.function().clone());
                if binder.bound_params().is_empty() {
                    self.start_function_execution(function, caller, params)
                } else {
                    let mut merged =
                        ParameterValues::with_capacity(binder.bound_params().len() + params.len());
                    merged.extend(binder.bound_params().iter().cloned());
                    merged.extend(params);
                    self.start_function_execution(function, caller, merged)
                }
            }
            Object::NativeFn(native) => {
                let min = native.min_params() as usize;
                if params.len() < min {
                    self.set_exception(format!(
                        "Too few parameters: Expected {}, got {}.",
                        min,
                        params.len()
                    ));
                    return Ok(RtValue::Undefined);
                }
                if let Some(max) = native.max_params() {
                    if params.len() > max as usize {
                        self.warn(format!(
                            "Too many parameters: Expected {}, got {}.",
                            max,
                            params.len()
                        ));
                    }
                }
                match native.call(self, caller.as_ref(), &params) {
                    Ok(value) => Ok(value),
                    Err(error) => {
                        self.raise(error);
                        Ok(RtValue::Undefined)
                    }
                }
            }
            other => {
                // a user-defined `_call` member makes any object callable
                if let Some(attribute) = other.get_attribute(consts::id_call())? {
                    let mut merged = ParameterValues::with_capacity(params.len() + 1);
                    merged.push(caller.unwrap_or(Object::Void));
                    merged.extend(params);
                    return self.start_function_execution(
                        Some(attribute.into_value()),
                        Some(other),
                        merged,
                    );
                }
                self.warn(format!("Cannot use '{}' as a function.", other.to_dbg_string()));
                Ok(RtValue::Undefined)
            }
        }
    }

    /// Parameter assignment for functions with a multi-parameter: values
    /// before it bind normally, the overflow is collected into an array,
    /// trailing parameters take the remaining values.
    fn assign_multi_params(
        &mut self,
        frame: &mut FunctionCallContext,
        user_function: &crate::objects::UserFunction,
        multi_index: u32,
        params: &ParameterValues,
    ) -> ScriptResult<()> {
        let multi_index = multi_index as usize;
        let param_count = user_function.param_count() as usize;
        let n = params.len();
        let mut slot = consts::LOCAL_VAR_INDEX_FIRST_PARAMETER as usize;
        let mut value_index = 0usize;

        while value_index < multi_index && value_index < n {
            frame.assign_to_local_variable(slot as u32, Some(params[value_index].clone()))?;
            slot += 1;
            value_index += 1;
        }

        let multi_is_anonymous = frame
            .local_variable_name(slot as u32)
            .map_or(true, |name| name.as_str().is_empty());
        if multi_is_anonymous {
            // unnamed multi parameter: the overflow values are dropped
            slot += 1;
            value_index = (n + 1 + multi_index).saturating_sub(param_count);
            while value_index < n {
                frame.assign_to_local_variable(slot as u32, Some(params[value_index].clone()))?;
                slot += 1;
                value_index += 1;
            }
        } else if value_index >= n {
            // multi parameter lies behind the given values: empty array
            frame.assign_to_local_variable(
                consts::LOCAL_VAR_INDEX_FIRST_PARAMETER + multi_index as u32,
                Some(Object::Array(ArrayObject::empty())),
            )?;
        } else {
            let multi_end = n + 1 + multi_index - param_count;
            let collected =
                ArrayObject::create(params[value_index..multi_end].iter().cloned());
            frame.assign_to_local_variable(slot as u32, Some(Object::Array(collected)))?;
            slot += 1;
            value_index = multi_end;
            while value_index < n {
                frame.assign_to_local_variable(slot as u32, Some(params[value_index].clone()))?;
                slot += 1;
                value_index += 1;
            }
        }
        Ok(())
    }

    // --- instance creation ---

    /// Collects the `_constructor` chain (stopping at the first native
    /// factory), invokes the outermost constructor with the Type as `this`
    /// and queues the rest for `InitCaller`.
    pub(crate) fn start_instance_creation(
        &mut self,
        type_object: Arc<TypeObject>,
        params: ParameterValues,
    ) -> ScriptResult<RtValue> {
        let mut constructors: Vec<Object> = Vec::new();
        let mut cursor = Some(type_object.clone());
        while let Some(current) = cursor {
            if let Some(attribute) = current.access_attribute(consts::id_constructor(), true)? {
                // the first constructor must not be private, unless the
                // calling object is a subtype (needed for factories)
                if constructors.is_empty() && attribute.is_private() {
                    let permitted = self
                        .calling_object()
                        .and_then(|object| object.as_type().cloned())
                        .map_or(false, |calling_type| current.is_base_of(&calling_type));
                    if !permitted {
                        self.set_exception("Can't instantiate Type with private _constructor.");
                        return Ok(RtValue::Undefined);
                    }
                }
                let function = attribute.into_value();
                let is_factory = matches!(function, Object::NativeFn(_));
                constructors.push(function);
                if is_factory {
                    break;
                }
            }
            cursor = current.base_type().cloned();
        }

        if !constructors.is_empty() {
            let result = self.start_function_execution(
                Some(constructors[0].clone()),
                Some(Object::Type(type_object)),
                params,
            )?;
            match result {
                RtValue::Frame(mut frame) => {
                    for constructor in constructors[1..].iter().rev() {
                        frame.stack_push_object(constructor.clone());
                    }
                    frame.mark_as_constructor_call();
                    return Ok(RtValue::Frame(frame));
                }
                value => {
                    if let Some(object) = value.into_object() {
                        object.init_attributes(self)?;
                        return Ok(RtValue::Object(object));
                    }
                }
            }
        }
        if !self.is_exception_pending() {
            self.set_exception("Constructor failed to create an object.");
        }
        Ok(RtValue::Undefined)
    }

    // --- member calls and equality ---

    /// Looks up `id` on `object` and calls it with `object` as `this`,
    /// running any produced frame to completion. `None` when the member
    /// does not exist.
    pub fn call_member_function(
        &mut self,
        object: &Object,
        id: StringId,
        params: ParameterValues,
    ) -> ScriptResult<Option<Object>> {
        let Some(attribute) = object.get_attribute(id)? else {
            return Ok(None);
        };
        let result = self.start_function_execution(
            Some(attribute.into_value()),
            Some(object.clone()),
            params,
        )?;
        match result {
            RtValue::Frame(frame) => Ok(self.execute_call_context(frame)),
            value => Ok(value.into_object()),
        }
    }

    /// Script-level equality: the `==` member when present, structural
    /// equality otherwise.
    pub fn objects_equal(&mut self, left: &Object, right: &Object) -> ScriptResult<bool> {
        if left.get_attribute(consts::id_equal_op())?.is_some() {
            let mut params = ParameterValues::new();
            params.push(right.clone());
            let result = self.call_member_function(left, consts::id_equal_op(), params)?;
            return Ok(result.map_or(false, |value| value.to_bool()));
        }
        Ok(left.rt_is_equal(right))
    }

    // --- coroutine resumption ---

    /// Resumes a suspended yield iterator: its frame is pushed back as the
    /// active frame and run until the next `yield` or until it ends. The
    /// iterator is updated in place; the new current value is returned.
    pub fn execute_yield_iterator(&mut self, iterator: &Arc<YieldIterator>) -> Option<Object> {
        let Some(frame) = iterator.take_frame() else {
            return iterator.value();
        };
        match self.execute_call_context(frame) {
            Some(Object::Iterator(next)) => {
                // the function yielded again; adopt the new suspension
                if let Some(frame) = next.take_frame() {
                    iterator.store_frame(frame);
                }
                iterator.set_value(next.value());
            }
            result => iterator.set_value(result),
        }
        iterator.value()
    }

    // --- stack information ---

    /// Multi-line description of the active call stack; long stacks elide
    /// the middle frames.
    pub fn get_stack_info(&self) -> String {
        let mut out = String::from("\n\n----------------------\nCall stack:");
        let total = self.frames.len();
        let elide = total > 50;
        for (index, frame) in self.frames.iter().rev().enumerate() {
            let nr = index + 1;
            if elide && nr > 20 && nr <= total - 20 {
                if nr == 21 {
                    out.push_str("\n\n ... \n");
                }
                continue;
            }
            out.push_str(&format!(
                "\n\n{}.\t('{}':{})",
                nr,
                frame.block().filename(),
                frame
                    .current_line()
                    .map(|line| line.to_string())
                    .unwrap_or_else(|| "?".to_string())
            ));
            out.push_str(&format!(
                "\nFun:\t{} -> {}",
                frame
                    .caller()
                    .map(|caller| caller.to_dbg_string())
                    .unwrap_or_else(|| "undefined".to_string()),
                Object::UserFn(frame.user_function().clone()).to_dbg_string()
            ));
            if nr == 1 {
                out.push_str(&format!("\nLocals:\t{}", frame.local_variables_to_string(false)));
            }
            if frame.exception_handler_pos().is_some() {
                out.push_str("\n\\_____Catches_exceptions_____/");
            }
        }
        out.push_str("\n\n----------------------\n");
        out
    }
}
