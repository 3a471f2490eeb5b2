// Callables
// User (bytecode) functions, native functions registered by the embedder,
// and binders (partially applied closures carrying a fixed `this` and/or
// leading arguments).

use crate::bytecode::InstructionBlock;
use crate::error::{InternalError, ScriptResult};
use crate::identifier::StringId;
use crate::runtime::{ParameterValues, RtValue, Runtime};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::{AttributeContainer, Object};

/// A compiled function: its instruction block plus the parameter layout.
/// Attribute storage holds per-function markers (e.g. for `@(once)` blocks);
/// static slots are shared by every invocation of the same function object.
#[derive(Serialize, Deserialize)]
pub struct UserFunction {
    block: InstructionBlock,
    /// Number of declared parameters.
    param_count: u32,
    /// Parameters without default values; fewer arguments raise an exception.
    min_param_count: u32,
    /// Index of the multi-parameter (`rest*`), if any; makes the maximum
    /// parameter count unbounded.
    multi_param: Option<u32>,
    #[serde(skip)]
    attributes: Mutex<AttributeContainer>,
    #[serde(skip)]
    statics: Mutex<Vec<Option<Object>>>,
}

impl UserFunction {
    pub fn new(block: InstructionBlock, param_count: u32, min_param_count: u32) -> Self {
        let statics = vec![None; block.static_var_count() as usize];
        Self {
            block,
            param_count,
            min_param_count,
            multi_param: None,
            attributes: Mutex::new(AttributeContainer::new()),
            statics: Mutex::new(statics),
        }
    }

    pub fn with_multi_param(mut self, index: u32) -> Self {
        self.multi_param = Some(index);
        self
    }

    pub fn block(&self) -> &InstructionBlock {
        &self.block
    }

    pub fn param_count(&self) -> u32 {
        self.param_count
    }

    pub fn min_param_count(&self) -> u32 {
        self.min_param_count
    }

    pub fn multi_param(&self) -> Option<u32> {
        self.multi_param
    }

    /// `None` when a multi-parameter makes the function accept any count.
    pub fn max_param_count(&self) -> Option<u32> {
        match self.multi_param {
            Some(_) => None,
            None => Some(self.param_count),
        }
    }

    pub fn attributes(&self) -> &Mutex<AttributeContainer> {
        &self.attributes
    }

    pub fn get_static_var(&self, index: u32) -> Result<Option<Object>, InternalError> {
        self.statics
            .lock()
            .get(index as usize)
            .cloned()
            .ok_or(InternalError::UnknownStaticVariable)
    }

    pub fn set_static_var(&self, index: u32, value: Option<Object>) -> Result<(), InternalError> {
        let mut statics = self.statics.lock();
        match statics.get_mut(index as usize) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(InternalError::UnknownStaticVariable),
        }
    }
}

impl std::fmt::Debug for UserFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserFunction")
            .field("param_count", &self.param_count)
            .field("min_param_count", &self.min_param_count)
            .field("multi_param", &self.multi_param)
            .field("instructions", &self.block.instructions().len())
            .finish()
    }
}

/// Signature of an embedder-registered function.
pub type NativeFnPtr =
    fn(&mut Runtime, Option<&Object>, &[Object]) -> ScriptResult<RtValue>;

pub struct NativeFunction {
    name: StringId,
    min_params: u32,
    max_params: Option<u32>,
    fn_ptr: NativeFnPtr,
}

impl NativeFunction {
    pub fn new(name: StringId, min_params: u32, max_params: Option<u32>, fn_ptr: NativeFnPtr) -> Self {
        Self {
            name,
            min_params,
            max_params,
            fn_ptr,
        }
    }

    pub fn name(&self) -> StringId {
        self.name
    }

    pub fn min_params(&self) -> u32 {
        self.min_params
    }

    pub fn max_params(&self) -> Option<u32> {
        self.max_params
    }

    pub fn call(
        &self,
        runtime: &mut Runtime,
        caller: Option<&Object>,
        params: &[Object],
    ) -> ScriptResult<RtValue> {
        (self.fn_ptr)(runtime, caller, params)
    }
}

impl std::fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("min_params", &self.min_params)
            .field("max_params", &self.max_params)
            .finish()
    }
}

/// A callable carrying a fixed `this` and/or leading arguments that are
/// prepended on invocation.
#[derive(Debug)]
pub struct FnBinder {
    object: Option<Object>,
    function: Object,
    bound_params: SmallVec<[Object; 2]>,
}

impl FnBinder {
    pub fn new(object: Option<Object>, function: Object) -> Self {
        Self {
            object,
            function,
            bound_params: SmallVec::new(),
        }
    }

    pub fn with_bound_params(mut self, params: ParameterValues) -> Self {
        self.bound_params = params.into_iter().collect();
        self
    }

    pub fn object(&self) -> Option<&Object> {
        self.object.as_ref()
    }

    pub fn function(&self) -> &Object {
        &self.function
    }

    pub fn bound_params(&self) -> &[Object] {
        &self.bound_params
    }
}
