// Runtime
// The public facade of the execution core: executing functions and blocks,
// creating instances, globals access, the pending exception / pending exit
// state machine, and forking sibling runtimes that share the global
// namespace. The interpreter itself lives in `internals`.

mod call_context;
mod internals;
mod rt_value;
mod syscalls;
#[cfg(test)]
mod tests;

pub use call_context::FunctionCallContext;
pub(crate) use internals::AssignOutcome;
pub use rt_value::RtValue;

use crate::builtins;
use crate::bytecode::InstructionBlock;
use crate::error::ScriptError;
use crate::identifier::StringId;
use crate::logger::{ConsoleLogger, Logger};
use crate::objects::{ExceptionObject, Object, TypeObject, UserFunction};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Argument list passed to functions and system calls.
pub type ParameterValues = SmallVec<[Object; 4]>;

const DEFAULT_STACK_SIZE_LIMIT: usize = 100_000;

/// Registry shared by a family of forked runtimes.
pub struct SharedRuntimeContext {
    active_runtimes: Mutex<FxHashSet<u64>>,
    next_runtime_id: AtomicU64,
}

impl SharedRuntimeContext {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            active_runtimes: Mutex::new(FxHashSet::default()),
            next_runtime_id: AtomicU64::new(1),
        })
    }

    fn register(&self) -> u64 {
        let id = self.next_runtime_id.fetch_add(1, Ordering::Relaxed);
        self.active_runtimes.lock().insert(id);
        id
    }

    fn deregister(&self, id: u64) {
        self.active_runtimes.lock().remove(&id);
    }

    pub fn active_count(&self) -> usize {
        self.active_runtimes.lock().len()
    }
}

pub(crate) struct StateCell {
    /// Fast-path flag: true while neither exception nor exit is pending.
    pub(crate) normal: AtomicBool,
    pub(crate) values: Mutex<StateValues>,
}

#[derive(Default)]
pub(crate) struct StateValues {
    pub(crate) exception: Option<Object>,
    pub(crate) exit: Option<Object>,
}

impl StateCell {
    fn new() -> Self {
        Self {
            normal: AtomicBool::new(true),
            values: Mutex::new(StateValues::default()),
        }
    }
}

/// Cloneable handle to a runtime's execution state; lets any thread request
/// cancellation by setting the exit state.
#[derive(Clone)]
pub struct ExecutionStateHandle {
    cell: Arc<StateCell>,
}

impl ExecutionStateHandle {
    pub fn set_exit_state(&self, value: Object) {
        let mut values = self.cell.values.lock();
        values.exit = Some(value);
        self.cell.normal.store(false, Ordering::Release);
    }

    pub fn set_exception_value(&self, value: Object) {
        let mut values = self.cell.values.lock();
        values.exception = Some(value);
        self.cell.normal.store(false, Ordering::Release);
    }
}

pub struct Runtime {
    globals: Object,
    shared: Arc<SharedRuntimeContext>,
    pub(crate) frames: Vec<Box<FunctionCallContext>>,
    stack_size_limit: usize,
    pub(crate) state: Arc<StateCell>,
    logger: Arc<dyn Logger>,
    add_stack_info_to_exceptions: bool,
    runtime_id: u64,
}

impl Runtime {
    pub fn new() -> Self {
        builtins::init_base_types();
        let globals = builtins::new_globals();
        #[cfg(feature = "threading")]
        crate::threading::init(&globals);
        let shared = SharedRuntimeContext::new();
        let runtime_id = shared.register();
        Self {
            globals,
            shared,
            frames: Vec::new(),
            stack_size_limit: DEFAULT_STACK_SIZE_LIMIT,
            state: Arc::new(StateCell::new()),
            logger: Arc::new(ConsoleLogger::new()),
            add_stack_info_to_exceptions: true,
            runtime_id,
        }
    }

    /// A sibling runtime sharing this one's global namespace and registry
    /// (the identifier table is process-wide anyway). Each fork has its own
    /// frame stack and pending-state slots.
    pub fn fork(&self) -> Runtime {
        Runtime {
            globals: self.globals.clone(),
            shared: self.shared.clone(),
            frames: Vec::new(),
            stack_size_limit: self.stack_size_limit,
            state: Arc::new(StateCell::new()),
            logger: self.logger.clone(),
            add_stack_info_to_exceptions: self.add_stack_info_to_exceptions,
            runtime_id: self.shared.register(),
        }
    }

    pub fn shared_context(&self) -> &Arc<SharedRuntimeContext> {
        &self.shared
    }

    // --- execution ---

    pub fn execute_function(
        &mut self,
        function: Object,
        caller: Option<Object>,
        params: ParameterValues,
    ) -> Option<Object> {
        match self.start_function_execution(Some(function), caller, params) {
            Ok(RtValue::Frame(frame)) => self.execute_call_context(frame),
            Ok(value) => value.into_object(),
            Err(error) => {
                self.raise(error);
                None
            }
        }
    }

    /// Executes a block as a parameterless function without a `this`.
    pub fn execute_block(&mut self, block: InstructionBlock) -> Option<Object> {
        let function = Object::UserFn(Arc::new(UserFunction::new(block, 0, 0)));
        self.execute_function(function, None, ParameterValues::new())
    }

    pub fn create_instance(
        &mut self,
        type_object: Arc<TypeObject>,
        params: ParameterValues,
    ) -> Option<Object> {
        match self.start_instance_creation(type_object, params) {
            Ok(RtValue::Frame(frame)) => self.execute_call_context(frame),
            Ok(value) => value.into_object(),
            Err(error) => {
                self.raise(error);
                None
            }
        }
    }

    // --- globals ---

    pub fn get_globals(&self) -> Object {
        self.globals.clone()
    }

    /// Only the globals' own attributes count as global variables; members
    /// of the namespace's type are skipped.
    pub fn get_global_variable(&self, id: StringId) -> Option<Object> {
        self.globals
            .get_local_attribute(id)
            .ok()
            .flatten()
            .map(|attribute| attribute.into_value())
    }

    // --- state / exceptions ---

    pub fn check_normal_state(&self) -> bool {
        self.state.normal.load(Ordering::Acquire)
    }

    pub fn is_exception_pending(&self) -> bool {
        self.state.values.lock().exception.is_some()
    }

    pub fn is_exiting(&self) -> bool {
        self.state.values.lock().exit.is_some()
    }

    /// Sets `value` as the pending exception.
    pub fn set_exception_value(&mut self, value: Object) {
        let mut values = self.state.values.lock();
        values.exception = Some(value);
        self.state.normal.store(false, Ordering::Release);
    }

    /// Builds an exception object carrying the current file/line (and, when
    /// enabled, the call-stack description) and sets it pending.
    pub fn set_exception(&mut self, message: impl Into<String>) {
        let exception = ExceptionObject::with_context(
            message,
            self.get_current_file().unwrap_or_default(),
            self.get_current_line(),
        );
        if self.add_stack_info_to_exceptions {
            exception.set_stack_info(self.get_stack_info());
        }
        self.set_exception_value(Object::Exception(exception));
    }

    pub(crate) fn raise(&mut self, error: ScriptError) {
        match error {
            ScriptError::Exception(value) => {
                if self.add_stack_info_to_exceptions {
                    if let Object::Exception(exception) = &value {
                        if exception.stack_info().is_none() {
                            exception.set_stack_info(self.get_stack_info());
                        }
                    }
                }
                self.set_exception_value(value);
            }
            ScriptError::Message(message) => self.set_exception(message),
        }
    }

    pub fn set_exit_state(&mut self, value: Object) {
        let mut values = self.state.values.lock();
        values.exit = Some(value);
        self.state.normal.store(false, Ordering::Release);
    }

    pub fn fetch_and_clear_exception(&mut self) -> Option<Object> {
        let mut values = self.state.values.lock();
        let result = values.exception.take();
        let normal = values.exit.is_none();
        self.state.normal.store(normal, Ordering::Release);
        result
    }

    pub fn fetch_and_clear_exit_result(&mut self) -> Option<Object> {
        let mut values = self.state.values.lock();
        let result = values.exit.take();
        let normal = values.exception.is_none();
        self.state.normal.store(normal, Ordering::Release);
        result
    }

    /// Handle through which other threads may cancel this runtime.
    pub fn state_handle(&self) -> ExecutionStateHandle {
        ExecutionStateHandle {
            cell: self.state.clone(),
        }
    }

    pub fn set_add_stack_info_to_exceptions(&mut self, enabled: bool) {
        self.add_stack_info_to_exceptions = enabled;
    }

    // --- limits, logging, information ---

    pub fn stack_size_limit(&self) -> usize {
        self.stack_size_limit
    }

    pub fn set_stack_size_limit(&mut self, limit: usize) {
        self.stack_size_limit = limit;
    }

    pub fn logger(&self) -> &Arc<dyn Logger> {
        &self.logger
    }

    pub fn set_logger(&mut self, logger: Arc<dyn Logger>) {
        self.logger = logger;
    }

    /// Non-fatal diagnostic with file/line context; never affects control
    /// flow.
    pub fn warn(&self, message: impl Into<String>) {
        let mut message = message.into();
        if let Some(frame) = self.frames.last() {
            let filename = frame.block().filename();
            let line = frame
                .current_line()
                .map(|line| line.to_string())
                .unwrap_or_else(|| "?".to_string());
            message.push_str(&format!(" ('{}':~{})", filename, line));
        }
        self.logger.warn(&message);
    }

    pub fn get_current_file(&self) -> Option<String> {
        self.frames
            .last()
            .map(|frame| frame.block().filename().to_string())
    }

    pub fn get_current_line(&self) -> Option<u32> {
        self.frames.last().and_then(|frame| frame.current_line())
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shared.deregister(self.runtime_id);
    }
}
