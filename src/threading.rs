// Threading library
// Script surface for running forked runtimes on host threads: a `Threading`
// namespace with `run(fn)`, thread objects with `join()`, and plain script
// mutexes. Each spawned thread owns a forked runtime sharing the parent's
// global namespace; dropping an unjoined thread object cancels the runtime
// via its exit state and joins.

use crate::builtins::{declare_constant, declare_constructor, declare_function};
use crate::error::{ScriptError, ScriptResult};
use crate::objects::type_object::{self as types, TypeObject};
use crate::objects::{ExtObject, Object, RefObject};
use crate::runtime::{ExecutionStateHandle, ParameterValues, RtValue, Runtime};
use parking_lot::lock_api::RawMutex as _;
use parking_lot::{Mutex, RawMutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;

pub fn thread_type() -> &'static Arc<TypeObject> {
    static TYPE: OnceLock<Arc<TypeObject>> = OnceLock::new();
    TYPE.get_or_init(|| TypeObject::new(Some(types::object_type().clone())))
}

pub fn mutex_type() -> &'static Arc<TypeObject> {
    static TYPE: OnceLock<Arc<TypeObject>> = OnceLock::new();
    TYPE.get_or_init(|| TypeObject::new(Some(types::object_type().clone())))
}

struct ThreadPayload {
    handle: Mutex<Option<JoinHandle<()>>>,
    state: ExecutionStateHandle,
}

impl Drop for ThreadPayload {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.lock().take() {
            self.state.set_exit_state(Object::Void);
            let _ = handle.join();
        }
    }
}

/// A manually lockable mutex. The `locked` flag keeps unlock sound: only a
/// thread that observes the flag set may release the raw lock.
struct ScriptMutex {
    raw: RawMutex,
    locked: AtomicBool,
}

impl ScriptMutex {
    fn new() -> Self {
        Self {
            raw: RawMutex::INIT,
            locked: AtomicBool::new(false),
        }
    }

    fn lock(&self) {
        self.raw.lock();
        self.locked.store(true, Ordering::Release);
    }

    fn try_lock(&self) -> bool {
        if self.raw.try_lock() {
            self.locked.store(true, Ordering::Release);
            true
        } else {
            false
        }
    }

    fn unlock(&self) -> bool {
        if self
            .locked
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            unsafe { self.raw.unlock() };
            true
        } else {
            false
        }
    }
}

impl Drop for ScriptMutex {
    fn drop(&mut self) {
        self.unlock();
    }
}

/// Declares the `Threading` namespace into `globals` and registers the
/// thread/mutex member functions (once per process).
pub fn init(globals: &Object) {
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        declare_function(thread_type(), "join", 0, Some(0), thread_join);
        declare_constructor(mutex_type(), 0, Some(0), mutex_constructor);
        declare_function(mutex_type(), "lock", 0, Some(0), mutex_lock);
        declare_function(mutex_type(), "tryLock", 0, Some(0), mutex_try_lock);
        declare_function(mutex_type(), "unlock", 0, Some(0), mutex_unlock);
    });

    let namespace = Object::Ext(ExtObject::new(types::namespace_type().clone()));
    declare_constant(&namespace, "Thread", Object::Type(thread_type().clone()));
    declare_constant(&namespace, "Mutex", Object::Type(mutex_type().clone()));
    let run_id = crate::identifier::StringId::new("run");
    namespace.set_attribute(
        run_id,
        crate::objects::Attribute::new(
            Object::NativeFn(Arc::new(crate::objects::NativeFunction::new(
                run_id,
                1,
                Some(1),
                threading_run,
            ))),
            crate::objects::ATTR_NORMAL_ATTRIBUTE,
        ),
    );
    declare_constant(globals, "Threading", namespace);
}

/// `Threading.run(fn)`: executes `fn` on a new host thread inside a forked
/// runtime sharing the caller's globals; returns the thread object.
fn threading_run(
    runtime: &mut Runtime,
    _caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    let function = params[0].clone();
    let mut child = runtime.fork();
    let state = child.state_handle();
    let handle = std::thread::spawn(move || {
        child.execute_function(function, None, ParameterValues::new());
    });
    let payload = ThreadPayload {
        handle: Mutex::new(Some(handle)),
        state,
    };
    Ok(RtValue::Object(Object::Ref(RefObject::new(
        thread_type().clone(),
        Box::new(payload),
    ))))
}

fn to_thread(object: &Object) -> ScriptResult<Arc<RefObject>> {
    match object {
        Object::Ref(reference) if reference.payload::<ThreadPayload>().is_some() => {
            Ok(reference.clone())
        }
        other => Err(ScriptError::Message(format!(
            "Thread expected, got '{}'.",
            other.to_dbg_string()
        ))),
    }
}

fn thread_join(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    _params: &[Object],
) -> ScriptResult<RtValue> {
    let this = caller
        .cloned()
        .ok_or_else(|| ScriptError::from("Member function called without object."))?;
    let thread = to_thread(&this)?;
    let handle = thread
        .payload::<ThreadPayload>()
        .and_then(|payload| payload.handle.lock().take());
    match handle {
        Some(handle) => {
            handle
                .join()
                .map_err(|_| ScriptError::from("Thread panicked."))?;
            Ok(RtValue::Object(this))
        }
        None => Err(ScriptError::from("Thread already joined.")),
    }
}

fn mutex_constructor(
    _runtime: &mut Runtime,
    _caller: Option<&Object>,
    _params: &[Object],
) -> ScriptResult<RtValue> {
    Ok(RtValue::Object(Object::Ref(RefObject::new(
        mutex_type().clone(),
        Box::new(ScriptMutex::new()),
    ))))
}

fn to_mutex(object: &Object) -> ScriptResult<Arc<RefObject>> {
    match object {
        Object::Ref(reference) if reference.payload::<ScriptMutex>().is_some() => {
            Ok(reference.clone())
        }
        other => Err(ScriptError::Message(format!(
            "Mutex expected, got '{}'.",
            other.to_dbg_string()
        ))),
    }
}

fn mutex_lock(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    _params: &[Object],
) -> ScriptResult<RtValue> {
    let this = caller
        .cloned()
        .ok_or_else(|| ScriptError::from("Member function called without object."))?;
    let mutex = to_mutex(&this)?;
    mutex
        .payload::<ScriptMutex>()
        .ok_or_else(|| ScriptError::from("Mutex expected."))?
        .lock();
    Ok(RtValue::Object(this))
}

fn mutex_try_lock(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    _params: &[Object],
) -> ScriptResult<RtValue> {
    let mutex = to_mutex(&caller.cloned().ok_or_else(|| {
        ScriptError::from("Member function called without object.")
    })?)?;
    let acquired = mutex
        .payload::<ScriptMutex>()
        .ok_or_else(|| ScriptError::from("Mutex expected."))?
        .try_lock();
    Ok(RtValue::Bool(acquired))
}

fn mutex_unlock(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    _params: &[Object],
) -> ScriptResult<RtValue> {
    let this = caller
        .cloned()
        .ok_or_else(|| ScriptError::from("Member function called without object."))?;
    let mutex = to_mutex(&this)?;
    if !mutex
        .payload::<ScriptMutex>()
        .ok_or_else(|| ScriptError::from("Mutex expected."))?
        .unlock()
    {
        return Err(ScriptError::from("Mutex is not locked."));
    }
    Ok(RtValue::Object(this))
}
