// Yield iterators
// A `yield` suspends the running call frame into a heap-held iterator. The
// frame is moved out of the active stack (never copied); resumption moves
// it back in on the same thread.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::runtime::FunctionCallContext;

use super::type_object::{yield_iterator_type, TypeObject};
use super::Object;

pub struct YieldIterator {
    type_ref: Arc<TypeObject>,
    frame: Mutex<Option<Box<FunctionCallContext>>>,
    value: Mutex<Option<Object>>,
}

impl YieldIterator {
    pub fn new(frame: Box<FunctionCallContext>, value: Option<Object>) -> Arc<Self> {
        Arc::new(Self {
            type_ref: yield_iterator_type().clone(),
            frame: Mutex::new(Some(frame)),
            value: Mutex::new(value),
        })
    }

    pub fn get_type(&self) -> &Arc<TypeObject> {
        &self.type_ref
    }

    /// Takes the suspended frame for resumption; `None` once exhausted.
    pub fn take_frame(&self) -> Option<Box<FunctionCallContext>> {
        self.frame.lock().take()
    }

    pub fn store_frame(&self, frame: Box<FunctionCallContext>) {
        *self.frame.lock() = Some(frame);
    }

    pub fn end(&self) -> bool {
        self.frame.lock().is_none()
    }

    pub fn value(&self) -> Option<Object> {
        self.value.lock().clone()
    }

    pub fn set_value(&self, value: Option<Object>) {
        *self.value.lock() = value;
    }
}

impl std::fmt::Debug for YieldIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YieldIterator")
            .field("end", &self.end())
            .finish()
    }
}
