// Extendable objects
// ExtObject carries per-instance attribute storage; PlainObject is an
// instance with no storage of its own; RefObject wraps a host payload and
// adds attribute storage (the embedder-facing reference-object family).

use crate::error::ScriptResult;
use crate::identifier::StringId;
use crate::runtime::Runtime;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::any::Any;
use std::sync::Arc;

use super::type_object::{ext_object_type, TypeFlags, TypeObject};
use super::{Attribute, AttributeContainer, Object};

/// An instance with its own attribute container.
pub struct ExtObject {
    type_ref: Arc<TypeObject>,
    attributes: Mutex<AttributeContainer>,
}

impl ExtObject {
    /// New instance of `type_ref`, seeded with the object-attribute
    /// templates of the type.
    pub fn new(type_ref: Arc<TypeObject>) -> Arc<Self> {
        let object = Arc::new(Self {
            type_ref,
            attributes: Mutex::new(AttributeContainer::new()),
        });
        if object.type_ref.get_flag(TypeFlags::CONTAINS_OBJ_ATTRS) {
            let instance = Object::Ext(object.clone());
            object.type_ref.copy_obj_attributes_to(&instance);
        }
        object
    }

    pub fn create() -> Arc<Self> {
        Self::new(ext_object_type().clone())
    }

    /// New instance sharing this one's type, attributes copied through
    /// `get_ref_or_copy`. Backs the script-level `clone()`.
    pub fn clone_object(&self) -> Arc<Self> {
        let copy = Arc::new(Self {
            type_ref: self.type_ref.clone(),
            attributes: Mutex::new(AttributeContainer::new()),
        });
        copy.attributes
            .lock()
            .clone_attributes_from(&self.attributes.lock());
        copy
    }

    pub fn get_type(&self) -> &Arc<TypeObject> {
        &self.type_ref
    }

    /// Local storage first; on miss the per-object lock is released before
    /// the type chain is consulted under the owning type's lock.
    pub fn access_attribute(&self, id: StringId, local_only: bool) -> ScriptResult<Option<Attribute>> {
        {
            let attributes = self.attributes.lock();
            if let Some(attribute) = attributes.access(id) {
                return Ok(Some(attribute.clone()));
            }
        }
        if local_only {
            return Ok(None);
        }
        self.type_ref.find_type_attribute(id)
    }

    pub fn with_attribute_mut<R>(
        &self,
        id: StringId,
        local_only: bool,
        f: impl FnOnce(&mut Attribute) -> R,
    ) -> ScriptResult<Option<R>> {
        {
            let mut attributes = self.attributes.lock();
            if let Some(attribute) = attributes.access_mut(id) {
                return Ok(Some(f(attribute)));
            }
        }
        if local_only {
            return Ok(None);
        }
        self.type_ref.with_type_attribute_mut(id, f)
    }

    pub fn set_attribute(&self, id: StringId, attribute: Attribute) {
        self.attributes.lock().set(id, attribute);
    }

    /// Evaluates every attribute flagged INIT: a Type value is instantiated,
    /// anything else is called; the result replaces the attribute value.
    /// The container lock is not held while script code runs.
    pub fn init_attributes(&self, runtime: &mut Runtime) -> ScriptResult<()> {
        let pending: Vec<(StringId, Object)> = self
            .attributes
            .lock()
            .iter()
            .filter(|(_, attribute)| attribute.is_initializable())
            .map(|(&id, attribute)| (id, attribute.value().clone()))
            .collect();
        for (id, value) in pending {
            let result = match &value {
                Object::Type(type_object) => {
                    runtime.create_instance(type_object.clone(), Default::default())
                }
                _ => runtime.execute_function(value.clone(), None, Default::default()),
            };
            let mut attributes = self.attributes.lock();
            if let Some(attribute) = attributes.access_mut(id) {
                attribute.set_value(result.unwrap_or(Object::Void));
            }
        }
        Ok(())
    }

    pub fn collect_local_attributes(&self) -> FxHashMap<StringId, Object> {
        self.attributes.lock().collect()
    }
}

impl std::fmt::Debug for ExtObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtObject")
            .field("attributes", &self.attributes.lock().len())
            .finish()
    }
}

/// An instance without attribute storage of its own; attribute lookup goes
/// straight to the type chain and local writes fail.
#[derive(Debug)]
pub struct PlainObject {
    type_ref: Arc<TypeObject>,
}

impl PlainObject {
    pub fn new(type_ref: Arc<TypeObject>) -> Arc<Self> {
        Arc::new(Self { type_ref })
    }

    pub fn get_type(&self) -> &Arc<TypeObject> {
        &self.type_ref
    }
}

/// Wrapper for a host value that scripts may still attach attributes to.
pub struct RefObject {
    type_ref: Arc<TypeObject>,
    attributes: Mutex<AttributeContainer>,
    payload: Box<dyn Any + Send + Sync>,
}

impl RefObject {
    pub fn new(type_ref: Arc<TypeObject>, payload: Box<dyn Any + Send + Sync>) -> Arc<Self> {
        let object = Arc::new(Self {
            type_ref,
            attributes: Mutex::new(AttributeContainer::new()),
            payload,
        });
        if object.type_ref.get_flag(TypeFlags::CONTAINS_OBJ_ATTRS) {
            let instance = Object::Ref(object.clone());
            object.type_ref.copy_obj_attributes_to(&instance);
        }
        object
    }

    pub fn get_type(&self) -> &Arc<TypeObject> {
        &self.type_ref
    }

    pub fn payload<T: 'static>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    pub fn access_attribute(&self, id: StringId, local_only: bool) -> ScriptResult<Option<Attribute>> {
        {
            let attributes = self.attributes.lock();
            if let Some(attribute) = attributes.access(id) {
                return Ok(Some(attribute.clone()));
            }
        }
        if local_only {
            return Ok(None);
        }
        self.type_ref.find_type_attribute(id)
    }

    pub fn with_attribute_mut<R>(
        &self,
        id: StringId,
        local_only: bool,
        f: impl FnOnce(&mut Attribute) -> R,
    ) -> ScriptResult<Option<R>> {
        {
            let mut attributes = self.attributes.lock();
            if let Some(attribute) = attributes.access_mut(id) {
                return Ok(Some(f(attribute)));
            }
        }
        if local_only {
            return Ok(None);
        }
        self.type_ref.with_type_attribute_mut(id, f)
    }

    pub fn set_attribute(&self, id: StringId, attribute: Attribute) {
        self.attributes.lock().set(id, attribute);
    }

    pub fn init_attributes(&self, runtime: &mut Runtime) -> ScriptResult<()> {
        let pending: Vec<(StringId, Object)> = self
            .attributes
            .lock()
            .iter()
            .filter(|(_, attribute)| attribute.is_initializable())
            .map(|(&id, attribute)| (id, attribute.value().clone()))
            .collect();
        for (id, value) in pending {
            let result = match &value {
                Object::Type(type_object) => {
                    runtime.create_instance(type_object.clone(), Default::default())
                }
                _ => runtime.execute_function(value.clone(), None, Default::default()),
            };
            let mut attributes = self.attributes.lock();
            if let Some(attribute) = attributes.access_mut(id) {
                attribute.set_value(result.unwrap_or(Object::Void));
            }
        }
        Ok(())
    }

    pub fn collect_local_attributes(&self) -> FxHashMap<StringId, Object> {
        self.attributes.lock().collect()
    }
}

impl std::fmt::Debug for RefObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefObject")
            .field("attributes", &self.attributes.lock().len())
            .finish()
    }
}
