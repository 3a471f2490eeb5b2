// Types
// A Type is itself an object; types form a single-inheritance chain ending
// at the root Object type. A Type's container holds both type-attributes
// (shared by instances) and object-attribute templates (copied into each
// instance at creation).

use crate::error::{ScriptError, ScriptResult};
use crate::identifier::StringId;
use bitflags::bitflags;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, OnceLock};

use super::{Attribute, AttributeContainer, Object};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TypeFlags: u16 {
        /// Instances are cloned on assignment and compared by value.
        const CALL_BY_VALUE = 1 << 0;
        /// Set once an object-attribute has ever been inserted; lets
        /// instance initialisation skip the whole chain when clear.
        const CONTAINS_OBJ_ATTRS = 1 << 1;
        /// Scripts may derive new types from this one.
        const ALLOWS_USER_INHERITANCE = 1 << 2;
    }
}

static TYPE_ATTR_ERROR_HINT: &str = "This may be a result of: adding object attributes to a Type \
     AFTER inheriting from that Type, adding object attributes to a Type AFTER creating instances \
     of that Type, or adding object attributes to a Type whose instances cannot store object \
     attributes.";

pub struct TypeObject {
    base: Option<Arc<TypeObject>>,
    /// The Type's own type. Unset only during bootstrap of the root types;
    /// readers fall back to the root Type.
    type_of: OnceLock<Arc<TypeObject>>,
    flags: AtomicU16,
    attributes: Mutex<AttributeContainer>,
}

impl TypeObject {
    /// Creates a type deriving from `base`, seeding the new type's container
    /// with the base's object-attribute templates.
    pub fn new(base: Option<Arc<TypeObject>>) -> Arc<Self> {
        let type_object = Arc::new(Self::raw(base));
        if let Some(base) = type_object.base.clone() {
            let templates = base.collect_obj_attribute_templates();
            if !templates.is_empty() {
                let mut attributes = type_object.attributes.lock();
                for (id, attribute) in templates {
                    attributes.set(id, attribute);
                }
                drop(attributes);
                type_object.set_flag(TypeFlags::CONTAINS_OBJ_ATTRS, true);
            }
        }
        type_object
    }

    fn raw(base: Option<Arc<TypeObject>>) -> Self {
        Self {
            base,
            type_of: OnceLock::new(),
            flags: AtomicU16::new(0),
            attributes: Mutex::new(AttributeContainer::new()),
        }
    }

    // --- flags ---

    pub fn get_flag(&self, flag: TypeFlags) -> bool {
        TypeFlags::from_bits_retain(self.flags.load(Ordering::Relaxed)).contains(flag)
    }

    pub fn set_flag(&self, flag: TypeFlags, value: bool) {
        if value {
            self.flags.fetch_or(flag.bits(), Ordering::Relaxed);
        } else {
            self.flags.fetch_and(!flag.bits(), Ordering::Relaxed);
        }
    }

    pub fn is_call_by_value(&self) -> bool {
        self.get_flag(TypeFlags::CALL_BY_VALUE)
    }

    pub fn allows_user_inheritance(&self) -> bool {
        self.get_flag(TypeFlags::ALLOWS_USER_INHERITANCE)
    }

    // --- inheritance ---

    pub fn base_type(&self) -> Option<&Arc<TypeObject>> {
        self.base.as_ref()
    }

    pub fn get_type(&self) -> Arc<TypeObject> {
        self.type_of
            .get()
            .cloned()
            .unwrap_or_else(|| type_type().clone())
    }

    /// True if `target` appears in this type's inheritance chain (including
    /// this type itself).
    pub fn has_base(&self, target: &Arc<TypeObject>) -> bool {
        let mut cursor: Option<&TypeObject> = Some(self);
        while let Some(type_object) = cursor {
            if std::ptr::eq(type_object, target.as_ref()) {
                return true;
            }
            cursor = type_object.base.as_deref();
        }
        false
    }

    pub fn is_base_of(&self, other: &Arc<TypeObject>) -> bool {
        let mut cursor: Option<&TypeObject> = Some(other.as_ref());
        while let Some(type_object) = cursor {
            if std::ptr::eq(type_object, self) {
                return true;
            }
            cursor = type_object.base.as_deref();
        }
        false
    }

    // --- attributes ---

    fn obj_attribute_error(id: StringId) -> ScriptError {
        ScriptError::Message(format!(
            "Type-attribute expected but object-attribute found. ('{}')\n{}",
            id, TYPE_ATTR_ERROR_HINT
        ))
    }

    /// Walks this type and its bases looking for a type-attribute. Finding
    /// an object-attribute template on the way is an error: it means object
    /// attributes were added to a Type after inheritance or after instances
    /// were created.
    pub fn find_type_attribute(&self, id: StringId) -> ScriptResult<Option<Attribute>> {
        let mut cursor: Option<&TypeObject> = Some(self);
        while let Some(type_object) = cursor {
            let attributes = type_object.attributes.lock();
            if let Some(attribute) = attributes.access(id) {
                if attribute.is_obj_attribute() {
                    return Err(Self::obj_attribute_error(id));
                }
                return Ok(Some(attribute.clone()));
            }
            drop(attributes);
            cursor = type_object.base.as_deref();
        }
        Ok(None)
    }

    /// Mutable counterpart of `find_type_attribute`; the owning type's lock
    /// is held while `f` runs.
    pub fn with_type_attribute_mut<R>(
        &self,
        id: StringId,
        f: impl FnOnce(&mut Attribute) -> R,
    ) -> ScriptResult<Option<R>> {
        let mut cursor: Option<&TypeObject> = Some(self);
        while let Some(type_object) = cursor {
            let mut attributes = type_object.attributes.lock();
            if let Some(attribute) = attributes.access_mut(id) {
                if attribute.is_obj_attribute() {
                    return Err(Self::obj_attribute_error(id));
                }
                return Ok(Some(f(attribute)));
            }
            drop(attributes);
            cursor = type_object.base.as_deref();
        }
        Ok(None)
    }

    /// Attribute access for the Type itself: its own container first, then
    /// inherited type-attributes, then the Type's own type exactly once.
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
        if let Some(base) = &self.base {
            if let Some(attribute) = base.find_type_attribute(id)? {
                return Ok(Some(attribute));
            }
        }
        self.get_type().find_type_attribute(id)
    }

    /// Mutable access with the same resolution order as `access_attribute`.
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
        if let Some(base) = &self.base {
            // locate first: the closure can only be offered to one container
            if base.find_type_attribute(id)?.is_some() {
                return base.with_type_attribute_mut(id, f);
            }
        }
        self.get_type().with_type_attribute_mut(id, f)
    }

    pub fn set_attribute(&self, id: StringId, attribute: Attribute) {
        let is_obj_attribute = attribute.is_obj_attribute();
        self.attributes.lock().set(id, attribute);
        if is_obj_attribute {
            self.set_flag(TypeFlags::CONTAINS_OBJ_ATTRS, true);
        }
    }

    /// Copies of this type's object-attribute templates, values passed
    /// through `get_ref_or_copy`.
    fn collect_obj_attribute_templates(&self) -> Vec<(StringId, Attribute)> {
        if !self.get_flag(TypeFlags::CONTAINS_OBJ_ATTRS) {
            return Vec::new();
        }
        self.attributes
            .lock()
            .iter()
            .filter(|(_, attribute)| attribute.is_obj_attribute())
            .map(|(&id, attribute)| {
                (
                    id,
                    Attribute::new(attribute.value().get_ref_or_copy(), attribute.properties()),
                )
            })
            .collect()
    }

    /// Seeds `instance` with this type's object-attribute templates. Used
    /// when a new instance (or derived type) is created.
    pub fn copy_obj_attributes_to(&self, instance: &Object) {
        for (id, attribute) in self.collect_obj_attribute_templates() {
            instance.set_attribute(id, attribute);
        }
    }

    pub fn collect_type_attributes(&self) -> FxHashMap<StringId, Object> {
        self.attributes
            .lock()
            .iter()
            .filter(|(_, attribute)| attribute.is_type_attribute())
            .map(|(&id, attribute)| (id, attribute.value().clone()))
            .collect()
    }

    pub fn collect_obj_attributes(&self) -> FxHashMap<StringId, Object> {
        self.attributes
            .lock()
            .iter()
            .filter(|(_, attribute)| attribute.is_obj_attribute())
            .map(|(&id, attribute)| (id, attribute.value().clone()))
            .collect()
    }

    pub fn collect_local_attributes(&self) -> FxHashMap<StringId, Object> {
        self.attributes.lock().collect()
    }
}

impl std::fmt::Debug for TypeObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeObject")
            .field("flags", &self.flags.load(Ordering::Relaxed))
            .field("attributes", &self.attributes.lock().len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Static type objects
//
// The root `Type` is its own type: both roots are built raw and patched in
// two phases behind OnceLock cells. The resulting reference cycle keeps the
// two roots alive for the process lifetime, which is the intended lifecycle
// for type objects.

/// The type of all plain objects; the root of every inheritance chain.
pub fn object_type() -> &'static Arc<TypeObject> {
    static TYPE: OnceLock<Arc<TypeObject>> = OnceLock::new();
    TYPE.get_or_init(|| Arc::new(TypeObject::raw(None)))
}

/// The type of all Type objects, including itself.
pub fn type_type() -> &'static Arc<TypeObject> {
    static TYPE: OnceLock<Arc<TypeObject>> = OnceLock::new();
    TYPE.get_or_init(|| {
        let meta = Arc::new(TypeObject::raw(Some(object_type().clone())));
        let _ = meta.type_of.set(meta.clone());
        let _ = object_type().type_of.set(meta.clone());
        meta
    })
}

fn derived_static_type(flags: TypeFlags, base: &Arc<TypeObject>) -> Arc<TypeObject> {
    // touch the roots first so the bootstrap cycle is complete
    let _ = type_type();
    let type_object = TypeObject::new(Some(base.clone()));
    type_object.set_flag(flags, true);
    type_object
}

macro_rules! static_type {
    ($name:ident, $flags:expr) => {
        pub fn $name() -> &'static Arc<TypeObject> {
            static TYPE: OnceLock<Arc<TypeObject>> = OnceLock::new();
            TYPE.get_or_init(|| derived_static_type($flags, object_type()))
        }
    };
    ($name:ident, $flags:expr, $base:ident) => {
        pub fn $name() -> &'static Arc<TypeObject> {
            static TYPE: OnceLock<Arc<TypeObject>> = OnceLock::new();
            TYPE.get_or_init(|| derived_static_type($flags, $base()))
        }
    };
}

static_type!(void_type, TypeFlags::CALL_BY_VALUE);
static_type!(bool_type, TypeFlags::CALL_BY_VALUE);
static_type!(number_type, TypeFlags::CALL_BY_VALUE);
static_type!(string_type, TypeFlags::CALL_BY_VALUE);
static_type!(identifier_type, TypeFlags::CALL_BY_VALUE);
static_type!(ext_object_type, TypeFlags::ALLOWS_USER_INHERITANCE);
static_type!(array_type, TypeFlags::empty());
static_type!(map_type, TypeFlags::empty());
static_type!(user_function_type, TypeFlags::empty());
static_type!(function_type, TypeFlags::empty());
static_type!(binder_type, TypeFlags::empty());
static_type!(yield_iterator_type, TypeFlags::empty());
static_type!(collection_iterator_type, TypeFlags::empty());
static_type!(namespace_type, TypeFlags::ALLOWS_USER_INHERITANCE, ext_object_type);
static_type!(exception_type, TypeFlags::ALLOWS_USER_INHERITANCE, ext_object_type);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_type_is_its_own_type() {
        let meta = type_type();
        assert!(Arc::ptr_eq(&meta.get_type(), meta));
        assert!(Arc::ptr_eq(&object_type().get_type(), meta));
        assert!(object_type().base_type().is_none());
    }

    #[test]
    fn every_static_type_descends_from_object() {
        for type_object in [
            bool_type(),
            number_type(),
            string_type(),
            array_type(),
            map_type(),
            ext_object_type(),
            exception_type(),
            namespace_type(),
        ] {
            assert!(type_object.has_base(object_type()));
            assert!(object_type().is_base_of(type_object));
        }
    }

    #[test]
    fn base_chain_walks() {
        let a = TypeObject::new(Some(ext_object_type().clone()));
        let b = TypeObject::new(Some(a.clone()));
        assert!(b.has_base(&a));
        assert!(b.has_base(object_type()));
        assert!(a.is_base_of(&b));
        assert!(!b.is_base_of(&a));
    }

    #[test]
    fn find_type_attribute_walks_the_chain() {
        let id = StringId::new("answer");
        let a = TypeObject::new(Some(ext_object_type().clone()));
        a.set_attribute(
            id,
            Attribute::new(Object::number(42.0), crate::objects::AttrFlags::TYPE_ATTR),
        );
        let b = TypeObject::new(Some(a.clone()));
        let found = b.find_type_attribute(id).unwrap().unwrap();
        assert_eq!(found.value().to_double(), 42.0);
    }

    #[test]
    fn object_attribute_template_poisons_type_lookup() {
        let id = StringId::new("slot");
        let a = TypeObject::new(Some(ext_object_type().clone()));
        a.set_attribute(id, Attribute::normal(Object::number(1.0)));
        assert!(a.get_flag(TypeFlags::CONTAINS_OBJ_ATTRS));
        assert!(a.find_type_attribute(id).is_err());
    }

    #[test]
    fn derived_type_inherits_obj_attribute_templates() {
        let id = StringId::new("slot");
        let a = TypeObject::new(Some(ext_object_type().clone()));
        a.set_attribute(id, Attribute::normal(Object::number(7.0)));
        let b = TypeObject::new(Some(a.clone()));
        assert!(b.get_flag(TypeFlags::CONTAINS_OBJ_ATTRS));
        let local = b.collect_obj_attributes();
        assert_eq!(local.get(&id).unwrap().to_double(), 7.0);
    }
}
