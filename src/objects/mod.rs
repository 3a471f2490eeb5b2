// Object model
// Every value that escapes the interpreter stack is an Object. Cloning an
// Object is cheap: reference-counted payloads are shared, value types are
// copied. Identity follows value semantics for call-by-value types and
// pointer identity otherwise.

mod attribute;
mod callables;
mod collections;
mod exception;
mod ext_object;
mod iterator;
pub mod pool;
pub mod type_object;

pub use attribute::{AttrFlags, Attribute, AttributeContainer, ATTR_NORMAL_ATTRIBUTE};
pub use callables::{FnBinder, NativeFnPtr, NativeFunction, UserFunction};
pub use collections::{ArrayObject, CollectionIterator, MapObject};
pub use exception::ExceptionObject;
pub use ext_object::{ExtObject, PlainObject, RefObject};
pub use iterator::YieldIterator;
pub use type_object::{TypeFlags, TypeObject};

use crate::consts;
use crate::error::ScriptResult;
use crate::identifier::StringId;
use crate::runtime::Runtime;
use rustc_hash::FxHashMap;
use std::sync::Arc;

use self::type_object as types;

/// Stable identifier of an object's concrete kind; part of the embedding
/// contract (release handlers and call dispatch key on it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InternalTypeId {
    Void,
    Bool,
    Number,
    String,
    Identifier,
    Object,
    ExtObject,
    Type,
    Array,
    Map,
    UserFunction,
    Function,
    FnBinder,
    Exception,
    YieldIterator,
    CollectionIterator,
    Reference,
}

#[derive(Clone)]
pub enum Object {
    Void,
    Bool(bool),
    Number(f64),
    String(Arc<str>),
    Identifier(StringId),
    Plain(Arc<PlainObject>),
    Ext(Arc<ExtObject>),
    Type(Arc<TypeObject>),
    Array(Arc<ArrayObject>),
    Map(Arc<MapObject>),
    UserFn(Arc<UserFunction>),
    NativeFn(Arc<NativeFunction>),
    Binder(Arc<FnBinder>),
    Exception(Arc<ExceptionObject>),
    Iterator(Arc<YieldIterator>),
    Ref(Arc<RefObject>),
}

impl Object {
    // --- constructors ---

    pub fn number(value: f64) -> Self {
        Object::Number(value)
    }

    pub fn string(value: impl AsRef<str>) -> Self {
        Object::String(Arc::from(value.as_ref()))
    }

    pub fn identifier(id: StringId) -> Self {
        Object::Identifier(id)
    }

    // --- kind and type ---

    pub fn internal_type_id(&self) -> InternalTypeId {
        match self {
            Object::Void => InternalTypeId::Void,
            Object::Bool(_) => InternalTypeId::Bool,
            Object::Number(_) => InternalTypeId::Number,
            Object::String(_) => InternalTypeId::String,
            Object::Identifier(_) => InternalTypeId::Identifier,
            Object::Plain(_) => InternalTypeId::Object,
            Object::Ext(_) => InternalTypeId::ExtObject,
            Object::Type(_) => InternalTypeId::Type,
            Object::Array(_) => InternalTypeId::Array,
            Object::Map(_) => InternalTypeId::Map,
            Object::UserFn(_) => InternalTypeId::UserFunction,
            Object::NativeFn(_) => InternalTypeId::Function,
            Object::Binder(_) => InternalTypeId::FnBinder,
            Object::Exception(_) => InternalTypeId::Exception,
            Object::Iterator(_) => InternalTypeId::YieldIterator,
            Object::Ref(_) => InternalTypeId::Reference,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self.internal_type_id() {
            InternalTypeId::Void => "Void",
            InternalTypeId::Bool => "Bool",
            InternalTypeId::Number => "Number",
            InternalTypeId::String => "String",
            InternalTypeId::Identifier => "Identifier",
            InternalTypeId::Object => "Object",
            InternalTypeId::ExtObject => "ExtObject",
            InternalTypeId::Type => "Type",
            InternalTypeId::Array => "Array",
            InternalTypeId::Map => "Map",
            InternalTypeId::UserFunction => "UserFunction",
            InternalTypeId::Function => "Function",
            InternalTypeId::FnBinder => "FnBinder",
            InternalTypeId::Exception => "Exception",
            InternalTypeId::YieldIterator => "YieldIterator",
            InternalTypeId::CollectionIterator => "Iterator",
            InternalTypeId::Reference => "Reference",
        }
    }

    pub fn get_type(&self) -> Arc<TypeObject> {
        match self {
            Object::Void => types::void_type().clone(),
            Object::Bool(_) => types::bool_type().clone(),
            Object::Number(_) => types::number_type().clone(),
            Object::String(_) => types::string_type().clone(),
            Object::Identifier(_) => types::identifier_type().clone(),
            Object::Plain(object) => object.get_type().clone(),
            Object::Ext(object) => object.get_type().clone(),
            Object::Type(type_object) => type_object.get_type(),
            Object::Array(_) => types::array_type().clone(),
            Object::Map(_) => types::map_type().clone(),
            Object::UserFn(_) => types::user_function_type().clone(),
            Object::NativeFn(_) => types::function_type().clone(),
            Object::Binder(_) => types::binder_type().clone(),
            Object::Exception(object) => object.get_type().clone(),
            Object::Iterator(object) => object.get_type().clone(),
            Object::Ref(object) => object.get_type().clone(),
        }
    }

    pub fn is_a(&self, type_object: &Arc<TypeObject>) -> bool {
        self.get_type().has_base(type_object)
    }

    pub fn as_type(&self) -> Option<&Arc<TypeObject>> {
        match self {
            Object::Type(type_object) => Some(type_object),
            _ => None,
        }
    }

    // --- identity and equality ---

    /// Pointer identity for reference kinds, value identity for the inline
    /// kinds. This is the comparison used for `this == object` checks.
    pub fn same(&self, other: &Object) -> bool {
        match (self, other) {
            (Object::Void, Object::Void) => true,
            (Object::Bool(a), Object::Bool(b)) => a == b,
            (Object::Number(a), Object::Number(b)) => a == b,
            (Object::Identifier(a), Object::Identifier(b)) => a == b,
            (Object::String(a), Object::String(b)) => Arc::ptr_eq(a, b),
            (Object::Plain(a), Object::Plain(b)) => Arc::ptr_eq(a, b),
            (Object::Ext(a), Object::Ext(b)) => Arc::ptr_eq(a, b),
            (Object::Type(a), Object::Type(b)) => Arc::ptr_eq(a, b),
            (Object::Array(a), Object::Array(b)) => Arc::ptr_eq(a, b),
            (Object::Map(a), Object::Map(b)) => Arc::ptr_eq(a, b),
            (Object::UserFn(a), Object::UserFn(b)) => Arc::ptr_eq(a, b),
            (Object::NativeFn(a), Object::NativeFn(b)) => Arc::ptr_eq(a, b),
            (Object::Binder(a), Object::Binder(b)) => Arc::ptr_eq(a, b),
            (Object::Exception(a), Object::Exception(b)) => Arc::ptr_eq(a, b),
            (Object::Iterator(a), Object::Iterator(b)) => Arc::ptr_eq(a, b),
            (Object::Ref(a), Object::Ref(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Structural equality without consulting scripted `==` members.
    pub fn rt_is_equal(&self, other: &Object) -> bool {
        match (self, other) {
            (Object::String(a), Object::String(b)) => a == b,
            (Object::Array(a), Object::Array(b)) => a.rt_is_equal(b),
            _ => self.same(other),
        }
    }

    /// `===`: value semantics for call-by-value types, identity otherwise.
    pub fn is_identical(&self, other: &Object) -> bool {
        if self.get_type().is_call_by_value() {
            Arc::ptr_eq(&self.get_type(), &other.get_type()) && self.rt_is_equal(other)
        } else {
            self.same(other)
        }
    }

    // --- copying ---

    /// A clone if this object's type is call-by-value, the object itself
    /// otherwise. Applied whenever a value is stored or passed by value.
    pub fn get_ref_or_copy(&self) -> Object {
        match self {
            Object::Void
            | Object::Bool(_)
            | Object::Number(_)
            | Object::String(_)
            | Object::Identifier(_) => self.clone(),
            _ => {
                if self.get_type().is_call_by_value() {
                    self.clone_deep()
                } else {
                    self.clone()
                }
            }
        }
    }

    /// The script-level `clone()`.
    pub fn clone_deep(&self) -> Object {
        match self {
            Object::Void
            | Object::Bool(_)
            | Object::Number(_)
            | Object::String(_)
            | Object::Identifier(_) => self.clone(),
            Object::Plain(object) => Object::Plain(PlainObject::new(object.get_type().clone())),
            Object::Ext(object) => Object::Ext(object.clone_object()),
            Object::Type(type_object) => {
                Object::Type(TypeObject::new(type_object.base_type().cloned()))
            }
            Object::Array(array) => Object::Array(array.clone_object()),
            Object::Map(map) => Object::Map(map.clone_object()),
            // functions, binders, iterators and host references share
            _ => self.clone(),
        }
    }

    // --- conversions ---

    pub fn to_bool(&self) -> bool {
        match self {
            Object::Void => false,
            Object::Bool(value) => *value,
            _ => true,
        }
    }

    pub fn to_double(&self) -> f64 {
        match self {
            Object::Number(value) => *value,
            Object::Bool(true) => 1.0,
            Object::Bool(false) => 0.0,
            Object::String(value) => value.trim().parse().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    pub fn to_string_repr(&self) -> String {
        match self {
            Object::Void => "void".to_string(),
            Object::Bool(value) => value.to_string(),
            Object::Number(value) => format_number(*value),
            Object::String(value) => value.to_string(),
            Object::Identifier(id) => id.to_string(),
            Object::Exception(exception) => exception.description(),
            Object::Array(array) => {
                let items: Vec<String> = array
                    .to_vec()
                    .iter()
                    .map(|value| value.to_string_repr())
                    .collect();
                format!("[{}]", items.join(", "))
            }
            _ => {
                let mut text = String::from("#");
                if let Ok(Some(attribute)) = self.get_attribute(consts::id_printable_name()) {
                    // only strings and identifiers, to rule out recursion
                    match attribute.value() {
                        Object::String(name) => text.push_str(&format!("{}:", name)),
                        Object::Identifier(name) => text.push_str(&format!("{}:", name)),
                        _ => {}
                    }
                }
                text.push_str(&format!("{}:{:#x}", self.type_name(), self.address()));
                text
            }
        }
    }

    pub fn to_dbg_string(&self) -> String {
        match self {
            Object::String(value) => format!("\"{}\"", value),
            _ => self.to_string_repr(),
        }
    }

    pub fn hash(&self) -> StringId {
        StringId::new(&self.to_string_repr())
    }

    fn address(&self) -> usize {
        match self {
            Object::Void
            | Object::Bool(_)
            | Object::Number(_)
            | Object::String(_)
            | Object::Identifier(_) => 0,
            Object::Plain(object) => Arc::as_ptr(object) as usize,
            Object::Ext(object) => Arc::as_ptr(object) as usize,
            Object::Type(object) => Arc::as_ptr(object) as usize,
            Object::Array(object) => Arc::as_ptr(object) as usize,
            Object::Map(object) => Arc::as_ptr(object) as usize,
            Object::UserFn(object) => Arc::as_ptr(object) as usize,
            Object::NativeFn(object) => Arc::as_ptr(object) as usize,
            Object::Binder(object) => Arc::as_ptr(object) as usize,
            Object::Exception(object) => Arc::as_ptr(object) as usize,
            Object::Iterator(object) => Arc::as_ptr(object) as usize,
            Object::Ref(object) => Arc::as_ptr(object) as usize,
        }
    }

    // --- attributes ---

    pub fn access_attribute(
        &self,
        id: StringId,
        local_only: bool,
    ) -> ScriptResult<Option<Attribute>> {
        match self {
            Object::Ext(object) => object.access_attribute(id, local_only),
            Object::Ref(object) => object.access_attribute(id, local_only),
            Object::Type(type_object) => type_object.access_attribute(id, local_only),
            Object::Exception(exception) => {
                {
                    let attributes = exception.attributes.lock();
                    if let Some(attribute) = attributes.access(id) {
                        return Ok(Some(attribute.clone()));
                    }
                }
                if local_only {
                    return Ok(None);
                }
                exception.get_type().find_type_attribute(id)
            }
            Object::UserFn(function) => {
                {
                    let attributes = function.attributes().lock();
                    if let Some(attribute) = attributes.access(id) {
                        return Ok(Some(attribute.clone()));
                    }
                }
                if local_only {
                    return Ok(None);
                }
                self.get_type().find_type_attribute(id)
            }
            _ => {
                if local_only {
                    return Ok(None);
                }
                self.get_type().find_type_attribute(id)
            }
        }
    }

    pub fn get_attribute(&self, id: StringId) -> ScriptResult<Option<Attribute>> {
        self.access_attribute(id, false)
    }

    pub fn get_local_attribute(&self, id: StringId) -> ScriptResult<Option<Attribute>> {
        self.access_attribute(id, true)
    }

    /// Runs `f` on the attribute under the owning container's lock,
    /// resolving through the same path as `access_attribute`.
    pub fn with_attribute_mut<R>(
        &self,
        id: StringId,
        local_only: bool,
        f: impl FnOnce(&mut Attribute) -> R,
    ) -> ScriptResult<Option<R>> {
        match self {
            Object::Ext(object) => object.with_attribute_mut(id, local_only, f),
            Object::Ref(object) => object.with_attribute_mut(id, local_only, f),
            Object::Type(type_object) => type_object.with_attribute_mut(id, local_only, f),
            Object::Exception(exception) => {
                {
                    let mut attributes = exception.attributes.lock();
                    if let Some(attribute) = attributes.access_mut(id) {
                        return Ok(Some(f(attribute)));
                    }
                }
                if local_only {
                    return Ok(None);
                }
                exception.get_type().with_type_attribute_mut(id, f)
            }
            Object::UserFn(function) => {
                {
                    let mut attributes = function.attributes().lock();
                    if let Some(attribute) = attributes.access_mut(id) {
                        return Ok(Some(f(attribute)));
                    }
                }
                if local_only {
                    return Ok(None);
                }
                self.get_type().with_type_attribute_mut(id, f)
            }
            _ => {
                if local_only {
                    return Ok(None);
                }
                self.get_type().with_type_attribute_mut(id, f)
            }
        }
    }

    /// Stores an attribute locally. Fails (returns false) for kinds without
    /// local attribute storage.
    pub fn set_attribute(&self, id: StringId, attribute: Attribute) -> bool {
        match self {
            Object::Ext(object) => {
                object.set_attribute(id, attribute);
                true
            }
            Object::Ref(object) => {
                object.set_attribute(id, attribute);
                true
            }
            Object::Type(type_object) => {
                type_object.set_attribute(id, attribute);
                true
            }
            Object::Exception(exception) => {
                exception.attributes.lock().set(id, attribute);
                true
            }
            Object::UserFn(function) => {
                function.attributes().lock().set(id, attribute);
                true
            }
            _ => false,
        }
    }

    /// Deferred-initialisation hook, called after instance creation but
    /// before the first scripted constructor line runs.
    pub fn init_attributes(&self, runtime: &mut Runtime) -> ScriptResult<()> {
        match self {
            Object::Ext(object) => object.init_attributes(runtime),
            Object::Ref(object) => object.init_attributes(runtime),
            _ => Ok(()),
        }
    }

    pub fn collect_local_attributes(&self) -> FxHashMap<StringId, Object> {
        match self {
            Object::Ext(object) => object.collect_local_attributes(),
            Object::Ref(object) => object.collect_local_attributes(),
            Object::Type(type_object) => type_object.collect_local_attributes(),
            Object::Exception(exception) => exception.attributes.lock().collect(),
            Object::UserFn(function) => function.attributes().lock().collect(),
            _ => FxHashMap::default(),
        }
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Object::String(a), Object::String(b)) => a == b,
            _ => self.same(other),
        }
    }
}

impl std::fmt::Debug for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_dbg_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_object_descends_from_the_root_type() {
        let objects = [
            Object::Void,
            Object::Bool(true),
            Object::number(1.5),
            Object::string("s"),
            Object::identifier(StringId::new("id")),
            Object::Ext(ExtObject::create()),
            Object::Type(types::type_type().clone()),
            Object::Array(ArrayObject::empty()),
        ];
        for object in objects {
            assert!(
                object.get_type().has_base(types::object_type()),
                "{} must descend from Object",
                object.type_name()
            );
        }
    }

    #[test]
    fn value_types_follow_value_identity() {
        assert!(Object::number(2.0).is_identical(&Object::number(2.0)));
        assert!(!Object::number(2.0).is_identical(&Object::number(3.0)));
        assert!(Object::string("a").is_identical(&Object::string("a")));
        assert!(Object::Bool(true).is_identical(&Object::Bool(true)));
    }

    #[test]
    fn reference_types_follow_pointer_identity() {
        let a = Object::Ext(ExtObject::create());
        let b = a.clone();
        let c = Object::Ext(ExtObject::create());
        assert!(a.is_identical(&b));
        assert!(!a.is_identical(&c));
    }

    #[test]
    fn clone_of_reference_object_is_equal_but_not_identical() {
        let id = StringId::new("x");
        let original = Object::Ext(ExtObject::create());
        original.set_attribute(id, Attribute::normal(Object::number(4.0)));
        let copy = original.clone_deep();
        assert!(!original.is_identical(&copy));
        assert_eq!(
            copy.get_attribute(id).unwrap().unwrap().value().to_double(),
            4.0
        );
    }

    #[test]
    fn void_and_false_are_the_only_false_values() {
        assert!(!Object::Void.to_bool());
        assert!(!Object::Bool(false).to_bool());
        assert!(Object::number(0.0).to_bool());
        assert!(Object::string("").to_bool());
    }

    #[test]
    fn number_repr_trims_integral_values() {
        assert_eq!(Object::number(3.0).to_string_repr(), "3");
        assert_eq!(Object::number(2.5).to_string_repr(), "2.5");
    }

    #[test]
    fn assigning_through_instance_reaches_type_attribute() {
        let id = StringId::new("shared");
        let type_object = TypeObject::new(Some(types::ext_object_type().clone()));
        type_object.set_attribute(
            id,
            Attribute::new(Object::number(1.0), AttrFlags::TYPE_ATTR),
        );
        let instance = Object::Ext(ExtObject::new(type_object.clone()));
        let result = instance
            .with_attribute_mut(id, false, |attribute| {
                attribute.set_value(Object::number(2.0))
            })
            .unwrap();
        assert!(result.is_some());
        assert_eq!(
            type_object
                .find_type_attribute(id)
                .unwrap()
                .unwrap()
                .value()
                .to_double(),
            2.0
        );
    }
}
