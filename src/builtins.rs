// Base library
// Registers the member functions the core contract requires on the static
// type objects, and builds the global namespace each new runtime starts
// with. Registration happens once per process; the types are shared.

use crate::consts;
use crate::error::{ScriptError, ScriptResult};
use crate::identifier::StringId;
use crate::objects::type_object::{
    self as types, TypeFlags, TypeObject,
};
use crate::objects::{
    ArrayObject, AttrFlags, Attribute, CollectionIterator, ExceptionObject, ExtObject, FnBinder,
    MapObject, NativeFnPtr, NativeFunction, Object, PlainObject, RefObject,
};
use crate::runtime::{RtValue, Runtime};
use std::sync::{Arc, OnceLock};

// ---------------------------------------------------------------------------
// Embedding helpers

/// Registers a native member function on a type.
pub fn declare_function(
    type_object: &Arc<TypeObject>,
    name: &str,
    min_params: u32,
    max_params: Option<u32>,
    fn_ptr: NativeFnPtr,
) {
    let id = StringId::new(name);
    let native = NativeFunction::new(id, min_params, max_params, fn_ptr);
    type_object.set_attribute(
        id,
        Attribute::new(Object::NativeFn(Arc::new(native)), AttrFlags::TYPE_ATTR),
    );
}

/// Registers a native constructor (factory) on a type.
pub fn declare_constructor(
    type_object: &Arc<TypeObject>,
    min_params: u32,
    max_params: Option<u32>,
    fn_ptr: NativeFnPtr,
) {
    let id = consts::id_constructor();
    let native = NativeFunction::new(id, min_params, max_params, fn_ptr);
    type_object.set_attribute(
        id,
        Attribute::new(Object::NativeFn(Arc::new(native)), AttrFlags::TYPE_ATTR),
    );
}

/// Declares a constant attribute (used for the global type constants).
pub fn declare_constant(object: &Object, name: &str, value: Object) {
    object.set_attribute(StringId::new(name), Attribute::new(value, AttrFlags::CONST));
}

fn set_printable_name(type_object: &Arc<TypeObject>, name: &str) {
    type_object.set_attribute(
        consts::id_printable_name(),
        Attribute::new(
            Object::string(name),
            AttrFlags::TYPE_ATTR.union(AttrFlags::CONST),
        ),
    );
}

// --- parameter coercion helpers ---

fn param(params: &[Object], index: usize) -> Object {
    params.get(index).cloned().unwrap_or(Object::Void)
}

fn this_object(caller: Option<&Object>) -> ScriptResult<Object> {
    caller
        .cloned()
        .ok_or_else(|| ScriptError::from("Member function called without object."))
}

fn to_identifier(object: &Object) -> ScriptResult<StringId> {
    match object {
        Object::Identifier(id) => Ok(*id),
        Object::String(name) => Ok(StringId::new(name)),
        other => Err(ScriptError::Message(format!(
            "Identifier or String expected, got '{}'.",
            other.to_dbg_string()
        ))),
    }
}

fn to_type(object: &Object) -> ScriptResult<Arc<TypeObject>> {
    match object {
        Object::Type(type_object) => Ok(type_object.clone()),
        other => Err(ScriptError::Message(format!(
            "Type expected, got '{}'.",
            other.to_dbg_string()
        ))),
    }
}

fn to_array(object: &Object) -> ScriptResult<Arc<ArrayObject>> {
    match object {
        Object::Array(array) => Ok(array.clone()),
        other => Err(ScriptError::Message(format!(
            "Array expected, got '{}'.",
            other.to_dbg_string()
        ))),
    }
}

// ---------------------------------------------------------------------------
// Initialisation

/// Registers all native members on the static types. Idempotent; invoked by
/// `Runtime::new`.
pub fn init_base_types() {
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        init_object_type();
        init_type_type();
        init_ext_object_type();
        init_value_types();
        init_array_type();
        init_map_type();
        init_exception_type();
        init_iterator_types();
        set_printable_name(types::namespace_type(), "Namespace");
        set_printable_name(types::user_function_type(), "UserFunction");
        set_printable_name(types::function_type(), "Function");
        set_printable_name(types::binder_type(), "FnBinder");
        set_printable_name(types::void_type(), "Void");
    });
}

/// A fresh global namespace carrying the base types as constants.
pub fn new_globals() -> Object {
    init_base_types();
    let globals = Object::Ext(ExtObject::new(types::namespace_type().clone()));
    declare_constant(&globals, "Object", Object::Type(types::object_type().clone()));
    declare_constant(&globals, "Type", Object::Type(types::type_type().clone()));
    declare_constant(
        &globals,
        "ExtObject",
        Object::Type(types::ext_object_type().clone()),
    );
    declare_constant(
        &globals,
        "Namespace",
        Object::Type(types::namespace_type().clone()),
    );
    declare_constant(&globals, "Bool", Object::Type(types::bool_type().clone()));
    declare_constant(&globals, "Number", Object::Type(types::number_type().clone()));
    declare_constant(&globals, "String", Object::Type(types::string_type().clone()));
    declare_constant(
        &globals,
        "Identifier",
        Object::Type(types::identifier_type().clone()),
    );
    declare_constant(&globals, "Array", Object::Type(types::array_type().clone()));
    declare_constant(&globals, "Map", Object::Type(types::map_type().clone()));
    declare_constant(
        &globals,
        "Exception",
        Object::Type(types::exception_type().clone()),
    );
    declare_constant(
        &globals,
        "YieldIterator",
        Object::Type(types::yield_iterator_type().clone()),
    );
    globals
}

// ---------------------------------------------------------------------------
// Object

fn init_object_type() {
    let type_object = types::object_type();
    type_object.set_flag(TypeFlags::ALLOWS_USER_INHERITANCE, true);
    set_printable_name(type_object, "Object");
    declare_constructor(type_object, 0, Some(0), object_constructor);
    declare_function(type_object, "clone", 0, Some(0), object_clone);
    declare_function(type_object, "toString", 0, Some(0), object_to_string);
    declare_function(type_object, "toNumber", 0, Some(0), object_to_number);
    declare_function(type_object, "isA", 1, Some(1), object_is_a);
    declare_function(type_object, "---|>", 1, Some(1), object_is_a);
    declare_function(type_object, "==", 1, Some(1), object_equals);
    declare_function(type_object, "!=", 1, Some(1), object_not_equals);
    declare_function(type_object, "===", 1, Some(1), object_identical);
    declare_function(type_object, "!==", 1, Some(1), object_not_identical);
    declare_function(type_object, "getType", 0, Some(0), object_get_type);
    declare_function(type_object, "getTypeName", 0, Some(0), object_get_type_name);
    declare_function(type_object, "hash", 0, Some(0), object_hash);
    declare_function(type_object, "getAttribute", 1, Some(1), object_get_attribute);
    declare_function(
        type_object,
        "getAttributeProperties",
        1,
        Some(1),
        object_get_attribute_properties,
    );
    declare_function(
        type_object,
        "getLocalAttribute",
        1,
        Some(1),
        object_get_local_attribute,
    );
    declare_function(type_object, "isSet", 1, Some(1), object_is_set);
    declare_function(type_object, "isSetLocally", 1, Some(1), object_is_set_locally);
    declare_function(type_object, "setAttribute", 2, Some(3), object_set_attribute);
    declare_function(
        type_object,
        "assignAttribute",
        2,
        Some(2),
        object_assign_attribute,
    );
    declare_function(type_object, "_checkConstraint", 1, Some(1), object_check_constraint);
    declare_function(type_object, "->", 1, Some(1), object_bind);
}

fn object_constructor(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    _params: &[Object],
) -> ScriptResult<RtValue> {
    let type_object = match caller {
        Some(Object::Type(type_object)) => type_object.clone(),
        _ => types::object_type().clone(),
    };
    Ok(RtValue::Object(Object::Plain(PlainObject::new(type_object))))
}

fn object_clone(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    _params: &[Object],
) -> ScriptResult<RtValue> {
    Ok(RtValue::Object(this_object(caller)?.clone_deep()))
}

fn object_to_string(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    _params: &[Object],
) -> ScriptResult<RtValue> {
    Ok(RtValue::Object(Object::string(
        this_object(caller)?.to_string_repr(),
    )))
}

fn object_to_number(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    _params: &[Object],
) -> ScriptResult<RtValue> {
    Ok(RtValue::Number(this_object(caller)?.to_double()))
}

fn object_is_a(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    let type_object = to_type(&param(params, 0))?;
    Ok(RtValue::Bool(this_object(caller)?.is_a(&type_object)))
}

fn object_equals(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    Ok(RtValue::Bool(
        this_object(caller)?.rt_is_equal(&param(params, 0)),
    ))
}

fn object_not_equals(
    runtime: &mut Runtime,
    caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    let this = this_object(caller)?;
    let equal = runtime.objects_equal(&this, &param(params, 0))?;
    Ok(RtValue::Bool(!equal))
}

fn object_identical(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    Ok(RtValue::Bool(
        this_object(caller)?.is_identical(&param(params, 0)),
    ))
}

fn object_not_identical(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    Ok(RtValue::Bool(
        !this_object(caller)?.is_identical(&param(params, 0)),
    ))
}

fn object_get_type(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    _params: &[Object],
) -> ScriptResult<RtValue> {
    Ok(RtValue::Object(Object::Type(this_object(caller)?.get_type())))
}

fn object_get_type_name(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    _params: &[Object],
) -> ScriptResult<RtValue> {
    Ok(RtValue::Object(Object::string(this_object(caller)?.type_name())))
}

fn object_hash(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    _params: &[Object],
) -> ScriptResult<RtValue> {
    Ok(RtValue::Number(this_object(caller)?.hash().value() as f64))
}

fn object_get_attribute(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    let id = to_identifier(&param(params, 0))?;
    let attribute = this_object(caller)?.get_attribute(id)?;
    Ok(RtValue::from(attribute.map(Attribute::into_value)))
}

fn object_get_attribute_properties(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    let id = to_identifier(&param(params, 0))?;
    let properties = this_object(caller)?
        .get_attribute(id)?
        .map_or(0, |attribute| attribute.properties().bits());
    Ok(RtValue::Number(properties as f64))
}

fn object_get_local_attribute(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    let id = to_identifier(&param(params, 0))?;
    let attribute = this_object(caller)?.get_local_attribute(id)?;
    Ok(RtValue::from(attribute.map(Attribute::into_value)))
}

fn object_is_set(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    let id = to_identifier(&param(params, 0))?;
    Ok(RtValue::Bool(this_object(caller)?.get_attribute(id)?.is_some()))
}

fn object_is_set_locally(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    let id = to_identifier(&param(params, 0))?;
    Ok(RtValue::Bool(
        this_object(caller)?.get_local_attribute(id)?.is_some(),
    ))
}

fn object_set_attribute(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    let id = to_identifier(&param(params, 0))?;
    let value = param(params, 1);
    let flags = AttrFlags::from_bits_retain(param(params, 2).to_double() as u8);
    Ok(RtValue::Bool(this_object(caller)?.set_attribute(
        id,
        Attribute::new(value, flags),
    )))
}

fn object_assign_attribute(
    runtime: &mut Runtime,
    caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    use crate::runtime::AssignOutcome;
    let this = this_object(caller)?;
    let id = to_identifier(&param(params, 0))?;
    match runtime.try_assign_attribute(&this, id, param(params, 1), true, false)? {
        AssignOutcome::Assigned => Ok(RtValue::Bool(true)),
        AssignOutcome::NotFound => Ok(RtValue::Bool(false)),
        AssignOutcome::ConstViolation => Err(ScriptError::Message(format!(
            "Cannot assign to const attribute '{}'.",
            id
        ))),
        AssignOutcome::PrivateViolation => Err(ScriptError::Message(format!(
            "Cannot access private attribute '{}' from outside of its owning object.",
            id
        ))),
    }
}

fn object_check_constraint(
    runtime: &mut Runtime,
    caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    let this = this_object(caller)?;
    let value = param(params, 0);
    match &this {
        Object::Type(type_object) => Ok(RtValue::Bool(value.is_a(type_object))),
        _ => Ok(RtValue::Bool(runtime.objects_equal(&this, &value)?)),
    }
}

fn object_bind(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    let binder = FnBinder::new(Some(this_object(caller)?), param(params, 0));
    Ok(RtValue::Object(Object::Binder(Arc::new(binder))))
}

// ---------------------------------------------------------------------------
// Type

fn init_type_type() {
    let type_object = types::type_type();
    set_printable_name(type_object, "Type");
    declare_constructor(type_object, 0, Some(1), type_constructor);
    declare_function(type_object, "getBaseType", 0, Some(0), type_get_base_type);
    declare_function(type_object, "hasBase", 1, Some(1), type_has_base);
    declare_function(type_object, "isBaseOf", 1, Some(1), type_is_base_of);
    declare_function(type_object, "getObjAttributes", 0, Some(0), type_get_obj_attributes);
    declare_function(
        type_object,
        "getTypeAttributes",
        0,
        Some(0),
        type_get_type_attributes,
    );
    declare_function(
        type_object,
        "allowsUserInheritance",
        0,
        Some(0),
        type_allows_user_inheritance,
    );
}

fn type_constructor(
    _runtime: &mut Runtime,
    _caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    let base = match params.first() {
        Some(object) => to_type(object)?,
        None => types::ext_object_type().clone(),
    };
    if !base.allows_user_inheritance() {
        return Err(ScriptError::Message(format!(
            "Base type '{}' does not allow user inheritance.",
            Object::Type(base).to_dbg_string()
        )));
    }
    let new_type = TypeObject::new(Some(base));
    // user-defined types allow user inheritance per default
    new_type.set_flag(TypeFlags::ALLOWS_USER_INHERITANCE, true);
    Ok(RtValue::Object(Object::Type(new_type)))
}

fn type_get_base_type(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    _params: &[Object],
) -> ScriptResult<RtValue> {
    let this = to_type(&this_object(caller)?)?;
    Ok(match this.base_type() {
        Some(base) => RtValue::Object(Object::Type(base.clone())),
        None => RtValue::Void,
    })
}

fn type_has_base(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    let this = to_type(&this_object(caller)?)?;
    let other = to_type(&param(params, 0))?;
    Ok(RtValue::Bool(this.has_base(&other)))
}

fn type_is_base_of(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    let this = to_type(&this_object(caller)?)?;
    let other = to_type(&param(params, 0))?;
    Ok(RtValue::Bool(this.is_base_of(&other)))
}

fn type_get_obj_attributes(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    _params: &[Object],
) -> ScriptResult<RtValue> {
    let this = to_type(&this_object(caller)?)?;
    let map = MapObject::create();
    for (id, value) in this.collect_obj_attributes() {
        map.set_value(Object::string(id.as_str()), value);
    }
    Ok(RtValue::Object(Object::Map(map)))
}

fn type_get_type_attributes(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    _params: &[Object],
) -> ScriptResult<RtValue> {
    let this = to_type(&this_object(caller)?)?;
    let map = MapObject::create();
    for (id, value) in this.collect_type_attributes() {
        map.set_value(Object::string(id.as_str()), value);
    }
    Ok(RtValue::Object(Object::Map(map)))
}

fn type_allows_user_inheritance(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    _params: &[Object],
) -> ScriptResult<RtValue> {
    let this = to_type(&this_object(caller)?)?;
    Ok(RtValue::Bool(this.allows_user_inheritance()))
}

// ---------------------------------------------------------------------------
// ExtObject

fn init_ext_object_type() {
    let type_object = types::ext_object_type();
    set_printable_name(type_object, "ExtObject");
    declare_constructor(type_object, 0, Some(1), ext_object_constructor);
}

fn ext_object_constructor(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    let type_object = match caller {
        Some(Object::Type(type_object)) => type_object.clone(),
        _ => types::ext_object_type().clone(),
    };
    let instance = ExtObject::new(type_object);
    if let Some(Object::Map(initial)) = params.first() {
        for (key, value) in initial.entries() {
            instance.set_attribute(to_identifier(&key)?, Attribute::normal(value));
        }
    }
    Ok(RtValue::Object(Object::Ext(instance)))
}

// ---------------------------------------------------------------------------
// Value types

fn init_value_types() {
    set_printable_name(types::bool_type(), "Bool");
    set_printable_name(types::identifier_type(), "Identifier");

    let number = types::number_type();
    set_printable_name(number, "Number");
    declare_function(number, "+", 1, Some(1), number_add);
    declare_function(number, "-", 1, Some(1), number_sub);
    declare_function(number, "*", 1, Some(1), number_mul);
    declare_function(number, "/", 1, Some(1), number_div);
    declare_function(number, "%", 1, Some(1), number_mod);
    declare_function(number, "<", 1, Some(1), number_less);
    declare_function(number, ">", 1, Some(1), number_greater);
    declare_function(number, "<=", 1, Some(1), number_less_equal);
    declare_function(number, ">=", 1, Some(1), number_greater_equal);

    let string = types::string_type();
    set_printable_name(string, "String");
    declare_function(string, "+", 1, Some(1), string_concat);
    declare_function(string, "length", 0, Some(0), string_length);
}

fn number_add(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    Ok(RtValue::Number(
        this_object(caller)?.to_double() + param(params, 0).to_double(),
    ))
}

fn number_sub(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    Ok(RtValue::Number(
        this_object(caller)?.to_double() - param(params, 0).to_double(),
    ))
}

fn number_mul(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    Ok(RtValue::Number(
        this_object(caller)?.to_double() * param(params, 0).to_double(),
    ))
}

fn number_div(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    Ok(RtValue::Number(
        this_object(caller)?.to_double() / param(params, 0).to_double(),
    ))
}

fn number_mod(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    Ok(RtValue::Number(
        this_object(caller)?.to_double() % param(params, 0).to_double(),
    ))
}

fn number_less(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    Ok(RtValue::Bool(
        this_object(caller)?.to_double() < param(params, 0).to_double(),
    ))
}

fn number_greater(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    Ok(RtValue::Bool(
        this_object(caller)?.to_double() > param(params, 0).to_double(),
    ))
}

fn number_less_equal(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    Ok(RtValue::Bool(
        this_object(caller)?.to_double() <= param(params, 0).to_double(),
    ))
}

fn number_greater_equal(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    Ok(RtValue::Bool(
        this_object(caller)?.to_double() >= param(params, 0).to_double(),
    ))
}

fn string_concat(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    let mut text = this_object(caller)?.to_string_repr();
    text.push_str(&param(params, 0).to_string_repr());
    Ok(RtValue::Object(Object::string(text)))
}

fn string_length(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    _params: &[Object],
) -> ScriptResult<RtValue> {
    Ok(RtValue::Number(
        this_object(caller)?.to_string_repr().chars().count() as f64,
    ))
}

// ---------------------------------------------------------------------------
// Array

fn init_array_type() {
    let type_object = types::array_type();
    set_printable_name(type_object, "Array");
    declare_function(type_object, "pushBack", 1, None, array_push_back);
    declare_function(type_object, "popBack", 0, Some(0), array_pop_back);
    declare_function(type_object, "count", 0, Some(0), array_count);
    declare_function(type_object, "get", 1, Some(1), array_get);
    declare_function(type_object, "set", 2, Some(2), array_set);
    declare_function(type_object, "==", 1, Some(1), array_equals);
    declare_function(type_object, "getIterator", 0, Some(0), array_get_iterator);
}

fn array_push_back(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    let this = this_object(caller)?;
    let array = to_array(&this)?;
    for value in params {
        array.push_back(value.get_ref_or_copy());
    }
    Ok(RtValue::Object(this))
}

fn array_pop_back(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    _params: &[Object],
) -> ScriptResult<RtValue> {
    let array = to_array(&this_object(caller)?)?;
    Ok(RtValue::from(array.pop_back()))
}

fn array_count(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    _params: &[Object],
) -> ScriptResult<RtValue> {
    let array = to_array(&this_object(caller)?)?;
    Ok(RtValue::Number(array.len() as f64))
}

fn array_get(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    let array = to_array(&this_object(caller)?)?;
    let index = param(params, 0).to_double() as usize;
    Ok(RtValue::from(array.get(index)))
}

fn array_set(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    let this = this_object(caller)?;
    let array = to_array(&this)?;
    let index = param(params, 0).to_double() as usize;
    if !array.set(index, param(params, 1).get_ref_or_copy()) {
        return Err(ScriptError::Message(format!(
            "Invalid array index {}.",
            index
        )));
    }
    Ok(RtValue::Object(this))
}

fn array_equals(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    Ok(RtValue::Bool(
        this_object(caller)?.rt_is_equal(&param(params, 0)),
    ))
}

fn array_get_iterator(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    _params: &[Object],
) -> ScriptResult<RtValue> {
    let array = to_array(&this_object(caller)?)?;
    Ok(RtValue::Object(Object::Ref(RefObject::new(
        types::collection_iterator_type().clone(),
        Box::new(CollectionIterator::over_array(&array)),
    ))))
}

// ---------------------------------------------------------------------------
// Map

fn init_map_type() {
    let type_object = types::map_type();
    set_printable_name(type_object, "Map");
    declare_function(type_object, "get", 1, Some(1), map_get);
    declare_function(type_object, "set", 2, Some(2), map_set);
    declare_function(type_object, "count", 0, Some(0), map_count);
    declare_function(type_object, "getIterator", 0, Some(0), map_get_iterator);
}

fn to_map(object: &Object) -> ScriptResult<Arc<MapObject>> {
    match object {
        Object::Map(map) => Ok(map.clone()),
        other => Err(ScriptError::Message(format!(
            "Map expected, got '{}'.",
            other.to_dbg_string()
        ))),
    }
}

fn map_get(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    let map = to_map(&this_object(caller)?)?;
    Ok(RtValue::from(map.get_value(&param(params, 0))))
}

fn map_set(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    let this = this_object(caller)?;
    let map = to_map(&this)?;
    map.set_value(param(params, 0), param(params, 1).get_ref_or_copy());
    Ok(RtValue::Object(this))
}

fn map_count(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    _params: &[Object],
) -> ScriptResult<RtValue> {
    let map = to_map(&this_object(caller)?)?;
    Ok(RtValue::Number(map.len() as f64))
}

fn map_get_iterator(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    _params: &[Object],
) -> ScriptResult<RtValue> {
    let map = to_map(&this_object(caller)?)?;
    Ok(RtValue::Object(Object::Ref(RefObject::new(
        types::collection_iterator_type().clone(),
        Box::new(CollectionIterator::over_map(&map)),
    ))))
}

// ---------------------------------------------------------------------------
// Exception

fn init_exception_type() {
    let type_object = types::exception_type();
    set_printable_name(type_object, "Exception");
    declare_constructor(type_object, 0, Some(1), exception_constructor);
    declare_function(type_object, "getMessage", 0, Some(0), exception_get_message);
    declare_function(type_object, "getLine", 0, Some(0), exception_get_line);
    declare_function(type_object, "getFilename", 0, Some(0), exception_get_filename);
    declare_function(type_object, "getStackInfo", 0, Some(0), exception_get_stack_info);
}

fn to_exception(object: &Object) -> ScriptResult<Arc<ExceptionObject>> {
    match object {
        Object::Exception(exception) => Ok(exception.clone()),
        other => Err(ScriptError::Message(format!(
            "Exception expected, got '{}'.",
            other.to_dbg_string()
        ))),
    }
}

fn exception_constructor(
    runtime: &mut Runtime,
    caller: Option<&Object>,
    params: &[Object],
) -> ScriptResult<RtValue> {
    let type_object = match caller {
        Some(Object::Type(type_object)) => type_object.clone(),
        _ => types::exception_type().clone(),
    };
    let message = params
        .first()
        .map(|value| value.to_string_repr())
        .unwrap_or_default();
    let exception = ExceptionObject::with_type(
        type_object,
        message,
        runtime.get_current_file().unwrap_or_default(),
        runtime.get_current_line(),
    );
    Ok(RtValue::Object(Object::Exception(exception)))
}

fn exception_get_message(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    _params: &[Object],
) -> ScriptResult<RtValue> {
    let exception = to_exception(&this_object(caller)?)?;
    Ok(RtValue::Object(Object::string(exception.message())))
}

fn exception_get_line(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    _params: &[Object],
) -> ScriptResult<RtValue> {
    let exception = to_exception(&this_object(caller)?)?;
    Ok(match exception.line() {
        Some(line) => RtValue::Number(line as f64),
        None => RtValue::Void,
    })
}

fn exception_get_filename(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    _params: &[Object],
) -> ScriptResult<RtValue> {
    let exception = to_exception(&this_object(caller)?)?;
    Ok(RtValue::Object(Object::string(exception.file())))
}

fn exception_get_stack_info(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    _params: &[Object],
) -> ScriptResult<RtValue> {
    let exception = to_exception(&this_object(caller)?)?;
    Ok(match exception.stack_info() {
        Some(info) => RtValue::Object(Object::string(info)),
        None => RtValue::Void,
    })
}

// ---------------------------------------------------------------------------
// Iterators

fn init_iterator_types() {
    let yield_iterator = types::yield_iterator_type();
    set_printable_name(yield_iterator, "YieldIterator");
    declare_function(yield_iterator, "next", 0, Some(0), yield_iterator_next);
    declare_function(yield_iterator, "value", 0, Some(0), yield_iterator_value);
    declare_function(yield_iterator, "end", 0, Some(0), yield_iterator_end);

    let collection_iterator = types::collection_iterator_type();
    set_printable_name(collection_iterator, "Iterator");
    declare_function(collection_iterator, "next", 0, Some(0), collection_iterator_next);
    declare_function(collection_iterator, "value", 0, Some(0), collection_iterator_value);
    declare_function(collection_iterator, "key", 0, Some(0), collection_iterator_key);
    declare_function(collection_iterator, "end", 0, Some(0), collection_iterator_end);
}

fn to_yield_iterator(object: &Object) -> ScriptResult<Arc<crate::objects::YieldIterator>> {
    match object {
        Object::Iterator(iterator) => Ok(iterator.clone()),
        other => Err(ScriptError::Message(format!(
            "YieldIterator expected, got '{}'.",
            other.to_dbg_string()
        ))),
    }
}

fn yield_iterator_next(
    runtime: &mut Runtime,
    caller: Option<&Object>,
    _params: &[Object],
) -> ScriptResult<RtValue> {
    let iterator = to_yield_iterator(&this_object(caller)?)?;
    Ok(RtValue::from(runtime.execute_yield_iterator(&iterator)))
}

fn yield_iterator_value(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    _params: &[Object],
) -> ScriptResult<RtValue> {
    let iterator = to_yield_iterator(&this_object(caller)?)?;
    Ok(RtValue::from(iterator.value()))
}

fn yield_iterator_end(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    _params: &[Object],
) -> ScriptResult<RtValue> {
    let iterator = to_yield_iterator(&this_object(caller)?)?;
    Ok(RtValue::Bool(iterator.end()))
}

fn with_collection_iterator<R>(
    caller: Option<&Object>,
    f: impl FnOnce(&CollectionIterator) -> R,
) -> ScriptResult<R> {
    let this = this_object(caller)?;
    if let Object::Ref(reference) = &this {
        if let Some(iterator) = reference.payload::<CollectionIterator>() {
            return Ok(f(iterator));
        }
    }
    Err(ScriptError::Message(format!(
        "Iterator expected, got '{}'.",
        this.to_dbg_string()
    )))
}

fn collection_iterator_next(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    _params: &[Object],
) -> ScriptResult<RtValue> {
    with_collection_iterator(caller, |iterator| iterator.next())?;
    Ok(RtValue::Void)
}

fn collection_iterator_value(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    _params: &[Object],
) -> ScriptResult<RtValue> {
    Ok(RtValue::from(with_collection_iterator(caller, |iterator| {
        iterator.value()
    })?))
}

fn collection_iterator_key(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    _params: &[Object],
) -> ScriptResult<RtValue> {
    Ok(RtValue::from(with_collection_iterator(caller, |iterator| {
        iterator.key()
    })?))
}

fn collection_iterator_end(
    _runtime: &mut Runtime,
    caller: Option<&Object>,
    _params: &[Object],
) -> ScriptResult<RtValue> {
    Ok(RtValue::Bool(with_collection_iterator(caller, |iterator| {
        iterator.end()
    })?))
}
