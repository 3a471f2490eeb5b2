// System calls
// Numbered built-in operations invoked by the SysCall instruction. The ids
// are ABI between compiler and runtime; the table order must match the
// constants in `consts::sys_call`.

use crate::consts::{self, sys_call};
use crate::error::{ScriptError, ScriptResult};
use crate::objects::{
    ArrayObject, Attribute, CollectionIterator, MapObject, Object, RefObject,
};
use crate::objects::type_object::collection_iterator_type;

use super::{ParameterValues, RtValue, Runtime};

type SysCallFn = fn(&mut Runtime, ParameterValues) -> ScriptResult<RtValue>;

static SYS_FUNCTIONS: [SysCallFn; sys_call::NUM_SYS_CALLS] = [
    sys_create_array,                     // CREATE_ARRAY
    sys_create_map,                       // CREATE_MAP
    sys_throw_type_exception,             // THROW_TYPE_EXCEPTION
    sys_throw,                            // THROW
    sys_exit,                             // EXIT
    sys_get_iterator,                     // GET_ITERATOR
    sys_test_array_parameter_constraints, // TEST_ARRAY_PARAMETER_CONSTRAINTS
    sys_expand_params_on_stack,           // EXPAND_PARAMS_ON_STACK
    sys_case_test,                        // CASE_TEST
    sys_once_enter,                       // ONCE_ENTER
    sys_once_leave,                       // ONCE_LEAVE
    sys_get_static_var,                   // GET_STATIC_VAR
    sys_set_static_var,                   // SET_STATIC_VAR
];

impl Runtime {
    pub(crate) fn sys_call(
        &mut self,
        fn_id: u32,
        params: ParameterValues,
    ) -> ScriptResult<RtValue> {
        match SYS_FUNCTIONS.get(fn_id as usize) {
            Some(function) => function(self, params),
            None => {
                self.set_exception(format!("(internal) Unknown system call #{}.", fn_id));
                Ok(RtValue::Undefined)
            }
        }
    }
}

fn sys_create_array(_runtime: &mut Runtime, params: ParameterValues) -> ScriptResult<RtValue> {
    Ok(RtValue::Object(Object::Array(ArrayObject::create(params))))
}

fn sys_create_map(runtime: &mut Runtime, params: ParameterValues) -> ScriptResult<RtValue> {
    if params.len() % 2 == 1 {
        runtime.warn("Map: Last parameter ignored!");
    }
    let map = MapObject::create();
    for pair in params.chunks_exact(2) {
        map.set_value(pair[0].clone(), pair[1].clone());
    }
    Ok(RtValue::Object(Object::Map(map)))
}

fn sys_throw_type_exception(
    runtime: &mut Runtime,
    params: ParameterValues,
) -> ScriptResult<RtValue> {
    if params.len() < 2 {
        runtime.set_exception(format!(
            "Too few parameters: Expected 2, got {}.",
            params.len()
        ));
        return Ok(RtValue::Undefined);
    }
    let value = &params[params.len() - 1];
    let constraints: Vec<String> = params[..params.len() - 1]
        .iter()
        .map(|constraint| constraint.to_dbg_string())
        .collect();
    runtime.set_exception(format!(
        "Parameter check failed!\nValue: {}\nConstraints: {}",
        value.to_dbg_string(),
        constraints.join(" || ")
    ));
    Ok(RtValue::Undefined)
}

fn sys_throw(runtime: &mut Runtime, params: ParameterValues) -> ScriptResult<RtValue> {
    let value = params.first().cloned().unwrap_or(Object::Void);
    runtime.set_exception_value(value);
    Ok(RtValue::Undefined)
}

fn sys_exit(runtime: &mut Runtime, params: ParameterValues) -> ScriptResult<RtValue> {
    let value = params.first().cloned().unwrap_or(Object::Void);
    runtime.set_exit_state(value);
    Ok(RtValue::Undefined)
}

fn sys_get_iterator(runtime: &mut Runtime, params: ParameterValues) -> ScriptResult<RtValue> {
    let subject = params.first().cloned().unwrap_or(Object::Void);
    let iterator = match &subject {
        Object::Array(array) => Some(Object::Ref(RefObject::new(
            collection_iterator_type().clone(),
            Box::new(CollectionIterator::over_array(array)),
        ))),
        Object::Map(map) => Some(Object::Ref(RefObject::new(
            collection_iterator_type().clone(),
            Box::new(CollectionIterator::over_map(map)),
        ))),
        Object::Iterator(_) => Some(subject.clone()),
        _ => runtime.call_member_function(
            &subject,
            consts::id_get_iterator(),
            ParameterValues::new(),
        )?,
    };
    match iterator {
        Some(iterator) => Ok(RtValue::Object(iterator)),
        None => {
            runtime.set_exception(format!(
                "Could not get iterator from '{}'",
                subject.to_dbg_string()
            ));
            Ok(RtValue::Undefined)
        }
    }
}

fn sys_test_array_parameter_constraints(
    runtime: &mut Runtime,
    params: ParameterValues,
) -> ScriptResult<RtValue> {
    if params.len() < 2 {
        runtime.set_exception(format!(
            "Too few parameters: Expected 2, got {}.",
            params.len()
        ));
        return Ok(RtValue::Undefined);
    }
    let constraint_end = params.len() - 1;
    let Object::Array(values) = &params[constraint_end] else {
        runtime.set_exception(format!(
            "Array expected, got '{}'.",
            params[constraint_end].to_dbg_string()
        ));
        return Ok(RtValue::Undefined);
    };
    for value in values.to_vec() {
        let mut success = false;
        for constraint in &params[..constraint_end] {
            let mut check_params = ParameterValues::new();
            check_params.push(value.clone());
            let result = runtime.call_member_function(
                constraint,
                consts::id_check_constraint(),
                check_params,
            )?;
            if result.map_or(false, |object| object.to_bool()) {
                success = true;
                break;
            }
        }
        if !success {
            let constraints: Vec<String> = params[..constraint_end]
                .iter()
                .map(|constraint| constraint.to_dbg_string())
                .collect();
            runtime.set_exception(format!(
                "Parameter check failed!\nValue: {}\nConstraints: {}",
                value.to_dbg_string(),
                constraints.join(" || ")
            ));
            return Ok(RtValue::Undefined);
        }
    }
    Ok(RtValue::Void)
}

/// Splices expanding array arguments into the caller's value stack in
/// place; the new total argument count is returned to the dynamic-count
/// slot of the pending call.
fn sys_expand_params_on_stack(
    runtime: &mut Runtime,
    params: ParameterValues,
) -> ScriptResult<RtValue> {
    if params.is_empty() {
        runtime.set_exception("Too few parameters: Expected 1, got 0.");
        return Ok(RtValue::Undefined);
    }
    let mut num_params = params[0].to_double() as u32;
    let mut storage: Vec<RtValue> = Vec::new();
    // params[i > 0] hold the number of stack entries between expanding
    // parameters, innermost last
    for skip in params.iter().skip(1).rev() {
        let frame = runtime.frame();
        for _ in 0..(skip.to_double() as u32) {
            storage.push(frame.stack_pop()?);
        }
        let expanding = frame.stack_pop_object()?;
        let Some(Object::Array(array)) = expanding else {
            runtime.set_exception("Array expected for parameter expansion.");
            return Ok(RtValue::Undefined);
        };
        num_params += array.len() as u32;
        num_params -= 1; // the extracted array itself is no parameter
        for value in array.to_vec().into_iter().rev() {
            storage.push(RtValue::from(value));
        }
    }
    let frame = runtime.frame();
    while let Some(value) = storage.pop() {
        frame.stack_push(value);
    }
    Ok(RtValue::UInt32(num_params))
}

/// Compares the parameter against the topmost stack entry; consumes the
/// entry on a match.
fn sys_case_test(runtime: &mut Runtime, params: ParameterValues) -> ScriptResult<RtValue> {
    let Some(probe) = params.first().cloned() else {
        runtime.set_exception("Too few parameters: Expected 1, got 0.");
        return Ok(RtValue::Undefined);
    };
    let decision = runtime
        .frame()
        .stack_pop_object()?
        .unwrap_or(Object::Void);
    if runtime.objects_equal(&probe, &decision)? {
        Ok(RtValue::Bool(true))
    } else {
        runtime.frame().stack_push_object(decision);
        Ok(RtValue::Bool(false))
    }
}

/// First entry into a `@(once)` block returns false; later entries wait for
/// the block to complete and return true.
fn sys_once_enter(runtime: &mut Runtime, _params: ParameterValues) -> ScriptResult<RtValue> {
    let marker = runtime.frame().stack_pop_identifier()?;
    let function = runtime.frame().user_function().clone();
    {
        let mut attributes = function.attributes().lock();
        if attributes.access(marker).is_none() {
            attributes.set(marker, Attribute::normal(Object::Bool(false)));
            return Ok(RtValue::Bool(false));
        }
    }
    loop {
        let completed = function
            .attributes()
            .lock()
            .access(marker)
            .map_or(false, |attribute| attribute.value().to_bool());
        if completed {
            return Ok(RtValue::Bool(true));
        }
        std::thread::yield_now();
    }
}

fn sys_once_leave(runtime: &mut Runtime, _params: ParameterValues) -> ScriptResult<RtValue> {
    let marker = runtime.frame().stack_pop_identifier()?;
    let function = runtime.frame().user_function().clone();
    let mut attributes = function.attributes().lock();
    match attributes.access_mut(marker) {
        Some(attribute) => {
            attribute.set_value(Object::Bool(true));
            Ok(RtValue::Void)
        }
        None => Err(ScriptError::from("(internal) Once marker not found.")),
    }
}

fn sys_get_static_var(runtime: &mut Runtime, _params: ParameterValues) -> ScriptResult<RtValue> {
    let frame = runtime.frame();
    let index = frame.stack_pop_u32()?;
    let value = frame.get_static_var(index)?;
    Ok(RtValue::from(value))
}

fn sys_set_static_var(runtime: &mut Runtime, _params: ParameterValues) -> ScriptResult<RtValue> {
    let frame = runtime.frame();
    let index = frame.stack_pop_u32()?;
    let value = frame
        .stack_pop_object()?
        .map(|object| object.get_ref_or_copy());
    frame.set_static_var(index, value)?;
    Ok(RtValue::Void)
}
