// Interpreter tests
// Scenario coverage over hand-assembled instruction blocks; the compiler is
// a separate component, so the bytecode here is written the way it would
// emit it.

use crate::bytecode::{Instruction, InstructionBlock, INVALID_JUMP_ADDRESS};
use crate::consts::{self, sys_call};
use crate::identifier::StringId;
use crate::logger::MemoryLogger;
use crate::objects::type_object as types;
use crate::objects::{
    AttrFlags, Attribute, ExtObject, Object, TypeObject, UserFunction,
};
use crate::runtime::{ParameterValues, Runtime};
use std::sync::Arc;

const RESULT: u32 = consts::LOCAL_VAR_INDEX_INTERNAL_RESULT;
const THIS: u32 = consts::LOCAL_VAR_INDEX_THIS;

fn id(name: &str) -> StringId {
    StringId::new(name)
}

fn block(build: impl FnOnce(&mut InstructionBlock)) -> InstructionBlock {
    let mut block = InstructionBlock::new().with_filename("test.escript");
    build(&mut block);
    block
}

fn function(param_count: u32, min: u32, build: impl FnOnce(&mut InstructionBlock)) -> Object {
    Object::UserFn(Arc::new(UserFunction::new(block(build), param_count, min)))
}

fn params(values: impl IntoIterator<Item = Object>) -> ParameterValues {
    values.into_iter().collect()
}

fn set_global(runtime: &Runtime, name: &str, value: Object) {
    runtime
        .get_globals()
        .set_attribute(id(name), Attribute::normal(value));
}

fn memory_logger(runtime: &mut Runtime) -> Arc<MemoryLogger> {
    let logger = Arc::new(MemoryLogger::new());
    runtime.set_logger(logger.clone());
    logger
}

fn new_user_type(runtime: &mut Runtime, base: Option<Object>) -> Arc<TypeObject> {
    let created = runtime
        .create_instance(types::type_type().clone(), params(base))
        .expect("Type() must produce a type");
    match created {
        Object::Type(type_object) => type_object,
        other => panic!("expected a Type, got {:?}", other),
    }
}

// --- simple execution ---

#[test]
fn block_result_comes_from_the_internal_result_slot() {
    let mut runtime = Runtime::new();
    let result = runtime.execute_block(block(|b| {
        b.emit(Instruction::PushNumber(42.0));
        b.emit(Instruction::AssignLocal(RESULT));
    }));
    assert_eq!(result.unwrap().to_double(), 42.0);
    assert!(runtime.check_normal_state());
}

#[test]
fn jumps_and_bools_drive_control_flow() {
    let mut runtime = Runtime::new();
    let result = runtime.execute_block(block(|b| {
        b.emit(Instruction::PushBool(false));
        b.emit(Instruction::Not);
        b.emit(Instruction::JmpOnTrue(4));
        b.emit(Instruction::PushNumber(1.0)); // skipped
        b.emit(Instruction::PushNumber(2.0));
        b.emit(Instruction::AssignLocal(RESULT));
    }));
    assert_eq!(result.unwrap().to_double(), 2.0);
}

#[test]
fn calling_a_member_function_through_the_stack() {
    let mut runtime = Runtime::new();
    set_global(
        &runtime,
        "double",
        function(1, 1, |b| {
            let a = b.declare_local(id("a"));
            // return a + a
            b.emit(Instruction::GetLocalVariable(a));
            b.emit(Instruction::Dup);
            b.emit(Instruction::GetAttribute(id("+")));
            b.emit(Instruction::GetLocalVariable(a));
            b.emit(Instruction::Call(1));
            b.emit(Instruction::AssignLocal(RESULT));
        }),
    );
    let result = runtime.execute_block(block(|b| {
        b.emit(Instruction::FindVariable(id("double")));
        b.emit(Instruction::PushNumber(21.0));
        b.emit(Instruction::Call(1));
        b.emit(Instruction::AssignLocal(RESULT));
    }));
    assert_eq!(result.unwrap().to_double(), 42.0);
}

// --- scenario: inheritance and shadowing ---

#[test]
fn type_attributes_are_inherited_and_shadowed() {
    let mut runtime = Runtime::new();
    let a = new_user_type(&mut runtime, None);
    a.set_attribute(id("x"), Attribute::new(Object::number(1.0), AttrFlags::TYPE_ATTR));
    let b = new_user_type(&mut runtime, Some(Object::Type(a.clone())));
    let instance = runtime
        .create_instance(b.clone(), params([]))
        .expect("B() must create an instance");

    let read = |runtime: &mut Runtime, target: &Object| {
        set_global(runtime, "subject", target.clone());
        runtime
            .execute_block(block(|builder| {
                builder.emit(Instruction::GetVariable(id("subject")));
                builder.emit(Instruction::GetAttribute(id("x")));
                builder.emit(Instruction::AssignLocal(RESULT));
            }))
            .expect("attribute read must succeed")
            .to_double()
    };

    assert_eq!(read(&mut runtime, &instance), 1.0);
    b.set_attribute(id("x"), Attribute::new(Object::number(2.0), AttrFlags::TYPE_ATTR));
    assert_eq!(read(&mut runtime, &instance), 2.0);
    // the base type is unaffected
    assert_eq!(
        a.find_type_attribute(id("x")).unwrap().unwrap().value().to_double(),
        1.0
    );
}

// --- scenario: object-attribute initialisation per instance ---

#[test]
fn init_attributes_build_a_fresh_value_per_instance() {
    let mut runtime = Runtime::new();
    let a = new_user_type(&mut runtime, None);
    // A.list @(init) := fn(){ return [1, 2, 3]; };
    let make_list = function(0, 0, |b| {
        b.emit(Instruction::PushNumber(1.0));
        b.emit(Instruction::PushNumber(2.0));
        b.emit(Instruction::PushNumber(3.0));
        b.emit(Instruction::SysCall {
            fn_id: sys_call::CREATE_ARRAY,
            num_params: 3,
        });
        b.emit(Instruction::AssignLocal(RESULT));
    });
    a.set_attribute(id("list"), Attribute::new(make_list, AttrFlags::INIT));

    let first = runtime.create_instance(a.clone(), params([])).unwrap();
    let second = runtime.create_instance(a.clone(), params([])).unwrap();

    let list_of = |instance: &Object| match instance.get_attribute(id("list")).unwrap().unwrap().value() {
        Object::Array(array) => array.clone(),
        other => panic!("expected an array, got {:?}", other),
    };
    list_of(&first).push_back(Object::number(4.0));
    assert_eq!(list_of(&first).len(), 4);
    assert_eq!(list_of(&second).len(), 3);
}

// --- scenario: constructor chaining ---

fn constructor_setting(attribute: &str, value: f64) -> Object {
    function(0, 0, move |b| {
        b.emit(Instruction::InitCaller(0));
        b.emit(Instruction::PushNumber(value));
        b.emit(Instruction::GetLocalVariable(THIS));
        b.emit(Instruction::PushUint(0));
        b.emit(Instruction::SetAttribute(id(attribute)));
    })
}

#[test]
fn constructors_chain_through_the_base_types() {
    let mut runtime = Runtime::new();
    let a = new_user_type(&mut runtime, None);
    a.set_attribute(
        consts::id_constructor(),
        Attribute::new(constructor_setting("x", 1.0), AttrFlags::TYPE_ATTR),
    );
    let b = new_user_type(&mut runtime, Some(Object::Type(a.clone())));
    b.set_attribute(
        consts::id_constructor(),
        Attribute::new(constructor_setting("y", 2.0), AttrFlags::TYPE_ATTR),
    );

    let instance = runtime
        .create_instance(b.clone(), params([]))
        .expect("B() must create an instance");
    assert!(runtime.check_normal_state());
    assert!(instance.is_a(&b));
    assert!(instance.is_a(&a));
    assert_eq!(
        instance.get_attribute(id("x")).unwrap().unwrap().value().to_double(),
        1.0
    );
    assert_eq!(
        instance.get_attribute(id("y")).unwrap().unwrap().value().to_double(),
        2.0
    );
}

// --- scenario: exception handling ---

#[test]
fn exceptions_unwind_to_the_nearest_handler() {
    let mut runtime = Runtime::new();
    set_global(
        &runtime,
        "inner",
        function(0, 0, |b| {
            let boom = b.add_string_constant("boom");
            b.emit(Instruction::PushString(boom));
            b.emit(Instruction::SysCall {
                fn_id: sys_call::THROW,
                num_params: 1,
            });
        }),
    );
    let result = runtime.execute_block(block(|b| {
        b.emit(Instruction::SetExceptionHandler(5));
        b.emit(Instruction::FindVariable(id("inner")));
        b.emit(Instruction::Call(0));
        b.emit(Instruction::Pop);
        b.emit(Instruction::Jmp(6));
        b.emit(Instruction::SetExceptionHandler(INVALID_JUMP_ADDRESS)); // handler
    }));
    // the caught value landed in the internal result slot
    assert_eq!(result.unwrap().to_string_repr(), "boom");
    assert!(runtime.check_normal_state());
    assert!(runtime.fetch_and_clear_exception().is_none());
}

#[test]
fn uncaught_exceptions_reach_the_embedder() {
    let mut runtime = Runtime::new();
    let result = runtime.execute_block(block(|b| {
        let boom = b.add_string_constant("boom");
        b.emit(Instruction::PushString(boom));
        b.emit(Instruction::SysCall {
            fn_id: sys_call::THROW,
            num_params: 1,
        });
    }));
    assert!(result.is_none());
    let pending = runtime.fetch_and_clear_exception().expect("exception pending");
    assert_eq!(pending.to_string_repr(), "boom");
    assert!(runtime.check_normal_state());
}

#[test]
fn const_attributes_reject_assignment() {
    let mut runtime = Runtime::new();
    let subject = Object::Ext(ExtObject::create());
    subject.set_attribute(id("k"), Attribute::new(Object::number(1.0), AttrFlags::CONST));
    set_global(&runtime, "subject", subject);
    let result = runtime.execute_block(block(|b| {
        b.emit(Instruction::PushNumber(9.0));
        b.emit(Instruction::GetVariable(id("subject")));
        b.emit(Instruction::AssignAttribute(id("k")));
    }));
    assert!(result.is_none());
    let pending = runtime.fetch_and_clear_exception().expect("exception pending");
    assert!(pending
        .to_string_repr()
        .contains("Cannot assign to const attribute 'k'"));
}

#[test]
fn private_attributes_are_inaccessible_from_outside() {
    let mut runtime = Runtime::new();
    let subject = Object::Ext(ExtObject::create());
    subject.set_attribute(id("secret"), Attribute::new(Object::number(7.0), AttrFlags::PRIVATE));
    set_global(&runtime, "subject", subject);
    let result = runtime.execute_block(block(|b| {
        b.emit(Instruction::GetVariable(id("subject")));
        b.emit(Instruction::GetAttribute(id("secret")));
        b.emit(Instruction::AssignLocal(RESULT));
    }));
    assert!(result.is_none());
    let pending = runtime.fetch_and_clear_exception().expect("exception pending");
    assert!(pending
        .to_string_repr()
        .contains("Cannot access private attribute 'secret'"));
}

// --- scenario: arity ---

#[test]
fn too_few_parameters_raise_an_exception() {
    let mut runtime = Runtime::new();
    let f = function(2, 2, |b| {
        b.declare_local(id("a"));
        b.declare_local(id("b"));
    });
    let result = runtime.execute_function(f, None, params([Object::number(1.0)]));
    assert!(result.is_none());
    let pending = runtime.fetch_and_clear_exception().expect("exception pending");
    assert!(pending
        .to_string_repr()
        .contains("Too few parameters: Expected 2, got 1."));
}

#[test]
fn too_many_parameters_warn_and_execute() {
    let mut runtime = Runtime::new();
    let logger = memory_logger(&mut runtime);
    let f = function(2, 2, |b| {
        let a = b.declare_local(id("a"));
        b.declare_local(id("b"));
        b.emit(Instruction::GetLocalVariable(a));
        b.emit(Instruction::AssignLocal(RESULT));
    });
    let result = runtime.execute_function(
        f,
        None,
        params([Object::number(1.0), Object::number(2.0), Object::number(3.0)]),
    );
    assert_eq!(result.unwrap().to_double(), 1.0);
    assert!(runtime.check_normal_state());
    assert!(logger
        .warnings()
        .iter()
        .any(|warning| warning.contains("Too many parameters given: Expected 2, got 3.")));
}

#[test]
fn missing_attributes_warn_and_yield_void() {
    let mut runtime = Runtime::new();
    let logger = memory_logger(&mut runtime);
    let result = runtime.execute_block(block(|b| {
        b.emit(Instruction::GetVariable(id("nowhere")));
        b.emit(Instruction::AssignLocal(RESULT));
    }));
    assert!(matches!(result, Some(Object::Void)));
    assert!(logger
        .warnings()
        .iter()
        .any(|warning| warning.contains("Variable not found: 'nowhere'")));
}

// --- scenario: multi parameter ---

fn rest_collector() -> Object {
    let body = block(|b| {
        b.declare_local(id("a"));
        let rest = b.declare_local(id("rest"));
        b.emit(Instruction::GetLocalVariable(rest));
        b.emit(Instruction::AssignLocal(RESULT));
    });
    Object::UserFn(Arc::new(UserFunction::new(body, 2, 1).with_multi_param(1)))
}

#[test]
fn multi_parameter_collects_the_overflow() {
    let mut runtime = Runtime::new();
    let g = rest_collector();
    let result = runtime.execute_function(
        g,
        None,
        params([
            Object::number(1.0),
            Object::number(2.0),
            Object::number(3.0),
            Object::number(4.0),
        ]),
    );
    match result.unwrap() {
        Object::Array(rest) => {
            assert_eq!(rest.len(), 3);
            assert_eq!(rest.get(0).unwrap().to_double(), 2.0);
            assert_eq!(rest.get(2).unwrap().to_double(), 4.0);
        }
        other => panic!("expected an array, got {:?}", other),
    }
}

#[test]
fn multi_parameter_defaults_to_an_empty_array() {
    let mut runtime = Runtime::new();
    let g = rest_collector();
    let result = runtime.execute_function(g, None, params([Object::number(1.0)]));
    match result.unwrap() {
        Object::Array(rest) => assert_eq!(rest.len(), 0),
        other => panic!("expected an array, got {:?}", other),
    }
}

#[test]
fn expanded_parameters_are_spliced_into_the_call() {
    let mut runtime = Runtime::new();
    set_global(&runtime, "g", rest_collector());
    set_global(
        &runtime,
        "values",
        Object::Array(crate::objects::ArrayObject::create([
            Object::number(2.0),
            Object::number(3.0),
        ])),
    );
    // g(1, values...)
    let result = runtime.execute_block(block(|b| {
        b.emit(Instruction::FindVariable(id("g")));
        b.emit(Instruction::PushNumber(1.0));
        b.emit(Instruction::GetVariable(id("values")));
        b.emit(Instruction::PushUint(2)); // original parameter count
        b.emit(Instruction::PushUint(0)); // entries after the expansion
        b.emit(Instruction::SysCall {
            fn_id: sys_call::EXPAND_PARAMS_ON_STACK,
            num_params: 2,
        });
        b.emit(Instruction::Call(consts::DYNAMIC_PARAMETER_COUNT));
        b.emit(Instruction::AssignLocal(RESULT));
    }));
    match result.unwrap() {
        Object::Array(rest) => {
            assert_eq!(rest.len(), 2);
            assert_eq!(rest.get(0).unwrap().to_double(), 2.0);
            assert_eq!(rest.get(1).unwrap().to_double(), 3.0);
        }
        other => panic!("expected an array, got {:?}", other),
    }
}

// --- bound functions ---

#[test]
fn binder_substitutes_this_on_invocation() {
    let mut runtime = Runtime::new();
    let receiver = Object::Ext(ExtObject::create());
    receiver.set_attribute(id("tag"), Attribute::normal(Object::number(5.0)));
    let read_tag = function(0, 0, |b| {
        b.emit(Instruction::GetLocalVariable(THIS));
        b.emit(Instruction::GetAttribute(id("tag")));
        b.emit(Instruction::AssignLocal(RESULT));
    });
    let binder = Object::Binder(Arc::new(crate::objects::FnBinder::new(
        Some(receiver),
        read_tag,
    )));
    let result = runtime.execute_function(binder, None, params([]));
    assert_eq!(result.unwrap().to_double(), 5.0);
}

// --- system calls: collections, case test, exit ---

#[test]
fn array_and_map_literals_build_collections() {
    let mut runtime = Runtime::new();
    let logger = memory_logger(&mut runtime);
    let result = runtime.execute_block(block(|b| {
        let key = b.add_string_constant("k");
        b.emit(Instruction::PushString(key));
        b.emit(Instruction::PushNumber(1.0));
        b.emit(Instruction::PushNumber(2.0)); // odd trailing entry
        b.emit(Instruction::SysCall {
            fn_id: sys_call::CREATE_MAP,
            num_params: 3,
        });
        b.emit(Instruction::AssignLocal(RESULT));
    }));
    match result.unwrap() {
        Object::Map(map) => {
            assert_eq!(map.len(), 1);
            assert_eq!(map.get_value(&Object::string("k")).unwrap().to_double(), 1.0);
        }
        other => panic!("expected a map, got {:?}", other),
    }
    assert!(logger
        .warnings()
        .iter()
        .any(|warning| warning.contains("Map: Last parameter ignored!")));
}

#[test]
fn case_test_consumes_the_decision_only_on_match() {
    let mut runtime = Runtime::new();
    let result = runtime.execute_block(block(|b| {
        b.emit(Instruction::PushNumber(3.0)); // decision value
        b.emit(Instruction::PushNumber(4.0));
        b.emit(Instruction::SysCall {
            fn_id: sys_call::CASE_TEST,
            num_params: 1,
        });
        b.emit(Instruction::Pop); // first probe missed
        b.emit(Instruction::PushNumber(3.0));
        b.emit(Instruction::SysCall {
            fn_id: sys_call::CASE_TEST,
            num_params: 1,
        });
        b.emit(Instruction::AssignLocal(RESULT));
    }));
    assert!(matches!(result, Some(Object::Bool(true))));
    assert!(runtime.check_normal_state());
}

#[test]
fn exit_unwinds_unconditionally() {
    let mut runtime = Runtime::new();
    let result = runtime.execute_block(block(|b| {
        b.emit(Instruction::SetExceptionHandler(5)); // handlers never catch exits
        b.emit(Instruction::PushNumber(7.0));
        b.emit(Instruction::SysCall {
            fn_id: sys_call::EXIT,
            num_params: 1,
        });
        b.emit(Instruction::Pop);
        b.emit(Instruction::PushVoid);
    }));
    assert!(result.is_none());
    assert!(runtime.fetch_and_clear_exception().is_none());
    let exit = runtime.fetch_and_clear_exit_result().expect("exit pending");
    assert_eq!(exit.to_double(), 7.0);
    assert!(runtime.check_normal_state());
}

#[test]
fn iterator_sys_call_walks_an_array() {
    let mut runtime = Runtime::new();
    set_global(
        &runtime,
        "values",
        Object::Array(crate::objects::ArrayObject::create([
            Object::number(5.0),
            Object::number(6.0),
        ])),
    );
    let iterator = runtime
        .execute_block(block(|b| {
            b.emit(Instruction::GetVariable(id("values")));
            b.emit(Instruction::SysCall {
                fn_id: sys_call::GET_ITERATOR,
                num_params: 1,
            });
            b.emit(Instruction::AssignLocal(RESULT));
        }))
        .expect("iterator expected");
    let value = runtime
        .call_member_function(&iterator, id("value"), params([]))
        .unwrap()
        .unwrap();
    assert_eq!(value.to_double(), 5.0);
    runtime.call_member_function(&iterator, id("next"), params([])).unwrap();
    let value = runtime
        .call_member_function(&iterator, id("value"), params([]))
        .unwrap()
        .unwrap();
    assert_eq!(value.to_double(), 6.0);
    runtime.call_member_function(&iterator, id("next"), params([])).unwrap();
    let end = runtime
        .call_member_function(&iterator, id("end"), params([]))
        .unwrap()
        .unwrap();
    assert!(end.to_bool());
}

#[test]
fn array_parameter_constraints_check_every_element() {
    let mut runtime = Runtime::new();
    let a = new_user_type(&mut runtime, None);
    let good = runtime.create_instance(a.clone(), params([])).unwrap();
    set_global(&runtime, "constraint", Object::Type(a.clone()));
    set_global(
        &runtime,
        "goodValues",
        Object::Array(crate::objects::ArrayObject::create([good])),
    );
    set_global(
        &runtime,
        "badValues",
        Object::Array(crate::objects::ArrayObject::create([Object::number(1.0)])),
    );

    let check = |runtime: &mut Runtime, values: &str| {
        let values = id(values);
        runtime.execute_block(block(|b| {
            b.emit(Instruction::GetVariable(id("constraint")));
            b.emit(Instruction::GetVariable(values));
            b.emit(Instruction::SysCall {
                fn_id: sys_call::TEST_ARRAY_PARAMETER_CONSTRAINTS,
                num_params: 2,
            });
            b.emit(Instruction::Pop);
        }))
    };

    check(&mut runtime, "goodValues");
    assert!(runtime.check_normal_state());
    assert!(runtime.fetch_and_clear_exception().is_none());

    let result = check(&mut runtime, "badValues");
    assert!(result.is_none());
    let pending = runtime.fetch_and_clear_exception().expect("exception pending");
    assert!(pending.to_string_repr().contains("Parameter check failed!"));
}

// --- static variables and once blocks ---

#[test]
fn static_slots_persist_across_invocations() {
    let mut runtime = Runtime::new();
    let mut body = InstructionBlock::new();
    body.set_static_var_count(1);
    let a = body.declare_local(id("a"));
    body.emit(Instruction::PushUint(0));
    body.emit(Instruction::SysCall {
        fn_id: sys_call::GET_STATIC_VAR,
        num_params: 0,
    });
    body.emit(Instruction::AssignLocal(a));
    body.emit(Instruction::PushNumber(5.0));
    body.emit(Instruction::PushUint(0));
    body.emit(Instruction::SysCall {
        fn_id: sys_call::SET_STATIC_VAR,
        num_params: 0,
    });
    body.emit(Instruction::Pop);
    body.emit(Instruction::GetLocalVariable(a));
    body.emit(Instruction::AssignLocal(RESULT));
    let f = Object::UserFn(Arc::new(UserFunction::new(body, 0, 0)));

    // first call: the slot is still unset
    let first = runtime.execute_function(f.clone(), None, params([]));
    assert!(first.is_none());
    assert!(runtime.check_normal_state());
    // second call sees the value stored by the first
    let second = runtime.execute_function(f, None, params([]));
    assert_eq!(second.unwrap().to_double(), 5.0);
}

#[test]
fn once_blocks_run_a_single_time() {
    let mut runtime = Runtime::new();
    set_global(
        &runtime,
        "log",
        Object::Array(crate::objects::ArrayObject::empty()),
    );
    let marker = id("$once_0");
    let mut body = InstructionBlock::new();
    body.emit(Instruction::PushId(marker));
    body.emit(Instruction::SysCall {
        fn_id: sys_call::ONCE_ENTER,
        num_params: 0,
    });
    body.emit(Instruction::JmpOnTrue(12));
    body.emit(Instruction::GetVariable(id("log")));
    body.emit(Instruction::Dup);
    body.emit(Instruction::GetAttribute(id("pushBack")));
    body.emit(Instruction::PushNumber(7.0));
    body.emit(Instruction::Call(1));
    body.emit(Instruction::Pop);
    body.emit(Instruction::PushId(marker));
    body.emit(Instruction::SysCall {
        fn_id: sys_call::ONCE_LEAVE,
        num_params: 0,
    });
    body.emit(Instruction::Pop);
    let f = Object::UserFn(Arc::new(UserFunction::new(body, 0, 0)));

    runtime.execute_function(f.clone(), None, params([]));
    runtime.execute_function(f, None, params([]));
    assert!(runtime.check_normal_state());
    let log = runtime.get_global_variable(id("log")).unwrap();
    match log {
        Object::Array(entries) => assert_eq!(entries.len(), 1),
        other => panic!("expected an array, got {:?}", other),
    }
}

// --- yield ---

#[test]
fn yield_suspends_and_resumes_the_frame() {
    let mut runtime = Runtime::new();
    let generator = function(0, 0, |b| {
        b.emit(Instruction::PushNumber(1.0));
        b.emit(Instruction::Yield);
        b.emit(Instruction::PushNumber(2.0));
        b.emit(Instruction::Yield);
        b.emit(Instruction::PushNumber(3.0));
        b.emit(Instruction::AssignLocal(RESULT));
    });
    let iterator = runtime
        .execute_function(generator, None, params([]))
        .expect("yield must produce an iterator");
    let Object::Iterator(iterator) = &iterator else {
        panic!("expected a yield iterator");
    };
    assert_eq!(iterator.value().unwrap().to_double(), 1.0);
    assert!(!iterator.end());

    assert_eq!(
        runtime.execute_yield_iterator(iterator).unwrap().to_double(),
        2.0
    );
    assert!(!iterator.end());

    assert_eq!(
        runtime.execute_yield_iterator(iterator).unwrap().to_double(),
        3.0
    );
    assert!(iterator.end());
}

// --- stack limit ---

#[test]
fn stack_size_limit_raises_instead_of_overflowing() {
    let mut runtime = Runtime::new();
    runtime.set_stack_size_limit(16);
    set_global(
        &runtime,
        "recurse",
        function(0, 0, |b| {
            b.emit(Instruction::FindVariable(id("recurse")));
            b.emit(Instruction::Call(0));
            b.emit(Instruction::Pop);
        }),
    );
    let result = runtime.execute_block(block(|b| {
        b.emit(Instruction::FindVariable(id("recurse")));
        b.emit(Instruction::Call(0));
        b.emit(Instruction::Pop);
    }));
    assert!(result.is_none());
    let pending = runtime.fetch_and_clear_exception().expect("exception pending");
    assert!(pending.to_string_repr().contains("reached its limit"));
}

// --- value round trips ---

#[test]
fn boxed_stack_values_compare_equal_to_their_source() {
    let mut runtime = Runtime::new();
    // push a primitive, box it through the result slot, compare
    let result = runtime
        .execute_block(block(|b| {
            b.emit(Instruction::PushNumber(2.5));
            b.emit(Instruction::AssignLocal(RESULT));
        }))
        .unwrap();
    assert!(result.rt_is_equal(&Object::number(2.5)));
    assert!(result.is_identical(&Object::number(2.5)));
}

#[test]
fn instances_are_released_when_the_last_reference_drops() {
    let mut runtime = Runtime::new();
    let a = new_user_type(&mut runtime, None);
    let instance = runtime.create_instance(a, params([])).unwrap();
    let weak = match &instance {
        Object::Ext(object) => Arc::downgrade(object),
        other => panic!("expected an ExtObject, got {:?}", other),
    };
    drop(instance);
    assert!(weak.upgrade().is_none());
}

// --- forked runtimes ---

#[test]
fn forked_runtimes_share_the_global_namespace() {
    let mut parent = Runtime::new();
    set_global(&parent, "G", Object::number(0.0));
    let mut child = parent.fork();
    assert_eq!(parent.shared_context().active_count(), 2);

    let result = child.execute_block(block(|b| {
        b.emit(Instruction::PushNumber(1.0));
        b.emit(Instruction::AssignVariable(id("G")));
    }));
    assert!(result.is_some() || child.check_normal_state());
    assert_eq!(parent.get_global_variable(id("G")).unwrap().to_double(), 1.0);

    drop(child);
    assert_eq!(parent.shared_context().active_count(), 1);
}

#[cfg(feature = "threading")]
mod threading {
    use super::*;

    #[test]
    fn threading_run_executes_on_a_forked_runtime() {
        let mut runtime = Runtime::new();
        set_global(&runtime, "G", Object::number(0.0));
        let worker = function(0, 0, |b| {
            b.emit(Instruction::PushNumber(1.0));
            b.emit(Instruction::AssignVariable(id("G")));
        });
        let threading = runtime.get_global_variable(id("Threading")).unwrap();
        let run = threading
            .get_attribute(id("run"))
            .unwrap()
            .unwrap()
            .into_value();
        let thread = runtime
            .execute_function(run, None, params([worker]))
            .expect("Threading.run must return a thread");
        runtime
            .call_member_function(&thread, id("join"), params([]))
            .unwrap();
        assert_eq!(runtime.get_global_variable(id("G")).unwrap().to_double(), 1.0);
    }

    #[test]
    fn script_mutexes_lock_and_unlock() {
        let mut runtime = Runtime::new();
        let threading = runtime.get_global_variable(id("Threading")).unwrap();
        let mutex_type = threading
            .get_attribute(id("Mutex"))
            .unwrap()
            .unwrap()
            .into_value();
        let Object::Type(mutex_type) = mutex_type else {
            panic!("expected the Mutex type");
        };
        let mutex = runtime.create_instance(mutex_type, params([])).unwrap();
        let locked = runtime
            .call_member_function(&mutex, id("tryLock"), params([]))
            .unwrap()
            .unwrap();
        assert!(locked.to_bool());
        let relocked = runtime
            .call_member_function(&mutex, id("tryLock"), params([]))
            .unwrap()
            .unwrap();
        assert!(!relocked.to_bool());
        runtime
            .call_member_function(&mutex, id("unlock"), params([]))
            .unwrap();
        let locked = runtime
            .call_member_function(&mutex, id("tryLock"), params([]))
            .unwrap()
            .unwrap();
        assert!(locked.to_bool());
    }
}
