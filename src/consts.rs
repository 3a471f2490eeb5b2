// Constants shared between the (external) compiler and this runtime.
// System-call ids and local-slot indices are ABI: once assigned, the numeric
// values must not change across compiler/runtime pairs.

use crate::identifier::StringId;
use std::sync::OnceLock;

/// Local slot holding the `this` object.
pub const LOCAL_VAR_INDEX_THIS: u32 = 0;
/// Local slot holding the currently executing function.
pub const LOCAL_VAR_INDEX_THIS_FN: u32 = 1;
/// Local slot holding the internal result / caught exception.
pub const LOCAL_VAR_INDEX_INTERNAL_RESULT: u32 = 2;
/// First local slot used for parameters.
pub const LOCAL_VAR_INDEX_FIRST_PARAMETER: u32 = 3;

/// Sentinel parameter count meaning "pop the real count from the stack".
pub const DYNAMIC_PARAMETER_COUNT: u32 = u32::MAX;

pub mod sys_call {
    pub const CREATE_ARRAY: u32 = 0;
    pub const CREATE_MAP: u32 = 1;
    pub const THROW_TYPE_EXCEPTION: u32 = 2;
    pub const THROW: u32 = 3;
    pub const EXIT: u32 = 4;
    pub const GET_ITERATOR: u32 = 5;
    pub const TEST_ARRAY_PARAMETER_CONSTRAINTS: u32 = 6;
    pub const EXPAND_PARAMS_ON_STACK: u32 = 7;
    pub const CASE_TEST: u32 = 8;
    pub const ONCE_ENTER: u32 = 9;
    pub const ONCE_LEAVE: u32 = 10;
    pub const GET_STATIC_VAR: u32 = 11;
    pub const SET_STATIC_VAR: u32 = 12;

    pub const NUM_SYS_CALLS: usize = 13;
}

/// `_constructor`: constructor attribute looked up during instance creation.
pub fn id_constructor() -> StringId {
    static ID: OnceLock<StringId> = OnceLock::new();
    *ID.get_or_init(|| StringId::new("_constructor"))
}

/// `_call`: fallback member making arbitrary objects callable.
pub fn id_call() -> StringId {
    static ID: OnceLock<StringId> = OnceLock::new();
    *ID.get_or_init(|| StringId::new("_call"))
}

/// `_printableName`: optional attribute used by the default to-string.
pub fn id_printable_name() -> StringId {
    static ID: OnceLock<StringId> = OnceLock::new();
    *ID.get_or_init(|| StringId::new("_printableName"))
}

/// `getIterator`: member consulted by the GET_ITERATOR system call.
pub fn id_get_iterator() -> StringId {
    static ID: OnceLock<StringId> = OnceLock::new();
    *ID.get_or_init(|| StringId::new("getIterator"))
}

/// `_checkConstraint`: member consulted by parameter-constraint checks.
pub fn id_check_constraint() -> StringId {
    static ID: OnceLock<StringId> = OnceLock::new();
    *ID.get_or_init(|| StringId::new("_checkConstraint"))
}

/// `==`: equality member used by `is_equal` and CASE_TEST.
pub fn id_equal_op() -> StringId {
    static ID: OnceLock<StringId> = OnceLock::new();
    *ID.get_or_init(|| StringId::new("=="))
}

/// `this` / `thisFn` / `___result`: names of the three reserved local slots.
pub fn reserved_local_names() -> [StringId; 3] {
    static IDS: OnceLock<[StringId; 3]> = OnceLock::new();
    *IDS.get_or_init(|| {
        [
            StringId::new("this"),
            StringId::new("thisFn"),
            StringId::new("___result"),
        ]
    })
}
