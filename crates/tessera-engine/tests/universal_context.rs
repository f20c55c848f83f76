//! Universal Context Tests
//!
//! Handle lifecycle through the base context: growth, reuse, null handling,
//! error state and lists.
//!
//! # Running Tests
//! ```bash
//! cargo test --test universal_context
//! ```

use std::sync::Arc;

use tessera_engine::{EngineConfig, FatalPolicy, HostValue, Runtime, SimpleHost, UniversalContext};
use tessera_sdk::{AbiError, Constant, Context, Handle, ObjectRef};

fn context(growth: usize) -> UniversalContext {
    let config = EngineConfig {
        handle_growth_constant: growth,
        check_handles: false,
        fatal_policy: FatalPolicy::Panic,
        ..EngineConfig::default()
    };
    UniversalContext::new(Arc::new(SimpleHost::new()), &config)
}

// ===== Table Growth =====

#[test]
fn test_forty_handles_survive_growth() {
    let ctx = context(32);
    let handles: Vec<Handle> = (0..40).map(|i| ctx.long_from_i64(i).unwrap()).collect();

    assert!(ctx.grow_events() >= 1);
    for (i, h) in handles.iter().enumerate() {
        assert_eq!(ctx.long_as_i64(*h).unwrap(), i as i64);
    }
    for h in handles {
        ctx.close(h);
    }
    assert_eq!(ctx.open_handles(), 0);
}

#[test]
fn test_objects_identical_across_growth() {
    let ctx = context(2);
    let obj = ObjectRef::new(HostValue::Str("kept".to_string()));
    let h = ctx.from_object(&obj).unwrap();
    let before = ctx.as_object(h).unwrap().unwrap();

    let extra: Vec<_> = (0..100).map(|i| ctx.long_from_i64(i).unwrap()).collect();
    assert!(ctx.grow_events() > 3);

    let after = ctx.as_object(h).unwrap().unwrap();
    assert!(ObjectRef::ptr_eq(&before, &after));
    assert!(ObjectRef::ptr_eq(&obj, &after));
    for h in extra {
        ctx.close(h);
    }
    ctx.close(h);
}

#[test]
fn test_stored_object_downcasts_to_host_value() {
    let ctx = context(8);
    let h = ctx.long_from_i64(17).unwrap();
    let obj = ctx.as_object(h).unwrap().unwrap();
    assert!(matches!(obj.downcast_ref::<HostValue>(), Some(HostValue::Int(17))));

    let copy = obj.clone();
    assert!(matches!(copy.downcast_ref::<HostValue>(), Some(HostValue::Int(17))));
    ctx.close(h);
}

// ===== Reference Ownership =====

#[test]
fn test_table_holds_one_reference_per_handle() {
    let ctx = context(8);
    let obj = ObjectRef::new(HostValue::Int(5));
    let a = ctx.from_object(&obj).unwrap();
    let b = ctx.dup(a).unwrap();
    assert_ne!(a, b);
    assert_eq!(obj.ref_count(), 3);

    ctx.close(a);
    assert_eq!(ctx.long_as_i64(b).unwrap(), 5);
    ctx.close(b);
    assert_eq!(obj.ref_count(), 1);
}

#[test]
fn test_closed_handle_reports_invalid() {
    let ctx = context(8);
    let h = ctx.long_from_i64(1).unwrap();
    ctx.close(h);
    assert_eq!(ctx.long_as_i64(h), Err(AbiError::InvalidHandle(h)));
    assert_eq!(ctx.dup(h), Err(AbiError::InvalidHandle(h)));
}

#[test]
fn test_null_handles_consume_nothing() {
    let ctx = context(8);
    ctx.close(Handle::NULL);
    assert_eq!(ctx.dup(Handle::NULL).unwrap(), Handle::NULL);
    assert!(ctx.as_object(Handle::NULL).unwrap().is_none());
    assert_eq!(ctx.capacity(), 0);
    assert_eq!(ctx.open_handles(), 0);
}

// ===== Object Protocol =====

#[test]
fn test_lists() {
    let ctx = context(8);
    let list = ctx.list_new().unwrap();
    for i in 0..3 {
        let item = ctx.long_from_i64(i * 10).unwrap();
        ctx.list_append(list, item).unwrap();
        ctx.close(item);
    }
    assert_eq!(ctx.length(list).unwrap(), 3);
    let second = ctx.get_item(list, 1).unwrap();
    assert_eq!(ctx.long_as_i64(second).unwrap(), 10);

    let repr = ctx.repr(list).unwrap();
    assert_eq!(ctx.unicode_as_string(repr).unwrap(), "[0, 10, 20]");

    assert!(ctx.get_item(list, 3).is_err());
    assert_eq!(ctx.err_fetch().unwrap().type_name, "IndexError");

    for h in [list, second, repr] {
        ctx.close(h);
    }
}

#[test]
fn test_is_and_constants() {
    let ctx = context(8);
    let none = ctx.constant(Constant::None).unwrap();
    let also_none = ctx.dup(none).unwrap();
    assert!(ctx.is(none, also_none).unwrap());
    assert!(!ctx.is_true(none).unwrap());
    assert_eq!(ctx.type_name(none).unwrap(), "NoneType");
    ctx.close(also_none);

    let t = ctx.constant(Constant::True).unwrap();
    assert!(ctx.is_true(t).unwrap());
}

#[test]
fn test_call_host_function() {
    let ctx = context(8);
    let double = HostValue::function("double", |args| match args[0].downcast_ref::<HostValue>() {
        Some(HostValue::Int(i)) => Ok(ObjectRef::new(HostValue::Int(i * 2))),
        _ => Err(tessera_engine::HostError::type_error("expected int")),
    });
    let f = ctx.from_object(&double).unwrap();
    assert!(ctx.callable_check(f).unwrap());

    let arg = ctx.long_from_i64(21).unwrap();
    let result = ctx.call(f, &[arg]).unwrap();
    assert_eq!(ctx.long_as_i64(result).unwrap(), 42);

    let s = ctx.unicode_from_str("x").unwrap();
    assert!(ctx.call(f, &[s]).is_err());
    let type_error = ctx.constant(Constant::TypeError).unwrap();
    assert!(ctx.err_exception_matches(type_error).unwrap());
    ctx.err_clear();
    assert!(!ctx.err_occurred());

    for h in [f, arg, result, s] {
        ctx.close(h);
    }
}

#[test]
fn test_floats() {
    let ctx = context(8);
    let a = ctx.float_from_f64(1.5).unwrap();
    let b = ctx.long_from_i64(2).unwrap();
    let c = ctx.add(a, b).unwrap();
    assert_eq!(ctx.float_as_f64(c).unwrap(), 3.5);
    assert_eq!(ctx.type_name(c).unwrap(), "float");
    for h in [a, b, c] {
        ctx.close(h);
    }
}

#[test]
fn test_runtime_universal_is_shared() {
    let runtime = Runtime::default();
    let ctx = runtime.universal().clone();
    let h = ctx.long_from_i64(7).unwrap();
    assert_eq!(runtime.universal().open_handles(), 1);
    ctx.close(h);
}
