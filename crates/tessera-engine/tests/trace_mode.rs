//! Trace Mode Tests
//!
//! Call counting, timing and enter/exit callbacks of the trace wrapper.
//!
//! # Running Tests
//! ```bash
//! cargo test --test trace_mode
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tessera_engine::{
    EngineConfig, FatalPolicy, HostError, HostValue, Runtime, TraceFunction,
};
use tessera_sdk::{AbiError, Constant, Context, ContextOp, ObjectRef};

fn runtime() -> Runtime {
    Runtime::new(EngineConfig {
        fatal_policy: FatalPolicy::Panic,
        ..EngineConfig::default()
    })
}

fn op_name(args: &[ObjectRef]) -> String {
    match args.first().and_then(|a| a.downcast_ref::<HostValue>()) {
        Some(HostValue::Str(s)) => s.clone(),
        _ => String::new(),
    }
}

#[test]
fn test_call_counts_match_calls() {
    let runtime = runtime();
    let ctx = runtime.trace().unwrap();

    let n = 25;
    let handles: Vec<_> = (0..n).map(|i| ctx.long_from_i64(i).unwrap()).collect();
    let mut last_duration = 0;
    for h in &handles {
        assert!(ctx.long_as_i64(*h).is_ok());
        let d = ctx.duration_ns(ContextOp::LongAsI64);
        assert!(d >= last_duration);
        last_duration = d;
    }
    for h in handles {
        ctx.close(h);
    }

    let counts = ctx.call_counts();
    assert_eq!(counts["long_from_i64"], n as u64);
    assert_eq!(counts["long_as_i64"], n as u64);
    assert_eq!(counts["close"], n as u64);
    assert_eq!(counts["add"], 0);
    assert_eq!(counts.len(), ContextOp::COUNT);
    assert_eq!(ctx.durations()["long_as_i64"], last_duration);
}

#[test]
fn test_enter_and_exit_callbacks_see_op_names() {
    let runtime = runtime();
    let ctx = runtime.trace().unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));

    let sink = events.clone();
    let host = runtime.host().clone();
    let on_enter = HostValue::function("on_enter", move |args| {
        sink.lock().push(format!("enter {}", op_name(args)));
        Ok(host.constant(Constant::None))
    });
    let sink = events.clone();
    let host = runtime.host().clone();
    let on_exit = HostValue::function("on_exit", move |args| {
        sink.lock().push(format!("exit {}", op_name(args)));
        Ok(host.constant(Constant::None))
    });

    let enter_h = runtime.universal().from_object(&on_enter).unwrap();
    let exit_h = runtime.universal().from_object(&on_exit).unwrap();
    ctx.set_trace_functions(TraceFunction::Set(enter_h), TraceFunction::Set(exit_h))
        .unwrap();

    let h = ctx.long_from_i64(3).unwrap();
    assert_eq!(
        *events.lock(),
        vec!["enter long_from_i64".to_string(), "exit long_from_i64".to_string()]
    );

    ctx.set_trace_functions(TraceFunction::Clear, TraceFunction::Keep)
        .unwrap();
    ctx.close(h);
    assert_eq!(events.lock().last().map(String::as_str), Some("exit close"));
    assert_eq!(events.lock().len(), 3);

    ctx.set_trace_functions(TraceFunction::Keep, TraceFunction::Clear)
        .unwrap();
    runtime.universal().close(enter_h);
    runtime.universal().close(exit_h);
}

#[test]
fn test_non_callable_rejected_and_nothing_applied() {
    let runtime = runtime();
    let ctx = runtime.trace().unwrap();
    let calls = Arc::new(Mutex::new(0));
    let counter = calls.clone();
    let host = runtime.host().clone();
    let callback = HostValue::function("count", move |_| {
        *counter.lock() += 1;
        Ok(host.constant(Constant::None))
    });
    let good = ctx.from_object(&callback).unwrap();
    let bad = ctx.long_from_i64(1).unwrap();

    let err = ctx
        .set_trace_functions(TraceFunction::Set(good), TraceFunction::Set(bad))
        .unwrap_err();
    assert!(matches!(err, AbiError::Configuration(_)));
    assert_eq!(runtime.universal().err_fetch().unwrap().type_name, "TypeError");

    ctx.close(bad);
    assert_eq!(*calls.lock(), 0);
    ctx.close(good);
}

#[test]
#[should_panic(expected = "fatal error (instrumentation failure)")]
fn test_raising_callback_is_fatal() {
    let runtime = runtime();
    let ctx = runtime.trace().unwrap();
    let raising = HostValue::function("raising", |_| {
        Err(HostError::new(Constant::RuntimeError, "callback failed"))
    });
    let h = ctx.from_object(&raising).unwrap();
    ctx.set_trace_functions(TraceFunction::Set(h), TraceFunction::Keep)
        .unwrap();

    let _ = ctx.long_from_i64(1);
}

#[test]
fn test_trackers_are_traced() {
    let runtime = runtime();
    let ctx = runtime.trace().unwrap();
    let mut tracker = ctx.tracker_new(2).unwrap();
    for i in 0..3 {
        let h = ctx.long_from_i64(i).unwrap();
        ctx.tracker_add(&mut tracker, h).unwrap();
    }
    ctx.tracker_close(tracker);

    assert_eq!(ctx.call_count(ContextOp::TrackerNew), 1);
    assert_eq!(ctx.call_count(ContextOp::TrackerAdd), 3);
    assert_eq!(ctx.call_count(ContextOp::TrackerClose), 1);
    assert_eq!(runtime.universal().open_handles(), 0);
}
