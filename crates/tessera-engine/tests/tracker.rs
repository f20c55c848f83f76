//! Tracker Tests
//!
//! Batch release through each context kind.
//!
//! # Running Tests
//! ```bash
//! cargo test --test tracker
//! ```

use tessera_engine::{EngineConfig, FatalPolicy, Mode, Runtime};
use tessera_sdk::{AbiError, Context, Tracker, OUT_OF_MEMORY};

fn no_memory() -> AbiError {
    AbiError::raised("MemoryError", OUT_OF_MEMORY)
}

fn runtime() -> Runtime {
    Runtime::new(EngineConfig {
        fatal_policy: FatalPolicy::Panic,
        closed_handles_queue_max_size: 64,
        ..EngineConfig::default()
    })
}

#[test]
fn test_tracker_close_releases_everything() {
    let runtime = runtime();
    for mode in Mode::ALL {
        let ctx = runtime.context(mode).unwrap();
        let mut tracker = ctx.tracker_new(0).unwrap();
        for i in 0..20 {
            let h = ctx.long_from_i64(i).unwrap();
            ctx.tracker_add(&mut tracker, h).unwrap();
        }
        assert_eq!(tracker.len(), 20);
        ctx.tracker_close(tracker);
    }
    assert_eq!(runtime.universal().open_handles(), 0);
}

#[test]
fn test_debug_closes_in_insertion_order() {
    let runtime = runtime();
    let debug = runtime.debug().unwrap();
    let mut tracker = debug.tracker_new(2).unwrap();
    let handles: Vec<_> = (0..5).map(|i| debug.long_from_i64(i).unwrap()).collect();
    for h in &handles {
        debug.tracker_add(&mut tracker, *h).unwrap();
    }
    debug.tracker_close(tracker);

    let closed: Vec<_> = debug.closed_handles(0).iter().map(|info| info.id).collect();
    assert_eq!(closed, handles);
}

#[test]
fn test_remove_all_keeps_handles_open() {
    let runtime = runtime();
    let ctx = runtime.context(Mode::Universal).unwrap();
    let mut tracker = ctx.tracker_new(4).unwrap();
    let h = ctx.long_from_i64(9).unwrap();
    ctx.tracker_add(&mut tracker, h).unwrap();
    ctx.tracker_remove_all(&mut tracker);
    ctx.tracker_close(tracker);

    assert_eq!(ctx.long_as_i64(h).unwrap(), 9);
    ctx.close(h);
}

#[test]
fn test_failed_growth_still_frees_stored_handle() {
    let runtime = runtime();
    let ctx = runtime.universal().clone();
    let mut tracker = Tracker::with_limit(1, 2).unwrap();
    let a = ctx.long_from_i64(1).unwrap();
    let b = ctx.long_from_i64(2).unwrap();
    let c = ctx.long_from_i64(3).unwrap();

    ctx.tracker_add(&mut tracker, a).unwrap();
    // `b` takes the spare slot, then the growth fails
    assert_eq!(ctx.tracker_add(&mut tracker, b), Err(no_memory()));
    assert_eq!(tracker.handles(), &[a, b]);
    assert_eq!(ctx.err_fetch().unwrap().type_name, "MemoryError");
    // nothing left to store `c` in
    assert_eq!(ctx.tracker_add(&mut tracker, c), Err(no_memory()));
    assert!(ctx.err_occurred());
    ctx.err_clear();
    assert_eq!(tracker.len(), 2);

    ctx.tracker_close(tracker);
    assert_eq!(ctx.open_handles(), 1);
    ctx.close(c);
    assert_eq!(ctx.open_handles(), 0);
}

#[test]
fn test_failed_growth_raises_in_every_mode() {
    let runtime = runtime();
    for mode in Mode::ALL {
        let ctx = runtime.context(mode).unwrap();
        let mut tracker = Tracker::with_limit(0, 1).unwrap();
        let h = ctx.long_from_i64(1).unwrap();
        assert_eq!(ctx.tracker_add(&mut tracker, h), Err(no_memory()));
        assert!(ctx.err_occurred());
        ctx.err_clear();
        ctx.tracker_close(tracker);
    }
    assert_eq!(runtime.debug().unwrap().open_count(), 0);
}
