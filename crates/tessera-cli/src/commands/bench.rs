//! `tessera bench`: Run the call microbenchmarks.
//!
//! Each workload is an extension function loaded into the requested mode, so
//! the numbers include the cost of the wrapper layers.

use std::time::{Duration, Instant};

use anyhow::Context as _;
use serde::Serialize;
use tessera_engine::{ExtensionModule, Mode, Runtime};
use tessera_sdk::{AbiResult, Constant, Context, Handle, ObjectRef};

/// Workload names in the order they run
pub const WORKLOADS: [&str; 6] = [
    "noargs",
    "onearg_none",
    "onearg_int",
    "varargs",
    "allocate_int",
    "allocate_list",
];

fn none(ctx: &dyn Context) -> AbiResult<Handle> {
    let none = ctx.constant(Constant::None)?;
    ctx.dup(none)
}

fn noargs(ctx: &dyn Context, _args: &[Handle]) -> AbiResult<Handle> {
    none(ctx)
}

fn onearg(ctx: &dyn Context, args: &[Handle]) -> AbiResult<Handle> {
    let _ = ctx.is_true(args[0])?;
    none(ctx)
}

fn varargs(ctx: &dyn Context, args: &[Handle]) -> AbiResult<Handle> {
    for &arg in args {
        let _ = ctx.type_name(arg)?;
    }
    none(ctx)
}

fn allocate_int(ctx: &dyn Context, _args: &[Handle]) -> AbiResult<Handle> {
    ctx.long_from_i64(2048)
}

fn allocate_list(ctx: &dyn Context, _args: &[Handle]) -> AbiResult<Handle> {
    let list = ctx.list_new()?;
    for value in [1, 2] {
        let appended = ctx.long_from_i64(value).and_then(|item| {
            let result = ctx.list_append(list, item);
            ctx.close(item);
            result
        });
        if let Err(err) = appended {
            ctx.close(list);
            return Err(err);
        }
    }
    Ok(list)
}

/// The benchmark extension module
pub fn module() -> ExtensionModule {
    ExtensionModule::new("microbench", env!("CARGO_PKG_VERSION"))
        .with_function("noargs", noargs)
        .with_function("onearg", onearg)
        .with_function("varargs", varargs)
        .with_function("allocate_int", allocate_int)
        .with_function("allocate_list", allocate_list)
}

#[derive(Debug, Serialize)]
struct WorkloadResult {
    name: &'static str,
    iterations: usize,
    total_ns: u128,
    ns_per_call: f64,
}

#[derive(Debug, Serialize)]
struct BenchReport {
    mode: Mode,
    results: Vec<WorkloadResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace_counts: Option<Vec<(&'static str, u64)>>,
}

/// Function name and arguments for a workload
fn workload_call(runtime: &Runtime, name: &str) -> anyhow::Result<(&'static str, Vec<ObjectRef>)> {
    let host = runtime.host();
    let call = match name {
        "noargs" => ("noargs", vec![]),
        "onearg_none" => ("onearg", vec![host.constant(Constant::None)]),
        "onearg_int" => ("onearg", vec![host.int_from_i64(42)]),
        "varargs" => (
            "varargs",
            vec![
                host.constant(Constant::None),
                host.int_from_i64(1),
                host.str_from("two"),
                host.float_from_f64(3.0),
            ],
        ),
        "allocate_int" => ("allocate_int", vec![]),
        "allocate_list" => ("allocate_list", vec![]),
        other => anyhow::bail!("unknown workload: {}", other),
    };
    Ok(call)
}

pub fn execute(
    mode: &str,
    iterations: usize,
    filter: Option<String>,
    json: bool,
    config: Option<String>,
) -> anyhow::Result<()> {
    let config = super::load_config(config.as_deref())?;
    let mode: Mode = mode.parse()?;
    let runtime = Runtime::new(config);
    let loaded = runtime
        .load(module(), mode)
        .with_context(|| format!("failed to load benchmark module in {} mode", mode))?;

    let selected: Vec<&'static str> = WORKLOADS
        .iter()
        .copied()
        .filter(|name| filter.as_deref().map_or(true, |f| name.contains(f)))
        .collect();
    if selected.is_empty() {
        anyhow::bail!("no workloads match the filter");
    }

    if !json {
        println!(
            "Running {} workload(s) in {} mode, {} iterations each",
            selected.len(),
            mode,
            iterations
        );
        println!();
    }

    let mut results = Vec::with_capacity(selected.len());
    for name in selected {
        let (func, args) = workload_call(&runtime, name)?;
        let start = Instant::now();
        for _ in 0..iterations {
            loaded
                .call(func, &args)
                .with_context(|| format!("workload {} failed", name))?;
        }
        let elapsed = start.elapsed();
        log::debug!("workload {} finished in {:?}", name, elapsed);

        let result = WorkloadResult {
            name,
            iterations,
            total_ns: elapsed.as_nanos(),
            ns_per_call: per_call(elapsed, iterations),
        };
        if !json {
            println!(
                "  {:<14} {:>12.1} ns/call  ({:.3} s total)",
                result.name,
                result.ns_per_call,
                elapsed.as_secs_f64()
            );
        }
        results.push(result);
    }

    let trace_counts = if mode == Mode::Trace {
        let mut counts: Vec<_> = runtime
            .trace()?
            .call_counts()
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        Some(counts)
    } else {
        None
    };

    if json {
        let report = BenchReport {
            mode,
            results,
            trace_counts,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if let Some(counts) = trace_counts {
        println!();
        println!("Trace counters:");
        for (op, count) in counts {
            println!("  {:<22} {}", op, count);
        }
    }
    Ok(())
}

fn per_call(elapsed: Duration, iterations: usize) -> f64 {
    if iterations == 0 {
        return 0.0;
    }
    elapsed.as_nanos() as f64 / iterations as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_engine::{EngineConfig, FatalPolicy};

    fn runtime() -> Runtime {
        Runtime::new(EngineConfig {
            fatal_policy: FatalPolicy::Panic,
            ..EngineConfig::default()
        })
    }

    #[test]
    fn test_every_workload_runs_in_every_mode() {
        let runtime = runtime();
        for mode in Mode::ALL {
            let loaded = runtime.load(module(), mode).unwrap();
            for name in WORKLOADS {
                let (func, args) = workload_call(&runtime, name).unwrap();
                loaded.call(func, &args).unwrap();
            }
        }
        assert_eq!(runtime.debug().unwrap().open_count(), 0);
    }

    #[test]
    fn test_allocate_list_result() {
        let runtime = runtime();
        let loaded = runtime.load(module(), Mode::Debug).unwrap();
        let list = loaded.call("allocate_list", &[]).unwrap();
        assert_eq!(runtime.host().repr(&list).unwrap(), "[1, 2]");
    }

    #[test]
    fn test_unknown_workload() {
        let runtime = runtime();
        assert!(workload_call(&runtime, "tuple").is_err());
    }

    #[test]
    fn test_per_call_handles_zero_iterations() {
        assert_eq!(per_call(Duration::from_millis(5), 0), 0.0);
        assert_eq!(per_call(Duration::from_nanos(100), 4), 25.0);
    }
}
