//! `tessera info`: Display ABI version and engine configuration.

use tessera_engine::config::{
    ENV_CLOSED_HANDLES_QUEUE_MAX_SIZE, ENV_HANDLE_GROWTH_CONSTANT, ENV_MODE,
};
use tessera_engine::Mode;
use tessera_sdk::{ContextOp, ABI_VERSION};

pub fn execute(config: Option<String>) -> anyhow::Result<()> {
    let resolved = super::load_config(config.as_deref())?;

    println!("Tessera v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("ABI version:  {}", ABI_VERSION);
    println!("Platform:     {} ({})", std::env::consts::OS, std::env::consts::ARCH);
    println!("Operations:   {}", ContextOp::COUNT);

    let modes: Vec<&str> = Mode::ALL.iter().map(|m| m.as_str()).collect();
    println!("Modes:        {}", modes.join(", "));
    if let Some(ref path) = config {
        println!("Config file:  {}", path);
    }

    println!();
    println!("Configuration:");
    for line in toml::to_string_pretty(&resolved)?.lines() {
        println!("  {}", line);
    }

    println!();
    println!("Environment:");
    print_env(&format!("  {}", ENV_MODE), ENV_MODE);
    print_env(
        &format!("  {}", ENV_CLOSED_HANDLES_QUEUE_MAX_SIZE),
        ENV_CLOSED_HANDLES_QUEUE_MAX_SIZE,
    );
    print_env(&format!("  {}", ENV_HANDLE_GROWTH_CONSTANT), ENV_HANDLE_GROWTH_CONSTANT);
    print_env("  RUST_LOG", "RUST_LOG");

    Ok(())
}

fn print_env(label: &str, var: &str) {
    match std::env::var(var) {
        Ok(val) => println!("{} = {}", label, val),
        Err(_) => println!("{} = (default)", label),
    }
}
