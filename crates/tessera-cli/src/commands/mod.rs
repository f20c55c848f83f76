//! CLI command implementations.

pub mod bench;
pub mod info;

use std::path::Path;

use tessera_engine::EngineConfig;

/// Resolve the engine configuration from an optional file plus `TESSERA_*` variables.
pub fn load_config(path: Option<&str>) -> anyhow::Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::load(Path::new(path))?,
        None => EngineConfig::from_env()?,
    };
    log::debug!("resolved engine config: {:?}", config);
    Ok(config)
}
