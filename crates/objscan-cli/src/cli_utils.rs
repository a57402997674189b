//! Common CLI utility functions shared across commands.

use std::path::Path;

use anyhow::{Context, Result};
use objscan_core::process::ProcessHandle;
use objscan_core::{EngineConfig, RootAddressCache};

/// Parse a hex address, with or without a `0x` prefix.
pub fn parse_hex_address(s: &str) -> Result<u64> {
    let digits = s
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X")
        .replace('_', "");
    u64::from_str_radix(&digits, 16).with_context(|| format!("Invalid hex address: {}", s))
}

/// Load the engine config, or defaults when no file is given.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

/// Cache at `--cache-file` when given, else at the configured location.
pub fn cache_for(config: &EngineConfig, cache_file: Option<&Path>) -> RootAddressCache {
    let cache = RootAddressCache::from_config(&config.cache);
    match cache_file {
        Some(path) => RootAddressCache::new(path, cache.ttl()),
        None => cache,
    }
}

/// The cache, unless disabled in config or on the command line.
pub fn enabled_cache<'a>(
    config: &EngineConfig,
    cache: &'a RootAddressCache,
    no_cache: bool,
) -> Option<&'a RootAddressCache> {
    (config.cache.enabled && !no_cache).then_some(cache)
}

pub fn open_process(pid: u32) -> Result<ProcessHandle> {
    Ok(ProcessHandle::open(pid)?)
}
