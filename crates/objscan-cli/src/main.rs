mod cli;
mod cli_utils;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Args, CacheAction, Command};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = Args::parse();

    // --verbose wins over RUST_LOG
    let env_filter = if args.verbose {
        EnvFilter::new("objscan=debug,objscan_core=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("objscan=info,objscan_core=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config = cli_utils::load_config(args.config.as_deref())?;
    let cache = cli_utils::cache_for(&config, args.cache_file.as_deref());
    let type_name = |name: Option<String>| name.unwrap_or_else(|| config.worker.root_type.clone());

    match args.command {
        Command::Regions { pid, all, json } => commands::regions::run(pid, all, json),
        Command::Locate {
            pid,
            type_name: name,
            type_address,
            no_cache,
            json,
        } => commands::locate::run(
            pid,
            &type_name(name),
            type_address.as_deref(),
            &config,
            cli_utils::enabled_cache(&config, &cache, no_cache),
            json,
        ),
        Command::Dump {
            pid,
            root,
            type_name: name,
            format,
            output,
            no_cache,
        } => commands::dump::run(
            pid,
            root.as_deref(),
            &type_name(name),
            format.into(),
            output.as_deref(),
            &config,
            cli_utils::enabled_cache(&config, &cache, no_cache),
        ),
        Command::Watch {
            pid,
            interval,
            type_name: name,
            no_cache,
        } => {
            let name = type_name(name);
            let cache = cli_utils::enabled_cache(&config, &cache, no_cache).cloned();
            commands::watch::run(pid, interval, &name, config.clone(), cache)
        }
        Command::Cache { action } => match action {
            CacheAction::List { json } => commands::cache::list(&cache, json),
            CacheAction::Clear => commands::cache::clear(&cache),
            CacheAction::Invalidate { pid } => commands::cache::invalidate(&cache, pid),
        },
    }
}
