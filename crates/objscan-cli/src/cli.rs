//! CLI argument definitions for objscan.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use objscan_core::graph::format::OutputFormat;

#[derive(Parser)]
#[command(name = "objscan")]
#[command(about = "Read live object graphs out of another process", version)]
pub struct Args {
    /// Engine config file (TOML)
    #[arg(long, global = true, value_name = "FILE", env = "OBJSCAN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Root address cache file (overrides the config)
    #[arg(long, global = true, value_name = "FILE")]
    pub cache_file: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// List memory regions of a process
    Regions {
        /// Target process ID
        #[arg(long, env = "OBJSCAN_PID")]
        pid: u32,
        /// Include unreadable and special regions
        #[arg(long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Find the root object and report every candidate
    Locate {
        /// Target process ID
        #[arg(long, env = "OBJSCAN_PID")]
        pid: u32,
        /// Declared type name of the root (default: UIRoot)
        #[arg(long)]
        type_name: Option<String>,
        /// Skip the type scan and use this type record (hex)
        #[arg(long)]
        type_address: Option<String>,
        /// Do not store the result in the root cache
        #[arg(long)]
        no_cache: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Read one tree and write it out
    Dump {
        /// Target process ID
        #[arg(long, env = "OBJSCAN_PID")]
        pid: u32,
        /// Root address (hex); defaults to the cached or located root
        #[arg(long)]
        root: Option<String>,
        /// Declared type name of the root (default: UIRoot)
        #[arg(long)]
        type_name: Option<String>,
        /// Output format
        #[arg(long, short, value_enum, default_value = "json")]
        format: DumpFormat,
        /// Output file path (defaults to stdout)
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Ignore the root cache
        #[arg(long)]
        no_cache: bool,
    },
    /// Run the background worker and print each snapshot
    Watch {
        /// Target process ID
        #[arg(long, env = "OBJSCAN_PID")]
        pid: u32,
        /// Poll interval in ms (default from config)
        #[arg(long)]
        interval: Option<u64>,
        /// Declared type name of the root (default: UIRoot)
        #[arg(long)]
        type_name: Option<String>,
        /// Ignore the root cache
        #[arg(long)]
        no_cache: bool,
    },
    /// Inspect the root address cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
pub enum CacheAction {
    /// Show every stored root
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete the cache file
    Clear,
    /// Forget the root of one process
    Invalidate {
        /// Target process ID
        #[arg(long, env = "OBJSCAN_PID")]
        pid: u32,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum DumpFormat {
    Json,
    Tree,
}

impl From<DumpFormat> for OutputFormat {
    fn from(format: DumpFormat) -> Self {
        match format {
            DumpFormat::Json => OutputFormat::Json,
            DumpFormat::Tree => OutputFormat::Tree,
        }
    }
}
