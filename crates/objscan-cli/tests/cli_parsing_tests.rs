//! CLI argument parsing tests.
//!
//! These only parse arguments; nothing here opens a process.

use std::path::PathBuf;

use clap::Parser;

#[path = "../src/cli.rs"]
#[allow(dead_code)]
mod cli;

use cli::{Args, CacheAction, Command, DumpFormat};

#[test]
fn test_parse_requires_subcommand() {
    assert!(Args::try_parse_from(["objscan"]).is_err());
}

#[test]
fn test_parse_regions() {
    let args = Args::try_parse_from(["objscan", "regions", "--pid", "1234", "--all"]).unwrap();
    match args.command {
        Command::Regions { pid, all, json } => {
            assert_eq!(pid, 1234);
            assert!(all);
            assert!(!json);
        }
        _ => panic!("Expected Regions command"),
    }
}

#[test]
fn test_parse_locate_with_type_address() {
    let args = Args::try_parse_from([
        "objscan",
        "locate",
        "--pid",
        "42",
        "--type-name",
        "MainMenu",
        "--type-address",
        "0x7f00_1000",
        "--no-cache",
    ])
    .unwrap();
    match args.command {
        Command::Locate {
            pid,
            type_name,
            type_address,
            no_cache,
            json,
        } => {
            assert_eq!(pid, 42);
            assert_eq!(type_name.as_deref(), Some("MainMenu"));
            assert_eq!(type_address.as_deref(), Some("0x7f00_1000"));
            assert!(no_cache);
            assert!(!json);
        }
        _ => panic!("Expected Locate command"),
    }
}

#[test]
fn test_parse_dump_defaults() {
    let args = Args::try_parse_from(["objscan", "dump", "--pid", "42"]).unwrap();
    match args.command {
        Command::Dump {
            root,
            type_name,
            format,
            output,
            no_cache,
            ..
        } => {
            assert!(root.is_none());
            assert!(type_name.is_none());
            assert_eq!(format, DumpFormat::Json);
            assert!(output.is_none());
            assert!(!no_cache);
        }
        _ => panic!("Expected Dump command"),
    }
}

#[test]
fn test_parse_dump_tree_to_file() {
    let args = Args::try_parse_from([
        "objscan", "dump", "--pid", "42", "--root", "0x5500", "-f", "tree", "-o", "ui.txt",
    ])
    .unwrap();
    match args.command {
        Command::Dump {
            root,
            format,
            output,
            ..
        } => {
            assert_eq!(root.as_deref(), Some("0x5500"));
            assert_eq!(format, DumpFormat::Tree);
            assert_eq!(output, Some(PathBuf::from("ui.txt")));
        }
        _ => panic!("Expected Dump command"),
    }
}

#[test]
fn test_parse_dump_rejects_unknown_format() {
    let result = Args::try_parse_from(["objscan", "dump", "--pid", "42", "-f", "xml"]);
    assert!(result.is_err());
}

#[test]
fn test_parse_watch_interval() {
    let args =
        Args::try_parse_from(["objscan", "watch", "--pid", "42", "--interval", "250"]).unwrap();
    match args.command {
        Command::Watch {
            pid,
            interval,
            no_cache,
            ..
        } => {
            assert_eq!(pid, 42);
            assert_eq!(interval, Some(250));
            assert!(!no_cache);
        }
        _ => panic!("Expected Watch command"),
    }
}

#[test]
fn test_parse_invalid_pid() {
    let result = Args::try_parse_from(["objscan", "watch", "--pid", "not-a-number"]);
    assert!(result.is_err());
}

#[test]
fn test_parse_cache_actions() {
    let args = Args::try_parse_from(["objscan", "cache", "list", "--json"]).unwrap();
    assert!(matches!(
        args.command,
        Command::Cache {
            action: CacheAction::List { json: true }
        }
    ));

    let args = Args::try_parse_from(["objscan", "cache", "clear"]).unwrap();
    assert!(matches!(
        args.command,
        Command::Cache {
            action: CacheAction::Clear
        }
    ));

    let args = Args::try_parse_from(["objscan", "cache", "invalidate", "--pid", "7"]).unwrap();
    assert!(matches!(
        args.command,
        Command::Cache {
            action: CacheAction::Invalidate { pid: 7 }
        }
    ));
}

#[test]
fn test_parse_global_options_after_subcommand() {
    let args = Args::try_parse_from([
        "objscan",
        "cache",
        "list",
        "--cache-file",
        "/tmp/roots.json",
        "-v",
    ])
    .unwrap();
    assert_eq!(args.cache_file, Some(PathBuf::from("/tmp/roots.json")));
    assert!(args.verbose);
}
