//! Watch command: run the worker and print each snapshot as it lands.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use objscan_core::process::SystemProcessProvider;
use objscan_core::worker::ShutdownSignal;
use objscan_core::{EngineConfig, RootAddressCache, Snapshot, Worker};

/// How often the console checks the snapshot slot.
const DISPLAY_INTERVAL: Duration = Duration::from_millis(100);

pub fn run(
    pid: u32,
    interval: Option<u64>,
    type_name: &str,
    mut config: EngineConfig,
    cache: Option<RootAddressCache>,
) -> Result<()> {
    let current_version = env!("CARGO_PKG_VERSION");
    eprintln!("objscan {} - Watch", current_version);

    if let Some(ms) = interval {
        config.worker.poll_interval_ms = ms;
    }
    config.worker.root_type = type_name.to_string();
    config.validate()?;

    let shutdown = setup_shutdown_handler()?;
    let worker = Worker::new(SystemProcessProvider::default(), pid, config, cache);
    let (handle, snapshots) = worker.spawn_with_shutdown(Arc::clone(&shutdown))?;
    eprintln!("Watching PID {} for '{}' (Ctrl+C to stop)", pid, type_name);

    let mut last_sequence = 0;
    let mut last_status = None;
    while !shutdown.wait(DISPLAY_INTERVAL) {
        let status = snapshots.status();
        if last_status != Some(status) {
            eprintln!("[{}]", status);
            last_status = Some(status);
        }
        if let Some(snapshot) = snapshots.latest()
            && snapshot.sequence != last_sequence
        {
            println!("{}", format_snapshot(&snapshot));
            last_sequence = snapshot.sequence;
        }
    }

    handle.stop();
    eprintln!("Shutdown complete.");
    Ok(())
}

fn setup_shutdown_handler() -> Result<Arc<ShutdownSignal>> {
    let shutdown = Arc::new(ShutdownSignal::new());
    let shutdown_ctrlc = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        eprintln!("\nShutting down...");
        shutdown_ctrlc.trigger();
    })?;
    Ok(shutdown)
}

fn format_snapshot(snapshot: &Snapshot) -> String {
    format!(
        "#{:<6} {}  root 0x{:X}  {} nodes  depth {}",
        snapshot.sequence,
        snapshot.taken_at.format("%H:%M:%S%.3f"),
        snapshot.root_address,
        snapshot.tree.node_count(),
        snapshot.tree.depth()
    )
}
