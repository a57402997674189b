//! Background locate/read loop.
//!
//! One worker thread owns the process handle and does every read. Each
//! successful tree read is published to a [`SnapshotHandle`]; consumers clone
//! the latest `Arc<Snapshot>` out of it and never wait on a read cycle.
//!
//! Cycle, per [`Worker::step`]:
//! 1. Open the process if there is no session (cached root looked up here)
//! 2. Run the locate pipeline if there is no root
//! 3. Read the tree within the read budget and publish it
//!
//! A lost process or an empty locate pass backs off. Repeated read failures
//! drop the root so the next cycle locates it again.

pub mod retry;
pub mod shutdown;

pub use retry::{ExponentialBackoff, FixedDelay, RetryStrategy};
pub use shutdown::ShutdownSignal;

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;
use tracing::{debug, info, warn};

use crate::cache::RootAddressCache;
use crate::codec::ObjectCodec;
use crate::config::EngineConfig;
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::graph::{ObjectGraphReader, ObjectNode};
use crate::locate::Locator;
use crate::process::{ProcessInfo, ProcessProvider};

/// One published tree read.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    /// Strictly increasing per worker, starting at 1.
    pub sequence: u64,
    pub taken_at: DateTime<Utc>,
    pub root_address: u64,
    pub tree: ObjectNode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "kebab-case")]
pub enum WorkerStatus {
    NotConnected,
    Locating,
    Reading,
    Backoff,
}

#[derive(Debug)]
struct Shared {
    latest: Mutex<Option<Arc<Snapshot>>>,
    status: Mutex<WorkerStatus>,
}

/// Read side of the worker. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SnapshotHandle {
    shared: Arc<Shared>,
}

impl SnapshotHandle {
    fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                latest: Mutex::new(None),
                status: Mutex::new(WorkerStatus::NotConnected),
            }),
        }
    }

    /// Most recent snapshot; `None` until the first read succeeds.
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.shared
            .latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn status(&self) -> WorkerStatus {
        *self
            .shared
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the slot unless it already holds a newer snapshot.
    fn publish(&self, snapshot: Arc<Snapshot>) {
        let mut slot = self
            .shared
            .latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot
            .as_ref()
            .is_none_or(|current| current.sequence < snapshot.sequence)
        {
            *slot = Some(snapshot);
        }
    }

    /// Store `status`, returning the previous one.
    fn set_status(&self, status: WorkerStatus) -> WorkerStatus {
        let mut slot = self
            .shared
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, status)
    }
}

/// Result of one [`Worker::step`], telling the loop how long to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Published { sequence: u64 },
    /// The tree read failed; the previous snapshot stays current.
    ReadFailed,
    Backoff(Duration),
}

#[derive(Debug, Clone, Copy)]
struct Root {
    address: u64,
    /// Set once a tree read from this address succeeded.
    verified: bool,
}

struct Session<T> {
    codec: ObjectCodec<T>,
    hint: Option<String>,
    root: Option<Root>,
}

pub struct Worker<P: ProcessProvider> {
    provider: P,
    pid: u32,
    config: EngineConfig,
    cache: Option<RootAddressCache>,
    backoff: ExponentialBackoff,
    snapshots: SnapshotHandle,
    session: Option<Session<P::Process>>,
    consecutive_failures: u32,
    backoff_attempt: u32,
    sequence: u64,
}

impl<P: ProcessProvider> Worker<P> {
    pub fn new(
        provider: P,
        pid: u32,
        config: EngineConfig,
        cache: Option<RootAddressCache>,
    ) -> Self {
        let backoff = ExponentialBackoff::from_config(&config.worker);
        Self {
            provider,
            pid,
            config,
            cache,
            backoff,
            snapshots: SnapshotHandle::new(),
            session: None,
            consecutive_failures: 0,
            backoff_attempt: 0,
            sequence: 0,
        }
    }

    pub fn snapshots(&self) -> SnapshotHandle {
        self.snapshots.clone()
    }

    /// Run one cycle.
    pub fn step(&mut self) -> StepOutcome {
        let mut session = match self.session.take() {
            Some(session) => session,
            None => match self.connect() {
                Ok(session) => session,
                Err(e) => return self.back_off(&e),
            },
        };

        let root = match session.root {
            Some(root) => root,
            None => {
                self.set_status(WorkerStatus::Locating);
                match self.locate(&session) {
                    Ok(address) => {
                        let root = Root {
                            address,
                            verified: true,
                        };
                        session.root = Some(root);
                        root
                    }
                    Err(e) => {
                        if !e.is_process_level() && session.codec.reader().is_alive() {
                            self.session = Some(session);
                            return self.back_off(&e);
                        }
                        return self.lose_session(&e);
                    }
                }
            }
        };

        self.set_status(WorkerStatus::Reading);
        match self.read_tree(&session, root.address) {
            Ok(tree) => {
                if !root.verified {
                    info!("Cached root 0x{:X} verified", root.address);
                }
                session.root = Some(Root {
                    verified: true,
                    ..root
                });
                self.session = Some(session);
                self.consecutive_failures = 0;
                self.backoff_attempt = 0;
                StepOutcome::Published {
                    sequence: self.publish(root.address, tree),
                }
            }
            Err(e) if e.is_process_level() || !session.codec.reader().is_alive() => {
                self.lose_session(&e)
            }
            Err(e) => {
                self.record_read_failure(&mut session, root, &e);
                self.session = Some(session);
                StepOutcome::ReadFailed
            }
        }
    }

    /// Loop until `shutdown` fires. The signal is checked between cycles.
    pub fn run(mut self, shutdown: &ShutdownSignal) {
        info!(
            "Worker started for pid {} (root type '{}')",
            self.pid, self.config.worker.root_type
        );
        let poll_interval = self.config.worker.poll_interval();
        while !shutdown.is_shutdown() {
            let wait = match self.step() {
                StepOutcome::Backoff(delay) => delay,
                StepOutcome::Published { .. } | StepOutcome::ReadFailed => poll_interval,
            };
            if shutdown.wait(wait) {
                break;
            }
        }
        info!("Worker for pid {} stopped", self.pid);
    }

    fn connect(&mut self) -> Result<Session<P::Process>> {
        self.set_status(WorkerStatus::NotConnected);
        let process = self.provider.open_process(self.pid)?;
        let hint = process.runtime_version_hint();
        info!("Connected to pid {}", self.pid);

        let cached = self
            .cache
            .as_ref()
            .and_then(|cache| cache.get_matching(self.pid, hint.as_deref()));
        if let Some(address) = cached {
            info!("Trying cached root 0x{:X}", address);
        }

        Ok(Session {
            codec: ObjectCodec::new(process, self.config.layout),
            hint,
            root: cached.map(|address| Root {
                address,
                verified: false,
            }),
        })
    }

    fn locate(&self, session: &Session<P::Process>) -> Result<u64> {
        let regions = match session.codec.reader().regions() {
            Ok(regions) => regions,
            Err(e) if e.is_process_level() => return Err(e),
            Err(e) => {
                warn!("{}; nothing to scan", e);
                Vec::new()
            }
        };

        let deadline = Deadline::new("locate", self.config.worker.locate_budget());
        let outcome = Locator::new(&session.codec, &self.config.scan, &self.config.graph)
            .locate_root(&regions, &self.config.worker.root_type, &deadline)?;

        if let Some(cache) = &self.cache
            && let Err(e) =
                cache.set_with_hint(self.pid, outcome.root_address, session.hint.clone())
        {
            warn!("Failed to cache root address: {}", e);
        }
        Ok(outcome.root_address)
    }

    fn read_tree(&self, session: &Session<P::Process>, root: u64) -> Result<ObjectNode> {
        let deadline = Deadline::new("tree read", self.config.worker.read_budget());
        let tree = ObjectGraphReader::new(&session.codec, &self.config.graph)
            .read_tree_within(root, &deadline)?;

        let expected = self.config.worker.root_type.as_str();
        if tree.type_name.as_deref() != Some(expected) {
            return Err(Error::unreadable(
                root,
                0,
                format!(
                    "expected '{}' root, found '{}'",
                    expected,
                    tree.type_name.as_deref().unwrap_or("?")
                ),
            ));
        }
        Ok(tree)
    }

    fn record_read_failure(&mut self, session: &mut Session<P::Process>, root: Root, e: &Error) {
        if !root.verified {
            warn!("Cached root 0x{:X} rejected: {}", root.address, e);
            self.invalidate_cache();
            session.root = None;
            return;
        }

        self.consecutive_failures += 1;
        warn!(
            "Tree read failed ({}/{}): {}",
            self.consecutive_failures, self.config.worker.max_consecutive_failures, e
        );
        if self.consecutive_failures >= self.config.worker.max_consecutive_failures {
            warn!("Dropping root 0x{:X}, locating again", root.address);
            self.invalidate_cache();
            session.root = None;
            session.codec.clear_type_cache();
            self.consecutive_failures = 0;
        }
    }

    fn invalidate_cache(&self) {
        if let Some(cache) = &self.cache
            && let Err(e) = cache.invalidate(self.pid)
        {
            warn!("Failed to invalidate cached root: {}", e);
        }
    }

    /// Back off without a session. Failures counted against the old
    /// session's root do not carry over to the next one.
    fn lose_session(&mut self, e: &Error) -> StepOutcome {
        self.consecutive_failures = 0;
        self.back_off(e)
    }

    fn back_off(&mut self, e: &Error) -> StepOutcome {
        let delay = self
            .backoff
            .delay_for_attempt(self.backoff_attempt)
            .unwrap_or_else(|| self.config.worker.poll_interval());
        self.backoff_attempt = self.backoff_attempt.saturating_add(1);
        self.set_status(WorkerStatus::Backoff);

        match e {
            Error::LocatePipelineExhausted { .. } => info!("{}; retrying in {:?}", e, delay),
            _ => warn!("{}; retrying in {:?}", e, delay),
        }
        StepOutcome::Backoff(delay)
    }

    fn publish(&mut self, root_address: u64, tree: ObjectNode) -> u64 {
        self.sequence += 1;
        debug!(
            "Snapshot #{}: {} nodes from 0x{:X}",
            self.sequence,
            tree.node_count(),
            root_address
        );
        self.snapshots.publish(Arc::new(Snapshot {
            sequence: self.sequence,
            taken_at: Utc::now(),
            root_address,
            tree,
        }));
        self.sequence
    }

    fn set_status(&self, status: WorkerStatus) {
        let previous = self.snapshots.set_status(status);
        if previous != status {
            debug!("Worker status: {} -> {}", previous, status);
        }
    }
}

impl<P> Worker<P>
where
    P: ProcessProvider + Send + 'static,
    P::Process: Send + 'static,
{
    /// Run the loop on a dedicated thread.
    pub fn spawn(self) -> Result<(WorkerHandle, SnapshotHandle)> {
        self.spawn_with_shutdown(Arc::new(ShutdownSignal::new()))
    }

    /// Like [`spawn`](Self::spawn), stopping when `shutdown` fires.
    pub fn spawn_with_shutdown(
        self,
        shutdown: Arc<ShutdownSignal>,
    ) -> Result<(WorkerHandle, SnapshotHandle)> {
        let snapshots = self.snapshots();
        let signal = Arc::clone(&shutdown);
        let thread = std::thread::Builder::new()
            .name("objscan-worker".to_string())
            .spawn(move || self.run(&signal))?;
        Ok((
            WorkerHandle {
                shutdown,
                thread: Some(thread),
            },
            snapshots,
        ))
    }
}

/// Owner side of a spawned worker. Dropping it stops the worker.
pub struct WorkerHandle {
    shutdown: Arc<ShutdownSignal>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn shutdown_signal(&self) -> Arc<ShutdownSignal> {
        Arc::clone(&self.shutdown)
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Signal the worker and wait for its thread to exit.
    pub fn stop(mut self) {
        self.join();
    }

    fn join(&mut self) {
        self.shutdown.trigger();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("Worker thread panicked");
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.join();
    }
}
