pub mod cache;
pub mod codec;
pub mod config;
pub mod deadline;
pub mod error;
pub mod graph;
pub mod locate;
pub mod process;
pub mod worker;

#[doc(hidden)]
pub mod fixture;

pub use cache::{RootAddressCache, RootAddressCacheEntry};
pub use codec::{ObjectCodec, PrimitiveValue};
pub use config::EngineConfig;
pub use error::{Error, Result, UnavailableKind};
pub use graph::{ObjectGraphReader, ObjectNode};
pub use locate::{LocateOutcome, Locator};
pub use worker::{Snapshot, SnapshotHandle, Worker, WorkerHandle, WorkerStatus};
