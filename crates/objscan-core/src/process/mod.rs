mod bytes;
pub mod chunked_reader;
mod handle;
pub mod layout;
pub mod maps;
pub mod provider;
mod reader;

// Mock memory reader for testing (always available for unit and integration tests)
#[doc(hidden)]
pub mod mock;

pub use bytes::{ByteBuffer, decode_byte_string, decode_ucs2, decode_ucs4};
pub use chunked_reader::{ChunkedMemoryIterator, DEFAULT_CHUNK_SIZE, MemoryChunk};
pub use handle::*;
pub use maps::{MemoryRegion, RegionSet, list_regions, parse_maps, scannable_regions};
pub use provider::{ProcessInfo, ProcessProvider};
pub use reader::{Backend, MemoryReader, ReadMemory, check_user_range};

// Re-export mock for convenient access in tests
#[doc(hidden)]
pub use mock::{MockMemoryBuilder, MockMemoryReader, MockProcessProvider};
