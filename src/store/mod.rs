//! Blob stores probed by the harness
//!
//! - `MemoryStore`: in-process map, zero propagation lag
//! - `FileStore`: one checksummed file per blob
//! - `fault`: wrappers that inject commit lag, lost writes or corruption

pub mod fault;
pub mod file;
pub mod memory;
pub mod traits;

pub use fault::{CorruptingStore, DelayedCommitStore, PurgingStore};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use traits::{BlobStore, SharedStore, StoreError};
