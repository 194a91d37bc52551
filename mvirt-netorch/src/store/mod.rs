//! Resource store: network and NIC rows, counters, and locks.

mod error;
mod lock;
mod memory;
mod traits;

pub use error::{StoreError, StoreResult};
pub use lock::{LockGuard, LockKey, LockTable};
pub use memory::MemoryStore;
pub use traits::{Reader, ResourceStore, Tx, with_transaction};
