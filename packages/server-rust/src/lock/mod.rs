//! Occupation locks: the store port, its in-memory engine and the service
//! that enforces one worker per item.

pub mod memory;
pub mod service;
pub mod store;

pub use memory::MemoryLockStore;
pub use service::{is_degraded_token, ActiveLock, LockOwner, LockService, LockToken};
pub use store::{lock_key, ExtendOutcome, LockStore, LockValue};
