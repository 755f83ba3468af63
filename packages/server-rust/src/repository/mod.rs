//! Item repository implementations.

pub mod memory;

pub use memory::InMemoryItemRepository;
