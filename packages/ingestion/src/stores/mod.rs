//! Object-store implementations.

pub mod memory;

pub use memory::MemoryObjectStore;
