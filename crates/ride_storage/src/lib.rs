//! ride_storage - Document store backends
//!
//! - `MemoryStore` keeps every collection in concurrent maps
//! - `JsonFileStore` wraps it and writes a JSON snapshot after each change

mod file;
mod memory;
mod snapshot;

pub use file::JsonFileStore;
pub use memory::MemoryStore;
