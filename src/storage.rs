//! Storage for the target model.

mod memory;
pub use memory::{ApplyError, ItemContent, MemoryModel, Node, NodeBody, StoreError};
