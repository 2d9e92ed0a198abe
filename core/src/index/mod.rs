mod memory_index;
mod port;

pub use memory_index::InMemoryVectorIndex;
pub use port::VectorIndex;
