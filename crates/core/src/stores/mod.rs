pub mod memory;
pub mod neo4j;
pub mod qdrant;

pub use memory::{MemoryGraphStore, MemoryVectorIndex};
pub use neo4j::Neo4jStore;
pub use qdrant::QdrantStore;
