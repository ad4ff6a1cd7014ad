//! Vector backend adapters.

pub mod qdrant;

pub use qdrant::QdrantBackend;
