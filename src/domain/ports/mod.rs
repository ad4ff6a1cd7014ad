//! Capability ports (traits) the kernel depends on.
//!
//! Services depend on these traits, never on concrete adapters.

pub mod injection;
pub mod observer;
pub mod vector_backend;

pub use injection::InjectionHandler;
pub use observer::EpistemicObserver;
pub use vector_backend::{
    Distance, EmbeddingProvider, NullEmbeddingProvider, NullVectorBackend, PayloadFilter,
    ScoredPoint, VectorBackend, VectorPoint,
};
