//! Capability interfaces implemented by the adapters.

pub mod embedding;
pub mod hook;
pub mod index;
pub mod provider;

pub use embedding::EmbeddingClient;
pub use hook::{Completion, CompletionHook, CompletionOutcome};
pub use index::VectorIndex;
pub use provider::{ChatProvider, TextStream};
