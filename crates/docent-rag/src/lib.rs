//! # Docent RAG
//!
//! The retrieval-augmented generation pipeline.
//!
//! ## How it works
//! ```text
//! "What is the capital of France?"
//!   ↓ Retriever: embed query, top-k similarity search
//! [passage 1] Paris is the capital of France.
//!   ↓ PromptAssembler: instructions + delimited context + question
//! RenderedPrompt
//!   ↓ GenerationStreamer: streamed chat completion
//! "Par" "is is" " the capital." → Done
//! ```
//!
//! Retrieval failures degrade to an empty context instead of failing the
//! request. Generation failures after the first fragment are reported
//! in-band, with the partial text kept.

pub mod hooks;
pub mod pipeline;
pub mod prompt;
pub mod retriever;
pub mod streamer;

pub use hooks::{JsonlAuditHook, LogHook};
pub use pipeline::{AnswerStream, Pipeline, PipelineSettings, PipelineState};
pub use prompt::PromptAssembler;
pub use retriever::Retriever;
pub use streamer::{CompletionContext, GenerationStream, GenerationStreamer};
