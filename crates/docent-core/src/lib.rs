//! # Docent Core
//!
//! Shared vocabulary for the Docent retrieval-augmented generation pipeline:
//! the error taxonomy, configuration, data model and the capability traits
//! implemented by embedding, index and chat adapters.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::DocentConfig;
pub use error::{DocentError, Result};
