//! Mistral AI integration for DocRAG
//!
//! This crate provides the Mistral implementation of the AiProvider trait.

mod client;
mod config;


pub use client::MistralClient;
pub use config::MistralConfig;

// Re-export core types for convenience
pub use docrag_core::{AiProvider, CompletionRequest, Error, Result};
