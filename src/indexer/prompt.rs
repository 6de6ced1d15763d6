//! Prompt assembly from ranked chunks
//!
//! Chunks are written in the order given; rank order is the relevance signal.

use super::Chunk;
use std::fmt::Write;

/// Combine the user's query with retrieved code context
pub fn build_prompt(query: &str, chunks: &[Chunk]) -> String {
    let mut prompt = format!("User Query: {}\n\nCode Context:\n", query);
    for chunk in chunks {
        let _ = write!(prompt, "\n--- File: {} ---\n{}\n", chunk.source_path, chunk.content);
    }
    prompt
}
