//! Review orchestration for prwarden.
//!
//! Provides the review pipeline: diff chunking, the analysis-service
//! transport and its retrying client, report assembly, and GitHub
//! comment publishing.

pub mod chunk;
pub mod client;
pub mod github;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod report;
pub mod transport;
