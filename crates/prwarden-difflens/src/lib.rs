//! Diff acquisition, parsing, and pre-analysis filtering.
//!
//! Computes the pull request's diff against its base branch with git2,
//! parses it into a byte-exact [`prwarden_core::DiffDocument`], and decides
//! which files are worth sending for analysis.

pub mod acquire;
pub mod filter;
pub mod parser;
