//! Core types, configuration, and error handling for prwarden.
//!
//! This crate provides the shared foundation used by the other prwarden crates:
//! - [`WardenError`]: unified error type using `thiserror` and `miette`
//! - [`WardenConfig`]: configuration loaded from `.prwarden.toml`
//! - Shared types: [`DiffDocument`], [`FileChange`], [`Hunk`], [`ReviewFinding`],
//!   [`Severity`], [`Credential`]

mod config;
mod error;
mod types;

pub use config::{LlmConfig, OutputConfig, ReviewConfig, WardenConfig, FALLBACK_API_KEY_ENV};
pub use error::WardenError;
pub use types::{
    ChangeKind, Credential, DiffDocument, FileChange, Hunk, OutputFormat, ReviewFinding, Severity,
};

/// A convenience `Result` type for prwarden operations.
pub type Result<T> = std::result::Result<T, WardenError>;
