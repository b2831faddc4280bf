//! Error types for merchant-watch-core operations.
//!
//! Nothing here reaches the user during normal operation: stale input is
//! dropped and environment failures are logged. These errors cover loading
//! and wiring, where the caller can still decide what to do.

use std::path::PathBuf;

// ═══════════════════════════════════════════════════════════════════════════════
// Engine Error
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Configuration value invalid: {field}: {reason}")]
    ConfigInvalid { field: String, reason: String },

    // ─────────────────────────────────────────────────────────────────────
    // Catalogue Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Catalogue malformed: {path}: {details}")]
    CatalogueMalformed { path: PathBuf, details: String },

    #[error("Unknown server region: {0}")]
    UnknownRegion(String),

    #[error("Server {server} is not part of region {region}")]
    UnknownServer { region: String, server: String },

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Runtime Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Engine is no longer running")]
    EngineStopped,
}

/// Convenience type alias for Results using WatchError.
pub type Result<T> = std::result::Result<T, WatchError>;
