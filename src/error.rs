// src/error.rs

use thiserror::Error;

/// Core error types for Tevra
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Header serialization errors
    #[error("Header serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Database not found
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),

    /// Stored header failed its integrity check
    #[error("Stored header for instance {0} is corrupt")]
    CorruptHeader(u32),

    /// Package is missing a mandatory identity field
    #[error("Package is missing mandatory field: {0}")]
    MissingIdentity(&'static str),

    /// Binary packages must carry both architecture and operating system
    #[error("Package {0} has no architecture or operating system")]
    MissingArchOs(String),

    /// Public keys are imported through the key import path, never installed
    #[error(
        "public keys can not be installed as gpg-pubkey packages; \
         use the key import command for that"
    )]
    PubkeyInstall,

    /// Relocation failure (only fatal for source packages)
    #[error("Relocation failed: {0}")]
    Relocation(String),

    /// File info could not be built from the header
    #[error("Failed to build file info for {0}")]
    FileInfo(String),

    /// Package file could not be parsed
    #[error("Failed to parse package: {0}")]
    Package(String),

    /// File signing errors
    #[error("File signing failed: {0}")]
    Signing(String),
}

/// Result type alias using Tevra's Error type
pub type Result<T> = std::result::Result<T, Error>;
