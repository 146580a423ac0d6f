//! Error kinds for the pieces of domain logic that live in this crate.
//!
//! These are deliberately narrow — they describe failures in pure/in-memory
//! logic (token validation, master election). Storage and transport errors
//! are defined closer to where they occur, in `fabric-store` and
//! `fabric-server`, and get folded into the server's unified `AppError`.

use thiserror::Error;

/// Failures from generating, hashing, or validating identity tokens.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token is shorter than the minimum accepted length")]
    TooShort,

    #[error("token does not match the stored hash")]
    Mismatch,

    #[error("stored token hash is not valid hex")]
    MalformedHash,
}

/// Failures from HA coordinator startup or election.
#[derive(Debug, Error)]
pub enum HaError {
    #[error("another replica already holds the master role with a fresh heartbeat")]
    MasterCollision { existing_master: String },

    #[error("store error during HA coordination: {0}")]
    Store(String),
}
