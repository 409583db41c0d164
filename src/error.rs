//! Custom error types for Carnyx
//!
//! Typed errors for the campaign engine and the replacement machinery;
//! application-level code wraps these with `anyhow` context.

use thiserror::Error;

/// Errors raised by the fuzzing engine and the campaign controller
#[derive(Error, Debug)]
pub enum FuzzerError {
    /// The campaign was started before the controller assigned it an id
    #[error("Fuzzer ID was not set")]
    ScanIdNotSet,

    /// The campaign id can only be assigned while the fuzzer has not started
    #[error("Fuzzer was already started")]
    AlreadyStarted,

    /// The replacement source must be initialised before the engine accepts it
    #[error("Replacement source is not initialised")]
    UninitialisedReplacer,

    #[error("Invalid fuzzer options: {0}")]
    InvalidOptions(&'static str),

    #[error("Failed to create fuzzer thread: {0}")]
    ThreadCreation(#[from] std::io::Error),

    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),
}

/// Errors raised while crafting a fuzzed message
#[derive(Error, Debug)]
pub enum ReplacerError {
    /// The substituted message could not be assembled into a valid message
    #[error("Failed to craft fuzzed message: {0}")]
    Craft(String),

    /// A payload could not be applied to its location
    #[error("Failed to replace payload at '{location}': {reason}")]
    Replacement { location: String, reason: String },

    /// `next()` was called on an exhausted or closed source
    #[error("Replacement source is exhausted")]
    Exhausted,
}
