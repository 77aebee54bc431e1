//! Error types for the reconciliation engine.
//!
//! These cover validation failures that must abort a run before any
//! database access happens. Apply-time failures from a real database
//! client are reported through `anyhow` at the [`crate::DatabaseClient`]
//! seam instead.

use thiserror::Error;

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while validating or reconciling configuration.
#[derive(Debug, Error)]
pub enum Error {
    /// An attribute property name outside the standard set, in strict mode.
    #[error("bad attribute property name '{property}' for attribute '{attribute}'")]
    UnknownAttributeProperty {
        /// Attribute the offending property was declared under
        attribute: String,
        /// The offending property name
        property: String,
    },

    /// A malformed filter expression (missing `:`, unknown term, bad regex).
    #[error("bad filter '{filter}': {reason}")]
    InvalidFilter {
        /// The filter string as given on the command line
        filter: String,
        /// What is wrong with it
        reason: String,
    },

    /// Attempt to overwrite a subtree with a scalar value while merging.
    #[error("cannot overwrite the subtree at '{key}' with a scalar value")]
    InvalidAssignment {
        /// Key whose existing subtree the incoming scalar would clobber
        key: String,
    },

    /// A device name that is not of the `domain/family/member` form.
    #[error("invalid device name '{0}': expected domain/family/member")]
    InvalidDeviceName(String),

    /// Any other structural problem with the input configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
