//! Engine error types.

use thiserror::Error;

/// Errors surfaced by the persistence boundary.
///
/// "Not found" is never a store error: lookups return `Option`. Only
/// infrastructure failures (connection loss, malformed rows) appear here.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing database could not be reached or rejected the query.
    #[error("database error: {0}")]
    Database(String),
}

/// Errors surfaced by the engine to its callers.
///
/// The command dispatcher must treat any of these as "deny", never "allow".
#[derive(Debug, Error)]
pub enum AccessError {
    /// The override or privilege store failed mid-resolution.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A capability with the same name already exists at this scope.
    #[error("capability `{0}` is already registered")]
    DuplicateCapability(String),

    /// A privilege with the same name already exists in this scope.
    #[error("privilege `{0}` already exists")]
    DuplicatePrivilege(String),

    /// Raw definition text could not be parsed at all.
    ///
    /// Distinct from a definition with unknown references, which is repaired
    /// by dropping the references and logging a warning.
    #[error("invalid privilege definition: {0}")]
    InvalidDefinition(String),
}
