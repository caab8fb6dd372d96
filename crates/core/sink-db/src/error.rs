//! Error types for sink database operations

use crate::{db::ConnError, sql::ValidateIdentifierError};

/// Errors that can occur when interacting with the sink database
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Error connecting to sink db: {0}")]
    ConnectionError(sqlx::Error),

    #[error("Error executing database query: {0}")]
    Database(#[from] sqlx::Error),

    /// The snapshot declares no identity column; the layer is not
    /// synchronizable and the caller must skip it.
    #[error("Layer '{layer}' has no identity column and cannot be synchronized")]
    MissingIdentity { layer: String },

    /// The staged snapshot's columns are structurally incompatible with
    /// the existing target table. Requires an explicit migration step
    /// outside the engine.
    #[error(
        "Staged columns for '{table}' do not match the existing target \
         (missing in target: {missing:?})"
    )]
    SchemaMismatch {
        table: String,
        missing: Vec<String>,
    },

    /// A dynamic identifier (table, column or schema name) failed
    /// validation at the SQL boundary.
    #[error("Invalid SQL identifier '{identifier}': {source}")]
    InvalidIdentifier {
        identifier: String,
        #[source]
        source: ValidateIdentifierError,
    },
}

impl Error {
    /// Returns `true` if the error is likely to be a transient connection issue.
    ///
    /// This is used to determine if an operation should be retried.
    ///
    /// Constraint violations, schema mismatches and identity errors are
    /// never transient and will not be retried.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::ConnectionError(_) => true,
            Error::Database(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }

    /// Returns `true` if the error is retryable.
    ///
    /// Covers connection errors plus transaction-level failures that are
    /// safe to retry from the beginning of the run:
    /// - Serialization failures (PostgreSQL error code `40001`)
    /// - Deadlock detected (PostgreSQL error code `40P01`)
    pub fn is_retryable(&self) -> bool {
        if self.is_connection_error() {
            return true;
        }

        matches!(
            self,
            Error::Database(sqlx::Error::Database(err))
                if err.code().is_some_and(|code| matches!(
                    code.as_ref(),
                    "40001" | // serialization_failure
                    "40P01"   // deadlock_detected
                ))
        )
    }
}

impl From<ConnError> for Error {
    fn from(err: ConnError) -> Self {
        match err {
            ConnError::ConnectionError(err) => Error::ConnectionError(err),
        }
    }
}
