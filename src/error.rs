use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Rejected tenant input. Raised before any side effect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("tenant name cannot be empty")]
    EmptyTenantName,
    #[error("db_name cannot be empty")]
    EmptyDatabaseName,
    #[error("db_name cannot have spaces: {0:?}")]
    Whitespace(String),
    #[error("db_name {db_name:?} contains unsafe character {ch:?}")]
    UnsafeCharacter { db_name: String, ch: char },
    #[error("db_name {db_name:?} is {len} bytes long (max {max})")]
    TooLong { db_name: String, len: usize, max: usize },
}

impl ValidationError {
    /// Short label used for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            ValidationError::EmptyTenantName => "empty_tenant_name",
            ValidationError::EmptyDatabaseName => "empty_db_name",
            ValidationError::Whitespace(_) => "whitespace",
            ValidationError::UnsafeCharacter { .. } => "unsafe_character",
            ValidationError::TooLong { .. } => "too_long",
        }
    }
}

/// Database server failure while creating or dropping a tenant database.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("database server error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("database server did not answer within {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Rejected(String),
    /// Failed before `CREATE DATABASE` reached the server, so nothing was created.
    #[error("CREATE DATABASE was not sent: {0}")]
    NotIssued(#[source] Box<ProvisionError>),
}

impl ProvisionError {
    pub(crate) fn not_issued(self) -> Self {
        match self {
            ProvisionError::NotIssued(_) => self,
            other => ProvisionError::NotIssued(Box::new(other)),
        }
    }

    /// False when a create attempt failed before issuing `CREATE DATABASE`.
    /// In every other case the database may exist and belong to this attempt.
    pub fn create_issued(&self) -> bool {
        !matches!(self, ProvisionError::NotIssued(_))
    }
}

/// The registry store could not be read or written.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("registry I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("registry lock {path} still held after {waited:?}")]
    Locked { path: PathBuf, waited: Duration },
    #[error("registry at {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("could not connect to tenant database: {0}")]
    Connect(#[source] sqlx::Error),
    #[error("migration engine failed: {0}")]
    Engine(#[from] sqlx::migrate::MigrateError),
    #[error("migrations did not finish within {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("account query failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    #[error("account creation did not finish within {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Rejected(String),
}

/// Umbrella error for a provisioning attempt.
#[derive(Debug, Error)]
pub enum ProvisionerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Migration(#[from] MigrationError),
    #[error(transparent)]
    Account(#[from] AccountError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_issued_wraps_once() {
        let err = ProvisionError::Timeout(Duration::from_secs(1)).not_issued().not_issued();

        assert!(!err.create_issued());
        match err {
            ProvisionError::NotIssued(inner) => {
                assert!(matches!(*inner, ProvisionError::Timeout(_)))
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(ProvisionError::Rejected("disk full".into()).create_issued());
    }
}
