//! Persistence for credential artifacts and usage statistics.

mod credentials;
mod usage;

use std::path::PathBuf;

pub use credentials::{CredentialArtifact, CredentialStore};
pub use usage::{UsageError, UsageLog};

/// Errors from the credential store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed credential artifact: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Sweep removed {removed} artifact(s) but failed on {}: {}", failures.len(), failures.join("; "))]
    SweepPartial { removed: usize, failures: Vec<String> },
}
