use thiserror::Error;

use crate::store::StoreError;

/// Errors from a refresh job.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// Reading the upstream view failed.
    #[error("upstream read for '{job}' failed: {source}")]
    Upstream {
        job: &'static str,
        #[source]
        source: StoreError,
    },

    /// Replacing rows in the store failed.
    #[error("store write for '{job}' failed: {source}")]
    Store {
        job: &'static str,
        #[source]
        source: StoreError,
    },
}

impl RefreshError {
    pub fn job(&self) -> &'static str {
        match self {
            RefreshError::Upstream { job, .. } | RefreshError::Store { job, .. } => job,
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            RefreshError::Upstream { source, .. } | RefreshError::Store { source, .. } => {
                source.is_transient()
            }
        }
    }
}
