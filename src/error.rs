/// Failure of the backing store to accept a write.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Every entry that would have to make room for `key` is marked non-removable.
    #[error("no evictable entry left to make room for key `{key}`")]
    CapacityExhausted { key: String },
    /// The backend could not be reached or refused the write.
    #[error("backing store unavailable: {0}")]
    Unavailable(String),
}

/// Error returned by [`crate::StampedeCache::get_data`].
///
/// A loader failure is handed back unchanged inside [`Error::Load`]; the stale entry, if any,
/// stays in the store so that the next call retries.
#[derive(Debug, thiserror::Error)]
pub enum Error<E> {
    #[error("failed to load value for key `{key}`")]
    Load {
        key: String,
        #[source]
        source: E,
    },
    #[error("failed to write value for key `{key}` to the backing store")]
    Store {
        key: String,
        #[source]
        source: StoreError,
    },
}

impl<E> Error<E> {
    pub fn key(&self) -> &str {
        match self {
            Error::Load { key, .. } | Error::Store { key, .. } => key,
        }
    }

    pub fn is_load(&self) -> bool {
        matches!(self, Error::Load { .. })
    }

    /// Returns the loader's own error, if this is a load failure.
    pub fn into_load_error(self) -> Option<E> {
        match self {
            Error::Load { source, .. } => Some(source),
            Error::Store { .. } => None,
        }
    }
}
