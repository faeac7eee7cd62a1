//! Fatal resource errors, surfaced before a search begins.

/// Errors that can occur while setting up the search machinery.
///
/// Nothing on the search path itself returns errors; collaborator soft
/// failures (tablebase miss, invalid stored eval) are recovered locally.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// The transposition table could not be allocated at the requested size.
    #[error("failed to allocate {mb} MB transposition table")]
    TableAllocation {
        /// Requested size in megabytes.
        mb: usize,
    },

    /// A worker thread could not be spawned.
    #[error("failed to spawn search thread: {source}")]
    ThreadSpawn {
        #[from]
        source: std::io::Error,
    },
}
