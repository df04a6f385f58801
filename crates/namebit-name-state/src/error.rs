//! Error types for the name-state core.

/// Errors surfaced by the name-state core.
///
/// Nothing here is retried; every error is reported to the caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// RocksDB error.
    #[error("RocksDB error: {0}")]
    Rocksdb(#[from] rocksdb::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed serialized data.
    #[error("decode error: {0}")]
    Decode(#[from] bitcoin::consensus::encode::Error),

    /// A trie delete addressed a name with no binding.
    #[error("name {0} not found")]
    NameNotFound(String),

    /// A non-root trie node has neither data nor children.
    #[error("empty leaf node outside the trie root")]
    EmptyLeaf,

    /// A non-root node of an unexpanded trie has no data and a single
    /// child, which should have been collapsed into its prefix.
    #[error("pure edge node outside the trie root")]
    PureEdge,

    /// A node carries a prefix where its representation forbids one.
    #[error("unexpected node prefix: {0}")]
    UnexpectedPrefix(&'static str),

    /// Cross-index mismatch found while validating the name database.
    #[error("name database corruption: {0}")]
    Corruption(String),

    /// The validation scan was interrupted by the shutdown sentinel.
    #[error("operation interrupted")]
    Interrupted,
}
