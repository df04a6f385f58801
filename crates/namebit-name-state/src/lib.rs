//! Name registry state for Namebit.
//!
//! This crate holds the name-state core of the node: everything between
//! the block engine (which decides *what* changes) and the disk (which
//! remembers it).
//!
//! ## Architecture
//!
//! - **UNO trie** ([`UnoTrie`]): a deterministic byte-keyed trie over all
//!   currently registered names. Its root hash commits the full name set
//!   and is recomputable from either the expanded (one node per key byte)
//!   or the path-compressed representation, which hash identically.
//! - **Name cache** ([`NameCache`]): an overlay of pending updates,
//!   tombstones, history rewrites and expire-index flips, layered over a
//!   base view. Caches stack: a block-connect cache applies into its
//!   parent, and the outermost cache flushes to disk in one atomic batch.
//! - **Name database** ([`NameDb`]): the RocksDB-backed [`NameView`] the
//!   caches bottom out in, plus a single-scan consistency check of the
//!   whole name keyspace.
//!
//! The core is single-threaded by contract: callers serialize all
//! mutations of a given trie or cache under the chain-state lock.

mod cache;
mod error;
mod storage;
mod trie;

pub use cache::{CacheNameIterator, NameCache, NameIterator};
pub use error::Error;
pub use storage::{NameDb, NameView};
pub use trie::UnoTrie;

use std::sync::atomic::{AtomicBool, Ordering};

/// Result type for name-state operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Key tags of the name keyspace. Every key is the tag byte followed by
/// the payload; expire-index payloads sort by `(height, name)`.
pub(crate) mod db_keys {
    /// Name record. Payload: name bytes. Value: encoded `NameData`.
    pub const NAME: u8 = b'n';

    /// Name history. Payload: name bytes. Value: encoded `NameHistory`.
    pub const NAME_HISTORY: u8 = b'h';

    /// Expire index. Payload: encoded `ExpireEntry`. Value: empty.
    pub const NAME_EXPIRY: u8 = b'x';
}

static NAME_HISTORY: AtomicBool = AtomicBool::new(false);

/// Turn history tracking on or off.
///
/// Read once at startup from the node configuration; flipping it while
/// the node runs is not supported.
pub fn set_name_history(enabled: bool) {
    NAME_HISTORY.store(enabled, Ordering::Relaxed);
}

/// Whether history tracking is enabled for this process.
pub fn name_history_enabled() -> bool {
    NAME_HISTORY.load(Ordering::Relaxed)
}
