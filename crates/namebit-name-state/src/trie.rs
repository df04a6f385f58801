//! The UNO (unspent name output) trie.
//!
//! A byte-keyed trie over every currently registered name; its root hash
//! commits the full name set, deterministically enough to go into block
//! headers. The trie exists in two shapes of the same mapping:
//!
//! - *expanded*: one node per key byte, every node prefix empty;
//! - *unexpanded*: path-compressed, chains of data-less single-child
//!   nodes folded into the child edge's `prefix`.
//!
//! Both shapes produce the same root hash. The hash is defined over the
//! expanded shape; the unexpanded form recovers it by folding its prefix
//! bytes back into per-byte edge nodes while hashing.
//!
//! The root is exempt from the structural rules that bind inner nodes: it
//! may be an empty leaf (the empty trie) and it may be a pure edge (a
//! single name), and it is never collapsed into a prefix.

use bitcoin::consensus::encode::{self, Decodable, Encodable, VarInt};
use bitcoin::hashes::{sha256d, Hash, HashEngine};
use bitcoin::io;
use namebit_primitives::{display_name, NameData, MAX_NAME_LENGTH};
use std::collections::BTreeMap;

use crate::{Error, Result};

/// Node flag: the node binds a name (carries data).
const FLAG_DATA: u8 = 1 << 0;
/// Node flag: the node carries a compressed prefix.
const FLAG_PREFIX: u8 = 1 << 1;

/// Serialized tries nest at most one node per key byte in expanded form;
/// anything deeper than twice the name cap is malformed.
const MAX_DECODE_DEPTH: usize = 2 * MAX_NAME_LENGTH;

/// Node of the UNO trie, owning its whole subtree.
///
/// The key of a binding is spelled by the path from the root: for each
/// hop, the child's index byte followed by the child's `prefix`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnoTrie {
    /// Key bytes consumed along the incoming edge. Always empty at the
    /// root and on every node of an expanded trie.
    prefix: Vec<u8>,
    /// Binding for the key spelled by the path to this node, if any.
    data: Option<NameData>,
    /// Subtries indexed by their next key byte. Ordered enumeration is
    /// consensus-critical for hashing and serialization.
    children: BTreeMap<u8, UnoTrie>,
}

impl UnoTrie {
    /// Create an empty trie.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the trie holds no bindings at all.
    pub fn is_empty(&self) -> bool {
        self.data.is_none() && self.children.is_empty()
    }

    /// Build a trie from an enumeration of bindings.
    pub fn from_names<I>(names: I, expanded: bool) -> Self
    where
        I: IntoIterator<Item = (Vec<u8>, NameData)>,
    {
        let mut trie = Self::new();
        for (name, data) in names {
            trie.set(&name, data, expanded);
        }
        trie
    }

    /// Insert or overwrite the binding for `key`.
    ///
    /// Leaves the trie in valid form for the chosen representation; the
    /// two representations differ only in how missing suffixes
    /// materialize (a chain of one-byte nodes vs. a single compressed
    /// edge).
    pub fn set(&mut self, key: &[u8], data: NameData, expanded: bool) {
        let common = common_prefix(&self.prefix, key);
        if common < self.prefix.len() {
            self.split(common);
        }
        let rest = &key[common..];
        let Some((&next, tail)) = rest.split_first() else {
            self.data = Some(data);
            return;
        };
        match self.children.get_mut(&next) {
            Some(child) => child.set(tail, data, expanded),
            None => {
                let mut child = UnoTrie::new();
                if expanded {
                    child.set(tail, data, true);
                } else {
                    child.prefix = tail.to_vec();
                    child.data = Some(data);
                }
                self.children.insert(next, child);
            }
        }
    }

    /// Remove the binding for `key`.
    ///
    /// Fails if the key has no binding. Restores the structural
    /// invariants on the way back up: empty leaves are pruned and, in
    /// unexpanded form, nodes left as pure edges are collapsed. The root
    /// is never collapsed.
    pub fn delete(&mut self, key: &[u8], expanded: bool) -> Result<()> {
        if self.delete_at(key, expanded, true) {
            Ok(())
        } else {
            Err(Error::NameNotFound(display_name(key)))
        }
    }

    fn delete_at(&mut self, key: &[u8], expanded: bool, is_root: bool) -> bool {
        let Some(rest) = key.strip_prefix(self.prefix.as_slice()) else {
            return false;
        };
        match rest.split_first() {
            None => {
                if self.data.take().is_none() {
                    return false;
                }
            }
            Some((&next, tail)) => {
                let Some(child) = self.children.get_mut(&next) else {
                    return false;
                };
                if !child.delete_at(tail, expanded, false) {
                    return false;
                }
                if child.is_empty() {
                    self.children.remove(&next);
                }
            }
        }
        if !is_root && !expanded {
            self.collapse_pure_edge();
        }
        true
    }

    /// Hand this node's content (minus the first `keep` prefix bytes) to
    /// a fresh child, so the key range can branch at `prefix[keep]`.
    fn split(&mut self, keep: usize) {
        let mut tail = self.prefix.split_off(keep);
        let branch = tail.remove(0);
        let child = UnoTrie {
            prefix: tail,
            data: self.data.take(),
            children: std::mem::take(&mut self.children),
        };
        self.children.insert(branch, child);
    }

    /// Fold a data-less single-child node into one edge, the inverse of
    /// [`Self::split`]. No-op unless the node is a pure edge.
    fn collapse_pure_edge(&mut self) {
        if self.data.is_none() && self.children.len() == 1 {
            if let Some((branch, child)) = self.children.pop_first() {
                self.prefix.push(branch);
                self.prefix.extend_from_slice(&child.prefix);
                self.data = child.data;
                self.children = child.children;
            }
        }
    }

    /// Root hash of this node's subtree.
    ///
    /// Defined over the expanded shape: the node's flags, its data and
    /// its children's `(byte, hash)` pairs are hashed, then the prefix is
    /// folded back byte by byte in reverse, each step hashing a synthetic
    /// data-less one-child edge node. An unexpanded trie therefore
    /// commits to exactly the bytes its expanded equivalent would.
    pub fn root_hash(&self) -> sha256d::Hash {
        let mut engine = sha256d::Hash::engine();
        let mut flags = 0u8;
        if self.data.is_some() {
            flags |= FLAG_DATA;
        }
        engine.input(&[flags]);
        if let Some(data) = &self.data {
            engine.input(&encode::serialize(data));
        }
        input_compact_size(&mut engine, self.children.len() as u64);
        for (&byte, child) in &self.children {
            engine.input(&[byte]);
            engine.input(child.root_hash().as_byte_array());
        }
        let mut hash = sha256d::Hash::from_engine(engine);

        for &byte in self.prefix.iter().rev() {
            let mut engine = sha256d::Hash::engine();
            engine.input(&[0u8]);
            input_compact_size(&mut engine, 1);
            engine.input(&[byte]);
            engine.input(hash.as_byte_array());
            hash = sha256d::Hash::from_engine(engine);
        }
        hash
    }

    /// Audit the structural invariants of the chosen representation.
    ///
    /// Returns the first violation found: a prefix where none is allowed,
    /// an empty leaf below the root, or (unexpanded) a pure edge below
    /// the root.
    pub fn check(&self, is_root: bool, expanded: bool) -> Result<()> {
        if is_root {
            if !self.prefix.is_empty() {
                return Err(Error::UnexpectedPrefix("prefix on the root node"));
            }
        } else {
            if expanded && !self.prefix.is_empty() {
                return Err(Error::UnexpectedPrefix("prefix in an expanded trie"));
            }
            if self.is_empty() {
                return Err(Error::EmptyLeaf);
            }
            if !expanded && self.data.is_none() && self.children.len() == 1 {
                return Err(Error::PureEdge);
            }
        }
        for child in self.children.values() {
            child.check(false, expanded)?;
        }
        Ok(())
    }

    fn decode_at_depth<R: io::BufRead + ?Sized>(
        reader: &mut R,
        depth: usize,
    ) -> std::result::Result<Self, encode::Error> {
        if depth > MAX_DECODE_DEPTH {
            return Err(encode::Error::ParseFailed("UNO trie nested too deeply"));
        }
        let flags = u8::consensus_decode(reader)?;
        if flags & !(FLAG_DATA | FLAG_PREFIX) != 0 {
            return Err(encode::Error::ParseFailed("unknown UNO trie node flags"));
        }
        let prefix = if flags & FLAG_PREFIX != 0 {
            Vec::<u8>::consensus_decode(reader)?
        } else {
            Vec::new()
        };
        let data = if flags & FLAG_DATA != 0 {
            Some(NameData::consensus_decode(reader)?)
        } else {
            None
        };
        let child_count = VarInt::consensus_decode(reader)?.0;
        let mut children = BTreeMap::new();
        for _ in 0..child_count {
            let byte = u8::consensus_decode(reader)?;
            let child = Self::decode_at_depth(reader, depth + 1)?;
            if children.insert(byte, child).is_some() {
                return Err(encode::Error::ParseFailed(
                    "duplicate child byte in UNO trie node",
                ));
            }
        }
        Ok(Self {
            prefix,
            data,
            children,
        })
    }
}

impl Encodable for UnoTrie {
    fn consensus_encode<W: io::Write + ?Sized>(
        &self,
        writer: &mut W,
    ) -> std::result::Result<usize, io::Error> {
        let mut len = 0;
        let mut flags = 0u8;
        if self.data.is_some() {
            flags |= FLAG_DATA;
        }
        if !self.prefix.is_empty() {
            flags |= FLAG_PREFIX;
        }
        len += flags.consensus_encode(writer)?;
        if !self.prefix.is_empty() {
            len += self.prefix.consensus_encode(writer)?;
        }
        if let Some(data) = &self.data {
            len += data.consensus_encode(writer)?;
        }
        len += VarInt::from(self.children.len()).consensus_encode(writer)?;
        for (&byte, child) in &self.children {
            len += byte.consensus_encode(writer)?;
            len += child.consensus_encode(writer)?;
        }
        Ok(len)
    }
}

impl Decodable for UnoTrie {
    fn consensus_decode<R: io::BufRead + ?Sized>(
        reader: &mut R,
    ) -> std::result::Result<Self, encode::Error> {
        Self::decode_at_depth(reader, 0)
    }
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Feed a Bitcoin compact-size into a hash engine.
fn input_compact_size(engine: &mut sha256d::HashEngine, size: u64) {
    if size < 253 {
        engine.input(&[size as u8]);
    } else if size <= 0xFFFF {
        engine.input(&[253]);
        engine.input(&(size as u16).to_le_bytes());
    } else if size <= 0xFFFF_FFFF {
        engine.input(&[254]);
        engine.input(&(size as u32).to_le_bytes());
    } else {
        engine.input(&[255]);
        engine.input(&size.to_le_bytes());
    }
}
