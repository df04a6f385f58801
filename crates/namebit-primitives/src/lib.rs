//! Core types of the Namebit name registry.
//!
//! A registered name is an arbitrary byte string bound to a [`NameData`]
//! record: the current value, the height the binding was last confirmed at,
//! the funding outpoint and the recipient script. Bindings expire a
//! height-dependent number of blocks after their last update; the policy
//! itself lives with the caller and is passed in as a function of the
//! binding height.
//!
//! All records use Bitcoin consensus serialization
//! ([`bitcoin::consensus::encode`]) so that the same bytes flow through the
//! database, the UNO trie commitment and the wire.

use bitcoin::consensus::encode::{self, Decodable, Encodable, VarInt};
use bitcoin::io;
use bitcoin::{OutPoint, ScriptBuf};

/// A registered name: an arbitrary, possibly empty byte string.
///
/// Names compare lexicographically as raw bytes everywhere (database keys,
/// cache maps, trie paths).
pub type Name = Vec<u8>;

/// Consensus limit on the length of a name.
pub const MAX_NAME_LENGTH: usize = 255;

/// Consensus limit on the length of a value.
pub const MAX_VALUE_LENGTH: usize = 520;

/// Render a name for log and error messages.
///
/// Printable names are quoted verbatim, anything else is hex encoded.
pub fn display_name(name: &[u8]) -> String {
    if !name.is_empty() && name.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        format!("'{}'", String::from_utf8_lossy(name))
    } else {
        format!("0x{}", hex::encode(name))
    }
}

/// Data bound to a registered name.
///
/// The record is immutable once inserted; updating a name replaces the
/// whole record with a fresh height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameData {
    /// Current value of the name.
    pub value: Vec<u8>,
    /// Block height at which this binding was created or last updated.
    pub height: u32,
    /// Transaction output that funds the binding.
    pub prevout: OutPoint,
    /// Script of the current recipient.
    pub addr: ScriptBuf,
}

impl NameData {
    /// Create a record from its parts.
    pub fn new(value: Vec<u8>, height: u32, prevout: OutPoint, addr: ScriptBuf) -> Self {
        Self {
            value,
            height,
            prevout,
            addr,
        }
    }

    /// Whether the binding is expired at `chain_height`.
    ///
    /// `expiration_depth` maps the binding height to the number of blocks
    /// the binding stays alive; the policy is decided by the chain rules,
    /// not here.
    pub fn is_expired(&self, chain_height: u32, expiration_depth: impl Fn(u32) -> u32) -> bool {
        chain_height >= self.height.saturating_add(expiration_depth(self.height))
    }
}

impl Encodable for NameData {
    fn consensus_encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = 0;
        len += self.value.consensus_encode(writer)?;
        len += self.height.consensus_encode(writer)?;
        len += self.prevout.consensus_encode(writer)?;
        len += self.addr.consensus_encode(writer)?;
        Ok(len)
    }
}

impl Decodable for NameData {
    fn consensus_decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, encode::Error> {
        Ok(Self {
            value: Decodable::consensus_decode(reader)?,
            height: Decodable::consensus_decode(reader)?,
            prevout: Decodable::consensus_decode(reader)?,
            addr: Decodable::consensus_decode(reader)?,
        })
    }
}

/// Past values of a name, oldest first.
///
/// An empty history is meaningful: written to a cache it requests the
/// erasure of the stored history record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameHistory(Vec<NameData>);

impl NameHistory {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Append the record a new update replaced.
    pub fn push(&mut self, data: NameData) {
        self.0.push(data);
    }

    /// Drop and return the most recent record, used when a block is
    /// disconnected.
    pub fn pop(&mut self) -> Option<NameData> {
        self.0.pop()
    }

    pub fn entries(&self) -> &[NameData] {
        &self.0
    }
}

impl From<Vec<NameData>> for NameHistory {
    fn from(entries: Vec<NameData>) -> Self {
        Self(entries)
    }
}

impl Encodable for NameHistory {
    fn consensus_encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = VarInt::from(self.0.len()).consensus_encode(writer)?;
        for entry in &self.0 {
            len += entry.consensus_encode(writer)?;
        }
        Ok(len)
    }
}

impl Decodable for NameHistory {
    fn consensus_decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, encode::Error> {
        let count = VarInt::consensus_decode(reader)?.0;
        let mut entries = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            entries.push(NameData::consensus_decode(reader)?);
        }
        Ok(Self(entries))
    }
}

/// Entry of the expiration index: a name keyed by the height its current
/// binding was confirmed at. Scans for names expiring at some chain
/// height look up the binding height the expiration depth maps back to.
///
/// Entries order by `(height, name)`, which the index key encoding
/// preserves so that all names recorded for one height form a contiguous
/// key range.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExpireEntry {
    pub height: u32,
    pub name: Name,
}

impl ExpireEntry {
    pub fn new(height: u32, name: Name) -> Self {
        Self { height, name }
    }

    /// Index key payload: big-endian height followed by the raw name bytes.
    ///
    /// Byte-wise comparison of two payloads matches the `(height, name)`
    /// ordering of the entries themselves.
    pub fn to_index_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(4 + self.name.len());
        key.extend_from_slice(&self.height.to_be_bytes());
        key.extend_from_slice(&self.name);
        key
    }

    /// Parse an index key payload; the name runs to the end of the key.
    pub fn from_index_key(bytes: &[u8]) -> Result<Self, encode::Error> {
        if bytes.len() < 4 {
            return Err(encode::Error::ParseFailed("truncated expire-index key"));
        }
        let (height_bytes, name) = bytes.split_at(4);
        let height = u32::from_be_bytes(
            height_bytes
                .try_into()
                .expect("split_at(4) yields four bytes; qed"),
        );
        Ok(Self {
            height,
            name: name.to_vec(),
        })
    }
}
