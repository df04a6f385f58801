//! RocksDB-backed name database.
//!
//! Keys are a tag byte followed by the payload (see [`crate::db_keys`]);
//! keeping all three name keyspaces in one ordered keyspace lets the
//! expiry index range-scan per height and lets [`NameDb::validate_name_db`]
//! audit everything in a single pass.
//!
//! The database can carry an in-memory UNO trie of its current name set.
//! While one is built, every flushed cache is also applied to it, so the
//! commitment stays current without rebuilding.

use bitcoin::consensus::encode;
use bitcoin::hashes::sha256d;
use namebit_primitives::{display_name, ExpireEntry, Name, NameData, NameHistory};
use parking_lot::RwLock;
use rocksdb::{Options, WriteBatch, DB};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::cache::{NameCache, NameIterator};
use crate::trie::UnoTrie;
use crate::{db_keys, Error, Result};

fn name_key(name: &[u8]) -> Vec<u8> {
    tagged_key(db_keys::NAME, name)
}

fn history_key(name: &[u8]) -> Vec<u8> {
    tagged_key(db_keys::NAME_HISTORY, name)
}

fn expiry_key(entry: &ExpireEntry) -> Vec<u8> {
    tagged_key(db_keys::NAME_EXPIRY, &entry.to_index_key())
}

fn tagged_key(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + payload.len());
    key.push(tag);
    key.extend_from_slice(payload);
    key
}

/// Read contract of the persistent name store, the view the cache tiers
/// bottom out in.
pub trait NameView {
    /// Look up the current binding of `name`.
    fn get_name(&self, name: &[u8]) -> Option<NameData>;

    /// Look up the stored history of `name`.
    ///
    /// History tracking must be enabled; calling this without it is a
    /// programmer error and aborts.
    fn get_name_history(&self, name: &[u8]) -> Option<NameHistory>;

    /// All names whose current binding sits at `height` in the expire
    /// index. Expiration processing queries the height the expiration
    /// depth maps the current chain height back to.
    fn get_names_for_height(&self, height: u32) -> Result<BTreeSet<Name>>;

    /// Enumerate all name records in ascending name order.
    fn iterate_names(&self) -> Box<dyn NameIterator + '_>;
}

struct AttachedTrie {
    trie: UnoTrie,
    expanded: bool,
}

/// The name database at the chain tip.
pub struct NameDb {
    db: DB,
    /// UNO trie of the stored name set, if one has been built.
    uno_trie: RwLock<Option<AttachedTrie>>,
}

impl NameDb {
    /// Open or create the name database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);

        // Name records are small and read-heavy
        db_opts.set_write_buffer_size(64 * 1024 * 1024);
        db_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        db_opts.set_block_based_table_factory(&block_opts);

        let db = DB::open(&db_opts, path)?;
        tracing::info!("Opened name database at {}", path.display());

        Ok(Self {
            db,
            uno_trie: RwLock::new(None),
        })
    }

    /// Commit a prepared batch atomically.
    pub fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db.write(batch)?;
        Ok(())
    }

    /// Flush a consumed cache: one atomic batch to disk, plus incremental
    /// updates to the attached UNO trie if one is built.
    pub fn flush_cache(&self, cache: &NameCache) -> Result<()> {
        let mut batch = WriteBatch::default();
        cache.write_batch(&mut batch);
        self.db.write(batch)?;

        let mut attached = self.uno_trie.write();
        if let Some(attached) = attached.as_mut() {
            cache.apply_to_trie(&mut attached.trie, attached.expanded);
        }

        tracing::debug!(
            "Flushed name cache: {} updates, {} deletions, {} expire-index flips",
            cache.entries.len(),
            cache.deleted.len(),
            cache.expire_index.len(),
        );
        Ok(())
    }

    /// Build the UNO trie of the stored name set and attach it; later
    /// flushes keep it current.
    pub fn build_uno_trie(&self, expanded: bool) -> Result<()> {
        let mut trie = UnoTrie::new();
        let mut iter = self.iterate_names();
        let mut count = 0usize;
        while let Some((name, data)) = iter.next() {
            trie.set(&name, data, expanded);
            count += 1;
        }
        *self.uno_trie.write() = Some(AttachedTrie { trie, expanded });
        tracing::info!("Built UNO trie over {count} names");
        Ok(())
    }

    /// Whether a UNO trie is currently attached.
    pub fn has_uno_trie(&self) -> bool {
        self.uno_trie.read().is_some()
    }

    /// Root hash of the attached trie, if one is built.
    pub fn uno_root_hash(&self) -> Option<sha256d::Hash> {
        self.uno_trie
            .read()
            .as_ref()
            .map(|attached| attached.trie.root_hash())
    }

    /// Audit the attached trie's structure.
    ///
    /// A trie must be attached; checking without one is a programmer
    /// error and aborts.
    pub fn check_uno_trie(&self) -> Result<()> {
        let attached = self.uno_trie.read();
        let attached = attached
            .as_ref()
            .expect("check_uno_trie called without a built UNO trie; qed");
        attached.trie.check(true, attached.expanded)
    }

    /// Drop the attached trie.
    pub fn clear_uno_trie(&self) {
        *self.uno_trie.write() = None;
    }

    /// Cross-check the whole name keyspace in one scan.
    ///
    /// `utxo_names` is the set of names with a live name output in the
    /// UTXO set, collected by the caller; `depth_of` is the chain's
    /// expiration policy. Expiration is evaluated at `current_height + 1`
    /// to match the timing with which expired names leave the UTXO set.
    /// The scan polls `interrupt` between records and aborts with
    /// [`Error::Interrupted`] when it is raised. Read-only.
    pub fn validate_name_db(
        &self,
        current_height: u32,
        depth_of: impl Fn(u32) -> u32,
        utxo_names: &BTreeSet<Name>,
        interrupt: &AtomicBool,
    ) -> Result<()> {
        let history_enabled = crate::name_history_enabled();

        let mut name_heights_data: BTreeMap<Name, u32> = BTreeMap::new();
        let mut name_heights_index: BTreeMap<Name, u32> = BTreeMap::new();
        let mut names_in_db: BTreeSet<Name> = BTreeSet::new();
        let mut names_with_history: BTreeSet<Name> = BTreeSet::new();

        let mut iter = self.db.raw_iterator();
        iter.seek_to_first();
        while iter.valid() {
            if interrupt.load(Ordering::Relaxed) {
                return Err(Error::Interrupted);
            }
            let Some(key) = iter.key() else { break };
            match key.first().copied() {
                Some(db_keys::NAME) => {
                    let name = key[1..].to_vec();
                    let Some(value) = iter.value() else { break };
                    let data: NameData = encode::deserialize(value).map_err(|err| {
                        Error::Corruption(format!(
                            "undecodable record for name {}: {err}",
                            display_name(&name)
                        ))
                    })?;
                    if !data.is_expired(current_height.saturating_add(1), &depth_of) {
                        names_in_db.insert(name.clone());
                    }
                    name_heights_data.insert(name, data.height);
                }
                Some(db_keys::NAME_HISTORY) => {
                    let name = key[1..].to_vec();
                    if !history_enabled {
                        return Err(Error::Corruption(format!(
                            "history record for name {} with history tracking disabled",
                            display_name(&name)
                        )));
                    }
                    names_with_history.insert(name);
                }
                Some(db_keys::NAME_EXPIRY) => {
                    let entry = ExpireEntry::from_index_key(&key[1..])?;
                    if name_heights_index
                        .insert(entry.name.clone(), entry.height)
                        .is_some()
                    {
                        return Err(Error::Corruption(format!(
                            "name {} occurs twice in the expire index",
                            display_name(&entry.name)
                        )));
                    }
                }
                _ => {}
            }
            iter.next();
        }

        for (name, height) in &name_heights_data {
            match name_heights_index.get(name) {
                None => {
                    return Err(Error::Corruption(format!(
                        "name {} missing from the expire index",
                        display_name(name)
                    )))
                }
                Some(indexed) if indexed != height => {
                    return Err(Error::Corruption(format!(
                        "name {} indexed for height {indexed} but recorded at {height}",
                        display_name(name)
                    )))
                }
                Some(_) => {}
            }
        }
        for name in name_heights_index.keys() {
            if !name_heights_data.contains_key(name) {
                return Err(Error::Corruption(format!(
                    "expire index entry for unknown name {}",
                    display_name(name)
                )));
            }
        }

        for name in &names_in_db {
            if !utxo_names.contains(name) {
                return Err(Error::Corruption(format!(
                    "name {} in the database but not in the UTXO set",
                    display_name(name)
                )));
            }
        }
        for name in utxo_names {
            if !names_in_db.contains(name) {
                return Err(Error::Corruption(format!(
                    "name {} in the UTXO set but not in the database",
                    display_name(name)
                )));
            }
        }

        for name in &names_with_history {
            if !name_heights_data.contains_key(name) {
                return Err(Error::Corruption(format!(
                    "history record for unknown name {}",
                    display_name(name)
                )));
            }
        }

        tracing::info!(
            "Checked name database, {} unexpired names, {} total, {} with history",
            names_in_db.len(),
            name_heights_data.len(),
            names_with_history.len(),
        );
        Ok(())
    }
}

impl NameView for NameDb {
    fn get_name(&self, name: &[u8]) -> Option<NameData> {
        self.db
            .get(name_key(name))
            .ok()
            .flatten()
            .and_then(|bytes| encode::deserialize(&bytes).ok())
    }

    fn get_name_history(&self, name: &[u8]) -> Option<NameHistory> {
        assert!(
            crate::name_history_enabled(),
            "name history lookup with history tracking disabled"
        );
        self.db
            .get(history_key(name))
            .ok()
            .flatten()
            .and_then(|bytes| encode::deserialize(&bytes).ok())
    }

    fn get_names_for_height(&self, height: u32) -> Result<BTreeSet<Name>> {
        let mut names = BTreeSet::new();
        let mut iter = self.db.raw_iterator();
        iter.seek(expiry_key(&ExpireEntry::new(height, Name::new())));
        while iter.valid() {
            let Some(key) = iter.key() else { break };
            if key.first() != Some(&db_keys::NAME_EXPIRY) {
                break;
            }
            let entry = ExpireEntry::from_index_key(&key[1..])?;
            if entry.height > height {
                break;
            }
            if !names.insert(entry.name.clone()) {
                return Err(Error::Corruption(format!(
                    "duplicate name {} in the expire index",
                    display_name(&entry.name)
                )));
            }
            iter.next();
        }
        Ok(names)
    }

    fn iterate_names(&self) -> Box<dyn NameIterator + '_> {
        Box::new(DbNameIterator::new(&self.db))
    }
}

/// Enumerates the `'n'` keyspace in ascending name order.
struct DbNameIterator<'a> {
    iter: rocksdb::DBRawIterator<'a>,
}

impl<'a> DbNameIterator<'a> {
    fn new(db: &'a DB) -> Self {
        let mut iter = Self {
            iter: db.raw_iterator(),
        };
        iter.seek(&[]);
        iter
    }
}

impl NameIterator for DbNameIterator<'_> {
    fn seek(&mut self, start: &[u8]) {
        self.iter.seek(name_key(start));
    }

    fn next(&mut self) -> Option<(Name, NameData)> {
        if !self.iter.valid() {
            return None;
        }
        let key = self.iter.key()?;
        if key.first() != Some(&db_keys::NAME) {
            return None;
        }
        let name = key[1..].to_vec();
        let value = self.iter.value()?;
        let data = match encode::deserialize(value) {
            Ok(data) => data,
            Err(err) => {
                tracing::error!(
                    "Failed to decode record for name {}: {err}",
                    display_name(&name)
                );
                return None;
            }
        };
        self.iter.next();
        Some((name, data))
    }
}

impl NameCache {
    /// Emit this cache's deltas into a store batch.
    ///
    /// Updates become puts and tombstones become deletes in the `'n'`
    /// keyspace; history rewrites put or (when empty) delete the `'h'`
    /// record; expire-index flips put or delete the `'x'` entry. The
    /// batch commits atomically, so no ordering applies between the ops.
    pub fn write_batch(&self, batch: &mut WriteBatch) {
        for (name, data) in &self.entries {
            batch.put(name_key(name), encode::serialize(data));
        }
        for name in &self.deleted {
            batch.delete(name_key(name));
        }

        assert!(
            crate::name_history_enabled() || self.history.is_empty(),
            "history deltas recorded with history tracking disabled"
        );
        for (name, history) in &self.history {
            if history.is_empty() {
                batch.delete(history_key(name));
            } else {
                batch.put(history_key(name), encode::serialize(history));
            }
        }

        for (entry, add) in &self.expire_index {
            if *add {
                batch.put(expiry_key(entry), b"");
            } else {
                batch.delete(expiry_key(entry));
            }
        }
    }
}
