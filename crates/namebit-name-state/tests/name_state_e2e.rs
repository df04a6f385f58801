//! End-to-end exercise of the name-state stack: cache tiers over the
//! RocksDB-backed database, the attached UNO trie kept current across
//! flushes, the expire index, history records and the final validation
//! scan.

use bitcoin::hashes::Hash;
use bitcoin::{OutPoint, PubkeyHash, ScriptBuf, Txid};
use namebit_name_state::{NameCache, NameDb, NameView, UnoTrie};
use namebit_primitives::{Name, NameData, NameHistory};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::AtomicBool;

/// Expiration policy used throughout: a flat thousand blocks.
const EXPIRE_DEPTH: u32 = 1_000;

fn expiration_depth(_height: u32) -> u32 {
    EXPIRE_DEPTH
}

fn test_data(counter: u32) -> NameData {
    NameData::new(
        format!("value-{counter}").into_bytes(),
        counter,
        OutPoint {
            txid: Txid::from_byte_array([counter as u8; 32]),
            vout: counter,
        },
        ScriptBuf::new_p2pkh(&PubkeyHash::all_zeros()),
    )
}

/// Drives the database with per-step caches while mirroring the expected
/// state in plain maps.
///
/// Every step flushes its own small cache (keeping the attached trie
/// current incrementally) and also merges it into a long-running session
/// cache, which at the end must replay into a second database with the
/// same result.
struct Harness {
    counter: u32,
    names: BTreeMap<Name, NameData>,
    histories: BTreeMap<Name, NameHistory>,
    db: NameDb,
    session: NameCache,
    _dir: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = NameDb::open(dir.path()).unwrap();
        db.build_uno_trie(false).unwrap();
        Self {
            counter: 0,
            names: BTreeMap::new(),
            histories: BTreeMap::new(),
            db,
            session: NameCache::new(),
            _dir: dir,
        }
    }

    fn next_data(&mut self) -> NameData {
        self.counter += 1;
        test_data(self.counter)
    }

    fn commit(&mut self, step: NameCache) {
        step.apply_to_cache(&mut self.session);
        self.db.flush_cache(&step).unwrap();
        self.check_state();
    }

    fn add(&mut self, name: &str) {
        let data = self.next_data();
        let name = name.as_bytes().to_vec();
        assert!(self.names.insert(name.clone(), data.clone()).is_none());

        let mut step = NameCache::new();
        step.add_expire_index(&name, data.height);
        step.set(&name, data);
        self.commit(step);
    }

    fn update(&mut self, name: &str) {
        let data = self.next_data();
        let name = name.as_bytes().to_vec();
        let old = self
            .names
            .insert(name.clone(), data.clone())
            .expect("update of missing name");

        let mut history = self.histories.remove(&name).unwrap_or_default();
        history.push(old.clone());
        self.histories.insert(name.clone(), history.clone());

        let mut step = NameCache::new();
        step.remove_expire_index(&name, old.height);
        step.add_expire_index(&name, data.height);
        step.set(&name, data);
        step.set_history(&name, history);
        self.commit(step);
    }

    fn delete(&mut self, name: &str) {
        let name = name.as_bytes().to_vec();
        let old = self.names.remove(&name).expect("delete of missing name");
        self.histories.remove(&name);

        let mut step = NameCache::new();
        step.remove_expire_index(&name, old.height);
        step.remove(&name);
        step.set_history(&name, NameHistory::new());
        self.commit(step);
    }

    fn check_state(&self) {
        // The incrementally maintained trie matches a fresh build of the
        // expected mapping.
        self.db.check_uno_trie().unwrap();
        let reference = UnoTrie::from_names(self.names.clone(), false);
        assert_eq!(self.db.uno_root_hash(), Some(reference.root_hash()));

        // Point reads and the ordered enumeration agree with the model.
        for (name, data) in &self.names {
            assert_eq!(self.db.get_name(name).as_ref(), Some(data));
        }
        let mut iter = self.db.iterate_names();
        let mut stored = Vec::new();
        while let Some(record) = iter.next() {
            stored.push(record);
        }
        let expected: Vec<_> = self
            .names
            .iter()
            .map(|(name, data)| (name.clone(), data.clone()))
            .collect();
        assert_eq!(stored, expected);

        // The expire index partitions the names by their binding height;
        // expiration scans derive their height from it and the depth.
        let mut by_height: BTreeMap<u32, BTreeSet<Name>> = BTreeMap::new();
        for (name, data) in &self.names {
            by_height
                .entry(data.height)
                .or_default()
                .insert(name.clone());
        }
        for (height, names) in &by_height {
            assert_eq!(&self.db.get_names_for_height(*height).unwrap(), names);
        }

        // History records exist exactly for the names the model tracks.
        for (name, history) in &self.histories {
            assert_eq!(self.db.get_name_history(name).as_ref(), Some(history));
        }
    }
}

#[test]
fn cache_tiers_over_database() {
    namebit_name_state::set_name_history(true);
    let mut h = Harness::new();

    h.add("foobar");
    h.update("foobar");
    h.delete("foobar");

    h.add("ab");
    h.add("abcd");
    h.update("abcd");
    h.delete("abcd");
    h.add("abcd");
    h.add("abef");
    h.delete("abef");
    h.delete("ab");

    for i in 0..=5 {
        h.add(&"x".repeat(i));
    }
    for i in (0..=5).rev() {
        h.delete(&"x".repeat(i));
    }

    h.add("name/one");
    h.add("name/two");
    h.update("name/one");
    h.add("d/registrar");

    // A pending overlay cache reads merged with the database without
    // being flushed.
    let mut overlay = NameCache::new();
    overlay.set(b"name/three", test_data(900));
    overlay.remove(b"name/two");
    let mut merged = overlay.iterate_names(h.db.iterate_names());
    let mut seen = Vec::new();
    while let Some((name, _)) = merged.next() {
        seen.push(name);
    }
    assert_eq!(
        seen,
        vec![
            b"abcd".to_vec(),
            b"d/registrar".to_vec(),
            b"name/one".to_vec(),
            b"name/three".to_vec(),
        ]
    );
    drop(merged);

    // The whole keyspace cross-checks cleanly: every unexpired name is
    // backed by a live name output and the indexes agree.
    let utxo_names: BTreeSet<Name> = h.names.keys().cloned().collect();
    let interrupt = AtomicBool::new(false);
    h.db
        .validate_name_db(0, expiration_depth, &utxo_names, &interrupt)
        .unwrap();

    // Replaying the accumulated session cache into a fresh database
    // reproduces the same name set and the same commitment.
    let dir = tempfile::tempdir().unwrap();
    let replay_db = NameDb::open(dir.path()).unwrap();
    replay_db.flush_cache(&h.session).unwrap();
    replay_db.build_uno_trie(false).unwrap();
    assert_eq!(replay_db.uno_root_hash(), h.db.uno_root_hash());

    let mut iter = replay_db.iterate_names();
    let mut replayed = Vec::new();
    while let Some((name, _)) = iter.next() {
        replayed.push(name);
    }
    let expected: Vec<_> = h.names.keys().cloned().collect();
    assert_eq!(replayed, expected);
}

#[test]
fn expanded_and_unexpanded_database_tries_agree() {
    namebit_name_state::set_name_history(true);
    let dir = tempfile::tempdir().unwrap();
    let db = NameDb::open(dir.path()).unwrap();

    let mut cache = NameCache::new();
    for (i, name) in ["wiki", "wikipedia", "wild", "w", ""].iter().enumerate() {
        cache.set(name.as_bytes(), test_data(i as u32));
    }
    db.flush_cache(&cache).unwrap();

    db.build_uno_trie(true).unwrap();
    db.check_uno_trie().unwrap();
    let expanded = db.uno_root_hash().unwrap();

    db.build_uno_trie(false).unwrap();
    db.check_uno_trie().unwrap();
    let unexpanded = db.uno_root_hash().unwrap();

    assert_eq!(expanded, unexpanded);
}
