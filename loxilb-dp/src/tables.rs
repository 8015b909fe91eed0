//! Key-value tables shared by the packet path and the control plane. Each
//! entry sits behind its own lock so the packet path can update an entry
//! without blocking lookups on the rest of the table.

use log::warn;
use std::{
    collections::{BTreeMap, HashMap},
    hash::Hash,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
};
use thiserror::Error;

/// Create a new entry or update an existing one
pub const UPDATE_ANY: u64 = 0;
/// Create a new entry only if it does not exist
pub const UPDATE_NOEXIST: u64 = 1;
/// Update an existing entry
pub const UPDATE_EXIST: u64 = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("table {0} is full")]
    Full(&'static str),
    #[error("key already exists in {0}")]
    KeyExists(&'static str),
    #[error("key not found in {0}")]
    KeyNotFound(&'static str),
    #[error("invalid update flags {0}")]
    InvalidFlags(u64),
}

pub type Entry<V> = Arc<Mutex<V>>;

#[inline(always)]
pub fn lock<V>(m: &Mutex<V>) -> MutexGuard<'_, V> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(PoisonError::into_inner)
}

fn check_update(
    name: &'static str,
    exists: bool,
    len: usize,
    max_entries: u32,
    flags: u64,
) -> Result<(), TableError> {
    match flags {
        UPDATE_ANY => {}
        UPDATE_NOEXIST if exists => return Err(TableError::KeyExists(name)),
        UPDATE_NOEXIST => {}
        UPDATE_EXIST if !exists => return Err(TableError::KeyNotFound(name)),
        UPDATE_EXIST => {}
        _ => return Err(TableError::InvalidFlags(flags)),
    }
    if !exists && len >= max_entries as usize {
        return Err(TableError::Full(name));
    }
    Ok(())
}

/// Exact match table
pub struct Table<K, V> {
    name: &'static str,
    max_entries: u32,
    map: RwLock<HashMap<K, Entry<V>>>,
}

impl<K, V> Table<K, V>
where
    K: Eq + Hash + Copy,
{
    pub fn new(name: &'static str, max_entries: u32) -> Self {
        Self {
            name,
            max_entries,
            map: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn max_entries(&self) -> u32 {
        self.max_entries
    }

    pub fn len(&self) -> usize {
        read(&self.map).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the shared entry so the caller can update it in place
    pub fn get(&self, key: &K) -> Option<Entry<V>> {
        read(&self.map).get(key).cloned()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        read(&self.map).contains_key(key)
    }

    pub fn insert(&self, key: K, value: V, flags: u64) -> Result<(), TableError> {
        let mut map = write(&self.map);
        check_update(
            self.name,
            map.contains_key(&key),
            map.len(),
            self.max_entries,
            flags,
        )?;
        map.insert(key, Arc::new(Mutex::new(value)));
        Ok(())
    }

    /// Inserts two entries under one table lock, both or none. `keep` sees
    /// the values currently at both keys and returns true when they must
    /// stay, nothing is inserted then and `Ok(false)` is returned.
    pub fn insert_pair<F>(&self, a: (K, V), b: (K, V), keep: F) -> Result<bool, TableError>
    where
        F: FnOnce(Option<&V>, Option<&V>) -> bool,
    {
        let mut map = write(&self.map);
        {
            let same = a.0 == b.0;
            let va = map.get(&a.0).map(|e| lock(e));
            let vb = if same {
                None
            } else {
                map.get(&b.0).map(|e| lock(e))
            };
            let vb = if same { va.as_deref() } else { vb.as_deref() };
            if keep(va.as_deref(), vb) {
                return Ok(false);
            }
        }

        let mut new = usize::from(!map.contains_key(&a.0));
        if b.0 != a.0 && !map.contains_key(&b.0) {
            new += 1;
        }
        if map.len() + new > self.max_entries as usize {
            return Err(TableError::Full(self.name));
        }
        map.insert(a.0, Arc::new(Mutex::new(a.1)));
        map.insert(b.0, Arc::new(Mutex::new(b.1)));
        Ok(true)
    }

    pub fn remove(&self, key: &K) -> Result<(), TableError> {
        match write(&self.map).remove(key) {
            Some(_) => Ok(()),
            None => Err(TableError::KeyNotFound(self.name)),
        }
    }

    /// Removes the entries for which `pred` returns true and returns how
    /// many were removed
    pub fn delete_if<F>(&self, mut pred: F) -> usize
    where
        F: FnMut(&K, &V) -> bool,
    {
        let mut map = write(&self.map);
        let before = map.len();
        map.retain(|k, v| !pred(k, &lock(v)));
        before - map.len()
    }

    pub fn clear(&self) {
        write(&self.map).clear();
    }
}

impl<K, V> Table<K, V>
where
    K: Eq + Hash + Copy,
    V: Clone,
{
    /// Returns a copy of the value
    pub fn lookup(&self, key: &K) -> Option<V> {
        self.get(key).map(|e| lock(&e).clone())
    }

    /// Snapshot of all the entries
    pub fn entries(&self) -> Vec<(K, V)> {
        read(&self.map)
            .iter()
            .map(|(k, v)| (*k, lock(v).clone()))
            .collect()
    }
}

/// Longest prefix match table over keys of up to 64 bits. The prefix
/// lengths are counted from the most significant of the `key_bits` bits.
pub struct LpmTable<V> {
    name: &'static str,
    max_entries: u32,
    key_bits: u8,
    prefixes: RwLock<BTreeMap<u8, HashMap<u64, Entry<V>>>>,
}

impl<V> LpmTable<V> {
    pub fn new(name: &'static str, max_entries: u32, key_bits: u8) -> Self {
        Self {
            name,
            max_entries,
            key_bits: key_bits.min(64),
            prefixes: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn mask(&self, key: u64, plen: u8) -> u64 {
        let plen = plen.min(self.key_bits);
        if plen == 0 {
            return 0;
        }
        let width_mask = if self.key_bits == 64 {
            u64::MAX
        } else {
            (1_u64 << self.key_bits) - 1
        };
        let host_bits = u32::from(self.key_bits - plen);
        key & width_mask & !((1_u64 << host_bits) - 1)
    }

    pub fn len(&self) -> usize {
        read(&self.prefixes).values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(&self, key: u64, plen: u8, value: V, flags: u64) -> Result<(), TableError> {
        let plen = plen.min(self.key_bits);
        let key = self.mask(key, plen);
        let mut prefixes = write(&self.prefixes);
        let exists = prefixes
            .get(&plen)
            .map(|m| m.contains_key(&key))
            .unwrap_or(false);
        let len = prefixes.values().map(HashMap::len).sum();
        check_update(self.name, exists, len, self.max_entries, flags)?;
        prefixes
            .entry(plen)
            .or_default()
            .insert(key, Arc::new(Mutex::new(value)));
        Ok(())
    }

    pub fn remove(&self, key: u64, plen: u8) -> Result<(), TableError> {
        let plen = plen.min(self.key_bits);
        let key = self.mask(key, plen);
        let mut prefixes = write(&self.prefixes);
        let Some(m) = prefixes.get_mut(&plen) else {
            return Err(TableError::KeyNotFound(self.name));
        };
        if m.remove(&key).is_none() {
            return Err(TableError::KeyNotFound(self.name));
        }
        if m.is_empty() {
            prefixes.remove(&plen);
        }
        Ok(())
    }

    /// Returns the entry of the longest prefix covering `key`
    pub fn get(&self, key: u64) -> Option<Entry<V>> {
        let prefixes = read(&self.prefixes);
        prefixes
            .iter()
            .rev()
            .find_map(|(plen, m)| m.get(&self.mask(key, *plen)).cloned())
    }
}

impl<V: Clone> LpmTable<V> {
    pub fn lookup(&self, key: u64) -> Option<V> {
        self.get(key).map(|e| lock(&e).clone())
    }

    /// Snapshot of all the entries as (prefix, prefix length, value)
    pub fn entries(&self) -> Vec<(u64, u8, V)> {
        read(&self.prefixes)
            .iter()
            .flat_map(|(plen, m)| m.iter().map(|(k, v)| (*k, *plen, lock(v).clone())))
            .collect()
    }
}

/// Byte and packet counters of one stats index
#[derive(Debug, Default)]
pub struct PbCounters {
    bytes: AtomicU64,
    packets: AtomicU64,
    used: AtomicBool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PbStats {
    pub bytes: u64,
    pub packets: u64,
}

/// Counters indexed by the stats index (cidx) carried by table actions
pub struct StatsTable {
    name: &'static str,
    max_entries: u32,
    map: RwLock<HashMap<u32, Arc<PbCounters>>>,
}

impl StatsTable {
    pub fn new(name: &'static str, max_entries: u32) -> Self {
        Self {
            name,
            max_entries,
            map: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn inc(&self, idx: u32, bytes: u64) {
        let ctr = read(&self.map).get(&idx).cloned();
        let ctr = match ctr {
            Some(ctr) => ctr,
            None => {
                let mut map = write(&self.map);
                if !map.contains_key(&idx) && map.len() >= self.max_entries as usize {
                    warn!("[stat] {} full, idx {} not counted", self.name, idx);
                    return;
                }
                map.entry(idx).or_default().clone()
            }
        };
        ctr.bytes.fetch_add(bytes, Ordering::Relaxed);
        ctr.packets.fetch_add(1, Ordering::Relaxed);
        ctr.used.store(true, Ordering::Relaxed);
    }

    pub fn get(&self, idx: u32) -> Option<PbStats> {
        read(&self.map).get(&idx).map(|c| PbStats {
            bytes: c.bytes.load(Ordering::Relaxed),
            packets: c.packets.load(Ordering::Relaxed),
        })
    }

    /// Returns true if the counters were updated since the last call that
    /// cleared the used mark
    pub fn fetch_used(&self, idx: u32, clear: bool) -> bool {
        match read(&self.map).get(&idx) {
            Some(c) if clear => c.used.swap(false, Ordering::Relaxed),
            Some(c) => c.used.load(Ordering::Relaxed),
            None => false,
        }
    }

    pub fn clear(&self, idx: u32) {
        write(&self.map).remove(&idx);
    }

    pub fn entries(&self) -> Vec<(u32, PbStats)> {
        let mut v: Vec<_> = read(&self.map)
            .iter()
            .map(|(idx, c)| {
                (
                    *idx,
                    PbStats {
                        bytes: c.bytes.load(Ordering::Relaxed),
                        packets: c.packets.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();
        v.sort_by_key(|(idx, _)| *idx);
        v
    }
}
