//! Open-addressed hash table substrate.
//!
//! Linear probing, power-of-two capacity, tombstones. Grows at load factor 3/4,
//! shrinks at 1/4, minimum capacity 8. Mirrors `original_source/src/runtime/hashmap.c`:
//! a vector of buckets instead of a raw `calloc`'d array, `Hash`/`Eq` instead of
//! function-pointer parameters. Two hash functions are provided, matching the source's
//! `pointer_hash` (FNV-style byte mix) and `string_hash` (Jenkins one-at-a-time):
//! maps keyed by pointer identity pick [`FnvHasher`] as their `H`, maps keyed by byte
//! strings use the default [`JenkinsHasher`].

use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem;
use std::rc::Rc;

const MIN_CAPACITY: usize = 8;

/// Wraps an `Rc<T>` so `Hash`/`Eq` compare pointer identity rather than value equality —
/// this is how the substrate's typed views (`SymMap`, `InstanceMap`, ...) realise the
/// source's pointer-identity keys without function-pointer hash/eq parameters.
#[derive(Debug)]
pub struct ByAddress<T: ?Sized>(pub Rc<T>);

impl<T: ?Sized> Clone for ByAddress<T> {
    fn clone(&self) -> Self {
        ByAddress(Rc::clone(&self.0))
    }
}

impl<T: ?Sized> PartialEq for ByAddress<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: ?Sized> Eq for ByAddress<T> {}

impl<T: ?Sized> Hash for ByAddress<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Rc::as_ptr(&self.0) as *const () as usize).hash(state)
    }
}

#[derive(Clone)]
struct Bucket<K, V> {
    hash: u64,
    defined: bool,
    deleted: bool,
    key: Option<K>,
    value: Option<V>,
}

impl<K, V> Bucket<K, V> {
    fn empty() -> Self {
        Bucket {
            hash: 0,
            defined: false,
            deleted: false,
            key: None,
            value: None,
        }
    }
}

/// A Jenkins one-at-a-time style mix, used as the default hasher for byte-string-ish
/// keys the same way `original_source/src/runtime/hashmap.c::string_hash` does.
pub struct JenkinsHasher(u64);

impl JenkinsHasher {
    pub fn new() -> Self {
        JenkinsHasher(0)
    }
}

impl Default for JenkinsHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for JenkinsHasher {
    fn write(&mut self, bytes: &[u8]) {
        let mut hash = self.0;
        for &b in bytes {
            hash = hash.wrapping_add(b as u64);
            hash = hash.wrapping_add(hash << 10);
            hash ^= hash >> 6;
        }
        self.0 = hash;
    }

    fn finish(&self) -> u64 {
        let mut hash = self.0;
        hash = hash.wrapping_add(hash << 3);
        hash = hash.wrapping_add(hash << 11);
        hash ^= hash >> 15;
        hash
    }
}

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// An FNV-style byte mix (`hash = (hash * FNV_PRIME) ^ byte`), used for pointer-identity
/// keys the same way `original_source/src/runtime/hashmap.c::pointer_hash` and the
/// `HASH_ADD_PTR`/`HASH_ADD_BYTE` macros in `hashmap.h` do. A composite pointer key (a
/// method's symbol plus its parameter tuple) folds each constituent pointer through the
/// same running hasher rather than combining independently hashed parts.
pub struct FnvHasher(u64);

impl FnvHasher {
    pub fn new() -> Self {
        FnvHasher(FNV_OFFSET_BASIS)
    }
}

impl Default for FnvHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for FnvHasher {
    fn write(&mut self, bytes: &[u8]) {
        let mut hash = self.0;
        for &b in bytes {
            hash = hash.wrapping_mul(FNV_PRIME) ^ (b as u64);
        }
        self.0 = hash;
    }

    fn finish(&self) -> u64 {
        self.0
    }
}

fn hash_key<K: Hash, H: Hasher + Default>(k: &K) -> u64 {
    let mut h = H::default();
    k.hash(&mut h);
    h.finish()
}

/// The open-addressed map itself, parameterised by the hasher `H` its keys should use:
/// [`FnvHasher`] for pointer-identity keys, [`JenkinsHasher`] (the default) for byte
/// strings.
pub struct OpenHashMap<K, V, H = JenkinsHasher> {
    buckets: Vec<Bucket<K, V>>,
    size: usize,
    mask: u64,
    _hasher: PhantomData<H>,
}

impl<K: Hash + Eq, V, H: Hasher + Default> OpenHashMap<K, V, H> {
    pub fn new() -> Self {
        OpenHashMap {
            buckets: (0..MIN_CAPACITY).map(|_| Bucket::empty()).collect(),
            size: 0,
            mask: (MIN_CAPACITY - 1) as u64,
            _hasher: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    fn capacity(&self) -> usize {
        self.buckets.len()
    }

    fn upper_cap(&self) -> usize {
        self.capacity() * 3 / 4
    }

    fn lower_cap(&self) -> usize {
        self.capacity() / 4
    }

    fn resize(&mut self, new_capacity: usize) {
        let old_buckets = mem::replace(
            &mut self.buckets,
            (0..new_capacity).map(|_| Bucket::empty()).collect(),
        );
        self.mask = (new_capacity - 1) as u64;
        for mut bucket in old_buckets {
            if bucket.defined && !bucket.deleted {
                let mut idx = bucket.hash & self.mask;
                while self.buckets[idx as usize].defined {
                    idx = (idx + 1) & self.mask;
                }
                let key = bucket.key.take().unwrap();
                let value = bucket.value.take().unwrap();
                self.buckets[idx as usize] = Bucket {
                    hash: bucket.hash,
                    defined: true,
                    deleted: false,
                    key: Some(key),
                    value: Some(value),
                };
            }
        }
    }

    fn maybe_shrink(&mut self) {
        if self.size < self.lower_cap() && self.capacity() > MIN_CAPACITY {
            self.resize((self.capacity() >> 1).max(MIN_CAPACITY));
        }
    }

    /// Inserts `(key, value)`. Returns `false` (and does not overwrite) if `key` already exists.
    pub fn add(&mut self, key: K, value: V) -> bool {
        if self.size >= self.upper_cap() {
            self.resize(self.capacity() << 1);
        }
        let hash = hash_key::<K, H>(&key);
        let mut idx = hash & self.mask;
        let mut tombstone: Option<u64> = None;
        loop {
            let bucket = &self.buckets[idx as usize];
            if !bucket.defined {
                break;
            }
            if bucket.deleted {
                if tombstone.is_none() {
                    tombstone = Some(idx);
                }
            } else if bucket.hash == hash && bucket.key.as_ref() == Some(&key) {
                return false;
            }
            idx = (idx + 1) & self.mask;
        }
        let slot = tombstone.unwrap_or(idx);
        self.buckets[slot as usize] = Bucket {
            hash,
            defined: true,
            deleted: false,
            key: Some(key),
            value: Some(value),
        };
        self.size += 1;
        true
    }

    fn find_slot(&self, key: &K) -> Option<usize> {
        let hash = hash_key::<K, H>(key);
        let mut idx = hash & self.mask;
        loop {
            let bucket = &self.buckets[idx as usize];
            if !bucket.defined {
                return None;
            }
            if !bucket.deleted && bucket.hash == hash && bucket.key.as_ref() == Some(key) {
                return Some(idx as usize);
            }
            idx = (idx + 1) & self.mask;
        }
    }

    pub fn lookup(&self, key: &K) -> Option<&V> {
        self.find_slot(key).and_then(|idx| self.buckets[idx].value.as_ref())
    }

    pub fn lookup_mut(&mut self, key: &K) -> Option<&mut V> {
        match self.find_slot(key) {
            Some(idx) => self.buckets[idx].value.as_mut(),
            None => None,
        }
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.find_slot(key).is_some()
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.find_slot(key)?;
        let bucket = &mut self.buckets[idx];
        bucket.deleted = true;
        let value = bucket.value.take();
        bucket.key = None;
        self.size -= 1;
        self.maybe_shrink();
        value
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.buckets.iter().filter_map(|b| {
            if b.defined && !b.deleted {
                Some((b.key.as_ref().unwrap(), b.value.as_ref().unwrap()))
            } else {
                None
            }
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, v)| v)
    }
}

impl<K: Hash + Eq, V, H: Hasher + Default> Default for OpenHashMap<K, V, H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_lookup_remove() {
        let mut m = OpenHashMap::new();
        assert!(m.add("a", 1));
        assert!(m.add("b", 2));
        assert!(!m.add("a", 3));
        assert_eq!(m.lookup(&"a"), Some(&1));
        assert_eq!(m.lookup(&"b"), Some(&2));
        assert_eq!(m.remove(&"a"), Some(1));
        assert_eq!(m.lookup(&"a"), None);
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn lookup_returns_most_recent_non_removed() {
        let mut m = OpenHashMap::new();
        m.add("x", 1);
        m.remove(&"x");
        m.add("x", 2);
        assert_eq!(m.lookup(&"x"), Some(&2));
    }

    #[test]
    fn iteration_visits_every_live_entry_once() {
        let mut m = OpenHashMap::new();
        for i in 0..50 {
            m.add(i, i * 2);
        }
        for i in (0..50).step_by(3) {
            m.remove(&i);
        }
        let mut seen: Vec<i32> = m.keys().copied().collect();
        seen.sort();
        let mut expected: Vec<i32> = (0..50).filter(|i| i % 3 != 0).collect();
        expected.sort();
        assert_eq!(seen, expected);
        assert_eq!(m.len(), expected.len());
    }

    #[test]
    fn size_is_adds_minus_removes() {
        let mut m = OpenHashMap::new();
        for i in 0..20 {
            m.add(i, ());
        }
        for i in 0..7 {
            m.remove(&i);
        }
        assert_eq!(m.len(), 13);
    }

    #[test]
    fn grows_and_shrinks_keeping_capacity_power_of_two() {
        let mut m = OpenHashMap::new();
        for i in 0..200 {
            m.add(i, i);
        }
        assert!(m.capacity().is_power_of_two());
        assert!(m.capacity() >= MIN_CAPACITY);
        for i in 0..200 {
            assert_eq!(m.lookup(&i), Some(&i));
        }
        for i in 0..195 {
            m.remove(&i);
        }
        assert!(m.capacity().is_power_of_two());
        assert!(m.capacity() >= MIN_CAPACITY);
        for i in 195..200 {
            assert_eq!(m.lookup(&i), Some(&i));
        }
    }

    #[test]
    fn minimum_capacity_is_eight() {
        let m: OpenHashMap<i32, i32> = OpenHashMap::new();
        assert_eq!(m.capacity(), MIN_CAPACITY);
    }

    #[test]
    fn pointer_keyed_map_uses_the_fnv_hasher_and_still_works() {
        let mut m: OpenHashMap<usize, &str, FnvHasher> = OpenHashMap::new();
        for addr in [0x1000usize, 0x1008, 0x2000, 0x2008, 0x3000] {
            assert!(m.add(addr, "x"));
        }
        for addr in [0x1000usize, 0x1008, 0x2000, 0x2008, 0x3000] {
            assert_eq!(m.lookup(&addr), Some(&"x"));
        }
        assert_eq!(m.len(), 5);
    }
}
