//! Exclude set: symbol names the agent must never hook.
//!
//! Hooking anything the hook handlers themselves may call (allocator,
//! mem/str primitives, pthread, ObjC reference counting, the interceptor's
//! own transaction APIs) risks reentering the hook machinery from inside
//! itself. The reentrancy guard catches that, but at the cost of an upcall
//! per call; excluding the symbols up front is far cheaper.
//!
//! Implementation is an open-addressed table of 64-bit case-insensitive
//! FNV-1a hashes: O(1) average contains, no stored strings.

/// Replacement for the (reserved) zero hash.
const HASH_ZERO_REMAP: u64 = 0x9e37_79b9_7f4a_7c15;

/// Case-insensitive (ASCII) FNV-1a over a symbol name.
///
/// Zero is the empty-slot sentinel, so a name hashing to zero is remapped
/// to a fixed odd constant.
pub fn exclude_hash(name: &str) -> u64 {
    const FNV_OFFSET: u64 = 14_695_981_039_346_656_037;
    const FNV_PRIME: u64 = 1_099_511_628_211;

    let mut h = FNV_OFFSET;
    for &b in name.as_bytes() {
        let c = if b.is_ascii_uppercase() { b + 32 } else { b };
        h ^= u64::from(c);
        h = h.wrapping_mul(FNV_PRIME);
    }
    if h == 0 {
        HASH_ZERO_REMAP
    } else {
        h
    }
}

/// Open-addressed hash set of excluded symbol names.
pub struct ExcludeSet {
    slots: Vec<u64>,
    count: usize,
}

impl ExcludeSet {
    /// Creates a set sized for about `capacity_hint` names.
    pub fn with_capacity(capacity_hint: usize) -> Self {
        let cap = capacity_hint.max(8).next_power_of_two();
        Self {
            slots: vec![0; cap],
            count: 0,
        }
    }

    pub fn new() -> Self {
        Self::with_capacity(128)
    }

    /// Number of distinct names in the set.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn insert_hash(&mut self, h: u64) {
        let mask = self.slots.len() - 1;
        let mut i = (h as usize) & mask;
        loop {
            match self.slots[i] {
                0 => {
                    self.slots[i] = h;
                    self.count += 1;
                    return;
                }
                slot if slot == h => return, // already present
                _ => i = (i + 1) & mask,
            }
        }
    }

    /// Adds a name. Idempotent. Returns false for empty names.
    pub fn add(&mut self, name: &str) -> bool {
        if name.is_empty() {
            return false;
        }
        // Keep load factor below 0.7.
        if (self.count + 1) * 10 > self.slots.len() * 7 {
            let new_len = self.slots.len() * 2;
            let old = std::mem::replace(&mut self.slots, vec![0; new_len]);
            self.count = 0;
            for h in old {
                if h != 0 {
                    self.insert_hash(h);
                }
            }
        }
        self.insert_hash(exclude_hash(name));
        true
    }

    /// Adds every comma- or semicolon-separated name in `csv`, trimming
    /// whitespace.
    pub fn add_csv(&mut self, csv: &str) {
        for part in csv.split([',', ';']) {
            let name = part.trim();
            if !name.is_empty() {
                self.add(name);
            }
        }
    }

    /// Membership by precomputed hash - the hot-path variant when the
    /// caller hashes during symbol enumeration.
    pub fn contains_hash(&self, hash: u64) -> bool {
        if hash == 0 {
            return false;
        }
        let mask = self.slots.len() - 1;
        let mut i = (hash as usize) & mask;
        for _ in 0..self.slots.len() {
            match self.slots[i] {
                0 => return false,
                slot if slot == hash => return true,
                _ => i = (i + 1) & mask,
            }
        }
        false
    }

    /// Membership by name (case-insensitive).
    pub fn contains(&self, name: &str) -> bool {
        !name.is_empty() && self.contains_hash(exclude_hash(name))
    }
}

impl Default for ExcludeSet {
    fn default() -> Self {
        let mut set = Self::new();
        set.add_defaults();
        set
    }
}

impl ExcludeSet {
    /// Populates the hot-path and reentrancy-prone defaults.
    pub fn add_defaults(&mut self) {
        const DEFAULTS: &[&str] = &[
            "malloc",
            "free",
            "calloc",
            "realloc",
            "memcpy",
            "memmove",
            "memset",
            "bzero",
            "strcpy",
            "strncpy",
            "strlen",
            "strcmp",
            "objc_msgSend",
            "objc_release",
            "objc_retain",
            "pthread_mutex_lock",
            "pthread_mutex_unlock",
            "pthread_once",
            "pthread_create",
            "gum_interceptor_attach",
            "gum_interceptor_detach",
            "gum_interceptor_begin_transaction",
            "gum_interceptor_end_transaction",
            // symbol variations
            "_malloc",
            "_free",
        ];
        for name in DEFAULTS {
            self.add(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_contains_case_insensitive() {
        let mut set = ExcludeSet::new();
        set.add("memcpy");
        assert!(set.contains("memcpy"));
        assert!(set.contains("MEMCPY"));
        assert!(set.contains("MemCpy"));
        assert!(!set.contains("memmove"));
    }

    #[test]
    fn test_duplicate_add_keeps_size() {
        let mut set = ExcludeSet::new();
        set.add("malloc");
        let size = set.len();
        set.add("malloc");
        set.add("MALLOC");
        assert!(set.contains("malloc"));
        assert_eq!(set.len(), size);
    }

    #[test]
    fn test_contains_by_precomputed_hash() {
        let mut set = ExcludeSet::new();
        set.add("pthread_once");
        assert!(set.contains_hash(exclude_hash("pthread_once")));
        assert!(!set.contains_hash(exclude_hash("pthread_twice")));
        assert!(!set.contains_hash(0));
    }

    #[test]
    fn test_growth_keeps_all_members() {
        let mut set = ExcludeSet::with_capacity(8);
        let names: Vec<String> = (0..200).map(|i| format!("sym_{i}")).collect();
        for n in &names {
            set.add(n);
        }
        assert_eq!(set.len(), 200);
        for n in &names {
            assert!(set.contains(n), "{n} lost during growth");
        }
    }

    #[test]
    fn test_csv_ingestion_trims_and_splits() {
        let mut set = ExcludeSet::new();
        set.add_csv(" foo , bar;baz ;; ,qux");
        for n in ["foo", "bar", "baz", "qux"] {
            assert!(set.contains(n), "{n} missing");
        }
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn test_defaults_cover_reentrancy_hazards() {
        let set = ExcludeSet::default();
        for n in ["malloc", "memcpy", "objc_retain", "pthread_mutex_lock",
                  "gum_interceptor_attach"] {
            assert!(set.contains(n), "{n} must be excluded by default");
        }
    }

    #[test]
    fn test_hash_never_zero() {
        assert_ne!(exclude_hash(""), 0);
        assert_ne!(exclude_hash("a"), 0);
    }
}
