//! Segment directory inside the control block.
//!
//! A small versioned table mapping logical segment slots to `(name, size)`
//! pairs. The controller fills it before publishing; consumers treat
//! `count` and the entries as immutable afterwards and materialize local
//! base pointers with [`MappedBases::map`]. Slot 0 is always the registry
//! arena - the pool base every per-ring offset resolves against.

#[cfg(unix)]
use crate::shm::SharedMemory;
use crate::shm::ShmError;

/// Maximum directory entries.
pub const SHM_DIR_MAX_ENTRIES: usize = 8;

/// Directory schema version.
pub const SHM_DIR_SCHEMA_VERSION: u32 = 1;

/// Fixed name field length (NUL-terminated inside).
pub const SHM_DIR_NAME_LEN: usize = 64;

/// Directory slot of the registry arena.
pub const SHM_DIR_REGISTRY_SLOT: u32 = 0;

/// One directory entry. A zero-length name marks an empty slot.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ShmDirEntry {
    name: [u8; SHM_DIR_NAME_LEN],
    size: u64,
}

const _: () = assert!(std::mem::size_of::<ShmDirEntry>() == 72);

impl ShmDirEntry {
    const EMPTY: Self = Self {
        name: [0; SHM_DIR_NAME_LEN],
        size: 0,
    };

    pub fn is_empty(&self) -> bool {
        self.name[0] == 0 || self.size == 0
    }

    /// The segment name, if the slot is populated with valid UTF-8.
    pub fn name(&self) -> Option<&str> {
        if self.is_empty() {
            return None;
        }
        let end = self.name.iter().position(|&b| b == 0)?;
        std::str::from_utf8(&self.name[..end]).ok()
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// The directory table embedded in the control block.
#[repr(C)]
pub struct ShmDirectory {
    pub schema_version: u32,
    pub count: u32,
    entries: [ShmDirEntry; SHM_DIR_MAX_ENTRIES],
}

const _: () = assert!(std::mem::size_of::<ShmDirectory>() == 8 + 8 * 72);

impl Default for ShmDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl ShmDirectory {
    pub fn new() -> Self {
        Self {
            schema_version: SHM_DIR_SCHEMA_VERSION,
            count: 0,
            entries: [ShmDirEntry::EMPTY; SHM_DIR_MAX_ENTRIES],
        }
    }

    /// Appends an entry, returning its slot. Setup-time only; the table is
    /// immutable once the control block is published.
    pub fn push_entry(&mut self, name: &str, size: u64) -> Result<u32, ShmError> {
        if name.len() >= SHM_DIR_NAME_LEN {
            return Err(ShmError::BadName(name.to_string()));
        }
        let slot = self.count as usize;
        if slot >= SHM_DIR_MAX_ENTRIES {
            return Err(ShmError::NoSegments);
        }
        let mut entry = ShmDirEntry::EMPTY;
        entry.name[..name.len()].copy_from_slice(name.as_bytes());
        entry.size = size;
        self.entries[slot] = entry;
        self.count += 1;
        Ok(slot as u32)
    }

    pub fn entry(&self, idx: u32) -> Option<&ShmDirEntry> {
        let count = (self.count as usize).min(SHM_DIR_MAX_ENTRIES);
        self.entries.get(idx as usize).filter(|_| (idx as usize) < count)
    }
}

/// Process-local table of mapped directory segments.
///
/// Indexing mirrors the directory: `base(i)` is the local base of entry
/// `i`. Unpopulated or unmappable entries stay `None` rather than failing
/// the whole table; consumers only need the segments they actually touch.
#[cfg(unix)]
pub struct MappedBases {
    segments: Vec<Option<SharedMemory>>,
}

#[cfg(unix)]
impl MappedBases {
    /// Opens every named segment and records its local base.
    ///
    /// Fails only when *no* entry could be mapped - a directory that maps
    /// nothing gives a consumer no pool base to work with.
    pub fn map(dir: &ShmDirectory) -> Result<Self, ShmError> {
        let count = (dir.count as usize).min(SHM_DIR_MAX_ENTRIES);
        let mut segments = Vec::with_capacity(count);
        let mut mapped = 0usize;

        for i in 0..count {
            let seg = dir
                .entry(i as u32)
                .filter(|e| !e.is_empty())
                .and_then(|e| {
                    let name = e.name()?;
                    match SharedMemory::open(name, e.size() as usize) {
                        Ok(seg) => Some(seg),
                        Err(err) => {
                            log::warn!("directory entry {i} ({name}) failed to map: {err}");
                            None
                        }
                    }
                });
            mapped += usize::from(seg.is_some());
            segments.push(seg);
        }

        if mapped == 0 {
            return Err(ShmError::NoSegments);
        }
        Ok(Self { segments })
    }

    /// Local base pointer of directory entry `idx`.
    pub fn base(&self, idx: u32) -> Option<*mut u8> {
        self.segments
            .get(idx as usize)?
            .as_ref()
            .map(SharedMemory::as_ptr)
    }

    /// Mapped size of directory entry `idx`.
    pub fn size(&self, idx: u32) -> Option<usize> {
        self.segments
            .get(idx as usize)?
            .as_ref()
            .map(SharedMemory::len)
    }

    /// The registry arena base (entry 0), if mapped.
    pub fn registry_base(&self) -> Option<*mut u8> {
        self.base(SHM_DIR_REGISTRY_SLOT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_read_entries() {
        let mut dir = ShmDirectory::new();
        assert_eq!(dir.push_entry("/ada_reg_1_1", 4096).unwrap(), 0);
        assert_eq!(dir.push_entry("/ada_ctl_1_1", 128).unwrap(), 1);
        assert_eq!(dir.count, 2);

        let e0 = dir.entry(0).unwrap();
        assert_eq!(e0.name(), Some("/ada_reg_1_1"));
        assert_eq!(e0.size(), 4096);
        assert!(dir.entry(2).is_none());
        assert!(dir.entry(7).is_none());
    }

    #[test]
    fn test_push_rejects_long_names_and_overflow() {
        let mut dir = ShmDirectory::new();
        let long = format!("/{}", "n".repeat(SHM_DIR_NAME_LEN));
        assert!(dir.push_entry(&long, 64).is_err());

        for i in 0..SHM_DIR_MAX_ENTRIES {
            dir.push_entry(&format!("/seg{i}"), 64).unwrap();
        }
        assert!(dir.push_entry("/one_too_many", 64).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_map_local_bases_roundtrip() {
        let name = format!("/ada_test_dir_{:08x}", std::process::id());
        let seg = SharedMemory::create(&name, 8192).unwrap();
        // SAFETY: fresh mapping owned by `seg`.
        unsafe { seg.as_ptr().write(0x5A) };

        let mut dir = ShmDirectory::new();
        dir.push_entry(&name, 8192).unwrap();

        let bases = MappedBases::map(&dir).unwrap();
        let base = bases.registry_base().unwrap();
        assert_eq!(bases.size(0), Some(8192));
        // SAFETY: entry 0 maps the same segment.
        assert_eq!(unsafe { base.read() }, 0x5A);
        assert!(bases.base(1).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_map_with_no_mappable_entries_fails() {
        let mut dir = ShmDirectory::new();
        dir.push_entry("/ada_test_absent_seg", 4096).unwrap();
        assert!(matches!(MappedBases::map(&dir), Err(ShmError::NoSegments)));

        let empty = ShmDirectory::new();
        assert!(MappedBases::map(&empty).is_err());
    }
}
