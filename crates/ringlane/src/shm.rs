//! POSIX shared-memory segments and session naming.
//!
//! Segment names are a stable function of `(role, host_pid, session_id)` so
//! the controller and an injected agent can rendezvous without passing
//! handles: `/ada_<role>_<pid:08x>_<sid:08x>` (26 characters, comfortably
//! inside the portable 63-character limit).

#[cfg(unix)]
use std::ffi::CString;
use thiserror::Error;

/// Logical role of a segment within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmRole {
    /// 4 KiB control block (state machine + directory).
    Control,
    /// The registry arena (entry 0 of the directory).
    Registry,
    /// Legacy single index stream segment.
    Index,
    /// Legacy single detail stream segment.
    Detail,
}

impl ShmRole {
    fn tag(self) -> &'static str {
        match self {
            ShmRole::Control => "ctl",
            ShmRole::Registry => "reg",
            ShmRole::Index => "idx",
            ShmRole::Detail => "dtl",
        }
    }
}

/// Derives the portable segment name for a role within a session.
pub fn shm_name(role: ShmRole, host_pid: u32, session_id: u32) -> String {
    format!("/ada_{}_{host_pid:08x}_{session_id:08x}", role.tag())
}

/// Shared-memory setup failure.
#[derive(Debug, Error)]
pub enum ShmError {
    #[error("segment name {0:?} is not POSIX-portable")]
    BadName(String),
    #[error("segment length must be non-zero")]
    ZeroLength,
    #[error("shm_open({name}) failed: {source}")]
    Open {
        name: String,
        source: std::io::Error,
    },
    #[error("ftruncate({name}) failed: {source}")]
    Resize {
        name: String,
        source: std::io::Error,
    },
    #[error("mmap({name}) failed: {source}")]
    Map {
        name: String,
        source: std::io::Error,
    },
    #[error("directory maps no usable segments")]
    NoSegments,
}

#[cfg(unix)]
fn check_name(name: &str) -> Result<CString, ShmError> {
    if !name.starts_with('/') || name.len() > 63 || name[1..].contains('/') {
        return Err(ShmError::BadName(name.to_string()));
    }
    CString::new(name).map_err(|_| ShmError::BadName(name.to_string()))
}

/// One mapped POSIX shared-memory segment.
///
/// The creating side owns the name and unlinks it on drop; openers only
/// unmap. The file descriptor is closed right after mapping - the mapping
/// keeps the segment alive.
#[cfg(unix)]
pub struct SharedMemory {
    base: *mut u8,
    len: usize,
    name: String,
    owner: bool,
}

// SAFETY: the mapping itself is just memory; all concurrent-access rules
// are enforced by the structures placed inside it.
#[cfg(unix)]
unsafe impl Send for SharedMemory {}
#[cfg(unix)]
unsafe impl Sync for SharedMemory {}

#[cfg(unix)]
impl SharedMemory {
    /// Creates (or replaces) a segment of `len` bytes and maps it.
    pub fn create(name: &str, len: usize) -> Result<Self, ShmError> {
        let cname = check_name(name)?;
        if len == 0 {
            return Err(ShmError::ZeroLength);
        }

        // Drop any stale segment from a crashed session.
        // SAFETY: plain libc call with a valid C string.
        unsafe { libc::shm_unlink(cname.as_ptr()) };

        // SAFETY: valid C string; flags and mode are plain constants.
        let fd = unsafe {
            libc::shm_open(
                cname.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600,
            )
        };
        if fd < 0 {
            return Err(ShmError::Open {
                name: name.to_string(),
                source: std::io::Error::last_os_error(),
            });
        }

        // SAFETY: fd is a fresh shm descriptor we own.
        if unsafe { libc::ftruncate(fd, len as libc::off_t) } != 0 {
            let source = std::io::Error::last_os_error();
            unsafe {
                libc::close(fd);
                libc::shm_unlink(cname.as_ptr());
            }
            return Err(ShmError::Resize {
                name: name.to_string(),
                source,
            });
        }

        let base = Self::map_fd(fd, len, name)?;
        log::debug!("created shm segment {name} ({len} bytes)");
        Ok(Self {
            base,
            len,
            name: name.to_string(),
            owner: true,
        })
    }

    /// Opens and maps an existing segment of `len` bytes.
    pub fn open(name: &str, len: usize) -> Result<Self, ShmError> {
        let cname = check_name(name)?;
        if len == 0 {
            return Err(ShmError::ZeroLength);
        }

        // SAFETY: valid C string; read-write open of an existing segment.
        let fd = unsafe { libc::shm_open(cname.as_ptr(), libc::O_RDWR, 0o600) };
        if fd < 0 {
            return Err(ShmError::Open {
                name: name.to_string(),
                source: std::io::Error::last_os_error(),
            });
        }

        let base = Self::map_fd(fd, len, name)?;
        log::debug!("opened shm segment {name} ({len} bytes)");
        Ok(Self {
            base,
            len,
            name: name.to_string(),
            owner: false,
        })
    }

    fn map_fd(fd: libc::c_int, len: usize, name: &str) -> Result<*mut u8, ShmError> {
        // SAFETY: fd is open for read-write; length is non-zero.
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        let map_err = (base == libc::MAP_FAILED).then(std::io::Error::last_os_error);
        // SAFETY: the mapping (if any) keeps the segment alive without the fd.
        unsafe { libc::close(fd) };
        match map_err {
            Some(source) => Err(ShmError::Map {
                name: name.to_string(),
                source,
            }),
            None => Ok(base.cast::<u8>()),
        }
    }

    /// Base address of the mapping.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.base
    }

    /// Mapped length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The POSIX name this mapping was opened under.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(unix)]
impl Drop for SharedMemory {
    fn drop(&mut self) {
        // SAFETY: base/len came from a successful mmap in this object.
        unsafe { libc::munmap(self.base.cast::<libc::c_void>(), self.len) };
        if self.owner {
            if let Ok(cname) = CString::new(self.name.as_str()) {
                // SAFETY: plain libc call with a valid C string.
                unsafe { libc::shm_unlink(cname.as_ptr()) };
            }
        }
    }
}
