//! ATF v2 wire types.
//!
//! Two little-endian binary streams per thread: a fixed-width index stream
//! (`index.atf`, magic `"ATI2"`) and an optional variable-width detail
//! stream (`detail.atf`, magic `"ATD2"`). Headers are 64 bytes, written
//! first as placeholders and rewritten at finalize; footers are 64 bytes
//! with reversed magic so truncation is detectable from either end.
//!
//! Encoding is explicit field-by-field little-endian, so the format is
//! identical regardless of host endianness; the `endian` header byte is
//! fixed at 0x01.

/// Index file magic, `"ATI2"`.
pub const INDEX_MAGIC: [u8; 4] = *b"ATI2";
/// Index footer magic, `"2ITA"` (reversed).
pub const INDEX_FOOTER_MAGIC: [u8; 4] = *b"2ITA";
/// Detail file magic, `"ATD2"`.
pub const DETAIL_MAGIC: [u8; 4] = *b"ATD2";
/// Detail footer magic, `"2DTA"` (reversed).
pub const DETAIL_FOOTER_MAGIC: [u8; 4] = *b"2DTA";

pub const INDEX_HEADER_SIZE: usize = 64;
pub const INDEX_EVENT_SIZE: usize = 32;
pub const INDEX_FOOTER_SIZE: usize = 64;
pub const DETAIL_HEADER_SIZE: usize = 64;
pub const DETAIL_EVENT_HEADER_SIZE: usize = 24;
pub const DETAIL_FOOTER_SIZE: usize = 64;

/// Fixed prefix of a detail function payload (before the stack bytes).
pub const DETAIL_FUNCTION_PAYLOAD_SIZE: usize = 100;

/// Largest stack window a detail event may carry.
pub const MAX_STACK_SNAPSHOT: usize = 256;

/// `detail_seq` value meaning "no detail event for this index event".
pub const NO_DETAIL_SEQ: u32 = u32::MAX;

/// Sequence returned by a writer that has failed.
pub const INVALID_SEQUENCE: u32 = u32::MAX;

/// Index header flag bit 0: a detail file exists for this thread.
pub const INDEX_FLAG_HAS_DETAIL_FILE: u32 = 1;

/// Wire value of the `endian` byte (little-endian).
pub const ENDIAN_LITTLE: u8 = 0x01;

/// Format version.
pub const FORMAT_VERSION: u8 = 1;

/// CPU architecture of the traced process.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X86_64 = 1,
    Arm64 = 2,
}

/// Operating system of the traced process.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    Ios = 1,
    Android = 2,
    MacOs = 3,
    Linux = 4,
    Windows = 5,
}

/// Clock the timestamps were taken on.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockType {
    MachContinuous = 1,
    Qpc = 2,
    Boottime = 3,
}

/// What an index event records.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Call = 1,
    Return = 2,
    Exception = 3,
}

impl EventKind {
    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            1 => Self::Call,
            2 => Self::Return,
            3 => Self::Exception,
            _ => return None,
        })
    }

    /// The detail event type an index kind maps to (exceptions record as
    /// calls).
    pub fn detail_event_type(self) -> u16 {
        match self {
            Self::Call | Self::Exception => DETAIL_EVENT_FUNCTION_CALL,
            Self::Return => DETAIL_EVENT_FUNCTION_RETURN,
        }
    }
}

pub const DETAIL_EVENT_FUNCTION_CALL: u16 = 3;
pub const DETAIL_EVENT_FUNCTION_RETURN: u16 = 4;

/// Architecture of the running process.
pub fn current_arch() -> Arch {
    #[cfg(target_arch = "aarch64")]
    {
        Arch::Arm64
    }
    #[cfg(not(target_arch = "aarch64"))]
    {
        Arch::X86_64
    }
}

/// Operating system of the running process.
pub fn current_os() -> Os {
    #[cfg(target_os = "ios")]
    {
        Os::Ios
    }
    #[cfg(target_os = "android")]
    {
        Os::Android
    }
    #[cfg(target_os = "macos")]
    {
        Os::MacOs
    }
    #[cfg(target_os = "windows")]
    {
        Os::Windows
    }
    #[cfg(not(any(
        target_os = "ios",
        target_os = "android",
        target_os = "macos",
        target_os = "windows"
    )))]
    {
        Os::Linux
    }
}

/// The platform's continuous monotonic clock id.
pub fn default_clock_type() -> ClockType {
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    {
        ClockType::MachContinuous
    }
    #[cfg(target_os = "windows")]
    {
        ClockType::Qpc
    }
    #[cfg(not(any(target_os = "macos", target_os = "ios", target_os = "windows")))]
    {
        ClockType::Boottime
    }
}

// =============================================================================
// Index stream
// =============================================================================

/// Index file header, 64 bytes on disk.
#[derive(Debug, Clone, Copy)]
pub struct IndexHeader {
    pub flags: u32,
    pub thread_id: u32,
    pub arch: Arch,
    pub os: Os,
    pub clock_type: ClockType,
    pub event_count: u32,
    pub events_offset: u64,
    pub footer_offset: u64,
    pub time_start_ns: u64,
    pub time_end_ns: u64,
}

impl IndexHeader {
    pub fn new(thread_id: u32, clock_type: ClockType) -> Self {
        Self {
            flags: 0,
            thread_id,
            arch: current_arch(),
            os: current_os(),
            clock_type,
            event_count: 0,
            events_offset: INDEX_HEADER_SIZE as u64,
            footer_offset: INDEX_HEADER_SIZE as u64,
            time_start_ns: 0,
            time_end_ns: 0,
        }
    }

    pub fn encode(&self) -> [u8; INDEX_HEADER_SIZE] {
        let mut b = [0u8; INDEX_HEADER_SIZE];
        b[0..4].copy_from_slice(&INDEX_MAGIC);
        b[4] = ENDIAN_LITTLE;
        b[5] = FORMAT_VERSION;
        b[6] = self.arch as u8;
        b[7] = self.os as u8;
        b[8..12].copy_from_slice(&self.flags.to_le_bytes());
        b[12..16].copy_from_slice(&self.thread_id.to_le_bytes());
        b[16] = self.clock_type as u8;
        // 17..24 reserved
        b[24..28].copy_from_slice(&(INDEX_EVENT_SIZE as u32).to_le_bytes());
        b[28..32].copy_from_slice(&self.event_count.to_le_bytes());
        b[32..40].copy_from_slice(&self.events_offset.to_le_bytes());
        b[40..48].copy_from_slice(&self.footer_offset.to_le_bytes());
        b[48..56].copy_from_slice(&self.time_start_ns.to_le_bytes());
        b[56..64].copy_from_slice(&self.time_end_ns.to_le_bytes());
        b
    }

    pub fn decode(b: &[u8; INDEX_HEADER_SIZE]) -> Option<Self> {
        if b[0..4] != INDEX_MAGIC || b[4] != ENDIAN_LITTLE || b[5] != FORMAT_VERSION {
            return None;
        }
        let event_size = u32::from_le_bytes(b[24..28].try_into().ok()?);
        if event_size != INDEX_EVENT_SIZE as u32 {
            return None;
        }
        Some(Self {
            flags: u32::from_le_bytes(b[8..12].try_into().ok()?),
            thread_id: u32::from_le_bytes(b[12..16].try_into().ok()?),
            arch: match b[6] {
                1 => Arch::X86_64,
                2 => Arch::Arm64,
                _ => return None,
            },
            os: match b[7] {
                1 => Os::Ios,
                2 => Os::Android,
                3 => Os::MacOs,
                4 => Os::Linux,
                5 => Os::Windows,
                _ => return None,
            },
            clock_type: match b[16] {
                1 => ClockType::MachContinuous,
                2 => ClockType::Qpc,
                3 => ClockType::Boottime,
                _ => return None,
            },
            event_count: u32::from_le_bytes(b[28..32].try_into().ok()?),
            events_offset: u64::from_le_bytes(b[32..40].try_into().ok()?),
            footer_offset: u64::from_le_bytes(b[40..48].try_into().ok()?),
            time_start_ns: u64::from_le_bytes(b[48..56].try_into().ok()?),
            time_end_ns: u64::from_le_bytes(b[56..64].try_into().ok()?),
        })
    }
}

/// One index event, 32 bytes on disk and in index rings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEvent {
    pub timestamp_ns: u64,
    pub function_id: u64,
    pub thread_id: u32,
    pub event_kind: u32,
    pub call_depth: u32,
    /// Forward link into the detail stream; [`NO_DETAIL_SEQ`] when absent.
    pub detail_seq: u32,
}

impl IndexEvent {
    pub fn has_detail(&self) -> bool {
        self.detail_seq != NO_DETAIL_SEQ
    }

    pub fn encode(&self) -> [u8; INDEX_EVENT_SIZE] {
        let mut b = [0u8; INDEX_EVENT_SIZE];
        b[0..8].copy_from_slice(&self.timestamp_ns.to_le_bytes());
        b[8..16].copy_from_slice(&self.function_id.to_le_bytes());
        b[16..20].copy_from_slice(&self.thread_id.to_le_bytes());
        b[20..24].copy_from_slice(&self.event_kind.to_le_bytes());
        b[24..28].copy_from_slice(&self.call_depth.to_le_bytes());
        b[28..32].copy_from_slice(&self.detail_seq.to_le_bytes());
        b
    }

    pub fn decode(b: &[u8; INDEX_EVENT_SIZE]) -> Self {
        Self {
            timestamp_ns: u64::from_le_bytes(b[0..8].try_into().unwrap()),
            function_id: u64::from_le_bytes(b[8..16].try_into().unwrap()),
            thread_id: u32::from_le_bytes(b[16..20].try_into().unwrap()),
            event_kind: u32::from_le_bytes(b[20..24].try_into().unwrap()),
            call_depth: u32::from_le_bytes(b[24..28].try_into().unwrap()),
            detail_seq: u32::from_le_bytes(b[28..32].try_into().unwrap()),
        }
    }
}

/// Index file footer, 64 bytes; authoritative for crash recovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexFooter {
    /// Reserved for CRC32 of the events section; currently written as zero.
    pub checksum: u32,
    pub event_count: u64,
    pub time_start_ns: u64,
    pub time_end_ns: u64,
    pub bytes_written: u64,
}

impl IndexFooter {
    pub fn encode(&self) -> [u8; INDEX_FOOTER_SIZE] {
        let mut b = [0u8; INDEX_FOOTER_SIZE];
        b[0..4].copy_from_slice(&INDEX_FOOTER_MAGIC);
        b[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        b[8..16].copy_from_slice(&self.event_count.to_le_bytes());
        b[16..24].copy_from_slice(&self.time_start_ns.to_le_bytes());
        b[24..32].copy_from_slice(&self.time_end_ns.to_le_bytes());
        b[32..40].copy_from_slice(&self.bytes_written.to_le_bytes());
        b
    }

    pub fn decode(b: &[u8; INDEX_FOOTER_SIZE]) -> Option<Self> {
        if b[0..4] != INDEX_FOOTER_MAGIC {
            return None;
        }
        Some(Self {
            checksum: u32::from_le_bytes(b[4..8].try_into().ok()?),
            event_count: u64::from_le_bytes(b[8..16].try_into().ok()?),
            time_start_ns: u64::from_le_bytes(b[16..24].try_into().ok()?),
            time_end_ns: u64::from_le_bytes(b[24..32].try_into().ok()?),
            bytes_written: u64::from_le_bytes(b[32..40].try_into().ok()?),
        })
    }
}

// =============================================================================
// Detail stream
// =============================================================================

/// Detail file header, 64 bytes on disk.
#[derive(Debug, Clone, Copy)]
pub struct DetailHeader {
    pub flags: u32,
    pub thread_id: u32,
    pub arch: Arch,
    pub os: Os,
    pub events_offset: u64,
    pub event_count: u64,
    pub bytes_length: u64,
    pub index_seq_start: u64,
    pub index_seq_end: u64,
}

impl DetailHeader {
    pub fn new(thread_id: u32) -> Self {
        Self {
            flags: 0,
            thread_id,
            arch: current_arch(),
            os: current_os(),
            events_offset: DETAIL_HEADER_SIZE as u64,
            event_count: 0,
            bytes_length: 0,
            index_seq_start: 0,
            index_seq_end: 0,
        }
    }

    pub fn encode(&self) -> [u8; DETAIL_HEADER_SIZE] {
        let mut b = [0u8; DETAIL_HEADER_SIZE];
        b[0..4].copy_from_slice(&DETAIL_MAGIC);
        b[4] = ENDIAN_LITTLE;
        b[5] = FORMAT_VERSION;
        b[6] = self.arch as u8;
        b[7] = self.os as u8;
        b[8..12].copy_from_slice(&self.flags.to_le_bytes());
        b[12..16].copy_from_slice(&self.thread_id.to_le_bytes());
        // 16..20 reserved
        b[20..28].copy_from_slice(&self.events_offset.to_le_bytes());
        b[28..36].copy_from_slice(&self.event_count.to_le_bytes());
        b[36..44].copy_from_slice(&self.bytes_length.to_le_bytes());
        b[44..52].copy_from_slice(&self.index_seq_start.to_le_bytes());
        b[52..60].copy_from_slice(&self.index_seq_end.to_le_bytes());
        b
    }

    pub fn decode(b: &[u8; DETAIL_HEADER_SIZE]) -> Option<Self> {
        if b[0..4] != DETAIL_MAGIC || b[4] != ENDIAN_LITTLE || b[5] != FORMAT_VERSION {
            return None;
        }
        Some(Self {
            flags: u32::from_le_bytes(b[8..12].try_into().ok()?),
            thread_id: u32::from_le_bytes(b[12..16].try_into().ok()?),
            arch: match b[6] {
                1 => Arch::X86_64,
                2 => Arch::Arm64,
                _ => return None,
            },
            os: match b[7] {
                1 => Os::Ios,
                2 => Os::Android,
                3 => Os::MacOs,
                4 => Os::Linux,
                5 => Os::Windows,
                _ => return None,
            },
            events_offset: u64::from_le_bytes(b[20..28].try_into().ok()?),
            event_count: u64::from_le_bytes(b[28..36].try_into().ok()?),
            bytes_length: u64::from_le_bytes(b[36..44].try_into().ok()?),
            index_seq_start: u64::from_le_bytes(b[44..52].try_into().ok()?),
            index_seq_end: u64::from_le_bytes(b[52..60].try_into().ok()?),
        })
    }
}

/// Detail event header, 24 bytes, followed by `total_length - 24` payload
/// bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetailEventHeader {
    pub total_length: u32,
    pub event_type: u16,
    pub flags: u16,
    /// Backward link to the index event's ordinal.
    pub index_seq: u32,
    pub thread_id: u32,
    pub timestamp_ns: u64,
}

impl DetailEventHeader {
    pub fn encode(&self) -> [u8; DETAIL_EVENT_HEADER_SIZE] {
        let mut b = [0u8; DETAIL_EVENT_HEADER_SIZE];
        b[0..4].copy_from_slice(&self.total_length.to_le_bytes());
        b[4..6].copy_from_slice(&self.event_type.to_le_bytes());
        b[6..8].copy_from_slice(&self.flags.to_le_bytes());
        b[8..12].copy_from_slice(&self.index_seq.to_le_bytes());
        b[12..16].copy_from_slice(&self.thread_id.to_le_bytes());
        b[16..24].copy_from_slice(&self.timestamp_ns.to_le_bytes());
        b
    }

    pub fn decode(b: &[u8; DETAIL_EVENT_HEADER_SIZE]) -> Self {
        Self {
            total_length: u32::from_le_bytes(b[0..4].try_into().unwrap()),
            event_type: u16::from_le_bytes(b[4..6].try_into().unwrap()),
            flags: u16::from_le_bytes(b[6..8].try_into().unwrap()),
            index_seq: u32::from_le_bytes(b[8..12].try_into().unwrap()),
            thread_id: u32::from_le_bytes(b[12..16].try_into().unwrap()),
            timestamp_ns: u64::from_le_bytes(b[16..24].try_into().unwrap()),
        }
    }
}

/// Detail file footer, 64 bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetailFooter {
    /// Reserved for CRC32; currently written as zero.
    pub checksum: u32,
    pub event_count: u64,
    pub bytes_length: u64,
    pub time_start_ns: u64,
    pub time_end_ns: u64,
}

impl DetailFooter {
    pub fn encode(&self) -> [u8; DETAIL_FOOTER_SIZE] {
        let mut b = [0u8; DETAIL_FOOTER_SIZE];
        b[0..4].copy_from_slice(&DETAIL_FOOTER_MAGIC);
        b[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        b[8..16].copy_from_slice(&self.event_count.to_le_bytes());
        b[16..24].copy_from_slice(&self.bytes_length.to_le_bytes());
        b[24..32].copy_from_slice(&self.time_start_ns.to_le_bytes());
        b[32..40].copy_from_slice(&self.time_end_ns.to_le_bytes());
        b
    }

    pub fn decode(b: &[u8; DETAIL_FOOTER_SIZE]) -> Option<Self> {
        if b[0..4] != DETAIL_FOOTER_MAGIC {
            return None;
        }
        Some(Self {
            checksum: u32::from_le_bytes(b[4..8].try_into().ok()?),
            event_count: u64::from_le_bytes(b[8..16].try_into().ok()?),
            bytes_length: u64::from_le_bytes(b[16..24].try_into().ok()?),
            time_start_ns: u64::from_le_bytes(b[24..32].try_into().ok()?),
            time_end_ns: u64::from_le_bytes(b[32..40].try_into().ok()?),
        })
    }
}

/// On-disk function payload: registers plus a bounded stack window.
///
/// The 8-slot register block is the ARM64 shape; x86_64 captures map into
/// the same slots (rdi..r9, rbp, rsp) with the header's `arch` byte
/// disambiguating. Encoded size is
/// [`DETAIL_FUNCTION_PAYLOAD_SIZE`]` + stack_size`.
#[derive(Debug, Clone, Copy)]
pub struct DetailFunctionPayload {
    pub function_id: u64,
    pub regs: [u64; 8],
    pub lr: u64,
    pub fp: u64,
    pub sp: u64,
    pub stack_size: u16,
    pub stack: [u8; MAX_STACK_SNAPSHOT],
}

impl Default for DetailFunctionPayload {
    fn default() -> Self {
        Self {
            function_id: 0,
            regs: [0; 8],
            lr: 0,
            fp: 0,
            sp: 0,
            stack_size: 0,
            stack: [0; MAX_STACK_SNAPSHOT],
        }
    }
}

impl DetailFunctionPayload {
    /// Encoded byte length including the captured stack bytes.
    pub fn encoded_len(&self) -> usize {
        DETAIL_FUNCTION_PAYLOAD_SIZE + self.stack_size.min(MAX_STACK_SNAPSHOT as u16) as usize
    }

    /// Encodes into `out`, returning the bytes written. `out` must hold
    /// [`Self::encoded_len`] bytes.
    pub fn encode_into(&self, out: &mut [u8]) -> usize {
        let stack_len = self.stack_size.min(MAX_STACK_SNAPSHOT as u16) as usize;
        let total = DETAIL_FUNCTION_PAYLOAD_SIZE + stack_len;
        assert!(out.len() >= total, "payload buffer too small");

        out[0..8].copy_from_slice(&self.function_id.to_le_bytes());
        for (i, r) in self.regs.iter().enumerate() {
            let s = 8 + i * 8;
            out[s..s + 8].copy_from_slice(&r.to_le_bytes());
        }
        out[72..80].copy_from_slice(&self.lr.to_le_bytes());
        out[80..88].copy_from_slice(&self.fp.to_le_bytes());
        out[88..96].copy_from_slice(&self.sp.to_le_bytes());
        out[96..98].copy_from_slice(&(stack_len as u16).to_le_bytes());
        out[98..100].copy_from_slice(&0u16.to_le_bytes());
        out[100..total].copy_from_slice(&self.stack[..stack_len]);
        total
    }

    pub fn decode(b: &[u8]) -> Option<Self> {
        if b.len() < DETAIL_FUNCTION_PAYLOAD_SIZE {
            return None;
        }
        let mut regs = [0u64; 8];
        for (i, r) in regs.iter_mut().enumerate() {
            let s = 8 + i * 8;
            *r = u64::from_le_bytes(b[s..s + 8].try_into().ok()?);
        }
        let stack_size = u16::from_le_bytes(b[96..98].try_into().ok()?);
        let stack_len = (stack_size as usize).min(MAX_STACK_SNAPSHOT);
        if b.len() < DETAIL_FUNCTION_PAYLOAD_SIZE + stack_len {
            return None;
        }
        let mut stack = [0u8; MAX_STACK_SNAPSHOT];
        stack[..stack_len].copy_from_slice(&b[100..100 + stack_len]);
        Some(Self {
            function_id: u64::from_le_bytes(b[0..8].try_into().ok()?),
            regs,
            lr: u64::from_le_bytes(b[72..80].try_into().ok()?),
            fp: u64::from_le_bytes(b[80..88].try_into().ok()?),
            sp: u64::from_le_bytes(b[88..96].try_into().ok()?),
            stack_size: stack_len as u16,
            stack,
        })
    }
}

// =============================================================================
// In-ring detail record
// =============================================================================

/// Fixed slot size of detail rings.
pub const DETAIL_RECORD_SIZE: usize = 512;

/// The fixed-size detail record producers write into detail rings.
///
/// The drain re-encodes it into the variable-length on-disk form using the
/// actual `stack_size`. Fixed sizing keeps the ring SPSC protocol trivial;
/// the unused tail of the slot is never copied to disk.
#[derive(Debug, Clone, Copy)]
pub struct DetailRecord {
    pub timestamp_ns: u64,
    pub function_id: u64,
    pub thread_id: u32,
    pub event_kind: u32,
    pub call_depth: u32,
    /// Backward link reserved by the producer.
    pub index_seq: u32,
    pub payload: DetailFunctionPayload,
}

impl Default for DetailRecord {
    fn default() -> Self {
        Self {
            timestamp_ns: 0,
            function_id: 0,
            thread_id: 0,
            event_kind: EventKind::Call as u32,
            call_depth: 0,
            index_seq: 0,
            payload: DetailFunctionPayload::default(),
        }
    }
}

impl DetailRecord {
    pub fn encode(&self) -> [u8; DETAIL_RECORD_SIZE] {
        let mut b = [0u8; DETAIL_RECORD_SIZE];
        b[0..8].copy_from_slice(&self.timestamp_ns.to_le_bytes());
        b[8..16].copy_from_slice(&self.function_id.to_le_bytes());
        b[16..20].copy_from_slice(&self.thread_id.to_le_bytes());
        b[20..24].copy_from_slice(&self.event_kind.to_le_bytes());
        b[24..28].copy_from_slice(&self.call_depth.to_le_bytes());
        b[28..32].copy_from_slice(&self.index_seq.to_le_bytes());
        self.payload.encode_into(&mut b[32..32 + self.payload.encoded_len()]);
        b
    }

    pub fn decode(b: &[u8; DETAIL_RECORD_SIZE]) -> Option<Self> {
        Some(Self {
            timestamp_ns: u64::from_le_bytes(b[0..8].try_into().ok()?),
            function_id: u64::from_le_bytes(b[8..16].try_into().ok()?),
            thread_id: u32::from_le_bytes(b[16..20].try_into().ok()?),
            event_kind: u32::from_le_bytes(b[20..24].try_into().ok()?),
            call_depth: u32::from_le_bytes(b[24..28].try_into().ok()?),
            index_seq: u32::from_le_bytes(b[28..32].try_into().ok()?),
            payload: DetailFunctionPayload::decode(&b[32..])?,
        })
    }
}

const _: () = assert!(32 + DETAIL_FUNCTION_PAYLOAD_SIZE + MAX_STACK_SNAPSHOT <= DETAIL_RECORD_SIZE);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_event_layout_is_32_bytes() {
        let e = IndexEvent {
            timestamp_ns: 0x1111_2222_3333_4444,
            function_id: (7u64 << 32) | 9,
            thread_id: 42,
            event_kind: EventKind::Call as u32,
            call_depth: 3,
            detail_seq: NO_DETAIL_SEQ,
        };
        let b = e.encode();
        assert_eq!(b.len(), 32);
        assert_eq!(&b[0..8], &0x1111_2222_3333_4444u64.to_le_bytes());
        assert_eq!(&b[28..32], &u32::MAX.to_le_bytes());
        assert_eq!(IndexEvent::decode(&b), e);
        assert!(!e.has_detail());
    }

    #[test]
    fn test_index_header_roundtrip() {
        let mut h = IndexHeader::new(7, ClockType::Boottime);
        h.flags = INDEX_FLAG_HAS_DETAIL_FILE;
        h.event_count = 100;
        h.footer_offset = 64 + 100 * 32;
        h.time_start_ns = 10;
        h.time_end_ns = 99;

        let b = h.encode();
        assert_eq!(&b[0..4], b"ATI2");
        assert_eq!(b[4], 0x01);
        let d = IndexHeader::decode(&b).unwrap();
        assert_eq!(d.thread_id, 7);
        assert_eq!(d.event_count, 100);
        assert_eq!(d.footer_offset, 3264);
        assert_eq!(d.flags & INDEX_FLAG_HAS_DETAIL_FILE, 1);
    }

    #[test]
    fn test_index_header_rejects_corruption() {
        let h = IndexHeader::new(1, ClockType::Boottime);
        let mut b = h.encode();
        b[0] = b'X';
        assert!(IndexHeader::decode(&b).is_none());

        let mut b = h.encode();
        b[24] = 33; // event_size != 32
        assert!(IndexHeader::decode(&b).is_none());
    }

    #[test]
    fn test_footer_magics_are_reversed() {
        let f = IndexFooter {
            event_count: 5,
            ..IndexFooter::default()
        };
        assert_eq!(&f.encode()[0..4], b"2ITA");
        let f = DetailFooter::default();
        assert_eq!(&f.encode()[0..4], b"2DTA");
    }

    #[test]
    fn test_detail_header_roundtrip() {
        let mut h = DetailHeader::new(9);
        h.event_count = 2;
        h.bytes_length = 300;
        h.index_seq_start = 0;
        h.index_seq_end = 2;
        let d = DetailHeader::decode(&h.encode()).unwrap();
        assert_eq!(d.thread_id, 9);
        assert_eq!(d.event_count, 2);
        assert_eq!(d.bytes_length, 300);
        assert_eq!(d.index_seq_end, 2);
    }

    #[test]
    fn test_detail_event_header_roundtrip() {
        let h = DetailEventHeader {
            total_length: 24 + 100,
            event_type: DETAIL_EVENT_FUNCTION_CALL,
            flags: 0,
            index_seq: 17,
            thread_id: 3,
            timestamp_ns: 1000,
        };
        assert_eq!(DetailEventHeader::decode(&h.encode()), h);
    }

    #[test]
    fn test_payload_encoding_truncates_to_stack_size() {
        let mut p = DetailFunctionPayload {
            function_id: 0xF00D,
            stack_size: 16,
            ..DetailFunctionPayload::default()
        };
        p.regs[0] = 0xA;
        p.stack[..16].copy_from_slice(&[0xEE; 16]);

        assert_eq!(p.encoded_len(), 116);
        let mut buf = vec![0u8; p.encoded_len()];
        assert_eq!(p.encode_into(&mut buf), 116);

        let d = DetailFunctionPayload::decode(&buf).unwrap();
        assert_eq!(d.function_id, 0xF00D);
        assert_eq!(d.regs[0], 0xA);
        assert_eq!(d.stack_size, 16);
        assert_eq!(&d.stack[..16], &[0xEE; 16]);
    }

    #[test]
    fn test_detail_record_roundtrip() {
        let mut rec = DetailRecord {
            timestamp_ns: 77,
            function_id: 0xCAFE,
            thread_id: 2,
            event_kind: EventKind::Return as u32,
            call_depth: 1,
            index_seq: 40,
            ..DetailRecord::default()
        };
        rec.payload.regs[0] = 0xBEEF; // return value slot
        rec.payload.stack_size = 8;

        let b = rec.encode();
        let d = DetailRecord::decode(&b).unwrap();
        assert_eq!(d.timestamp_ns, 77);
        assert_eq!(d.index_seq, 40);
        assert_eq!(d.payload.regs[0], 0xBEEF);
        assert_eq!(d.payload.stack_size, 8);
    }

    #[test]
    fn test_event_kind_detail_mapping() {
        assert_eq!(EventKind::Call.detail_event_type(), 3);
        assert_eq!(EventKind::Return.detail_event_type(), 4);
        assert_eq!(EventKind::Exception.detail_event_type(), 3);
        assert_eq!(EventKind::from_u32(2), Some(EventKind::Return));
        assert_eq!(EventKind::from_u32(9), None);
    }
}
