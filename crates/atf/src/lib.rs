//! ADA Trace Format v2.
//!
//! Per-thread binary trace streams: a fixed-width index file every traced
//! thread gets, and a variable-width detail file created lazily when rich
//! capture is active. The two are bidirectionally linked by sequence
//! numbers - `IndexEvent.detail_seq` points forward, the detail event's
//! `index_seq` points back - so a reader can start from either stream.
//!
//! Writers follow a placeholder-then-rewrite discipline: headers go out
//! first with zero counts, the footer (reversed magic) is appended at
//! finalize, and the header is rewritten with authoritative values. A file
//! without its footer is a crash artifact and readers fall back to
//! scanning.

mod counters;
mod detail_writer;
mod index_writer;
mod thread_writer;
pub mod types;

pub use counters::ThreadCounters;
pub use detail_writer::DetailWriter;
pub use index_writer::{AtfError, IndexWriter};
pub use thread_writer::ThreadWriter;
pub use types::{
    current_arch, current_os, default_clock_type, Arch, ClockType, DetailEventHeader,
    DetailFooter, DetailFunctionPayload, DetailHeader, DetailRecord, EventKind, IndexEvent,
    IndexFooter, IndexHeader, DETAIL_EVENT_FUNCTION_CALL, DETAIL_EVENT_FUNCTION_RETURN,
    DETAIL_EVENT_HEADER_SIZE, DETAIL_FOOTER_SIZE, DETAIL_FUNCTION_PAYLOAD_SIZE,
    DETAIL_HEADER_SIZE, DETAIL_RECORD_SIZE, INDEX_EVENT_SIZE, INDEX_FLAG_HAS_DETAIL_FILE,
    INDEX_FOOTER_SIZE, INDEX_HEADER_SIZE, INVALID_SEQUENCE, MAX_STACK_SNAPSHOT, NO_DETAIL_SEQ,
};
