use crate::counters::ThreadCounters;
use crate::detail_writer::DetailWriter;
use crate::index_writer::{AtfError, IndexWriter};
use crate::types::{
    ClockType, DetailRecord, EventKind, IndexEvent, INVALID_SEQUENCE, NO_DETAIL_SEQ,
};
use std::path::{Path, PathBuf};

/// Coordinated `(index, detail)` writer pair for one thread.
///
/// Owns the bidirectional linking: the index event's `detail_seq` points
/// forward, the detail event's `index_seq` points back. The detail file is
/// created lazily on the first detail-bearing event, at which point the
/// index header's has-detail flag is set.
///
/// Failure semantics are "best effort, bounded loss": the first I/O error
/// poisons the writer, [`ThreadWriter::write_event`] then returns
/// [`INVALID_SEQUENCE`] instead of erroring on every subsequent call, and
/// the error surfaces again from [`ThreadWriter::finalize`].
pub struct ThreadWriter {
    index: IndexWriter,
    detail: Option<DetailWriter>,
    counters: ThreadCounters,
    session_dir: PathBuf,
    thread_id: u32,
    failed: Option<AtfError>,
}

impl ThreadWriter {
    /// Opens `session_dir/thread_<id>/index.atf` with a placeholder header.
    pub fn create(
        session_dir: &Path,
        thread_id: u32,
        clock_type: ClockType,
    ) -> Result<Self, AtfError> {
        let index_path = session_dir
            .join(format!("thread_{thread_id}"))
            .join("index.atf");
        let index = IndexWriter::create(&index_path, thread_id, clock_type)?;

        Ok(Self {
            index,
            detail: None,
            counters: ThreadCounters::new(),
            session_dir: session_dir.to_path_buf(),
            thread_id,
            failed: None,
        })
    }

    fn detail_path(&self) -> PathBuf {
        self.session_dir
            .join(format!("thread_{}", self.thread_id))
            .join("detail.atf")
    }

    fn ensure_detail_writer(&mut self) -> Result<&mut DetailWriter, AtfError> {
        if self.detail.is_none() {
            let writer = DetailWriter::create(&self.detail_path(), self.thread_id)?;
            self.index.set_has_detail_file();
            self.detail = Some(writer);
        }
        Ok(self.detail.as_mut().expect("just created"))
    }

    fn poison(&mut self, err: AtfError) -> u32 {
        log::warn!("thread {} writer failed: {err}", self.thread_id);
        if self.failed.is_none() {
            self.failed = Some(err);
        }
        INVALID_SEQUENCE
    }

    /// Reserve-and-link write: one index event, optionally one detail
    /// event carrying `detail_payload`.
    ///
    /// Returns the index sequence, or [`INVALID_SEQUENCE`] once the writer
    /// has failed.
    pub fn write_event(
        &mut self,
        timestamp_ns: u64,
        function_id: u64,
        event_kind: EventKind,
        call_depth: u32,
        detail_payload: Option<&[u8]>,
    ) -> u32 {
        if self.failed.is_some() {
            return INVALID_SEQUENCE;
        }

        let has_detail = detail_payload.is_some_and(|p| !p.is_empty());
        let (idx_seq, det_seq) = self.counters.reserve(has_detail);

        let event = IndexEvent {
            timestamp_ns,
            function_id,
            thread_id: self.thread_id,
            event_kind: event_kind as u32,
            call_depth,
            detail_seq: det_seq,
        };
        if let Err(e) = self.index.write_event(&event) {
            return self.poison(e);
        }

        if has_detail {
            let payload = detail_payload.unwrap_or(&[]);
            let write = self.ensure_detail_writer().and_then(|w| {
                w.write_event(
                    idx_seq,
                    timestamp_ns,
                    event_kind.detail_event_type(),
                    payload,
                )
            });
            if let Err(e) = write {
                return self.poison(e);
            }
        }

        idx_seq
    }

    /// Pass-through index write used by the drain: the record's sequence
    /// links were reserved producer-side and are preserved byte for byte.
    pub fn write_index_record(&mut self, event: &IndexEvent) -> Result<(), AtfError> {
        self.index.write_event(event)
    }

    /// Pass-through detail write used by the drain. Creates the detail
    /// file lazily and re-encodes the fixed in-ring record into the
    /// variable-length on-disk form.
    pub fn write_detail_record(&mut self, record: &DetailRecord) -> Result<(), AtfError> {
        let kind = EventKind::from_u32(record.event_kind).unwrap_or(EventKind::Call);
        let mut payload = [0u8; crate::types::DETAIL_FUNCTION_PAYLOAD_SIZE
            + crate::types::MAX_STACK_SNAPSHOT];
        let len = record.payload.encode_into(&mut payload);

        let writer = self.ensure_detail_writer()?;
        writer.write_event(
            record.index_seq,
            record.timestamp_ns,
            kind.detail_event_type(),
            &payload[..len],
        )
    }

    /// Whether the detail file has been created.
    pub fn has_detail_file(&self) -> bool {
        self.detail.is_some()
    }

    pub fn thread_id(&self) -> u32 {
        self.thread_id
    }

    /// Index events written so far.
    pub fn index_event_count(&self) -> u64 {
        self.index.event_count()
    }

    /// Detail events written so far.
    pub fn detail_event_count(&self) -> u64 {
        self.detail.as_ref().map_or(0, DetailWriter::event_count)
    }

    /// Next `(index_seq, detail_seq)` pair without a write; testing and
    /// diagnostics.
    pub fn peek_counters(&self) -> (u32, u32) {
        (self.counters.index_count(), self.counters.detail_count())
    }

    /// Flushes and finalizes both files.
    ///
    /// Returns the first error encountered, after attempting to finalize
    /// everything (a failed detail file must not lose the index footer).
    pub fn finalize(&mut self) -> Result<(), AtfError> {
        let mut first_err = self.failed.take();

        if let Err(e) = self.index.finalize() {
            first_err.get_or_insert(e);
        }
        if let Some(detail) = self.detail.as_mut() {
            if let Err(e) = detail.finalize() {
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
