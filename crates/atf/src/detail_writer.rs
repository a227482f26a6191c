use crate::index_writer::{create_dir_0755, AtfError};
use crate::types::{
    DetailEventHeader, DetailFooter, DetailHeader, DETAIL_EVENT_HEADER_SIZE,
};
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Buffered writer for one thread's `detail.atf`.
///
/// Variable-length events: 24-byte header with a `total_length` prefix,
/// then the payload. Tracks the covered index-sequence range for the
/// finalized header so readers can seek without scanning.
pub struct DetailWriter {
    file: BufWriter<File>,
    path: PathBuf,
    header: DetailHeader,
    event_count: u64,
    bytes_written: u64,
    time_start_ns: u64,
    time_end_ns: u64,
    index_seq_start: u32,
    index_seq_end: u32,
    finalized: bool,
}

impl DetailWriter {
    /// Opens `path` (creating parent directories) and writes the
    /// placeholder header.
    pub fn create(path: &Path, thread_id: u32) -> Result<Self, AtfError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                create_dir_0755(dir).map_err(|e| AtfError::io(path, e))?;
            }
        }

        let file = File::create(path).map_err(|e| AtfError::io(path, e))?;
        let mut file = BufWriter::new(file);
        let header = DetailHeader::new(thread_id);
        file.write_all(&header.encode())
            .map_err(|e| AtfError::io(path, e))?;

        log::debug!("detail writer opened {} (thread {thread_id})", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
            header,
            event_count: 0,
            bytes_written: 0,
            time_start_ns: 0,
            time_end_ns: 0,
            // Start above any real sequence so the first event sets it.
            index_seq_start: u32::MAX,
            index_seq_end: 0,
            finalized: false,
        })
    }

    /// Appends one event: header with backward link, then the payload.
    pub fn write_event(
        &mut self,
        index_seq: u32,
        timestamp_ns: u64,
        event_type: u16,
        payload: &[u8],
    ) -> Result<(), AtfError> {
        if self.finalized {
            return Err(AtfError::Finalized);
        }

        let header = DetailEventHeader {
            total_length: (DETAIL_EVENT_HEADER_SIZE + payload.len()) as u32,
            event_type,
            flags: 0,
            index_seq,
            thread_id: self.header.thread_id,
            timestamp_ns,
        };

        if self.event_count == 0 {
            self.time_start_ns = timestamp_ns;
        }
        self.time_end_ns = timestamp_ns;
        self.index_seq_start = self.index_seq_start.min(index_seq);
        self.index_seq_end = self.index_seq_end.max(index_seq);

        let io = |e| AtfError::io(&self.path, e);
        self.file.write_all(&header.encode()).map_err(io)?;
        if !payload.is_empty() {
            self.file.write_all(payload).map_err(io)?;
        }

        self.event_count += 1;
        self.bytes_written += u64::from(header.total_length);
        Ok(())
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the footer and rewrites the header with final counts and the
    /// covered index-sequence range.
    pub fn finalize(&mut self) -> Result<(), AtfError> {
        if self.finalized {
            return Err(AtfError::Finalized);
        }
        let io = |e| AtfError::io(&self.path, e);

        self.file.flush().map_err(io)?;

        let footer = DetailFooter {
            checksum: 0,
            event_count: self.event_count,
            bytes_length: self.bytes_written,
            time_start_ns: self.time_start_ns,
            time_end_ns: self.time_end_ns,
        };
        self.file.write_all(&footer.encode()).map_err(io)?;

        self.header.event_count = self.event_count;
        self.header.bytes_length = self.bytes_written;
        if self.event_count > 0 {
            self.header.index_seq_start = u64::from(self.index_seq_start);
            self.header.index_seq_end = u64::from(self.index_seq_end);
        }

        self.file.seek(SeekFrom::Start(0)).map_err(io)?;
        self.file.write_all(&self.header.encode()).map_err(io)?;
        self.file.flush().map_err(io)?;

        self.finalized = true;
        log::debug!(
            "finalized {}: {} detail events, {} payload bytes",
            self.path.display(),
            self.event_count,
            self.bytes_written
        );
        Ok(())
    }
}
