use crate::types::{
    ClockType, IndexEvent, IndexFooter, IndexHeader, INDEX_EVENT_SIZE, INDEX_FLAG_HAS_DETAIL_FILE,
};
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// ATF writer failure. I/O errors carry the path of the affected file.
#[derive(Debug, Error)]
pub enum AtfError {
    #[error("atf i/o on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("writer already finalized")]
    Finalized,
}

impl AtfError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Creates `dir` and its parents with mode 0755.
pub(crate) fn create_dir_0755(dir: &Path) -> std::io::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }
    builder.create(dir)
}

/// Buffered writer for one thread's `index.atf`.
///
/// Writes a placeholder header, streams fixed 32-byte events, then at
/// finalize appends the footer and rewrites the header with the final
/// counts, time range and footer offset.
pub struct IndexWriter {
    file: BufWriter<File>,
    path: PathBuf,
    header: IndexHeader,
    event_count: u64,
    time_start_ns: u64,
    time_end_ns: u64,
    finalized: bool,
}

impl IndexWriter {
    /// Opens `path` (creating parent directories) and writes the
    /// placeholder header.
    pub fn create(path: &Path, thread_id: u32, clock_type: ClockType) -> Result<Self, AtfError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                create_dir_0755(dir).map_err(|e| AtfError::io(path, e))?;
            }
        }

        let file = File::create(path).map_err(|e| AtfError::io(path, e))?;
        let mut file = BufWriter::new(file);
        let header = IndexHeader::new(thread_id, clock_type);
        file.write_all(&header.encode())
            .map_err(|e| AtfError::io(path, e))?;

        log::debug!("index writer opened {} (thread {thread_id})", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
            header,
            event_count: 0,
            time_start_ns: 0,
            time_end_ns: 0,
            finalized: false,
        })
    }

    /// Appends one event and extends the time range.
    pub fn write_event(&mut self, event: &IndexEvent) -> Result<(), AtfError> {
        if self.finalized {
            return Err(AtfError::Finalized);
        }
        if self.event_count == 0 {
            self.time_start_ns = event.timestamp_ns;
        }
        self.time_end_ns = event.timestamp_ns;

        self.file
            .write_all(&event.encode())
            .map_err(|e| AtfError::io(&self.path, e))?;
        self.event_count += 1;
        Ok(())
    }

    /// Records that a detail file exists; lands in the header at finalize.
    pub fn set_has_detail_file(&mut self) {
        self.header.flags |= INDEX_FLAG_HAS_DETAIL_FILE;
    }

    /// Events written so far.
    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the footer and rewrites the header with final values.
    pub fn finalize(&mut self) -> Result<(), AtfError> {
        if self.finalized {
            return Err(AtfError::Finalized);
        }
        let io = |e| AtfError::io(&self.path, e);

        self.file.flush().map_err(io)?;
        let footer_offset = self.file.stream_position().map_err(io)?;

        let footer = IndexFooter {
            checksum: 0,
            event_count: self.event_count,
            time_start_ns: self.time_start_ns,
            time_end_ns: self.time_end_ns,
            bytes_written: self.event_count * INDEX_EVENT_SIZE as u64,
        };
        self.file.write_all(&footer.encode()).map_err(io)?;

        self.header.event_count = self.event_count as u32;
        self.header.footer_offset = footer_offset;
        self.header.time_start_ns = self.time_start_ns;
        self.header.time_end_ns = self.time_end_ns;

        self.file.seek(SeekFrom::Start(0)).map_err(io)?;
        self.file.write_all(&self.header.encode()).map_err(io)?;
        self.file.flush().map_err(io)?;

        self.finalized = true;
        log::debug!(
            "finalized {}: {} events, footer at {footer_offset}",
            self.path.display(),
            self.event_count
        );
        Ok(())
    }
}
