//! Streaming chunk diff under a hard memory cap.
//!
//! Both inputs are read sequentially in fixed `chunk_size` pieces through one
//! reusable buffer; only the 32-byte strong digest of each chunk is kept.
//! The two digest sequences are compared by position:
//!
//! | Old chunk | New chunk | Record |
//! |-----------|-----------|--------|
//! | —         | present   | `added` |
//! | present   | —         | `removed` |
//! | hash A    | hash B    | `modified` |
//! | hash A    | hash A    | none |
//!
//! Chunking is at fixed offsets, so one inserted byte near the start makes
//! every later chunk compare as `modified`.  Content-defined chunking belongs
//! upstream of this module.
//!
//! # Memory
//! A [`MemoryMonitor`] samples usage on its own thread and the main path
//! checkpoints after every chunk.  Crossing the cap aborts the run with
//! [`StreamError::MemoryLimitExceeded`]; the output is staged in a temporary
//! file beside the destination and only persisted on success, so an aborted
//! run leaves nothing behind.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::hash::{strong_hash, to_hex, Digest};

pub mod monitor;

pub use monitor::{MemoryMonitor, MemoryProbe, MonitorStatus, PressureFn, ProcessMemory};

/// Record format tag written into every output.
pub const FORMAT_TAG: &str = "hdiff-stream-v1.1";

/// Default hard cap: 200 MiB.
pub const DEFAULT_MAX_MEMORY:      u64      = 200 * 1024 * 1024;
/// Default chunk size: 64 MiB.
pub const DEFAULT_CHUNK_SIZE:      usize    = 64 * 1024 * 1024;
pub const DEFAULT_WARNING_RATIO:   f64      = 0.8;
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("invalid options: {0}")]
    InvalidOptions(String),
    #[error("memory limit exceeded: {used} bytes in use, limit {limit}")]
    MemoryLimitExceeded { used: u64, limit: u64 },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ── StreamOptions ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Hard cap on observed memory, in bytes.
    pub max_memory:      u64,
    pub chunk_size:      usize,
    /// Fraction of `max_memory` that triggers backpressure.
    pub warning_ratio:   f64,
    pub sample_interval: Duration,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            max_memory:      DEFAULT_MAX_MEMORY,
            chunk_size:      DEFAULT_CHUNK_SIZE,
            warning_ratio:   DEFAULT_WARNING_RATIO,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
        }
    }
}

impl StreamOptions {
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.chunk_size == 0 {
            return Err(StreamError::InvalidOptions("chunk_size must be non-zero".into()));
        }
        if self.chunk_size as u64 > self.max_memory {
            return Err(StreamError::InvalidOptions(format!(
                "chunk_size {} exceeds max_memory {}",
                self.chunk_size, self.max_memory
            )));
        }
        if !(self.warning_ratio > 0.0 && self.warning_ratio <= 1.0) {
            return Err(StreamError::InvalidOptions(format!(
                "warning_ratio {} outside (0, 1]",
                self.warning_ratio
            )));
        }
        if self.sample_interval.is_zero() {
            return Err(StreamError::InvalidOptions("sample_interval must be non-zero".into()));
        }
        Ok(())
    }
}

// ── Progress ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    ReadingOld,
    ReadingNew,
    Diffing,
    Writing,
    Complete,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub phase:            Phase,
    pub processed_bytes:  u64,
    pub total_bytes:      u64,
    pub processed_chunks: u64,
    pub total_chunks:     u64,
    /// Bytes, as last sampled by the monitor.
    pub memory_usage:     u64,
    /// Bytes per second since the run started.
    pub throughput:       f64,
    pub eta_secs:         f64,
}

pub type ProgressFn<'a> = dyn FnMut(&Progress) + 'a;

// ── Output record ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkChange {
    #[serde(rename = "type")]
    pub kind:     ChangeKind,
    pub index:    u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSummary {
    pub path:   String,
    pub size:   u64,
    pub chunks: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMetadata {
    pub chunk_size: u64,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDiffRecord {
    pub format:   String,
    pub old_file: FileSummary,
    pub new_file: FileSummary,
    pub diff:     Vec<ChunkChange>,
    pub metadata: StreamMetadata,
}

impl StreamDiffRecord {
    pub fn count(&self, kind: ChangeKind) -> usize {
        self.diff.iter().filter(|c| c.kind == kind).count()
    }
}

/// Positional comparison of two chunk-digest sequences.
pub fn diff_chunk_hashes(old: &[Digest], new: &[Digest]) -> Vec<ChunkChange> {
    let n = old.len().max(new.len());
    (0..n)
        .filter_map(|i| {
            let change = |kind, before: Option<&Digest>, after: Option<&Digest>| ChunkChange {
                kind,
                index:    i as u64,
                old_hash: before.map(|d| to_hex(d)),
                new_hash: after.map(|d| to_hex(d)),
            };
            match (old.get(i), new.get(i)) {
                (None, Some(b))             => Some(change(ChangeKind::Added, None, Some(b))),
                (Some(a), None)             => Some(change(ChangeKind::Removed, Some(a), None)),
                (Some(a), Some(b)) if a != b => Some(change(ChangeKind::Modified, Some(a), Some(b))),
                _                           => None,
            }
        })
        .collect()
}

// ── ChunkReader ───────────────────────────────────────────────────────────────

/// Fixed-size sequential reader over one reusable buffer.  Every chunk but
/// the last is exactly `chunk_size` bytes.
pub struct ChunkReader<R> {
    inner: R,
    buf:   Vec<u8>,
}

impl<R: Read> ChunkReader<R> {
    pub fn new(inner: R, chunk_size: usize) -> Self {
        Self::with_buffer(inner, vec![0u8; chunk_size.max(1)])
    }

    /// Reuse an existing buffer; its length is the chunk size.
    pub fn with_buffer(inner: R, buf: Vec<u8>) -> Self {
        Self { inner, buf }
    }

    pub fn into_buffer(self) -> Vec<u8> {
        self.buf
    }

    pub fn next_chunk(&mut self) -> io::Result<Option<&[u8]>> {
        let mut filled = 0;
        while filled < self.buf.len() {
            match self.inner.read(&mut self.buf[filled..]) {
                Ok(0)  => break,
                Ok(n)  => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok((filled > 0).then(|| &self.buf[..filled]))
    }
}

// ── StreamingDiff ─────────────────────────────────────────────────────────────

pub struct StreamingDiff<'a> {
    options:     StreamOptions,
    probe:       Arc<dyn MemoryProbe>,
    on_progress: Option<Box<ProgressFn<'a>>>,
    on_pressure: Option<Arc<PressureFn>>,
}

struct Run<'r, 'a> {
    monitor:     &'r MemoryMonitor,
    on_progress: &'r mut Option<Box<ProgressFn<'a>>>,
    started:     Instant,
    total_bytes: u64,
    total_chunks: u64,
    bytes:       u64,
    chunks:      u64,
}

impl Run<'_, '_> {
    fn checkpoint(&self) -> Result<MonitorStatus, StreamError> {
        let st = self.monitor.checkpoint();
        if st.exceeded {
            return Err(StreamError::MemoryLimitExceeded {
                used:  st.peak,
                limit: self.monitor.limit(),
            });
        }
        Ok(st)
    }

    fn report(&mut self, phase: Phase, memory_usage: u64) {
        let Some(cb) = self.on_progress.as_mut() else { return };
        let elapsed    = self.started.elapsed().as_secs_f64();
        let throughput = if elapsed > 0.0 { self.bytes as f64 / elapsed } else { 0.0 };
        let remaining  = self.total_bytes.saturating_sub(self.bytes) as f64;
        let eta_secs   = if throughput > 0.0 { remaining / throughput } else { 0.0 };
        cb(&Progress {
            phase,
            processed_bytes:  self.bytes,
            total_bytes:      self.total_bytes,
            processed_chunks: self.chunks,
            total_chunks:     self.total_chunks,
            memory_usage,
            throughput,
            eta_secs,
        });
    }

    fn hash_file(&mut self, path: &Path, buf: Vec<u8>, phase: Phase)
        -> Result<(Vec<Digest>, Vec<u8>), StreamError>
    {
        let mut reader  = ChunkReader::with_buffer(File::open(path)?, buf);
        let mut digests = Vec::new();
        while let Some(chunk) = reader.next_chunk()? {
            digests.push(strong_hash(chunk));
            self.bytes  += chunk.len() as u64;
            self.chunks += 1;
            let st = self.checkpoint()?;
            self.report(phase, st.current);
        }
        Ok((digests, reader.into_buffer()))
    }
}

impl<'a> StreamingDiff<'a> {
    pub fn new(options: StreamOptions) -> Self {
        Self {
            options,
            probe:       Arc::new(ProcessMemory::new()),
            on_progress: None,
            on_pressure: None,
        }
    }

    /// Replace the memory source (default: process resident memory).
    pub fn with_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn on_progress<F: FnMut(&Progress) + 'a>(mut self, f: F) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    /// Called at most once per run, with the usage that crossed the warning
    /// threshold.  May run on the sampler thread.
    pub fn on_backpressure<F: Fn(u64) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.on_pressure = Some(Arc::new(f));
        self
    }

    pub fn options(&self) -> &StreamOptions {
        &self.options
    }

    /// Diff `old` against `new` and write the JSON record to `out`.
    pub fn run(&mut self, old: &Path, new: &Path, out: &Path) -> Result<StreamDiffRecord, StreamError> {
        self.options.validate()?;
        let chunk_size = self.options.chunk_size;
        let old_size   = std::fs::metadata(old)?.len();
        let new_size   = std::fs::metadata(new)?.len();
        let chunks_of  = |size: u64| size.div_ceil(chunk_size as u64);

        let monitor = MemoryMonitor::start(
            Arc::clone(&self.probe),
            self.options.max_memory,
            self.options.warning_ratio,
            self.options.sample_interval,
            self.on_pressure.clone(),
        );

        let mut run = Run {
            monitor:      &monitor,
            on_progress:  &mut self.on_progress,
            started:      Instant::now(),
            total_bytes:  old_size + new_size,
            total_chunks: chunks_of(old_size) + chunks_of(new_size),
            bytes:        0,
            chunks:       0,
        };
        run.checkpoint()?;

        let buf = vec![0u8; chunk_size];
        let (old_digests, buf) = run.hash_file(old, buf, Phase::ReadingOld)?;
        let (new_digests, _)   = run.hash_file(new, buf, Phase::ReadingNew)?;

        let st = run.checkpoint()?;
        run.report(Phase::Diffing, st.current);
        let diff = diff_chunk_hashes(&old_digests, &new_digests);
        debug!("{} chunk change(s) between {} and {} chunks", diff.len(), old_digests.len(), new_digests.len());

        let record = StreamDiffRecord {
            format:   FORMAT_TAG.to_owned(),
            old_file: FileSummary { path: old.display().to_string(), size: old_size, chunks: old_digests.len() as u64 },
            new_file: FileSummary { path: new.display().to_string(), size: new_size, chunks: new_digests.len() as u64 },
            diff,
            metadata: StreamMetadata {
                chunk_size: chunk_size as u64,
                created_at: Utc::now().to_rfc3339(),
            },
        };

        let st = run.checkpoint()?;
        run.report(Phase::Writing, st.current);
        let dir = match out.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _                                    => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(tmp.as_file_mut(), &record)?;
        tmp.as_file().sync_all()?;
        // Last point at which the cap may abort the run; once persisted the
        // output stays.
        run.checkpoint()?;
        tmp.persist(out).map_err(|e| e.error)?;

        let st = monitor.status();
        run.report(Phase::Complete, st.current);
        let fin = monitor.stop();
        info!(
            "stream diff written to {} ({} change(s), peak memory {} bytes)",
            out.display(),
            record.diff.len(),
            fin.peak
        );
        Ok(record)
    }
}

/// Convenience: diff with default probe and no callbacks.
pub fn diff(old: &Path, new: &Path, out: &Path, options: StreamOptions) -> Result<StreamDiffRecord, StreamError> {
    StreamingDiff::new(options).run(old, new, out)
}
