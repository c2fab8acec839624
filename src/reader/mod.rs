//! FTDC file reader
//!
//! An FTDC file is a bare concatenation of BSON documents. Each carries a
//! `_id` timestamp, a `type` in {0, 1, 2} and either a nested metadata
//! document (`doc`) or a compressed metric chunk (`data`). The reader
//! walks the file forward, decodes metric chunks one at a time and yields
//! their samples lazily; at most one decoded chunk is resident.
//!
//! Live producers leave an interim file whose last document may be cut at
//! an arbitrary byte. A partial trailing document ends iteration with the
//! samples decoded so far; see [`DecodeError::TruncatedInterim`].

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use crate::decode::bson::{Document, Value};
use crate::decode::chunk::chunk_counts;
use crate::decode::error::{DecodeError, DecodeResult};
use crate::decode::{Chunk, Sample};

/// Sanity bound on a single framing document
const MAX_DOCUMENT_SIZE: usize = 100_000_000;

/// Kind of a top-level framing document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// Process and host metadata (type 0)
    Metadata,
    /// Compressed metric chunk (type 1)
    MetricChunk,
    /// Periodically refreshed metadata (type 2)
    PeriodicMetadata,
}

impl TryFrom<i32> for DocumentKind {
    type Error = DecodeError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DocumentKind::Metadata),
            1 => Ok(DocumentKind::MetricChunk),
            2 => Ok(DocumentKind::PeriodicMetadata),
            other => Err(DecodeError::UnknownDocumentType(other)),
        }
    }
}

/// One top-level document read from the file
#[derive(Debug, Clone)]
pub struct FramingDocument {
    /// The `_id` field, reinterpreted as UTC
    pub timestamp: DateTime<Utc>,
    pub kind: DocumentKind,
    document: Document,
}

impl FramingDocument {
    /// Metadata payload (`doc` field) for type 0/2 documents
    pub fn metadata(&self) -> Option<&Document> {
        match self.document.get("doc") {
            Some(Value::Document(doc)) => Some(doc),
            _ => None,
        }
    }

    /// Chunk payload (`data` field) for type 1 documents
    pub fn chunk_data(&self) -> Option<&[u8]> {
        match self.document.get("data") {
            Some(Value::Binary { data, .. }) => Some(data),
            _ => None,
        }
    }
}

/// Cooperative cancellation flag, checked at document and chunk boundaries.
///
/// Clones share the flag and may be handed to other threads.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// What to do when a chunk's flattened paths differ from the previous
/// chunk's
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaChangePolicy {
    /// Surface a schema mismatch error
    Error,
    /// Accept it; a new reference document legitimately begins a new
    /// schema
    #[default]
    NewChunk,
}

/// Options consumed by [`FtdcReader::iter_samples`]
#[derive(Default)]
pub struct ReaderOptions {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    metric_filter: Option<Box<dyn Fn(&str) -> bool>>,
    on_schema_change: SchemaChangePolicy,
    cancel: CancelToken,
}

impl ReaderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep samples at or after `start` (inclusive)
    pub fn start_time(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    /// Keep samples strictly before `end` (exclusive)
    pub fn end_time(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }

    /// Half-open interval `[start, end)`, bounds compared against sample
    /// timestamps
    pub fn time_range(self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start_time(start).end_time(end)
    }

    /// Keep only metrics whose path satisfies the predicate. Filtered
    /// metrics still consume their decoder columns.
    pub fn metric_filter(mut self, filter: impl Fn(&str) -> bool + 'static) -> Self {
        self.metric_filter = Some(Box::new(filter));
        self
    }

    pub fn on_schema_change(mut self, policy: SchemaChangePolicy) -> Self {
        self.on_schema_change = policy;
        self
    }

    /// Attach an externally controlled cancellation token
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }
}

/// Streaming reader over one FTDC file
pub struct FtdcReader<R: Read> {
    source: R,
    /// Most recent type 0/2 payload seen while advancing
    last_metadata: Option<Document>,
    /// Flattened paths of the most recently decoded chunk
    current_paths: Option<Vec<String>>,
    done: bool,
}

impl FtdcReader<BufReader<File>> {
    /// Open an FTDC file. The handle is released when the reader drops.
    pub fn open(path: impl AsRef<Path>) -> DecodeResult<Self> {
        let file = File::open(path.as_ref())?;
        Ok(FtdcReader::new(BufReader::new(file)))
    }
}

impl<R: Read> FtdcReader<R> {
    /// Wrap any byte source
    pub fn new(source: R) -> Self {
        Self {
            source,
            last_metadata: None,
            current_paths: None,
            done: false,
        }
    }

    /// Read the next framing document, or None at a clean end of file.
    ///
    /// A document cut off by the end of the file yields
    /// [`DecodeError::TruncatedInterim`] and parks the reader; everything
    /// decoded before it remains valid.
    pub fn next_document(&mut self) -> DecodeResult<Option<FramingDocument>> {
        if self.done {
            return Ok(None);
        }

        let mut size_buf = [0u8; 4];
        let got = read_full(&mut self.source, &mut size_buf)?;
        if got == 0 {
            self.done = true;
            return Ok(None);
        }
        if got < 4 {
            self.done = true;
            return Err(DecodeError::TruncatedInterim);
        }

        let size = u32::from_le_bytes(size_buf) as usize;
        if size < 5 {
            return Err(DecodeError::MalformedBson(format!(
                "invalid document size: {}",
                size
            )));
        }
        if size > MAX_DOCUMENT_SIZE {
            return Err(DecodeError::MalformedBson(format!(
                "document too large: {} bytes",
                size
            )));
        }

        let mut bytes = vec![0u8; size];
        bytes[..4].copy_from_slice(&size_buf);
        let got = read_full(&mut self.source, &mut bytes[4..])?;
        if got < size - 4 {
            self.done = true;
            return Err(DecodeError::TruncatedInterim);
        }

        let document = Document::parse(&bytes)?;

        let timestamp = match document.get("_id") {
            Some(Value::DateTime(millis)) => Utc
                .timestamp_millis_opt(*millis)
                .single()
                .ok_or_else(|| {
                    DecodeError::MalformedBson(format!("_id out of range: {}", millis))
                })?,
            _ => {
                return Err(DecodeError::MalformedBson(
                    "document missing _id timestamp".into(),
                ))
            }
        };

        let kind = match document.get("type") {
            Some(Value::Int32(t)) => DocumentKind::try_from(*t)?,
            Some(Value::Int64(t)) => DocumentKind::try_from(*t as i32)?,
            _ => {
                return Err(DecodeError::MalformedBson(
                    "document missing type field".into(),
                ))
            }
        };

        let doc = FramingDocument {
            timestamp,
            kind,
            document,
        };

        if kind != DocumentKind::MetricChunk {
            if let Some(meta) = doc.metadata() {
                self.last_metadata = Some(meta.clone());
            }
        }

        Ok(Some(doc))
    }

    /// Most recent metadata payload seen so far
    pub fn metadata(&self) -> Option<&Document> {
        self.last_metadata.as_ref()
    }

    /// Ordered metric paths of the current chunk; None before the first
    /// chunk decodes
    pub fn metric_names(&self) -> Option<&[String]> {
        self.current_paths.as_deref()
    }

    /// Iterate decoded chunks
    pub fn iter_chunks(&mut self) -> ChunkIter<'_, R> {
        ChunkIter {
            reader: self,
            cancel: CancelToken::new(),
            failed: false,
        }
    }

    /// Iterate samples across all remaining chunks
    pub fn iter_samples(&mut self, options: ReaderOptions) -> SampleIter<'_, R> {
        SampleIter {
            reader: self,
            options,
            chunk: None,
            visible: None,
            next_sample: 0,
            failed: false,
        }
    }

    /// Scan the remaining documents and tally the file. Consumes the
    /// reader.
    ///
    /// Chunks are inflated only far enough to read their headers; deltas
    /// are not decoded.
    pub fn stats(&mut self) -> DecodeResult<FileStats> {
        let mut stats = FileStats::default();
        loop {
            let doc = match self.next_document() {
                Ok(Some(doc)) => doc,
                Ok(None) => break,
                Err(DecodeError::TruncatedInterim) => {
                    stats.truncated = true;
                    break;
                }
                Err(e) => return Err(e),
            };
            match doc.kind {
                DocumentKind::MetricChunk => {
                    let (_, deltas) = chunk_counts(chunk_payload(&doc)?)?;
                    stats.chunks += 1;
                    stats.samples += deltas as u64 + 1;
                    if stats.first_chunk.is_none() {
                        stats.first_chunk = Some(doc.timestamp);
                    }
                    stats.last_chunk = Some(doc.timestamp);
                }
                _ => stats.metadata_documents += 1,
            }
        }
        Ok(stats)
    }

    /// Total samples across the remaining chunks (streaming count).
    /// Consumes the reader.
    pub fn sample_count(&mut self) -> DecodeResult<u64> {
        Ok(self.stats()?.samples)
    }

    /// Number of metric-chunk documents remaining. Consumes the reader.
    pub fn chunk_count(&mut self) -> DecodeResult<u64> {
        Ok(self.stats()?.chunks)
    }

    /// First and last chunk timestamps, or None without chunks. Consumes
    /// the reader.
    pub fn time_range(&mut self) -> DecodeResult<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let stats = self.stats()?;
        Ok(stats.first_chunk.zip(stats.last_chunk))
    }

    /// All metadata payloads (types 0 and 2) in file order. Consumes the
    /// reader.
    pub fn metadata_documents(&mut self) -> DecodeResult<Vec<Document>> {
        let mut docs = Vec::new();
        while let Some(doc) = self.next_document_or_interim()? {
            if doc.kind != DocumentKind::MetricChunk {
                if let Some(meta) = doc.metadata() {
                    docs.push(meta.clone());
                }
            }
        }
        Ok(docs)
    }

    /// Like next_document, but a trailing partial document ends the scan
    fn next_document_or_interim(&mut self) -> DecodeResult<Option<FramingDocument>> {
        match self.next_document() {
            Ok(doc) => Ok(doc),
            Err(DecodeError::TruncatedInterim) => {
                tracing::warn!("file ends with a partially written document; stopping");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Tallies from a full-file scan
#[derive(Debug, Clone, Default)]
pub struct FileStats {
    /// Metric-chunk documents seen
    pub chunks: u64,
    /// Total samples across those chunks
    pub samples: u64,
    /// Metadata documents (types 0 and 2)
    pub metadata_documents: u64,
    /// Timestamp of the first chunk
    pub first_chunk: Option<DateTime<Utc>>,
    /// Timestamp of the last chunk
    pub last_chunk: Option<DateTime<Utc>>,
    /// File ended with a partially written document
    pub truncated: bool,
}

impl std::fmt::Display for FileStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} chunks, {} samples, {} metadata documents",
            self.chunks, self.samples, self.metadata_documents
        )?;
        if let (Some(first), Some(last)) = (self.first_chunk, self.last_chunk) {
            write!(f, ", spanning {} to {}", first, last)?;
        }
        if self.truncated {
            write!(f, " (interim: trailing document truncated)")?;
        }
        Ok(())
    }
}

fn chunk_payload(doc: &FramingDocument) -> DecodeResult<&[u8]> {
    doc.chunk_data().ok_or_else(|| {
        DecodeError::MalformedBson("metric chunk document missing binary data field".into())
    })
}

/// Read until `buf` is full or EOF; returns bytes read
fn read_full<R: Read>(source: &mut R, buf: &mut [u8]) -> DecodeResult<usize> {
    let mut read = 0;
    while read < buf.len() {
        match source.read(&mut buf[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(read)
}

/// Iterator over decoded chunks
pub struct ChunkIter<'a, R: Read> {
    reader: &'a mut FtdcReader<R>,
    cancel: CancelToken,
    failed: bool,
}

impl<'a, R: Read> ChunkIter<'a, R> {
    /// Attach a cancellation token checked at every document boundary
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }
}

impl<'a, R: Read> Iterator for ChunkIter<'a, R> {
    type Item = DecodeResult<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if self.cancel.is_cancelled() {
                self.failed = true;
                self.reader.done = true;
                return Some(Err(DecodeError::Cancelled));
            }

            let doc = match self.reader.next_document() {
                Ok(Some(doc)) => doc,
                Ok(None) => return None,
                Err(DecodeError::TruncatedInterim) => {
                    tracing::warn!("file ends with a partially written document; stopping");
                    return None;
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            };

            if doc.kind != DocumentKind::MetricChunk {
                continue;
            }

            let result = chunk_payload(&doc)
                .and_then(|data| Chunk::decode(data, doc.timestamp));
            match result {
                Ok(chunk) => {
                    self.reader.current_paths =
                        Some(chunk.paths().map(str::to_string).collect());
                    return Some(Ok(chunk));
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Iterator over samples, chunk by chunk in file order
pub struct SampleIter<'a, R: Read> {
    reader: &'a mut FtdcReader<R>,
    options: ReaderOptions,
    chunk: Option<Arc<Chunk>>,
    visible: Option<Arc<Vec<usize>>>,
    next_sample: usize,
    failed: bool,
}

impl<'a, R: Read> SampleIter<'a, R> {
    /// Yield the next in-range sample of the current chunk, if any
    fn drain_current(&mut self) -> Option<Sample> {
        let chunk = self.chunk.as_ref()?;
        while self.next_sample < chunk.sample_count() {
            let index = self.next_sample;
            self.next_sample += 1;

            let mut sample = Sample::new(Arc::clone(chunk), index);
            if let Some(visible) = &self.visible {
                sample = sample.with_visible(Arc::clone(visible));
            }

            let ts = sample.timestamp();
            if let Some(start) = self.options.start {
                if ts < start {
                    continue;
                }
            }
            if let Some(end) = self.options.end {
                if ts >= end {
                    continue;
                }
            }
            return Some(sample);
        }
        self.chunk = None;
        None
    }

    /// Decode the next metric chunk; returns false at end of input
    fn advance_chunk(&mut self) -> DecodeResult<bool> {
        loop {
            let doc = match self.reader.next_document() {
                Ok(Some(doc)) => doc,
                Ok(None) => return Ok(false),
                Err(DecodeError::TruncatedInterim) => {
                    tracing::warn!(
                        "file ends with a partially written document; returning samples decoded so far"
                    );
                    return Ok(false);
                }
                Err(e) => return Err(e),
            };

            if doc.kind != DocumentKind::MetricChunk {
                continue;
            }

            // The chunk timestamp lower-bounds its first sample, so a chunk
            // starting at or past the end bound holds nothing in range. No
            // symmetric skip exists for the start bound: the last sample's
            // timestamp is unknown until the `start` column is decoded, so
            // chunks before the range decode and filter sample by sample.
            if let Some(end) = self.options.end {
                if doc.timestamp >= end {
                    continue;
                }
            }

            let chunk = Chunk::decode(chunk_payload(&doc)?, doc.timestamp)?;

            let paths: Vec<String> = chunk.paths().map(str::to_string).collect();
            if self.options.on_schema_change == SchemaChangePolicy::Error {
                if let Some(previous) = &self.reader.current_paths {
                    if *previous != paths {
                        return Err(DecodeError::SchemaMismatch {
                            expected: previous.len(),
                            actual: paths.len(),
                        });
                    }
                }
            }

            self.visible = self.options.metric_filter.as_ref().map(|filter| {
                Arc::new(
                    paths
                        .iter()
                        .enumerate()
                        .filter(|(_, path)| filter(path))
                        .map(|(i, _)| i)
                        .collect::<Vec<usize>>(),
                )
            });

            self.reader.current_paths = Some(paths);
            self.chunk = Some(Arc::new(chunk));
            self.next_sample = 0;
            return Ok(true);
        }
    }
}

impl<'a, R: Read> Iterator for SampleIter<'a, R> {
    type Item = DecodeResult<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            // Observed cancellation discards the in-flight chunk.
            if self.options.cancel.is_cancelled() {
                self.failed = true;
                self.chunk = None;
                self.reader.done = true;
                return Some(Err(DecodeError::Cancelled));
            }

            if let Some(sample) = self.drain_current() {
                return Some(Ok(sample));
            }

            match self.advance_chunk() {
                Ok(true) => continue,
                Ok(false) => return None,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
