//! Streaming ZIP archive construction
//!
//! Snapshots are written to a caller-supplied [`ArchiveSink`] entry by entry
//! as their images are read, so a client receives bytes long before the whole
//! result set has been processed. Entries are written in streaming mode (local
//! header, data, data descriptor) because entry sizes are not known up front;
//! the central directory is written once every entry is done.
//!
//! Entry order is snapshot, then tile, then raw before background, exactly as
//! the query returned them.
//!
//! # Failures
//!
//! - An image that cannot be opened skips its tile. The archive stays valid
//!   but incomplete, and the omission is logged.
//! - Once the sink reports the peer gone, building stops before the next
//!   chunk and returns `TransferCancelled`. No central directory is written;
//!   the partial file the client holds is expected to be invalid.
//!
//! Building is blocking I/O and runs on a blocking thread; see
//! [`spawn_archive_stream`] for the bridge to an HTTP response body.

use axum::body::Bytes;
use chrono::{Datelike, Timelike};
use phenofront_common::{ChannelFilter, Error, Result, Snapshot};
use std::collections::HashSet;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use zip::write::{SimpleFileOptions, ZipWriter};
use zip::CompressionMethod;

use crate::images::{ImageResolver, OpenedEntry};

/// Bytes read from an image per write into the archive
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Bytes collected before a chunk is handed to the response body
const CHUNK_SIZE: usize = 64 * 1024;

/// Chunks buffered between the archive thread and the response body
const CHANNEL_DEPTH: usize = 8;

/// Destination of an archive stream
///
/// Writing is the only way data leaves; dropping the sink closes it. The
/// cancellation token is the liveness check: it is cancelled once the peer
/// has gone away, and a sink must refuse every write after that.
pub trait ArchiveSink: Write + Send {
    fn cancellation(&self) -> CancellationToken;

    fn is_alive(&self) -> bool {
        !self.cancellation().is_cancelled()
    }
}

fn peer_gone() -> io::Error {
    io::Error::new(ErrorKind::BrokenPipe, "archive stream closed by peer")
}

/// Sink feeding an HTTP response body through a bounded channel
pub struct ChannelSink {
    tx: mpsc::Sender<io::Result<Bytes>>,
    cancel: CancellationToken,
    buffer: Vec<u8>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<io::Result<Bytes>>, cancel: CancellationToken) -> Self {
        Self {
            tx,
            cancel,
            buffer: Vec::with_capacity(CHUNK_SIZE),
        }
    }

    /// Hand the buffered bytes to the body; blocks while the channel is full
    fn send_buffer(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = Bytes::from(std::mem::replace(
            &mut self.buffer,
            Vec::with_capacity(CHUNK_SIZE),
        ));
        self.tx.blocking_send(Ok(chunk)).map_err(|_| {
            self.cancel.cancel();
            peer_gone()
        })
    }
}

impl Write for ChannelSink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(peer_gone());
        }
        self.buffer.extend_from_slice(data);
        if self.buffer.len() >= CHUNK_SIZE {
            self.send_buffer()?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.cancel.is_cancelled() {
            return Err(peer_gone());
        }
        self.send_buffer()
    }
}

impl ArchiveSink for ChannelSink {
    fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// In-memory sink; clones share the same buffer
///
/// `closing_after` simulates a peer that hangs up once it has received a
/// given number of bytes.
#[derive(Clone, Default)]
pub struct MemorySink {
    data: Arc<Mutex<Vec<u8>>>,
    cancel: CancellationToken,
    limit: Option<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn closing_after(bytes: usize) -> Self {
        Self {
            limit: Some(bytes),
            ..Self::default()
        }
    }

    /// Hang up, as a disconnecting peer would
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(peer_gone());
        }
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(limit) = self.limit {
            if data.len() >= limit {
                self.cancel.cancel();
                return Err(peer_gone());
            }
        }
        data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.cancel.is_cancelled() {
            return Err(peer_gone());
        }
        Ok(())
    }
}

impl ArchiveSink for MemorySink {
    fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Stands between the ZIP writer and the sink
///
/// A `ZipWriter` that is dropped unfinished tries to finalise itself and
/// reports the failure on stderr. Once the transfer is cancelled, writes are
/// swallowed here instead: nothing more reaches the sink and the drop stays
/// quiet.
struct ShieldedSink<S> {
    sink: S,
    cancel: CancellationToken,
}

impl<S: ArchiveSink> ShieldedSink<S> {
    fn new(sink: S) -> Self {
        let cancel = sink.cancellation();
        Self { sink, cancel }
    }
}

impl<S: ArchiveSink> Write for ShieldedSink<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Ok(buf.len());
        }
        self.sink.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }
        self.sink.flush()
    }
}

/// What a completed archive contains
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries_written: usize,
    /// Tiles left out because an image could not be opened
    pub tiles_skipped: usize,
    /// Uncompressed image bytes copied into entries
    pub bytes_written: u64,
}

/// Writes snapshots' images into a ZIP stream
#[derive(Clone)]
pub struct ArchiveBuilder {
    resolver: ImageResolver,
}

impl ArchiveBuilder {
    pub fn new(resolver: ImageResolver) -> Self {
        Self { resolver }
    }

    /// Write every selected image of `snapshots` to `sink` and finish the archive
    pub fn build<S: ArchiveSink>(
        &self,
        sink: S,
        snapshots: &[Snapshot],
        experiment: &str,
        filter: &ChannelFilter,
    ) -> Result<ArchiveSummary> {
        let cancel = sink.cancellation();
        let mut zip = ZipWriter::new_stream(ShieldedSink::new(sink));
        let mut names = EntryNames::default();
        let mut summary = ArchiveSummary::default();
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];

        debug!(
            "Building archive of {} snapshots from experiment {} with {:?}",
            snapshots.len(),
            experiment,
            filter
        );

        for snapshot in snapshots {
            for tile in &snapshot.tiles {
                if cancel.is_cancelled() {
                    return Err(cancelled(&summary));
                }

                let planned = self.resolver.entries(snapshot, tile, filter);
                if planned.is_empty() {
                    continue;
                }

                let opened = match self.resolver.open_all(planned) {
                    Ok(opened) => opened,
                    Err(e) => {
                        warn!(
                            "Skipping tile {} frame {} of snapshot {} in experiment {}: {}",
                            tile.camera_label, tile.frame, snapshot.id, experiment, e
                        );
                        summary.tiles_skipped += 1;
                        continue;
                    }
                };

                for OpenedEntry { entry, mut source } in opened {
                    let name = names.claim(&entry.name);
                    zip.start_file(name.clone(), entry_options(snapshot))
                        .map_err(|e| sink_failed(&cancel, &summary, &e))?;

                    let copied = copy_entry(&mut source, &mut zip, &mut buffer, &cancel)
                        .map_err(|e| match e {
                            CopyError::Cancelled => cancelled(&summary),
                            CopyError::Sink(e) => sink_failed(&cancel, &summary, &e),
                        })?;

                    if copied.truncated {
                        warn!(
                            "Entry {} ({}) truncated after {} bytes: {}",
                            name,
                            entry.locator,
                            copied.bytes,
                            copied.read_error.unwrap_or_default()
                        );
                    }
                    summary.entries_written += 1;
                    summary.bytes_written += copied.bytes;
                }
            }
        }

        let mut inner = zip
            .finish()
            .map_err(|e| sink_failed(&cancel, &summary, &e))?;
        inner
            .flush()
            .map_err(|e| sink_failed(&cancel, &summary, &e))?;
        // A hang-up during the final writes was swallowed by ShieldedSink
        if cancel.is_cancelled() {
            return Err(cancelled(&summary));
        }

        info!(
            "Archive for experiment {} complete: {} entries, {} tiles skipped, {} bytes",
            experiment, summary.entries_written, summary.tiles_skipped, summary.bytes_written
        );
        Ok(summary)
    }
}

fn entry_options(snapshot: &Snapshot) -> SimpleFileOptions {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let captured = snapshot.captured_at.naive_utc();
    let modified = u16::try_from(captured.year()).ok().and_then(|year| {
        zip::DateTime::from_date_and_time(
            year,
            captured.month() as u8,
            captured.day() as u8,
            captured.hour() as u8,
            captured.minute() as u8,
            captured.second() as u8,
        )
        .ok()
    });

    match modified {
        Some(modified) => options.last_modified_time(modified),
        None => options,
    }
}

fn cancelled(summary: &ArchiveSummary) -> Error {
    Error::TransferCancelled {
        entries_written: summary.entries_written,
    }
}

/// Any failure writing the archive ends the transfer
///
/// Cancelling the token also stops the writer's attempt to finalise the
/// archive when it is dropped from reaching the sink.
fn sink_failed(cancel: &CancellationToken, summary: &ArchiveSummary, err: &dyn std::fmt::Display) -> Error {
    if !cancel.is_cancelled() {
        warn!("Archive stream failed: {}", err);
        cancel.cancel();
    }
    cancelled(summary)
}

enum CopyError {
    Cancelled,
    Sink(io::Error),
}

struct Copied {
    bytes: u64,
    truncated: bool,
    read_error: Option<String>,
}

/// Copy one image into the current entry
///
/// A read error mid-image ends the entry early rather than the archive: the
/// entry header is already on the wire and cannot be withdrawn.
fn copy_entry<W: Write>(
    source: &mut Box<dyn Read + Send>,
    zip: &mut W,
    buffer: &mut [u8],
    cancel: &CancellationToken,
) -> std::result::Result<Copied, CopyError> {
    let mut copied = Copied {
        bytes: 0,
        truncated: false,
        read_error: None,
    };

    loop {
        if cancel.is_cancelled() {
            return Err(CopyError::Cancelled);
        }

        let n = match source.read(buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                copied.truncated = true;
                copied.read_error = Some(e.to_string());
                break;
            }
        };

        zip.write_all(&buffer[..n]).map_err(CopyError::Sink)?;
        copied.bytes += n as u64;
    }

    Ok(copied)
}

/// Hands out entry names, suffixing repeats with `-1`, `-2`, ...
#[derive(Default)]
struct EntryNames {
    used: HashSet<String>,
}

impl EntryNames {
    fn claim(&mut self, name: &str) -> String {
        if self.used.insert(name.to_string()) {
            return name.to_string();
        }

        let (stem, extension) = split_extension(name);
        let mut n = 1;
        loop {
            let candidate = format!("{}-{}{}", stem, n, extension);
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// Split at the last dot of the final path segment
fn split_extension(name: &str) -> (&str, &str) {
    let segment_start = name.rfind('/').map(|i| i + 1).unwrap_or(0);
    match name[segment_start..].rfind('.') {
        Some(dot) if dot > 0 => name.split_at(segment_start + dot),
        _ => (name, ""),
    }
}

/// Build an archive on a blocking thread and stream it as response chunks
///
/// The returned stream ends when the archive is finished or abandoned. If
/// the receiving side is dropped (client disconnect), the build is cancelled
/// without waiting for its next write.
pub fn spawn_archive_stream(
    builder: ArchiveBuilder,
    snapshots: Vec<Snapshot>,
    experiment: String,
    filter: ChannelFilter,
) -> ReceiverStream<io::Result<Bytes>> {
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    let cancel = CancellationToken::new();
    let sink = ChannelSink::new(tx.clone(), cancel.clone());

    tokio::spawn(async move {
        let label = experiment.clone();
        let mut build = tokio::task::spawn_blocking(move || {
            builder.build(sink, &snapshots, &experiment, &filter)
        });

        let outcome = tokio::select! {
            outcome = &mut build => outcome,
            _ = tx.closed() => {
                cancel.cancel();
                build.await
            }
        };
        drop(tx);

        match outcome {
            Ok(Ok(_)) => {}
            Ok(Err(Error::TransferCancelled { entries_written })) => {
                info!(
                    "Archive download for experiment {} cancelled by client after {} entries",
                    label, entries_written
                );
            }
            Ok(Err(e)) => error!("Archive for experiment {} failed: {}", label, e),
            Err(e) => error!("Archive task for experiment {} panicked: {}", label, e),
        }
    });

    ReceiverStream::new(rx)
}
