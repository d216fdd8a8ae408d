//! Archive builder tests: real database rows, real image files, in-memory sinks

mod common;

use common::{at, Fixture};
use phenofront_common::{ChannelFilter, Error, Result, Snapshot};
use phenofront_export::archive::{spawn_archive_stream, ArchiveBuilder, ArchiveSink, ChannelSink, MemorySink};
use phenofront_export::db::snapshots::find_between;
use phenofront_export::images::{FsImageStore, ImageResolver, ImageStore};
use std::io::{Cursor, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use zip::ZipArchive;

fn visible_and_nir() -> ChannelFilter {
    ChannelFilter {
        visible: true,
        near_infrared: true,
        fluorescent: false,
    }
}

/// Incompressible image content, so deflated entries stay large
fn noise(len: usize) -> Vec<u8> {
    let mut x: u32 = 0x2545_f491;
    (0..len)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            (x >> 24) as u8
        })
        .collect()
}

/// Two snapshots: S1 with a raw-only VIS tile and a raw+background NIR tile,
/// S2 with a raw-only VIS tile and a FLUO tile
async fn scenario() -> (Fixture, Vec<Snapshot>) {
    let fx = Fixture::new().await;
    fx.add_snapshot(1, at(2024, 1, 1, 0, 0), "Dp00101", "day1").await;
    fx.add_snapshot(2, at(2024, 1, 2, 0, 0), "Dp00101", "day2").await;
    fx.add_tile(1, "VIS", 11, 0, 0).await;
    fx.add_tile(1, "NIR", 12, 13, 0).await;
    fx.add_tile(2, "VIS", 21, 0, 0).await;
    fx.add_tile(2, "FLUO", 22, 0, 0).await;

    fx.write_image(1, 11, &noise(150_000));
    fx.write_image(1, 12, b"nir raw");
    fx.write_image(1, 13, b"nir background");
    fx.write_image(2, 21, &(0..=255u8).cycle().take(70_000).collect::<Vec<u8>>());
    fx.write_image(2, 22, b"fluo raw");

    let ds = fx.handle().await;
    let snapshots = find_between(&ds, at(2024, 1, 1, 0, 0), at(2024, 1, 2, 0, 0))
        .await
        .unwrap();
    (fx, snapshots)
}

fn builder(fx: &Fixture) -> ArchiveBuilder {
    ArchiveBuilder::new(ImageResolver::new(Arc::new(FsImageStore::new(
        fx.image_root.clone(),
    ))))
}

fn entry_names(bytes: Vec<u8>) -> Vec<String> {
    let archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    archive.file_names().map(str::to_string).collect::<Vec<_>>()
}

fn read_entry(archive: &mut ZipArchive<Cursor<Vec<u8>>>, index: usize) -> (String, Vec<u8>) {
    let mut file = archive.by_index(index).unwrap();
    let mut contents = Vec::new();
    file.read_to_end(&mut contents).unwrap();
    (file.name().to_string(), contents)
}

#[tokio::test]
async fn test_archive_entries_in_query_order_with_exact_bytes() {
    let (fx, snapshots) = scenario().await;
    let sink = MemorySink::new();

    let summary = builder(&fx)
        .build(sink.clone(), &snapshots, "maize", &visible_and_nir())
        .unwrap();
    assert_eq!(summary.entries_written, 4);
    assert_eq!(summary.tiles_skipped, 0);

    let mut archive = ZipArchive::new(Cursor::new(sink.contents())).unwrap();
    assert_eq!(archive.len(), 4);

    let expected = [
        ("snapshot1/VIS/frame0/raw.png", (1, 11)),
        ("snapshot1/NIR/frame0/raw.png", (1, 12)),
        ("snapshot1/NIR/frame0/background.png", (1, 13)),
        ("snapshot2/VIS/frame0/raw.png", (2, 21)),
    ];
    let mut total = 0u64;
    for (index, (name, (snapshot, reference))) in expected.iter().enumerate() {
        let (entry_name, contents) = read_entry(&mut archive, index);
        let source = std::fs::read(
            fx.image_root
                .join(format!("snap{}", snapshot))
                .join(reference.to_string()),
        )
        .unwrap();
        assert_eq!(&entry_name, name);
        assert_eq!(contents, source);
        total += source.len() as u64;
    }
    assert_eq!(summary.bytes_written, total);
}

#[tokio::test]
async fn test_no_channels_selected_gives_empty_valid_archive() {
    let (fx, snapshots) = scenario().await;
    let sink = MemorySink::new();

    let summary = builder(&fx)
        .build(sink.clone(), &snapshots, "maize", &ChannelFilter::default())
        .unwrap();
    assert_eq!(summary.entries_written, 0);
    assert!(entry_names(sink.contents()).is_empty());
}

#[tokio::test]
async fn test_missing_image_skips_whole_tile() {
    let (fx, snapshots) = scenario().await;
    std::fs::remove_file(fx.image_root.join("snap1").join("13")).unwrap();
    let sink = MemorySink::new();

    let summary = builder(&fx)
        .build(sink.clone(), &snapshots, "maize", &visible_and_nir())
        .unwrap();
    assert_eq!(summary.entries_written, 2);
    assert_eq!(summary.tiles_skipped, 1);

    // The NIR raw image exists but its tile is incomplete, so neither entry appears
    assert_eq!(
        entry_names(sink.contents()),
        vec!["snapshot1/VIS/frame0/raw.png", "snapshot2/VIS/frame0/raw.png"]
    );
}

#[tokio::test]
async fn test_repeated_tiles_get_unique_names() {
    let fx = Fixture::new().await;
    fx.add_snapshot(1, at(2024, 1, 1, 0, 0), "Dp00101", "day1").await;
    fx.add_tile(1, "VIS", 11, 0, 0).await;
    fx.add_tile(1, "VIS", 12, 0, 0).await;
    fx.write_image(1, 11, b"first");
    fx.write_image(1, 12, b"second");
    let ds = fx.handle().await;
    let snapshots = find_between(&ds, at(2024, 1, 1, 0, 0), at(2024, 1, 1, 0, 0))
        .await
        .unwrap();

    let sink = MemorySink::new();
    builder(&fx)
        .build(sink.clone(), &snapshots, "maize", &ChannelFilter::all())
        .unwrap();

    assert_eq!(
        entry_names(sink.contents()),
        vec!["snapshot1/VIS/frame0/raw.png", "snapshot1/VIS/frame0/raw-1.png"]
    );
}

/// Opens images normally but hangs up the sink once `limit` images are open
struct HangUpStore {
    inner: FsImageStore,
    sink: MemorySink,
    limit: usize,
    opened: AtomicUsize,
}

impl ImageStore for HangUpStore {
    fn open(&self, locator: &str) -> Result<Box<dyn Read + Send>> {
        if self.opened.fetch_add(1, Ordering::SeqCst) + 1 > self.limit {
            self.sink.close();
        }
        self.inner.open(locator)
    }
}

#[tokio::test]
async fn test_closed_sink_stops_build_with_transfer_cancelled() {
    let (fx, snapshots) = scenario().await;
    let sink = MemorySink::new();
    let store = HangUpStore {
        inner: FsImageStore::new(fx.image_root.clone()),
        sink: sink.clone(),
        limit: 1,
        opened: AtomicUsize::new(0),
    };
    let builder = ArchiveBuilder::new(ImageResolver::new(Arc::new(store)));

    let err = builder
        .build(sink.clone(), &snapshots, "maize", &visible_and_nir())
        .unwrap_err();
    match err {
        Error::TransferCancelled { entries_written } => assert_eq!(entries_written, 1),
        other => panic!("unexpected error: {other}"),
    }
    // No central directory after cancellation
    assert!(ZipArchive::new(Cursor::new(sink.contents())).is_err());
}

#[tokio::test]
async fn test_peer_hang_up_mid_entry() {
    let (fx, snapshots) = scenario().await;
    let sink = MemorySink::closing_after(1024);

    let err = builder(&fx)
        .build(sink.clone(), &snapshots, "maize", &visible_and_nir())
        .unwrap_err();
    assert!(matches!(err, Error::TransferCancelled { entries_written: 0 }));
    assert!(!sink.is_alive());
}

#[tokio::test]
async fn test_spawned_stream_yields_valid_archive() {
    let (fx, snapshots) = scenario().await;

    let mut stream = spawn_archive_stream(
        builder(&fx),
        snapshots,
        "maize".to_string(),
        visible_and_nir(),
    );
    let mut bytes = Vec::new();
    while let Some(chunk) = stream.next().await {
        bytes.extend_from_slice(&chunk.unwrap());
    }

    assert_eq!(entry_names(bytes).len(), 4);
}

/// Counts every image the builder opens
struct CountingStore {
    inner: FsImageStore,
    opened: Arc<AtomicUsize>,
}

impl ImageStore for CountingStore {
    fn open(&self, locator: &str) -> Result<Box<dyn Read + Send>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.inner.open(locator)
    }
}

#[tokio::test]
async fn test_client_disconnect_stops_opening_images() {
    const TILES: i64 = 40;
    let fx = Fixture::new().await;
    fx.add_snapshot(1, at(2024, 1, 1, 0, 0), "Dp00101", "day1").await;
    for frame in 0..TILES {
        let reference = 100 + frame;
        fx.add_tile(1, "VIS", reference, 0, frame).await;
        fx.write_image(1, reference, &noise(200_000));
    }
    let ds = fx.handle().await;
    let snapshots = find_between(&ds, at(2024, 1, 1, 0, 0), at(2024, 1, 1, 0, 0))
        .await
        .unwrap();

    let opened = Arc::new(AtomicUsize::new(0));
    let store = CountingStore {
        inner: FsImageStore::new(fx.image_root.clone()),
        opened: opened.clone(),
    };
    let mut stream = spawn_archive_stream(
        ArchiveBuilder::new(ImageResolver::new(Arc::new(store))),
        snapshots,
        "maize".to_string(),
        ChannelFilter::all(),
    );

    let first = stream.next().await.unwrap().unwrap();
    assert!(!first.is_empty());
    drop(stream);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let after_disconnect = opened.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(opened.load(Ordering::SeqCst), after_disconnect);
    assert!(
        after_disconnect < 10,
        "{} of {} images opened after disconnect",
        after_disconnect,
        TILES
    );
}

#[test]
fn test_channel_sink_refuses_writes_after_receiver_dropped() {
    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    let cancel = CancellationToken::new();
    let mut sink = ChannelSink::new(tx, cancel.clone());

    // Small writes are buffered; the flush is what meets the closed channel
    sink.write_all(b"PK").unwrap();
    assert!(sink.flush().is_err());
    assert!(cancel.is_cancelled());
    assert!(!sink.is_alive());
    assert!(sink.write_all(b"more").is_err());
}
