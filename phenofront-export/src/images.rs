//! Image reference resolution
//!
//! Turns a tile into the archive entries it contributes and opens the stored
//! images behind them. A tile yields nothing when its camera's channel is not
//! selected, one entry for the raw image, and a second for the null
//! (background) image when the tile has one.

use phenofront_common::models::ImageKind;
use phenofront_common::{ChannelFilter, Error, Result, Snapshot, Tile};
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Source of stored image bytes, addressed by locator string
pub trait ImageStore: Send + Sync {
    /// Open an image for reading; fails with `ImageUnavailable`
    fn open(&self, locator: &str) -> Result<Box<dyn Read + Send>>;
}

/// Images stored as files below a root directory
#[derive(Debug, Clone)]
pub struct FsImageStore {
    root: PathBuf,
}

impl FsImageStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path for a locator, refusing anything that escapes the root
    fn path_for(&self, locator: &str) -> Result<PathBuf> {
        let relative = Path::new(locator.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(Error::ImageUnavailable {
                locator: locator.to_string(),
                reason: "locator escapes the image root".to_string(),
            });
        }
        Ok(self.root.join(relative))
    }
}

impl ImageStore for FsImageStore {
    fn open(&self, locator: &str) -> Result<Box<dyn Read + Send>> {
        let path = self.path_for(locator)?;
        let file = File::open(&path).map_err(|e| Error::ImageUnavailable {
            locator: locator.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Box::new(file))
    }
}

/// One planned archive entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageEntry {
    pub name: String,
    pub kind: ImageKind,
    pub locator: String,
}

/// An entry whose source has been opened
pub struct OpenedEntry {
    pub entry: ImageEntry,
    pub source: Box<dyn Read + Send>,
}

/// Resolves tiles to archive entries against one image store
#[derive(Clone)]
pub struct ImageResolver {
    store: Arc<dyn ImageStore>,
}

impl ImageResolver {
    pub fn new(store: Arc<dyn ImageStore>) -> Self {
        Self { store }
    }

    /// Entries a tile contributes under `filter`, raw first
    pub fn entries(&self, snapshot: &Snapshot, tile: &Tile, filter: &ChannelFilter) -> Vec<ImageEntry> {
        if !filter.accepts_label(&tile.camera_label) {
            return Vec::new();
        }

        let candidates = [
            (ImageKind::Raw, tile.raw_locator()),
            (ImageKind::Background, tile.null_locator()),
        ];

        candidates
            .into_iter()
            .filter_map(|(kind, locator)| {
                locator.map(|locator| ImageEntry {
                    name: entry_name(snapshot, tile, kind),
                    kind,
                    locator,
                })
            })
            .collect()
    }

    /// Open every entry of one tile
    ///
    /// All or nothing: if any image cannot be opened, the tile contributes
    /// no entries and the first failure is returned.
    pub fn open_all(&self, entries: Vec<ImageEntry>) -> Result<Vec<OpenedEntry>> {
        entries
            .into_iter()
            .map(|entry| -> Result<OpenedEntry> {
                let source = self.store.open(&entry.locator)?;
                Ok(OpenedEntry { entry, source })
            })
            .collect()
    }
}

/// `snapshot<id>/<camera>/frame<n>/<raw|background><ext>`
pub fn entry_name(snapshot: &Snapshot, tile: &Tile, kind: ImageKind) -> String {
    format!(
        "snapshot{}/{}/frame{}/{}{}",
        snapshot.id,
        sanitize_label(&tile.camera_label),
        tile.frame,
        kind.as_str(),
        tile.data_format.extension()
    )
}

/// Camera labels become one path segment
fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .trim()
        .chars()
        .map(|c| if c == '/' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "unlabeled".to_string(),
        _ => cleaned,
    }
}
