//! Snapshot and tile records
//!
//! A snapshot groups the tiles captured together for one plant. Each tile is
//! one camera capture and points at up to two stored images: the raw frame
//! and an optional null (background) frame.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque handle of a stored image (large-object id in the imaging database)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef(pub i64);

impl ImageRef {
    /// Column value to reference; 0 (and NULL) mean "no image of this kind"
    pub fn from_column(value: Option<i64>) -> Option<Self> {
        match value {
            Some(v) if v != 0 => Some(ImageRef(v)),
            _ => None,
        }
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pixel size of a tile; only exists when both sides are positive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn from_columns(width: Option<i64>, height: Option<i64>) -> Option<Self> {
        match (width, height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some(Dimensions {
                width: u32::try_from(w).ok()?,
                height: u32::try_from(h).ok()?,
            }),
            _ => None,
        }
    }
}

/// Raster encoding of the stored image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataFormat {
    Raw,
    Png,
    Jpeg,
    Tiff,
    Bmp,
    Other(i32),
}

impl DataFormat {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => DataFormat::Raw,
            1 => DataFormat::Png,
            2 => DataFormat::Jpeg,
            3 => DataFormat::Tiff,
            4 => DataFormat::Bmp,
            other => DataFormat::Other(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            DataFormat::Raw => 0,
            DataFormat::Png => 1,
            DataFormat::Jpeg => 2,
            DataFormat::Tiff => 3,
            DataFormat::Bmp => 4,
            DataFormat::Other(code) => *code,
        }
    }

    /// File extension used for archive entries, including the dot
    pub fn extension(&self) -> &'static str {
        match self {
            DataFormat::Raw => ".raw",
            DataFormat::Png => ".png",
            DataFormat::Jpeg => ".jpg",
            DataFormat::Tiff => ".tif",
            DataFormat::Bmp => ".bmp",
            DataFormat::Other(_) => ".bin",
        }
    }
}

/// Orientation transform to apply when displaying a tile
///
/// Codes follow the usual rotate/flip numbering: 0..=3 rotate by 0/90/180/270
/// degrees, 4..=7 do the same followed by a horizontal flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotateFlip {
    RotateNoneFlipNone,
    Rotate90FlipNone,
    Rotate180FlipNone,
    Rotate270FlipNone,
    RotateNoneFlipX,
    Rotate90FlipX,
    Rotate180FlipX,
    Rotate270FlipX,
}

impl RotateFlip {
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => RotateFlip::RotateNoneFlipNone,
            1 => RotateFlip::Rotate90FlipNone,
            2 => RotateFlip::Rotate180FlipNone,
            3 => RotateFlip::Rotate270FlipNone,
            4 => RotateFlip::RotateNoneFlipX,
            5 => RotateFlip::Rotate90FlipX,
            6 => RotateFlip::Rotate180FlipX,
            7 => RotateFlip::Rotate270FlipX,
            _ => return None,
        })
    }

    pub fn code(&self) -> i32 {
        *self as i32
    }
}

/// Light channel a camera records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channel {
    Visible,
    NearInfrared,
    Fluorescent,
}

impl Channel {
    /// Channel named by the leading token of a camera label ("VIS SV 0", "NIR TV", ...)
    pub fn from_camera_label(label: &str) -> Option<Self> {
        let label = label.trim_start().to_ascii_uppercase();
        if label.starts_with("VIS") {
            Some(Channel::Visible)
        } else if label.starts_with("NIR") {
            Some(Channel::NearInfrared)
        } else if label.starts_with("FLU") {
            Some(Channel::Fluorescent)
        } else {
            None
        }
    }
}

/// Which channels an export includes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelFilter {
    pub visible: bool,
    pub near_infrared: bool,
    pub fluorescent: bool,
}

impl ChannelFilter {
    pub fn all() -> Self {
        Self {
            visible: true,
            near_infrared: true,
            fluorescent: true,
        }
    }

    pub fn includes(&self, channel: Channel) -> bool {
        match channel {
            Channel::Visible => self.visible,
            Channel::NearInfrared => self.near_infrared,
            Channel::Fluorescent => self.fluorescent,
        }
    }

    /// Camera labels that name no known channel are never included
    pub fn accepts_label(&self, camera_label: &str) -> bool {
        Channel::from_camera_label(camera_label)
            .map(|channel| self.includes(channel))
            .unwrap_or(false)
    }
}

/// Which of a tile's images an archive entry holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageKind {
    Raw,
    Background,
}

impl ImageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageKind::Raw => "raw",
            ImageKind::Background => "background",
        }
    }
}

/// One camera capture within a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    pub camera_label: String,
    pub raw_image: Option<ImageRef>,
    pub null_image: Option<ImageRef>,
    pub data_format: DataFormat,
    pub dimensions: Option<Dimensions>,
    pub rotate_flip: RotateFlip,
    /// Position within a time-lapse burst
    pub frame: u32,
    /// Storage prefix shared by every image of the snapshot
    pub path_prefix: String,
}

impl Tile {
    fn locator(&self, image: ImageRef) -> String {
        format!("{}/{}", self.path_prefix, image)
    }

    pub fn raw_locator(&self) -> Option<String> {
        self.raw_image.map(|image| self.locator(image))
    }

    pub fn null_locator(&self) -> Option<String> {
        self.null_image.map(|image| self.locator(image))
    }
}

/// Tiles captured together for one plant or plot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: i64,
    pub captured_at: DateTime<Utc>,
    pub barcode: String,
    pub measurement_label: String,
    pub experiment: String,
    pub tiles: Vec<Tile>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile(label: &str, raw: i64, null: i64) -> Tile {
        Tile {
            camera_label: label.to_string(),
            raw_image: ImageRef::from_column(Some(raw)),
            null_image: ImageRef::from_column(Some(null)),
            data_format: DataFormat::Png,
            dimensions: Dimensions::from_columns(Some(2454), Some(2056)),
            rotate_flip: RotateFlip::RotateNoneFlipNone,
            frame: 0,
            path_prefix: "/data/snap7".to_string(),
        }
    }

    #[test]
    fn test_locators_join_prefix_and_reference() {
        let t = tile("VIS SV 0", 1001, 1002);
        assert_eq!(t.raw_locator().as_deref(), Some("/data/snap7/1001"));
        assert_eq!(t.null_locator().as_deref(), Some("/data/snap7/1002"));
    }

    #[test]
    fn test_zero_reference_means_no_image() {
        let t = tile("VIS SV 0", 1001, 0);
        assert!(t.null_image.is_none());
        assert!(t.null_locator().is_none());
        assert!(ImageRef::from_column(None).is_none());
    }

    #[test]
    fn test_dimensions_require_both_sides() {
        assert!(Dimensions::from_columns(Some(10), None).is_none());
        assert!(Dimensions::from_columns(Some(0), Some(10)).is_none());
        assert_eq!(
            Dimensions::from_columns(Some(640), Some(480)),
            Some(Dimensions { width: 640, height: 480 })
        );
    }

    #[test]
    fn test_rotate_flip_codes() {
        for code in 0..8 {
            let rf = RotateFlip::from_code(code).unwrap();
            assert_eq!(rf.code(), code);
        }
        assert!(RotateFlip::from_code(8).is_none());
        assert!(RotateFlip::from_code(-1).is_none());
    }

    #[test]
    fn test_data_format_unknown_code_passes_through() {
        let format = DataFormat::from_code(77);
        assert_eq!(format, DataFormat::Other(77));
        assert_eq!(format.code(), 77);
        assert_eq!(format.extension(), ".bin");
    }

    #[test]
    fn test_channel_from_camera_label() {
        assert_eq!(Channel::from_camera_label("VIS SV 90"), Some(Channel::Visible));
        assert_eq!(Channel::from_camera_label("nir tv"), Some(Channel::NearInfrared));
        assert_eq!(Channel::from_camera_label("FLUO SV 0"), Some(Channel::Fluorescent));
        assert_eq!(Channel::from_camera_label("IR SV"), None);
    }

    #[test]
    fn test_channel_filter() {
        let filter = ChannelFilter {
            visible: true,
            near_infrared: false,
            fluorescent: false,
        };
        assert!(filter.accepts_label("VIS TV"));
        assert!(!filter.accepts_label("NIR TV"));
        assert!(!filter.accepts_label("unknown"));
        assert!(!ChannelFilter::default().accepts_label("VIS TV"));
        assert!(ChannelFilter::all().accepts_label("FLUO TV"));
    }
}
