//! Store path construction and media-id hashing.

use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};

use crate::tile::TileFormat;

/// Stable hash of a media id, used as its directory name.
///
/// The hash depends only on the id string, so the same media always maps to
/// the same directory across sessions and processes.
///
/// # Example
///
/// ```
/// use zoomtile::store::media_hash;
///
/// let hash = media_hash("photos/alps.jpg");
/// assert_eq!(hash.len(), 40);
/// assert_eq!(hash, media_hash("photos/alps.jpg"));
/// ```
pub fn media_hash(media_id: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(media_id.as_bytes());
    hex::encode(hasher.finalize())
}

/// Default tile store root for this platform.
///
/// `$HOME/.zoomtile/tilestore` on Unix, `%APPDATA%\zoomtile\tilestore` on
/// Windows. Callers may override the root per session.
pub fn default_store_root() -> PathBuf {
    if cfg!(windows) {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("zoomtile")
            .join("tilestore")
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".zoomtile")
            .join("tilestore")
    }
}

/// Relative path of one tile file inside its media directory.
///
/// Layout: `<LL>/<LL>_<RRRRRR>_<CCCCCC>.<ext>` with a two-digit level
/// directory and six-digit zero-padded row and column.
///
/// # Example
///
/// ```
/// use std::path::PathBuf;
/// use zoomtile::store::tile_rel_path;
/// use zoomtile::tile::TileFormat;
///
/// let path = tile_rel_path(1, 0, 1, TileFormat::Jpeg);
/// assert_eq!(path, PathBuf::from("01/01_000000_000001.jpg"));
/// ```
pub fn tile_rel_path(level: i32, row: i32, col: i32, format: TileFormat) -> PathBuf {
    let mut path = PathBuf::from(format!("{:02}", level));
    path.push(format!(
        "{:02}_{:06}_{:06}.{}",
        level,
        row,
        col,
        format.ext()
    ));
    path
}

/// Absolute path of a media's directory under `root`.
pub fn media_dir(root: &Path, media_id: &str) -> PathBuf {
    root.join(media_hash(media_id))
}
