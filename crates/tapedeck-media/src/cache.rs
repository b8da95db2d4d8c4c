// crates/tapedeck-media/src/cache.rs
//
// Cache paths for the pre-built low-res companion file. The companion is a
// 640px, audio-stripped H.264 transcode produced by an external tool; this
// module only answers "where would it live for this source file". Files are
// keyed by an MD5 of the source *contents*, so a renamed or moved source
// still finds its companion.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};

/// Per-user cache directory for companion files.
///
/// `%LOCALAPPDATA%\TapeDeck` on Windows, `~/Library/Caches/tapedeck` on
/// macOS, `~/.cache/tapedeck` elsewhere.
pub fn cache_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    let base = std::env::var("LOCALAPPDATA")
        .map(|p| PathBuf::from(p).join("TapeDeck"))
        .unwrap_or_else(|_| std::env::temp_dir().join("tapedeck"));
    #[cfg(target_os = "macos")]
    let base = std::env::var("HOME")
        .map(|h| PathBuf::from(h).join("Library").join("Caches").join("tapedeck"))
        .unwrap_or_else(|_| std::env::temp_dir().join("tapedeck"));
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    let base = std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(".cache").join("tapedeck"))
        .unwrap_or_else(|_| std::env::temp_dir().join("tapedeck"));
    base
}

/// MD5 of the file contents as lowercase hex. Streams in 32 KiB chunks so a
/// multi-gigabyte source never lands in memory at once.
pub fn file_id(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; 32 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let mut id = String::with_capacity(32);
    for byte in hasher.finalize() {
        id.push_str(&format!("{byte:02x}"));
    }
    Ok(id)
}

/// Expected companion path for `source`: `<cache_dir>/<md5>_lowres.mp4`.
pub fn low_res_path_for(source: &Path) -> std::io::Result<PathBuf> {
    let id = file_id(source)?;
    Ok(cache_dir().join(format!("{id}_lowres.mp4")))
}

/// The companion for `source`, if the external transcode has produced one.
pub fn find_low_res_companion(source: &Path) -> Option<PathBuf> {
    let path = low_res_path_for(source).ok()?;
    path.exists().then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn file_id_is_stable_md5_hex() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"tapedeck").unwrap();
        let id = file_id(f.path()).unwrap();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        // Same content, same id.
        assert_eq!(id, file_id(f.path()).unwrap());
    }

    #[test]
    fn companion_path_uses_content_key() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"reel").unwrap();
        let p = low_res_path_for(f.path()).unwrap();
        let name = p.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with("_lowres.mp4"));
        assert_eq!(name.len(), 32 + "_lowres.mp4".len());
    }
}
