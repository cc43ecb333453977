//! Builtin playlist expansion for M3U and PLS content.
//!
//! A scripted parser can replace this behind the same seam; the builtin
//! one resolves local entries against the playlist's directory and
//! leaves remote URLs alone.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::cds::CdsObject;
use crate::content::PlaylistParser;
use crate::error::Result;

pub struct BuiltinPlaylistParser;

#[async_trait]
impl PlaylistParser for BuiltinPlaylistParser {
    async fn process(&self, obj: &CdsObject) -> Result<Vec<PathBuf>> {
        let content = tokio::fs::read_to_string(&obj.location).await?;
        let base = Path::new(&obj.location)
            .parent()
            .unwrap_or_else(|| Path::new("/"));
        Ok(parse_playlist(&content, base))
    }
}

/// Parse playlist text into local entry paths. PLS is recognized by its
/// `[playlist]` header; anything else is treated as M3U.
pub fn parse_playlist(content: &str, base: &Path) -> Vec<PathBuf> {
    if content
        .trim_start()
        .to_ascii_lowercase()
        .starts_with("[playlist]")
    {
        parse_pls(content, base)
    } else {
        parse_m3u(content, base)
    }
}

fn parse_m3u(content: &str, base: &Path) -> Vec<PathBuf> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|entry| resolve_entry(entry, base))
        .collect()
}

fn parse_pls(content: &str, base: &Path) -> Vec<PathBuf> {
    content
        .lines()
        .map(str::trim)
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            if key.trim().to_ascii_lowercase().starts_with("file") {
                Some(value.trim())
            } else {
                None
            }
        })
        .filter_map(|entry| resolve_entry(entry, base))
        .collect()
}

fn resolve_entry(entry: &str, base: &Path) -> Option<PathBuf> {
    if entry.contains("://") {
        debug!("skipping remote playlist entry: {}", entry);
        return None;
    }
    let path = Path::new(entry);
    if path.is_absolute() {
        Some(path.to_path_buf())
    } else {
        Some(base.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_m3u_entries_resolve_against_base() {
        let content = "#EXTM3U\n#EXTINF:123,Artist - Title\ntrack.mp3\n\nsub/other.mp3\n/abs/third.mp3\n";
        let entries = parse_playlist(content, Path::new("/media/lists"));
        assert_eq!(
            entries,
            vec![
                PathBuf::from("/media/lists/track.mp3"),
                PathBuf::from("/media/lists/sub/other.mp3"),
                PathBuf::from("/abs/third.mp3"),
            ]
        );
    }

    #[test]
    fn test_m3u_skips_remote_urls() {
        let content = "http://example.com/stream.mp3\nlocal.mp3\n";
        let entries = parse_playlist(content, Path::new("/media"));
        assert_eq!(entries, vec![PathBuf::from("/media/local.mp3")]);
    }

    #[test]
    fn test_pls_file_keys() {
        let content = "[playlist]\nNumberOfEntries=2\nFile1=one.mp3\nTitle1=One\nFile2=/abs/two.mp3\nLength2=-1\nVersion=2\n";
        let entries = parse_playlist(content, Path::new("/media"));
        assert_eq!(
            entries,
            vec![
                PathBuf::from("/media/one.mp3"),
                PathBuf::from("/abs/two.mp3"),
            ]
        );
    }

    #[test]
    fn test_pls_header_detection_is_case_insensitive() {
        let content = "[Playlist]\nFile1=a.mp3\n";
        let entries = parse_playlist(content, Path::new("/media"));
        assert_eq!(entries, vec![PathBuf::from("/media/a.mp3")]);
    }

    #[test]
    fn test_empty_playlist() {
        assert!(parse_playlist("", Path::new("/media")).is_empty());
        assert!(parse_playlist("#only\n#comments\n", Path::new("/media")).is_empty());
    }
}
