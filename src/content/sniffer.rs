//! Magic-byte content sniffing.
//!
//! Consulted by the importer when a file's extension is absent from the
//! extension-to-MIME map. The signature table covers the media formats
//! the server ships mappings for; anything else stays unclassified.

use std::path::Path;

use tokio::io::AsyncReadExt;

use crate::error::Result;

const SNIFF_LEN: usize = 16;

/// Leading-byte signatures checked in order.
const SIGNATURES: &[(&[u8], &str)] = &[
    (b"ID3", "audio/mpeg"),
    (b"fLaC", "audio/x-flac"),
    (b"OggS", "application/ogg"),
    (&[0x1A, 0x45, 0xDF, 0xA3], "video/x-matroska"),
    (&[0xFF, 0xD8, 0xFF], "image/jpeg"),
    (&[0x89, b'P', b'N', b'G'], "image/png"),
    (b"GIF8", "image/gif"),
    (b"BM", "image/bmp"),
];

/// Sniff the MIME type of a file from its first bytes.
pub async fn sniff_path(path: &Path) -> Result<Option<&'static str>> {
    let file = tokio::fs::File::open(path).await?;
    let mut header = Vec::with_capacity(SNIFF_LEN);
    file.take(SNIFF_LEN as u64).read_to_end(&mut header).await?;
    Ok(sniff_header(&header))
}

/// Classify a leading-bytes buffer.
pub fn sniff_header(header: &[u8]) -> Option<&'static str> {
    for (magic, mime) in SIGNATURES {
        if header.starts_with(magic) {
            return Some(mime);
        }
    }

    // RIFF containers carry the format tag at offset 8.
    if header.len() >= 12 && header.starts_with(b"RIFF") {
        return match &header[8..12] {
            b"WAVE" => Some("audio/x-wav"),
            b"AVI " => Some("video/x-msvideo"),
            _ => None,
        };
    }

    // ISO base media files carry "ftyp" at offset 4; the brand tells
    // audio-only MP4 apart.
    if header.len() >= 12 && &header[4..8] == b"ftyp" {
        return if &header[8..11] == b"M4A" {
            Some("audio/mp4")
        } else {
            Some("video/mp4")
        };
    }

    // Raw MPEG audio frame sync.
    if header.len() >= 2 && header[0] == 0xFF && header[1] & 0xE0 == 0xE0 {
        return Some("audio/mpeg");
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_signatures() {
        assert_eq!(sniff_header(b"ID3\x04\x00..."), Some("audio/mpeg"));
        assert_eq!(sniff_header(b"fLaC\x00\x00\x00\x22"), Some("audio/x-flac"));
        assert_eq!(sniff_header(b"OggS\x00\x02"), Some("application/ogg"));
        assert_eq!(
            sniff_header(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10]),
            Some("image/jpeg")
        );
        assert_eq!(
            sniff_header(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A]),
            Some("image/png")
        );
    }

    #[test]
    fn test_riff_disambiguation() {
        assert_eq!(
            sniff_header(b"RIFF\x24\x00\x00\x00WAVEfmt "),
            Some("audio/x-wav")
        );
        assert_eq!(
            sniff_header(b"RIFF\x24\x00\x00\x00AVI LIST"),
            Some("video/x-msvideo")
        );
        assert_eq!(sniff_header(b"RIFF\x24\x00\x00\x00WEBP"), None);
    }

    #[test]
    fn test_ftyp_brands() {
        assert_eq!(
            sniff_header(b"\x00\x00\x00\x20ftypisom\x00\x00"),
            Some("video/mp4")
        );
        assert_eq!(
            sniff_header(b"\x00\x00\x00\x20ftypM4A \x00\x00"),
            Some("audio/mp4")
        );
    }

    #[test]
    fn test_mpeg_frame_sync() {
        assert_eq!(sniff_header(&[0xFF, 0xFB, 0x90, 0x00]), Some("audio/mpeg"));
    }

    #[test]
    fn test_unknown_content() {
        assert_eq!(sniff_header(b"hello world"), None);
        assert_eq!(sniff_header(b""), None);
        assert_eq!(sniff_header(&[0xFF]), None);
    }
}
