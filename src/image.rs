use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::debug;
use std::fs;
use std::path::Path;

/// Raw image bytes tagged with their MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ImageAttachment {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    /// Load an image from disk, rejecting files over `max_bytes` or in an
    /// unrecognised format.
    pub fn from_file<P: AsRef<Path>>(path: P, max_bytes: usize) -> Result<Self> {
        let path = path.as_ref();
        let metadata = fs::metadata(path)
            .with_context(|| format!("Failed to read image: {}", path.display()))?;
        if metadata.len() as usize > max_bytes {
            bail!(
                "Image {} is {} bytes, larger than the {} byte limit",
                path.display(),
                metadata.len(),
                max_bytes
            );
        }

        let bytes = fs::read(path)
            .with_context(|| format!("Failed to read image: {}", path.display()))?;
        let mime_type = match sniff_mime_type(&bytes) {
            Some(mime_type) => Some(mime_type),
            None if bytes.len() < MAGIC_HEADER_LEN => mime_type_from_extension(path),
            None => None,
        }
        .with_context(|| format!("Unsupported image format: {}", path.display()))?;

        debug!("Loaded {} ({}, {} bytes)", path.display(), mime_type, bytes.len());
        Ok(Self::new(bytes, mime_type))
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }
}

// Longest header `sniff_mime_type` needs (RIFF....WEBP).
const MAGIC_HEADER_LEN: usize = 12;

/// Detect the image type from its magic bytes.
pub fn sniff_mime_type(bytes: &[u8]) -> Option<&'static str> {
    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => Some("image/png"),
        [b'G', b'I', b'F', b'8', ..] => Some("image/gif"),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some("image/webp"),
        _ => None,
    }
}

// Fallback for files too short to carry a full header.
fn mime_type_from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const PNG_HEADER: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn test_sniff_known_formats() {
        assert_eq!(sniff_mime_type(&PNG_HEADER), Some("image/png"));
        assert_eq!(sniff_mime_type(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));
        assert_eq!(sniff_mime_type(b"GIF89a"), Some("image/gif"));
        assert_eq!(sniff_mime_type(b"RIFF\0\0\0\0WEBPVP8 "), Some("image/webp"));
        assert_eq!(sniff_mime_type(b"hello world"), None);
    }

    #[test]
    fn test_from_file_detects_png() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&PNG_HEADER).unwrap();
        file.write_all(&[0u8; 16]).unwrap();

        let image = ImageAttachment::from_file(file.path(), 1024).unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.bytes.len(), 24);
    }

    #[test]
    fn test_from_file_rejects_text() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"definitely not an image").unwrap();
        assert!(ImageAttachment::from_file(file.path(), 1024).is_err());
    }

    #[test]
    fn test_from_file_ignores_extension_of_non_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.png");
        std::fs::write(&path, b"definitely not an image").unwrap();

        let err = ImageAttachment::from_file(&path, 1024).unwrap_err();
        assert!(err.to_string().contains("Unsupported image format"));
    }

    #[test]
    fn test_from_file_short_file_falls_back_to_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.JPG");
        std::fs::write(&path, [0xFF, 0xD8]).unwrap();
        assert_eq!(ImageAttachment::from_file(&path, 1024).unwrap().mime_type, "image/jpeg");

        let path = dir.path().join("photo.heic");
        std::fs::write(&path, [0u8; 4]).unwrap();
        assert!(ImageAttachment::from_file(&path, 1024).is_err());
    }

    #[test]
    fn test_from_file_enforces_size_limit() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&PNG_HEADER).unwrap();
        file.write_all(&[0u8; 64]).unwrap();
        let err = ImageAttachment::from_file(file.path(), 16).unwrap_err();
        assert!(err.to_string().contains("limit"));
    }

    #[test]
    fn test_base64_encoding() {
        let image = ImageAttachment::new(b"abc".to_vec(), "image/png");
        assert_eq!(image.to_base64(), "YWJj");
    }
}
