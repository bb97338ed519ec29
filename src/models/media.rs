//! Uploaded media buffers and their classification.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of uploaded content.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// A still image.
    Image,
    /// A multi-frame looping image (GIF, APNG).
    Animated,
    /// A video container.
    Video,
    /// Anything that cannot be fingerprinted.
    Other,
}

impl MediaKind {
    /// Infers the media kind from a file extension.
    ///
    /// The extension may carry a leading dot and any case.
    pub fn from_extension(ext: &str) -> Self {
        let ext = normalize_extension(ext);
        if ext == "apng" {
            return Self::Animated;
        }
        let Some(mime) = mime_guess::from_ext(&ext).first() else {
            return Self::Other;
        };
        if mime.type_() == mime_guess::mime::IMAGE {
            match mime.subtype().as_str() {
                "gif" | "apng" => Self::Animated,
                _ => Self::Image,
            }
        } else if mime.type_() == mime_guess::mime::VIDEO {
            Self::Video
        } else {
            Self::Other
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Image => "image",
            Self::Animated => "animated",
            Self::Video => "video",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// Raw bytes of one upload together with its declared extension.
///
/// Lives for the duration of a single request.
#[derive(Clone)]
pub struct MediaBuffer {
    /// The uploaded bytes.
    pub bytes: Bytes,
    /// Lower-case extension without the leading dot.
    pub extension: String,
    /// Kind inferred from the extension, or supplied by the caller.
    pub kind: MediaKind,
}

impl MediaBuffer {
    /// Creates a buffer whose kind is inferred from `extension`.
    pub fn new(bytes: impl Into<Bytes>, extension: &str) -> Self {
        let extension = normalize_extension(extension);
        let kind = MediaKind::from_extension(&extension);
        Self {
            bytes: bytes.into(),
            extension,
            kind,
        }
    }

    /// Creates a buffer with an explicit media kind.
    pub fn with_kind(bytes: impl Into<Bytes>, extension: &str, kind: MediaKind) -> Self {
        Self {
            bytes: bytes.into(),
            extension: normalize_extension(extension),
            kind,
        }
    }

    /// Builds a buffer from an uploaded file name, using its extension.
    pub fn from_file_name(bytes: impl Into<Bytes>, file_name: &str) -> Self {
        let extension = std::path::Path::new(file_name)
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("");
        Self::new(bytes, extension)
    }

    /// Size of the upload in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the upload is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for MediaBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaBuffer")
            .field("len", &self.bytes.len())
            .field("extension", &self.extension)
            .field("kind", &self.kind)
            .finish()
    }
}

pub(crate) fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_extension() {
        assert_eq!(MediaKind::from_extension("png"), MediaKind::Image);
        assert_eq!(MediaKind::from_extension(".JPG"), MediaKind::Image);
        assert_eq!(MediaKind::from_extension("webp"), MediaKind::Image);
        assert_eq!(MediaKind::from_extension("gif"), MediaKind::Animated);
        assert_eq!(MediaKind::from_extension("apng"), MediaKind::Animated);
        assert_eq!(MediaKind::from_extension("mp4"), MediaKind::Video);
        assert_eq!(MediaKind::from_extension("webm"), MediaKind::Video);
        assert_eq!(MediaKind::from_extension("txt"), MediaKind::Other);
        assert_eq!(MediaKind::from_extension(""), MediaKind::Other);
    }

    #[test]
    fn test_buffer_from_file_name() {
        let media = MediaBuffer::from_file_name(vec![1u8, 2, 3], "Clip.MOV");
        assert_eq!(media.extension, "mov");
        assert_eq!(media.kind, MediaKind::Video);
        assert_eq!(media.len(), 3);

        let media = MediaBuffer::from_file_name(Vec::new(), "README");
        assert_eq!(media.kind, MediaKind::Other);
        assert!(media.is_empty());
    }
}
