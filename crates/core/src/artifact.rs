//! Fetched artifacts and the storage-name policy derived from them.
//!
//! The file extension chosen here decides the content type the blob is later
//! served with, so the policy is fixed:
//!
//! 1. the declared content type, when it is one of the known image types;
//! 2. otherwise the trailing suffix of the source URL path;
//! 3. otherwise `.bin`.

use bytes::Bytes;
use uuid::Uuid;

/// Extension used when neither the content type nor the URL gives one.
pub const FALLBACK_EXTENSION: &str = ".bin";

/// Longest URL suffix accepted as a file extension (without the dot).
const MAX_URL_SUFFIX_LEN: usize = 5;

/// Known image content types and the extension each maps to.
const CONTENT_TYPE_EXTENSIONS: &[(&str, &str)] = &[
    ("image/jpeg", ".jpg"),
    ("image/jpg", ".jpg"),
    ("image/pjpeg", ".jpg"),
    ("image/png", ".png"),
    ("image/gif", ".gif"),
    ("image/webp", ".webp"),
    ("image/svg+xml", ".svg"),
    ("image/bmp", ".bmp"),
    ("image/tiff", ".tiff"),
    ("image/avif", ".avif"),
];

/// Raw bytes produced by an artifact source plus its type hints.
#[derive(Clone, Debug)]
pub struct Artifact {
    /// Artifact content.
    pub bytes: Bytes,
    /// `Content-Type` declared by the origin, if any.
    pub content_type: Option<String>,
    /// URL the bytes were downloaded from, if any.
    pub source_url: Option<String>,
}

impl Artifact {
    /// Create an artifact from bytes and an optional declared content type.
    pub fn new(bytes: impl Into<Bytes>, content_type: Option<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type,
            source_url: None,
        }
    }

    /// Attach the URL the artifact came from.
    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    /// Size of the artifact in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the artifact has no content.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// File extension (with leading dot) chosen by the storage-name policy.
    pub fn file_extension(&self) -> String {
        self.content_type
            .as_deref()
            .and_then(extension_for_content_type)
            .map(str::to_string)
            .or_else(|| self.source_url.as_deref().and_then(extension_from_url))
            .unwrap_or_else(|| FALLBACK_EXTENSION.to_string())
    }

    /// Content type the blob should be stored with.
    ///
    /// A declared known image type wins; anything else yields the type implied
    /// by [`Self::file_extension`], so the stored name and the served type
    /// never disagree.
    pub fn storage_content_type(&self) -> Option<String> {
        if let Some(declared) = self.content_type.as_deref()
            && extension_for_content_type(declared).is_some()
        {
            return Some(essence(declared));
        }
        content_type_for_extension(&self.file_extension()).map(str::to_string)
    }

    /// A fresh, unique storage name: random UUID plus [`Self::file_extension`].
    pub fn storage_filename(&self) -> String {
        format!("{}{}", Uuid::new_v4(), self.file_extension())
    }
}

/// Strip parameters and normalize case: `Image/JPEG; q=1` -> `image/jpeg`.
fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Map a declared content type to an extension, if it is a known image type.
pub fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let essence = essence(content_type);
    CONTENT_TYPE_EXTENSIONS
        .iter()
        .find(|(ct, _)| *ct == essence)
        .map(|(_, ext)| *ext)
}

/// Content type for an extension produced by this module.
pub fn content_type_for_extension(extension: &str) -> Option<&'static str> {
    CONTENT_TYPE_EXTENSIONS
        .iter()
        .find(|(_, ext)| *ext == extension)
        .map(|(ct, _)| *ct)
}

/// Take the trailing `.suffix` of the last URL path segment.
///
/// Query strings and fragments are ignored. The suffix must be 1-5 ASCII
/// alphanumerics; `jpeg` is normalized to `jpg`.
pub fn extension_from_url(url: &str) -> Option<String> {
    let without_query = url.split(['?', '#']).next().unwrap_or_default();
    let path = match without_query.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map(|(_, path)| path).unwrap_or(""),
        None => without_query,
    };
    let segment = path.rsplit('/').next().unwrap_or_default();
    let (stem, suffix) = segment.rsplit_once('.')?;
    if stem.is_empty()
        || suffix.is_empty()
        || suffix.len() > MAX_URL_SUFFIX_LEN
        || !suffix.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    let suffix = suffix.to_ascii_lowercase();
    if suffix == "jpeg" {
        return Some(".jpg".to_string());
    }
    Some(format!(".{suffix}"))
}
