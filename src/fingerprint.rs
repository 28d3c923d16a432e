//! Content identity used to decide whether a copy is needed.
//!
//! Two objects are considered the same content iff their size and identity
//! tag (ETag) are exactly equal.  Object bytes are never compared.

use std::fmt;

/// (size, identity tag) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    size: u64,
    tag: String,
}

impl Fingerprint {
    pub fn new(size: u64, tag: impl Into<String>) -> Self {
        Self {
            size,
            tag: tag.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Whether the tag looks like an S3 multipart ETag (`"<hex>-<parts>"`).
    ///
    /// Such tags depend on the part size used at upload time, so two copies
    /// of identical bytes can carry different tags.
    pub fn has_composite_tag(&self) -> bool {
        let inner = self.tag.trim_matches('"');
        match inner.rsplit_once('-') {
            Some((hex, parts)) => {
                !hex.is_empty()
                    && hex.chars().all(|c| c.is_ascii_hexdigit())
                    && !parts.is_empty()
                    && parts.chars().all(|c| c.is_ascii_digit())
            }
            None => false,
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "size={} etag={}", self.size, self.tag)
    }
}
