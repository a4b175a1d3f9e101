//! Content hashing for canvas artefacts and drafts.
//!
//! The hash convention must be byte-identical across implementations:
//! UTF-8 encoding first, then SHA-256, then lowercase hex.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of the UTF-8 bytes of `content`.
///
/// This is the canonical artefact/draft content hash. Identical content
/// always yields an identical hash, which is what gates draft promotion.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Incremental SHA-256 for content assembled in pieces (e.g. a streamed
/// assistant response). Finalizes to the same lowercase hex form as
/// [`content_hash`].
#[derive(Clone, Default)]
pub struct ContentHasher {
    inner: Sha256,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &str) {
        self.inner.update(chunk.as_bytes());
    }

    pub fn finalize(self) -> String {
        hex::encode(self.inner.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::quickcheck;

    #[test]
    fn test_known_vector() {
        // SHA-256 of the empty string.
        assert_eq!(
            content_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            content_hash("# Plan\nA"),
            content_hash("# Plan\nA"),
        );
    }

    #[test]
    fn test_lowercase_hex() {
        let h = content_hash("tangent");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_incremental_matches_oneshot() {
        let mut hasher = ContentHasher::new();
        hasher.update("# Plan");
        hasher.update("\n");
        hasher.update("A");
        assert_eq!(hasher.finalize(), content_hash("# Plan\nA"));
    }

    quickcheck! {
        fn prop_split_invariant(s: String, split: usize) -> bool {
            let at = split.min(s.len());
            // Splitting at a non-boundary would panic; clamp to a char boundary.
            let at = (0..=at).rev().find(|i| s.is_char_boundary(*i)).unwrap_or(0);
            let (a, b) = s.split_at(at);
            let mut hasher = ContentHasher::new();
            hasher.update(a);
            hasher.update(b);
            hasher.finalize() == content_hash(&s)
        }
    }
}
