//! Token estimation for context budgeting.
//!
//! The estimate is deliberately coarse: `ceil(chars / 4)` over visible
//! textual content. Budgeting never reorders history; it only drops nodes
//! that do not fit, so a stable over-approximation is all that is needed.

use crate::model::ContentBlock;

/// `ceil(chars / 4)` over the text.
pub fn estimate_text(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Estimate over the flattened visible text of a block list. Signatures
/// carry no visible text and cost nothing.
pub fn estimate_blocks(blocks: &[ContentBlock]) -> usize {
    let chars: usize = blocks
        .iter()
        .map(|b| b.visible_text().chars().count())
        .sum();
    chars.div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::quickcheck;

    #[test]
    fn test_rounding_up() {
        assert_eq!(estimate_text(""), 0);
        assert_eq!(estimate_text("a"), 1);
        assert_eq!(estimate_text("abcd"), 1);
        assert_eq!(estimate_text("abcde"), 2);
    }

    #[test]
    fn test_blocks_ignore_signatures() {
        let blocks = vec![
            ContentBlock::Text { text: "abcd".into() },
            ContentBlock::ThinkingSignature { signature: "x".repeat(400) },
        ];
        assert_eq!(estimate_blocks(&blocks), 1);
    }

    #[test]
    fn test_multibyte_counts_chars_not_bytes() {
        // Four characters, twelve UTF-8 bytes.
        assert_eq!(estimate_text("日本語字"), 1);
    }

    quickcheck! {
        fn prop_monotonic_in_length(s: String, extra: String) -> bool {
            estimate_text(&format!("{s}{extra}")) >= estimate_text(&s)
        }
    }
}
