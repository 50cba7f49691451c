//! Balanced-brace block extraction over raw CSS text.
//!
//! The scanner does not understand strings, comments or `url()` tokens; a
//! brace inside any of those counts like any other brace.

use log::warn;

/// A `{ ... }` block found by [`extract_block`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockExtraction<'a> {
    /// Text between the opening brace and its matching closing brace.
    pub block_content: &'a str,
    /// Byte index just past the closing brace (or the end of input).
    pub end_index: usize,
}

/// Extract the block opened by the `{` at byte index `start`.
///
/// Unterminated input yields everything after the opening brace. Work is
/// bounded by twice the input length.
pub fn extract_block(css: &str, start: usize) -> BlockExtraction<'_> {
    let bytes = css.as_bytes();
    let max_len = bytes.len();
    let block_start = (start + 1).min(max_len);
    let max_iterations = max_len.saturating_mul(2);

    let mut i = block_start;
    let mut depth = 0usize;
    let mut iterations = 0usize;
    while i < max_len && iterations < max_iterations {
        match bytes[i] {
            b'{' => depth += 1,
            b'}' => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            }
            _ => {}
        }
        i += 1;
        iterations += 1;
    }

    if i >= max_len {
        warn!("unclosed CSS block starting at byte {}", start);
        return BlockExtraction {
            block_content: &css[block_start..],
            end_index: max_len,
        };
    }

    if iterations >= max_iterations {
        warn!("CSS block scan hit its iteration ceiling at byte {}", i);
        return BlockExtraction {
            block_content: css.get(block_start..i).unwrap_or_default(),
            end_index: i,
        };
    }

    BlockExtraction {
        block_content: &css[block_start..i],
        end_index: i + 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_nested_block() {
        let css = "a { b { c } d } e";
        let block = extract_block(css, 2);
        assert_eq!(block.block_content, " b { c } d ");
        assert_eq!(&css[block.end_index..], " e");
    }

    #[test]
    fn test_unterminated_block_returns_trailing_text() {
        let css = "a { b { c";
        let block = extract_block(css, 2);
        assert_eq!(block.block_content, " b { c");
        assert_eq!(block.end_index, css.len());
    }

    #[test]
    fn test_start_at_end_of_input() {
        let block = extract_block("a {", 2);
        assert_eq!(block.block_content, "");
        assert_eq!(block.end_index, 3);
    }

    #[test]
    fn test_multibyte_content() {
        let css = ".é { content: \"→\" } x";
        let open = css.find('{').unwrap();
        let block = extract_block(css, open);
        assert_eq!(block.block_content, " content: \"→\" ");
    }
}
