//! `@layer` flattening.
//!
//! Layer blocks are unwrapped in place and their names discarded, so every
//! layer ends up unlayered in source order. Layer ordering statements
//! (`@layer a, b;`) are dropped. Selector branches targeting `::backdrop`
//! are removed along the way.

use super::brace::extract_block;
use super::{split_top_level, TextTransformer};

const LAYER_KEYWORD: &str = "@layer";
const BACKDROP: &str = "::backdrop";

/// [`TextTransformer`] for cascade layers.
#[derive(Debug, Clone, Copy, Default)]
pub struct LayerFlattener;

impl TextTransformer for LayerFlattener {
    fn applies_to(&self, css: &str) -> bool {
        css.contains(LAYER_KEYWORD)
    }

    fn transform(&self, css: &str) -> String {
        flatten(css)
    }
}

/// Flatten every `@layer` construct in `css`.
pub fn flatten(css: &str) -> String {
    parse_blocks(css).join("\n")
}

fn parse_blocks(css: &str) -> Vec<String> {
    let bytes = css.as_bytes();
    let mut output = Vec::new();
    let mut buffer = String::new();
    let mut i = 0;

    while i < bytes.len() {
        if css[i..].starts_with(LAYER_KEYWORD) && !is_ident_byte(bytes.get(i + LAYER_KEYWORD.len())) {
            flush_text(&mut output, &mut buffer);
            let mut j = skip_whitespace(bytes, i + LAYER_KEYWORD.len());
            while j < bytes.len() && is_layer_name_byte(bytes[j]) {
                j += 1;
            }
            j = skip_whitespace(bytes, j);
            match bytes.get(j) {
                Some(b'{') => {
                    let block = extract_block(css, j);
                    output.extend(parse_blocks(block.block_content));
                    i = block.end_index;
                    continue;
                }
                Some(b',') | Some(b';') => {
                    i = css[j..].find(';').map(|p| j + p + 1).unwrap_or(bytes.len());
                    continue;
                }
                _ => {
                    buffer.push_str(LAYER_KEYWORD);
                    i += LAYER_KEYWORD.len();
                    continue;
                }
            }
        }

        if bytes[i] == b'{' {
            let (leading, selector) = split_prelude(&buffer);
            if !leading.trim().is_empty() {
                output.push(leading.to_string());
            }
            let selector = selector.trim().to_string();
            buffer.clear();

            let block = extract_block(css, i);
            let nested = parse_blocks(block.block_content).join("\n");
            i = block.end_index;

            let cleaned = strip_backdrop(&selector);
            if !cleaned.is_empty() {
                output.push(format!("{} {{{}}}", cleaned, nested));
            }
            continue;
        }

        // Copy one whole character; `i` always sits on a char boundary here.
        let ch_len = css[i..].chars().next().map(char::len_utf8).unwrap_or(1);
        buffer.push_str(&css[i..i + ch_len]);
        i += ch_len;
    }

    flush_text(&mut output, &mut buffer);
    output
}

/// Split buffered text before a `{` into leading declarations/statements and
/// the prelude proper. Anything up to the last top-level `;` is leading text.
fn split_prelude(buffer: &str) -> (&str, &str) {
    let parts = split_top_level(buffer, ';');
    if parts.len() < 2 {
        return ("", buffer);
    }
    let prelude = parts[parts.len() - 1];
    let cut = buffer.len() - prelude.len();
    (&buffer[..cut], prelude)
}

fn strip_backdrop(selector: &str) -> String {
    if !selector.contains(BACKDROP) {
        return selector.to_string();
    }
    split_top_level(selector, ',')
        .into_iter()
        .map(str::trim)
        .filter(|branch| !branch.is_empty() && !branch.contains(BACKDROP))
        .collect::<Vec<_>>()
        .join(", ")
}

fn flush_text(output: &mut Vec<String>, buffer: &mut String) {
    if !buffer.trim().is_empty() {
        output.push(std::mem::take(buffer));
    } else {
        buffer.clear();
    }
}

fn skip_whitespace(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

fn is_layer_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-')
}

fn is_ident_byte(b: Option<&u8>) -> bool {
    matches!(b, Some(b) if b.is_ascii_alphanumeric() || *b == b'-' || *b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwraps_named_layer() {
        assert_eq!(flatten("@layer a { .x { color: red; } }"), ".x { color: red; }");
    }

    #[test]
    fn test_unwraps_anonymous_and_nested_layers() {
        assert_eq!(
            flatten("@layer { @layer inner.sub { p { margin: 0 } } }"),
            "p { margin: 0 }"
        );
    }

    #[test]
    fn test_drops_layer_statement() {
        assert_eq!(
            flatten("@layer base, theme;\n@layer base { a { color: blue } }"),
            "a { color: blue }"
        );
    }

    #[test]
    fn test_backdrop_branches_are_removed() {
        assert_eq!(flatten(".x, .y::backdrop { color: red }"), ".x { color: red }");
        assert_eq!(flatten("dialog::backdrop { background: black }"), "");
    }

    #[test]
    fn test_media_blocks_recurse() {
        assert_eq!(
            flatten("@media (min-width: 10px) { @layer a { .x { top: 0 } } }"),
            "@media (min-width: 10px) {.x { top: 0 }}"
        );
    }

    #[test]
    fn test_leading_statements_are_kept_apart() {
        assert_eq!(
            flatten("@import url(a.css); .x { top: 0 }"),
            "@import url(a.css);\n.x { top: 0 }"
        );
    }

    #[test]
    fn test_layer_prefix_of_longer_keyword_is_text() {
        assert_eq!(flatten("@layered { a: b }"), "@layered { a: b }");
    }

    #[test]
    fn test_unterminated_input_terminates() {
        assert_eq!(flatten("@layer a { b { c"), "b { c}");
    }
}
