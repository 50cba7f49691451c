//! Pure text transforms over CSS source.
//!
//! Every transform is a plain function from CSS text to CSS text; the
//! [`TextTransformer`] trait is the seam the stylesheet access strategy
//! drives them through.

pub mod brace;
pub mod color;
pub mod layers;
pub mod media_range;
pub mod numeric;
pub mod viewport_units;

use std::fmt;
use std::str::FromStr;

/// The stylesheet rewrites this crate knows how to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Transform {
    Layers,
    MediaRange,
    ViewportUnits,
    Oklch,
}

impl Transform {
    /// Every transform, in the order a pass applies them.
    pub const ALL: [Transform; 4] = [
        Transform::Layers,
        Transform::MediaRange,
        Transform::ViewportUnits,
        Transform::Oklch,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Transform::Layers => "layers",
            Transform::MediaRange => "media-range",
            Transform::ViewportUnits => "viewport-units",
            Transform::Oklch => "oklch",
        }
    }

    /// The text transformer implementing this rewrite.
    pub fn transformer(self) -> &'static dyn TextTransformer {
        match self {
            Transform::Layers => &layers::LayerFlattener,
            Transform::MediaRange => &media_range::MediaRangeTranspiler,
            Transform::ViewportUnits => &viewport_units::ViewportUnitRewriter,
            Transform::Oklch => &color::OklchLiteralReplacer,
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Transform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Transform::ALL
            .into_iter()
            .find(|t| t.name() == wanted)
            .ok_or_else(|| {
                format!(
                    "unknown transform `{}` (expected one of: layers, media-range, viewport-units, oklch)",
                    s
                )
            })
    }
}

/// A rewrite of CSS text.
pub trait TextTransformer {
    /// Cheap check: does this text contain anything the transform rewrites?
    fn applies_to(&self, css: &str) -> bool;

    /// Rewrite `css`. Text the transform does not understand is kept as is.
    fn transform(&self, css: &str) -> String;
}

/// Split `text` on `sep` at parenthesis depth zero, outside quotes.
pub fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '"' | '\'' => quote = Some(c),
                '(' | '[' => depth += 1,
                ')' | ']' => depth = depth.saturating_sub(1),
                c if c == sep && depth == 0 => {
                    parts.push(&text[start..i]);
                    start = i + c.len_utf8();
                }
                _ => {}
            },
        }
    }
    parts.push(&text[start..]);
    parts
}

/// 32-bit `h * 31 + c` string hash over UTF-16 code units, wrapping.
pub fn hash_string(text: &str) -> u32 {
    text.encode_utf16()
        .fold(0i32, |h, c| h.wrapping_shl(5).wrapping_sub(h).wrapping_add(c as i32)) as u32
}

/// Base-36 rendering of a hash, used in injected element ids.
pub fn to_base36(mut value: u32) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// Find the index of the `)` closing the `(` at `open`.
pub(crate) fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in text[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_top_level_respects_parens_and_quotes() {
        assert_eq!(
            split_top_level("a, :is(b, c), [x=\",\"], d", ','),
            vec!["a", " :is(b, c)", " [x=\",\"]", " d"]
        );
        assert_eq!(split_top_level("", ','), vec![""]);
    }

    #[test]
    fn test_hash_string() {
        assert_eq!(hash_string(""), 0);
        assert_eq!(hash_string("a"), 97);
        assert_eq!(hash_string("ab"), 97 * 31 + 98);
        assert_eq!(to_base36(97), "2p");
        assert_eq!(to_base36(0), "0");
    }

    #[test]
    fn test_transform_from_str() {
        assert_eq!("media_range".parse::<Transform>(), Ok(Transform::MediaRange));
        assert_eq!("OKLCH".parse::<Transform>(), Ok(Transform::Oklch));
        assert!("nope".parse::<Transform>().is_err());
    }

    #[test]
    fn test_matching_paren() {
        let text = "calc((1 + 2) * 3) rest";
        assert_eq!(matching_paren(text, 4), Some(16));
        assert_eq!(matching_paren("(unclosed", 0), None);
    }
}
