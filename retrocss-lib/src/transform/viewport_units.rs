//! Dynamic, small and large viewport units mapped onto the classic ones.
//!
//! `100dvh` becomes `100vh`, `50svmin` becomes `50vmin` and so on. Text
//! inside `var(...)` is never touched.

use super::TextTransformer;

const UNIT_MAP: &[(&str, &str)] = &[
    ("dvh", "vh"),
    ("svh", "vh"),
    ("lvh", "vh"),
    ("dvw", "vw"),
    ("svw", "vw"),
    ("lvw", "vw"),
    ("dvmin", "vmin"),
    ("svmin", "vmin"),
    ("lvmin", "vmin"),
    ("dvmax", "vmax"),
    ("svmax", "vmax"),
    ("lvmax", "vmax"),
];

fn classic_unit(unit: &str) -> Option<&'static str> {
    UNIT_MAP
        .iter()
        .find(|(modern, _)| *modern == unit)
        .map(|(_, classic)| *classic)
}

/// Rewrite units in a declaration value, skipping `var()` references.
pub fn replace_units_outside_var(value: &str) -> String {
    let lower = value.to_ascii_lowercase();
    let mut out = String::with_capacity(value.len());
    let mut i = 0;
    while let Some(pos) = lower[i..].find("var(") {
        let var_start = i + pos;
        out.push_str(&replace_units(&value[i..var_start]));
        let mut depth = 1usize;
        let mut j = var_start + 4;
        let bytes = value.as_bytes();
        while j < bytes.len() && depth > 0 {
            match bytes[j] {
                b'(' => depth += 1,
                b')' => depth -= 1,
                _ => {}
            }
            j += 1;
        }
        out.push_str(&value[var_start..j]);
        i = j;
    }
    out.push_str(&replace_units(&value[i..]));
    out
}

/// Rewrite `<number><ws>*<modern unit>` occurrences in plain text. Units
/// match case-insensitively and whitespace before them is kept.
fn replace_units(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    let mut copied = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let number_start = b.is_ascii_digit()
            || (b == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit));
        let preceded_by_word = i > 0 && (bytes[i - 1].is_ascii_alphabetic() || bytes[i - 1] == b'_');
        if !number_start || preceded_by_word {
            i += 1;
            continue;
        }
        let start = if i > 0 && bytes[i - 1] == b'-' { i - 1 } else { i };
        let mut j = i;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j < bytes.len() && bytes[j] == b'.' && bytes.get(j + 1).is_some_and(u8::is_ascii_digit) {
            j += 1;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
        }
        let number_end = j;
        while j < bytes.len() && bytes[j].is_ascii_whitespace() {
            j += 1;
        }
        let unit_start = j;
        while j < bytes.len() && bytes[j].is_ascii_alphabetic() {
            j += 1;
        }
        match classic_unit(&text[unit_start..j].to_ascii_lowercase()) {
            Some(classic) => {
                out.push_str(&text[copied..start]);
                out.push_str(&text[start..unit_start]);
                out.push_str(classic);
                copied = j;
                i = j;
            }
            None => i = number_end.max(i + 1),
        }
    }
    out.push_str(&text[copied..]);
    out
}

pub fn contains_modern_units(css: &str) -> bool {
    let lower = css.to_ascii_lowercase();
    UNIT_MAP.iter().any(|(modern, _)| lower.contains(modern)) && replace_units_outside_var(css) != css
}

/// Rewrite units inside declaration values of a whole stylesheet. Selectors
/// and at-rule preludes are left alone.
pub fn transform(css: &str) -> String {
    let mut out = String::with_capacity(css.len());
    let mut depth = 0usize;
    let mut value_start: Option<usize> = None;
    let mut copied = 0;
    for (i, c) in css.char_indices() {
        match c {
            '{' => {
                value_start = None;
                depth += 1;
            }
            ':' if depth > 0 && value_start.is_none() => value_start = Some(i + 1),
            ';' | '}' => {
                if let Some(start) = value_start.take() {
                    out.push_str(&css[copied..start]);
                    out.push_str(&replace_units_outside_var(&css[start..i]));
                    copied = i;
                }
                if c == '}' {
                    depth = depth.saturating_sub(1);
                }
            }
            _ => {}
        }
    }
    out.push_str(&css[copied..]);
    out
}

/// [`TextTransformer`] for viewport units.
#[derive(Debug, Clone, Copy, Default)]
pub struct ViewportUnitRewriter;

impl TextTransformer for ViewportUnitRewriter {
    fn applies_to(&self, css: &str) -> bool {
        contains_modern_units(css)
    }

    fn transform(&self, css: &str) -> String {
        transform(css)
    }
}
