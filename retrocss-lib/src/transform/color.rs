//! OKLCH to sRGB conversion and `oklch()` rewriting.

use super::numeric::{clamp, hue_to_degrees, parse_number_with_unit, Resolver, ValueKind};
use super::{matching_paren, TextTransformer};

const OKLCH_OPEN: &str = "oklch(";

/// Arguments of an `oklch()` call, normalized for conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParsedOklch {
    /// Lightness in `0..=1`.
    pub l: f64,
    /// Unitless chroma.
    pub c: f64,
    /// Hue in degrees.
    pub h: f64,
    pub alpha: Option<f64>,
}

fn linear_to_srgb(x: f64) -> f64 {
    if x <= 0.0031308 {
        12.92 * x
    } else {
        1.055 * x.powf(1.0 / 2.4) - 0.055
    }
}

/// Convert OKLCH to gamma-encoded sRGB channels, each clamped to `0..=1`.
pub fn oklch_to_srgb(l: f64, c: f64, h_deg: f64) -> [f64; 3] {
    let h_rad = (h_deg % 360.0).to_radians();
    let a = c * h_rad.cos();
    let b = c * h_rad.sin();

    let l_ = l + 0.3963377774 * a + 0.2158037573 * b;
    let m_ = l - 0.1055613458 * a - 0.0638541728 * b;
    let s_ = l - 0.0894841775 * a - 1.291485548 * b;

    let l3 = l_ * l_ * l_;
    let m3 = m_ * m_ * m_;
    let s3 = s_ * s_ * s_;

    let r = 4.0767416621 * l3 - 3.3077115913 * m3 + 0.2309699292 * s3;
    let g = -1.2684380046 * l3 + 2.6097574011 * m3 - 0.3413193965 * s3;
    let b = -0.0041960863 * l3 - 0.7034186147 * m3 + 1.707614701 * s3;

    [
        clamp01(linear_to_srgb(r)),
        clamp01(linear_to_srgb(g)),
        clamp01(linear_to_srgb(b)),
    ]
}

fn clamp01(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        clamp(x, 0.0, 1.0)
    }
}

/// Render channels in `0..=1` as `rgb(R, G, B)`, or `rgba(R, G, B, A)` when
/// an alpha below 1 is present.
pub fn to_rgb_string(r: f64, g: f64, b: f64, alpha: Option<f64>) -> String {
    let channel = |v: f64| (v * 255.0).round() as u8;
    let (r, g, b) = (channel(r), channel(g), channel(b));
    match alpha {
        Some(a) if a >= 0.0 && a < 1.0 => format!("rgba({}, {}, {}, {})", r, g, b, a),
        _ => format!("rgb({}, {}, {})", r, g, b),
    }
}

/// Parse literal `oklch()` arguments (`L C H [/ A]`). Returns `None` for
/// dynamic arguments (`var()`, `calc()`, `env()`) and anything malformed.
pub fn parse_oklch_args(arg_text: &str) -> Option<ParsedOklch> {
    let txt = arg_text.trim();
    let lower = txt.to_ascii_lowercase();
    if lower.contains("var(") || lower.contains("calc(") || lower.contains("env(") {
        return None;
    }

    let mut parts = txt.split('/');
    let main = parts.next().unwrap_or_default().trim();
    let alpha_raw = parts.next().map(str::trim);

    let tokens: Vec<&str> = main
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.len() < 3 {
        return None;
    }

    let (l_value, l_unit) = parse_number_with_unit(tokens[0])?;
    let (c_value, _) = parse_number_with_unit(tokens[1])?;
    let (h_value, h_unit) = parse_number_with_unit(tokens[2])?;

    let l = match l_unit.as_str() {
        "%" => l_value / 100.0,
        "" => l_value,
        _ => return None,
    };
    let h = hue_to_degrees(h_value, &h_unit);
    if !l.is_finite() || !c_value.is_finite() || !h.is_finite() {
        return None;
    }

    let alpha = alpha_raw
        .and_then(parse_number_with_unit)
        .map(|(v, unit)| if unit == "%" { v / 100.0 } else { v });

    Some(ParsedOklch {
        l: clamp(l, 0.0, 1.0),
        c: c_value,
        h,
        alpha,
    })
}

/// Locate the first `oklch(` call in `text`: `(start, args, end)` where
/// `end` is just past the closing parenthesis.
fn find_oklch_call(text: &str, from: usize) -> Option<(usize, &str, usize)> {
    let lower = text.to_ascii_lowercase();
    let start = from + lower[from..].find(OKLCH_OPEN)?;
    let open = start + OKLCH_OPEN.len() - 1;
    let close = matching_paren(text, open)?;
    Some((start, &text[open + 1..close], close + 1))
}

/// Replace every literal `oklch()` in `input` with its `rgb()`/`rgba()`
/// equivalent. Returns the new text and the number of replacements.
pub fn replace_oklch_in_text(input: &str) -> (String, usize) {
    let mut out = String::with_capacity(input.len());
    let mut replaced = 0;
    let mut i = 0;
    while let Some((start, args, end)) = find_oklch_call(input, i) {
        out.push_str(&input[i..start]);
        match parse_oklch_args(args) {
            Some(p) => {
                let [r, g, b] = oklch_to_srgb(p.l, p.c, p.h);
                out.push_str(&to_rgb_string(r, g, b, p.alpha));
                replaced += 1;
            }
            None => out.push_str(&input[start..end]),
        }
        i = end;
    }
    out.push_str(&input[i..]);
    (out, replaced)
}

pub fn contains_oklch(text: &str) -> bool {
    text.to_ascii_lowercase().contains(OKLCH_OPEN)
}

/// Split on whitespace or commas outside parentheses.
fn split_args(s: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            c if depth == 0 && (c == ',' || c.is_whitespace()) => {
                if !s[start..i].trim().is_empty() {
                    out.push(s[start..i].trim());
                }
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    if !s[start..].trim().is_empty() {
        out.push(s[start..].trim());
    }
    out
}

/// Last `/` at parenthesis depth zero.
fn top_level_slash(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut found = None;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            '/' if depth == 0 => found = Some(i),
            _ => {}
        }
    }
    found
}

/// Evaluate the first `oklch()` in `value_text`, resolving `var()`,
/// `calc()` and `clamp()` arguments. `None` when any channel is not a
/// finite number.
pub fn compute_oklch(value_text: &str, resolver: &Resolver<'_>) -> Option<String> {
    let (_, inner, _) = find_oklch_call(value_text, 0)?;
    let (main, alpha_raw) = match top_level_slash(inner) {
        Some(slash) => (&inner[..slash], Some(inner[slash + 1..].trim())),
        None => (inner, None),
    };
    // Resolve first so a var() expanding to "L C H" tokenizes.
    let main = resolver.resolve_vars(main.trim());
    let tokens = split_args(&main);
    if tokens.len() < 3 {
        return None;
    }
    let l = resolver.evaluate(tokens[0], ValueKind::Lightness);
    let c = resolver.evaluate(tokens[1], ValueKind::Chroma);
    let h = resolver.evaluate(tokens[2], ValueKind::Hue);
    if !l.is_finite() || !c.is_finite() || !h.is_finite() {
        log::trace!("cannot evaluate oklch channels in `{}`", value_text);
        return None;
    }
    let alpha = alpha_raw
        .filter(|a| !a.is_empty())
        .map(|a| resolver.evaluate(&resolver.resolve_vars(a), ValueKind::Alpha))
        .filter(|a| a.is_finite())
        .map(|a| clamp(a, 0.0, 1.0))
        .unwrap_or(1.0);
    let [r, g, b] = oklch_to_srgb(clamp(l, 0.0, 1.0), c, h);
    Some(to_rgb_string(r, g, b, Some(alpha)))
}

/// [`TextTransformer`] replacing literal `oklch()` colors.
#[derive(Debug, Clone, Copy, Default)]
pub struct OklchLiteralReplacer;

impl TextTransformer for OklchLiteralReplacer {
    fn applies_to(&self, css: &str) -> bool {
        contains_oklch(css)
    }

    fn transform(&self, css: &str) -> String {
        replace_oklch_in_text(css).0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::numeric::EmptyScope;
    use std::collections::HashMap;

    fn rgb255(l: f64, c: f64, h: f64) -> [i32; 3] {
        let [r, g, b] = oklch_to_srgb(l, c, h);
        [
            (r * 255.0).round() as i32,
            (g * 255.0).round() as i32,
            (b * 255.0).round() as i32,
        ]
    }

    fn within_one(actual: [i32; 3], expected: [i32; 3]) -> bool {
        actual.iter().zip(expected.iter()).all(|(a, e)| (a - e).abs() <= 1)
    }

    #[test]
    fn test_white_and_black() {
        assert!(within_one(rgb255(1.0, 0.0, 0.0), [255, 255, 255]));
        assert!(within_one(rgb255(0.0, 0.0, 0.0), [0, 0, 0]));
    }

    #[test]
    fn test_known_colors() {
        assert!(within_one(rgb255(0.628, 0.2577, 29.23), [255, 0, 0]));
        assert!(within_one(rgb255(0.7, 0.15, 200.0), [0, 185, 195]));
        assert!(within_one(rgb255(0.5, 0.1, 120.0), [92, 107, 33]));
    }

    #[test]
    fn test_hue_wraps() {
        assert_eq!(rgb255(0.7, 0.15, 560.0), rgb255(0.7, 0.15, 200.0));
    }

    #[test]
    fn test_rgb_string_alpha() {
        assert_eq!(to_rgb_string(1.0, 0.0, 0.0, None), "rgb(255, 0, 0)");
        assert_eq!(to_rgb_string(1.0, 0.0, 0.0, Some(0.5)), "rgba(255, 0, 0, 0.5)");
        assert_eq!(to_rgb_string(1.0, 0.0, 0.0, Some(1.0)), "rgb(255, 0, 0)");
        assert_eq!(to_rgb_string(1.0, 0.0, 0.0, Some(-1.0)), "rgb(255, 0, 0)");
    }

    #[test]
    fn test_parse_literal_args() {
        let p = parse_oklch_args("70% 0.15 0.5turn / 50%").unwrap();
        assert!((p.l - 0.7).abs() < 1e-9);
        assert!((p.h - 180.0).abs() < 1e-9);
        assert_eq!(p.alpha, Some(0.5));
        assert!(parse_oklch_args("var(--l) 0.1 20").is_none());
        assert!(parse_oklch_args("0.5 0.1").is_none());
        assert!(parse_oklch_args("0.5px 0.1 20").is_none());
    }

    #[test]
    fn test_replace_in_text() {
        let (out, n) = replace_oklch_in_text(
            "a{color:OKLCH(1 0 0)} b{color:oklch(var(--x) 0 0);border-color:oklch(0 0 0 / 0.25)}",
        );
        assert_eq!(n, 2);
        assert_eq!(
            out,
            "a{color:rgb(255, 255, 255)} b{color:oklch(var(--x) 0 0);border-color:rgba(0, 0, 0, 0.25)}"
        );
        assert_eq!(replace_oklch_in_text("oklch(0 0 0"), ("oklch(0 0 0".to_string(), 0));
    }

    #[test]
    fn test_compute_with_vars() {
        let mut scope = HashMap::new();
        scope.insert("--brand".to_string(), "0.7 0.15 200".to_string());
        let resolver = Resolver::new(&scope);
        assert_eq!(
            compute_oklch("oklch(var(--brand))", &resolver).as_deref(),
            Some("rgb(0, 185, 195)")
        );
        let resolver = Resolver::new(&EmptyScope);
        assert_eq!(
            compute_oklch("oklch(1 0 0 / var(--tw-text-opacity))", &resolver).as_deref(),
            Some("rgb(255, 255, 255)")
        );
        assert_eq!(
            compute_oklch("oklch(calc(1 / 0) 0 0)", &resolver),
            None
        );
    }
}
