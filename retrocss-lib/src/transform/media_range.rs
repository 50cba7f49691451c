//! Level-4 media query range syntax to classic `min-`/`max-` features.
//!
//! `(width >= 600px)` becomes `(min-width: 600px)` and
//! `(500px < width <= 800px)` becomes
//! `(min-width: 500.02px) and (max-width: 800px)`. Exclusive bounds are
//! emulated by nudging the value by a small epsilon for `px`, `dppx` and
//! `dpi`; for any other unit, and for ratio features, they degrade to
//! inclusive. Conditions that do not parse are left exactly as written.

use super::{split_top_level, TextTransformer};
use std::fmt;

pub const EPSILON_PX: f64 = 0.02;
pub const EPSILON_DPPX: f64 = 0.001;
pub const EPSILON_DPI: f64 = 0.2;

const MEDIA_KEYWORD: &str = "@media";

const VALUE_UNITS: &[&str] = &[
    "px", "em", "rem", "vh", "vw", "vmin", "vmax", "dppx", "dpi", "dpcm", "pt", "pc", "cm", "mm",
    "in", "%",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFeature {
    Width,
    Height,
    DeviceWidth,
    DeviceHeight,
    AspectRatio,
    DeviceAspectRatio,
    Resolution,
}

impl MediaFeature {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "width" => Some(MediaFeature::Width),
            "height" => Some(MediaFeature::Height),
            "device-width" => Some(MediaFeature::DeviceWidth),
            "device-height" => Some(MediaFeature::DeviceHeight),
            "aspect-ratio" => Some(MediaFeature::AspectRatio),
            "device-aspect-ratio" => Some(MediaFeature::DeviceAspectRatio),
            "resolution" => Some(MediaFeature::Resolution),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MediaFeature::Width => "width",
            MediaFeature::Height => "height",
            MediaFeature::DeviceWidth => "device-width",
            MediaFeature::DeviceHeight => "device-height",
            MediaFeature::AspectRatio => "aspect-ratio",
            MediaFeature::DeviceAspectRatio => "device-aspect-ratio",
            MediaFeature::Resolution => "resolution",
        }
    }

    /// Ratio-valued features never get epsilon adjustment.
    pub fn is_ratio(self) -> bool {
        matches!(self, MediaFeature::AspectRatio | MediaFeature::DeviceAspectRatio)
    }
}

/// Bounds derived from one range condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFeatureRange {
    pub feature: MediaFeature,
    pub min: Option<String>,
    pub max: Option<String>,
}

impl fmt::Display for MediaFeatureRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.feature.name();
        match (&self.min, &self.max) {
            (Some(min), Some(max)) => write!(f, "(min-{}: {}) and (max-{}: {})", name, min, name, max),
            (Some(min), None) => write!(f, "(min-{}: {})", name, min),
            (None, Some(max)) => write!(f, "(max-{}: {})", name, max),
            (None, None) => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Less,
    LessEq,
    Greater,
    GreaterEq,
}

impl Comparison {
    fn is_exclusive(self) -> bool {
        matches!(self, Comparison::Less | Comparison::Greater)
    }

    fn is_less(self) -> bool {
        matches!(self, Comparison::Less | Comparison::LessEq)
    }

    /// `value OP feature` expressed as `feature OP' value`.
    fn flipped(self) -> Self {
        match self {
            Comparison::Less => Comparison::Greater,
            Comparison::LessEq => Comparison::GreaterEq,
            Comparison::Greater => Comparison::Less,
            Comparison::GreaterEq => Comparison::LessEq,
        }
    }
}

/// Direction of an epsilon nudge: raise a lower bound or lower an upper one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Nudge {
    Up,
    Down,
}

impl Nudge {
    fn sign(self) -> f64 {
        match self {
            Nudge::Up => 1.0,
            Nudge::Down => -1.0,
        }
    }
}

fn epsilon_for(unit: &str) -> Option<f64> {
    match unit {
        "px" => Some(EPSILON_PX),
        "dppx" => Some(EPSILON_DPPX),
        "dpi" => Some(EPSILON_DPI),
        _ => None,
    }
}

/// `600px` splits into `("600", "px")`; only the units media queries use
/// are accepted.
fn parse_value_unit(value: &str) -> Option<(&str, String)> {
    let s = value.trim();
    let bytes = s.as_bytes();
    let mut i = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        i += 1;
    }
    let int_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let mut digits = i - int_start;
    if i < bytes.len() && bytes[i] == b'.' {
        let frac_start = i + 1;
        let mut j = frac_start;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j == frac_start {
            return None;
        }
        digits += j - frac_start;
        i = j;
    }
    if digits == 0 {
        return None;
    }
    let unit = s[i..].to_ascii_lowercase();
    if !unit.is_empty() && !VALUE_UNITS.contains(&unit.as_str()) {
        return None;
    }
    Some((&s[..i], unit))
}

fn is_ratio_value(value: &str) -> bool {
    let Some((num, den)) = value.trim().split_once('/') else {
        return false;
    };
    let is_number = |s: &str| {
        let digit = |c: char| c.is_ascii_digit();
        let s = s.trim_start_matches(digit);
        s.strip_prefix('.')
            .map(|frac| frac.trim_start_matches(digit))
            .unwrap_or(s)
            .is_empty()
    };
    let well_formed = |s: &str| {
        !s.is_empty() && s.bytes().any(|b| b.is_ascii_digit()) && !s.ends_with('.') && is_number(s)
    };
    well_formed(num) && well_formed(den) && !num.contains(' ') && !den.contains(' ')
}

fn is_calc_value(value: &str) -> bool {
    value.trim_start().to_ascii_lowercase().starts_with("calc(")
}

/// Print a nudged bound without binary float noise (`0.12`, not
/// `0.12000000000000001`).
fn format_bound(value: f64) -> String {
    let rounded = (value * 1e6).round() / 1e6;
    if rounded == 0.0 {
        "0".to_string()
    } else {
        rounded.to_string()
    }
}

/// Adjust `number unit` for an exclusive bound.
fn adjust_exclusive(number: &str, unit: &str, nudge: Nudge) -> String {
    let Ok(num) = number.parse::<f64>() else {
        return format!("{}{}", number, unit);
    };
    match epsilon_for(unit) {
        Some(eps) => format!("{}{}", format_bound(num + nudge.sign() * eps), unit),
        None => format!("{}{}", num, unit),
    }
}

/// Evaluate a `calc()` over a single unit (`px`, `dppx`, `dpi` or none).
/// Mixed-unit addition or subtraction fails.
pub fn evaluate_calc(expr: &str) -> Option<(f64, String)> {
    let trimmed = expr.trim();
    if !is_calc_value(trimmed) || !trimmed.ends_with(')') {
        return None;
    }
    let src = trimmed["calc(".len()..trimmed.len() - 1].as_bytes();
    let mut parser = CalcParser { src, pos: 0 };
    let value = parser.expr()?;
    parser.skip_ws();
    if parser.pos != src.len() {
        return None;
    }
    Some(value)
}

fn evaluate_and_adjust_calc(expr: &str, nudge: Nudge) -> String {
    match evaluate_calc(expr) {
        Some((value, unit)) => match epsilon_for(&unit) {
            Some(eps) => format!("{}{}", format_bound(value + nudge.sign() * eps), unit),
            None => expr.trim().to_string(),
        },
        None => expr.trim().to_string(),
    }
}

struct CalcParser<'a> {
    src: &'a [u8],
    pos: usize,
}

impl CalcParser<'_> {
    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn number_unit(&mut self) -> Option<(f64, String)> {
        self.skip_ws();
        let start = self.pos;
        if matches!(self.peek(), Some(b'+') | Some(b'-')) {
            self.pos += 1;
        }
        let mut saw = false;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
            saw = true;
        }
        if self.peek() == Some(b'.') {
            self.pos += 1;
            while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                self.pos += 1;
                saw = true;
            }
        }
        if !saw {
            self.pos = start;
            return None;
        }
        let num: f64 = std::str::from_utf8(&self.src[start..self.pos]).ok()?.parse().ok()?;
        let rest = &self.src[self.pos..];
        let unit = ["dppx", "dpi", "px"]
            .into_iter()
            .find(|u| rest.len() >= u.len() && rest[..u.len()].eq_ignore_ascii_case(u.as_bytes()))
            .unwrap_or("");
        self.pos += unit.len();
        Some((num, unit.to_string()))
    }

    fn primary(&mut self) -> Option<(f64, String)> {
        self.skip_ws();
        if self.peek() == Some(b'(') {
            self.pos += 1;
            let value = self.expr()?;
            self.skip_ws();
            if self.peek() != Some(b')') {
                return None;
            }
            self.pos += 1;
            return Some(value);
        }
        self.number_unit()
    }

    fn factor(&mut self) -> Option<(f64, String)> {
        self.skip_ws();
        let mut sign = 1.0;
        while let Some(b @ (b'+' | b'-')) = self.peek() {
            // A sign directly attached to digits belongs to the number.
            if self.src.get(self.pos + 1).is_some_and(|n| n.is_ascii_digit() || *n == b'.') {
                break;
            }
            if b == b'-' {
                sign = -sign;
            }
            self.pos += 1;
            self.skip_ws();
        }
        let (value, unit) = self.primary()?;
        Some((value * sign, unit))
    }

    fn term(&mut self) -> Option<(f64, String)> {
        let mut acc = self.factor()?;
        self.skip_ws();
        while let Some(op @ (b'*' | b'/')) = self.peek() {
            self.pos += 1;
            let rhs = self.factor()?;
            acc = combine(acc, rhs, op)?;
            self.skip_ws();
        }
        Some(acc)
    }

    fn expr(&mut self) -> Option<(f64, String)> {
        let mut acc = self.term()?;
        self.skip_ws();
        while let Some(op @ (b'+' | b'-')) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            acc = combine(acc, rhs, op)?;
            self.skip_ws();
        }
        Some(acc)
    }
}

fn combine(a: (f64, String), b: (f64, String), op: u8) -> Option<(f64, String)> {
    match op {
        b'+' | b'-' => {
            if a.1 != b.1 {
                return None;
            }
            let value = if op == b'+' { a.0 + b.0 } else { a.0 - b.0 };
            Some((value, a.1))
        }
        b'*' => match (a.1.is_empty(), b.1.is_empty()) {
            (false, false) => None,
            (true, _) => Some((a.0 * b.0, b.1)),
            (false, true) => Some((a.0 * b.0, a.1)),
        },
        b'/' => {
            if !b.1.is_empty() {
                return None;
            }
            Some((a.0 / b.0, a.1))
        }
        _ => None,
    }
}

/// Split a range condition into its operands and comparison operators.
fn split_comparisons(inner: &str) -> Option<(Vec<&str>, Vec<Comparison>)> {
    let bytes = inner.as_bytes();
    let mut operands = Vec::new();
    let mut ops = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b @ (b'<' | b'>') if depth == 0 => {
                let or_equal = bytes.get(i + 1) == Some(&b'=');
                let op = match (b, or_equal) {
                    (b'<', false) => Comparison::Less,
                    (b'<', true) => Comparison::LessEq,
                    (_, false) => Comparison::Greater,
                    (_, true) => Comparison::GreaterEq,
                };
                operands.push(inner[start..i].trim());
                ops.push(op);
                i += if or_equal { 2 } else { 1 };
                start = i;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    operands.push(inner[start..].trim());
    if ops.is_empty() || operands.iter().any(|o| o.is_empty()) {
        return None;
    }
    Some((operands, ops))
}

/// Derive one bound from a value for a feature.
fn bound(feature: MediaFeature, value: &str, exclusive: bool, nudge: Nudge) -> Option<String> {
    let value = value.trim();
    if feature.is_ratio() {
        return (is_ratio_value(value) || parse_value_unit(value).is_some() || is_calc_value(value))
            .then(|| value.to_string());
    }
    if is_calc_value(value) {
        return Some(if exclusive {
            evaluate_and_adjust_calc(value, nudge)
        } else {
            value.to_string()
        });
    }
    let (number, unit) = parse_value_unit(value)?;
    Some(if exclusive {
        adjust_exclusive(number, &unit, nudge)
    } else {
        format!("{}{}", number, unit)
    })
}

fn single_comparison(left: &str, op: Comparison, right: &str) -> Option<MediaFeatureRange> {
    let (feature, value, feature_op) = match (MediaFeature::parse(left), MediaFeature::parse(right)) {
        (Some(feature), None) => (feature, right, op),
        (None, Some(feature)) => (feature, left, op.flipped()),
        _ => return None,
    };
    let mut range = MediaFeatureRange {
        feature,
        min: None,
        max: None,
    };
    if feature_op.is_less() {
        range.max = Some(bound(feature, value, feature_op.is_exclusive(), Nudge::Down)?);
    } else {
        range.min = Some(bound(feature, value, feature_op.is_exclusive(), Nudge::Up)?);
    }
    Some(range)
}

fn triple_range(
    left: &str,
    op1: Comparison,
    feature: &str,
    op2: Comparison,
    right: &str,
) -> Option<MediaFeatureRange> {
    let feature = MediaFeature::parse(feature)?;
    if feature.is_ratio() && (!is_ratio_value(left) || !is_ratio_value(right)) {
        return None;
    }
    // `low < f < high` or `high > f > low`; mixed directions are not ranges.
    let (low, low_op, high, high_op) = match (op1.is_less(), op2.is_less()) {
        (true, true) => (left, op1, right, op2),
        (false, false) => (right, op2, left, op1),
        _ => return None,
    };
    Some(MediaFeatureRange {
        feature,
        min: Some(bound(feature, low, low_op.is_exclusive(), Nudge::Up)?),
        max: Some(bound(feature, high, high_op.is_exclusive(), Nudge::Down)?),
    })
}

/// Parse one parenthesized range condition, with or without its outer
/// parentheses.
pub fn parse_range_condition(atom: &str) -> Option<MediaFeatureRange> {
    let trimmed = atom.trim();
    let inner = trimmed
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(trimmed)
        .trim();
    let (operands, ops) = split_comparisons(inner)?;
    match (operands.as_slice(), ops.as_slice()) {
        ([left, right], [op]) => single_comparison(left, *op, right),
        ([left, feature, right], [op1, op2]) => triple_range(left, *op1, feature, *op2, right),
        _ => None,
    }
}

/// Split a condition on top-level `and` keywords.
fn split_on_and(condition: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut buf = String::new();
    for word in condition.split_whitespace() {
        for c in word.chars() {
            match c {
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                _ => {}
            }
        }
        if depth == 0 && word.eq_ignore_ascii_case("and") {
            if !buf.trim().is_empty() {
                parts.push(std::mem::take(&mut buf));
            }
            buf.clear();
        } else {
            if !buf.is_empty() {
                buf.push(' ');
            }
            buf.push_str(word);
        }
    }
    if !buf.trim().is_empty() {
        parts.push(buf);
    }
    parts
}

/// Rewrite one media query; `None` when nothing in it changed.
fn transform_query(query: &str) -> Option<String> {
    let lower = query.to_ascii_lowercase();
    let prefix_len = ["not ", "only "]
        .iter()
        .find(|p| lower.starts_with(*p))
        .map(|p| {
            let rest = &query[p.len()..];
            query.len() - rest.trim_start().len()
        })
        .unwrap_or(0);
    let (prefix, rest) = query.split_at(prefix_len);

    let mut changed = false;
    let parts: Vec<String> = split_on_and(rest)
        .into_iter()
        .map(|part| match parse_range_condition(&part) {
            Some(range) if part.trim_start().starts_with('(') => {
                changed = true;
                range.to_string()
            }
            _ => part,
        })
        .collect();
    changed.then(|| format!("{}{}", prefix, parts.join(" and ")))
}

/// Rewrite a comma-separated media query list; `None` when unchanged.
pub fn transform_media_query_list(list: &str) -> Option<String> {
    let mut changed = false;
    let queries: Vec<String> = split_top_level(list, ',')
        .into_iter()
        .map(|query| {
            let query = query.trim();
            match transform_query(query) {
                Some(rewritten) => {
                    changed = true;
                    rewritten
                }
                None => query.to_string(),
            }
        })
        .collect();
    changed.then(|| queries.join(", "))
}

/// Positions of `@media` preludes: `(keyword_start, prelude_start, brace)`.
fn media_preludes(css: &str) -> Vec<(usize, usize, usize)> {
    let lower = css.to_ascii_lowercase();
    let mut found = Vec::new();
    let mut from = 0;
    while let Some(pos) = lower[from..].find(MEDIA_KEYWORD) {
        let start = from + pos;
        let prelude_start = start + MEDIA_KEYWORD.len();
        from = prelude_start;
        if !css[prelude_start..].starts_with(|c: char| c.is_whitespace()) {
            continue;
        }
        let Some(brace) = css[prelude_start..].find('{').map(|p| prelude_start + p) else {
            break;
        };
        found.push((start, prelude_start, brace));
        from = brace + 1;
    }
    found
}

/// True when some `@media` prelude in `css` uses a range comparison.
pub fn has_range_media(css: &str) -> bool {
    media_preludes(css)
        .into_iter()
        .any(|(_, prelude, brace)| css[prelude..brace].contains(['<', '>']))
}

/// Rewrite every `@media` prelude in `css` that uses range syntax.
pub fn transform(css: &str) -> String {
    let mut out = String::with_capacity(css.len());
    let mut last = 0;
    for (start, prelude_start, brace) in media_preludes(css) {
        let condition = css[prelude_start..brace].trim();
        if let Some(rewritten) = transform_media_query_list(condition) {
            out.push_str(&css[last..start]);
            out.push_str(MEDIA_KEYWORD);
            out.push(' ');
            out.push_str(&rewritten);
            out.push_str(" {");
            last = brace + 1;
        }
    }
    out.push_str(&css[last..]);
    out
}

/// [`TextTransformer`] for media query range syntax.
#[derive(Debug, Clone, Copy, Default)]
pub struct MediaRangeTranspiler;

impl TextTransformer for MediaRangeTranspiler {
    fn applies_to(&self, css: &str) -> bool {
        has_range_media(css)
    }

    fn transform(&self, css: &str) -> String {
        transform(css)
    }
}
