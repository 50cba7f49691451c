//! Constrained numeric evaluation of CSS component values.
//!
//! Handles plain numbers with units, `calc()` arithmetic, `clamp()` and
//! `var()` substitution. Anything malformed evaluates to `NaN`; callers
//! treat that as "leave this value alone".

use super::{matching_paren, split_top_level};
use std::collections::HashMap;

/// Maximum nesting of `var()` substitution rounds.
pub const VAR_DEPTH_LIMIT: usize = 5;

/// Which OKLCH component a value is evaluated for. Selects how units are
/// normalized before arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Lightness,
    Chroma,
    Hue,
    Alpha,
}

/// Source of inherited custom property values for `var()` resolution.
pub trait VarScope {
    fn custom_property(&self, name: &str) -> Option<String>;
}

/// A scope with no custom properties at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyScope;

impl VarScope for EmptyScope {
    fn custom_property(&self, _name: &str) -> Option<String> {
        None
    }
}

impl VarScope for HashMap<String, String> {
    fn custom_property(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Split a leading number off `token`: `"12.5deg"` gives `(12.5, "deg")`.
/// Exponents are not recognized; the unit is whatever follows the digits.
pub fn parse_number_with_unit(token: &str) -> Option<(f64, String)> {
    let s = token.trim();
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
        if j > frac_start {
            digits += j - frac_start;
            i = j;
        }
    }
    if digits == 0 {
        return None;
    }
    let value: f64 = s[..i].parse().ok()?;
    Some((value, s[i..].trim().to_string()))
}

/// Convert a hue with the given unit to degrees. Unknown units are taken
/// as degrees.
pub fn hue_to_degrees(value: f64, unit: &str) -> f64 {
    if !value.is_finite() {
        return f64::NAN;
    }
    match unit.to_ascii_lowercase().as_str() {
        "grad" => value * 0.9,
        "rad" => value.to_degrees(),
        "turn" => value * 360.0,
        _ => value,
    }
}

/// Clamp that tolerates inverted bounds instead of panicking like
/// `f64::clamp`.
pub fn clamp(value: f64, min: f64, max: f64) -> f64 {
    value.max(min).min(max)
}

/// Evaluates values against a custom-property scope.
///
/// Rule-local custom properties (declared in the same rule as the value)
/// take precedence over the scope.
pub struct Resolver<'a> {
    scope: &'a dyn VarScope,
    local_vars: Option<&'a HashMap<String, String>>,
}

impl<'a> Resolver<'a> {
    pub fn new(scope: &'a dyn VarScope) -> Self {
        Resolver {
            scope,
            local_vars: None,
        }
    }

    pub fn with_local_vars(scope: &'a dyn VarScope, local_vars: &'a HashMap<String, String>) -> Self {
        Resolver {
            scope,
            local_vars: Some(local_vars),
        }
    }

    /// Resolve one `var(--name[, fallback])` chunk.
    pub fn resolve_var(&self, chunk: &str) -> Option<String> {
        let chunk = chunk.trim();
        let lower = chunk.to_ascii_lowercase();
        if !lower.starts_with("var(") || !chunk.ends_with(')') {
            return None;
        }
        let inner = chunk[4..chunk.len() - 1].trim_start();
        let name_end = inner
            .find(|c: char| c == ',' || c == ')' || c.is_whitespace())
            .unwrap_or(inner.len());
        let name = &inner[..name_end];
        if name.is_empty() {
            return None;
        }
        let rest = inner[name_end..].trim_start();
        let fallback = rest.strip_prefix(',').map(str::trim);

        let local = self
            .local_vars
            .and_then(|vars| vars.get(name))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let value = local.or_else(|| {
            self.scope
                .custom_property(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        });
        if let Some(value) = value {
            return Some(value);
        }
        if let Some(fallback) = fallback {
            return Some(fallback.to_string());
        }
        Some(default_for_missing(name).to_string())
    }

    /// Substitute every `var()` in `text`, re-scanning substituted text up to
    /// [`VAR_DEPTH_LIMIT`] rounds.
    pub fn resolve_vars(&self, text: &str) -> String {
        let mut out = text.to_string();
        for _ in 0..=VAR_DEPTH_LIMIT {
            if !contains_var(&out) {
                break;
            }
            out = self.substitute_once(&out);
        }
        out
    }

    fn substitute_once(&self, text: &str) -> String {
        let lower = text.to_ascii_lowercase();
        let mut out = String::with_capacity(text.len());
        let mut i = 0;
        while let Some(pos) = lower[i..].find("var(") {
            let start = i + pos;
            out.push_str(&text[i..start]);
            let Some(close) = matching_paren(text, start + 3) else {
                out.push_str(&text[start..]);
                return out;
            };
            let chunk = &text[start..=close];
            match self.resolve_var(chunk) {
                Some(value) => out.push_str(&value),
                None => out.push_str(chunk),
            }
            i = close + 1;
        }
        out.push_str(&text[i..]);
        out
    }

    /// Evaluate `token` to a number for the given component kind.
    pub fn evaluate(&self, token: &str, kind: ValueKind) -> f64 {
        let s = token.trim();
        if s.is_empty() {
            return f64::NAN;
        }
        let s = self.resolve_vars(s);
        let s = s.trim();
        let lower = s.to_ascii_lowercase();

        if lower.starts_with("clamp(") {
            let inner = strip_function(s, "clamp(");
            let parts = split_top_level(inner, ',');
            if parts.len() == 3 {
                let min = self.evaluate(parts[0], kind);
                let mid = self.evaluate(parts[1], kind);
                let max = self.evaluate(parts[2], kind);
                if min.is_finite() && mid.is_finite() && max.is_finite() {
                    return clamp(mid, min, max);
                }
            }
            return f64::NAN;
        }

        if lower.starts_with("calc(") {
            let inner = strip_function(s, "calc(");
            return eval_arithmetic(&normalize_units(inner, kind));
        }

        match parse_number_with_unit(s) {
            Some((value, unit)) => normalize(value, &unit.to_ascii_lowercase(), kind),
            None => f64::NAN,
        }
    }
}

fn contains_var(text: &str) -> bool {
    text.to_ascii_lowercase().contains("var(")
}

/// Numeric stand-ins for custom properties that resolve to nothing.
fn default_for_missing(name: &str) -> &'static str {
    let lname = name.to_ascii_lowercase();
    if lname == "opacity" || lname.ends_with("-opacity") {
        "1"
    } else if lname.contains("infinite") {
        "1000000"
    } else {
        "0"
    }
}

fn strip_function<'s>(s: &'s str, head: &str) -> &'s str {
    if s.len() > head.len() && s.ends_with(')') {
        &s[head.len()..s.len() - 1]
    } else {
        s
    }
}

fn normalize(value: f64, unit: &str, kind: ValueKind) -> f64 {
    match kind {
        ValueKind::Lightness | ValueKind::Alpha | ValueKind::Chroma => {
            if unit == "%" {
                value / 100.0
            } else {
                value
            }
        }
        ValueKind::Hue => hue_to_degrees(value, unit),
    }
}

/// Replace every unit-bearing number inside a `calc()` body by its
/// unitless, kind-normalized value.
fn normalize_units(expr: &str, kind: ValueKind) -> String {
    let bytes = expr.as_bytes();
    let mut out = String::with_capacity(expr.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let starts_number = b.is_ascii_digit()
            || (b == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit));
        if !starts_number {
            let ch_len = expr[i..].chars().next().map(char::len_utf8).unwrap_or(1);
            out.push_str(&expr[i..i + ch_len]);
            i += ch_len;
            continue;
        }
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i < bytes.len() && bytes[i] == b'.' {
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
        }
        if matches!(bytes.get(i), Some(b'e') | Some(b'E')) {
            let sign = usize::from(matches!(bytes.get(i + 1), Some(b'+') | Some(b'-')));
            if bytes.get(i + 1 + sign).is_some_and(u8::is_ascii_digit) {
                i += 1 + sign;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
            }
        }
        let number_end = i;
        while i < bytes.len() && (bytes[i].is_ascii_alphabetic() || bytes[i] == b'%') {
            i += 1;
            if bytes[i - 1] == b'%' {
                break;
            }
        }
        let value: f64 = expr[start..number_end].parse().unwrap_or(f64::NAN);
        let unit = expr[number_end..i].to_ascii_lowercase();
        out.push_str(&normalize(value, &unit, kind).to_string());
    }
    out
}

/// Evaluate `+ - * /` arithmetic over plain numbers with parentheses.
/// Returns `NaN` unless the whole input is a well-formed expression.
pub fn eval_arithmetic(expr: &str) -> f64 {
    let compact: Vec<u8> = expr.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    let mut parser = Arithmetic { src: &compact, pos: 0 };
    let value = parser.expr();
    if parser.pos != compact.len() || !value.is_finite() {
        return f64::NAN;
    }
    value
}

struct Arithmetic<'a> {
    src: &'a [u8],
    pos: usize,
}

impl Arithmetic<'_> {
    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn digits(&mut self) -> usize {
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        self.pos - start
    }

    fn number(&mut self) -> f64 {
        let start = self.pos;
        if matches!(self.peek(), Some(b'+') | Some(b'-')) {
            self.pos += 1;
        }
        let mut seen = self.digits();
        if self.peek() == Some(b'.') {
            self.pos += 1;
            seen += self.digits();
        }
        if seen == 0 {
            return f64::NAN;
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            let mark = self.pos;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                self.pos += 1;
            }
            if self.digits() == 0 {
                self.pos = mark;
            }
        }
        std::str::from_utf8(&self.src[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(f64::NAN)
    }

    fn factor(&mut self) -> f64 {
        if self.peek() == Some(b'(') {
            self.pos += 1;
            let value = self.expr();
            if self.peek() != Some(b')') {
                return f64::NAN;
            }
            self.pos += 1;
            return value;
        }
        self.number()
    }

    fn term(&mut self) -> f64 {
        let mut value = self.factor();
        while let Some(op @ (b'*' | b'/')) = self.peek() {
            self.pos += 1;
            let rhs = self.factor();
            if !value.is_finite() || !rhs.is_finite() {
                return f64::NAN;
            }
            value = if op == b'*' { value * rhs } else { value / rhs };
        }
        value
    }

    fn expr(&mut self) -> f64 {
        let mut value = self.term();
        while let Some(op @ (b'+' | b'-')) = self.peek() {
            self.pos += 1;
            let rhs = self.term();
            if !value.is_finite() || !rhs.is_finite() {
                return f64::NAN;
            }
            value = if op == b'+' { value + rhs } else { value - rhs };
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_eval_arithmetic() {
        assert!(approx(eval_arithmetic("1 + 2 * 3"), 7.0));
        assert!(approx(eval_arithmetic("(1 + 2) * 3"), 9.0));
        assert!(approx(eval_arithmetic("-1.5e1 / 3"), -5.0));
        assert!(approx(eval_arithmetic("10 - -2"), 12.0));
        assert!(eval_arithmetic("1 / 0").is_nan());
        assert!(eval_arithmetic("1 +").is_nan());
        assert!(eval_arithmetic("(1 + 2").is_nan());
        assert!(eval_arithmetic("2px").is_nan());
        assert!(eval_arithmetic("").is_nan());
    }

    #[test]
    fn test_plain_values_per_kind() {
        let r = Resolver::new(&EmptyScope);
        assert!(approx(r.evaluate("70%", ValueKind::Lightness), 0.7));
        assert!(approx(r.evaluate("0.5", ValueKind::Alpha), 0.5));
        assert!(approx(r.evaluate("50%", ValueKind::Chroma), 0.5));
        assert!(approx(r.evaluate("0.5turn", ValueKind::Hue), 180.0));
        assert!(approx(r.evaluate("200grad", ValueKind::Hue), 180.0));
        assert!(approx(r.evaluate("3.141592653589793rad", ValueKind::Hue), 180.0));
        assert!(r.evaluate("none", ValueKind::Hue).is_nan());
        assert!(r.evaluate("  ", ValueKind::Hue).is_nan());
    }

    #[test]
    fn test_calc_and_clamp() {
        let r = Resolver::new(&EmptyScope);
        assert!(approx(r.evaluate("calc(50% + 10%)", ValueKind::Lightness), 0.6));
        assert!(approx(r.evaluate("calc(0.25turn * 2)", ValueKind::Hue), 180.0));
        assert!(approx(r.evaluate("clamp(0, 1.4, 1)", ValueKind::Lightness), 1.0));
        assert!(approx(
            r.evaluate("clamp(10%, calc(5% - 1%), 90%)", ValueKind::Lightness),
            0.1
        ));
        assert!(r.evaluate("clamp(1, 2)", ValueKind::Lightness).is_nan());
        assert!(r.evaluate("calc(1 +)", ValueKind::Lightness).is_nan());
        assert!(approx(r.evaluate("calc(5e-1)", ValueKind::Lightness), 0.5));
        assert!(approx(r.evaluate("calc(1e2 / 200)", ValueKind::Lightness), 0.5));
        assert!(approx(r.evaluate("calc(1E+1%)", ValueKind::Lightness), 0.1));
        assert!(approx(r.evaluate("calc(0.5turn)", ValueKind::Hue), 180.0));
    }

    #[test]
    fn test_var_resolution_order() {
        let mut scope = HashMap::new();
        scope.insert("--l".to_string(), "0.2".to_string());
        scope.insert("--h".to_string(), "90".to_string());
        let mut local = HashMap::new();
        local.insert("--l".to_string(), "0.8".to_string());

        let r = Resolver::with_local_vars(&scope, &local);
        assert!(approx(r.evaluate("var(--l)", ValueKind::Lightness), 0.8));
        assert!(approx(r.evaluate("var(--h)", ValueKind::Hue), 90.0));
        assert!(approx(r.evaluate("var(--missing, 40%)", ValueKind::Lightness), 0.4));
        assert!(approx(r.evaluate("calc(var(--h) * 2)", ValueKind::Hue), 180.0));
    }

    #[test]
    fn test_missing_var_defaults() {
        let r = Resolver::new(&EmptyScope);
        assert_eq!(r.resolve_vars("var(--tw-bg-opacity)"), "1");
        assert_eq!(r.resolve_vars("var(--ring-offset)"), "0");
        assert_eq!(r.resolve_vars("var(--infinite-radius)"), "1000000");
        assert_eq!(r.resolve_vars("var(--unknown)"), "0");
        assert_eq!(r.resolve_vars("var(--a, var(--b, 3))"), "3");
    }

    #[test]
    fn test_cyclic_vars_terminate() {
        let mut scope = HashMap::new();
        scope.insert("--a".to_string(), "var(--b)".to_string());
        scope.insert("--b".to_string(), "var(--a)".to_string());
        let r = Resolver::new(&scope);
        let resolved = r.resolve_vars("var(--a)");
        assert!(resolved.contains("var("));
        assert!(r.evaluate("var(--a)", ValueKind::Lightness).is_nan());
    }

    #[test]
    fn test_parse_number_with_unit() {
        assert_eq!(parse_number_with_unit(" -12.5deg "), Some((-12.5, "deg".to_string())));
        assert_eq!(parse_number_with_unit(".5"), Some((0.5, String::new())));
        assert_eq!(parse_number_with_unit("5."), Some((5.0, ".".to_string())));
        assert_eq!(parse_number_with_unit("deg"), None);
    }
}
