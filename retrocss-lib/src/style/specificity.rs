//! Selector specificity computed from selector text.
//!
//! This is an approximation of the CSS algorithm: the arguments of `:not()`,
//! `:is()` and `:has()` are counted as if they were written in place (every
//! branch, not the most specific one), and `:where()` contributes nothing.

use crate::transform::matching_paren;
use std::fmt;

/// (IDs, classes/attributes/pseudo-classes, types/pseudo-elements).
/// Compares lexicographically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Specificity(pub u32, pub u32, pub u32);

impl fmt::Display for Specificity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.0, self.1, self.2)
    }
}

impl std::ops::AddAssign for Specificity {
    fn add_assign(&mut self, other: Specificity) {
        self.0 += other.0;
        self.1 += other.1;
        self.2 += other.2;
    }
}

const UNWRAPPED: [&str; 4] = ["not", "is", "matches", "has"];
const LEGACY_PSEUDO_ELEMENTS: [&str; 4] = ["before", "after", "first-line", "first-letter"];

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '\\' || !c.is_ascii()
}

/// Byte index just past the name starting at `start`, honoring escapes.
fn name_end(text: &str, start: usize) -> usize {
    let mut chars = text[start..].char_indices().peekable();
    let mut end = start;
    while let Some((offset, c)) = chars.next() {
        if c == '\\' {
            end = start + offset + 1;
            if let Some((next_offset, next)) = chars.next() {
                end = start + next_offset + next.len_utf8();
            }
        } else if is_name_char(c) {
            end = start + offset + c.len_utf8();
        } else {
            break;
        }
    }
    end
}

pub fn compute_specificity(selector: &str) -> Specificity {
    let mut spec = Specificity::default();
    let mut i = 0;
    while let Some(c) = selector[i..].chars().next() {
        match c {
            '#' => {
                let end = name_end(selector, i + 1);
                if end > i + 1 {
                    spec.0 += 1;
                }
                i = end.max(i + 1);
            }
            '.' => {
                let end = name_end(selector, i + 1);
                if end > i + 1 {
                    spec.1 += 1;
                }
                i = end.max(i + 1);
            }
            '[' => {
                spec.1 += 1;
                i = selector[i..]
                    .find(']')
                    .map(|close| i + close + 1)
                    .unwrap_or(selector.len());
            }
            ':' if selector[i + 1..].starts_with(':') => {
                spec.2 += 1;
                let end = name_end(selector, i + 2);
                i = skip_arguments(selector, end);
            }
            ':' => {
                let end = name_end(selector, i + 1);
                let name = selector[i + 1..end].to_ascii_lowercase();
                let has_args = selector[end..].starts_with('(');
                if has_args && UNWRAPPED.contains(&name.as_str()) {
                    // Count the arguments in place of the pseudo-class.
                    match matching_paren(selector, end) {
                        Some(close) => {
                            spec += compute_specificity(&selector[end + 1..close]);
                            i = close + 1;
                        }
                        None => i = selector.len(),
                    }
                    continue;
                }
                if name == "where" {
                    i = skip_arguments(selector, end);
                    continue;
                }
                if LEGACY_PSEUDO_ELEMENTS.contains(&name.as_str()) {
                    spec.2 += 1;
                } else if !name.is_empty() {
                    spec.1 += 1;
                }
                i = skip_arguments(selector, end);
            }
            c if c.is_ascii_alphabetic() || c == '_' || !c.is_ascii() => {
                spec.2 += 1;
                i = name_end(selector, i);
            }
            c => i += c.len_utf8(),
        }
    }
    spec
}

fn skip_arguments(text: &str, at: usize) -> usize {
    if text[at..].starts_with('(') {
        matching_paren(text, at)
            .map(|close| close + 1)
            .unwrap_or(text.len())
    } else {
        at
    }
}
