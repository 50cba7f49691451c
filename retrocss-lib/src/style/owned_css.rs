//! A fully-owned CSS object model.
//!
//! Parsed rule trees are copied out of lightningcss into these plain types
//! so they can outlive the source text, be edited in place and be printed
//! back as CSS text.

use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OwnedStylesheet {
    pub rules: Vec<OwnedRule>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OwnedRule {
    Style(StyleRule),
    /// `@media`, `@supports`, `@layer` blocks: a prelude and child rules.
    Group(GroupRule),
    Keyframes(KeyframesRule),
    /// Any other rule, kept verbatim.
    Other(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StyleRule {
    /// One entry per comma branch, e.g. `["div", ".red", "#header"]`.
    pub selectors: Vec<String>,
    pub declarations: DeclarationBlock,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupRule {
    /// Full prelude including the at-keyword, e.g. `@media (min-width: 1px)`.
    pub prelude: String,
    pub rules: Vec<OwnedRule>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyframesRule {
    pub name: String,
    pub frames: Vec<Keyframe>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Keyframe {
    pub selector: String,
    pub declarations: DeclarationBlock,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeclarationBlock {
    pub declarations: Vec<OwnedDeclaration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedDeclaration {
    pub property: String,
    pub value: String,
    pub important: bool,
}

impl StyleRule {
    /// Selector list text, as `selectorText` reads it.
    pub fn selector_text(&self) -> String {
        self.selectors.join(", ")
    }
}

impl DeclarationBlock {
    pub fn new(declarations: Vec<OwnedDeclaration>) -> Self {
        DeclarationBlock { declarations }
    }

    /// The effective declaration of `property`: important beats normal,
    /// later beats earlier.
    pub fn get(&self, property: &str) -> Option<&OwnedDeclaration> {
        // max_by_key keeps the last of equal keys, i.e. the later declaration.
        self.declarations
            .iter()
            .filter(|d| d.property.eq_ignore_ascii_case(property))
            .max_by_key(|d| d.important)
    }

    pub fn property_value(&self, property: &str) -> Option<&str> {
        self.get(property).map(|d| d.value.as_str())
    }

    pub fn is_important(&self, property: &str) -> bool {
        self.get(property).map(|d| d.important).unwrap_or(false)
    }

    /// Set `property`, replacing any existing declaration of it. Returns
    /// whether anything changed.
    pub fn set_property(&mut self, property: &str, value: &str, important: bool) -> bool {
        let replacement = OwnedDeclaration {
            property: property.to_string(),
            value: value.to_string(),
            important,
        };
        let existing: Vec<usize> = self
            .declarations
            .iter()
            .enumerate()
            .filter(|(_, d)| d.property.eq_ignore_ascii_case(property))
            .map(|(i, _)| i)
            .collect();
        match existing.as_slice() {
            [] => {
                self.declarations.push(replacement);
                true
            }
            [only] if self.declarations[*only] == replacement => false,
            [first, ..] => {
                let first = *first;
                self.declarations
                    .retain(|d| !d.property.eq_ignore_ascii_case(property));
                self.declarations.insert(first.min(self.declarations.len()), replacement);
                true
            }
        }
    }

    /// Custom properties declared in this block.
    pub fn custom_properties(&self) -> HashMap<String, String> {
        self.declarations
            .iter()
            .filter(|d| d.property.starts_with("--"))
            .map(|d| (d.property.clone(), d.value.clone()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }
}

impl OwnedStylesheet {
    /// Stylesheet text rebuilt from the rules, like joining each rule's
    /// `cssText`.
    pub fn css_text(&self) -> String {
        self.rules
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Call `f` on every declaration block: style rules at any depth and
    /// keyframes.
    pub fn for_each_block_mut(&mut self, f: &mut dyn FnMut(&mut DeclarationBlock)) {
        visit_blocks_mut(&mut self.rules, f);
    }

    /// Every style rule with its grouping depth flattened away, in source
    /// order.
    pub fn style_rules(&self) -> Vec<&StyleRule> {
        let mut out = Vec::new();
        collect_style_rules(&self.rules, &mut out);
        out
    }
}

fn visit_blocks_mut(rules: &mut [OwnedRule], f: &mut dyn FnMut(&mut DeclarationBlock)) {
    for rule in rules {
        match rule {
            OwnedRule::Style(style) => f(&mut style.declarations),
            OwnedRule::Group(group) => visit_blocks_mut(&mut group.rules, f),
            OwnedRule::Keyframes(keyframes) => {
                for frame in &mut keyframes.frames {
                    f(&mut frame.declarations);
                }
            }
            OwnedRule::Other(_) => {}
        }
    }
}

fn collect_style_rules<'a>(rules: &'a [OwnedRule], out: &mut Vec<&'a StyleRule>) {
    for rule in rules {
        match rule {
            OwnedRule::Style(style) => out.push(style),
            OwnedRule::Group(group) => collect_style_rules(&group.rules, out),
            OwnedRule::Keyframes(_) | OwnedRule::Other(_) => {}
        }
    }
}

impl fmt::Display for OwnedDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.property, self.value)?;
        if self.important {
            f.write_str(" !important")?;
        }
        f.write_str(";")
    }
}

impl fmt::Display for DeclarationBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{ ")?;
        for decl in &self.declarations {
            write!(f, "{} ", decl)?;
        }
        f.write_str("}")
    }
}

impl fmt::Display for OwnedRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnedRule::Style(style) => write!(f, "{} {}", style.selector_text(), style.declarations),
            OwnedRule::Group(group) => {
                writeln!(f, "{} {{", group.prelude)?;
                for rule in &group.rules {
                    writeln!(f, "  {}", rule)?;
                }
                f.write_str("}")
            }
            OwnedRule::Keyframes(keyframes) => {
                writeln!(f, "@keyframes {} {{", keyframes.name)?;
                for frame in &keyframes.frames {
                    writeln!(f, "  {} {}", frame.selector, frame.declarations)?;
                }
                f.write_str("}")
            }
            OwnedRule::Other(text) => f.write_str(text),
        }
    }
}
