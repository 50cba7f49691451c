//! Index of `oklch()` declarations and per-element cascade resolution.

use crate::dom::dom_tree::NodeRef;
use crate::style::css_matcher::SelectorMatcher;
use crate::style::owned_css::{OwnedRule, OwnedStylesheet};
use crate::style::specificity::{compute_specificity, Specificity};
use crate::transform::color::contains_oklch;
use log::{debug, trace};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

/// Properties whose values are indexed when they contain `oklch(`.
pub const COLOR_PROPERTIES: [&str; 21] = [
    "color",
    "background-color",
    "background",
    "outline-color",
    "outline",
    "text-decoration-color",
    "text-decoration",
    "border-color",
    "border-top-color",
    "border-right-color",
    "border-bottom-color",
    "border-left-color",
    "border",
    "border-top",
    "border-right",
    "border-bottom",
    "border-left",
    "column-rule-color",
    "caret-color",
    "fill",
    "stroke",
];

/// One indexed declaration.
#[derive(Debug, Clone)]
pub struct DeclarationEntry {
    pub selector: String,
    pub property: &'static str,
    pub value: String,
    pub important: bool,
    pub sheet_order: usize,
    pub rule_order: usize,
    pub specificity: Specificity,
    /// Custom properties declared by the same rule.
    pub local_vars: Rc<HashMap<String, String>>,
}

/// Walk the rule trees of `sheets` (paired with their position in the
/// stylesheet list) and index every color declaration containing `oklch(`.
pub fn collect_entries<'a, I>(sheets: I) -> Vec<DeclarationEntry>
where
    I: IntoIterator<Item = (usize, &'a OwnedStylesheet)>,
{
    let mut entries = Vec::new();
    for (sheet_order, sheet) in sheets {
        let mut rule_order = 0;
        walk_rules(&sheet.rules, sheet_order, &mut rule_order, &mut entries);
    }
    debug!("indexed {} oklch declarations", entries.len());
    for entry in entries.iter().take(3) {
        trace!(
            "indexed selector={} property={} value={}",
            entry.selector,
            entry.property,
            entry.value
        );
    }
    entries
}

fn walk_rules(
    rules: &[OwnedRule],
    sheet_order: usize,
    rule_order: &mut usize,
    entries: &mut Vec<DeclarationEntry>,
) {
    for rule in rules {
        match rule {
            OwnedRule::Group(group) => walk_rules(&group.rules, sheet_order, rule_order, entries),
            OwnedRule::Style(style) => {
                let selector = style.selector_text();
                if selector.is_empty() {
                    continue;
                }
                let local_vars = Rc::new(style.declarations.custom_properties());
                for property in COLOR_PROPERTIES {
                    let Some(declaration) = style.declarations.get(property) else {
                        continue;
                    };
                    if !contains_oklch(&declaration.value) {
                        continue;
                    }
                    entries.push(DeclarationEntry {
                        selector: selector.clone(),
                        property,
                        value: declaration.value.clone(),
                        important: declaration.important,
                        sheet_order,
                        rule_order: *rule_order,
                        specificity: compute_specificity(&selector),
                        local_vars: Rc::clone(&local_vars),
                    });
                    *rule_order += 1;
                }
            }
            OwnedRule::Keyframes(_) | OwnedRule::Other(_) => {}
        }
    }
}

/// Cascade order of two entries: `Greater` means `a` wins over `b`.
pub fn compare_priority(a: &DeclarationEntry, b: &DeclarationEntry) -> Ordering {
    a.important
        .cmp(&b.important)
        .then(a.specificity.cmp(&b.specificity))
        .then((a.sheet_order, a.rule_order).cmp(&(b.sheet_order, b.rule_order)))
}

/// The entry for `property` that wins on `element`, if any matches.
/// Selectors the matcher rejects are skipped for this element.
pub fn resolve_winner<'e>(
    element: &NodeRef,
    property: &str,
    entries: &'e [DeclarationEntry],
    matcher: &SelectorMatcher,
) -> Option<&'e DeclarationEntry> {
    let mut winner: Option<&DeclarationEntry> = None;
    for entry in entries.iter().filter(|entry| entry.property == property) {
        match matcher.matches(element, &entry.selector) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(err) => {
                debug!("skipping selector: {}", err);
                continue;
            }
        }
        winner = match winner {
            Some(current) if compare_priority(entry, current) != Ordering::Greater => Some(current),
            _ => Some(entry),
        };
    }
    winner
}

/// The inline property written for an indexed property. Shorthands map to
/// their color longhand.
pub fn inline_target(property: &str) -> &str {
    match property {
        "background" => "background-color",
        "border" => "border-color",
        "border-top" => "border-top-color",
        "border-right" => "border-right-color",
        "border-bottom" => "border-bottom-color",
        "border-left" => "border-left-color",
        "outline" => "outline-color",
        "text-decoration" => "text-decoration-color",
        other => other,
    }
}
