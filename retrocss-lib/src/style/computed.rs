//! Computed values of properties for an element (`getComputedStyle`).
//!
//! The computed value is the cascade winner across every loaded rule plus
//! the element's inline style. Custom properties and the inherited color
//! properties fall back to the parent element. Media and supports
//! conditions are not evaluated; every grouped rule applies.

use crate::dom::dom_tree::{attribute, parse_inline_style, parent_element, NodeRef};
use crate::style::css_matcher::{SelectorMatcher, SelectorSupport};
use crate::style::owned_css::{OwnedRule, OwnedStylesheet, StyleRule};
use crate::style::specificity::{compute_specificity, Specificity};
use crate::transform::numeric::VarScope;
use crate::transform::split_top_level;
use log::trace;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

const INHERITED: [&str; 4] = ["color", "caret-color", "fill", "stroke"];

struct IndexedRule {
    /// Each comma branch of the selector with its specificity.
    branches: Vec<(String, Specificity)>,
    rule: StyleRule,
    order: (usize, usize),
}

/// Cascade priority of one candidate declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Priority {
    important: bool,
    inline: bool,
    specificity: Specificity,
    order: (usize, usize),
}

pub struct StyleResolver {
    rules: Vec<IndexedRule>,
    matcher: SelectorMatcher,
    cache: RefCell<HashMap<(usize, String), Option<String>>>,
}

impl StyleResolver {
    /// Build a resolver over `sheets` in stylesheet-list order. The engine
    /// always understands its own selectors, so matching uses full support.
    pub fn new<'a, I>(sheets: I) -> Self
    where
        I: IntoIterator<Item = &'a OwnedStylesheet>,
    {
        let mut rules = Vec::new();
        for (sheet_order, sheet) in sheets.into_iter().enumerate() {
            let mut rule_order = 0;
            index_rules(&sheet.rules, sheet_order, &mut rule_order, &mut rules);
        }
        StyleResolver {
            rules,
            matcher: SelectorMatcher::new(SelectorSupport::ALL),
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Computed value of `property` on `element`, or `None` when nothing
    /// declares it.
    pub fn computed_value(&self, element: &NodeRef, property: &str) -> Option<String> {
        let key = (Rc::as_ptr(element) as usize, property.to_string());
        if let Some(hit) = self.cache.borrow().get(&key) {
            return hit.clone();
        }
        let value = self.cascade(element, property).or_else(|| {
            if property.starts_with("--") || INHERITED.contains(&property) {
                parent_element(element).and_then(|parent| self.computed_value(&parent, property))
            } else {
                None
            }
        });
        self.cache.borrow_mut().insert(key, value.clone());
        value
    }

    fn cascade(&self, element: &NodeRef, property: &str) -> Option<String> {
        let mut best: Option<(Priority, String)> = None;
        let mut consider = |priority: Priority, value: &str| {
            if best.as_ref().map(|(p, _)| priority > *p).unwrap_or(true) {
                best = Some((priority, value.to_string()));
            }
        };

        for indexed in &self.rules {
            let Some(declaration) = indexed.rule.declarations.get(property) else {
                continue;
            };
            let specificity = indexed
                .branches
                .iter()
                .filter(|(branch, _)| self.matcher.matches(element, branch).unwrap_or(false))
                .map(|(_, specificity)| *specificity)
                .max();
            if let Some(specificity) = specificity {
                consider(
                    Priority {
                        important: declaration.important,
                        inline: false,
                        specificity,
                        order: indexed.order,
                    },
                    &declaration.value,
                );
            }
        }

        if let Some(style) = attribute(element, "style") {
            if let Some(inline) = parse_inline_style(&style)
                .into_iter()
                .rev()
                .find(|decl| decl.property.eq_ignore_ascii_case(property))
            {
                consider(
                    Priority {
                        important: inline.important,
                        inline: true,
                        specificity: Specificity::default(),
                        order: (usize::MAX, 0),
                    },
                    &inline.value,
                );
            }
        }
        let value = best.map(|(_, value)| value);
        if let Some(value) = &value {
            trace!("computed {} = {}", property, value);
        }
        value
    }
}

fn index_rules(
    rules: &[OwnedRule],
    sheet_order: usize,
    rule_order: &mut usize,
    out: &mut Vec<IndexedRule>,
) {
    for rule in rules {
        match rule {
            OwnedRule::Group(group) => index_rules(&group.rules, sheet_order, rule_order, out),
            OwnedRule::Style(style) => {
                let branches = style
                    .selectors
                    .iter()
                    .flat_map(|selector| split_top_level(selector, ','))
                    .map(|branch| {
                        let branch = branch.trim().to_string();
                        let specificity = compute_specificity(&branch);
                        (branch, specificity)
                    })
                    .collect();
                out.push(IndexedRule {
                    branches,
                    rule: style.clone(),
                    order: (sheet_order, *rule_order),
                });
                *rule_order += 1;
            }
            OwnedRule::Keyframes(_) | OwnedRule::Other(_) => {}
        }
    }
}

/// Custom properties of one element as a `var()` scope.
pub struct ElementScope<'r> {
    resolver: &'r StyleResolver,
    element: NodeRef,
}

impl<'r> ElementScope<'r> {
    pub fn new(resolver: &'r StyleResolver, element: &NodeRef) -> Self {
        ElementScope {
            resolver,
            element: Rc::clone(element),
        }
    }
}

impl VarScope for ElementScope<'_> {
    fn custom_property(&self, name: &str) -> Option<String> {
        self.resolver
            .computed_value(&self.element, name)
            .map(|value| value.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::html::create_dom_tree;
    use crate::style::cssom::parse_stylesheet;

    #[test]
    fn test_cascade_and_inline_priority() {
        let sheet = parse_stylesheet(
            "p { color: red } .a { color: blue } #x { margin-top: 1px !important } p { margin-top: 2px }",
        );
        let doc = create_dom_tree(r#"<p id="x" class="a" style="margin-top: 3px; color: green">t</p>"#);
        let resolver = StyleResolver::new([&sheet]);
        let p = doc.get_element_by_id("x").unwrap();
        assert_eq!(resolver.computed_value(&p, "color").as_deref(), Some("green"));
        assert_eq!(resolver.computed_value(&p, "margin-top").as_deref(), Some("1px"));
        assert_eq!(resolver.computed_value(&p, "padding-top"), None);
    }

    #[test]
    fn test_custom_properties_inherit() {
        let sheet = parse_stylesheet(":root { --brand: 0.7 0.15 200 } .inner { --accent: 10 }");
        let doc = create_dom_tree(r#"<div><span id="s" class="inner">t</span></div>"#);
        let resolver = StyleResolver::new([&sheet]);
        let span = doc.get_element_by_id("s").unwrap();
        let scope = ElementScope::new(&resolver, &span);
        assert_eq!(scope.custom_property("--accent").as_deref(), Some("10"));
        assert!(scope.custom_property("--brand").is_some());
        assert_eq!(scope.custom_property("--missing"), None);
    }
}
