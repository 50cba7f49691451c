//! `oklch()` fallback: stylesheet rewriting plus inline application of the
//! resolved colors on elements.
//!
//! Rewriting the stylesheets is enough when every sheet is reachable. The
//! element stages cover what is not: declarations whose channels come from
//! `var()`/`calc()` and sheets the page cannot read.

use crate::dom::dom_tree::{attribute, is_tag, NodeRef};
use crate::engine::access::{edit_in_place, inject, is_http, process_style_tag};
use crate::engine::capabilities::PlatformCapabilities;
use crate::engine::loader::Fetcher;
use crate::engine::page::{Page, StyleSheetHandle};
use crate::engine::retrofit::PassStats;
use crate::style::cascade::{
    collect_entries, inline_target, resolve_winner, DeclarationEntry, COLOR_PROPERTIES,
};
use crate::style::computed::{ElementScope, StyleResolver};
use crate::parser::dom_indices::DomIndices;
use crate::style::css_matcher::{expand_selector_functions, SelectorMatcher};
use crate::style::owned_css::OwnedStylesheet;
use crate::transform::color::{compute_oklch, contains_oklch, replace_oklch_in_text};
use crate::transform::numeric::Resolver;
use crate::transform::Transform;
use log::{debug, trace};
use std::cell::{Cell, Ref};
use std::rc::Rc;

/// Run the whole `oklch()` fallback over `page`.
pub async fn convert_oklch<F: Fetcher>(
    page: &Page<F>,
    capabilities: &PlatformCapabilities,
    stats: &mut PassStats,
) {
    let sheets = page.style_sheets().await;
    let entries = index_accessible(&sheets);
    stats.rules_indexed += entries.len();

    for sheet in &sheets {
        rewrite_sheet(page, sheet, stats).await;
    }

    for node in page.document.elements() {
        let injected = attribute(&node, "id")
            .map(|id| id.starts_with("retrocss-"))
            .unwrap_or(false);
        if is_tag(&node, "style") && !injected {
            let replaced = Cell::new(0);
            process_style_tag(page, &node, "oklch", stats, |text| {
                contains_oklch(text).then(|| {
                    let (out, count) = replace_oklch_in_text(text);
                    replaced.set(count);
                    out
                })
            });
            stats.text_replacements += replaced.get();
        }
    }
    rewrite_inline_attributes(page, stats);

    // Sheets were rewritten above; the engine view is re-read for var().
    let sheets = page.style_sheets().await;
    let rules: Vec<Ref<'_, OwnedStylesheet>> = sheets.iter().map(StyleSheetHandle::engine_rules).collect();
    let resolver = StyleResolver::new(rules.iter().map(|rules| &**rules));
    let matcher = SelectorMatcher::new(capabilities.selector_support());

    let mut applied = apply_resolved(page, &entries, &resolver, &matcher);
    if applied == 0 && !entries.is_empty() {
        applied = apply_by_query(page, &entries, &resolver, &matcher);
    }
    if applied == 0 {
        applied = apply_computed(page, &resolver);
    }
    stats.rules_applied += applied;
}

/// Index the color declarations of every sheet the page can read.
fn index_accessible(sheets: &[StyleSheetHandle]) -> Vec<DeclarationEntry> {
    let readable: Vec<(usize, Ref<'_, OwnedStylesheet>)> = sheets
        .iter()
        .enumerate()
        .filter_map(|(order, sheet)| match sheet.css_rules() {
            Ok(rules) => Some((order, rules)),
            Err(err) => {
                debug!("oklch: sheet contributes no rules: {}", err);
                None
            }
        })
        .collect();
    collect_entries(readable.iter().map(|(order, rules)| (*order, &**rules)))
}

async fn rewrite_sheet<F: Fetcher>(page: &Page<F>, sheet: &StyleSheetHandle, stats: &mut PassStats) {
    let replaced = Cell::new(0);
    let rewrite = |value: &str| {
        contains_oklch(value).then(|| {
            let (out, count) = replace_oklch_in_text(value);
            replaced.set(replaced.get() + count);
            out
        })
    };
    match edit_in_place(sheet, &rewrite) {
        Ok(changed) => {
            if changed {
                stats.sheets_changed += 1;
                stats.text_replacements += replaced.get();
                trace!("oklch: edited {} in place", sheet.label());
            }
            if changed || sheet.was_edited() {
                return;
            }
        }
        Err(err) => debug!("oklch: in-place edit failed: {}", err),
    }

    match sheet.css_text() {
        Ok(text) => {
            let (out, count) = replace_oklch_in_text(&text);
            if count > 0 {
                stats.text_replacements += count;
                let key = sheet.href.as_ref().map(|href| href.to_string()).unwrap_or(text);
                inject(page, Transform::Oklch, &key, &out, stats);
            }
            return;
        }
        Err(err) => debug!("oklch: cannot reconstruct text: {}", err),
    }

    let Some(href) = sheet.href.as_ref().filter(|href| is_http(href)) else {
        return;
    };
    match page.fetch_cors(href).await {
        Ok(text) => {
            stats.sheets_fetched += 1;
            let (out, count) = replace_oklch_in_text(&text);
            if count > 0 {
                stats.text_replacements += count;
                inject(page, Transform::Oklch, href.as_str(), &out, stats);
            }
        }
        Err(err) => {
            stats.errors += 1;
            debug!("oklch: access strategies exhausted for {}: {}", href, err);
        }
    }
}

fn rewrite_inline_attributes<F: Fetcher>(page: &Page<F>, stats: &mut PassStats) {
    for node in page.document.elements() {
        let Some(style) = attribute(&node, "style") else {
            continue;
        };
        if !contains_oklch(&style) {
            continue;
        }
        let (out, count) = replace_oklch_in_text(&style);
        if out != style {
            page.document.set_attribute(&node, "style", &out);
            stats.inline_style_attrs_processed += 1;
            stats.text_replacements += count;
        }
    }
}

fn indexed_properties(entries: &[DeclarationEntry]) -> Vec<&'static str> {
    let mut properties = Vec::new();
    for entry in entries {
        if !properties.contains(&entry.property) {
            properties.push(entry.property);
        }
    }
    properties
}

fn evaluate_entry(entry: &DeclarationEntry, element: &NodeRef, resolver: &StyleResolver) -> Option<String> {
    let scope = ElementScope::new(resolver, element);
    let values = Resolver::with_local_vars(&scope, &entry.local_vars);
    compute_oklch(&entry.value, &values)
}

/// Write `value` inline unless an existing `!important` inline declaration
/// outranks it.
fn write_inline<F: Fetcher>(page: &Page<F>, element: &NodeRef, property: &str, value: &str, important: bool) {
    if let Some(existing) = page.document.style_property(element, property) {
        if existing.important && !important {
            trace!("keeping inline !important {}", property);
            return;
        }
    }
    page.document.set_style_property(element, property, value, important);
}

/// Stage one: the cascade winner of every indexed property, per element.
fn apply_resolved<F: Fetcher>(
    page: &Page<F>,
    entries: &[DeclarationEntry],
    resolver: &StyleResolver,
    matcher: &SelectorMatcher,
) -> usize {
    let properties = indexed_properties(entries);
    let mut applied = 0;
    for element in page.document.elements() {
        for property in &properties {
            let Some(winner) = resolve_winner(&element, property, entries, matcher) else {
                continue;
            };
            match evaluate_entry(winner, &element, resolver) {
                Some(rgb) => {
                    write_inline(page, &element, inline_target(property), &rgb, winner.important);
                    applied += 1;
                }
                None => trace!("cannot evaluate `{}` for {}", winner.value, winner.selector),
            }
        }
    }
    debug!("oklch: applied {} resolved declarations", applied);
    applied
}

/// Stage two: entries in source order, each selector expanded into forms
/// the engine can query.
fn apply_by_query<F: Fetcher>(
    page: &Page<F>,
    entries: &[DeclarationEntry],
    resolver: &StyleResolver,
    matcher: &SelectorMatcher,
) -> usize {
    let mut ordered: Vec<&DeclarationEntry> = entries.iter().collect();
    ordered.sort_by_key(|entry| (entry.sheet_order, entry.rule_order));
    let indices = DomIndices::build(&page.document);
    let mut applied = 0;
    for entry in ordered {
        for selector in expand_selector_functions(&entry.selector) {
            for element in indices.candidates(&selector) {
                match matcher.matches(element, &selector) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(err) => {
                        debug!("oklch: skipping expanded selector: {}", err);
                        break;
                    }
                }
                if let Some(rgb) = evaluate_entry(entry, element, resolver) {
                    write_inline(page, element, inline_target(entry.property), &rgb, entry.important);
                    applied += 1;
                }
            }
        }
    }
    debug!("oklch: applied {} queried declarations", applied);
    applied
}

/// Stage three: computed values that still carry `oklch(`.
fn apply_computed<F: Fetcher>(page: &Page<F>, resolver: &StyleResolver) -> usize {
    let mut applied = 0;
    for element in page.document.elements() {
        for property in COLOR_PROPERTIES {
            let Some(value) = resolver.computed_value(&element, property) else {
                continue;
            };
            if !contains_oklch(&value) {
                continue;
            }
            let scope = ElementScope::new(resolver, &element);
            if let Some(rgb) = compute_oklch(&value, &Resolver::new(&scope)) {
                write_inline(page, &element, inline_target(property), &rgb, false);
                applied += 1;
            }
        }
    }
    if applied > 0 {
        debug!("oklch: applied {} computed values", applied);
    }
    applied
}

/// Whether `element` (or anything below it) carries an inline `oklch()`.
pub fn has_inline_oklch(element: &NodeRef) -> bool {
    std::iter::once(Rc::clone(element))
        .chain(crate::dom::dom_tree::descendant_elements(element))
        .any(|node| attribute(&node, "style").map(|s| contains_oklch(&s)).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::loader::StaticFetcher;
    use crate::parser::html::create_dom_tree;
    use crate::transform::color::{oklch_to_srgb, to_rgb_string};
    use url::Url;

    fn page(html: &str, fetcher: StaticFetcher) -> Page<StaticFetcher> {
        let url = Url::parse("https://site.test/index.html").unwrap();
        Page::new(create_dom_tree(html), url, fetcher)
    }

    fn expected(l: f64, c: f64, h: f64) -> String {
        let [r, g, b] = oklch_to_srgb(l, c, h);
        to_rgb_string(r, g, b, None)
    }

    fn inline(page: &Page<StaticFetcher>, id: &str, property: &str) -> Option<String> {
        let element = page.document.get_element_by_id(id)?;
        page.document.style_property(&element, property).map(|decl| decl.value)
    }

    #[tokio::test]
    async fn test_resolved_var_channels_applied_inline() {
        let page = page(
            r#"<head><style>:root { --l: 0.7 } .box { --h: 200; background: oklch(var(--l) 0.15 var(--h)) }</style></head>
               <body><div id="b" class="box"></div></body>"#,
            StaticFetcher::new(),
        );
        let mut stats = PassStats::default();
        convert_oklch(&page, &PlatformCapabilities::none(), &mut stats).await;
        assert_eq!(inline(&page, "b", "background-color"), Some(expected(0.7, 0.15, 200.0)));
        assert_eq!(stats.rules_indexed, 1);
        assert_eq!(stats.rules_applied, 1);
    }

    #[tokio::test]
    async fn test_inline_important_is_preserved() {
        let page = page(
            r#"<head><style>p { color: oklch(0.5 0.1 120) }</style></head>
               <body><p id="p" style="color: red !important">x</p></body>"#,
            StaticFetcher::new(),
        );
        let mut stats = PassStats::default();
        convert_oklch(&page, &PlatformCapabilities::none(), &mut stats).await;
        assert_eq!(inline(&page, "p", "color").as_deref(), Some("red"));
    }

    #[tokio::test]
    async fn test_query_stage_expands_is_selectors() {
        let page = page(
            r#"<head><style>:is(.a, .b) { color: oklch(0.6 0.2 30) }</style></head>
               <body><span id="a" class="a"></span><span id="b" class="b"></span></body>"#,
            StaticFetcher::new(),
        );
        let mut stats = PassStats::default();
        convert_oklch(&page, &PlatformCapabilities::none(), &mut stats).await;
        let rgb = expected(0.6, 0.2, 30.0);
        assert_eq!(inline(&page, "a", "color"), Some(rgb.clone()));
        assert_eq!(inline(&page, "b", "color"), Some(rgb));
    }

    #[tokio::test]
    async fn test_inline_attributes_and_style_tags_rewritten() {
        let page = page(
            r#"<head><style id="s">.x { color: oklch(1 0 0) }</style><style>.y { color: oklch(0 0 0) }</style></head>
               <body><i id="i" style="border-color: oklch(1 0 0)"></i></body>"#,
            StaticFetcher::new(),
        );
        let mut stats = PassStats::default();
        convert_oklch(&page, &PlatformCapabilities::none(), &mut stats).await;
        assert_eq!(inline(&page, "i", "border-color").as_deref(), Some("rgb(255, 255, 255)"));
        assert_eq!(stats.inline_style_attrs_processed, 1);
        assert_eq!(stats.style_tags_processed, 2);
        assert!(!has_inline_oklch(&page.document.root));
    }

    #[tokio::test]
    async fn test_cross_origin_sheet_with_cors_is_fetched() {
        let fetcher = StaticFetcher::new().with_cors("https://cdn.test/c.css", ".c { color: oklch(1 0 0) }");
        let page = page(
            r#"<head><link rel="stylesheet" href="https://cdn.test/c.css"></head><body><b id="c" class="c"></b></body>"#,
            fetcher,
        );
        let mut stats = PassStats::default();
        convert_oklch(&page, &PlatformCapabilities::none(), &mut stats).await;
        assert_eq!(stats.sheets_fetched, 1);
        assert_eq!(stats.sheets_injected, 1);
        let id = crate::engine::access::inject_id(Transform::Oklch, "https://cdn.test/c.css");
        assert!(page.document.get_element_by_id(&id).is_some());
        // The injected copy wins the cascade, nothing is left to apply inline.
        assert_eq!(inline(&page, "c", "color"), None);
    }

    #[tokio::test]
    async fn test_unreadable_sheet_falls_back_to_computed_values() {
        let fetcher = StaticFetcher::new().with("https://cdn.test/c.css", ".c { color: oklch(0 0 0) }");
        let page = page(
            r#"<head><link rel="stylesheet" href="https://cdn.test/c.css"></head><body><b id="c" class="c"></b></body>"#,
            fetcher,
        );
        let mut stats = PassStats::default();
        convert_oklch(&page, &PlatformCapabilities::none(), &mut stats).await;
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.rules_indexed, 0);
        assert_eq!(inline(&page, "c", "color").as_deref(), Some("rgb(0, 0, 0)"));
    }
}
