//! Per-stylesheet access strategies for the text transforms.
//!
//! Each transform walks `document.styleSheets` and, per sheet, tries the
//! cheapest way to get its rewrite applied: editing the CSSOM in place,
//! reconstructing text from `cssRules`, re-fetching the resource, and for
//! cross-origin links reloading them with `crossorigin="anonymous"`. Every
//! step may fail; failures fall through to the next step and never abort
//! the pass.

use crate::dom::dom_tree::{attribute, has_marker, is_tag, marker, set_marker, text_content, NodeRef};
use crate::engine::loader::Fetcher;
use crate::engine::page::{Page, StyleSheetHandle};
use crate::engine::retrofit::PassStats;
use crate::style::owned_css::DeclarationBlock;
use crate::transform::media_range::{self, has_range_media};
use crate::transform::viewport_units::{contains_modern_units, replace_units_outside_var};
use crate::transform::{hash_string, layers, to_base36, Transform};
use log::debug;
use std::rc::Rc;
use std::time::Duration;
use url::Url;

/// Marker attribute on `<link>` elements already reloaded for viewport units.
pub const VIEWPORT_RELOAD_MARKER: &str = "data-retrocss-viewport-reloaded";

/// Deterministic id of an injected `<style>` for `source` (a URL or the
/// original text).
pub fn inject_id(transform: Transform, source: &str) -> String {
    format!("retrocss-{}-{}", transform.name(), to_base36(hash_string(source)))
}

pub(crate) fn inject(page: &Page<impl Fetcher>, transform: Transform, source: &str, css: &str, stats: &mut PassStats) {
    if page.inject_style(css, Some(&inject_id(transform, source))) {
        stats.sheets_injected += 1;
    }
}

/// Rewrite every declaration value of `block` with `rewrite` and write the
/// result back through the property setter, keeping priorities. Returns
/// whether anything changed.
pub fn rewrite_block(block: &mut DeclarationBlock, rewrite: &dyn Fn(&str) -> Option<String>) -> bool {
    let updates: Vec<(String, String, bool)> = block
        .declarations
        .iter()
        .filter_map(|declaration| {
            rewrite(&declaration.value)
                .filter(|value| *value != declaration.value)
                .map(|value| (declaration.property.clone(), value, declaration.important))
        })
        .collect();
    let mut changed = false;
    for (property, value, important) in updates {
        changed |= block.set_property(&property, &value, important);
    }
    changed
}

/// In-place CSSOM edit of every declaration block of `sheet`.
pub fn edit_in_place(
    sheet: &StyleSheetHandle,
    rewrite: &dyn Fn(&str) -> Option<String>,
) -> Result<bool, crate::RetrocssError> {
    let mut rules = sheet.css_rules_mut()?;
    let mut changed = false;
    rules.for_each_block_mut(&mut |block| {
        changed |= rewrite_block(block, rewrite);
    });
    drop(rules);
    if changed {
        sheet.mark_edited();
    }
    Ok(changed)
}

pub(crate) fn is_http(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

async fn reloaded_sheet<F: Fetcher>(page: &Page<F>, link: &NodeRef) -> Option<StyleSheetHandle> {
    page.style_sheets()
        .await
        .into_iter()
        .find(|sheet| Rc::ptr_eq(&sheet.owner, link))
}

/// Inject flattened copies of sheets using `@layer`.
pub async fn flatten_layers<F: Fetcher>(page: &Page<F>, settle: Duration, stats: &mut PassStats) {
    for sheet in page.style_sheets().await {
        let Some(href) = sheet.href.clone() else {
            // One flattened copy per <style>; later rewrites of its text
            // reach the copy through the other transforms.
            if marker(&sheet.owner, "layers").is_some() {
                continue;
            }
            let text = text_content(&sheet.owner);
            if text.contains("@layer") {
                inject(page, Transform::Layers, &text, &layers::flatten(&text), stats);
                set_marker(&sheet.owner, "layers", hash_string(&text));
            }
            continue;
        };

        match page.fetch_cors(&href).await {
            Ok(text) => {
                stats.sheets_fetched += 1;
                if text.contains("@layer") {
                    inject(page, Transform::Layers, href.as_str(), &layers::flatten(&text), stats);
                }
                continue;
            }
            Err(err) => {
                debug!("layers: could not fetch {}: {}", href, err);
                stats.errors += 1;
            }
        }
        if page.is_same_origin(&href) || attribute(&sheet.owner, "crossorigin").is_some() {
            debug!("layers: access strategies exhausted for {}", href);
            continue;
        }

        let Some(link) = page.reload_with_cross_origin(&sheet.owner, None) else {
            continue;
        };
        tokio::time::sleep(settle).await;
        match reloaded_sheet(page, &link).await.map(|sheet| sheet.css_text()) {
            Some(Ok(text)) => {
                if text.contains("@layer") {
                    inject(page, Transform::Layers, href.as_str(), &layers::flatten(&text), stats);
                }
            }
            Some(Err(err)) => debug!("layers: access strategies exhausted: {}", err),
            None => debug!("layers: reloaded stylesheet {} did not load", href),
        }
    }
}

/// Inject transpiled copies of sheets using range media queries and
/// rewrite `<style>` elements in place.
pub async fn transpile_media_ranges<F: Fetcher>(page: &Page<F>, stats: &mut PassStats) {
    for sheet in page.style_sheets().await {
        // <style> elements are rewritten in place below.
        let Some(href) = sheet.href.as_ref() else {
            continue;
        };
        match sheet.css_text() {
            Ok(text) if has_range_media(&text) => {
                let out = media_range::transform(&text);
                if out != text {
                    inject(page, Transform::MediaRange, href.as_str(), &out, stats);
                }
                continue;
            }
            Ok(_) => {}
            Err(err) => debug!("media-range: {}", err),
        }
        if !page.is_same_origin(href) {
            continue;
        }
        match page.fetch_cors(href).await {
            Ok(css) => {
                if has_range_media(&css) {
                    stats.sheets_fetched += 1;
                    let out = media_range::transform(&css);
                    if out != css {
                        inject(page, Transform::MediaRange, href.as_str(), &out, stats);
                    }
                }
            }
            Err(err) => debug!("media-range: could not fetch {}: {}", href, err),
        }
    }

    for node in page.document.elements() {
        if is_tag(&node, "style") {
            process_style_tag(page, &node, "media-range", stats, |text| {
                has_range_media(text).then(|| media_range::transform(text))
            });
        }
    }
}

/// Rewrite a `<style>` element's text once per distinct content.
pub(crate) fn process_style_tag<F: Fetcher>(
    page: &Page<F>,
    node: &NodeRef,
    marker: &'static str,
    stats: &mut PassStats,
    rewrite: impl Fn(&str) -> Option<String>,
) {
    let text = text_content(node);
    if has_marker(node, marker, hash_string(&text)) {
        return;
    }
    let mut final_text = text.clone();
    if let Some(out) = rewrite(&text) {
        if out != text {
            page.document.set_text_content(node, &out);
            stats.style_tags_processed += 1;
            debug!("rewrote <style> element for {}", marker);
            final_text = out;
        }
    }
    set_marker(node, marker, hash_string(&final_text));
}

/// Rewrite dynamic viewport units to their classic equivalents.
pub async fn rewrite_viewport_units<F: Fetcher>(page: &Page<F>, settle: Duration, stats: &mut PassStats) {
    let rewrite = |value: &str| {
        contains_modern_units(value).then(|| replace_units_outside_var(value))
    };
    for sheet in page.style_sheets().await {
        match edit_in_place(&sheet, &rewrite) {
            Ok(true) => {
                stats.sheets_changed += 1;
                debug!("viewport-units: edited {} in place", sheet.label());
                continue;
            }
            Ok(false) => continue,
            Err(err) => debug!("viewport-units: {}", err),
        }
        let Some(href) = sheet.href.clone() else {
            continue;
        };

        if attribute(&sheet.owner, VIEWPORT_RELOAD_MARKER).is_none() {
            if let Some(link) = page.reload_with_cross_origin(&sheet.owner, Some(VIEWPORT_RELOAD_MARKER)) {
                tokio::time::sleep(settle).await;
                if let Some(reloaded) = reloaded_sheet(page, &link).await {
                    match edit_in_place(&reloaded, &rewrite) {
                        Ok(changed) => {
                            if changed {
                                stats.sheets_changed += 1;
                            }
                            continue;
                        }
                        Err(err) => debug!("viewport-units: {}", err),
                    }
                }
            }
        }

        match page.fetch_cors(&href).await {
            Ok(css) if contains_modern_units(&css) => {
                stats.sheets_fetched += 1;
                let out = crate::transform::viewport_units::transform(&css);
                inject(page, Transform::ViewportUnits, href.as_str(), &out, stats);
            }
            Ok(_) => {}
            Err(err) => debug!("viewport-units: access strategies exhausted for {}: {}", href, err),
        }
    }

    for node in page.document.elements() {
        let Some(style) = attribute(&node, "style") else {
            continue;
        };
        if !contains_modern_units(&style) {
            continue;
        }
        let out = replace_units_outside_var(&style);
        if out != style {
            page.document.set_attribute(&node, "style", &out);
            stats.inline_style_attrs_processed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::loader::StaticFetcher;
    use crate::parser::html::create_dom_tree;

    fn page(html: &str, fetcher: StaticFetcher) -> Page<StaticFetcher> {
        let url = Url::parse("https://site.test/index.html").unwrap();
        Page::new(create_dom_tree(html), url, fetcher)
    }

    fn injected(page: &Page<StaticFetcher>, prefix: &str) -> Vec<String> {
        page.document
            .elements()
            .iter()
            .filter(|node| {
                attribute(node, "id")
                    .map(|id| id.starts_with(prefix))
                    .unwrap_or(false)
            })
            .map(text_content)
            .collect()
    }

    #[tokio::test]
    async fn test_inline_layers_are_flattened_once() {
        let page = page(
            "<head><style>@layer base { .x { color: red; } }</style></head>",
            StaticFetcher::new(),
        );
        let mut stats = PassStats::default();
        flatten_layers(&page, Duration::ZERO, &mut stats).await;
        flatten_layers(&page, Duration::ZERO, &mut stats).await;
        let copies = injected(&page, "retrocss-layers-");
        assert_eq!(copies.len(), 1);
        assert!(!copies[0].contains("@layer"));
        assert!(copies[0].contains(".x {"));
        assert_eq!(stats.sheets_injected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cross_origin_layers_reload_then_give_up() {
        let fetcher = StaticFetcher::new().with("https://cdn.test/l.css", "@layer a { .y { top: 0 } }");
        let page = page(
            r#"<head><link rel="stylesheet" href="https://cdn.test/l.css"></head>"#,
            fetcher,
        );
        let mut stats = PassStats::default();
        flatten_layers(&page, Duration::from_millis(100), &mut stats).await;
        let links: Vec<_> = page
            .document
            .elements()
            .into_iter()
            .filter(|n| is_tag(n, "link"))
            .collect();
        assert_eq!(links.len(), 1);
        assert_eq!(attribute(&links[0], "crossorigin").as_deref(), Some("anonymous"));
        assert!(injected(&page, "retrocss-layers-").is_empty());
    }

    #[tokio::test]
    async fn test_media_ranges_inline_and_fetched() {
        let fetcher = StaticFetcher::new().with(
            "https://site.test/m.css",
            "@media (width >= 600px) { .m { top: 0 } }",
        );
        let page = page(
            r#"<head><link rel="stylesheet" href="/m.css"><style>@media (400px < width <= 700px) { .s { top: 1px } }</style></head>"#,
            fetcher,
        );
        let mut stats = PassStats::default();
        transpile_media_ranges(&page, &mut stats).await;
        let copies = injected(&page, "retrocss-media-range-");
        assert_eq!(copies.len(), 1);
        assert!(copies[0].contains("(min-width: 600px)"));
        let style = page
            .document
            .elements()
            .into_iter()
            .find(|n| is_tag(n, "style") && attribute(n, "id").is_none())
            .unwrap();
        assert!(text_content(&style).contains("(min-width: 400.02px) and (max-width: 700px)"));
        assert_eq!(stats.style_tags_processed, 1);

        let mut again = PassStats::default();
        transpile_media_ranges(&page, &mut again).await;
        assert_eq!(again.sheets_injected, 0);
        assert_eq!(again.style_tags_processed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_viewport_units_in_place_and_inline() {
        let page = page(
            r#"<head><style>.h { height: 100dvh; width: var(--w, 50svw) }</style></head><body><div id="d" style="min-height: 10lvh"></div></body>"#,
            StaticFetcher::new(),
        );
        let mut stats = PassStats::default();
        rewrite_viewport_units(&page, Duration::from_millis(100), &mut stats).await;
        assert_eq!(stats.sheets_changed, 1);
        assert_eq!(stats.inline_style_attrs_processed, 1);
        let sheets = page.style_sheets().await;
        let text = sheets[0].css_text().unwrap();
        assert!(text.contains("100vh"), "{}", text);
        assert!(text.contains("50svw"), "{}", text);
        let div = page.document.get_element_by_id("d").unwrap();
        assert_eq!(attribute(&div, "style").as_deref(), Some("min-height: 10vh"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_viewport_units_cross_origin_with_cors() {
        let fetcher = StaticFetcher::new().with_cors("https://cdn.test/v.css", ".v { height: 100dvh }");
        let page = page(
            r#"<head><link rel="stylesheet" href="https://cdn.test/v.css"></head>"#,
            fetcher,
        );
        let mut stats = PassStats::default();
        rewrite_viewport_units(&page, Duration::from_millis(100), &mut stats).await;
        assert_eq!(stats.sheets_changed, 1);
        let sheets = page.style_sheets().await;
        assert!(attribute(&sheets[0].owner, VIEWPORT_RELOAD_MARKER).is_some());
        assert!(sheets[0].was_edited());
    }
}
