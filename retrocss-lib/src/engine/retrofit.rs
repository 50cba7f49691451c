//! Reprocessing passes over a page.

use crate::config::RetrocssConfig;
use crate::engine::access;
use crate::engine::capabilities::PlatformCapabilities;
use crate::engine::loader::Fetcher;
use crate::engine::observer::ChangeObserver;
use crate::engine::oklch_fallback;
use crate::engine::page::Page;
use crate::error::RetrocssError;
use crate::transform::{media_range, Transform};
use log::{debug, info, warn};
use std::fmt;
use std::ops::AddAssign;

/// Attribute set on `<html>` once the retrofitter is installed on a document.
pub const INSTALL_MARKER: &str = "data-retrocss-installed";

/// What one pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    pub style_sheets: usize,
    /// Sheets edited in place through their rules.
    pub sheets_changed: usize,
    pub sheets_fetched: usize,
    pub sheets_injected: usize,
    pub style_tags_processed: usize,
    pub inline_style_attrs_processed: usize,
    pub text_replacements: usize,
    pub rules_indexed: usize,
    pub rules_applied: usize,
    pub errors: usize,
}

impl AddAssign for PassStats {
    fn add_assign(&mut self, other: PassStats) {
        self.style_sheets += other.style_sheets;
        self.sheets_changed += other.sheets_changed;
        self.sheets_fetched += other.sheets_fetched;
        self.sheets_injected += other.sheets_injected;
        self.style_tags_processed += other.style_tags_processed;
        self.inline_style_attrs_processed += other.inline_style_attrs_processed;
        self.text_replacements += other.text_replacements;
        self.rules_indexed += other.rules_indexed;
        self.rules_applied += other.rules_applied;
        self.errors += other.errors;
    }
}

impl fmt::Display for PassStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sheets ({} edited, {} fetched, {} injected), {} style tags, {} inline styles, \
             {} replacements, {} rules indexed, {} applied, {} errors",
            self.style_sheets,
            self.sheets_changed,
            self.sheets_fetched,
            self.sheets_injected,
            self.style_tags_processed,
            self.inline_style_attrs_processed,
            self.text_replacements,
            self.rules_indexed,
            self.rules_applied,
            self.errors
        )
    }
}

pub struct Retrofitter<F: Fetcher> {
    page: Page<F>,
    config: RetrocssConfig,
    capabilities: PlatformCapabilities,
}

impl<F: Fetcher> Retrofitter<F> {
    pub fn new(page: Page<F>, config: RetrocssConfig) -> Result<Self, RetrocssError> {
        config.validate()?;
        let capabilities = config.capabilities();
        Ok(Retrofitter {
            page,
            config,
            capabilities,
        })
    }

    /// Replace the capabilities derived from the configuration.
    pub fn with_capabilities(mut self, capabilities: PlatformCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn page(&self) -> &Page<F> {
        &self.page
    }

    pub fn into_page(self) -> Page<F> {
        self.page
    }

    pub fn capabilities(&self) -> &PlatformCapabilities {
        &self.capabilities
    }

    /// Mark the document as retrofitted. Returns `false` when it already
    /// was, in which case the caller must not run another installation.
    pub fn install(&self) -> bool {
        let Some(html) = self.page.document.document_element() else {
            return false;
        };
        let installed = html
            .borrow()
            .as_element()
            .map(|elem| elem.has_attr(INSTALL_MARKER))
            .unwrap_or(false);
        if installed {
            debug!("retrofitter already installed on this document");
            return false;
        }
        self.page.document.set_attribute(&html, INSTALL_MARKER, "");
        info!(
            "installed for {} ({})",
            self.page.url(),
            self.capabilities
                .needed_transforms()
                .iter()
                .map(|transform| transform.name())
                .collect::<Vec<_>>()
                .join(", ")
        );
        true
    }

    /// One full reprocessing pass: every missing capability's transform, in
    /// pass order, over the stylesheets present now.
    pub async fn run_pass(&self) -> PassStats {
        let mut stats = PassStats {
            style_sheets: self.page.style_sheets().await.len(),
            ..PassStats::default()
        };
        for transform in self.capabilities.needed_transforms() {
            match transform {
                Transform::Layers => {
                    access::flatten_layers(&self.page, self.config.reload_settle, &mut stats).await
                }
                Transform::MediaRange => access::transpile_media_ranges(&self.page, &mut stats).await,
                Transform::ViewportUnits => {
                    access::rewrite_viewport_units(&self.page, self.config.reload_settle, &mut stats)
                        .await
                }
                Transform::Oklch => {
                    oklch_fallback::convert_oklch(&self.page, &self.capabilities, &mut stats).await
                }
            }
        }
        debug!("pass complete: {}", stats);
        stats
    }

    /// Run passes until one leaves no qualifying mutations behind, at most
    /// `max_passes` of them.
    pub async fn settle(&self, observer: &mut ChangeObserver, max_passes: usize) -> Vec<PassStats> {
        let mut passes = Vec::new();
        while passes.len() < max_passes {
            passes.push(self.run_pass().await);
            let pending = observer.take_pending();
            if pending == 0 {
                return passes;
            }
            debug!("{} qualifying mutations during the pass, reprocessing", pending);
        }
        warn!("page did not settle after {} passes", max_passes);
        passes
    }

    /// Write stylesheets edited through their rules back into the document.
    /// The printed rules use current syntax, so range media queries are
    /// lowered again when the target lacks them.
    pub async fn materialize(&self) -> usize {
        let lower_ranges = self.capabilities.needs(Transform::MediaRange);
        self.page
            .materialize_cssom_edits(|css| {
                if lower_ranges {
                    media_range::transform(css)
                } else {
                    css.to_string()
                }
            })
            .await
    }

    /// Reprocess after every debounced batch of mutations until the
    /// document stops reporting.
    pub async fn watch(&self, observer: &mut ChangeObserver) -> Vec<PassStats> {
        let mut passes = Vec::new();
        while let Some(records) = observer.next_batch().await {
            debug!("{} qualifying mutations, reprocessing", records);
            passes.push(self.run_pass().await);
        }
        passes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::dom_tree::{is_tag, text_content};
    use crate::engine::loader::StaticFetcher;
    use crate::parser::html::create_dom_tree;
    use std::time::Duration;
    use url::Url;

    fn retrofitter(html: &str) -> Retrofitter<StaticFetcher> {
        let page = Page::new(
            create_dom_tree(html),
            Url::parse("https://site.test/").unwrap(),
            StaticFetcher::new(),
        );
        Retrofitter::new(page, RetrocssConfig::default())
            .unwrap()
            .with_capabilities(PlatformCapabilities::none())
    }

    #[test]
    fn test_install_once_per_document() {
        let retrofitter = retrofitter("<html><head></head></html>");
        assert!(retrofitter.install());
        assert!(!retrofitter.install());
    }

    #[tokio::test]
    async fn test_nothing_needed_does_nothing() {
        let retrofitter = retrofitter("<style>@layer a { .x { color: oklch(1 0 0) } }</style>")
            .with_capabilities(PlatformCapabilities::all());
        let stats = retrofitter.run_pass().await;
        assert_eq!(
            stats,
            PassStats {
                style_sheets: 1,
                ..PassStats::default()
            }
        );
    }

    #[tokio::test]
    async fn test_settle_stops_when_quiet() {
        let retrofitter = retrofitter("<head><style>@layer a { .x { top: 0 } }</style></head>");
        let mut observer = ChangeObserver::attach(&retrofitter.page().document, Duration::from_millis(100));
        let passes = retrofitter.settle(&mut observer, 8).await;
        assert_eq!(passes.len(), 2);
        assert_eq!(passes[0].sheets_injected, 1);
        assert_eq!(passes[1].sheets_injected, 0);
    }

    #[tokio::test]
    async fn test_materialize_keeps_classic_media_features() {
        let retrofitter = retrofitter(
            "<head><style>@media (width >= 600px) { .wide { height: 100dvh } }</style></head>",
        );
        retrofitter.run_pass().await;
        assert_eq!(retrofitter.materialize().await, 1);

        let elements = retrofitter.page().document.elements();
        let style = elements.iter().find(|node| is_tag(node, "style")).unwrap();
        let css = text_content(style);
        assert!(css.contains("min-width: 600px"), "{}", css);
        assert!(!css.contains(">="));
        assert!(css.contains("100vh"));
    }

    #[test]
    fn test_stats_display() {
        let stats = PassStats {
            style_sheets: 2,
            errors: 1,
            ..PassStats::default()
        };
        assert!(stats.to_string().starts_with("2 sheets (0 edited"));
        assert!(stats.to_string().ends_with("1 errors"));
    }
}
