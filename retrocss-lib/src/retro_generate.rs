use crate::config::RetrocssConfig;
use crate::engine::loader::Fetcher;
use crate::engine::observer::ChangeObserver;
use crate::engine::page::Page;
use crate::engine::retrofit::{PassStats, Retrofitter};
use crate::error::RetrocssError;
use crate::parser::html::create_dom_tree;
use crate::parser::serialize::serialize_document;

/// Passes run before a page is considered unsettled.
pub const MAX_SETTLE_PASSES: usize = 8;

pub mod retro_css {
    use super::*;

    #[derive(Debug, Clone)]
    pub struct RetrofitOutput {
        pub html: String,
        pub passes: Vec<PassStats>,
    }

    impl RetrofitOutput {
        pub fn totals(&self) -> PassStats {
            let mut total = PassStats::default();
            for pass in &self.passes {
                total += *pass;
            }
            total
        }
    }

    /// Retrofit an HTML document for the configured engine and return the
    /// rewritten document.
    pub async fn retrofit<F: Fetcher>(
        html_content: &str,
        config: RetrocssConfig,
        fetcher: F,
    ) -> Result<RetrofitOutput, RetrocssError> {
        let document = create_dom_tree(html_content);
        let url = config.base_url()?;
        let debounce = config.debounce;
        let retrofitter = Retrofitter::new(Page::new(document, url, fetcher), config)?;

        let mut observer = ChangeObserver::attach(&retrofitter.page().document, debounce);
        let passes = if retrofitter.install() {
            retrofitter.settle(&mut observer, MAX_SETTLE_PASSES).await
        } else {
            Vec::new()
        };
        let page = retrofitter.page();
        page.document.disconnect();
        let written = retrofitter.materialize().await;
        log::debug!("materialized {} edited stylesheets", written);

        Ok(RetrofitOutput {
            html: serialize_document(&page.document),
            passes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::loader::StaticFetcher;
    use crate::engine::capabilities::EngineVersion;

    #[tokio::test]
    async fn test_retrofit_document() {
        let html_str = r#"<!DOCTYPE html>
<html>
<head>
<style>
@layer base { .red { color: oklch(0.63 0.26 29) } }
@media (width >= 600px) { .wide { height: 100dvh } }
</style>
</head>
<body>
  <div class="red">Hello Red</div>
  <p class="wide">Wide</p>
</body>
</html>"#;

        let config = RetrocssConfig::new(EngineVersion::new(15, 0));
        let output = retro_css::retrofit(html_str, config, StaticFetcher::new())
            .await
            .unwrap();

        assert!(output.html.contains("data-retrocss-installed"));
        assert!(output.html.contains("(min-width: 600px)"));
        assert!(!output.html.contains("oklch("));
        assert!(!output.html.contains("dvh"));
        assert!(output.passes.len() >= 2);
        assert!(output.totals().sheets_injected >= 1);
    }

    #[tokio::test]
    async fn test_modern_target_leaves_document_alone() {
        let html_str = "<html><head><style>.a { color: oklch(1 0 0) }</style></head><body></body></html>";
        let config = RetrocssConfig::new(EngineVersion::new(17, 0));
        let output = retro_css::retrofit(html_str, config, StaticFetcher::new())
            .await
            .unwrap();
        assert!(output.html.contains("oklch(1 0 0)"));
        assert_eq!(output.totals().sheets_injected, 0);
    }
}
