use pretty_assertions::assert_eq;
use retrocss_lib::dom::dom_tree::{attribute, text_content, NodeRef};
use retrocss_lib::engine::observer::ChangeObserver;
use retrocss_lib::engine::page::Page;
use retrocss_lib::retro_generate::retro_css;
use retrocss_lib::parser::html::create_dom_tree;
use retrocss_lib::transform::brace::extract_block;
use retrocss_lib::transform::color::{oklch_to_srgb, to_rgb_string};
use retrocss_lib::transform::{layers, media_range};
use retrocss_lib::{EngineVersion, PlatformCapabilities, RetrocssConfig, Retrofitter, StaticFetcher};
use std::time::Duration;
use url::Url;

fn retrofitter(html: &str, fetcher: StaticFetcher) -> Retrofitter<StaticFetcher> {
    let _ = env_logger::builder().is_test(true).try_init();
    let page = Page::new(
        create_dom_tree(html),
        Url::parse("https://site.test/index.html").unwrap(),
        fetcher,
    );
    Retrofitter::new(page, RetrocssConfig::default())
        .unwrap()
        .with_capabilities(PlatformCapabilities::none())
}

fn element(retrofitter: &Retrofitter<StaticFetcher>, id: &str) -> NodeRef {
    retrofitter.page().document.get_element_by_id(id).unwrap()
}

#[tokio::test]
async fn test_box_gets_inline_background() {
    let retrofitter = retrofitter(
        r#"<html><head><style>.box{background-color:oklch(0.7 0.15 200)}</style></head>
           <body><div id="box" class="box"></div></body></html>"#,
        StaticFetcher::new(),
    );
    retrofitter.run_pass().await;

    let [r, g, b] = oklch_to_srgb(0.7, 0.15, 200.0);
    let expected = to_rgb_string(r, g, b, None);
    assert_eq!(expected, "rgb(0, 185, 195)");
    let declaration = retrofitter
        .page()
        .document
        .style_property(&element(&retrofitter, "box"), "background-color")
        .unwrap();
    assert_eq!(declaration.value, expected);
}

#[tokio::test]
async fn test_second_pass_mutates_nothing() {
    let fetcher = StaticFetcher::new().with(
        "https://site.test/m.css",
        "@media (500px < width <= 800px) { .m { color: oklch(0.5 0.1 120) } }",
    );
    let retrofitter = retrofitter(
        r#"<html><head>
             <link rel="stylesheet" href="/m.css">
             <style>@layer base { .box { background: oklch(0.7 0.15 200) } } .v { height: 100dvh }</style>
           </head>
           <body><div class="box m v" style="border-color: oklch(1 0 0)"></div></body></html>"#,
        fetcher,
    );
    let first = retrofitter.run_pass().await;
    assert!(first.sheets_injected >= 2);

    let mut records = retrofitter.page().document.observe();
    let second = retrofitter.run_pass().await;
    assert_eq!(second.sheets_injected, 0);
    assert!(records.try_recv().is_err());
}

#[tokio::test]
async fn test_settle_then_quiet() {
    let retrofitter = retrofitter(
        r#"<html><head><style>@layer a { .x { color: red } } dialog::backdrop { color: blue }</style></head><body></body></html>"#,
        StaticFetcher::new(),
    );
    let mut observer = ChangeObserver::attach(&retrofitter.page().document, Duration::from_millis(100));
    assert!(retrofitter.install());
    let passes = retrofitter.settle(&mut observer, 8).await;
    assert_eq!(passes.len(), 2);

    let injected: Vec<String> = retrofitter
        .page()
        .document
        .elements()
        .iter()
        .filter(|node| {
            attribute(node, "id")
                .map(|id| id.starts_with("retrocss-layers-"))
                .unwrap_or(false)
        })
        .map(text_content)
        .collect();
    assert_eq!(injected, vec![".x { color: red }".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_mutations_within_window_trigger_one_pass() {
    let retrofitter = retrofitter("<html><head></head><body></body></html>", StaticFetcher::new());
    let document = &retrofitter.page().document;
    let mut observer = ChangeObserver::attach(document, Duration::from_millis(100));

    let mutate = async {
        let head = document.head().unwrap();
        let first = document.create_element("style");
        document.set_text_content(&first, ".a { color: oklch(1 0 0) }");
        document.append_child(&head, &first);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = document.create_element("style");
        document.set_text_content(&second, "@media (width >= 600px) { .b { top: 0 } }");
        document.append_child(&head, &second);
        tokio::time::sleep(Duration::from_millis(300)).await;
        document.disconnect();
    };
    let (passes, ()) = tokio::join!(retrofitter.watch(&mut observer), mutate);

    assert_eq!(passes.len(), 1);
    assert_eq!(passes[0].style_tags_processed, 2);
}

fn media_preludes(html: &str) -> Vec<&str> {
    html.match_indices("@media")
        .map(|(start, _)| {
            let rest = &html[start..];
            &rest[..rest.find('{').unwrap_or(rest.len())]
        })
        .collect()
}

#[tokio::test]
async fn test_retrofit_output_has_no_modern_syntax() {
    let _ = env_logger::builder().is_test(true).try_init();
    let html = r#"<!DOCTYPE html>
<html>
<head>
<style>
@layer base { .card { background-color: oklch(0.7 0.15 200) } }
@media (width >= 600px) { .hero { height: 100dvh; color: oklch(0.5 0.1 120) } }
@media (400px < width < 900px) { .side { width: 30svw } }
</style>
</head>
<body>
  <div class="card hero">Card</div>
  <aside class="side" style="min-height: 50svh; border-color: oklch(1 0 0)">Side</aside>
</body>
</html>"#;

    let config = RetrocssConfig::new(EngineVersion::new(15, 0));
    let output = retro_css::retrofit(html, config, StaticFetcher::new())
        .await
        .unwrap();

    assert!(!output.html.contains("oklch("), "{}", output.html);
    assert!(!output.html.contains("dvh"), "{}", output.html);
    assert!(!output.html.contains("svh"), "{}", output.html);
    assert!(!output.html.contains("svw"), "{}", output.html);
    let preludes = media_preludes(&output.html);
    assert!(!preludes.is_empty());
    for prelude in preludes {
        assert!(!prelude.contains('<') && !prelude.contains('>'), "{}", prelude);
    }
    assert!(output.html.contains("min-width: 600px"), "{}", output.html);
    assert!(output.html.contains("rgb("));
}

#[test]
fn test_layer_and_backdrop_flattening() {
    assert_eq!(layers::flatten("@layer a { .x { color: red; } }"), ".x { color: red; }");
    assert_eq!(layers::flatten(".x, .y::backdrop { color: red }"), ".x { color: red }");
    assert_eq!(layers::flatten("::backdrop { color: red }"), "");
    let plain = ".a { top: 0 }\n@media print { .b { top: 1px } }";
    let squash = |css: &str| css.split_whitespace().collect::<String>();
    assert_eq!(squash(&layers::flatten(plain)), squash(plain));
}

#[test]
fn test_media_range_equivalence() {
    assert_eq!(
        media_range::transform("@media (width >= 600px) { a { b: c } }"),
        "@media (min-width: 600px) { a { b: c } }"
    );
    assert_eq!(
        media_range::transform("@media (500px < width <= 800px) { a { b: c } }"),
        "@media (min-width: 500.02px) and (max-width: 800px) { a { b: c } }"
    );
}

#[test]
fn test_conversion_endpoints_and_alpha() {
    let white = oklch_to_srgb(1.0, 0.0, 0.0);
    let black = oklch_to_srgb(0.0, 0.0, 0.0);
    assert_eq!(to_rgb_string(white[0], white[1], white[2], None), "rgb(255, 255, 255)");
    assert_eq!(to_rgb_string(black[0], black[1], black[2], None), "rgb(0, 0, 0)");
    assert_eq!(to_rgb_string(1.0, 0.0, 0.0, None), "rgb(255, 0, 0)");
    assert_eq!(to_rgb_string(1.0, 0.0, 0.0, Some(0.5)), "rgba(255, 0, 0, 0.5)");
}

#[test]
fn test_unterminated_block_terminates() {
    let css = "a { b { c";
    let block = extract_block(css, 2);
    assert_eq!(block.block_content, " b { c");
    assert_eq!(block.end_index, css.len());
}
