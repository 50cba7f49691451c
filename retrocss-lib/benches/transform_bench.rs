extern crate criterion;

use criterion::{criterion_group, criterion_main, Criterion};

use retrocss_lib::style::cssom::parse_stylesheet;
use retrocss_lib::transform::{color, layers, media_range, viewport_units};

fn large_stylesheet(rules: usize) -> String {
    let mut css = String::with_capacity(rules * 120);
    for i in 0..rules {
        css.push_str(&format!(
            "@layer l{} {{ .c{} {{ color: oklch(0.{} 0.1 {}); height: 100dvh }} }}\n",
            i % 7,
            i,
            i % 10,
            i % 360
        ));
        css.push_str(&format!(
            "@media ({}px < width <= {}px) {{ .m{} {{ top: 0 }} }}\n",
            i,
            i + 400,
            i
        ));
    }
    css
}

fn bench_text_transforms(c: &mut Criterion) {
    let css = large_stylesheet(10_000);

    c.bench_function("flatten_layers", |b| b.iter(|| layers::flatten(&css)));
    c.bench_function("media_range", |b| b.iter(|| media_range::transform(&css)));
    c.bench_function("oklch_literals", |b| b.iter(|| color::replace_oklch_in_text(&css)));
    c.bench_function("viewport_units", |b| b.iter(|| viewport_units::transform(&css)));
}

fn bench_parse_stylesheet(c: &mut Criterion) {
    let css = large_stylesheet(2_000);

    c.bench_function("parse_stylesheet", |b| b.iter(|| parse_stylesheet(&css)));
}

criterion_group!(benches, bench_text_transforms, bench_parse_stylesheet);
criterion_main!(benches);
